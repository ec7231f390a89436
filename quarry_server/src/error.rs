// Protocol-violation denials.
//
// A `Deny` is the server's answer to a message that is well-formed but
// illegal right now: wrong turn, wrong phase, trade with self, and so on.
// Denials are never fatal — session state is left unchanged and the reply
// goes only to the offending connection. The `Display` text of each variant
// is exactly the user-visible denial message.
//
// Internal invariant violations are NOT `Deny`s; those are logged with
// `log::error!` and answered with the safe default (clear negotiation
// state), per the error-handling policy in `game/trade.rs`.

use thiserror::Error;

/// Reasons an action is refused. Sent back as `ServerMessage::Deny`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Deny {
    #[error("no such game: {0}")]
    NoSuchGame(String),
    #[error("you are not a member of this game")]
    NotMember,
    #[error("you are not seated in this game")]
    NotSeated,
    #[error("not your turn")]
    NotYourTurn,
    #[error("that action is not allowed in the current phase")]
    WrongPhase,
    #[error("seat number out of range")]
    BadSeat,
    #[error("seat is already taken")]
    SeatTaken,
    #[error("seat is locked")]
    SeatLocked,
    #[error("you are already seated")]
    AlreadySeated,
    #[error("game has already started")]
    AlreadyStarted,
    #[error("cannot start: {0}")]
    CannotStart(String),
    #[error("you cannot trade with yourself")]
    SelfTrade,
    #[error("that offer no longer exists")]
    NoSuchOffer,
    #[error("that offer is not addressed to you")]
    NotRecipient,
    #[error("insufficient resources")]
    InsufficientResources,
    #[error("you have nothing to discard")]
    NoDiscardOwed,
    #[error("discard must be exactly {0} cards from your hand")]
    BadDiscard(u32),
    #[error("no trade is awaiting your confirmation")]
    NoPendingTrade,
    #[error("another trade is already awaiting confirmation")]
    ConfirmationPending,
    #[error("a reset vote is already in progress")]
    VoteInProgress,
    #[error("no reset vote is in progress")]
    NoVoteInProgress,
    #[error("you have no pending reset vote")]
    NoPendingVote,
    #[error("reset refused: no other players to continue with")]
    ResetRefused,
}
