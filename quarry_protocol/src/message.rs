// Protocol messages for client-server communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by players (human or robot) to the session server.
// - `ServerMessage`: sent by the session server to players.
//
// All game-scoped messages carry the game name; the server re-resolves the
// *sender* from the connection itself and never trusts seat numbers or names
// in the payload for identity. All types derive `Serialize`/`Deserialize`
// for JSON framing (see `framing.rs`).

use serde::{Deserialize, Serialize};

use crate::types::{
    GameInfo, Phase, PieceType, ResourceSet, ResponseKind, SeatIndex, SeatInfo, TradeOffer,
};

/// Messages sent by a client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Connection handshake. Must be the first message on a connection.
    Hello {
        protocol_version: u32,
        name: String,
        password: Option<String>,
        is_robot: bool,
    },
    /// List joinable games.
    ListGames,
    /// Join (or create) a game by name. Joining an unused name creates it.
    JoinGame { game: String },
    /// Leave a game.
    LeaveGame { game: String },
    /// Claim a seat.
    SitDown { game: String, seat: SeatIndex },
    /// Lock or unlock a vacant seat against robot recruitment.
    SetSeatLock {
        game: String,
        seat: SeatIndex,
        locked: bool,
    },
    /// Request game start (recruits robots for vacant unlocked seats).
    StartGame { game: String },

    // Turn actions
    Roll { game: String },
    Discard { game: String, resources: ResourceSet },
    MoveRobber { game: String, hex: u8 },
    Build { game: String, piece: PieceType },
    CancelBuild { game: String, piece: PieceType },
    PlayDevCard { game: String },
    EndTurn { game: String },

    // Negotiation
    /// Propose a trade. The server overwrites `offer.from` with the
    /// sender's own seat.
    MakeOffer { game: String, offer: TradeOffer },
    /// Retract the sender's outstanding offer.
    ClearOffer { game: String },
    /// Accept the offer made by `offering_seat`.
    AcceptOffer {
        game: String,
        offering_seat: SeatIndex,
    },
    /// Reject all offers currently addressed to the sender.
    RejectOffer { game: String },
    /// Decline to engage with offers addressed to the sender.
    NoResponse { game: String },
    /// Human closing confirmation for a pending two-party trade.
    ConfirmTrade { game: String, accept: bool },

    // Session admin
    ResetRequest { game: String },
    ResetVote { game: String, yes: bool },
    Chat { game: String, text: String },

    /// Liveness reply to a server `Ping`.
    Pong,
    /// Leaving gracefully.
    Goodbye,
}

/// Messages sent by the server to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted under this (possibly taken-over) name.
    Welcome { name: String },
    /// Handshake rejected; the connection will be closed.
    Rejected { reason: String },
    /// An action was refused. Scoped to the offending connection only.
    Deny {
        game: Option<String>,
        reason: String,
    },
    /// Lobby listing.
    GameList { games: Vec<GameInfo> },

    /// Snapshot sent to a member on join.
    GameJoined {
        game: String,
        members: Vec<String>,
        seats: Vec<SeatInfo>,
        phase: Phase,
        current: Option<SeatIndex>,
    },
    MemberJoined { game: String, name: String },
    MemberLeft { game: String, name: String },
    SatDown {
        game: String,
        seat: SeatIndex,
        name: String,
        is_robot: bool,
    },
    SeatLockChanged {
        game: String,
        seat: SeatIndex,
        locked: bool,
    },
    /// A seated player asked to start; robot recruitment may follow before
    /// `GameStarted`.
    StartRequested { game: String, by: SeatIndex },
    /// The game began; `layout` is the board collaborator's opaque payload.
    GameStarted { game: String, layout: String },
    /// The game was destroyed (abandoned, expired, or reset-superseded).
    GameDeleted { game: String },

    // Turn flow
    TurnStarted {
        game: String,
        seat: SeatIndex,
        phase: Phase,
    },
    Rolled {
        game: String,
        seat: SeatIndex,
        total: u8,
    },
    /// Sent only to the seat's occupant: discard `hand` down to `down_to`.
    DiscardRequired {
        game: String,
        seat: SeatIndex,
        hand: ResourceSet,
        down_to: u8,
    },
    Discarded {
        game: String,
        seat: SeatIndex,
        count: u8,
    },
    RobberMoved {
        game: String,
        seat: SeatIndex,
        hex: u8,
    },
    Built {
        game: String,
        seat: SeatIndex,
        piece: PieceType,
    },
    BuildCanceled {
        game: String,
        seat: SeatIndex,
        piece: PieceType,
    },
    DevCardPlayed { game: String, seat: SeatIndex },
    GameOver {
        game: String,
        winner: Option<SeatIndex>,
    },

    // Negotiation
    OfferMade { game: String, offer: TradeOffer },
    OfferCleared { game: String, seat: SeatIndex },
    /// A response relayed for visibility (all responses are broadcast so
    /// every seat can stop waiting, whether or not they fold into
    /// resolution).
    ResponseMade {
        game: String,
        seat: SeatIndex,
        about: SeatIndex,
        response: ResponseKind,
    },
    /// Sent to both human parties of a pending trade: confirm or decline.
    ConfirmRequired {
        game: String,
        offering: SeatIndex,
        accepting: SeatIndex,
        give: ResourceSet,
        get: ResourceSet,
    },
    TradeExecuted {
        game: String,
        offering: SeatIndex,
        accepting: SeatIndex,
        give: ResourceSet,
        get: ResourceSet,
    },
    /// A pending trade was declined by one of its parties.
    TradeNotConfirmed { game: String },

    // Board reset
    ResetRequested { game: String, by: SeatIndex },
    ResetVoteRecorded {
        game: String,
        seat: SeatIndex,
        yes: bool,
    },
    ResetResult { game: String, accepted: bool },

    /// Ask a pooled robot to join `game` and claim `seat`.
    BotJoinRequest { game: String, seat: SeatIndex },

    ChatBroadcast {
        game: String,
        from: String,
        text: String,
    },
    /// Liveness probe; clients answer with `Pong`.
    Ping,
}
