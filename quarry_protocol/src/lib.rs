// quarry_protocol — wire protocol for the Quarry game session server.
//
// This crate defines the message types, framing, and serialization used by
// the session server (`quarry_server`) and game clients (human front ends,
// robots, tests) to communicate over TCP. It is shared between both sides
// and has no dependency on server internals.
//
// Module overview:
// - `types.rs`:    Seat indices, resource sets, trade offers, phases.
// - `message.rs`:  Client-to-server and server-to-client message enums.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// Design decisions:
// - **JSON serialization.** Human-debuggable and cheap at board-game message
//   rates. Binary framing can be swapped in later if bandwidth matters.
// - **No async runtime.** Uses `std::io::Read`/`Write` for framing,
//   compatible with blocking TCP streams and buffered wrappers.
// - **Identity is never payload.** Game messages name the game, not the
//   sender; the server resolves the sender from the connection registry.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{ClientMessage, ServerMessage};
pub use types::{
    GameInfo, MAX_SEATS, Phase, PieceType, ResourceSet, ResponseKind, SeatIndex, SeatInfo,
    TradeOffer,
};
