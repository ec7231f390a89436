// quarry_server — multiplayer session server for the Quarry board game.
//
// The server hosts many concurrent games, each a small turn-based state
// machine: seats fill up (robots recruited from a pool for the empty ones),
// initial placement snakes through the players, then turns of
// roll/robber/trade/build run until someone reaches the winning score.
// Trade negotiation, board-reset voting, nickname takeover, and stall
// supervision are all handled here; board geometry, persistence, and
// accounts live behind the collaborator traits in `collab.rs`.
//
// Module overview:
// - `config.rs`:    `ServerConfig` / `GameRules` — all tunables in one place.
// - `registry.rs`:  Connection registry: name table, liveness, takeover.
// - `directory.rs`: Name→game mapping and the two-level lock discipline.
// - `game/`:        The per-game state machine (`mod.rs` membership and
//                   seating, `turn.rs` turn flow, `trade.rs` negotiation,
//                   `reset.rs` board-reset voting).
// - `seatfill.rs`:  Robot pool and recruitment.
// - `sweeper.rs`:   Periodic supervision: pings, stalls, expiry.
// - `server.rs`:    TCP listener, reader threads, dispatch.
// - `client.rs`:    TCP client used by robots and integration tests.
// - `robot.rs`:     The bundled robot player.
// - `collab.rs`:    External collaborator traits and standalone defaults.
// - `rng.rs`:       Seedable PRNG for dice and robot selection.
// - `error.rs`:     `Deny`, the per-request refusal type.
//
// The server can run standalone (`main.rs`, binary `quarryd`) or embedded
// via `start_server`.

pub mod client;
pub mod collab;
pub mod config;
pub mod directory;
pub mod error;
pub mod game;
pub mod registry;
pub mod rng;
pub mod robot;
pub mod seatfill;
pub mod server;
pub mod sweeper;

pub use client::NetClient;
pub use collab::Collaborators;
pub use config::{GameRules, ServerConfig};
pub use robot::{Robot, RobotPolicy};
pub use server::{ServerHandle, start_server};
