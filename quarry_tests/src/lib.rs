// Test-only player client for session-server integration tests.
//
// Wraps the real `NetClient` (from `quarry_server::client`) with a
// synchronous, test-friendly API: every helper blocks until the expected
// server message arrives or panics after a timeout. Messages that arrive
// while waiting for something else are kept in a backlog and matched by
// later waits, so tests never lose a broadcast to ordering.
//
// The only test-specific code here is the blocking wrappers; all
// networking uses the same code paths as robots and real clients.
//
// See also: `tests/full_session.rs` for the integration scenarios.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use quarry_protocol::message::{ClientMessage, ServerMessage};
use quarry_protocol::types::{Phase, PieceType, SeatIndex};
use quarry_server::client::NetClient;

/// Default timeout for blocking waits.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A test player wrapping a real NetClient.
#[derive(Debug)]
pub struct TestPlayer {
    client: NetClient,
    backlog: VecDeque<ServerMessage>,
    pub name: String,
}

impl TestPlayer {
    /// Connect with a password and a current protocol version. Panics on a
    /// rejected handshake.
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        Self::connect_with(addr, name, Some("pw".into()), 2).expect("TestPlayer::connect failed")
    }

    /// Connect with explicit credentials; rejection is returned, not
    /// panicked, so tests can assert on it.
    pub fn connect_with(
        addr: SocketAddr,
        name: &str,
        password: Option<String>,
        protocol_version: u32,
    ) -> Result<Self, String> {
        let client = NetClient::connect(&addr.to_string(), name, password, protocol_version, false)?;
        Ok(Self {
            name: client.name.clone(),
            client,
            backlog: VecDeque::new(),
        })
    }

    pub fn send(&mut self, msg: ClientMessage) {
        self.client.send(&msg).expect("send failed");
    }

    /// Block until a message matching `pred` arrives (backlog first).
    /// Removes and returns the matched message; everything else stays
    /// queued for later waits. Panics after `WAIT_TIMEOUT`.
    pub fn wait_for(
        &mut self,
        what: &str,
        pred: impl Fn(&ServerMessage) -> bool,
    ) -> ServerMessage {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            if let Some(i) = self.backlog.iter().position(|m| pred(m)) {
                return self.backlog.remove(i).unwrap();
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                panic!("timed out waiting for {what}; backlog: {:?}", self.backlog);
            };
            match self
                .client
                .recv_timeout(remaining.min(Duration::from_millis(50)))
            {
                Ok(msg) => self.backlog.push_back(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("connection closed while waiting for {what}")
                }
            }
        }
    }

    /// Assert that the server tears this connection down (displacement by a
    /// nickname takeover).
    pub fn wait_disconnected(&mut self) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            match self.client.recv_timeout(Duration::from_millis(50)) {
                Err(RecvTimeoutError::Disconnected) => return,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {
                    assert!(
                        Instant::now() < deadline,
                        "connection was not torn down"
                    );
                }
            }
        }
    }

    /// Join a game and consume the membership snapshot.
    pub fn join(&mut self, game: &str) {
        self.send(ClientMessage::JoinGame { game: game.into() });
        self.wait_for("join snapshot", |m| {
            matches!(m, ServerMessage::GameJoined { game: g, .. } if g == game)
        });
    }

    /// Claim a seat and consume the announcement.
    pub fn sit(&mut self, game: &str, seat: SeatIndex) {
        self.send(ClientMessage::SitDown {
            game: game.into(),
            seat,
        });
        let name = self.name.clone();
        self.wait_for("seat announcement", |m| {
            matches!(m, ServerMessage::SatDown { game: g, name: n, .. } if g == game && *n == name)
        });
    }

    /// Answer this player's initial-placement prompts until the machine
    /// reaches the first Roll phase. Returns the seat that rolls first.
    pub fn autoplace(&mut self, game: &str, mine: SeatIndex) -> SeatIndex {
        loop {
            let msg = self.wait_for("placement turn", |m| {
                matches!(m, ServerMessage::TurnStarted { game: g, .. } if g == game)
            });
            let ServerMessage::TurnStarted { seat, phase, .. } = msg else {
                unreachable!()
            };
            match phase {
                Phase::Placement1A | Phase::Placement2A if seat == mine => {
                    self.send(ClientMessage::Build {
                        game: game.into(),
                        piece: PieceType::Settlement,
                    });
                }
                Phase::Placement1B | Phase::Placement2B if seat == mine => {
                    self.send(ClientMessage::Build {
                        game: game.into(),
                        piece: PieceType::Road,
                    });
                }
                Phase::Roll => {
                    // Re-queue the Roll announcement so a later
                    // `roll_to_play` can observe the same broadcast.
                    self.backlog.push_front(msg);
                    return seat;
                }
                _ => {}
            }
        }
    }

    /// Wait for this player's roll phase, roll, and advance to Play (moving
    /// the robber on a 7; hands are empty in these tests, so no discards).
    pub fn roll_to_play(&mut self, game: &str, mine: SeatIndex) {
        self.wait_for("own roll phase", |m| {
            matches!(
                m,
                ServerMessage::TurnStarted { game: g, seat, phase: Phase::Roll }
                    if g == game && *seat == mine
            )
        });
        self.send(ClientMessage::Roll { game: game.into() });
        loop {
            let msg = self.wait_for("post-roll phase", |m| {
                matches!(
                    m,
                    ServerMessage::TurnStarted { game: g, seat, .. } if g == game && *seat == mine
                )
            });
            let ServerMessage::TurnStarted { phase, .. } = msg else {
                unreachable!()
            };
            match phase {
                Phase::Robber => self.send(ClientMessage::MoveRobber {
                    game: game.into(),
                    hex: 0,
                }),
                Phase::Play => return,
                _ => {}
            }
        }
    }
}
