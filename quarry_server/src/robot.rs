// The bundled robot player.
//
// Robots are ordinary clients: they connect over TCP with
// `Hello { is_robot: true }`, wait in the server's pool, and join games on
// `BotJoinRequest`. Everything a robot does goes through the same protocol
// and the same validation as a human client.
//
// Play is deliberately minimal: the robot keeps the game moving (placement
// builds, rolls, robber moves, discards, prompt turn ends) and answers
// trade offers per its `RobotPolicy`. It never authors offers and never
// builds outside initial placement. `Silent` robots ignore offers
// entirely, which is exactly what the server's stall supervisor exists to
// absorb — tests use it to exercise forced termination.

use std::sync::mpsc::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use quarry_protocol::message::{ClientMessage, ServerMessage};
use quarry_protocol::types::{Phase, PieceType, ResourceSet, SeatIndex};

use crate::client::NetClient;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a robot answers trade offers addressed to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RobotPolicy {
    /// Never respond; the stall supervisor answers on its behalf.
    Silent,
    /// Reject every offer.
    RejectAll,
    /// Accept every offer.
    AcceptAll,
}

/// One robot player bound to one connection.
pub struct Robot {
    client: NetClient,
    policy: RobotPolicy,
    /// The game and seat currently claimed, if any.
    post: Option<(String, SeatIndex)>,
}

impl Robot {
    /// Connect to `addr` as a pooled robot.
    pub fn connect(addr: &str, name: &str, policy: RobotPolicy) -> Result<Self, String> {
        let client = NetClient::connect(addr, name, None, 2, true)?;
        Ok(Self {
            client,
            policy,
            post: None,
        })
    }

    /// Connect and run on a background thread until the server goes away.
    pub fn spawn(addr: String, name: String, policy: RobotPolicy) -> JoinHandle<()> {
        thread::spawn(move || match Robot::connect(&addr, &name, policy) {
            Ok(robot) => robot.run(),
            Err(e) => debug!("robot {name:?} failed to connect: {e}"),
        })
    }

    /// React to server messages until the connection dies.
    pub fn run(mut self) {
        loop {
            match self.client.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("robot {:?} disconnected", self.client.name);
    }

    fn send(&mut self, msg: ClientMessage) {
        if let Err(e) = self.client.send(&msg) {
            debug!("robot {:?} send failed: {e}", self.client.name);
        }
    }

    fn seat_in(&self, game: &str) -> Option<SeatIndex> {
        match &self.post {
            Some((g, seat)) if g == game => Some(*seat),
            _ => None,
        }
    }

    fn leave(&mut self, game: &str) {
        if self.seat_in(game).is_some() {
            self.post = None;
        }
        self.send(ClientMessage::LeaveGame {
            game: game.to_string(),
        });
    }

    fn handle(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Ping => self.send(ClientMessage::Pong),
            ServerMessage::BotJoinRequest { game, seat } => {
                info!(
                    "robot {:?} recruited to {game:?} seat {}",
                    self.client.name, seat.0
                );
                self.post = Some((game.clone(), seat));
                self.send(ClientMessage::JoinGame { game: game.clone() });
                self.send(ClientMessage::SitDown { game, seat });
            }
            ServerMessage::TurnStarted { game, seat, phase } => {
                if self.seat_in(&game) == Some(seat) {
                    self.take_turn(game, phase);
                }
            }
            ServerMessage::DiscardRequired {
                game,
                seat,
                hand,
                down_to,
            } => {
                if self.seat_in(&game) == Some(seat) {
                    let owed = hand.total() - u32::from(down_to);
                    let resources = discard_selection(&hand, owed);
                    self.send(ClientMessage::Discard { game, resources });
                }
            }
            ServerMessage::OfferMade { game, offer } => {
                let Some(mine) = self.seat_in(&game) else {
                    return;
                };
                if offer.from == mine {
                    return;
                }
                // Negotiation rounds wait on every robot, addressed or not;
                // an offer not meant for us still gets a NoResponse so the
                // round can resolve.
                if !offer.to[mine.idx()] {
                    if self.policy != RobotPolicy::Silent {
                        self.send(ClientMessage::NoResponse { game });
                    }
                    return;
                }
                match self.policy {
                    RobotPolicy::Silent => {}
                    RobotPolicy::RejectAll => self.send(ClientMessage::RejectOffer { game }),
                    RobotPolicy::AcceptAll => self.send(ClientMessage::AcceptOffer {
                        game,
                        offering_seat: offer.from,
                    }),
                }
            }
            ServerMessage::GameDeleted { game } => {
                if self.seat_in(&game).is_some() {
                    self.leave(&game);
                }
            }
            ServerMessage::ResetResult { game, accepted } => {
                // A reconstruction vacates robot seats; go back to the pool.
                if accepted && self.seat_in(&game).is_some() {
                    self.leave(&game);
                }
            }
            _ => {}
        }
    }

    /// It is this robot's move; do the minimum legal thing.
    fn take_turn(&mut self, game: String, phase: Phase) {
        match phase {
            Phase::Placement1A | Phase::Placement2A => self.send(ClientMessage::Build {
                game,
                piece: PieceType::Settlement,
            }),
            Phase::Placement1B | Phase::Placement2B => self.send(ClientMessage::Build {
                game,
                piece: PieceType::Road,
            }),
            Phase::Roll => self.send(ClientMessage::Roll { game }),
            Phase::Robber => self.send(ClientMessage::MoveRobber { game, hex: 0 }),
            Phase::Play | Phase::SpecialBuild => self.send(ClientMessage::EndTurn { game }),
            // DiscardWait resolves through DiscardRequired; nothing else
            // needs a move from us.
            _ => {}
        }
    }
}

/// Pick `owed` cards to discard, taking from the largest piles first so the
/// hand stays balanced.
fn discard_selection(hand: &ResourceSet, owed: u32) -> ResourceSet {
    let mut remaining = *hand;
    let mut picked = ResourceSet::EMPTY;
    for _ in 0..owed {
        let piles = [
            (remaining.brick, 0),
            (remaining.wood, 1),
            (remaining.ore, 2),
            (remaining.grain, 3),
            (remaining.wool, 4),
        ];
        let Some(&(_, which)) = piles.iter().max_by_key(|(count, _)| *count) else {
            break;
        };
        let (from, to) = match which {
            0 => (&mut remaining.brick, &mut picked.brick),
            1 => (&mut remaining.wood, &mut picked.wood),
            2 => (&mut remaining.ore, &mut picked.ore),
            3 => (&mut remaining.grain, &mut picked.grain),
            _ => (&mut remaining.wool, &mut picked.wool),
        };
        if *from == 0 {
            break;
        }
        *from -= 1;
        *to += 1;
    }
    picked
}
