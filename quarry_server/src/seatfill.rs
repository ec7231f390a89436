// Seat-fill: recruiting robots for vacant unlocked seats.
//
// Robots announce themselves at handshake time (`Hello { is_robot: true }`)
// and wait in the pool until a starting game needs them. Selection order is
// either randomized (spreads load across the pool) or stable front-of-list
// (deterministic experiment replays); the toggle is
// `ServerConfig::shuffle_robots`.
//
// One `BotJoinRequest` goes out per vacant seat and the game records the
// outstanding set; it leaves the `Ready` holding state only when every
// requested robot has sat down. An ordinary `StartGame` against a pool too
// small to cover the vacancies is refused up front (see the handler in
// `server.rs`), so an undersized pool here means a reset reconstruction:
// the old board's robots re-pool a beat after vacating their seats, and
// filling just waits and retries on the next sweep. A request unanswered
// past `ServerConfig::seatfill_timeout` is re-issued to a different robot;
// a reconstruction whose robots never return is abandoned after the same
// timeout instead of stalling forever (see `sweeper.rs`).

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{info, warn};
use quarry_protocol::message::ServerMessage;
use quarry_protocol::types::SeatIndex;

use crate::game::{Game, Outbound, Outbox};
use crate::rng::Rng;

/// Robots currently idle and available for recruitment.
#[derive(Default)]
pub struct RobotPool {
    idle: Mutex<Vec<String>>,
}

impl RobotPool {
    fn list(&self) -> MutexGuard<'_, Vec<String>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A robot connection is ready for work.
    pub fn register(&self, name: &str) {
        let mut idle = self.list();
        if !idle.iter().any(|n| n == name) {
            idle.push(name.to_string());
        }
    }

    /// Remove a robot entirely (disconnect).
    pub fn unregister(&self, name: &str) {
        self.list().retain(|n| n != name);
    }

    /// A recruited robot finished its game and is idle again.
    pub fn release(&self, name: &str) {
        self.register(name);
    }

    pub fn idle_count(&self) -> usize {
        self.list().len()
    }

    /// Take `count` robots out of the pool, or `None` (taking nothing) if
    /// the pool is too small. `shuffle` randomizes which robots are picked;
    /// otherwise selection is stable front-of-list order.
    pub fn take(&self, count: usize, rng: &mut Rng, shuffle: bool) -> Option<Vec<String>> {
        let mut idle = self.list();
        if idle.len() < count {
            return None;
        }
        if shuffle {
            rng.shuffle(&mut idle);
        }
        Some(idle.drain(..count).collect())
    }
}

/// Issue one join request per vacancy. On an undersized pool nothing is
/// taken and nothing is issued; the next sweep retries (or gives up, past
/// the seat-fill timeout).
pub fn fill_seats(
    game: &mut Game,
    vacancies: &[SeatIndex],
    pool: &RobotPool,
    rng: &mut Rng,
    shuffle: bool,
    now: Instant,
) -> Outbox {
    if vacancies.is_empty() {
        return Vec::new();
    }
    let Some(robots) = pool.take(vacancies.len(), rng, shuffle) else {
        warn!(
            "game {:?}: need {} robots, pool has {}",
            game.name,
            vacancies.len(),
            pool.idle_count()
        );
        return Vec::new();
    };
    let mut out = Vec::new();
    for (robot, &seat) in robots.iter().zip(vacancies) {
        info!("game {:?}: recruiting {robot:?} for seat {}", game.name, seat.0);
        game.record_join_request(robot, seat, now);
        out.push(Outbound::To(
            robot.clone(),
            ServerMessage::BotJoinRequest {
                game: game.name.clone(),
                seat,
            },
        ));
    }
    out
}

/// Re-issue recruitment requests that have gone unanswered past `timeout`.
/// The original robot is presumed dead and dropped; if no replacement
/// exists the start attempt is abandoned.
pub fn reissue_stale(
    game: &mut Game,
    pool: &RobotPool,
    rng: &mut Rng,
    shuffle: bool,
    timeout: Duration,
    now: Instant,
) -> Outbox {
    let stale: Vec<(String, SeatIndex)> = game
        .join_requests()
        .iter()
        .filter(|(_, req)| now.duration_since(req.issued) >= timeout)
        .map(|(name, req)| (name.clone(), req.seat))
        .collect();
    let mut out = Vec::new();
    for (old, seat) in stale {
        game.drop_join_request(&old);
        warn!(
            "game {:?}: robot {old:?} never claimed seat {}, re-recruiting",
            game.name, seat.0
        );
        match pool.take(1, rng, shuffle) {
            Some(replacement) => {
                let robot = &replacement[0];
                game.record_join_request(robot, seat, now);
                out.push(Outbound::To(
                    robot.clone(),
                    ServerMessage::BotJoinRequest {
                        game: game.name.clone(),
                        seat,
                    },
                ));
            }
            None => {
                out.extend(
                    game.abort_start("robot recruitment failed: pool exhausted".to_string()),
                );
                break;
            }
        }
    }
    out
}
