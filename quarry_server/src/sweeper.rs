// Supervisory sweeper thread.
//
// One thread wakes every `sweep_interval` and does the periodic work no
// request handler can do:
//
// - pings connections that have been silent past `ping_after`, producing
//   the unanswered-ping evidence the nickname-takeover rules require;
// - re-issues robot recruitment requests that have gone stale;
// - force-ends the turn of robot seats the game is waiting on that have
//   stalled past their inactivity window;
// - destroys games idle past `game_expiry` and unlinks abandoned ones.
//
// Lock discipline matches the handlers: directory snapshot first, then one
// game lock at a time, all sends after the lock is released. A seat is only
// forced when the game is actually *waiting on it* — a robot quietly
// holding resources while someone else's turn runs is not a stall.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use quarry_protocol::message::ServerMessage;
use quarry_protocol::types::{Phase, SeatIndex};

use crate::config::ServerConfig;
use crate::directory::GameHandle;
use crate::game::{Game, Outbound, Outbox};
use crate::seatfill::reissue_stale;
use crate::server::{Shared, after_effects, deliver, drive_ready};

/// Sweeper entry point; runs until `keep_running` clears.
pub fn run(shared: &Arc<Shared>, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        thread::sleep(shared.config.sweep_interval);
        sweep(shared);
    }
}

/// One pass over connections and games.
pub fn sweep(shared: &Arc<Shared>) {
    let now = Instant::now();

    for conn in shared.registry.idle_connections(shared.config.ping_after, now) {
        debug!("pinging idle connection {}", conn.id);
        conn.mark_pinged(now);
        let _ = conn.send(&ServerMessage::Ping);
    }

    for handle in shared.directory.handles() {
        sweep_game(shared, &handle, now);
    }
}

fn sweep_game(shared: &Arc<Shared>, handle: &Arc<GameHandle>, now: Instant) {
    let (out, members, expired) = {
        let mut game = handle.lock();

        if now >= game.expires_at {
            info!("game {:?} expired", game.name);
            let out = game.finish(None);
            (out, game.member_names(), true)
        } else if game.phase == Phase::Ready {
            let mut out = {
                let mut rng = shared.rng();
                reissue_stale(
                    &mut game,
                    &shared.pool,
                    &mut rng,
                    shared.config.shuffle_robots,
                    shared.config.seatfill_timeout,
                    now,
                )
            };
            // A reset reconstruction whose robots never re-pooled (so
            // requests could never be issued) gives up after the same
            // timeout. Ordinary starts are refused up front in `server.rs`.
            if game.phase == Phase::Ready
                && game.join_requests().is_empty()
                && !game.unrequested_vacancies().is_empty()
                && now.duration_since(game.last_action) >= shared.config.seatfill_timeout
            {
                out.extend(
                    game.abort_start("not enough robot players available".to_string()),
                );
            }
            (out, game.member_names(), false)
        } else if game.phase.is_active() {
            let out = force_stalled_robots(&mut game, &shared.config, now);
            (out, game.member_names(), false)
        } else {
            (Vec::new(), Vec::new(), false)
        }
    };

    after_effects(shared, handle, &out);
    deliver(&shared.registry, &members, out);

    if expired {
        shared.directory.remove(handle.name());
        deliver(
            &shared.registry,
            &members,
            vec![Outbound::All(ServerMessage::GameDeleted {
                game: handle.name().to_string(),
            })],
        );
        return;
    }

    if shared.directory.remove_if_dead(handle.name()) {
        let members = handle.lock().member_names();
        deliver(
            &shared.registry,
            &members,
            vec![Outbound::All(ServerMessage::GameDeleted {
                game: handle.name().to_string(),
            })],
        );
        return;
    }

    drive_ready(shared, handle);
}

/// Force-end the turn of every robot seat the game is waiting on whose
/// stall window has elapsed.
fn force_stalled_robots(game: &mut Game, config: &ServerConfig, now: Instant) -> Outbox {
    let mut out = Vec::new();
    for s in 0..game.seats.len() {
        if !game.seats[s].occupant.is_robot() || !seat_awaited(game, s) {
            continue;
        }
        let window = stall_window(game, s, config);
        let idle = now.duration_since(game.seats[s].last_action);
        if idle >= window {
            info!(
                "game {:?}: robot seat {s} stalled ({}s), forcing",
                game.name,
                idle.as_secs()
            );
            out.extend(game.force_end_turn(SeatIndex(s as u8)));
            if !game.phase.is_active() {
                break;
            }
        }
    }
    out
}

/// The inactivity window applicable to seat `s` right now. Trade
/// negotiation (an own offer out, or an unanswered one addressed to the
/// seat) and owed discards legitimately take longer than a plain turn.
pub(crate) fn stall_window(game: &Game, s: usize, config: &ServerConfig) -> Duration {
    let negotiating = game.seats[s].offer.is_some()
        || (game.seats[game.current].offer.is_some() && game.round.responses[s].is_none());
    if negotiating {
        config.robot_inactivity_with_offer
    } else if game.seats[s].needs_discard {
        config.robot_inactivity_with_discard
    } else {
        config.robot_inactivity
    }
}

/// Whether the game is currently waiting on seat `s` for anything: the
/// turn itself, a special-build window, an owed discard, an answer to the
/// current player's live offer, or a reset vote. The offer condition
/// mirrors the negotiation completion scan: every robot owes *some*
/// response while the current player's offer is live, addressed or not
/// (an own counter-offer counts as one).
pub(crate) fn seat_awaited(game: &Game, s: usize) -> bool {
    if s == game.current || game.special_builder == Some(s) {
        return true;
    }
    if game.seats[s].needs_discard {
        return true;
    }
    if game.seats[game.current].offer.is_some()
        && game.round.responses[s].is_none()
        && game.seats[s].offer.is_none()
    {
        return true;
    }
    game.reset_vote.as_ref().is_some_and(|v| v.awaiting(s))
}

#[cfg(test)]
mod tests {
    use quarry_protocol::types::{ResourceSet, TradeOffer};

    use crate::game::testutil::{set_hand, started_game, to_play_phase};

    use super::*;

    fn four_robots_one_human() -> Game {
        started_game(&[
            Some(("Alice", false)),
            Some(("r1", true)),
            Some(("r2", true)),
            Some(("r3", true)),
        ])
    }

    #[test]
    fn current_seat_is_awaited() {
        let game = four_robots_one_human();
        assert!(seat_awaited(&game, game.current));
    }

    #[test]
    fn bystander_robot_is_not_awaited() {
        let mut game = four_robots_one_human();
        to_play_phase(&mut game);
        let bystander = (game.current + 1) % 4;
        assert!(!seat_awaited(&game, bystander));
    }

    #[test]
    fn offer_recipient_is_awaited_until_it_responds() {
        let mut game = four_robots_one_human();
        to_play_phase(&mut game);
        let current = game.current;
        let target = (current + 1) % 4;
        set_hand(&mut game, current, ResourceSet::new(1, 0, 0, 0, 0));

        let mut to = [false; 4];
        to[target] = true;
        let offer = TradeOffer {
            from: SeatIndex(current as u8),
            to,
            give: ResourceSet::new(1, 0, 0, 0, 0),
            get: ResourceSet::new(0, 1, 0, 0, 0),
        };
        let name = game.seats[current].occupant.name().unwrap().to_string();
        game.make_offer(&name, offer).unwrap();

        assert!(seat_awaited(&game, target));
        let target_name = game.seats[target].occupant.name().unwrap().to_string();
        game.no_response(&target_name).unwrap();
        assert!(!seat_awaited(&game, target));
    }

    #[test]
    fn discard_owers_are_awaited() {
        let mut game = four_robots_one_human();
        let current = game.current;
        let other = (current + 1) % 4;
        set_hand(&mut game, other, ResourceSet::new(8, 0, 0, 0, 0));
        let name = game.seats[current].occupant.name().unwrap().to_string();
        game.roll(&name, 7).unwrap();
        assert!(seat_awaited(&game, other));
    }

    #[test]
    fn window_widens_with_offer_and_discard() {
        let mut game = four_robots_one_human();
        to_play_phase(&mut game);
        let cfg = ServerConfig::default();
        let current = game.current;
        assert_eq!(stall_window(&game, current, &cfg), cfg.robot_inactivity);

        game.seats[current].needs_discard = true;
        assert_eq!(
            stall_window(&game, current, &cfg),
            cfg.robot_inactivity_with_discard
        );

        set_hand(&mut game, current, ResourceSet::new(1, 0, 0, 0, 0));
        game.seats[current].needs_discard = false;
        let mut to = [false; 4];
        to[(current + 1) % 4] = true;
        let name = game.seats[current].occupant.name().unwrap().to_string();
        game.make_offer(
            &name,
            TradeOffer {
                from: SeatIndex(current as u8),
                to,
                give: ResourceSet::new(1, 0, 0, 0, 0),
                get: ResourceSet::new(0, 1, 0, 0, 0),
            },
        )
        .unwrap();
        assert_eq!(
            stall_window(&game, current, &cfg),
            cfg.robot_inactivity_with_offer
        );
    }

    #[test]
    fn forcing_skips_fresh_seats() {
        let mut game = four_robots_one_human();
        let cfg = ServerConfig::default();
        // All seats acted just now; nothing is overdue.
        let out = force_stalled_robots(&mut game, &cfg, Instant::now());
        assert!(out.is_empty());
    }

    #[test]
    fn forcing_ends_overdue_robot_turn() {
        let mut game = four_robots_one_human();
        let cfg = ServerConfig::default();
        // Walk the current seat to a robot if it isn't one already.
        while !game.seats[game.current].occupant.is_robot() {
            let name = game.seats[game.current].occupant.name().unwrap().to_string();
            to_play_phase(&mut game);
            game.end_turn(&name).unwrap();
        }
        let stalled = game.current;
        let later = Instant::now() + cfg.robot_inactivity * 2;
        let out = force_stalled_robots(&mut game, &cfg, later);
        assert!(!out.is_empty());
        assert_ne!(game.current, stalled);
    }
}
