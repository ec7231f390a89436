// Session directory: the name→game mapping and its locking discipline.
//
// Two lock levels exist and are never acquired out of order:
//
// 1. The **directory lock** guards the mapping itself (create, delete,
//    enumerate).
// 2. Each game's **own lock** (inside `GameHandle`) guards that game's
//    state, member list, and everything the handlers mutate.
//
// The order is enforced structurally rather than by convention: `get` and
// `get_or_create` clone the `Arc<GameHandle>` out from under the directory
// lock and return it — callers lock the game only after the directory lock
// is released. The single sanctioned nesting is `remove_if_dead`, which
// takes directory → game → releases both, so a game cannot be revived by a
// concurrent join between the emptiness check and the removal. No code path
// acquires the directory lock while holding a game lock.
//
// Broadcasts happen entirely outside both locks: game methods return an
// outbox which the caller delivers after releasing the game lock (see
// `game/mod.rs`).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;
use quarry_protocol::types::GameInfo;
use rustc_hash::FxHashMap;

use crate::game::Game;

/// One game plus its lock. Shared via `Arc`; the directory holds one
/// reference and every in-flight handler holds another, so a game's memory
/// outlives its directory entry for as long as anyone is still touching it.
pub struct GameHandle {
    name: String,
    game: Mutex<Game>,
}

impl GameHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock this game's state. Poisoning is recovered: a handler panic
    /// must not wedge the whole session.
    pub fn lock(&self) -> MutexGuard<'_, Game> {
        self.game.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The name→game table.
#[derive(Default)]
pub struct GameDirectory {
    games: Mutex<FxHashMap<String, Arc<GameHandle>>>,
}

impl GameDirectory {
    fn table(&self) -> MutexGuard<'_, FxHashMap<String, Arc<GameHandle>>> {
        self.games.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<Arc<GameHandle>> {
        self.table().get(name).cloned()
    }

    /// Look up `name`, creating the game via `make` if absent. Returns the
    /// handle and whether it was created by this call.
    pub fn get_or_create(
        &self,
        name: &str,
        make: impl FnOnce() -> Game,
    ) -> (Arc<GameHandle>, bool) {
        let mut table = self.table();
        if let Some(handle) = table.get(name) {
            return (handle.clone(), false);
        }
        let handle = Arc::new(GameHandle {
            name: name.to_string(),
            game: Mutex::new(make()),
        });
        table.insert(name.to_string(), handle.clone());
        info!("game {name:?} created");
        (handle.clone(), true)
    }

    /// Snapshot of all handles, for the sweeper. Taken under the directory
    /// lock only; the sweeper locks each game afterwards, one at a time.
    pub fn handles(&self) -> Vec<Arc<GameHandle>> {
        self.table().values().cloned().collect()
    }

    /// Lobby listing. Clones the handles out first so each game lock is
    /// taken after the directory lock is released.
    pub fn list(&self) -> Vec<GameInfo> {
        let handles = self.handles();
        let mut infos: Vec<GameInfo> = handles
            .iter()
            .map(|h| {
                let game = h.lock();
                GameInfo {
                    name: h.name().to_string(),
                    seats_taken: game.seats_taken(),
                    phase: game.phase,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Unconditionally unlink `name` (expiry). Members still holding the
    /// handle keep a usable but orphaned game.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.table().remove(name).is_some();
        if removed {
            info!("game {name:?} destroyed");
        }
        removed
    }

    /// Destroy `name` if the game is dead (no human members and nobody
    /// watching, or terminal and expired). This is the one sanctioned
    /// directory→game lock nesting: holding the directory lock across the
    /// check prevents a concurrent join from reviving a game that is about
    /// to be unlinked. Returns true if the entry was removed.
    pub fn remove_if_dead(&self, name: &str) -> bool {
        let mut table = self.table();
        let Some(handle) = table.get(name) else {
            return false;
        };
        let dead = {
            let game = handle.lock();
            game.is_abandoned()
        };
        if dead {
            table.remove(name);
            info!("game {name:?} destroyed");
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use quarry_protocol::types::Phase;

    use crate::config::GameRules;

    use super::*;

    fn make_game(name: &str) -> Game {
        Game::new(
            name.to_string(),
            GameRules::default(),
            Instant::now(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let dir = GameDirectory::default();
        let (a, created_a) = dir.get_or_create("harbor", || make_game("harbor"));
        let (b, created_b) = dir.get_or_create("harbor", || make_game("harbor"));
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = GameDirectory::default();
        assert!(dir.get("nowhere").is_none());
    }

    #[test]
    fn list_reports_phase_and_seats() {
        let dir = GameDirectory::default();
        let (handle, _) = dir.get_or_create("harbor", || make_game("harbor"));
        {
            let mut game = handle.lock();
            let _ = game.join("Alice", false);
            let _ = game.sit_down("Alice", quarry_protocol::types::SeatIndex(0), false);
        }
        let infos = dir.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "harbor");
        assert_eq!(infos[0].seats_taken, 1);
        assert_eq!(infos[0].phase, Phase::New);
    }

    #[test]
    fn remove_if_dead_spares_inhabited_games() {
        let dir = GameDirectory::default();
        let (handle, _) = dir.get_or_create("harbor", || make_game("harbor"));
        {
            let mut game = handle.lock();
            let _ = game.join("Alice", false);
        }
        assert!(!dir.remove_if_dead("harbor"));
        assert!(dir.get("harbor").is_some());
    }

    #[test]
    fn remove_if_dead_unlinks_empty_games() {
        let dir = GameDirectory::default();
        let _ = dir.get_or_create("harbor", || make_game("harbor"));
        assert!(dir.remove_if_dead("harbor"));
        assert!(dir.get("harbor").is_none());
    }

    #[test]
    fn removal_does_not_invalidate_outstanding_handles() {
        let dir = GameDirectory::default();
        let (handle, _) = dir.get_or_create("harbor", || make_game("harbor"));
        assert!(dir.remove_if_dead("harbor"));
        // A handler still holding the Arc can finish its critical section.
        let game = handle.lock();
        assert_eq!(game.phase, Phase::New);
    }
}
