// Server configuration.
//
// All tunable parameters live in `ServerConfig`, constructed once at startup
// and shared immutably (`Arc`) with every component that needs it. There are
// no process-wide mutable flags or counters — anything that changes at
// runtime is owned by the component responsible for it (win/loss counters by
// the registry, timestamps by each game).
//
// `GameRules` is the small subset a `Game` needs to make decisions on its
// own; it is copied into each game at creation so game logic stays free of
// `Arc` plumbing and is trivial to unit-test with custom rules.

use std::time::Duration;

/// Protocol version a client must report to connect at all.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Protocol version from which a client can answer board-reset votes.
/// Older clients are counted as automatic "yes" voters.
pub const VOTE_MIN_VERSION: u32 = 2;

/// Full server configuration. Built once, never mutated.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen port. 0 lets the OS pick (useful in tests).
    pub port: u16,
    /// Reserved display name; no client may claim it.
    pub server_name: String,

    // Nickname takeover. A new connection claiming a taken name must wait
    // out one of these windows (measured from the old connection's last
    // pong after a ping) before the takeover is allowed. Shorter evidence
    // of legitimacy means a shorter wait: password < same origin < nothing.
    pub takeover_with_password: Duration,
    pub takeover_same_origin: Duration,
    pub takeover_unrelated: Duration,
    /// Idle time after which a connection is pinged for liveness.
    pub ping_after: Duration,

    // Robot stall detection. A robot seat that has taken no action for the
    // applicable window gets its turn force-ended by the sweeper. The
    // window is longer when the robot has an outstanding trade offer or
    // owes a discard, since both legitimately take more thinking time.
    pub robot_inactivity: Duration,
    pub robot_inactivity_with_offer: Duration,
    pub robot_inactivity_with_discard: Duration,

    // Seat-fill. An unanswered robot join request is re-issued to another
    // pooled robot after this long; when the pool runs dry the start
    // attempt is abandoned instead of stalling forever.
    pub seatfill_timeout: Duration,
    /// Randomize robot selection order (spread load). Disable for
    /// deterministic experiment replay.
    pub shuffle_robots: bool,
    /// Seed for the server's PRNG. `None` seeds from the clock.
    pub rng_seed: Option<u64>,

    /// How often the supervisory sweeper runs.
    pub sweep_interval: Duration,
    /// Games idle longer than this are destroyed.
    pub game_expiry: Duration,

    pub rules: GameRules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8880,
            server_name: "Server".into(),
            takeover_with_password: Duration::from_secs(15),
            takeover_same_origin: Duration::from_secs(30),
            takeover_unrelated: Duration::from_secs(300),
            ping_after: Duration::from_secs(60),
            robot_inactivity: Duration::from_secs(8),
            robot_inactivity_with_offer: Duration::from_secs(25),
            robot_inactivity_with_discard: Duration::from_secs(15),
            seatfill_timeout: Duration::from_secs(10),
            shuffle_robots: true,
            rng_seed: None,
            sweep_interval: Duration::from_secs(1),
            game_expiry: Duration::from_secs(2 * 60 * 60),
            rules: GameRules::default(),
        }
    }
}

/// The rules subset a `Game` carries around.
#[derive(Clone, Copy, Debug)]
pub struct GameRules {
    /// Hands larger than this must discard half when a 7 is rolled.
    pub discard_limit: u8,
    /// Build points needed to win.
    pub win_points: u8,
    /// Six-player-variant special building phase between turns.
    pub special_build: bool,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            discard_limit: 7,
            win_points: 10,
            special_build: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takeover_windows_are_monotone() {
        // Better evidence must never mean a longer wait.
        let cfg = ServerConfig::default();
        assert!(cfg.takeover_with_password <= cfg.takeover_same_origin);
        assert!(cfg.takeover_same_origin <= cfg.takeover_unrelated);
    }

    #[test]
    fn offer_window_exceeds_base() {
        let cfg = ServerConfig::default();
        assert!(cfg.robot_inactivity < cfg.robot_inactivity_with_offer);
        assert!(cfg.robot_inactivity < cfg.robot_inactivity_with_discard);
    }
}
