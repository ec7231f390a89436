// Connection registry.
//
// Tracks every live connection and maps each chosen display name to exactly
// one of them. The registry owns the name table's mutex; per-connection
// mutable state (membership list, liveness timestamps, counters) lives
// behind each `Conn`'s own lock, so sending to one connection never blocks
// the table.
//
// Name takeover: a nickname held by a connection that has stopped answering
// pings may be claimed by a new connection after a waiting period. The wait
// depends on the claimant's evidence of legitimacy — a matching password
// earns the short window, a matching origin address the medium one, and
// anything else the long one. Takeover transplants the old connection's
// game memberships (games key members by name, so the name's memberships
// follow the name) and invalidates the old connection. This stops a stale
// network association from squatting on a name without making impersonation
// trivial.

use std::io::{self, BufWriter};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use quarry_protocol::framing::write_message;
use quarry_protocol::message::ServerMessage;
use rustc_hash::FxHashMap;

use crate::config::ServerConfig;

/// Longest accepted display name.
const MAX_NAME_LEN: usize = 30;

/// Lock helper: a poisoned mutex only means another thread panicked while
/// holding it; the protected data is still structurally sound, so recover.
fn relock<'a, T>(
    r: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    r.unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a successful naming.
#[derive(Debug, PartialEq, Eq)]
pub enum NameOutcome {
    /// The name was free.
    Fresh,
    /// An unresponsive holder was displaced; the claimant inherits the
    /// name's game memberships.
    Takeover { inherited_games: Vec<String> },
}

/// Why a naming attempt failed.
#[derive(Debug, PartialEq, Eq)]
pub enum NameError {
    Reserved,
    Malformed,
    /// Held by a live connection; retry after the remaining wait (zero if
    /// the holder has simply never been pinged into silence yet).
    InUse { retry_after: Duration },
}

impl NameError {
    /// Denial text sent in the handshake rejection.
    pub fn reason(&self) -> String {
        match self {
            NameError::Reserved => "that name is reserved".into(),
            NameError::Malformed => "name must be a single printable line".into(),
            NameError::InUse { retry_after } => {
                format!("name in use (retry in {}s)", retry_after.as_secs())
            }
        }
    }
}

/// Per-connection mutable state.
struct ConnState {
    name: Option<String>,
    protocol_version: u32,
    is_robot: bool,
    wins: u32,
    losses: u32,
    /// Names of games this connection is a member of.
    games: Vec<String>,
    last_pong: Instant,
    /// Set when a liveness ping goes out; cleared by the pong.
    last_ping: Option<Instant>,
}

/// One live client connection: the write half plus registry-owned metadata.
/// The read half stays with the connection's reader thread in `server.rs`.
pub struct Conn {
    pub id: u64,
    origin: IpAddr,
    /// Kept unbuffered for `Shutdown` on takeover/invalidation.
    stream: TcpStream,
    writer: Mutex<BufWriter<TcpStream>>,
    state: Mutex<ConnState>,
    alive: AtomicBool,
}

impl Conn {
    /// Serialize and send one message. Write errors are returned, not
    /// logged — the caller decides (broadcast paths log and continue; the
    /// reader thread will notice the broken pipe independently).
    pub fn send(&self, msg: &ServerMessage) -> io::Result<()> {
        let json = serde_json::to_vec(msg).map_err(io::Error::other)?;
        let mut writer = relock(self.writer.lock());
        write_message(&mut *writer, &json)
    }

    pub fn name(&self) -> Option<String> {
        relock(self.state.lock()).name.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_robot(&self) -> bool {
        relock(self.state.lock()).is_robot
    }

    pub fn protocol_version(&self) -> u32 {
        relock(self.state.lock()).protocol_version
    }

    /// Mark dead and tear down the socket so the old reader unblocks.
    pub fn invalidate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub fn record_pong(&self, now: Instant) {
        let mut st = relock(self.state.lock());
        st.last_pong = now;
        st.last_ping = None;
    }

    pub fn mark_pinged(&self, now: Instant) {
        relock(self.state.lock()).last_ping = Some(now);
    }

    pub fn games(&self) -> Vec<String> {
        relock(self.state.lock()).games.clone()
    }

    pub fn add_game(&self, game: &str) {
        let mut st = relock(self.state.lock());
        if !st.games.iter().any(|g| g == game) {
            st.games.push(game.to_string());
        }
    }

    pub fn remove_game(&self, game: &str) {
        relock(self.state.lock()).games.retain(|g| g != game);
    }

    pub fn wins_losses(&self) -> (u32, u32) {
        let st = relock(self.state.lock());
        (st.wins, st.losses)
    }
}

/// The name→connection table.
pub struct ConnRegistry {
    by_name: Mutex<FxHashMap<String, Arc<Conn>>>,
    next_id: AtomicU64,
    server_name: String,
    takeover_with_password: Duration,
    takeover_same_origin: Duration,
    takeover_unrelated: Duration,
}

impl ConnRegistry {
    pub fn new(cfg: &ServerConfig) -> Self {
        Self {
            by_name: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
            server_name: cfg.server_name.clone(),
            takeover_with_password: cfg.takeover_with_password,
            takeover_same_origin: cfg.takeover_same_origin,
            takeover_unrelated: cfg.takeover_unrelated,
        }
    }

    /// Wrap an accepted stream. The connection is anonymous until
    /// `set_name` succeeds; only named connections enter the table.
    pub fn accept(&self, stream: TcpStream, now: Instant) -> io::Result<Arc<Conn>> {
        let origin = stream.peer_addr()?.ip();
        let writer = BufWriter::new(stream.try_clone()?);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Conn {
            id,
            origin,
            stream,
            writer: Mutex::new(writer),
            state: Mutex::new(ConnState {
                name: None,
                protocol_version: 0,
                is_robot: false,
                wins: 0,
                losses: 0,
                games: Vec::new(),
                last_pong: now,
                last_ping: None,
            }),
            alive: AtomicBool::new(true),
        }))
    }

    /// Claim `wanted` for `conn`. Enforces the reserved name, the
    /// printable-single-line check, and the takeover discipline.
    pub fn set_name(
        &self,
        conn: &Arc<Conn>,
        wanted: &str,
        password_ok: bool,
        protocol_version: u32,
        is_robot: bool,
        now: Instant,
    ) -> Result<NameOutcome, NameError> {
        if wanted.eq_ignore_ascii_case(&self.server_name) {
            return Err(NameError::Reserved);
        }
        if !valid_name(wanted) {
            return Err(NameError::Malformed);
        }

        let mut table = relock(self.by_name.lock());
        let outcome = match table.get(wanted) {
            None => NameOutcome::Fresh,
            Some(old) if !old.is_alive() => {
                // Holder already torn down; inherit whatever memberships
                // it still lists.
                let inherited = old.games();
                debug!("name {wanted:?} reclaimed from dead connection {}", old.id);
                NameOutcome::Takeover {
                    inherited_games: inherited,
                }
            }
            Some(old) => {
                let window = if password_ok {
                    self.takeover_with_password
                } else if old.origin == conn.origin {
                    self.takeover_same_origin
                } else {
                    self.takeover_unrelated
                };
                // Takeover only counts silence after an unanswered ping;
                // `record_pong` clears `last_ping`, so any outstanding ping
                // is by definition unanswered.
                let silent_since = relock(old.state.lock()).last_ping;
                match silent_since {
                    Some(pinged) if now.duration_since(pinged) >= window => {
                        let inherited = old.games();
                        info!(
                            "takeover of {wanted:?}: connection {} displaces {}",
                            conn.id, old.id
                        );
                        old.invalidate();
                        NameOutcome::Takeover {
                            inherited_games: inherited,
                        }
                    }
                    Some(pinged) => {
                        return Err(NameError::InUse {
                            retry_after: window - now.duration_since(pinged),
                        });
                    }
                    None => {
                        return Err(NameError::InUse {
                            retry_after: window,
                        });
                    }
                }
            }
        };

        {
            let mut st = relock(conn.state.lock());
            st.name = Some(wanted.to_string());
            st.protocol_version = protocol_version;
            st.is_robot = is_robot;
            if let NameOutcome::Takeover { inherited_games } = &outcome {
                st.games = inherited_games.clone();
            }
        }
        table.insert(wanted.to_string(), conn.clone());
        Ok(outcome)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Conn>> {
        relock(self.by_name.lock()).get(name).cloned()
    }

    /// Drop `conn`'s name mapping, unless the name has already been taken
    /// over by a newer connection.
    pub fn remove(&self, conn: &Conn) {
        let Some(name) = conn.name() else { return };
        let mut table = relock(self.by_name.lock());
        if table.get(&name).is_some_and(|held| held.id == conn.id) {
            table.remove(&name);
        }
    }

    /// Connections idle past `idle_for` that have no ping outstanding.
    pub fn idle_connections(&self, idle_for: Duration, now: Instant) -> Vec<Arc<Conn>> {
        let table = relock(self.by_name.lock());
        table
            .values()
            .filter(|c| {
                let st = relock(c.state.lock());
                st.last_ping.is_none() && now.duration_since(st.last_pong) >= idle_for
            })
            .cloned()
            .collect()
    }

    /// Record a finished game on the participants' win/loss counters.
    pub fn record_result(&self, winner: Option<&str>, participants: &[String]) {
        let table = relock(self.by_name.lock());
        for name in participants {
            let Some(conn) = table.get(name) else {
                warn!("result for unknown connection {name:?}");
                continue;
            };
            let mut st = relock(conn.state.lock());
            if Some(name.as_str()) == winner {
                st.wins += 1;
            } else {
                st.losses += 1;
            }
        }
    }
}

/// Names must be one trimmed, printable line of reasonable length.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.trim() == name
        && !name.chars().any(|c| c.is_control())
}
