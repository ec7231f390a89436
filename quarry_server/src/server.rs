// TCP server: listener, per-connection reader threads, and dispatch.
//
// Architecture: thread-per-connection. The listener thread accepts sockets
// and spawns one reader thread each; every reader performs the handshake,
// then loops on `framing::read_message()` and dispatches typed messages
// directly into the shared components. Handlers for different games run
// fully concurrently; handlers for the same game serialize on that game's
// lock (see `directory.rs` for the lock discipline). A separate sweeper
// thread (`sweeper.rs`) supervises stalls, liveness pings, and expiry.
//
// Every handler follows the same shape: resolve the sender's identity from
// the connection (never from the payload), take the game lock, apply the
// operation, snapshot the member list, release, and only then write to
// sockets. Write halves live behind each `Conn`'s own mutex, so a slow
// client blocks nothing but itself.
//
// Shutdown: `ServerHandle::stop()` flips `keep_running`; the listener and
// sweeper threads notice and exit. Reader threads end when their sockets
// close.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use quarry_protocol::framing::read_message;
use quarry_protocol::message::{ClientMessage, ServerMessage};
use quarry_protocol::types::{MAX_SEATS, Phase, SeatIndex};

use crate::collab::Collaborators;
use crate::config::{MIN_PROTOCOL_VERSION, ServerConfig, VOTE_MIN_VERSION};
use crate::directory::{GameDirectory, GameHandle};
use crate::error::Deny;
use crate::game::{Game, Outbound, Outbox};
use crate::registry::{Conn, ConnRegistry, NameOutcome};
use crate::rng::Rng;
use crate::seatfill::{RobotPool, fill_seats};
use crate::sweeper;

/// Everything the handler and sweeper threads share.
pub struct Shared {
    pub config: ServerConfig,
    pub registry: ConnRegistry,
    pub directory: GameDirectory,
    pub pool: RobotPool,
    pub collab: Collaborators,
    pub rng: Mutex<Rng>,
}

impl Shared {
    pub(crate) fn rng(&self) -> MutexGuard<'_, Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    listener: Option<thread::JoinHandle<()>>,
    sweeper: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for its threads to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener {
            let _ = handle.join();
        }
        if let Some(handle) = self.sweeper {
            let _ = handle.join();
        }
    }
}

/// Start the server on a background thread. Returns a handle for stopping
/// it and the actual bound address (port 0 lets the OS pick one).
pub fn start_server(
    config: ServerConfig,
    collab: Collaborators,
) -> std::io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))?;
    let addr = listener.local_addr()?;
    let rng = match config.rng_seed {
        Some(seed) => Rng::new(seed),
        None => Rng::from_time(),
    };
    let shared = Arc::new(Shared {
        registry: ConnRegistry::new(&config),
        directory: GameDirectory::default(),
        pool: RobotPool::default(),
        collab,
        rng: Mutex::new(rng),
        config,
    });
    let keep_running = Arc::new(AtomicBool::new(true));

    // Listener checks keep_running between (non-blocking) accepts.
    listener.set_nonblocking(true)?;
    let listener_thread = {
        let shared = shared.clone();
        let keep_running = keep_running.clone();
        thread::spawn(move || {
            accept_loop(listener, shared, keep_running);
        })
    };
    let sweeper_thread = {
        let shared = shared.clone();
        let keep_running = keep_running.clone();
        thread::spawn(move || {
            sweeper::run(&shared, &keep_running);
        })
    };
    info!("server listening on {addr}");
    Ok((
        ServerHandle {
            keep_running,
            listener: Some(listener_thread),
            sweeper: Some(sweeper_thread),
        },
        addr,
    ))
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, keep_running: Arc<AtomicBool>) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                let shared = shared.clone();
                thread::spawn(move || {
                    connection_thread(&shared, stream);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}

/// One connection's whole life: handshake, reader loop, cleanup.
fn connection_thread(shared: &Arc<Shared>, stream: TcpStream) {
    // Bounded handshake so a silent socket can't hold the thread.
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
    let Ok(reader_stream) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(reader_stream);

    let Some(conn) = handshake(shared, &stream, &mut reader) else {
        return;
    };
    stream.set_read_timeout(None).ok();

    while conn.is_alive() {
        let Ok(bytes) = read_message(&mut reader) else {
            break; // read error or EOF
        };
        match serde_json::from_slice::<ClientMessage>(&bytes) {
            Ok(ClientMessage::Goodbye) => break,
            Ok(msg) => dispatch(shared, &conn, msg),
            Err(e) => {
                debug!("connection {}: malformed message: {e}", conn.id);
                break;
            }
        }
    }
    disconnect(shared, &conn);
}

/// Read and answer the `Hello`. Returns the registered connection, or
/// `None` after sending `Rejected` (or on a dead socket).
fn handshake(
    shared: &Arc<Shared>,
    stream: &TcpStream,
    reader: &mut BufReader<TcpStream>,
) -> Option<Arc<Conn>> {
    let bytes = read_message(reader).ok()?;
    let hello: ClientMessage = serde_json::from_slice(&bytes).ok()?;
    let ClientMessage::Hello {
        protocol_version,
        name,
        password,
        is_robot,
    } = hello
    else {
        debug!("first message was not Hello, dropping connection");
        return None;
    };

    let now = Instant::now();
    let conn = shared.registry.accept(stream.try_clone().ok()?, now).ok()?;

    if protocol_version < MIN_PROTOCOL_VERSION {
        let _ = conn.send(&ServerMessage::Rejected {
            reason: format!("protocol version {protocol_version} too old"),
        });
        return None;
    }

    // Authentication failure is the one collaborator error that blocks
    // progress.
    let pw = password.as_deref().unwrap_or("");
    match shared.collab.auth.authenticate(&name, pw) {
        Ok(true) => {}
        Ok(false) => {
            let _ = conn.send(&ServerMessage::Rejected {
                reason: "authentication failed".into(),
            });
            return None;
        }
        Err(e) => {
            warn!("authenticator failure for {name:?}: {e}");
            let _ = conn.send(&ServerMessage::Rejected {
                reason: "authentication unavailable".into(),
            });
            return None;
        }
    }

    let password_ok = password.is_some();
    match shared
        .registry
        .set_name(&conn, &name, password_ok, protocol_version, is_robot, now)
    {
        Ok(outcome) => {
            let _ = conn.send(&ServerMessage::Welcome { name: name.clone() });
            if is_robot {
                shared.pool.register(&name);
            }
            if let NameOutcome::Takeover { inherited_games } = outcome {
                // The new connection resumes where the old one stood: it
                // gets a fresh snapshot of every inherited game.
                for game_name in inherited_games {
                    if let Some(handle) = shared.directory.get(&game_name) {
                        let snapshot = handle.lock().snapshot();
                        let _ = conn.send(&snapshot);
                    }
                }
            }
            info!("connection {} is {name:?} (robot: {is_robot})", conn.id);
            Some(conn)
        }
        Err(e) => {
            let _ = conn.send(&ServerMessage::Rejected { reason: e.reason() });
            None
        }
    }
}

/// Route one typed message into the right component.
fn dispatch(shared: &Arc<Shared>, conn: &Arc<Conn>, msg: ClientMessage) {
    match msg {
        ClientMessage::ListGames => {
            let _ = conn.send(&ServerMessage::GameList {
                games: shared.directory.list(),
            });
        }
        ClientMessage::JoinGame { game } => join_game(shared, conn, &game),
        ClientMessage::LeaveGame { game } => {
            if conn.is_robot()
                && let Some(name) = conn.name()
            {
                shared.pool.release(&name);
            }
            leave_game(shared, conn, &game);
        }
        ClientMessage::SitDown { game, seat } => {
            let robot = conn.is_robot();
            run_game_op(shared, conn, &game, |g, sender| g.sit_down(sender, seat, robot));
        }
        ClientMessage::SetSeatLock { game, seat, locked } => {
            run_game_op(shared, conn, &game, |g, sender| {
                g.set_seat_lock(sender, seat, locked)
            });
        }
        ClientMessage::StartGame { game } => {
            run_game_op(shared, conn, &game, |g, sender| {
                let by = SeatIndex(g.acting_seat(sender)? as u8);
                let vacancies = g.request_start(sender)?;
                // An undersized pool refuses the start at once. The
                // wait-and-retry grace in seat-fill is for reset
                // reconstruction, whose robots re-pool a beat later.
                if vacancies.len() > shared.pool.idle_count() {
                    return Ok(g.abort_start(
                        "not enough robot players available".to_string(),
                    ));
                }
                Ok(vec![Outbound::All(ServerMessage::StartRequested {
                    game: g.name.clone(),
                    by,
                })])
            });
        }
        ClientMessage::Roll { game } => {
            run_game_op(shared, conn, &game, |g, sender| {
                let total = shared.rng().roll_dice();
                g.roll(sender, total)
            });
        }
        ClientMessage::Discard { game, resources } => {
            run_game_op(shared, conn, &game, |g, sender| g.discard(sender, resources));
        }
        ClientMessage::MoveRobber { game, hex } => {
            run_game_op(shared, conn, &game, |g, sender| g.move_robber(sender, hex));
        }
        ClientMessage::Build { game, piece } => {
            run_game_op(shared, conn, &game, |g, sender| g.build(sender, piece));
        }
        ClientMessage::CancelBuild { game, piece } => {
            run_game_op(shared, conn, &game, |g, sender| g.cancel_build(sender, piece));
        }
        ClientMessage::PlayDevCard { game } => {
            run_game_op(shared, conn, &game, |g, sender| g.play_dev_card(sender));
        }
        ClientMessage::EndTurn { game } => {
            run_game_op(shared, conn, &game, |g, sender| g.end_turn(sender));
        }
        ClientMessage::MakeOffer { game, offer } => {
            run_game_op(shared, conn, &game, |g, sender| g.make_offer(sender, offer));
        }
        ClientMessage::ClearOffer { game } => {
            run_game_op(shared, conn, &game, |g, sender| g.clear_offer(sender));
        }
        ClientMessage::AcceptOffer {
            game,
            offering_seat,
        } => {
            run_game_op(shared, conn, &game, |g, sender| {
                g.accept_offer(sender, offering_seat)
            });
        }
        ClientMessage::RejectOffer { game } => {
            run_game_op(shared, conn, &game, |g, sender| g.reject_offer(sender));
        }
        ClientMessage::NoResponse { game } => {
            run_game_op(shared, conn, &game, |g, sender| g.no_response(sender));
        }
        ClientMessage::ConfirmTrade { game, accept } => {
            run_game_op(shared, conn, &game, |g, sender| {
                g.confirm_trade(sender, accept)
            });
        }
        ClientMessage::ResetRequest { game } => {
            run_game_op(shared, conn, &game, |g, sender| {
                let can_vote = vote_capabilities(shared, g);
                g.reset_request(sender, can_vote)
            });
        }
        ClientMessage::ResetVote { game, yes } => {
            run_game_op(shared, conn, &game, |g, sender| {
                g.record_reset_vote(sender, yes)
            });
        }
        ClientMessage::Chat { game, text } => {
            run_game_op(shared, conn, &game, |g, sender| g.chat(sender, text));
        }
        ClientMessage::Pong => conn.record_pong(Instant::now()),
        ClientMessage::Hello { .. } => {
            let _ = conn.send(&ServerMessage::Deny {
                game: None,
                reason: "already connected".into(),
            });
        }
        ClientMessage::Goodbye => {} // handled in the reader loop
    }
}

/// Which seats hold a client able to answer reset votes.
fn vote_capabilities(shared: &Shared, game: &Game) -> [bool; MAX_SEATS] {
    std::array::from_fn(|i| {
        game.seats[i]
            .occupant
            .name()
            .and_then(|name| shared.registry.lookup(name))
            .is_some_and(|c| c.protocol_version() >= VOTE_MIN_VERSION)
    })
}

/// The common handler shape: lock, apply, snapshot members, release,
/// deliver. Denials go back to the sender only.
fn run_game_op(
    shared: &Arc<Shared>,
    conn: &Arc<Conn>,
    game_name: &str,
    op: impl FnOnce(&mut Game, &str) -> Result<Outbox, Deny>,
) {
    let Some(sender) = conn.name() else {
        return;
    };
    let Some(handle) = shared.directory.get(game_name) else {
        send_deny(conn, game_name, &Deny::NoSuchGame(game_name.to_string()));
        return;
    };
    let (result, members) = {
        let mut game = handle.lock();
        let result = op(&mut game, &sender);
        (result, game.member_names())
    };
    match result {
        Ok(out) => {
            after_effects(shared, &handle, &out);
            deliver(&shared.registry, &members, out);
            drive_ready(shared, &handle);
        }
        Err(deny) => send_deny(conn, game_name, &deny),
    }
}

fn send_deny(conn: &Conn, game: &str, deny: &Deny) {
    debug!("connection {} denied in {game:?}: {deny}", conn.id);
    let _ = conn.send(&ServerMessage::Deny {
        game: Some(game.to_string()),
        reason: deny.to_string(),
    });
}

fn join_game(shared: &Arc<Shared>, conn: &Arc<Conn>, game_name: &str) {
    let Some(sender) = conn.name() else {
        return;
    };
    let (handle, _created) = shared.directory.get_or_create(game_name, || {
        Game::new(
            game_name.to_string(),
            shared.config.rules,
            Instant::now(),
            shared.config.game_expiry,
        )
    });
    conn.add_game(game_name);
    let (out, members) = {
        let mut game = handle.lock();
        let out = game.join(&sender, conn.is_robot());
        (out, game.member_names())
    };
    deliver(&shared.registry, &members, out);
}

/// Explicit leave, `Goodbye`, and disconnect all converge here.
fn leave_game(shared: &Arc<Shared>, conn: &Arc<Conn>, game_name: &str) {
    let Some(sender) = conn.name() else {
        return;
    };
    conn.remove_game(game_name);
    let Some(handle) = shared.directory.get(game_name) else {
        return;
    };
    let (out, members) = {
        let mut game = handle.lock();
        let out = game.leave(&sender);
        (out, game.member_names())
    };
    after_effects(shared, &handle, &out);
    deliver(&shared.registry, &members, out);

    if shared.directory.remove_if_dead(game_name) {
        // Tell whoever is left (robots, typically) so they move on.
        let members = handle.lock().member_names();
        deliver(
            &shared.registry,
            &members,
            vec![Outbound::All(ServerMessage::GameDeleted {
                game: game_name.to_string(),
            })],
        );
    }
}

/// Reader-loop exit: implicit leave from every game, then registry cleanup.
/// After a takeover the name belongs to a newer connection and the games
/// must be left alone — memberships key on the name, not the socket.
fn disconnect(shared: &Arc<Shared>, conn: &Arc<Conn>) {
    let still_owner = conn.name().is_some_and(|name| {
        shared
            .registry
            .lookup(&name)
            .is_some_and(|held| held.id == conn.id)
    });
    if still_owner {
        if let Some(name) = conn.name() {
            shared.pool.unregister(&name);
        }
        for game in conn.games() {
            leave_game(shared, conn, &game);
        }
    }
    shared.registry.remove(conn);
    conn.invalidate();
    debug!("connection {} gone", conn.id);
}

/// Write an outbox to the wire. Called with no locks held; a failed send
/// is the reader thread's problem to notice.
pub(crate) fn deliver(registry: &ConnRegistry, members: &[String], out: Outbox) {
    for item in out {
        match item {
            Outbound::All(msg) => {
                for member in members {
                    if let Some(conn) = registry.lookup(member)
                        && let Err(e) = conn.send(&msg)
                    {
                        debug!("send to {member:?} failed: {e}");
                    }
                }
            }
            Outbound::To(name, msg) => {
                if let Some(conn) = registry.lookup(&name)
                    && let Err(e) = conn.send(&msg)
                {
                    debug!("send to {name:?} failed: {e}");
                }
            }
        }
    }
}

/// Post-lock side effects derived from an outbox: persistence events and
/// win/loss accounting. Collaborator failures are logged and swallowed.
pub(crate) fn after_effects(shared: &Shared, handle: &Arc<GameHandle>, out: &Outbox) {
    for item in out {
        let Outbound::All(msg) = item else { continue };
        match msg {
            ServerMessage::Built { seat, piece, .. } => {
                if let Err(e) = shared.collab.events.build_event(handle.name(), *seat, *piece) {
                    warn!("build persistence failed: {e}");
                }
            }
            ServerMessage::TradeExecuted {
                offering,
                accepting,
                give,
                get,
                ..
            } => {
                if let Err(e) =
                    shared
                        .collab
                        .events
                        .trade_event(handle.name(), *offering, *accepting, give, get)
                {
                    warn!("trade persistence failed: {e}");
                }
            }
            ServerMessage::GameOver {
                winner: Some(winner),
                ..
            } => {
                let (won, mut participants) = {
                    let game = handle.lock();
                    let (won, lost) = game.result_names(*winner);
                    (won, lost)
                };
                if let Some(w) = &won {
                    participants.push(w.clone());
                }
                shared
                    .registry
                    .record_result(won.as_deref(), &participants);
            }
            _ => {}
        }
    }
}

/// Push a `Ready` game forward: recruit robots for unrequested vacancies,
/// and begin once every request has been answered. The board layout is
/// fetched with no lock held; readiness is re-checked before beginning.
pub(crate) fn drive_ready(shared: &Shared, handle: &Arc<GameHandle>) {
    {
        let mut game = handle.lock();
        if game.phase != Phase::Ready {
            return;
        }
        let vacancies: Vec<SeatIndex> = game.unrequested_vacancies();
        if !vacancies.is_empty() {
            let out = {
                let mut rng = shared.rng();
                fill_seats(
                    &mut game,
                    &vacancies,
                    &shared.pool,
                    &mut rng,
                    shared.config.shuffle_robots,
                    Instant::now(),
                )
            };
            let members = game.member_names();
            drop(game);
            deliver(&shared.registry, &members, out);
            return;
        }
        if !game.ready_to_begin() {
            return;
        }
    }

    let layout = shared
        .collab
        .board
        .load_layout(handle.name())
        .unwrap_or_else(|e| {
            warn!("board layout for {:?} unavailable: {e}", handle.name());
            "{}".into()
        });

    let (out, members) = {
        let mut game = handle.lock();
        if !game.ready_to_begin() {
            return; // someone got there first
        }
        let out = game.begin(layout);
        (out, game.member_names())
    };
    deliver(&shared.registry, &members, out);
}
