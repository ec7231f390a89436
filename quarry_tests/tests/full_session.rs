// End-to-end integration tests for the session server.
//
// Each test starts a real server on a random port, connects real clients
// (TestPlayer wraps the same NetClient the robots use), and drives whole
// scenarios over TCP: seat-fill with robots, initial placement, turn flow,
// trade negotiation with confirmation, nickname takeover, stall
// supervision, and board-reset voting.
//
// Timing-sensitive tests shrink the relevant windows to a few hundred
// milliseconds; the sweeper runs every 50ms throughout.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use quarry_protocol::message::{ClientMessage, ServerMessage};
use quarry_protocol::types::{Phase, ResourceSet, ResponseKind, SeatIndex, TradeOffer};
use quarry_server::robot::{Robot, RobotPolicy};
use quarry_server::{Collaborators, ServerConfig, ServerHandle, start_server};
use quarry_tests::TestPlayer;

const GAME: &str = "harbor";

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        rng_seed: Some(42),
        shuffle_robots: false,
        sweep_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

/// Start a server and `robots` in-process robot players, waiting for the
/// robots to register with the pool.
fn start(config: ServerConfig, robots: usize, policy: RobotPolicy) -> (ServerHandle, SocketAddr) {
    let (handle, addr) = start_server(config, Collaborators::default()).unwrap();
    for i in 0..robots {
        let _ = Robot::spawn(addr.to_string(), format!("bot-{i}"), policy);
    }
    thread::sleep(Duration::from_millis(100));
    (handle, addr)
}

/// Join, take seat 0, start the game (robots fill the rest), and play
/// through initial placement. Leaves the player in their first Roll phase.
fn start_solo_game(player: &mut TestPlayer) {
    player.join(GAME);
    player.sit(GAME, SeatIndex(0));
    player.send(ClientMessage::StartGame { game: GAME.into() });
    player.wait_for("start notice", |m| {
        matches!(
            m,
            ServerMessage::StartRequested { game, by: SeatIndex(0) } if game == GAME
        )
    });
    player.wait_for("game start", |m| {
        matches!(m, ServerMessage::GameStarted { game, .. } if game == GAME)
    });
    let first = player.autoplace(GAME, SeatIndex(0));
    // Seat 0 placed first, so it also rolls first.
    assert_eq!(first, SeatIndex(0));
}

/// An offer of nothing for nothing: legal (hands trivially cover it) and
/// exactly what empty-handed players can trade.
fn empty_offer(to_seat: usize) -> TradeOffer {
    let mut to = [false; 4];
    to[to_seat] = true;
    TradeOffer {
        from: SeatIndex(0),
        to,
        give: ResourceSet::EMPTY,
        get: ResourceSet::EMPTY,
    }
}

// ---------------------------------------------------------------------------
// Test scenarios
// ---------------------------------------------------------------------------

/// One human and three recruited robots play placement and a full round of
/// turns; the roll comes back around to the human.
#[test]
fn game_lifecycle_with_robots() {
    let (handle, addr) = start(test_config(), 3, RobotPolicy::RejectAll);
    let mut alice = TestPlayer::connect(addr, "Alice");
    start_solo_game(&mut alice);

    alice.roll_to_play(GAME, SeatIndex(0));
    alice.send(ClientMessage::EndTurn { game: GAME.into() });

    // The three robots each take a turn; then it is Alice's roll again.
    alice.wait_for("second own turn", |m| {
        matches!(
            m,
            ServerMessage::TurnStarted { game, seat: SeatIndex(0), phase: Phase::Roll }
                if game == GAME
        )
    });
    handle.stop();
}

/// The lobby lists games with their seat counts and phase.
#[test]
fn lobby_lists_games() {
    let (handle, addr) = start(test_config(), 0, RobotPolicy::Silent);
    let mut alice = TestPlayer::connect(addr, "Alice");
    alice.join(GAME);
    alice.sit(GAME, SeatIndex(2));

    alice.send(ClientMessage::ListGames);
    let msg = alice.wait_for("lobby listing", |m| {
        matches!(m, ServerMessage::GameList { .. })
    });
    let ServerMessage::GameList { games } = msg else {
        unreachable!()
    };
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].name, GAME);
    assert_eq!(games[0].seats_taken, 1);
    assert_eq!(games[0].phase, Phase::New);
    handle.stop();
}

/// A full negotiation: the human offers, an accept-everything robot
/// accepts, the human closes the handshake and confirms, and the trade
/// executes between exactly those two seats.
#[test]
fn trade_closes_with_confirmation() {
    let (handle, addr) = start(test_config(), 3, RobotPolicy::AcceptAll);
    let mut alice = TestPlayer::connect(addr, "Alice");
    start_solo_game(&mut alice);
    alice.roll_to_play(GAME, SeatIndex(0));

    alice.send(ClientMessage::MakeOffer {
        game: GAME.into(),
        offer: empty_offer(1),
    });
    alice.wait_for("robot acceptance", |m| {
        matches!(
            m,
            ServerMessage::ResponseMade {
                game,
                seat: SeatIndex(1),
                response: ResponseKind::Accept,
                ..
            } if game == GAME
        )
    });

    // Closing handshake: the offer's author accepts the acceptance.
    alice.send(ClientMessage::AcceptOffer {
        game: GAME.into(),
        offering_seat: SeatIndex(1),
    });

    // Alice is the only human party, so only she must confirm.
    let msg = alice.wait_for("confirmation request", |m| {
        matches!(m, ServerMessage::ConfirmRequired { game, .. } if game == GAME)
    });
    let ServerMessage::ConfirmRequired {
        offering, accepting, ..
    } = msg
    else {
        unreachable!()
    };
    assert_eq!(offering, SeatIndex(0));
    assert_eq!(accepting, SeatIndex(1));

    alice.send(ClientMessage::ConfirmTrade {
        game: GAME.into(),
        accept: true,
    });
    alice.wait_for("trade execution", |m| {
        matches!(
            m,
            ServerMessage::TradeExecuted {
                game,
                offering: SeatIndex(0),
                accepting: SeatIndex(1),
                ..
            } if game == GAME
        )
    });
    handle.stop();
}

/// A reject-everything robot answers with a rejection, the round resolves,
/// and the human's offer is cleared (reject round with no counters).
#[test]
fn rejected_offer_clears() {
    let (handle, addr) = start(test_config(), 3, RobotPolicy::RejectAll);
    let mut alice = TestPlayer::connect(addr, "Alice");
    start_solo_game(&mut alice);
    alice.roll_to_play(GAME, SeatIndex(0));

    alice.send(ClientMessage::MakeOffer {
        game: GAME.into(),
        offer: empty_offer(1),
    });
    alice.wait_for("robot rejection", |m| {
        matches!(
            m,
            ServerMessage::ResponseMade {
                game,
                seat: SeatIndex(1),
                response: ResponseKind::Reject,
                ..
            } if game == GAME
        )
    });
    alice.wait_for("offer cleared", |m| {
        matches!(
            m,
            ServerMessage::OfferCleared { game, seat: SeatIndex(0) } if game == GAME
        )
    });
    handle.stop();
}

/// A connection that stops answering pings loses its nickname to a new
/// connection presenting the password; game memberships follow the name.
#[test]
fn nickname_takeover_inherits_games() {
    let mut config = test_config();
    config.ping_after = Duration::from_millis(150);
    config.takeover_with_password = Duration::from_millis(300);
    let (handle, addr) = start(config, 0, RobotPolicy::Silent);

    let mut first = TestPlayer::connect(addr, "Alice");
    first.join(GAME);

    // Go silent: receive the liveness ping, never answer it.
    first.wait_for("liveness ping", |m| matches!(m, ServerMessage::Ping));
    thread::sleep(Duration::from_millis(400));

    let mut second = TestPlayer::connect(addr, "Alice");
    // The new connection resumes where the old one stood.
    second.wait_for("inherited game snapshot", |m| {
        matches!(m, ServerMessage::GameJoined { game, .. } if game == GAME)
    });
    first.wait_disconnected();
    handle.stop();
}

/// A silent robot sitting on an offer it never answers gets a response
/// fabricated by the stall supervisor.
#[test]
fn stalled_robot_gets_forced_response() {
    let mut config = test_config();
    config.robot_inactivity = Duration::from_secs(2);
    config.robot_inactivity_with_offer = Duration::from_millis(400);
    let (handle, addr) = start(config, 3, RobotPolicy::Silent);
    let mut alice = TestPlayer::connect(addr, "Alice");
    start_solo_game(&mut alice);
    alice.roll_to_play(GAME, SeatIndex(0));

    alice.send(ClientMessage::MakeOffer {
        game: GAME.into(),
        offer: empty_offer(1),
    });
    alice.wait_for("forced response", |m| {
        matches!(
            m,
            ServerMessage::ResponseMade {
                game,
                seat: SeatIndex(1),
                response: ResponseKind::Forced,
                ..
            } if game == GAME
        )
    });
    handle.stop();
}

/// Two humans vote unanimously to reset; the game is reconstructed with
/// the humans still seated, robots re-recruited, and play restarting from
/// initial placement.
#[test]
fn unanimous_reset_reconstructs() {
    let (handle, addr) = start(test_config(), 2, RobotPolicy::RejectAll);
    let mut alice = TestPlayer::connect(addr, "Alice");
    let mut bob = TestPlayer::connect(addr, "Bob");

    alice.join(GAME);
    alice.sit(GAME, SeatIndex(0));
    bob.join(GAME);
    bob.sit(GAME, SeatIndex(1));
    alice.send(ClientMessage::StartGame { game: GAME.into() });
    alice.wait_for("game start", |m| {
        matches!(m, ServerMessage::GameStarted { game, .. } if game == GAME)
    });
    bob.wait_for("game start", |m| {
        matches!(m, ServerMessage::GameStarted { game, .. } if game == GAME)
    });

    // Both humans must answer their own placement prompts.
    let bob_thread = thread::spawn(move || {
        bob.autoplace(GAME, SeatIndex(1));
        bob
    });
    alice.autoplace(GAME, SeatIndex(0));
    let mut bob = bob_thread.join().unwrap();

    alice.send(ClientMessage::ResetRequest { game: GAME.into() });
    bob.wait_for("reset ballot", |m| {
        matches!(m, ServerMessage::ResetRequested { game, .. } if game == GAME)
    });
    bob.send(ClientMessage::ResetVote {
        game: GAME.into(),
        yes: true,
    });

    alice.wait_for("reset accepted", |m| {
        matches!(
            m,
            ServerMessage::ResetResult { game, accepted: true } if game == GAME
        )
    });

    // Reconstruction: robots re-pool, get re-recruited, and the game
    // starts over from placement.
    alice.wait_for("restart", |m| {
        matches!(m, ServerMessage::GameStarted { game, .. } if game == GAME)
    });
    alice.wait_for("placement restarts", |m| {
        matches!(
            m,
            ServerMessage::TurnStarted { game, phase: Phase::Placement1A, .. } if game == GAME
        )
    });
    handle.stop();
}

/// A start request with no robots registered is refused right away with a
/// diagnostic to the requester, and the game can be started again later.
#[test]
fn start_without_robots_is_refused() {
    let (handle, addr) = start(test_config(), 0, RobotPolicy::Silent);
    let mut alice = TestPlayer::connect(addr, "Alice");
    alice.join(GAME);
    alice.sit(GAME, SeatIndex(0));
    alice.send(ClientMessage::StartGame { game: GAME.into() });

    let msg = alice.wait_for("refusal diagnostic", |m| {
        matches!(m, ServerMessage::Deny { game: Some(g), .. } if g == GAME)
    });
    let ServerMessage::Deny { reason, .. } = msg else {
        unreachable!()
    };
    assert!(reason.contains("robot"), "unexpected reason: {reason}");

    // The refusal rolled the game back; robots arriving later make the
    // same request succeed.
    for i in 0..3 {
        let _ = Robot::spawn(addr.to_string(), format!("late-{i}"), RobotPolicy::RejectAll);
    }
    thread::sleep(Duration::from_millis(100));
    alice.send(ClientMessage::StartGame { game: GAME.into() });
    alice.wait_for("game start", |m| {
        matches!(m, ServerMessage::GameStarted { game, .. } if game == GAME)
    });
    handle.stop();
}

/// The reserved server name cannot be claimed, and a live nickname cannot
/// be taken without ping evidence of silence.
#[test]
fn name_rules_enforced() {
    let (handle, addr) = start(test_config(), 0, RobotPolicy::Silent);

    let err = TestPlayer::connect_with(addr, "Server", Some("pw".into()), 2).unwrap_err();
    assert!(err.contains("reserved"), "unexpected error: {err}");

    let _alice = TestPlayer::connect(addr, "Alice");
    let err = TestPlayer::connect_with(addr, "Alice", Some("pw".into()), 2).unwrap_err();
    assert!(err.contains("in use"), "unexpected error: {err}");
    handle.stop();
}
