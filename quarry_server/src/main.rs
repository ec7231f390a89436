// CLI entry point for the Quarry session server.
//
// Starts a standalone server with the default (permissive, non-persistent)
// collaborators and optionally a few in-process robot players so games can
// start without external robot processes.
//
// Usage:
//   quarryd [OPTIONS]
//     --port <PORT>        Listen port (default: 8880)
//     --name <NAME>        Reserved server name (default: Server)
//     --robots <N>         In-process robots to spawn (default: 4)
//     --win-points <N>     Points needed to win (default: 10)
//     --seed <N>           PRNG seed (default: from the clock)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use quarry_server::robot::{Robot, RobotPolicy};
use quarry_server::{Collaborators, ServerConfig, start_server};

fn main() {
    env_logger::init();
    let (config, robots) = parse_args();

    let (handle, addr) = match start_server(config, Collaborators::default()) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("Session server listening on {addr}");

    for i in 0..robots {
        let _ = Robot::spawn(
            addr.to_string(),
            format!("robot-{i}"),
            RobotPolicy::RejectAll,
        );
    }
    if robots > 0 {
        println!("Spawned {robots} robot players.");
    }
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT/SIGTERM by default, which is fine for a
    // standalone server; embedders use `ServerHandle::stop` instead.
    let running = Arc::new(AtomicBool::new(true));
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    handle.stop();
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching —
/// no clap dependency.
fn parse_args() -> (ServerConfig, usize) {
    let mut config = ServerConfig::default();
    let mut robots = 4usize;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--name" => {
                i += 1;
                config.server_name = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--name requires a value");
                    std::process::exit(1);
                });
            }
            "--robots" => {
                i += 1;
                robots = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--robots requires a valid count");
                    std::process::exit(1);
                });
            }
            "--win-points" => {
                i += 1;
                config.rules.win_points =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--win-points requires a valid number");
                        std::process::exit(1);
                    });
            }
            "--seed" => {
                i += 1;
                config.rng_seed = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(
                    || {
                        eprintln!("--seed requires a valid number");
                        std::process::exit(1);
                    },
                ));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    (config, robots)
}

fn print_usage() {
    println!("Usage: quarryd [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>        Listen port (default: 8880)");
    println!("  --name <NAME>        Reserved server name (default: Server)");
    println!("  --robots <N>         In-process robots to spawn (default: 4)");
    println!("  --win-points <N>     Points needed to win (default: 10)");
    println!("  --seed <N>           PRNG seed (default: from the clock)");
    println!("  --help, -h           Show this help");
}
