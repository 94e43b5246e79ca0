//! tandem: supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the app: memory store, task board, router, modules
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Spawn supervisor loop and scheduler
//!   8. Start the stdio adapter
//!   9. Wait for shutdown, then join services

use tokio_util::sync::CancellationToken;
use tracing::info;

use tandem::app::App;
use tandem::error::AppError;
use tandem::{config, logger, supervisor};

struct CliArgs {
    log_level: Option<&'static str>,
    interactive: bool,
    config_path: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        name = %config.name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    let mut app = App::build(config)?;

    // Shared shutdown token. Ctrl-C cancels it and every task watches it.
    let shutdown = CancellationToken::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let services = app.start(shutdown.clone())?;

    supervisor::adapters::start(app.bus(), shutdown.clone(), args.interactive);

    print_startup_summary(&app, args.interactive);

    shutdown.cancelled().await;
    services.join().await?;

    if args.interactive {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }

    Ok(())
}

fn print_startup_summary(app: &App, interactive: bool) {
    let modules = app.router.modules();
    let module_line = if modules.is_empty() {
        "none".to_string()
    } else {
        modules
            .iter()
            .map(|m| format!("{} ({:?})", m.name, m.state).to_lowercase())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let events: Vec<String> = app
        .config
        .scheduler
        .events
        .iter()
        .map(|e| format!("{} @ {}", e.name, e.trigger))
        .collect();

    eprintln!("┌─ {} ─ pid {}", app.config.name, std::process::id());
    eprintln!("│ mode      : {}", if interactive { "interactive" } else { "daemon" });
    eprintln!("│ work dir  : {}", app.config.work_dir.display());
    eprintln!("│ modules   : {module_line}");
    eprintln!("│ routes    : {}", app.router.route_paths().len());
    eprintln!(
        "│ schedule  : {}",
        if events.is_empty() { "none".to_string() } else { events.join(", ") }
    );
    eprintln!(
        "│ memory    : {:?}, {} dims, persist={}",
        app.config.memory.metric, app.config.memory.dimensions, app.config.memory.persist
    );
    eprintln!("└─");
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: tandem [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -i, --interactive          Enable the stdio console on a terminal");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    CliArgs {
        log_level: logger::verbosity_level(verbosity),
        interactive,
        config_path,
    }
}
