use std::io::IsTerminal;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::STATUS_ROUTE;
use crate::supervisor::bus::BusHandle;

pub fn start(bus: BusHandle, shutdown: CancellationToken, interactive_enabled: bool) {
    let interactive_tty = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();

    if interactive_tty && !interactive_enabled {
        info!("stdio adapter: interactive tty detected; adapter disabled (use -i to enable)");
        return;
    }
    info!(interactive = interactive_tty, "stdio adapter connected");

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            if interactive_tty {
                print!("# ");
                use std::io::Write as _;
                let _ = std::io::stdout().flush();
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("stdio adapter shutting down");
                    break;
                }

                line = lines.next_line() => {
                    let input = match line {
                        Ok(Some(l)) => l,
                        Ok(None) => {
                            info!("stdio adapter: stdin closed");
                            break;
                        }
                        Err(e) => {
                            warn!("stdio adapter read error: {e}");
                            break;
                        }
                    };

                    match parse_line(&input) {
                        Ok(None) => {}
                        Ok(Some(StdioFrame::Help)) => print_usage(),
                        Ok(Some(StdioFrame::Exit)) => {
                            info!("stdio adapter: exit requested");
                            shutdown.cancel();
                            break;
                        }
                        Ok(Some(StdioFrame::Emit { event, payload })) => {
                            match bus.notify(event.as_str(), payload) {
                                Ok(()) => println!("ok: {event} queued"),
                                Err(err) => eprintln!("emit error: {err}"),
                            }
                        }
                        Ok(Some(StdioFrame::Request { path, body })) => {
                            match bus.request(path.as_str(), body).await {
                                Ok(Ok(reply)) => print_json(&reply),
                                Ok(Err(err)) => eprintln!("{path} error: {} ({})", err.message, err.code),
                                Err(err) => eprintln!("{path} transport error: {err}"),
                            }
                        }
                        Err(e) => {
                            eprintln!("{e}");
                            print_usage();
                        }
                    }
                }
            }
        }
    });
}

#[derive(Debug, PartialEq)]
enum StdioFrame {
    Request { path: String, body: Value },
    Emit { event: String, payload: Value },
    Help,
    Exit,
}

/// `<path> [json]`, or a slash command.
fn parse_line(line: &str) -> Result<Option<StdioFrame>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Some(cmdline) = trimmed.strip_prefix('/') {
        let (command, rest) = split_head(cmdline);
        return match command {
            "help" => ensure_no_args(rest, StdioFrame::Help),
            "exit" => ensure_no_args(rest, StdioFrame::Exit),
            "status" => ensure_no_args(
                rest,
                StdioFrame::Request {
                    path: STATUS_ROUTE.to_string(),
                    body: json!({}),
                },
            ),
            "emit" => {
                let (event, raw) = split_head(rest);
                if event.is_empty() {
                    return Err("usage: /emit <event> [json]".to_string());
                }
                Ok(Some(StdioFrame::Emit {
                    event: event.to_string(),
                    payload: parse_json(raw)?,
                }))
            }
            "" => Err("usage: /<command> [args]".to_string()),
            other => Err(format!("unknown command: /{other}")),
        };
    }

    let (path, raw) = split_head(trimmed);
    Ok(Some(StdioFrame::Request {
        path: path.to_string(),
        body: parse_json(raw)?,
    }))
}

fn split_head(s: &str) -> (&str, &str) {
    let mut parts = s.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default().trim();
    let rest = parts.next().unwrap_or_default().trim();
    (head, rest)
}

fn parse_json(raw: &str) -> Result<Value, String> {
    if raw.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| format!("invalid json body: {e}"))
}

fn ensure_no_args(rest: &str, frame: StdioFrame) -> Result<Option<StdioFrame>, String> {
    if rest.is_empty() {
        Ok(Some(frame))
    } else {
        Err("unexpected arguments".to_string())
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  <path> [json]          e.g. tasks/add {{\"title\":\"Pay rent\",\"importance\":9}}");
    eprintln!("  /emit <event> [json]   e.g. /emit morning-checkin");
    eprintln!("  /status");
    eprintln!("  /exit");
    eprintln!("  /help");
}
