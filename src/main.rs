//! sockctl - interactive WebSocket client.
//!
//! Connects to `<server-url><endpoint>`, prints every dispatched event and
//! sends each stdin line (as JSON when it parses, as text otherwise).

use anyhow::Result;
use clap::Parser;
use socket_manager::{Config, ConnectionManager, ErrorEvent, Outbound};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "sockctl", version, about = "Interactive WebSocket client")]
struct Cli {
    /// Base URL of the server (http, https, ws or wss).
    #[arg(long)]
    server_url: Option<String>,

    /// Endpoint path appended to the socket URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Persist the effective server URL and endpoint to the config file.
    #[arg(long)]
    save: bool,
}

fn outbound_from_line(line: &str) -> Outbound {
    serde_json::from_str::<serde_json::Value>(line)
        .map_or_else(|_| Outbound::Text(line.to_string()), Outbound::Json)
}

fn register_printers(manager: &ConnectionManager) {
    manager.on_open(|open| {
        println!("-- open {}", open.url);
        Ok(())
    });
    manager.on_message(|value| {
        println!("<< {value}");
        Ok(())
    });
    manager.on_error(|error| {
        match error {
            ErrorEvent::Parse(parse) => {
                println!("!! {}", serde_json::to_string(parse)?);
            }
            ErrorEvent::Transport(_) => println!("!! {error}"),
        }
        Ok(())
    });
    manager.on_close(|close| {
        println!("-- close {} {}", close.code, close.reason);
        Ok(())
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(server_url) = cli.server_url {
        config.server_url = server_url;
    }
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if cli.save {
        let path = config.save()?;
        log::info!("Saved config to {}", path.display());
    }

    let mut manager = ConnectionManager::new(config.server_url.clone());
    register_printers(&manager);
    manager.connect(&config.endpoint);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let line = tokio::select! {
            more = manager.process_next() => {
                if !more {
                    break;
                }
                continue;
            }
            line = lines.next_line(), if stdin_open => line?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, closing");
                manager.close();
                continue;
            }
        };

        match line {
            Some(line) if line.trim().is_empty() => {}
            Some(line) => {
                if let Err(e) = manager.send(outbound_from_line(&line)) {
                    log::warn!("{e}");
                }
            }
            None => {
                stdin_open = false;
                manager.close();
            }
        }
    }

    Ok(())
}
