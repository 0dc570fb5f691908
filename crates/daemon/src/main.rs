/// hiddendrop - anonymous file-drop relay
///
/// This daemon:
/// - Provisions a Tor hidden service pointing at the relay port
/// - Accepts WebSocket clients and relays signaling and encrypted chunks
/// - Exposes a loopback API for status and relay-initiated sends

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn, Level};

use hiddendrop_common::RelayConfig;
use hiddendrop_core::{HiddenService, HostnameWatcher, RelayDispatcher, RelayEvent};
use hiddendrop_daemon::{ApiServer, RelayServer};

const CONFIG_FILE: &str = "hiddendrop.toml";

/// Time open sockets get to close after Ctrl+C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("help" | "--help" | "-h") => {
            print_help();
            Ok(())
        }
        Some("version" | "--version" | "-v") => {
            println!("hiddendrop v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("serve") | None => run_relay().await,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run with 'help' to see available commands");
            std::process::exit(1);
        }
    }
}

/// Load configuration, or write the defaults for next time
fn load_config(path: &Path) -> Result<(RelayConfig, bool)> {
    if path.exists() {
        let config = RelayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        return Ok((config, true));
    }

    let config = RelayConfig::default();
    if let Err(e) = config.to_file(path) {
        eprintln!("Failed to save default config: {}", e);
    }
    Ok((config, false))
}

async fn run_relay() -> Result<()> {
    let config_path = PathBuf::from(CONFIG_FILE);
    let (config, loaded) = load_config(&config_path)?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Starting hiddendrop v{}", env!("CARGO_PKG_VERSION"));
    if loaded {
        info!("Loaded configuration from {:?}", config_path);
    } else {
        info!("No configuration file found, saved defaults to {:?}", config_path);
    }

    let relay_addr: SocketAddr = config
        .listen_socket()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_socket()))?;
    let api_addr: SocketAddr = config.api_socket().parse()?;

    let service = HiddenService::provision(&config).await?;
    info!("Hidden service directory: {}", service.dir().display());

    let watcher = HostnameWatcher::from_config(&service, &config);
    {
        let watcher = watcher.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.watch().await {
                warn!("Onion address unavailable: {}", e);
            }
        });
    }

    let dispatcher = Arc::new(RelayDispatcher::new(&config));
    tokio::spawn(log_events(dispatcher.clone()));

    let api_server = ApiServer::new(api_addr, dispatcher.clone(), Arc::new(watcher));
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            warn!("API server error: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let relay = RelayServer::new(relay_addr, dispatcher.clone());
    let mut relay_task = tokio::spawn(relay.run(async {
        let _ = shutdown_rx.await;
    }));

    info!("Relay is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = &mut relay_task => {
            return result.context("relay task panicked")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
        }
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, relay_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => error!("Relay task failed: {}", e),
        Err(_) => warn!(
            "Closing with {} sessions still open",
            dispatcher.session_count().await
        ),
    }

    info!("Relay stopped");
    Ok(())
}

/// Log observer events until the dispatcher goes away
async fn log_events(dispatcher: Arc<RelayDispatcher>) {
    let mut events = dispatcher.subscribe();
    drop(dispatcher);

    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(missed)) => warn!("Event log skipped {} events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &RelayEvent) {
    match event {
        RelayEvent::ClientReady(id) => info!("Client ready: {}", id),
        RelayEvent::ClientList(ids) => debug!("Client list sent ({} peers)", ids.len()),
        RelayEvent::TransferRequest {
            from,
            file_name,
            file_size,
        } => info!(
            "{} offers {} ({} bytes) to the relay",
            from, file_name, file_size
        ),
        RelayEvent::TransferAccepted(id) => info!("Transfer accepted by {}", id),
        RelayEvent::TransferRejected(id) => info!("Transfer rejected by {}", id),
        RelayEvent::TransferStatus { target, status } => {
            info!("Transfer to {}: {}", target, status)
        }
        RelayEvent::TransferProgress {
            target,
            bytes_sent,
            total_bytes,
            percent,
        } => debug!(
            "Transfer to {}: {}/{} bytes ({:.1}%)",
            target, bytes_sent, total_bytes, percent
        ),
        RelayEvent::ClientDisconnected(id) => info!("Client disconnected: {}", id),
    }
}

/// Print help message
fn print_help() {
    println!("hiddendrop - anonymous file-drop relay");
    println!();
    println!("USAGE:");
    println!("    hiddendrop [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    serve       Run the relay (default)");
    println!("    help        Show this help message");
    println!("    version     Show version information");
    println!();
    println!("CONFIGURATION:");
    println!("    Read from ./{} (defaults are written there on first run)", CONFIG_FILE);
    println!("    Relay:      127.0.0.1:3000  (forwarded by the hidden service)");
    println!("    API:        127.0.0.1:3001  (local only)");
    println!();
    println!("TOR:");
    println!("    Start tor with -f <data_dir>/torrc; the onion address appears in");
    println!("    <data_dir>/hidden_service/hostname and at GET /api/status.");
}
