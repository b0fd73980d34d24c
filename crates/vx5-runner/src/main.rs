//! # vx5-runner
//!
//! Main entry point for the vx5 streaming client.
//!
//! Loads a JSON configuration file, connects to the configured WebSocket
//! endpoint, logs in when credentials are present, establishes the startup
//! subscriptions, and streams pushes to the log until interrupted.
//!
//! # Usage
//!
//! ```bash
//! vx5-runner config.json --log-level info
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use vx5_ws::msg::event_for_args;
use vx5_ws::{Event, WsClient};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Exchange Streaming Client Runner.
#[derive(Parser)]
#[command(name = "vx5-runner", about = "Exchange Streaming Client Runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    vx5_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "vx5-runner");

    info!("vx5-runner starting — config={}, log_level={}", cli.config.display(), cli.log_level,);

    // 2. Load configuration
    let config = vx5_core::config::load_config(&cli.config)?;
    info!(
        "config loaded — endpoint={}, {} startup subscription(s)",
        config.ws_endpoint,
        config.subscriptions.len(),
    );

    // 3. Create and start the client
    let mut client = WsClient::new(config.ws_endpoint.clone())?;
    client.set_dial_timeout(config.dial_timeout());
    client.set_ping_interval(config.ping_interval());

    client.set_push_hook(|_ts, push| {
        info!(
            "push: channel={} ({} item(s))",
            push.arg.get("channel").map(String::as_str).unwrap_or("?"),
            push.data.len(),
        );
        Ok(())
    });
    client.set_depth_hook(|_ts, depth| {
        let Some(book) = depth.data.first() else { return Ok(()) };
        info!(
            "depth: channel={} instId={} action={} asks={} bids={} checksum={}",
            depth.arg.get("channel").map(String::as_str).unwrap_or("?"),
            depth.arg.get("instId").map(String::as_str).unwrap_or("?"),
            depth.action,
            book.asks.len(),
            book.bids.len(),
            book.checksum,
        );
        Ok(())
    });
    client.set_error_hook(|_ts, err| {
        warn!("server error: code={} msg={}", err.code, err.msg);
        Ok(())
    });

    client.start().await?;

    // 4. Authenticate when credentials are configured
    if let Some(credentials) = &config.credentials {
        client.set_credentials(credentials.clone());
        let detail = client.login(REQUEST_TIMEOUT).await?;
        info!("logged in ({}us)", detail.used_us());
    }

    // 5. Establish startup subscriptions, one request per channel family
    let mut by_event: HashMap<Event, Vec<HashMap<String, String>>> = HashMap::new();
    for arg in &config.subscriptions {
        let event = event_for_args(arg);
        if event == Event::Unknown {
            error!("skipping unrecognized subscription {arg:?}");
            continue;
        }
        by_event.entry(event).or_default().push(arg.clone());
    }
    for (event, args) in by_event {
        match client.subscribe(args, REQUEST_TIMEOUT).await {
            Ok(detail) => info!("subscribed to {event} ({}us)", detail.used_us()),
            Err(e) => error!("subscribe to {event} failed: {e}"),
        }
    }

    info!("running — press Ctrl+C to stop");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    client.stop();
    info!("client stopped — goodbye");
    Ok(())
}
