//! Standalone notification server.
//!
//! Demonstrates:
//! - Starting a broker and a WebSocket server
//! - Emitting typed notifications through the facade
//! - Reading broker statistics
//! - Bounded shutdown on Ctrl+C
//!
//! Usage:
//!   cargo run --example notification_server
//!   cargo run --example notification_server -- --debug
//!   cargo run --example notification_server -- --port 9000
//!
//! Then connect with any WebSocket client:
//!   websocat "ws://127.0.0.1:8080/ws?user_id=demo"

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use notification_broker::transport::{NotificationServer, QueryParamAuthenticator};
use notification_broker::{Broker, BrokerConfig, Result, UserId};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

/// Interval between demo earnings updates.
const TICK: Duration = Duration::from_secs(5);

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let port = args
            .iter()
            .position(|a| a == "--port")
            .and_then(|i| args.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "notification_broker=debug"
    } else {
        "notification_broker=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Notification Server ===\n");

    let broker = Broker::start(BrokerConfig::default())?;
    let server = NotificationServer::bind(
        broker.clone(),
        QueryParamAuthenticator::default(),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        args.port,
    )
    .await?;

    println!("[1] Listening on {}/ws?user_id=demo", server.ws_url());
    println!("    Press Ctrl+C to stop\n");

    let demo_user = UserId::new("demo").expect("literal is non-blank");
    let mut ticker = tokio::time::interval(TICK);
    let mut amount = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                amount += 100;
                broker
                    .notifications()
                    .earnings_update(&demo_user, amount, "Demo survey")
                    .await;

                let stats = broker.stats().await;
                println!(
                    "[tick] users={} connections={} overflow_disconnects={}",
                    stats.total_users, stats.total_connections, stats.overflow_disconnects
                );
            }
        }
    }

    println!("\n[2] Shutting down...");
    server.shutdown();
    broker
        .notifications()
        .broadcast_system_alert("Server stopping", "Reconnect in a moment")
        .await;

    let report = broker.shutdown().await;
    println!("    ✓ closed={} forced={}", report.closed, report.forced);

    Ok(())
}
