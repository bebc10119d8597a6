//! Relay server demo
//!
//! Run with: cargo run --example relay_server [UPSTREAM_HOST:PORT]
//!
//! Examples:
//!   cargo run --example relay_server                  # synthetic source only
//!   cargo run --example relay_server 10.0.0.5:4001    # also relay another relay
//!
//! Serves on 0.0.0.0:4001 and /tmp/mocap_relay.sock. The synthetic subject
//! "Test" has one marker sweeping a circle, so any connected consumer sees
//! moving data without capture hardware.
//!
//! Quick check with netcat (binary output):
//!   nc localhost 4001 | xxd | head

use std::f64::consts::TAU;
use std::time::Duration;

use mocap_relay::adapter::{SyntheticSource, UpstreamConfig, UpstreamSource};
use mocap_relay::{Relay, RelayConfig, StatusEvent};

fn print_usage() {
    eprintln!("Usage: relay_server [UPSTREAM_HOST:PORT]");
    eprintln!();
    eprintln!("Set RUST_LOG to control logging, e.g. RUST_LOG=mocap_relay=debug");
}

fn parse_upstream(arg: &str) -> Result<(String, u16), String> {
    let (host, port) = arg
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got '{}'", arg))?;
    let port = port
        .parse()
        .map_err(|_| format!("invalid port '{}'", port))?;
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let upstream = match args.get(1) {
        Some(arg) => match parse_upstream(arg) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => None,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mocap_relay=info".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let (mut relay, mut events) = Relay::new(RelayConfig::default());

    let (synthetic, pointer) = SyntheticSource::new();
    relay.attach(synthetic);

    if let Some((host, port)) = upstream {
        println!("Relaying upstream {}:{}", host, port);
        relay.attach(UpstreamSource::new(UpstreamConfig::new(host, port)));
    }

    relay.start().await?;

    // Sweep the pointer around a circle, one revolution every 4 seconds
    let sweep = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        let mut angle = 0.0f64;
        loop {
            ticker.tick().await;
            angle = (angle + TAU / 400.0) % TAU;
            pointer.set(100.0 * angle.cos(), 100.0 * angle.sin());
        }
    });

    let mut report = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                // Too frequent to print
                StatusEvent::FrameProduced { .. } => {}
                other => println!("{:?}", other),
            },
            _ = report.tick() => {
                let stats = relay.stats().await;
                for b in &stats.broadcasts {
                    println!(
                        "[{}] clients={} cycles={} rate={}/s dropped_ticks={}",
                        b.transport,
                        b.server.active_connections,
                        b.server.cycles_delivered,
                        b.pacer.achieved_rate,
                        b.pacer.dropped,
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    sweep.abort();
    relay.stop().await;

    Ok(())
}
