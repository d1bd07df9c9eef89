//! RTT Tracker CLI
//!
//! Activity inference from probe round-trip times.

use anyhow::Context;
use clap::{Parser, Subcommand};
use rtt_tracker::{
    config::Config, probe::SimulatedTransport, ServerMessage, TrackingCoordinator, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "rtt-tracker")]
#[command(version = VERSION)]
#[command(about = "Latency-based activity tracker", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP / WebSocket service
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Origin allowed by CORS
        #[arg(long, env = "FRONTEND_URL")]
        frontend_origin: Option<String>,
    },

    /// Track targets headless and print updates
    Track {
        /// Targets to probe
        #[arg(required = true)]
        targets: Vec<String>,

        /// Probe interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Show configuration
    Config {
        /// Write the current configuration to the default location
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            frontend_origin,
        } => cmd_serve(config, port, frontend_origin).await,
        Commands::Track {
            targets,
            interval,
            duration,
        } => cmd_track(config, targets, interval, duration).await,
        Commands::Config { init } => cmd_config(&config, init),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load().context("Failed to load config"),
    }
}

#[cfg(feature = "server")]
async fn cmd_serve(
    mut config: Config,
    port: Option<u16>,
    frontend_origin: Option<String>,
) -> anyhow::Result<()> {
    use rtt_tracker::server::{self, ServerConfig};

    if let Some(origin) = frontend_origin {
        config.server.frontend_origin = origin;
    }
    let mut server_config = ServerConfig::new(config);
    if let Some(port) = port {
        server_config.port = port;
    }

    println!("RTT Tracker v{VERSION}");
    println!();

    let server = server::run(server_config).await?;
    println!("Listening on http://{}", server.addr);
    println!("WebSocket stream at ws://{}/ws", server.addr);
    println!();
    println!("Press Ctrl+C to stop");

    let mut stop = ctrlc_handler()?;
    wait_for_stop(&mut stop).await;

    println!();
    println!("Stopping all tracking...");
    server.shutdown();
    Ok(())
}

#[cfg(not(feature = "server"))]
async fn cmd_serve(
    _config: Config,
    _port: Option<u16>,
    _frontend_origin: Option<String>,
) -> anyhow::Result<()> {
    anyhow::bail!("serve requires the `server` feature")
}

async fn cmd_track(
    config: Config,
    targets: Vec<String>,
    interval: Option<u64>,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    println!("RTT Tracker v{VERSION}");
    println!();

    let transport = Arc::new(SimulatedTransport::new(config.simulation.clone()));
    println!("Connecting transport...");
    transport.connect().await;

    let (coordinator, pipeline) = TrackingCoordinator::new(&config, transport)?;
    let mut observer = coordinator.broadcaster().register();
    let pipeline = pipeline.spawn();
    let sweeper = coordinator.spawn_sweeper();

    for target in &targets {
        match coordinator.start(Some(target.as_str()), interval) {
            Ok(outcome) => println!(
                "  Tracking {} every {}ms",
                outcome.target, outcome.interval
            ),
            Err(e) => eprintln!("  Could not track {target}: {e}"),
        }
    }
    if coordinator.status().count == 0 {
        anyhow::bail!("No targets could be tracked");
    }

    println!();
    match duration {
        Some(secs) => println!("Running for {secs}s (Ctrl+C to stop early)"),
        None => println!("Press Ctrl+C to stop"),
    }
    println!();

    let mut stop = ctrlc_handler()?;
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = observer.recv() => match message {
                Some(json) => print_update(&json),
                None => break,
            },
            _ = &mut deadline => break,
            _ = wait_for_stop(&mut stop) => break,
        }
    }

    let analyses = coordinator.all_analyses();
    println!();
    println!("Final analyses");
    println!("==============");
    if analyses.is_empty() {
        println!("No measurements collected.");
    } else {
        println!("{}", serde_json::to_string_pretty(&analyses)?);
    }

    coordinator.shutdown();
    sweeper.abort();
    drop(coordinator);
    let _ = pipeline.await;
    Ok(())
}

fn print_update(json: &str) {
    match serde_json::from_str::<ServerMessage>(json) {
        Ok(ServerMessage::RttUpdate { data }) => {
            let summary = data
                .analysis
                .as_ref()
                .map(|a| format!(" | trend: {}, avg: {:.0}ms", a.trend, a.statistics.avg))
                .unwrap_or_default();
            println!(
                "[{}] {} {}ms {}{}",
                data.timestamp.format("%H:%M:%S"),
                data.target,
                data.elapsed_ms,
                data.state,
                summary
            );
        }
        Ok(ServerMessage::Error {
            data: Some(error), ..
        }) => {
            eprintln!("[error] {}: {}", error.target, error.reason);
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "Unreadable update"),
    }
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        let path = config.save()?;
        println!("Wrote configuration to {path:?}");
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler() -> anyhow::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = tx.send(true);
    })
    .context("Error setting Ctrl+C handler")?;
    Ok(rx)
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
