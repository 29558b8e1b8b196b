//! ifconnect CLI
//!
//! Thin front end over `ifconnect-core`: find a simulation host, watch its
//! data, send single commands and print the sentence feed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ifconnect_core::config::{Directories, LoggingConfig};
use ifconnect_core::{Category, ClientConfig, ClientEvent, Command, IfcClient};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Client for the flight simulator Connect API
#[derive(Parser, Debug)]
#[command(name = "ifconnect")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Examples:
  ifconnect discover                              Wait for a host announcement
  ifconnect watch --poll Fds.IFAPI.APIAircraftState=500
  ifconnect --host 10.0.0.5 --port 10112 send airplane.getstate
  ifconnect send Commands.FlapsDown
  ifconnect telemetry                             Print XGPS/XATT records
")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Host address; with --port skips discovery
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for one host announcement and print its endpoint
    Discover {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Connect and print every event as a JSON line
    Watch {
        /// Poll interval as TYPE=MS, e.g. Fds.IFAPI.APIAircraftState=500
        #[arg(long = "poll", value_name = "TYPE=MS", value_parser = parse_poll)]
        polls: Vec<(Category, u32)>,

        /// Also listen for the sentence feed
        #[arg(long)]
        telemetry: bool,
    },

    /// Connect, send one command and print the outcome
    Send {
        /// Command name, e.g. airplane.getstate
        name: String,

        /// Command parameters
        params: Vec<String>,

        /// Keep printing replies for this many milliseconds
        #[arg(long, default_value_t = 1000)]
        wait: u64,
    },

    /// Print decoded sentence feed records
    Telemetry,
}

fn parse_poll(s: &str) -> Result<(Category, u32), String> {
    let (name, ms) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=MS, got {s:?}"))?;
    let category = name.parse::<Category>().map_err(|e| e.to_string())?;
    let ms = ms
        .parse::<u32>()
        .map_err(|e| format!("invalid interval {ms:?}: {e}"))?;
    Ok((category, ms))
}

/// Set up logging from the config's logging section. `RUST_LOG` overrides it.
/// The returned guard flushes the log file on drop.
fn setup_logging(logging: &LoggingConfig, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map_or_else(|| "ifconnect.log".into(), |name| name.to_os_string());

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(filter)
        .init();

    Some(guard)
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Directories::new()?.config_file,
    };
    let mut config = ClientConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if cli.host.is_some() {
        config.host.clone_from(&cli.host);
    }
    if cli.port.is_some() {
        config.port = cli.port;
    }
    Ok(config)
}

fn print_json(event: &ClientEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

async fn discover(mut config: ClientConfig, timeout: u64) -> Result<()> {
    config.discovery.connect_on_discover = false;
    let client = IfcClient::new(config);
    let mut events = client.subscribe();

    let listen = client.search_host().await?;
    eprintln!("Listening for announcements on {listen}");

    let found = tokio::time::timeout(Duration::from_secs(timeout), async {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::HostDiscovered { endpoint } => return Some(endpoint),
                ClientEvent::DiscoveryFailed { reason } => eprintln!("Ignored: {reason}"),
                _ => {}
            }
        }
        None
    })
    .await;

    client.shutdown().await;
    match found {
        Ok(Some(endpoint)) => {
            println!("{endpoint}");
            Ok(())
        }
        Ok(None) => bail!("Session closed before a host was found"),
        Err(_) => bail!("No host announced within {timeout}s"),
    }
}

/// Connect (configured or discovered host) and wait until the session is up.
async fn connect(client: &IfcClient) -> Result<()> {
    let mut events = client.subscribe();
    client.init().await?;

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::HostSearchStarted { listen } => {
                eprintln!("Searching for a host on {listen}");
            }
            ClientEvent::Connected { endpoint } => {
                info!("Connected to {}", endpoint);
                return Ok(());
            }
            ClientEvent::ConnectionError { endpoint, message } => {
                bail!("Connection to {endpoint} failed: {message}")
            }
            ClientEvent::HostUndefined => bail!("Host undefined"),
            _ => {}
        }
    }
    bail!("Session closed")
}

async fn watch(config: ClientConfig, polls: Vec<(Category, u32)>, telemetry: bool) -> Result<()> {
    let client = IfcClient::new(config);
    let mut events = client.subscribe();

    if telemetry {
        let listen = client.start_telemetry().await?;
        eprintln!("Sentence feed on {listen}");
    }
    connect(&client).await?;
    if !polls.is_empty() {
        client.set_poll_intervals(polls)?;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_json(&event)?;
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn send(config: ClientConfig, command: Command, wait: u64) -> Result<()> {
    let client = IfcClient::new(config);
    connect(&client).await?;

    let mut events = client.subscribe();
    client.send(command)?;

    let outcome = loop {
        match events.recv().await {
            Some(ClientEvent::CommandSent { command }) => break Ok(command),
            Some(ClientEvent::CommandError { command }) => break Err(command),
            Some(_) => {}
            None => bail!("Session closed"),
        }
    };

    let command = match outcome {
        Ok(command) => command,
        Err(command) => {
            client.shutdown().await;
            bail!("Failed to send {command}");
        }
    };
    eprintln!("Sent {command}");

    let replies = tokio::time::timeout(Duration::from_millis(wait), async {
        while let Some(event) = events.recv().await {
            if let ClientEvent::Data { .. } = event {
                print_json(&event)?;
            }
        }
        anyhow::Ok(())
    })
    .await;
    if let Ok(Err(e)) = replies {
        debug!("Stopped printing replies: {}", e);
    }

    client.shutdown().await;
    Ok(())
}

async fn telemetry(config: ClientConfig) -> Result<()> {
    let client = IfcClient::new(config);
    let mut events = client.subscribe();
    let listen = client.start_telemetry().await?;
    eprintln!("Sentence feed on {listen}");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event @ ClientEvent::Telemetry { .. }) => print_json(&event)?,
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _guard = setup_logging(&config.logging, cli.log_file.as_deref());

    match cli.command {
        Commands::Discover { timeout } => discover(config, timeout).await,
        Commands::Watch { polls, telemetry } => watch(config, polls, telemetry).await,
        Commands::Send { name, params, wait } => {
            send(config, Command::with_parameters(name, params), wait).await
        }
        Commands::Telemetry => telemetry(config).await,
    }
}
