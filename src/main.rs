use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chime_relay::api::triggers;
use chime_relay::channel::ChannelClient;
use chime_relay::listener::{LineEngineFactory, Supervisor, spawn_session};
use chime_relay::matcher::display_triggers;
use chime_relay::voice::output_devices;
use chime_relay::{Config, Daemon};

/// Grace period for in-flight hits when the listener shuts down
const DRAIN_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// Chime - play audio cues when keywords are spoken
#[derive(Parser)]
#[command(name = "chime", version, about)]
struct Cli {
    /// Path to chime.toml
    #[arg(short, long, env = "CHIME_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay
    Serve,
    /// Listen for keywords in transcript lines on stdin and forward hits
    Listen {
        /// Relay WebSocket URL
        #[arg(long, env = "CHIME_RELAY_URL", default_value = "ws://127.0.0.1:3000/ws")]
        relay: String,
    },
    /// Validate the configuration and print the trigger table
    CheckConfig,
    /// List audio output devices usable as voice destinations
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,chime_relay=info",
        1 => "info,chime_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Serve => {
            let config = Config::load(config_path)?;
            Daemon::new(config).run().await?;
            Ok(())
        }
        Command::Listen { relay } => listen(&relay, config_path).await,
        Command::CheckConfig => check_config(config_path),
        Command::Devices => list_devices(),
    }
}

/// Run a listening session over stdin
async fn listen(relay: &str, config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let (triggers, cooldown_ms) = if let Some(path) = config_path {
        let config = Config::load(Some(path))?;
        (config.triggers(), config.cooldown_ms())
    } else {
        let response = triggers::fetch(relay).await?;
        let cooldown_ms = response.cooldown_ms;
        (response.into_triggers(), cooldown_ms)
    };

    anyhow::ensure!(!triggers.is_empty(), "no triggers configured");
    tracing::info!(
        triggers = triggers.len(),
        cooldown_ms,
        relay,
        "listening for keywords"
    );

    let channel = ChannelClient::connect(relay);
    let factory = Arc::new(LineEngineFactory::new(tokio::io::BufReader::new(
        tokio::io::stdin(),
    )));
    let supervisor = Supervisor::new(triggers, std::time::Duration::from_millis(cooldown_ms));
    let (session, mut hits, task) = spawn_session(factory.clone(), supervisor);
    session.start();

    loop {
        tokio::select! {
            Some(hit) = hits.recv() => {
                channel.send(&hit);
            }
            () = factory.closed() => break,
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    // Let hits from the final lines go out before closing
    tokio::time::sleep(DRAIN_DELAY).await;
    while let Ok(hit) = hits.try_recv() {
        channel.send(&hit);
    }

    session.stop();
    drop(session);
    let _ = task.await;
    tokio::time::sleep(DRAIN_DELAY).await;
    channel.close();

    Ok(())
}

fn check_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    println!("cooldown: {} ms", config.cooldown_ms());
    println!("port:     {}", config.server.port);
    if let Some(destination) = &config.voice.destination {
        println!("voice:    {destination}");
    }
    println!();

    for (index, sound) in config.sounds.iter().enumerate() {
        let marker = if index == 0 { " (fallback)" } else { "" };
        let exists = if sound.file.is_file() { "" } else { "  [missing]" };
        println!(
            "{:<24} {:>4.2}  {}{exists}{marker}",
            sound.keywords.join(", "),
            sound.volume,
            sound.file.display()
        );
    }

    let triggers = config.triggers();
    let shown = display_triggers(&triggers).len();
    if shown < triggers.len() {
        println!(
            "\nnote: {} duplicate keyword(s); the first occurrence wins",
            triggers.len() - shown
        );
    }

    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let devices = output_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
        return Ok(());
    }

    println!("Output devices (use as [voice] destination, or \"default\"):");
    for name in devices {
        println!("  {name}");
    }
    Ok(())
}
