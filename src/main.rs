use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rover_gateway::config::LoadOptions;
use rover_gateway::daemon::{build_dispatcher, build_synthesizer};
use rover_gateway::voice::{AudioCapture, SpeechSynthesizer, rms};
use rover_gateway::{Config, Daemon, vehicle};

/// Rover - voice and chat control gateway for a serial-linked robot vehicle
#[derive(Parser)]
#[command(name = "rover", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/rover/config.toml)
    #[arg(short, long, env = "ROVER_CONFIG")]
    config: Option<PathBuf>,

    /// API server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (for hosts without audio hardware)
    #[arg(long)]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a command through the rules and remote assistant
    Ask {
        /// Utterance to resolve
        text: String,
    },
    /// Speak text through the synthesizer
    Say {
        #[arg(default_value = "Welcome to OpenBot.")]
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// List serial ports
    Ports,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,rover_gateway=info",
        1 => "info,rover_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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
    let options = LoadOptions {
        config_path: cli.config.as_deref(),
        port: cli.port,
        disable_voice: cli.disable_voice,
    };

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Ask { text } => ask(&Config::load(&options)?, &text).await,
            Command::Say { text } => say(&Config::load(&options)?, &text).await,
            Command::TestMic { duration } => test_mic(duration).await,
            Command::Ports => ports(),
        };
    }

    let config = Config::load(&options)?;
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        transport = %config.vehicle.transport,
        endpoint = config.vehicle.endpoint(),
        port = config.api_server.port,
        "starting rover gateway"
    );

    Daemon::new(config).run().await?;

    Ok(())
}

/// Resolve one utterance and print the reply
async fn ask(config: &Config, text: &str) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config);
    let reply = dispatcher.resolve_reply(text).await;
    println!("{}", reply.text);
    tracing::debug!(source = ?reply.source, "reply resolved");
    Ok(())
}

/// Speak text and wait for playback to finish
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let synthesizer = build_synthesizer(&config.voice)?;
    synthesizer.speak(text);
    synthesizer.wait().await;
    synthesizer.shutdown();
    Ok(())
}

/// Show a microphone level meter
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let levels = tokio::task::spawn_blocking(move || -> rover_gateway::Result<Vec<(f32, f32)>> {
        let mut capture = AudioCapture::new()?;
        capture.start()?;

        let mut levels = Vec::new();
        for _ in 0..duration {
            std::thread::sleep(Duration::from_secs(1));
            let samples = capture.take_buffer();
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
            levels.push((rms(&samples), peak));
        }

        capture.stop();
        Ok(levels)
    })
    .await??;

    for (i, (energy, peak)) in levels.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    println!("\n---");
    println!("If the meter moved, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// List serial ports a vehicle could be reached on
fn ports() -> anyhow::Result<()> {
    let ports = vehicle::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}
