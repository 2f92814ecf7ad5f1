//! motionlink CLI.
//!
//! `motionlink connect` streams notifications to stdout and sends each stdin
//! line to the server; `motionlink config` prints the effective configuration.

use std::io::BufRead;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use motionlink::{Config, MotionClient, Notification, StatusCategory};

/// Version string reported by `--version`.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "motionlink")]
#[command(version = VERSION)]
#[command(about = "Line-delimited JSON client for motion-analysis servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, print notifications and forward stdin lines until EOF
    Connect {
        /// Server IP address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Server port (overrides config)
        #[arg(long)]
        port: Option<u32>,
        /// Use UDP instead of TCP
        #[arg(long)]
        udp: bool,
        /// Log every message sent and received
        #[arg(long)]
        log_messages: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("MOTIONLINK_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::ConnectionState(state) => println!("[state] {state}"),
        Notification::Status {
            text,
            category: StatusCategory::Message,
        } => println!("[message] {text}"),
        Notification::Status {
            text,
            category: StatusCategory::AnalysisResult,
        } => println!("[result] {text}"),
        Notification::Analysis(analyzing) => println!("[analysis] {analyzing}"),
    }
}

fn run_connect(config: Config) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
    let printer = std::thread::Builder::new()
        .name("motionlink-printer".to_owned())
        .spawn(move || {
            while let Some(notification) = rx.blocking_recv() {
                print_notification(&notification);
            }
        })
        .context("Failed to spawn printer thread")?;

    let client = MotionClient::new(config, vec![Box::new(tx)])?;
    if let Err(e) = client.connect() {
        log::error!("Connect failed: {e}");
    }

    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if !line.is_empty() {
            client.enqueue(line);
        }
    }

    log::info!("stdin closed, disconnecting");
    client.disconnect();
    drop(client);
    let _ = printer.join();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            host,
            port,
            udp,
            log_messages,
        } => {
            let mut config = Config::load()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.use_udp |= udp;
            config.log_messages |= log_messages;
            run_connect(config)
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
