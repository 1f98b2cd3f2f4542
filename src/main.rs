//! fflink - control a FlashForge Finder over TCP.
//!
//! One subcommand per printer operation; query results print as JSON,
//! control commands print a status line.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use fflink_client::{Client, ConnectionConfig, Endpoint};
use fflink_protocol::Axis;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fflink")]
#[command(about = "Control a FlashForge Finder 3D printer over TCP")]
#[command(version)]
struct Cli {
    /// Printer host name or IP address
    #[arg(short, long, env = "FFLINK_PRINTER")]
    printer: String,

    /// Printer TCP port
    #[arg(long, env = "FFLINK_PORT", default_value_t = fflink_protocol::DEFAULT_PORT)]
    port: u16,

    /// Command deadline in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Automatic re-sends after a timeout
    #[arg(long, default_value_t = 0)]
    retries: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AxisArg {
    X,
    Y,
    Z,
}

impl From<AxisArg> for Axis {
    fn from(axis: AxisArg) -> Self {
        match axis {
            AxisArg::X => Axis::X,
            AxisArg::Y => Axis::Y,
            AxisArg::Z => Axis::Z,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show firmware and model information
    Info,

    /// Show extruder and bed temperatures
    Temp,

    /// Show the current head position
    Position,

    /// Show endstop switch states
    Status,

    /// Show print progress
    Progress,

    /// Home all axes, or a single axis
    Home {
        /// Axis to home (all axes when omitted)
        #[arg(long, value_enum)]
        axis: Option<AxisArg>,
    },

    /// Move the print head
    Move {
        /// Target X in mm (keeps current X when omitted)
        #[arg(long)]
        x: Option<f64>,

        /// Target Y in mm
        #[arg(long)]
        y: Option<f64>,

        /// Target Z in mm
        #[arg(long)]
        z: Option<f64>,

        /// Feedrate in mm/min (default 3000)
        #[arg(long)]
        speed: Option<u32>,
    },

    /// Set the chamber LED color
    Led {
        /// Red component (0-255)
        #[arg(long)]
        r: u8,

        /// Green component (0-255)
        #[arg(long)]
        g: u8,

        /// Blue component (0-255)
        #[arg(long)]
        b: u8,
    },

    /// Pause the running print
    Pause,

    /// Resume a paused print
    Resume,

    /// Cancel the running print
    Stop,

    /// Upload a G-code file to the printer
    Upload {
        /// Local file to send
        file: PathBuf,

        /// Name on the printer (defaults to the local file name, max 36 bytes)
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let endpoint = Endpoint::new(&cli.printer).with_port(cli.port);
    let config = ConnectionConfig::new(endpoint.clone())
        .with_request_timeout(Duration::from_secs(cli.timeout))
        .with_retries(cli.retries);

    let client = Client::new(config);
    if let Err(e) = client.connect().await {
        eprintln!("{} {}: {}", "error:".red().bold(), endpoint, e);
        std::process::exit(1);
    }

    let result = commands::execute(&client, cli.command).await;
    client.close().await;

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
