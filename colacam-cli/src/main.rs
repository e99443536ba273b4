//! colacam-cli - Command-line interface for CoLa devices
//!
//! Runs one command against a device and exits.

mod commands;

use clap::{Parser, Subcommand};
use colacam_client::{ControlConfig, DeviceControl, Dialect};
use colored::Colorize;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "colacam-cli")]
#[command(about = "Command-line interface for CoLa time-of-flight sensors")]
#[command(version)]
pub struct Cli {
    /// Device host name or address
    #[arg(short = 'H', long, default_value = "192.168.1.10", env = "COLACAM_HOST")]
    pub host: String,

    /// Control protocol dialect (colab or cola2)
    #[arg(short, long, default_value = "cola2", env = "COLACAM_PROTOCOL")]
    pub protocol: Dialect,

    /// Control port (defaults to the dialect's port)
    #[arg(long, env = "COLACAM_CONTROL_PORT")]
    pub control_port: Option<u16>,

    /// Streaming port
    #[arg(long, default_value_t = colacam_protocol::STREAMING_PORT, env = "COLACAM_STREAM_PORT")]
    pub stream_port: u16,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 5000, env = "COLACAM_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Skip CoLa-B checksum verification
    #[arg(long)]
    pub no_checksum: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the device identification
    Ident,

    /// Start continuous acquisition
    Start,

    /// Stop acquisition
    Stop,

    /// Acquire a single frame
    Step,

    /// Read a device variable and dump its parameters
    Read {
        /// Variable name
        name: String,
    },

    /// Receive frames from the streaming port
    Grab {
        /// Number of frames to receive
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Per-frame timeout in milliseconds
        #[arg(short, long, default_value = "2000")]
        timeout_ms: u64,

        /// Start acquisition before grabbing and stop it afterwards
        #[arg(long)]
        start: bool,
    },
}

impl Cli {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn control_config(&self) -> ControlConfig {
        let mut config = ControlConfig::new(self.host.clone(), self.protocol)
            .with_connect_timeout(self.connect_timeout())
            .with_verify_checksum(!self.no_checksum);
        if let Some(port) = self.control_port {
            config = config.with_port(port);
        }
        config
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let device = match DeviceControl::open(cli.control_config()) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("{}: {}", "Connection failed".red(), e);
            std::process::exit(1);
        }
    };

    let result = commands::execute(&device, &cli);
    device.close();

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
