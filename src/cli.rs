use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netronome")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Self-hosted network measurement and monitoring service")]
pub struct Cli {
    /// Configuration file (default: <config_dir>/netronome/config.toml)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the service
    Serve,

    /// Write a commented default configuration file
    GenerateConfig {
        /// Destination path (default: the config file location)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long = "force")]
        force: bool,
    },

    /// Create the bootstrap user (password read from stdin)
    CreateUser {
        username: String,
    },

    /// Change a user's password (password read from stdin)
    ChangePassword {
        username: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
