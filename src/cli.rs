use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keyflume")]
#[command(about = "Layered keyboard remapping daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Grab the keyboard and run the remapping engine
    Run {
        /// Config file (defaults to ~/.config/keyflume/keyflume.ron)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Input device to grab, overriding the config
        #[arg(long)]
        device: Option<PathBuf>,
    },
    /// Load and resolve a config without touching any device
    Check {
        /// Config file (defaults to ~/.config/keyflume/keyflume.ron)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List input devices that look like keyboards
    ListDevices,
}
