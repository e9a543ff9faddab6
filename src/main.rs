use anyhow::Result;
use clap::Parser;

use keyflume::cli::{Cli, Command};
use keyflume::config::Config;
use keyflume::{daemon, io};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, device } => {
            let path = config.unwrap_or_else(Config::default_path);
            let config = Config::load(&path)?;
            daemon::run(&config, device)?;
        }
        Command::Check { config } => {
            let path = config.unwrap_or_else(Config::default_path);
            let config = Config::load(&path)?;
            config.resolve()?;
            println!("{} resolves cleanly", path.display());
        }
        Command::ListDevices => {
            let keyboards = io::evdev::discover_keyboards();
            if keyboards.is_empty() {
                println!("no keyboards found (are you in the input group?)");
            }
            for (path, name) in keyboards {
                println!("{}\t{}", path.display(), name);
            }
        }
    }
    Ok(())
}
