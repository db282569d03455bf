//! Configuration view and validation commands: `kanbin config`.

use anyhow::Result;
use console::style;
use kanbin::config::ClientConfig;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let path = ClientConfig::default_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = ClientConfig::resolve(cli.server.as_deref())?;
            println!();
            println!("Kanbin Configuration");
            println!("====================");
            println!();
            match &path {
                Some(path) if path.exists() => println!("Config file: {}", path.display()),
                Some(path) => println!(
                    "No config file at {}, using defaults",
                    path.display()
                ),
                None => println!("No config directory on this platform, using defaults"),
            }
            if cli.server.is_some() {
                println!("server_url overridden by --server / KANBIN_URL");
            }
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = ClientConfig::resolve(cli.server.as_deref())?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Path) => match path {
            Some(path) => println!("{}", path.display()),
            None => println!("No config directory on this platform"),
        },
    }

    Ok(())
}
