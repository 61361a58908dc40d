//! wgq CLI
//!
//! Brings a WireGuard interface up, down or back in sync with its
//! configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wgq_engine::{Config, WgQuick};

/// wgq - declarative WireGuard interface management
#[derive(Parser)]
#[command(name = "wgq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wg0.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and configure the interface
    Up {
        /// Interface name (defaults to the config file name without extension)
        iface: Option<String>,
    },

    /// Tear the interface down
    Down {
        /// Interface name (defaults to the config file name without extension)
        iface: Option<String>,
    },

    /// Converge an interface to the configuration without hooks or DNS
    Sync {
        /// Interface name (defaults to the config file name without extension)
        iface: Option<String>,
    },

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "wg0.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Up { iface } => {
            let (config, iface) = prepare(&cli.config, iface)?;
            WgQuick::system()
                .up(&config, &iface)
                .with_context(|| format!("Failed to bring {} up", iface))?;
            info!("{} is up", iface);
            Ok(())
        }
        Commands::Down { iface } => {
            let (config, iface) = prepare(&cli.config, iface)?;
            WgQuick::system()
                .down(&config, &iface)
                .with_context(|| format!("Failed to bring {} down", iface))?;
            info!("{} is down", iface);
            Ok(())
        }
        Commands::Sync { iface } => {
            let (config, iface) = prepare(&cli.config, iface)?;
            WgQuick::system()
                .sync(&config, &iface)
                .with_context(|| format!("Failed to sync {}", iface))?;
            info!("{} is in sync", iface);
            Ok(())
        }
        Commands::GenConfig { output } => generate_config(output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn prepare(config_path: &Path, iface: Option<String>) -> Result<(Config, String)> {
    let config = load_config(config_path)?;
    let iface = match iface {
        Some(iface) => iface,
        None => default_iface(config_path)?,
    };
    info!("Configuration for {} loaded from {:?}", iface, config_path);
    Ok((config, iface))
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

/// `/etc/wireguard/wg0.toml` -> `wg0`
fn default_iface(config_path: &Path) -> Result<String> {
    config_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive an interface name from {:?}", config_path))
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the configuration file and set your keys before running.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_iface_from_stem() {
        assert_eq!(
            default_iface(Path::new("/etc/wireguard/wg0.toml")).unwrap(),
            "wg0"
        );
        assert_eq!(default_iface(Path::new("office")).unwrap(), "office");
        assert!(default_iface(Path::new("/")).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["wgq", "-c", "/tmp/wg1.toml", "up"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/wg1.toml"));
        assert!(matches!(cli.command, Commands::Up { iface: None }));

        let cli = Cli::try_parse_from(["wgq", "down", "wg7"]).unwrap();
        assert!(matches!(cli.command, Commands::Down { iface: Some(ref i) } if i == "wg7"));

        let cli = Cli::try_parse_from(["wgq", "gen-config", "-o", "x.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::GenConfig { .. }));
    }
}
