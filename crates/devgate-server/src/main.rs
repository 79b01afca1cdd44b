//! devgate - device gateway
//!
//! Holds device sessions and keeps them on the gateway instance that owns
//! them according to service discovery.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use devgate_server::{logging, signal, Gateway, GatewayConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "devgate")]
#[command(about = "Device gateway with discovery-driven session rebalancing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Run {
        /// Path to config file
        #[arg(short, long, env = "DEVGATE_CONFIG", default_value = "/etc/devgate/config.json")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/devgate/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = GatewayConfig::load(&config)?;
            logging::init(&config.log)?;

            info!(
                service = %config.service_name,
                queue_size = config.device.queue_size,
                "starting devgate"
            );

            let gateway = Gateway::new(config, None)?;
            let remaining = gateway.run_until(signal::shutdown_signal()).await;
            info!(remaining, "devgate exited");
        }

        Commands::InitConfig { output } => {
            let config = GatewayConfig::default();
            config.save(&output)?;
            println!("Config written to {}", output.display());
        }
    }

    Ok(())
}
