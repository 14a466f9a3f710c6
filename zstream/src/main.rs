mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use zstream_core::{
    bootstrap::{init_services, load_config},
    logging,
    resolver::{extract_channel_login, MediaUrlResolver, StreamlinkResolver},
};

use server::ZStreamServer;

#[derive(Parser, Debug)]
#[command(name = "zstream")]
#[command(about = "OBS scene control-plane for Twitch streams", long_about = None)]
struct Args {
    /// Path to a YAML/TOML/JSON config file
    #[arg(long, short)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the OBS reconciler (default)
    Serve,
    /// Resolve one channel to a media URL and print it
    Resolve {
        /// Channel login or twitch.tv URL
        streamer: String,
        /// Requested quality, defaults to the configured one
        #[arg(long, short)]
        quality: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("zstream starting...");
            info!("HTTP address: {}", config.http_address());

            // 3. Initialize core services
            let services = init_services(&config).await;
            info!(streams = services.registry.len().await, "Stream registry loaded");

            // 4. Run until a shutdown signal
            ZStreamServer::new(config, services).start().await
        }
        Command::Resolve { streamer, quality } => {
            let Some(login) = extract_channel_login(&streamer) else {
                error!(input = %streamer, "Not a Twitch channel name or URL");
                std::process::exit(1);
            };
            let quality = quality.unwrap_or_else(|| config.resolver.default_quality.clone());
            let resolver = StreamlinkResolver::new(&config.resolver);

            match resolver.resolve(&login, &quality).await {
                Ok(url) => {
                    println!("{url}");
                    Ok(())
                }
                Err(e) => {
                    error!(channel = %login, quality = %quality, error = %e, "Resolution failed");
                    std::process::exit(1);
                }
            }
        }
    }
}
