use blink_signal::config::{self, DEFAULT_CONFIG_PATH};
use clap::Parser;
use dotenvy::dotenv;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "blink-signal",
    version,
    about = "LAN presence, chat-request and signaling server"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Override the listen address (host:port)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let mut server_config = config::load_config(&cli.config).apply_env();
    if let Some(listen) = cli.listen {
        server_config.listen_addr = listen;
    }

    log::info!("Starting Blink signaling server...");
    let server = blink_signal::start(&server_config).await?;

    signal::ctrl_c().await?;
    log::info!("Received shutdown signal, stopping signaling server...");

    if let Some(stats) = server.stats().await {
        log::info!(
            "Final statistics: {} connected peers, {} pending requests",
            stats.peers,
            stats.pending_requests
        );
    }
    server.shutdown();

    Ok(())
}
