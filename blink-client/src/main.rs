use std::error::Error;
use std::path::Path;

use blink_client::config::{self, DEFAULT_CONFIG_PATH, DEFAULT_IDENTITY_PATH};
use blink_client::ui::ConsoleApp;
use blink_client::{ClientRuntime, RuntimeSettings};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "blink", version, about = "Chat and share files with peers on your network")]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Signaling server address (host:port)
    #[arg(long, value_name = "ADDR")]
    server: Option<String>,
    /// Name shown to nearby peers
    #[arg(long)]
    name: Option<String>,
    /// File holding this client's id
    #[arg(long, default_value = DEFAULT_IDENTITY_PATH, value_name = "FILE")]
    id_file: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let mut client_config = config::load_config(&cli.config).apply_env();
    if let Some(server) = cli.server {
        client_config.server_addr = server;
    }
    if let Some(name) = cli.name {
        client_config.display_name = name;
    }
    let local_id = config::load_or_generate_identity(Path::new(&cli.id_file))?;

    // 1. Tạo các kênh giao tiếp (Channels)
    // UI -> Network
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Network -> UI
    let (event_tx, event_rx) = mpsc::channel(100);

    // 2. Khởi chạy Network Task (Chạy ngầm)
    let settings = RuntimeSettings {
        server_addr: client_config.server_addr.clone(),
        local_id,
        display_name: client_config.display_name.clone(),
        negotiation_timeout: client_config.negotiation_timeout(),
        session: client_config.session_settings(),
    };
    let runtime = tokio::spawn(async move {
        let client = ClientRuntime::new(event_tx, cmd_rx, settings);
        if let Err(err) = client.run().await {
            log::error!("Network client terminated: {err}");
            eprintln!("! {err}");
        }
    });

    // 3. Khởi chạy UI console
    log::info!(
        "Client started as {} via {}",
        client_config.display_name,
        client_config.server_addr
    );
    ConsoleApp::new(cmd_tx, event_rx).run().await?;

    runtime.await?;
    Ok(())
}
