//! Quill server — a shared text pad over HTTP long-polling.
//!
//! Binds the pad server and runs it until the process is killed. The port
//! can be given as the first argument (default 8888).

use log::info;
use quill_collab::server::{PadServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(8888);

    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };

    info!("Starting Quill on {}...", config.bind_addr);
    let server = PadServer::new(config);
    server.run().await?;
    Ok(())
}
