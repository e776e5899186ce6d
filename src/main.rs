use beat_room_lib::config::ServerConfig;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    beat_room_lib::run(config).await
}
