// src/main.rs
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    live_poll::start_server().await
}
