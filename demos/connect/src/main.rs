//! Connects a bot's whole shard set and prints every dispatched event.
//!
//! Installs a `tracing-subscriber` fmt layer, which the library crate itself
//! deliberately doesn't do (it only emits spans/events; installing a
//! subscriber is the embedding application's job). Run with
//! `DISCORD_TOKEN=... RUST_LOG=corvid_gateway=debug cargo run -p corvid-demo-connect`.

use corvid_gateway::{cluster::ClusterConfig, connect, model::Intents, rest::ReqwestGatewayApi};
use std::{env, error::Error};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let token = env::var("DISCORD_TOKEN")?;

    let config = ClusterConfig::builder(token)
        .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
        .build();

    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let (_communication_tx, communication_rx) = mpsc::channel(8);

    let printer = tokio::spawn(async move {
        while let Some(event) = output_rx.recv().await {
            println!("{event:?}");
        }
    });

    connect(config, ReqwestGatewayApi::default(), output_tx, communication_rx).await?;

    drop(printer);

    Ok(())
}
