#![allow(clippy::let_unit_value, clippy::module_name_repetitions, clippy::must_use_candidate)]
#![deny(
    clippy::all,
    future_incompatible,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![doc = include_str!("../README.md")]

//! Crate layout, leaves first:
//!
//! - [`model`] — gateway payload shapes and stop-code classification.
//! - [`shard`] — one websocket connection's state machine, runtime, and
//!   transport adapter.
//! - [`rest`] — the one REST call the core depends on: gateway discovery.
//! - [`cluster`] — the coordinator owning a bot's whole shard set.

pub mod cluster;
pub mod model;
pub mod rest;
pub mod shard;

#[doc(no_inline)]
pub use self::{
    cluster::{ClusterConfig, Coordinator},
    model::Intents,
    rest::{GatewayApi, ReqwestGatewayApi},
    shard::{ShardConfig, ShardRuntime},
};

use cluster::{ClusterStartError, CommunicationCommand, OutputEvent, ReshardError};
use rest::RestError;
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
    sync::Arc,
};
use tokio::sync::mpsc;

/// Discord API version used by this crate's gateway discovery request.
pub const API_VERSION: u8 = 6;

#[cfg(not(any(feature = "native", feature = "rustls-native-roots", feature = "rustls-webpki-roots")))]
compile_error!("Either the `native`, `rustls-native-roots` or `rustls-webpki-roots` feature must be enabled.");

/// Either the initial connect or a later re-shard ended the bot run.
#[derive(Debug)]
#[non_exhaustive]
pub enum BotError {
    /// The initial gateway discovery failed; no shard ever connected.
    Start(ClusterStartError),
    /// A re-shard could not proceed once shards were already running.
    Reshard(ReshardError),
}

impl Display for BotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(source) => Display::fmt(source, f),
            Self::Reshard(source) => Display::fmt(source, f),
        }
    }
}

impl StdError for BotError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Start(source) => Some(source),
            Self::Reshard(source) => Some(source),
        }
    }
}

/// Discover the gateway URL and recommended shard count for `config`'s
/// token, then run the bot until every shard stops, re-sharding is
/// surfaced to the caller (`HandleReShard=false`), or re-sharding fails.
///
/// This is the one piece `ConnectShards` leaves to its caller: the
/// *initial* gateway discovery. Everything downstream — staggered startup,
/// heartbeating, reconnection, re-sharding — is owned by the returned
/// coordinator run.
pub async fn connect<A: GatewayApi>(
    config: ClusterConfig,
    gateway_api: A,
    output_tx: mpsc::UnboundedSender<OutputEvent>,
    communication_rx: mpsc::Receiver<CommunicationCommand>,
) -> Result<(), BotError> {
    let info = gateway_api
        .get_gateway_bot(config.token())
        .await
        .map_err(|source| BotError::Start(ClusterStartError::new(source)))?
        .ok_or_else(|| BotError::Start(ClusterStartError::new(RestError::empty())))?;

    let gateway_url: Arc<str> = Arc::from(info.url);
    let shard_ids: Vec<u64> = (0..info.shards).collect();

    let coordinator = Coordinator::new(config, gateway_api);

    coordinator
        .run(gateway_url, shard_ids, info.shards, output_tx, communication_rx)
        .await
        .map_err(BotError::Reshard)
}
