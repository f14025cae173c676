//! Errors the Bot Coordinator can surface.
//!
//! Grounded on `gateway/src/cluster/impl.rs`'s `ClusterStartError`: a
//! small, non-exhaustive enum with named fields and manual `Display`/
//! `Error` impls, rather than a `thiserror`-derived type.

use crate::rest::RestError;
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};

/// Re-sharding could not proceed.
#[derive(Debug)]
pub struct ReshardError {
    kind: ReshardErrorType,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ReshardError {
    pub(crate) fn capacity_exhausted(shards_requested: u64, remaining_starts: u32) -> Self {
        Self {
            kind: ReshardErrorType::CapacityExhausted { shards_requested, remaining_starts },
            source: None,
        }
    }

    pub(crate) fn discovery(source: RestError) -> Self {
        Self { kind: ReshardErrorType::Discovery, source: Some(Box::new(source)) }
    }

    /// The kind of failure that occurred.
    pub fn kind(&self) -> &ReshardErrorType {
        &self.kind
    }
}

impl Display for ReshardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ReshardErrorType::CapacityExhausted { shards_requested, remaining_starts } => write!(
                f,
                "re-shard to {shards_requested} shards exceeds the remaining identify budget ({remaining_starts})",
            ),
            ReshardErrorType::Discovery => f.write_str("gateway discovery failed during a re-shard"),
        }
    }
}

impl StdError for ReshardError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
    }
}

/// The re-shard capacity exhaustion context is carried here minus the
/// token itself, which isn't reproduced in error output.
#[derive(Debug)]
#[non_exhaustive]
pub enum ReshardErrorType {
    /// `sessionStartLimit.remaining < shardsRequested`.
    CapacityExhausted {
        /// The shard count the re-shard asked to start.
        shards_requested: u64,
        /// The identify budget actually remaining.
        remaining_starts: u32,
    },
    /// `GetGatewayBot` itself failed or returned an empty result.
    Discovery,
}

/// Starting the coordinator's initial shard set failed.
#[derive(Debug)]
pub struct ClusterStartError {
    source: RestError,
}

impl ClusterStartError {
    pub(crate) fn new(source: RestError) -> Self {
        Self { source }
    }
}

impl Display for ClusterStartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("retrieving the bot's gateway information failed")
    }
}

impl StdError for ClusterStartError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}
