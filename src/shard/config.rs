//! Per-shard configuration, handed down by the coordinator.

use crate::model::Intents;
use std::sync::Arc;

/// The configuration a single shard identifies and connects with.
///
/// Built by the coordinator from its own [`crate::cluster::ClusterConfig`];
/// not constructed directly by callers of this crate.
#[derive(Clone, Debug)]
pub struct ShardConfig {
    pub(crate) token: Arc<str>,
    pub(crate) intents: Intents,
    pub(crate) shard: [u64; 2],
    pub(crate) gateway_url: Arc<str>,
    pub(crate) buffer_size: usize,
    pub(crate) stop_on_fatal: bool,
}

impl ShardConfig {
    pub(crate) fn new(
        token: Arc<str>,
        intents: Intents,
        id: u64,
        count: u64,
        gateway_url: Arc<str>,
        buffer_size: usize,
        stop_on_fatal: bool,
    ) -> Self {
        Self {
            token,
            intents,
            shard: [id, count],
            gateway_url,
            buffer_size,
            stop_on_fatal,
        }
    }

    /// The token used to authenticate with the gateway.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// A copy of the intents this shard identifies with.
    pub const fn intents(&self) -> Intents {
        self.intents
    }

    /// This shard's `[id, count]` pair.
    pub const fn shard(&self) -> [u64; 2] {
        self.shard
    }

    /// The websocket URL to connect to, as returned by gateway discovery.
    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    /// Maximum text/binary message size, in bytes, the transport will accept.
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether a fatal close code should tear the whole bot down instead of
    /// reconnecting this shard.
    pub const fn stop_on_fatal(&self) -> bool {
        self.stop_on_fatal
    }
}

#[cfg(test)]
mod tests {
    use super::ShardConfig;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ShardConfig: Clone, Debug, Send, Sync);
}
