//! Process-wide configuration for a bot's whole shard set.
//!
//! Grounded on `gateway/src/cluster/config.rs`'s builder split: an
//! immutable config struct built through a separate builder type, rather
//! than public mutable fields or a constructor with a long positional
//! argument list.

use crate::model::Intents;
use std::sync::Arc;

const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Configuration shared by every shard a [`crate::cluster::Coordinator`]
/// manages.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub(crate) token: Arc<str>,
    pub(crate) intents: Intents,
    pub(crate) stop_on_fatal: bool,
    pub(crate) handle_reshard: bool,
    pub(crate) buffer_size: usize,
}

impl ClusterConfig {
    /// Start building a configuration for the given bot token.
    pub fn builder(token: impl Into<Arc<str>>) -> ClusterConfigBuilder {
        ClusterConfigBuilder::new(token.into())
    }

    /// The token every shard authenticates with.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The intents every shard identifies with.
    pub const fn intents(&self) -> Intents {
        self.intents
    }

    /// If true, a fatal close code shuts the whole bot down instead of
    /// reconnecting the affected shard.
    pub const fn stop_on_fatal(&self) -> bool {
        self.stop_on_fatal
    }

    /// If true, a `ReShard` request is handled autonomously via gateway
    /// discovery; if false, it's surfaced to the caller and the bot stops.
    pub const fn handle_reshard(&self) -> bool {
        self.handle_reshard
    }

    /// Maximum text/binary message size, in bytes, each shard's transport
    /// will accept.
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Builds a [`ClusterConfig`], defaulting to `StopOnFatal=false`,
/// `HandleReShard=true`, `BufferSize=4 MiB`.
#[derive(Clone, Debug)]
pub struct ClusterConfigBuilder {
    token: Arc<str>,
    intents: Intents,
    stop_on_fatal: bool,
    handle_reshard: bool,
    buffer_size: usize,
}

impl ClusterConfigBuilder {
    fn new(token: Arc<str>) -> Self {
        Self {
            token,
            intents: Intents::empty(),
            stop_on_fatal: false,
            handle_reshard: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the intents every shard identifies with. Defaults to
    /// [`Intents::empty`].
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Set whether a fatal close code shuts the whole bot down instead of
    /// reconnecting the affected shard. Defaults to `false`.
    pub fn stop_on_fatal(mut self, stop_on_fatal: bool) -> Self {
        self.stop_on_fatal = stop_on_fatal;
        self
    }

    /// Set whether a `ReShard` request is handled autonomously via gateway
    /// discovery. Defaults to `true`.
    pub fn handle_reshard(mut self, handle_reshard: bool) -> Self {
        self.handle_reshard = handle_reshard;
        self
    }

    /// Set the maximum text/binary message size, in bytes, each shard's
    /// transport will accept. Defaults to 4 MiB.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Finish building the configuration.
    pub fn build(self) -> ClusterConfig {
        ClusterConfig {
            token: self.token,
            intents: self.intents,
            stop_on_fatal: self.stop_on_fatal,
            handle_reshard: self.handle_reshard,
            buffer_size: self.buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = ClusterConfig::builder("token").build();
        assert!(!config.stop_on_fatal());
        assert!(config.handle_reshard());
        assert_eq!(config.buffer_size(), 4 * 1024 * 1024);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = ClusterConfig::builder("token")
            .stop_on_fatal(true)
            .handle_reshard(false)
            .buffer_size(1024)
            .build();

        assert!(config.stop_on_fatal());
        assert!(!config.handle_reshard());
        assert_eq!(config.buffer_size(), 1024);
    }
}
