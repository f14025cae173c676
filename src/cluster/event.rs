//! The shapes crossing the Coordinator's external boundary.

use crate::shard::ShardEvent;
use serde_json::Value;

/// An event placed onto the bot's output channel.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputEvent {
    /// Any dispatched gateway event, `READY` included.
    DiscordEvent {
        /// Which shard dispatched the event.
        shard_id: u64,
        /// The dispatch's `t` field, e.g. `"MESSAGE_CREATE"`.
        event_type: Box<str>,
        /// The dispatch's opaque `d` field.
        payload: Value,
    },
    /// Emitted once every shard in the initial (or re-sharded) startup
    /// window has had its staggered `Connect` scheduled.
    ConnectedAllShards,
    /// A re-shard was initiated; emitted regardless of `HandleReShard`.
    ReShard,
}

/// An externally-originated command delivered to the Coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum CommunicationCommand {
    /// Stop every shard; the bot shuts down as their loops drain to `∅`.
    Disconnect,
    /// Inject a synthetic transport event directly onto one shard's event
    /// channel, bypassing the websocket. Test-only.
    SendDebugEvent {
        /// Which shard to inject the event into.
        shard_id: u64,
        /// The event to inject.
        event: ShardEvent,
    },
}
