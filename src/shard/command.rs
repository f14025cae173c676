//! Commands sent to a shard over its `communicationCh`.

use serde_json::Value;

/// A command delivered to a running shard from outside its own loop.
///
/// `Connect` is internal: the runtime sends it to itself (staggered by the
/// coordinator) to trigger the initial websocket attach. Any other variant
/// models a user-originated control event.
#[derive(Clone, Debug, PartialEq)]
pub enum ShardCommand {
    /// Trigger the shard's initial (or next) websocket attach.
    Connect,
    /// An arbitrary payload a caller asked to have sent over the gateway
    /// websocket.
    ///
    /// Design note (open question): the teacher's own command channel drops
    /// everything but `Connect` rather than forwarding it — callers can
    /// observe the command being accepted but never see it reach the
    /// gateway. This implementation preserves that behavior rather than
    /// inventing delivery semantics the original never had: see
    /// [`super::runtime::ShardRuntime`]'s communication-channel branch.
    Raw(Value),
}
