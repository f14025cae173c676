//! The shard state machine: a pure reducer from `(ShardState, ShardEvent)` to
//! `(ShardState, Vec<Effect>)`.
//!
//! Nothing in this module performs I/O, blocks, or can fail in a way that
//! stops the reducer from returning: every branch produces a new state and
//! a (possibly empty) list of effects for the [`super::runtime::ShardRuntime`]
//! to execute. This is what makes the transition table in the module docs
//! exhaustively testable without a live gateway connection.

use crate::model::{self, Hello, Payload, Ready};
use serde_json::Value;
use std::fmt;

/// An event delivered to a shard's state machine.
///
/// The first four variants mirror the [Websocket Event Adapter][adapter]'s
/// callbacks one-for-one. [`ShardEvent::Debug`] is a synthetic event with no
/// transport equivalent: it lets tests (and [`crate::cluster`]'s
/// `SendDebugEvent` command) inject effects directly without round-tripping
/// through JSON.
///
/// [adapter]: super::adapter
#[derive(Clone, Debug, PartialEq)]
pub enum ShardEvent {
    /// The websocket transport finished connecting.
    Connect,
    /// The websocket transport closed.
    Disconnect {
        /// The close code the transport reported.
        code: u16,
        /// The close reason the transport reported, if any.
        msg: Option<Box<str>>,
    },
    /// The websocket transport reported an error.
    Error {
        /// A description of the transport error.
        message: Box<str>,
    },
    /// A text message was received over the websocket.
    Message {
        /// The raw message text, not yet decoded.
        text: Box<str>,
    },
    /// Test-only: emit the given effects verbatim, bypassing decode/dispatch.
    Debug(Vec<Effect>),
}

/// A side effect produced by [`step`] for the shard runtime to execute.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Send an `Identify` frame.
    Identify,
    /// Send a `Resume` frame (reopening the websocket first).
    Resume,
    /// Start the heartbeat timer at the given interval, in milliseconds.
    StartHeartbeat(u64),
    /// Place a heartbeat token on the heartbeat channel.
    SendHeartbeat,
    /// Tear down the current websocket and open a fresh one.
    Reconnect,
    /// Surface a re-shard request to the coordinator.
    ReShard,
    /// Tear the shard down for good; surfaced to the coordinator so it can
    /// shut the whole bot down when `StopOnFatal` is set.
    Disconnect,
    /// Log-and-continue; never changes state.
    Error(String),
    /// Forward a dispatched event to the output channel.
    SendDiscordEvent {
        /// The dispatch's `t` field, e.g. `"MESSAGE_CREATE"`.
        event_type: Box<str>,
        /// The dispatch's opaque `d` field.
        payload: Value,
    },
}

/// Per-process flags the reducer reads at each relevant decision point.
///
/// Kept as an explicit parameter rather than global mutable state, per the
/// design note on dynamic process-wide flags: flip it between calls (or
/// per-test) instead of mutating a shared atomic.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepConfig {
    /// If true, a fatal close code disconnects instead of reconnecting.
    pub stop_on_fatal: bool,
}

/// The pure, serializable half of a shard's state.
///
/// This excludes anything that can't be represented without I/O — the open
/// websocket handle, the channels — which live on
/// [`super::runtime::ShardRuntime`] instead.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardState {
    /// This shard's index in `[0, count)`.
    pub id: u64,
    /// The total shard count currently in use.
    pub count: u64,
    /// Present after a `READY` dispatch; cleared on invalid-session.
    pub session_id: Option<Box<str>>,
    /// The most recent dispatch's sequence number; cleared on
    /// invalid-session.
    pub seq: Option<u64>,
    /// Liveness flag: true once the server has acknowledged the most
    /// recently sent heartbeat.
    pub ack: bool,
    /// The close code of the most recent disconnect, if one is pending.
    pub stop_code: Option<u16>,
    /// The close message of the most recent disconnect, if one is pending.
    pub disconnect_msg: Option<Box<str>>,
    /// Set on opcode 9; consumed by the reconnect effect for logging.
    pub invalid_session: bool,
}

impl ShardState {
    /// A freshly created shard, as the coordinator constructs at bot start
    /// and at re-shard.
    pub const fn new(id: u64, count: u64) -> Self {
        Self {
            id,
            count,
            session_id: None,
            seq: None,
            ack: false,
            stop_code: None,
            disconnect_msg: None,
            invalid_session: false,
        }
    }

    /// Invariant 2: resume eligibility is exactly
    /// `sessionId ≠ ∅ ∧ seq ≠ ∅ ∧ stopCode ∉ NewSessionStopCodes`.
    pub fn resume_eligible(&self) -> bool {
        self.session_id.is_some()
            && self.seq.is_some()
            && !self
                .stop_code
                .is_some_and(model::is_new_session_stop_code)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {}/{}", self.id, self.count)
    }
}

/// Error decoding a gateway text message into a [`Payload`].
///
/// This is surfaced as an [`Effect::Error`] rather than failing [`step`]:
/// per invariant 1, the reducer is total.
fn decode_error(context: &str, source: &serde_json::Error) -> Effect {
    Effect::Error(format!("{context}: {source}"))
}

/// Advance a shard's state machine by one event.
///
/// This function is total (invariant 1): every `(state, event)` pair
/// produces a new state and a list of effects, never a panic or an error
/// return. Parse failures on malformed gateway payloads become
/// [`Effect::Error`] instead.
pub fn step(mut state: ShardState, event: ShardEvent, config: &StepConfig) -> (ShardState, Vec<Effect>) {
    match event {
        ShardEvent::Connect => {
            let effects = if state.resume_eligible() {
                vec![Effect::Resume]
            } else {
                vec![Effect::Identify]
            };
            (state, effects)
        }
        ShardEvent::Disconnect { code, msg } => {
            state.stop_code = Some(code);
            state.disconnect_msg = msg;

            let effects = if model::is_reshard_stop_code(code) {
                vec![Effect::ReShard]
            } else if config.stop_on_fatal && model::is_fatal_stop_code(code) {
                vec![Effect::Disconnect]
            } else {
                vec![Effect::Reconnect]
            };

            (state, effects)
        }
        ShardEvent::Error { message } => (state, vec![Effect::Error(message.to_string())]),
        ShardEvent::Message { text } => step_message(state, &text),
        ShardEvent::Debug(effects) => (state, effects),
    }
}

fn step_message(mut state: ShardState, text: &str) -> (ShardState, Vec<Effect>) {
    let payload: Payload = match serde_json::from_str(text) {
        Ok(payload) => payload,
        Err(source) => return (state, vec![decode_error("decoding gateway payload", &source)]),
    };

    match payload.op_code() {
        model::OpCode::Hello => match serde_json::from_value::<Hello>(payload.d) {
            Ok(hello) => (state, vec![Effect::StartHeartbeat(hello.heartbeat_interval)]),
            Err(source) => (state, vec![decode_error("decoding hello payload", &source)]),
        },
        model::OpCode::Heartbeat => (state, vec![Effect::SendHeartbeat]),
        model::OpCode::HeartbeatAck => {
            state.ack = true;
            (state, Vec::new())
        }
        model::OpCode::Reconnect => (state, vec![Effect::Reconnect]),
        model::OpCode::InvalidSession => {
            state.session_id = None;
            state.seq = None;
            state.invalid_session = true;
            (state, vec![Effect::Reconnect])
        }
        model::OpCode::EventDispatch => step_dispatch(state, payload.s, payload.t, payload.d),
        model::OpCode::Other(_) => (state, Vec::new()),
    }
}

fn step_dispatch(
    mut state: ShardState,
    seq: Option<u64>,
    event_type: Option<String>,
    payload: Value,
) -> (ShardState, Vec<Effect>) {
    if let Some(seq) = seq {
        state.seq = Some(seq);
    }

    let Some(event_type) = event_type else {
        return (state, Vec::new());
    };

    if event_type == "READY" {
        match serde_json::from_value::<Ready>(payload.clone()) {
            Ok(ready) => state.session_id = Some(ready.session_id),
            Err(source) => {
                return (
                    state,
                    vec![decode_error("decoding ready payload", &source)],
                )
            }
        }
    }

    (
        state,
        vec![Effect::SendDiscordEvent {
            event_type: event_type.into_boxed_str(),
            payload,
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(stop_on_fatal: bool) -> StepConfig {
        StepConfig { stop_on_fatal }
    }

    /// S1 — fresh connect.
    #[test]
    fn fresh_connect_sequence() {
        let state = ShardState::new(0, 1);

        let (state, effects) = step(state, ShardEvent::Connect, &cfg(false));
        assert_eq!(effects, vec![Effect::Identify]);

        let (state, effects) = step(
            state,
            ShardEvent::Message {
                text: r#"{"op":10,"d":{"heartbeat_interval":41250}}"#.into(),
            },
            &cfg(false),
        );
        assert_eq!(effects, vec![Effect::StartHeartbeat(41250)]);

        let (state, effects) = step(
            state,
            ShardEvent::Message {
                text: r#"{"op":0,"t":"READY","s":1,"d":{"session_id":"abc"}}"#.into(),
            },
            &cfg(false),
        );
        assert_eq!(
            effects,
            vec![Effect::SendDiscordEvent {
                event_type: "READY".into(),
                payload: json!({"session_id": "abc"}),
            }]
        );
        assert_eq!(state.session_id.as_deref(), Some("abc"));
        assert_eq!(state.seq, Some(1));

        let (state, effects) = step(
            state,
            ShardEvent::Message {
                text: r#"{"op":11}"#.into(),
            },
            &cfg(false),
        );
        assert!(effects.is_empty());
        assert!(state.ack);
        assert_eq!(state.session_id.as_deref(), Some("abc"));
        assert_eq!(state.seq, Some(1));
    }

    /// S2 — resume path.
    #[test]
    fn resume_after_unclassified_disconnect() {
        let mut state = ShardState::new(0, 1);
        state.session_id = Some("abc".into());
        state.seq = Some(42);

        let (state, effects) = step(
            state,
            ShardEvent::Disconnect {
                code: 1006,
                msg: Some("network".into()),
            },
            &cfg(false),
        );
        assert_eq!(effects, vec![Effect::Reconnect]);
        assert_eq!(state.stop_code, Some(1006));

        // The runtime's Reconnect handler clears stop_code before the
        // synthetic Connect that follows; see runtime.rs.
        let mut state = state;
        state.stop_code = None;

        let (_, effects) = step(state, ShardEvent::Connect, &cfg(false));
        assert_eq!(effects, vec![Effect::Resume]);
    }

    /// S3 — invalid session.
    #[test]
    fn invalid_session_forces_identify() {
        let mut state = ShardState::new(0, 1);
        state.session_id = Some("abc".into());
        state.seq = Some(42);

        let (state, effects) = step(
            state,
            ShardEvent::Message {
                text: r#"{"op":9,"d":false}"#.into(),
            },
            &cfg(false),
        );
        assert_eq!(effects, vec![Effect::Reconnect]);
        assert!(state.invalid_session);
        assert!(state.session_id.is_none());
        assert!(state.seq.is_none());

        let (_, effects) = step(state, ShardEvent::Connect, &cfg(false));
        assert_eq!(effects, vec![Effect::Identify]);
    }

    /// S5 — fatal stop code, both configurations.
    #[test]
    fn fatal_stop_code_respects_stop_on_fatal() {
        let state = ShardState::new(0, 1);

        let (_, effects) = step(
            state.clone(),
            ShardEvent::Disconnect {
                code: 4004,
                msg: Some("auth".into()),
            },
            &cfg(true),
        );
        assert_eq!(effects, vec![Effect::Disconnect]);

        let (_, effects) = step(
            state,
            ShardEvent::Disconnect {
                code: 4004,
                msg: Some("auth".into()),
            },
            &cfg(false),
        );
        assert_eq!(effects, vec![Effect::Reconnect]);
    }

    #[test]
    fn reshard_stop_code_always_reshards_regardless_of_stop_on_fatal() {
        let state = ShardState::new(0, 2);

        let (_, effects) = step(
            state,
            ShardEvent::Disconnect {
                code: 4011,
                msg: None,
            },
            &cfg(true),
        );
        assert_eq!(effects, vec![Effect::ReShard]);
    }

    /// Invariant 6: seq is non-decreasing within a session.
    #[test]
    fn sequence_is_non_decreasing_within_a_session() {
        let mut state = ShardState::new(0, 1);
        let mut last_seq = 0;

        for s in [1, 2, 2, 5, 9] {
            let (next, _) = step(
                state,
                ShardEvent::Message {
                    text: format!(r#"{{"op":0,"t":"MESSAGE_CREATE","s":{s},"d":{{}}}}"#),
                },
                &cfg(false),
            );
            let seq = next.seq.unwrap();
            assert!(seq >= last_seq);
            last_seq = seq;
            state = next;
        }
    }

    #[test]
    fn malformed_message_becomes_error_effect_not_panic() {
        let state = ShardState::new(0, 1);
        let (state, effects) = step(
            state,
            ShardEvent::Message {
                text: "not json".into(),
            },
            &cfg(false),
        );
        assert!(matches!(effects.as_slice(), [Effect::Error(_)]));
        assert_eq!(state, ShardState::new(0, 1));
    }

    #[test]
    fn debug_effects_pass_through_verbatim() {
        let state = ShardState::new(0, 1);
        let (_, effects) = step(
            state,
            ShardEvent::Debug(vec![Effect::SendHeartbeat, Effect::Identify]),
            &cfg(false),
        );
        assert_eq!(effects, vec![Effect::SendHeartbeat, Effect::Identify]);
    }
}
