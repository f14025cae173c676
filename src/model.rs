//! Gateway payload shapes.
//!
//! These are deliberately minimal: the core only needs to read the fields
//! it acts on (`op`, `s`, `t`, and `session_id` out of `READY`). Everything
//! else in a dispatch's `d` field is forwarded to the output channel as
//! opaque JSON, since interpreting the full Discord resource model is the
//! user-facing event bus's job, not the gateway core's.

use serde::{Deserialize, Serialize};

/// Gateway opcodes used by the core.
///
/// Opcodes the gateway can send that the core has no use for (5 Voice State
/// Update, 8 Request Guild Members, etc. going the other way) aren't
/// represented; this is the inbound subset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum OpCode {
    /// An event has been dispatched.
    EventDispatch,
    /// A heartbeat is requested or being acknowledged.
    Heartbeat,
    /// The client should reconnect and attempt to resume.
    Reconnect,
    /// The session has been invalidated.
    InvalidSession,
    /// Initial handshake with heartbeat interval.
    Hello,
    /// A heartbeat was acknowledged.
    HeartbeatAck,
    /// An opcode the core doesn't dispatch on (e.g. outbound-only or
    /// unrecognized codes).
    Other(u8),
}

impl OpCode {
    const fn from_u8(op: u8) -> Self {
        match op {
            0 => Self::EventDispatch,
            1 => Self::Heartbeat,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => Self::Other(other),
        }
    }
}

/// A decoded gateway message, prior to opcode-specific dispatch.
#[derive(Clone, Debug, Deserialize)]
pub struct Payload {
    /// The raw gateway opcode; see [`Self::op_code`] for the classified form.
    pub op: u8,
    /// The opcode-specific data. Opaque until dispatched by [`OpCode`].
    #[serde(default)]
    pub d: serde_json::Value,
    /// The sequence number, present only on dispatch payloads.
    #[serde(default)]
    pub s: Option<u64>,
    /// The dispatched event's type name, present only on dispatch payloads.
    #[serde(default)]
    pub t: Option<String>,
}

impl Payload {
    /// Classify this payload's raw `op` field into an [`OpCode`].
    pub fn op_code(&self) -> OpCode {
        OpCode::from_u8(self.op)
    }
}

/// The `d` payload of a `Hello` (opcode 10).
#[derive(Clone, Debug, Deserialize)]
pub struct Hello {
    /// Milliseconds between required heartbeats.
    pub heartbeat_interval: u64,
}

/// The minimal fields of a `READY` dispatch the state machine reads.
///
/// The full `READY` payload carries guild stubs, application info, and more;
/// none of that is acted on here, so it's left in the opaque JSON forwarded
/// to the output channel alongside this typed extraction.
#[derive(Clone, Debug, Deserialize)]
pub struct Ready {
    /// The session ID a subsequent `Resume` must present.
    pub session_id: Box<str>,
    /// The gateway version the session negotiated.
    #[serde(default)]
    pub v: Option<u8>,
}

/// Outbound heartbeat frame: `{"op":1,"d":<seq or null>}`.
#[derive(Clone, Debug, Serialize)]
pub struct HeartbeatFrame {
    /// Always `1`.
    pub op: u8,
    /// The shard's last-seen sequence number, or `None` before any dispatch.
    pub d: Option<u64>,
}

impl HeartbeatFrame {
    /// Build a heartbeat frame carrying the given sequence number.
    pub const fn new(seq: Option<u64>) -> Self {
        Self { op: 1, d: seq }
    }
}

/// Properties sent as part of `Identify`.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyProperties {
    /// Always `"linux"`.
    #[serde(rename = "$os")]
    pub os: &'static str,
    /// The embedding application's client name.
    #[serde(rename = "$browser")]
    pub browser: &'static str,
    /// The embedding application's client name, repeated.
    #[serde(rename = "$device")]
    pub device: &'static str,
}

impl IdentifyProperties {
    /// Build the properties block, using `client_name` for both `$browser`
    /// and `$device`.
    pub const fn new(client_name: &'static str) -> Self {
        Self {
            os: "linux",
            browser: client_name,
            device: client_name,
        }
    }
}

/// The `d` payload of an `Identify` frame.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyInfo {
    /// The bot token to authenticate with.
    pub token: Box<str>,
    /// Client identification properties.
    pub properties: IdentifyProperties,
    /// Always `false`; this crate never requests payload compression.
    pub compress: bool,
    /// Number of members a guild must have before presences are omitted.
    pub large_threshold: u64,
    /// This shard's `[id, count]` pair.
    pub shard: [u64; 2],
    /// The intents bitmask, omitted entirely when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intents: Option<Intents>,
}

/// Outbound identify frame: `{"op":2,"d":{...}}`.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyFrame {
    /// Always `2`.
    pub op: u8,
    /// The identify payload.
    pub d: IdentifyInfo,
}

impl IdentifyFrame {
    /// Build an identify frame carrying `d`.
    pub fn new(d: IdentifyInfo) -> Self {
        Self { op: 2, d }
    }
}

/// The `d` payload of a `Resume` frame.
#[derive(Clone, Debug, Serialize)]
pub struct ResumeInfo {
    /// The bot token to authenticate with.
    pub token: Box<str>,
    /// The session ID being resumed.
    pub session_id: Box<str>,
    /// The last sequence number observed before the disconnect.
    pub seq: u64,
}

/// Outbound resume frame: `{"op":6,"d":{...}}`.
#[derive(Clone, Debug, Serialize)]
pub struct ResumeFrame {
    /// Always `6`.
    pub op: u8,
    /// The resume payload.
    pub d: ResumeInfo,
}

impl ResumeFrame {
    /// Build a resume frame carrying `d`.
    pub const fn new(d: ResumeInfo) -> Self {
        Self { op: 6, d }
    }
}

bitflags::bitflags! {
    /// Gateway intents, sent as a bitmask on `Identify`.
    ///
    /// The core treats this as an opaque bitmask configured by the
    /// embedding application; it doesn't inspect individual bits.
    #[derive(Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
    }
}

/// A client-provided name used as both the `$browser` and `$device`
/// identify properties.
pub const CLIENT_NAME: &str = "corvid";

/// Close codes after which a resume is impossible; the next attach must
/// identify fresh.
pub const NEW_SESSION_STOP_CODES: &[u16] = &[4003, 4004, 4007, 4009];

/// Close codes that, when `StopOnFatal` is configured, shut the bot down
/// instead of reconnecting.
pub const FATAL_STOP_CODES: &[u16] = &[4001, 4002, 4003, 4004, 4005, 4008, 4010];

/// The close code Discord uses to demand a re-shard.
pub const RESHARD_STOP_CODE: u16 = 4011;

/// Whether `code` is one of [`NEW_SESSION_STOP_CODES`].
pub const fn is_new_session_stop_code(code: u16) -> bool {
    let mut i = 0;
    while i < NEW_SESSION_STOP_CODES.len() {
        if NEW_SESSION_STOP_CODES[i] == code {
            return true;
        }
        i += 1;
    }
    false
}

/// Whether `code` is one of [`FATAL_STOP_CODES`].
pub const fn is_fatal_stop_code(code: u16) -> bool {
    let mut i = 0;
    while i < FATAL_STOP_CODES.len() {
        if FATAL_STOP_CODES[i] == code {
            return true;
        }
        i += 1;
    }
    false
}

/// Whether `code` is [`RESHARD_STOP_CODE`].
pub const fn is_reshard_stop_code(code: u16) -> bool {
    code == RESHARD_STOP_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_code_classification() {
        assert!(is_new_session_stop_code(4004));
        assert!(!is_new_session_stop_code(1006));
        assert!(is_fatal_stop_code(4004));
        assert!(is_fatal_stop_code(4010));
        assert!(!is_fatal_stop_code(4011));
        assert!(is_reshard_stop_code(4011));
    }

    #[test]
    fn payload_decodes_hello() {
        let raw = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let payload: Payload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.op, 10);
        let hello: Hello = serde_json::from_value(payload.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }
}
