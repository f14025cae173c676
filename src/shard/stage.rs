//! Read-only introspection of a shard's lifecycle position.
//!
//! `Stage` is derived from [`super::state::ShardState`] for operators and
//! metrics; it never feeds back into the reducer's decisions. Grounded on
//! the teacher's `gateway/src/shard/stage.rs`.

use super::state::ShardState;

/// Where a shard currently sits in its connect/identify/resume lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// No websocket has been opened yet.
    Idle,
    /// Connected and sending a fresh `Identify`.
    Identifying,
    /// Connected and attempting to `Resume` a prior session.
    Resuming,
    /// Identified or resumed; `READY` or `RESUMED` has been seen.
    Connected,
    /// The websocket closed and a reconnect is pending.
    Disconnected,
}

impl Stage {
    /// Infer the stage from a shard's current state.
    ///
    /// This is a best-effort projection for display purposes: the state
    /// machine doesn't track "currently identifying" versus "currently
    /// connected" as distinct booleans, so this approximates it from the
    /// fields that are tracked.
    pub fn of(state: &ShardState) -> Self {
        if state.stop_code.is_some() {
            Self::Disconnected
        } else if state.session_id.is_some() {
            Self::Connected
        } else if state.seq.is_some() {
            Self::Resuming
        } else {
            Self::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_before_any_session() {
        assert_eq!(Stage::of(&ShardState::new(0, 1)), Stage::Idle);
    }

    #[test]
    fn connected_once_session_id_is_known() {
        let mut state = ShardState::new(0, 1);
        state.session_id = Some("abc".into());
        assert_eq!(Stage::of(&state), Stage::Connected);
    }

    #[test]
    fn disconnected_while_a_stop_code_is_pending() {
        let mut state = ShardState::new(0, 1);
        state.stop_code = Some(1006);
        assert_eq!(Stage::of(&state), Stage::Disconnected);
    }
}
