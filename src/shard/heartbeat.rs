//! The heartbeat channel and latency bookkeeping.
//!
//! The channel itself is a [`tokio::sync::watch`] of a tick counter: `watch`
//! is naturally a sliding, capacity-1 channel — a new `send` overwrites
//! whatever the consumer hasn't yet observed, so a slow consumer can never
//! accumulate a backlog of missed ticks, matching the documented coalescing
//! requirement. The counter (rather than `()`) is what makes each tick
//! register as a change; `watch::Receiver::changed` only resolves when the
//! value differs from the last-observed one.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};
use tokio::sync::watch;

/// The producer side of a shard's heartbeat timer.
pub type HeartbeatSender = watch::Sender<u64>;
/// The consumer side of a shard's heartbeat timer.
pub type HeartbeatReceiver = watch::Receiver<u64>;

/// Create a heartbeat channel.
///
/// A fresh `watch::Receiver` treats its initial value as already observed,
/// so `changed()` won't resolve on it alone — the caller still has to send
/// once more to place the first token the `StartHeartbeat` effect requires:
/// "immediately place one Heartbeat token on it".
pub fn heartbeat_channel() -> (HeartbeatSender, HeartbeatReceiver) {
    watch::channel(1)
}

/// Runs until `tx` has no more receivers, i.e. the channel was closed by a
/// reconnect or shard shutdown (design note: "must terminate deterministically
/// when the channel is closed; do not leak timers across reconnects").
pub async fn run_heartbeat_ticker(interval: Duration, tx: HeartbeatSender) {
    let mut tick: u64 = 1;

    loop {
        tokio::time::sleep(interval).await;

        tick = tick.wrapping_add(1);

        if tx.send(tick).is_err() {
            tracing::debug!("heartbeat channel closed, stopping ticker");
            return;
        }
    }
}

/// The latency of a shard's websocket connection, as observed through
/// heartbeat round trips. Pure observability: it never feeds back into the
/// zombie-detection decision, which is governed solely by the `ack` flag.
#[derive(Clone, Debug, Default)]
pub struct Latency {
    average: Option<Duration>,
    heartbeats: u32,
    recent: VecDeque<Duration>,
    received: Option<Instant>,
    sent: Option<Instant>,
    total: Duration,
}

impl Latency {
    /// The average round-trip time across every heartbeat sent this session.
    pub fn average(&self) -> Option<Duration> {
        self.average
    }

    /// The total number of heartbeats sent this session.
    pub fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    /// The 5 most recent round-trip times, oldest first.
    pub fn recent(&self) -> &VecDeque<Duration> {
        &self.recent
    }

    /// When the last heartbeat acknowledgement was received.
    pub fn received(&self) -> Option<Instant> {
        self.received
    }

    /// When the last heartbeat was sent.
    pub fn sent(&self) -> Option<Instant> {
        self.sent
    }

    /// Record that a heartbeat was just sent on the wire.
    pub fn record_sent(&mut self) {
        self.received = None;
        self.sent = Some(Instant::now());
    }

    /// Record that an acknowledgement for the most recent heartbeat arrived.
    pub fn record_received(&mut self) {
        let now = Instant::now();
        self.received = Some(now);

        let Some(sent) = self.sent else {
            return;
        };

        let rtt = now.saturating_duration_since(sent);
        self.heartbeats += 1;
        self.total += rtt;
        self.average = self.total.checked_div(self.heartbeats);

        if self.recent.len() == 5 {
            self.recent.pop_front();
        }
        self.recent.push_back(rtt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_tracks_recorded_round_trips() {
        let mut latency = Latency::default();
        assert!(latency.average().is_none());

        latency.record_sent();
        latency.record_received();
        assert_eq!(latency.heartbeats(), 1);
        assert!(latency.average().is_some());
    }

    #[test]
    fn recent_keeps_only_the_last_five() {
        let mut latency = Latency::default();
        for _ in 0..8 {
            latency.record_sent();
            latency.record_received();
        }
        assert_eq!(latency.recent().len(), 5);
        assert_eq!(latency.heartbeats(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_sends_and_then_stops_when_receiver_drops() {
        let (tx, mut rx) = heartbeat_channel();
        assert_eq!(*rx.borrow_and_update(), 1);

        let handle = tokio::spawn(run_heartbeat_ticker(Duration::from_millis(10), tx));

        tokio::time::advance(Duration::from_millis(10)).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 2);

        drop(rx);
        // The ticker should observe the closed channel on its next send and
        // return rather than looping forever.
        tokio::time::advance(Duration::from_millis(10)).await;
        handle.await.unwrap();
    }
}
