//! The Shard Runtime: binds one [`ShardState`] machine to its websocket,
//! heartbeat timer, control channel, and stop channel.
//!
//! Each call to [`ShardRuntime::step_once`] drives exactly one iteration of
//! the shard's main loop: wait for the highest-priority ready channel, run
//! the event (if any) through [`step`], and execute the resulting effects.
//! The coordinator owns one [`ShardRuntime`] per live shard and polls it in
//! a loop; `step_once` returning `None` is this crate's way of expressing
//! an empty shard slot — the shard has been torn down for good and the
//! coordinator should stop polling it.
//!
//! The teacher's own shard loop (`gateway/src/shard/processor/impl.rs`'s
//! `ShardProcessor::run`) is a plain sequential loop with no `select!`; the
//! biased priority ordering here is this crate's own answer to running
//! stop, communication, heartbeat, and event sources cooperatively on one
//! task, in the shape `twilight-gateway-queue/tests/common/mod.rs` uses a
//! `biased tokio::select!` for elsewhere in the same repo.

use super::{
    adapter::{self, Websocket},
    command::ShardCommand,
    config::ShardConfig,
    heartbeat::{heartbeat_channel, run_heartbeat_ticker, HeartbeatReceiver, HeartbeatSender, Latency},
    state::{step, Effect, ShardEvent, ShardState, StepConfig},
};
use crate::model::{HeartbeatFrame, IdentifyFrame, IdentifyInfo, IdentifyProperties, ResumeFrame, ResumeInfo, CLIENT_NAME};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A bot-level signal a shard surfaces to its coordinator.
///
/// Distinct from [`Effect`]: effects are handled entirely within the shard's
/// own loop, while a `BotEffect` crosses into the coordinator's loop.
#[derive(Clone, Debug, PartialEq)]
pub enum BotEffect {
    /// A gateway event was dispatched; forward it to the output channel.
    DiscordEvent {
        /// The dispatch's `t` field, e.g. `"MESSAGE_CREATE"`.
        event_type: Box<str>,
        /// The dispatch's opaque `d` field.
        payload: Value,
    },
    /// The shard was told to re-shard; the coordinator owns the actual
    /// re-sharding sequence.
    ReShard,
    /// This shard hit a fatal close code under `StopOnFatal`; the
    /// coordinator must stop every shard and shut the bot down.
    Fatal {
        /// The fatal close code.
        code: u16,
        /// The close message, if any.
        message: Option<Box<str>>,
    },
}

/// The external handle a coordinator keeps for a shard it's running.
///
/// The [`ShardRuntime`] itself is driven from inside the coordinator's own
/// task; this handle is what lets the coordinator talk to it from the
/// outside without holding a borrow across `.await` points.
#[derive(Debug)]
pub struct ShardHandle {
    /// Sends commands (`Connect`, raw payloads) to the shard's own loop.
    pub communication: mpsc::Sender<ShardCommand>,
    /// Fires the shard's terminal shutdown. `None` once already taken.
    pub stop: Option<oneshot::Sender<()>>,
    /// A stable channel for injecting synthetic events (the `SendDebugEvent`
    /// command) that survives websocket reconnects, unlike the adapter's own
    /// `eventCh`, which is replaced on every attach.
    pub debug: mpsc::Sender<ShardEvent>,
}

/// Drives one shard's state machine, websocket, and timers.
pub struct ShardRuntime {
    config: ShardConfig,
    step_config: StepConfig,
    state: ShardState,
    websocket: Option<Websocket>,
    event_rx: mpsc::Receiver<ShardEvent>,
    debug_rx: mpsc::Receiver<ShardEvent>,
    communication_rx: mpsc::Receiver<ShardCommand>,
    stop_rx: oneshot::Receiver<()>,
    heartbeat_tx: Option<HeartbeatSender>,
    heartbeat_rx: Option<HeartbeatReceiver>,
    latency: Latency,
}

impl ShardRuntime {
    /// Build a fresh shard runtime, idle until its first `Connect` command.
    pub fn new(config: ShardConfig) -> (Self, ShardHandle) {
        let (communication_tx, communication_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (debug_tx, debug_rx) = mpsc::channel(16);
        // No websocket exists yet; this placeholder receiver is simply never
        // ready until the first `attach` replaces it.
        let (_idle_tx, event_rx) = mpsc::channel(1);

        let state = ShardState::new(config.shard()[0], config.shard()[1]);
        let step_config = StepConfig { stop_on_fatal: config.stop_on_fatal() };

        let runtime = Self {
            config,
            step_config,
            state,
            websocket: None,
            event_rx,
            debug_rx,
            communication_rx,
            stop_rx,
            heartbeat_tx: None,
            heartbeat_rx: None,
            latency: Latency::default(),
        };

        let handle = ShardHandle {
            communication: communication_tx,
            stop: Some(stop_tx),
            debug: debug_tx,
        };

        (runtime, handle)
    }

    /// This shard's `[id, count]` pair.
    pub const fn shard(&self) -> [u64; 2] {
        self.config.shard()
    }

    /// Round-trip latency bookkeeping for this shard's heartbeats.
    pub fn latency(&self) -> &Latency {
        &self.latency
    }

    /// Where this shard currently sits, for display/metrics.
    pub fn state(&self) -> &ShardState {
        &self.state
    }

    /// Drive one iteration of the main loop.
    ///
    /// Returns `Some(bot_effects)` (possibly empty) to keep running, or
    /// `None` once the stop channel has fired: the shard is gone and the
    /// caller must stop polling it.
    pub async fn step_once(&mut self) -> Option<Vec<BotEffect>> {
        let heartbeat_tick = next_heartbeat_tick(&mut self.heartbeat_rx);

        tokio::select! {
            biased;

            _ = &mut self.stop_rx => {
                self.handle_stop();
                None
            }

            command = self.communication_rx.recv() => {
                Some(match command {
                    Some(command) => self.handle_command(command).await,
                    None => Vec::new(),
                })
            }

            acked = heartbeat_tick => {
                Some(self.handle_heartbeat_tick(acked).await)
            }

            event = self.event_rx.recv() => {
                Some(match event {
                    Some(event) => self.handle_event(event).await,
                    None => Vec::new(),
                })
            }

            event = self.debug_rx.recv() => {
                Some(match event {
                    Some(event) => self.handle_event(event).await,
                    None => Vec::new(),
                })
            }
        }
    }

    fn handle_stop(&mut self) {
        self.heartbeat_tx = None;
        self.heartbeat_rx = None;
        self.communication_rx.close();

        if let Some(ws) = self.websocket.take() {
            ws.close();
        }
    }

    async fn handle_command(&mut self, command: ShardCommand) -> Vec<BotEffect> {
        match command {
            ShardCommand::Connect => {
                self.attach().await;
            }
            ShardCommand::Raw(_) => {
                tracing::debug!(shard = %self.state, "dropping non-connect command");
            }
        }

        Vec::new()
    }

    /// `acked` is whatever the watch channel produced; `Err` only happens if
    /// the sender side was dropped out from under us, which `StartHeartbeat`
    /// never does while the ticker is running.
    async fn handle_heartbeat_tick(&mut self, acked: Result<(), ()>) -> Vec<BotEffect> {
        if acked.is_err() {
            return Vec::new();
        }

        if !self.state.ack {
            tracing::warn!(shard = %self.state, "zombie connection detected, reconnecting");
            self.heartbeat_tx = None;
            self.heartbeat_rx = None;

            if let Some(ws) = self.websocket.take() {
                ws.close();
            }

            self.attach().await;
            return Vec::new();
        }

        if let Some(ws) = &self.websocket {
            let frame = HeartbeatFrame::new(self.state.seq);

            match serde_json::to_string(&frame) {
                Ok(text) => ws.send_text(text),
                Err(source) => tracing::warn!(shard = %self.state, %source, "failed to encode heartbeat frame"),
            }
        }

        self.latency.record_sent();
        self.state.ack = false;

        Vec::new()
    }

    async fn handle_event(&mut self, event: ShardEvent) -> Vec<BotEffect> {
        let ack_before = self.state.ack;
        let (next_state, effects) = step(self.state.clone(), event, &self.step_config);
        self.state = next_state;

        if !ack_before && self.state.ack {
            self.latency.record_received();
        }

        let mut bot_effects = Vec::with_capacity(effects.len());

        for effect in effects {
            if let Some(bot_effect) = self.apply_effect(effect).await {
                bot_effects.push(bot_effect);
            }
        }

        bot_effects
    }

    async fn apply_effect(&mut self, effect: Effect) -> Option<BotEffect> {
        match effect {
            Effect::Identify => {
                self.send_identify();
                None
            }
            Effect::Resume => {
                // Deliberately reopens the websocket even though the
                // `Connect` that triggered this just attached one: `Resume`
                // only ever fires in response to the runtime's own synthetic
                // `Connect`, so the socket it reopens is the one that
                // `Connect` just opened. See the module docs on this file.
                self.attach().await;
                self.send_resume();
                None
            }
            Effect::StartHeartbeat(interval_ms) => {
                self.start_heartbeat(interval_ms);
                None
            }
            Effect::SendHeartbeat => {
                self.queue_heartbeat_token();
                None
            }
            Effect::Reconnect => {
                self.reconnect().await;
                None
            }
            Effect::ReShard => Some(BotEffect::ReShard),
            Effect::Disconnect => Some(BotEffect::Fatal {
                code: self.state.stop_code.unwrap_or(0),
                message: self.state.disconnect_msg.clone(),
            }),
            Effect::Error(message) => {
                tracing::warn!(shard = %self.state, %message, "shard error");
                None
            }
            Effect::SendDiscordEvent { event_type, payload } => {
                Some(BotEffect::DiscordEvent { event_type, payload })
            }
        }
    }

    fn send_identify(&self) {
        let Some(ws) = &self.websocket else {
            tracing::warn!(shard = %self.state, "identify effect with no open websocket");
            return;
        };

        let frame = IdentifyFrame::new(IdentifyInfo {
            token: self.config.token().into(),
            properties: IdentifyProperties::new(CLIENT_NAME),
            compress: false,
            large_threshold: 50,
            shard: self.config.shard(),
            intents: Some(self.config.intents()),
        });

        match serde_json::to_string(&frame) {
            Ok(text) => ws.send_text(text),
            Err(source) => tracing::warn!(shard = %self.state, %source, "failed to encode identify frame"),
        }
    }

    fn send_resume(&self) {
        let Some(ws) = &self.websocket else {
            tracing::warn!(shard = %self.state, "resume effect with no open websocket");
            return;
        };

        let (Some(session_id), Some(seq)) = (self.state.session_id.clone(), self.state.seq) else {
            tracing::warn!(shard = %self.state, "resume effect fired without a resumable session");
            return;
        };

        let frame = ResumeFrame::new(ResumeInfo {
            token: self.config.token().into(),
            session_id,
            seq,
        });

        match serde_json::to_string(&frame) {
            Ok(text) => ws.send_text(text),
            Err(source) => tracing::warn!(shard = %self.state, %source, "failed to encode resume frame"),
        }
    }

    fn start_heartbeat(&mut self, interval_ms: u64) {
        let (tx, rx) = heartbeat_channel();
        // A fresh `watch` receiver counts its initial value as already seen,
        // so `changed()` would otherwise not resolve until the ticker's
        // first sleep elapses. Send once more immediately so the first
        // heartbeat fires right away, per the effect's own contract.
        let next = tx.borrow().wrapping_add(1);
        let _ = tx.send(next);
        tokio::spawn(run_heartbeat_ticker(Duration::from_millis(interval_ms), tx.clone()));
        self.heartbeat_tx = Some(tx);
        self.heartbeat_rx = Some(rx);
        self.state.ack = true;
    }

    fn queue_heartbeat_token(&self) {
        let Some(tx) = &self.heartbeat_tx else {
            return;
        };

        let next = tx.borrow().wrapping_add(1);
        let _ = tx.send(next);
    }

    async fn reconnect(&mut self) {
        if let Some(code) = self.state.stop_code {
            tracing::info!(
                shard = %self.state,
                code,
                invalid_session = self.state.invalid_session,
                "reconnecting",
            );
        }

        self.heartbeat_tx = None;
        self.heartbeat_rx = None;
        self.state.stop_code = None;
        self.state.disconnect_msg = None;

        if let Some(ws) = self.websocket.take() {
            ws.close();
        }

        self.attach().await;
    }

    /// Open a fresh websocket, replacing both the handle and the `eventCh`
    /// the adapter pushes onto.
    async fn attach(&mut self) {
        let (event_tx, event_rx) = mpsc::channel(100);

        match adapter::connect(self.config.buffer_size(), self.config.gateway_url(), event_tx).await {
            Ok(websocket) => {
                self.websocket = Some(websocket);
                self.event_rx = event_rx;
            }
            Err(source) => {
                tracing::warn!(shard = %self.state, %source, "failed to open websocket");
                self.websocket = None;
            }
        }
    }
}

/// Await the next heartbeat tick, or never resolve if no heartbeat timer is
/// running yet (before the first `Hello`, or after a zombie-triggered
/// teardown). Modeled as a future rather than a `select!` guard so the
/// branch composes cleanly with `biased` ordering.
async fn next_heartbeat_tick(rx: &mut Option<HeartbeatReceiver>) -> Result<(), ()> {
    match rx {
        Some(rx) => rx.changed().await.map_err(|_| ()),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::config::ShardConfig;
    use std::sync::Arc;

    fn config(stop_on_fatal: bool) -> ShardConfig {
        ShardConfig::new(
            Arc::from("token"),
            crate::model::Intents::empty(),
            0,
            1,
            Arc::from("ws://127.0.0.1:1/not-a-real-gateway"),
            4 * 1024 * 1024,
            stop_on_fatal,
        )
    }

    #[tokio::test]
    async fn stop_channel_wins_over_everything_else() {
        let (mut runtime, handle) = ShardRuntime::new(config(false));
        handle.stop.unwrap().send(()).unwrap();

        assert_eq!(runtime.step_once().await, None);
    }

    #[tokio::test]
    async fn non_connect_commands_are_dropped_not_forwarded() {
        let (mut runtime, handle) = ShardRuntime::new(config(false));

        handle
            .communication
            .send(ShardCommand::Raw(serde_json::json!({"op": 1})))
            .await
            .unwrap();

        let effects = runtime.step_once().await.expect("still running");
        assert!(effects.is_empty());
        assert!(runtime.websocket.is_none());
    }

    #[tokio::test]
    async fn debug_events_surface_as_bot_effects() {
        let (mut runtime, handle) = ShardRuntime::new(config(false));

        handle
            .debug
            .send(ShardEvent::Debug(vec![Effect::SendDiscordEvent {
                event_type: "MESSAGE_CREATE".into(),
                payload: serde_json::json!({}),
            }]))
            .await
            .unwrap();

        let effects = runtime.step_once().await.expect("still running");
        assert_eq!(
            effects,
            vec![BotEffect::DiscordEvent {
                event_type: "MESSAGE_CREATE".into(),
                payload: serde_json::json!({}),
            }]
        );
    }

    #[tokio::test]
    async fn fatal_disconnect_surfaces_as_bot_fatal_effect() {
        let (mut runtime, handle) = ShardRuntime::new(config(true));

        handle
            .debug
            .send(ShardEvent::Debug(vec![]))
            .await
            .unwrap();
        // Drain the no-op debug event so the state is clean, then drive a
        // real disconnect through the reducer via another debug injection
        // carrying the effect directly — exercising `apply_effect` without
        // a live socket.
        runtime.step_once().await.expect("still running");

        runtime.state.stop_code = Some(4004);
        runtime.state.disconnect_msg = Some("auth".into());

        handle
            .debug
            .send(ShardEvent::Debug(vec![Effect::Disconnect]))
            .await
            .unwrap();

        let effects = runtime.step_once().await.expect("still running");
        assert_eq!(
            effects,
            vec![BotEffect::Fatal {
                code: 4004,
                message: Some("auth".into()),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_heartbeat_tick_without_an_ack_reconnects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts two handshakes: the shard's initial connect, then the
        // zombie-triggered reconnect.
        tokio::spawn(async move {
            for _ in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let _ = tokio_tungstenite::accept_async(stream).await;
            }
        });

        let shard_config = ShardConfig::new(
            Arc::from("token"),
            crate::model::Intents::empty(),
            0,
            1,
            Arc::from(format!("ws://{addr}")),
            4 * 1024 * 1024,
            false,
        );
        let (mut runtime, _handle) = ShardRuntime::new(shard_config);

        runtime.attach().await;
        assert!(runtime.websocket.is_some());

        runtime.start_heartbeat(60_000);
        assert!(runtime.state.ack);

        // First tick: heartbeats out, marks itself unacked.
        runtime.handle_heartbeat_tick(Ok(())).await;
        assert!(!runtime.state.ack);
        assert_eq!(runtime.latency.heartbeats(), 1);
        assert!(runtime.heartbeat_tx.is_some());

        // Second tick with still no ack in between: a zombie connection,
        // the runtime must tear down the timer and reconnect rather than
        // heartbeat again.
        runtime.handle_heartbeat_tick(Ok(())).await;
        assert!(runtime.heartbeat_tx.is_none());
        assert_eq!(runtime.latency.heartbeats(), 1);
        assert!(runtime.websocket.is_some());
    }
}
