//! Decides what a screen does with each scan or navigation event.
//!
//! A physical tap on a known tag speaks immediately; opening the same tag
//! from inside the app does not. `RoutingMachine` holds that per-screen
//! state, `ScreenSession` drives one machine from an event stream where a
//! newer event replaces one still waiting behind an outstanding lookup.

use crate::models::{ScanEvent, TagRecord};
use crate::playback::PlaybackSink;
use crate::resolver::{Resolution, TagIdentityResolver};
use crate::store::TagStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenState {
    AwaitingTag,
    Resolved,
    Playing,
    Idle,
    /// Closed after a storage failure; further events are ignored.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    PlayKnownTag { record: TagRecord, auto_play: bool },
    PromptUnknownTag { provisional_id: String },
    Ignore,
    Error { reason: String },
}

pub struct RoutingMachine {
    store: Arc<dyn TagStore>,
    resolver: TagIdentityResolver,
    state: ScreenState,
    auto_played: bool,
    current: Option<TagRecord>,
}

impl RoutingMachine {
    pub fn new(store: Arc<dyn TagStore>, resolver: TagIdentityResolver) -> Self {
        Self {
            store,
            resolver,
            state: ScreenState::AwaitingTag,
            auto_played: false,
            current: None,
        }
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    /// True once this screen has auto-played for the latest scan.
    pub fn auto_play_flag(&self) -> bool {
        self.auto_played
    }

    pub fn current(&self) -> Option<&TagRecord> {
        self.current.as_ref()
    }

    pub async fn route(&mut self, event: &ScanEvent) -> RoutingDecision {
        if self.state == ScreenState::Closed {
            debug!("screen closed, ignoring event");
            return RoutingDecision::Ignore;
        }
        if !event.has_candidate() {
            debug!(origin = ?event.origin, "event carries no tag id");
            return RoutingDecision::Ignore;
        }

        // Every physical tap re-arms auto-play, even on an open screen.
        if event.origin.is_physical_scan() && self.auto_played {
            debug!("new scan, re-arming auto-play");
            self.auto_played = false;
        }

        let resolution = match self.resolver.resolve_event(self.store.as_ref(), event).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "tag lookup failed");
                self.state = ScreenState::Closed;
                return RoutingDecision::Error {
                    reason: format!("could not load tag information: {}", e),
                };
            }
        };

        match resolution {
            Resolution::NoCandidate => RoutingDecision::Ignore,
            Resolution::Unknown { provisional_id } => {
                info!(tag_id = %provisional_id, "unknown tag, offering to create content");
                self.state = ScreenState::AwaitingTag;
                self.current = None;
                RoutingDecision::PromptUnknownTag { provisional_id }
            }
            Resolution::Known { record, matched_by } => {
                let auto_play = event.origin.is_physical_scan() && !self.auto_played;
                if auto_play {
                    self.auto_played = true;
                }
                info!(tag_id = %record.tag_id, ?matched_by, auto_play, "known tag");
                self.state = ScreenState::Resolved;
                self.current = Some(record.clone());
                RoutingDecision::PlayKnownTag { record, auto_play }
            }
        }
    }

    /// Plays `record`, holding the screen in `Playing` until the sink returns.
    pub async fn play(
        &mut self,
        playback: &dyn PlaybackSink,
        record: &TagRecord,
    ) -> anyhow::Result<()> {
        self.playback_started();
        let played = playback.play(record).await;
        self.playback_finished();
        played
    }

    pub fn playback_started(&mut self) {
        if matches!(self.state, ScreenState::Resolved | ScreenState::Idle) {
            self.state = ScreenState::Playing;
        }
    }

    pub fn playback_finished(&mut self) {
        if self.state == ScreenState::Playing {
            self.state = ScreenState::Idle;
        }
    }
}

/// One open screen: a task that owns a `RoutingMachine`.
///
/// Only one event is processed at a time. Events submitted while a lookup is
/// outstanding overwrite each other, so only the latest is processed next.
pub struct ScreenSession {
    events: Option<watch::Sender<Option<ScanEvent>>>,
    decisions: mpsc::UnboundedReceiver<RoutingDecision>,
    state: watch::Receiver<ScreenState>,
    task: JoinHandle<()>,
}

impl ScreenSession {
    pub fn spawn(
        machine: RoutingMachine,
        playback: Arc<dyn PlaybackSink>,
        settle_delay: Duration,
    ) -> Self {
        let (events_tx, events_rx) = watch::channel(None);
        let (decisions_tx, decisions_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let screen = Screen {
            machine,
            decisions: decisions_tx,
            state: state_tx,
            playback,
            settle_delay,
        };
        let task = tokio::spawn(screen.run(events_rx));
        Self {
            events: Some(events_tx),
            decisions: decisions_rx,
            state: state_rx,
            task,
        }
    }

    pub fn submit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            if tx.send_replace(Some(event)).is_some() {
                debug!("replacing an event that was still waiting");
            }
        }
    }

    pub async fn next_decision(&mut self) -> Option<RoutingDecision> {
        self.decisions.recv().await
    }

    pub fn state(&self) -> ScreenState {
        *self.state.borrow()
    }

    /// Waits until the screen reaches `target`. False if the session ended first.
    pub async fn wait_for_state(&mut self, target: ScreenState) -> bool {
        loop {
            if *self.state.borrow_and_update() == target {
                return true;
            }
            if self.state.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Stops accepting events. Pending auto-play is dropped; decisions
    /// already made can still be read.
    pub fn close(&mut self) {
        self.events = None;
    }
}

impl Drop for ScreenSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Screen {
    machine: RoutingMachine,
    decisions: mpsc::UnboundedSender<RoutingDecision>,
    state: watch::Sender<ScreenState>,
    playback: Arc<dyn PlaybackSink>,
    settle_delay: Duration,
}

impl Screen {
    async fn run(mut self, mut events: watch::Receiver<Option<ScanEvent>>) {
        // Auto-play waiting for the settle delay. Only a new physical scan
        // replaces it; navigation leaves it scheduled.
        let mut scheduled: Option<(TagRecord, Instant)> = None;
        loop {
            let due = scheduled.as_ref().map(|(_, at)| *at);
            tokio::select! {
                changed = events.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep_until(due) => {
                    if let Some((record, _)) = scheduled.take() {
                        self.play(&record).await;
                    }
                    continue;
                }
            }
            let Some(event) = events.borrow_and_update().clone() else {
                continue;
            };

            if event.origin.is_physical_scan() && event.has_candidate() {
                if let Some((record, _)) = scheduled.take() {
                    debug!(tag_id = %record.tag_id, "auto-play superseded by a new scan");
                }
            }

            let decision = self.machine.route(&event).await;
            self.publish_state();
            if let RoutingDecision::PlayKnownTag {
                record,
                auto_play: true,
            } = &decision
            {
                // Give the screen a moment to show the record before it speaks.
                scheduled = Some((record.clone(), Instant::now() + self.settle_delay));
            }
            let closed = matches!(decision, RoutingDecision::Error { .. });
            if self.decisions.send(decision).is_err() || closed {
                break;
            }
        }
        debug!("screen session ended");
    }

    async fn play(&mut self, record: &TagRecord) {
        self.machine.playback_started();
        self.publish_state();
        if let Err(e) = self.playback.play(record).await {
            warn!(tag_id = %record.tag_id, error = %e, "auto-play failed");
        }
        self.machine.playback_finished();
        self.publish_state();
    }

    fn publish_state(&self) {
        self.state.send_replace(self.machine.state());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
