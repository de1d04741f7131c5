use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coalesce::{CharacterCoalescer, TileBatch};
use super::frames::{Frame, CHARACTER_DELTA};
use super::sink::{FrameSink, SinkError};
use crate::config::StreamConfig;
use crate::event::{ChangeToken, MapEvent, Subscription, SubscriptionError};
use crate::shared::{AppState, Principal};
use crate::snapshot::SnapshotBuilder;

/// Lifecycle of a stream session; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Syncing,
    Live,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Disconnected(#[from] SinkError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("snapshot task failed: {0}")]
    Snapshot(#[from] tokio::task::JoinError),
}

/// One connected client: its subscription, coalescing buffers and tick loop
pub struct StreamSession {
    id: Uuid,
    principal: Principal,
    since: Option<ChangeToken>,
    subscription: Subscription,
    sink: Box<dyn FrameSink>,
    snapshots: SnapshotBuilder,
    config: StreamConfig,
    cancel: CancellationToken,
    state: SessionState,
    tiles: TileBatch,
    characters: CharacterCoalescer,
    ticks: u64,
    idle_ticks: u32,
}

impl StreamSession {
    /// Subscribes immediately, so events published while the snapshot is
    /// being sent are queued rather than missed
    pub fn new(
        app_state: &AppState,
        principal: Principal,
        since: Option<ChangeToken>,
        sink: Box<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Self {
        let subscription = app_state
            .event_bus
            .subscribe(principal.tenant_id.clone(), principal.categories());

        Self {
            id: Uuid::new_v4(),
            principal,
            since,
            subscription,
            sink,
            snapshots: app_state.snapshot_builder(),
            config: app_state.config.as_ref().clone(),
            cancel,
            state: SessionState::Connecting,
            tiles: TileBatch::default(),
            characters: CharacterCoalescer::default(),
            ticks: 0,
            idle_ticks: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Ticks completed since the session went live
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Tiles waiting for the next tile flush
    pub fn pending_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Sends the cold-start snapshot, then ticks until cancelled or disconnected
    ///
    /// Cancellation is a clean exit; every other error is returned. The
    /// session is `Closed` afterwards either way.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        info!(
            session_id = %self.id,
            tenant_id = %self.principal.tenant_id,
            since = ?self.since,
            "Stream session started"
        );

        let result = match self.run_until_closed().await {
            Err(SessionError::Cancelled) => Ok(()),
            other => other,
        };
        self.state = SessionState::Closed;

        info!(
            session_id = %self.id,
            tenant_id = %self.principal.tenant_id,
            ticks = self.ticks,
            "Stream session closed"
        );
        result
    }

    async fn run_until_closed(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Syncing;
        self.cold_start().await?;
        self.state = SessionState::Live;
        debug!(session_id = %self.id, "Stream session live");

        let period = self.config.tick_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = ticker.tick() => {}
            }
            self.tick().await?;
        }
    }

    /// Writes tiles, then map revisions, then characters
    async fn cold_start(&mut self) -> Result<(), SessionError> {
        let builder = self.snapshots.clone();
        let tenant_id = self.principal.tenant_id.clone();
        let since = self.since;
        let include_characters = self.principal.can_see_positions;

        let snapshot = tokio::task::spawn_blocking(move || {
            builder.build(&tenant_id, since, include_characters)
        })
        .await?;

        debug!(
            session_id = %self.id,
            tiles = snapshot.tiles.len(),
            maps = snapshot.revisions.len(),
            "Sending cold-start snapshot"
        );

        for frame in snapshot.frames(self.config.snapshot_chunk_size) {
            match frame {
                Ok(frame) => self.write(frame).await?,
                Err(e) => warn!(
                    session_id = %self.id,
                    error = %e,
                    "Dropping snapshot frame that failed to serialize"
                ),
            }
        }
        Ok(())
    }

    /// Runs one tick of the live loop
    ///
    /// Drains the subscription without waiting, forwards immediate events,
    /// flushes coalesced characters every tick and tiles every
    /// `tile_flush_ticks` ticks, and writes a heartbeat after
    /// `heartbeat_idle_ticks` ticks without output.
    pub async fn tick(&mut self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.ticks += 1;

        let mut wrote = false;
        for event in self.subscription.try_drain()? {
            wrote |= self.dispatch(event).await?;
        }

        wrote |= self.flush_characters().await?;

        if self.ticks % self.config.tile_flush_ticks.max(1) == 0 {
            wrote |= self.flush_tiles().await?;
        }

        if wrote {
            self.idle_ticks = 0;
        } else {
            self.idle_ticks += 1;
            if self.idle_ticks >= self.config.heartbeat_idle_ticks {
                self.write(Frame::Heartbeat).await?;
                self.idle_ticks = 0;
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, event: MapEvent) -> Result<bool, SessionError> {
        match event {
            MapEvent::Tile(tile) => {
                self.tiles.push(&tile);
                Ok(false)
            }
            MapEvent::Characters(delta) => {
                self.characters.merge(delta);
                Ok(false)
            }
            MapEvent::Marker { .. }
            | MapEvent::MapUpdated { .. }
            | MapEvent::MapDeleted { .. }
            | MapEvent::MapRevision { .. }
            | MapEvent::Merge { .. }
            | MapEvent::CustomMarker { .. }
            | MapEvent::Ping { .. }
            | MapEvent::Road { .. }
            | MapEvent::Overlay { .. }
            | MapEvent::Notification { .. }
            | MapEvent::Timer { .. } => self.emit(&event).await,
        }
    }

    async fn emit(&mut self, event: &MapEvent) -> Result<bool, SessionError> {
        match Frame::from_event(event) {
            Ok(frame) => {
                self.write(frame).await?;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    event = ?event.event_name(),
                    error = %e,
                    "Dropping event that failed to serialize"
                );
                Ok(false)
            }
        }
    }

    async fn flush_characters(&mut self) -> Result<bool, SessionError> {
        let Some(payload) = self.characters.take() else {
            return Ok(false);
        };

        match Frame::named(CHARACTER_DELTA, &payload) {
            Ok(frame) => {
                self.write(frame).await?;
                Ok(true)
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Dropping character delta");
                Ok(false)
            }
        }
    }

    async fn flush_tiles(&mut self) -> Result<bool, SessionError> {
        if self.tiles.is_empty() {
            return Ok(false);
        }

        let tiles = self.tiles.take();
        debug!(session_id = %self.id, tiles = tiles.len(), "Flushing tile batch");

        let mut wrote = false;
        for chunk in tiles.chunks(self.config.snapshot_chunk_size.max(1)) {
            match Frame::tile_batch(chunk) {
                Ok(frame) => {
                    self.write(frame).await?;
                    wrote = true;
                }
                Err(e) => warn!(session_id = %self.id, error = %e, "Dropping tile batch"),
            }
        }
        Ok(wrote)
    }

    /// Writes a frame unless the session is cancelled first
    async fn write(&mut self, frame: Frame) -> Result<(), SessionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            sent = self.sink.send(frame) => sent.map_err(SessionError::from),
        }
    }
}
