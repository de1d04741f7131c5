#![allow(dead_code)] // Test utilities may not all be used in every test

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mapsync::{
    event::ChangeToken, AppState, Principal, Producers, SessionError, StreamConfig,
    StreamSession,
};

use super::mocks::RecordingSink;

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub state: AppState,
    pub producers: Producers,
}

pub struct TestSetupBuilder {
    config: StreamConfig,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            config: StreamConfig::defaults(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.snapshot_chunk_size = chunk_size;
        self
    }

    pub fn build(self) -> TestSetup {
        let state = AppState::new(self.config);
        let producers = state.producers();
        TestSetup { state, producers }
    }
}

impl TestSetup {
    /// Opens a session; it is subscribed but has not sent its snapshot yet
    pub fn connect(&self, tenant: &str, can_see_positions: bool) -> TestClient {
        self.connect_since(tenant, can_see_positions, None)
    }

    pub fn connect_since(
        &self,
        tenant: &str,
        can_see_positions: bool,
        since: Option<ChangeToken>,
    ) -> TestClient {
        let sink = RecordingSink::new();
        let cancel = self.state.event_bus.shutdown_token().child_token();
        let session = StreamSession::new(
            &self.state,
            Principal::new(tenant, can_see_positions),
            since,
            Box::new(sink.clone()),
            cancel.clone(),
        );
        TestClient {
            session,
            sink,
            cancel,
        }
    }
}

/// A session driven tick by tick from the test
pub struct TestClient {
    pub session: StreamSession,
    pub sink: RecordingSink,
    pub cancel: CancellationToken,
}

impl TestClient {
    pub async fn tick(&mut self) {
        self.session.tick().await.expect("tick failed");
    }

    pub async fn ticks(&mut self, count: usize) {
        for _ in 0..count {
            self.tick().await;
        }
    }

    /// Runs the full session loop in the background
    pub fn spawn(self) -> RunningClient {
        let TestClient {
            mut session,
            sink,
            cancel,
        } = self;
        let handle = tokio::spawn(async move {
            let result = session.run().await;
            (result, session)
        });
        RunningClient {
            handle,
            sink,
            cancel,
        }
    }
}

pub struct RunningClient {
    pub handle: JoinHandle<(Result<(), SessionError>, StreamSession)>,
    pub sink: RecordingSink,
    pub cancel: CancellationToken,
}

impl RunningClient {
    /// Disconnects the client and waits for the session to wind down
    pub async fn stop(self) -> (Result<(), SessionError>, StreamSession) {
        self.cancel.cancel();
        self.join().await
    }

    pub async fn join(self) -> (Result<(), SessionError>, StreamSession) {
        self.handle.await.expect("session task panicked")
    }
}
