use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use mapsync::{Frame, FrameSink, SinkError};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Frame sink that records everything a session writes
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<RwLock<Vec<Frame>>>,
    disconnected: Arc<RwLock<bool>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn frames(&self) -> Vec<Frame> {
        self.frames.read().await.clone()
    }

    /// Returns and forgets everything written so far
    pub async fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.write().await)
    }

    /// Makes every later write fail as if the client went away
    pub async fn disconnect(&self) {
        *self.disconnected.write().await = true;
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError> {
        if *self.disconnected.read().await {
            return Err(SinkError::Disconnected);
        }
        self.frames.write().await.push(frame);
        Ok(())
    }
}
