//! Test assertion helpers - fluent API for verifying written frames
#![allow(dead_code)] // Test utilities may not all be used in every test

use serde_json::Value;

use mapsync::{event::TileEntry, Frame};

// ============================================================================
// Assertion Helpers
// ============================================================================

pub struct FrameAssertion {
    frames: Vec<Frame>,
}

impl FrameAssertion {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Tile batches, each decoded
    pub fn tile_batches(&self) -> Vec<Vec<TileEntry>> {
        self.frames
            .iter()
            .filter(|frame| frame.is_tile_batch())
            .map(|frame| {
                serde_json::from_str(frame.data().expect("tile batch has data"))
                    .expect("tile batch is a JSON array of tiles")
            })
            .collect()
    }

    /// Every tile across all batches, in write order
    pub fn tiles(&self) -> Vec<TileEntry> {
        self.tile_batches().into_iter().flatten().collect()
    }

    /// Payloads of frames with the given event name
    pub fn named(&self, event: &str) -> Vec<Value> {
        self.frames
            .iter()
            .filter(|frame| frame.event_name() == Some(event))
            .map(|frame| serde_json::from_str(frame.data().expect("named frame has data")).unwrap())
            .collect()
    }

    pub fn event_names(&self) -> Vec<Option<&'static str>> {
        self.frames
            .iter()
            .filter(|frame| !frame.is_heartbeat())
            .map(Frame::event_name)
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_heartbeat()).count()
    }

    pub fn assert_no_tiles(&self) -> &Self {
        assert!(
            self.tile_batches().is_empty(),
            "expected no tile batches, got {:?}",
            self.frames
        );
        self
    }

    pub fn assert_nothing_but_heartbeats(&self) -> &Self {
        assert_eq!(
            self.heartbeats(),
            self.frames.len(),
            "expected only heartbeats, got {:?}",
            self.frames
        );
        self
    }
}
