use std::collections::{HashMap, HashSet};
use std::mem;

use crate::event::{
    CharacterDelta, CharacterDeltaPayload, CharacterId, CharacterState, TileChangeEvent,
    TileEntry,
};

/// Tiles waiting for the next tile flush, in drain order
#[derive(Debug, Default)]
pub struct TileBatch {
    entries: Vec<TileEntry>,
}

impl TileBatch {
    pub fn push(&mut self, tile: &TileChangeEvent) {
        self.entries.push(TileEntry::from(tile));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take(&mut self) -> Vec<TileEntry> {
        mem::take(&mut self.entries)
    }
}

/// Merges character deltas between flushes
///
/// Updates are latest-wins per id. Within one window a deletion removes any
/// pending update for the id, and a later update removes a pending deletion.
#[derive(Debug, Default)]
pub struct CharacterCoalescer {
    updates: HashMap<CharacterId, CharacterState>,
    deletions: HashSet<CharacterId>,
}

impl CharacterCoalescer {
    /// Applies a delta; inside one delta, deletions are applied after updates
    pub fn merge(&mut self, delta: CharacterDelta) {
        for (id, state) in delta.updates {
            self.deletions.remove(&id);
            self.updates.insert(id, state);
        }
        for id in delta.deletions {
            self.updates.remove(&id);
            self.deletions.insert(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletions.is_empty()
    }

    /// Empties the buffers, returning `None` when there is nothing to send
    pub fn take(&mut self) -> Option<CharacterDeltaPayload> {
        if self.is_empty() {
            return None;
        }
        Some(CharacterDeltaPayload::from_parts(
            mem::take(&mut self.updates).into_values(),
            mem::take(&mut self.deletions),
        ))
    }
}
