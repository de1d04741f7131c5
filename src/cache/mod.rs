// Shared, tenant-keyed in-memory state
//
// Written by producers, read (as copies) by the snapshot builder.

// Public API - what other modules can use
pub use characters::CharacterTracker;
pub use revisions::MapRevisions;
pub use tiles::{now_millis, TileRevisionCache};

// Internal modules
mod characters;
mod revisions;
mod tiles;
