use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::cache::{now_millis, CharacterTracker, MapRevisions, TileRevisionCache};
use crate::event::{ChangeToken, CharacterState, MapId, MapRevisionPayload, TenantId, TileEntry};
use crate::stream::frames::{Frame, CHARACTERS_SNAPSHOT, MAP_REVISION};

/// How far ahead of the server clock a `since` token may be before it is
/// reported as suspicious
const FUTURE_TOKEN_TOLERANCE_MS: i64 = 60_000;

/// State a (re)connecting client needs before live updates make sense
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Ordered by token, then map, zoom and coordinate
    pub tiles: Vec<TileEntry>,
    pub revisions: BTreeMap<MapId, u64>,
    /// `None` when the session may not see positions
    pub characters: Option<Vec<CharacterState>>,
}

impl Snapshot {
    /// Highest tile token included, for the client to echo back as `since`
    pub fn latest_token(&self) -> Option<ChangeToken> {
        self.tiles.iter().map(|tile| tile.token).max()
    }

    /// Renders the snapshot as frames: tile chunks, then one revision frame per
    /// map, then the character snapshot
    pub fn frames(
        &self,
        chunk_size: usize,
    ) -> impl Iterator<Item = Result<Frame, serde_json::Error>> + '_ {
        let tiles = self.tiles.chunks(chunk_size.max(1)).map(Frame::tile_batch);
        let revisions = self.revisions.iter().map(|(map_id, revision)| {
            Frame::named(
                MAP_REVISION,
                &MapRevisionPayload {
                    map_id: *map_id,
                    revision: *revision,
                },
            )
        });
        let characters = self
            .characters
            .iter()
            .map(|characters| Frame::named(CHARACTERS_SNAPSHOT, characters));

        tiles.chain(revisions).chain(characters)
    }
}

/// Builds snapshots from the shared caches
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    tiles: Arc<TileRevisionCache>,
    revisions: Arc<MapRevisions>,
    characters: Arc<CharacterTracker>,
}

impl SnapshotBuilder {
    pub fn new(
        tiles: Arc<TileRevisionCache>,
        revisions: Arc<MapRevisions>,
        characters: Arc<CharacterTracker>,
    ) -> Self {
        Self {
            tiles,
            revisions,
            characters,
        }
    }

    /// Copies what a tenant's client is missing
    ///
    /// With `since`, only tiles whose token is greater are included; a
    /// non-positive `since` counts as absent. The token is trusted as given.
    #[instrument(skip(self))]
    pub fn build(
        &self,
        tenant_id: &TenantId,
        since: Option<ChangeToken>,
        include_characters: bool,
    ) -> Snapshot {
        let since = since.filter(|token| *token > 0);
        if let Some(since) = since {
            let now = now_millis();
            if since > now + FUTURE_TOKEN_TOLERANCE_MS {
                warn!(
                    since = since,
                    now = now,
                    "Client supplied a change token from the future, updates may be missed"
                );
            }
        }

        let snapshot = Snapshot {
            tiles: self.tiles.snapshot(tenant_id, since),
            revisions: self.revisions.for_tenant(tenant_id),
            characters: include_characters.then(|| self.characters.snapshot(tenant_id)),
        };

        debug!(
            tiles = snapshot.tiles.len(),
            maps = snapshot.revisions.len(),
            characters = snapshot.characters.as_ref().map(Vec::len),
            "Snapshot built"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Coord, TileKey};
    use serde_json::Value;
    use std::collections::HashSet;

    fn builder() -> (
        SnapshotBuilder,
        Arc<TileRevisionCache>,
        Arc<MapRevisions>,
        Arc<CharacterTracker>,
    ) {
        let tiles = Arc::new(TileRevisionCache::new());
        let revisions = Arc::new(MapRevisions::new());
        let characters = Arc::new(CharacterTracker::new());
        let builder = SnapshotBuilder::new(
            Arc::clone(&tiles),
            Arc::clone(&revisions),
            Arc::clone(&characters),
        );
        (builder, tiles, revisions, characters)
    }

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    fn tile_key(x: i32) -> TileKey {
        TileKey::new(7, Coord::new(x, 0), 0)
    }

    #[test]
    fn test_since_selects_strictly_newer_tiles() {
        let (builder, tiles, _, _) = builder();
        for x in 0..10 {
            tiles.upsert(&acme(), tile_key(x), 100 + x as i64);
        }

        let snapshot = builder.build(&acme(), Some(104), false);

        let tokens: Vec<_> = snapshot.tiles.iter().map(|t| t.token).collect();
        assert_eq!(tokens, vec![105, 106, 107, 108, 109]);
        assert_eq!(snapshot.latest_token(), Some(109));
        assert!(snapshot.characters.is_none());
    }

    #[test]
    fn test_non_positive_since_means_full_snapshot() {
        let (builder, tiles, _, _) = builder();
        for x in 0..3 {
            tiles.upsert(&acme(), tile_key(x), 1 + x as i64);
        }

        assert_eq!(builder.build(&acme(), Some(0), false).tiles.len(), 3);
        assert_eq!(builder.build(&acme(), Some(-5), false).tiles.len(), 3);
        assert_eq!(builder.build(&acme(), None, false).tiles.len(), 3);
    }

    #[test]
    fn test_chunks_reconstruct_full_set() {
        let (builder, tiles, _, _) = builder();
        for x in 0..4_500 {
            tiles.record(&acme(), tile_key(x));
        }

        let snapshot = builder.build(&acme(), None, false);
        let frames: Vec<Frame> = snapshot.frames(2_000).map(Result::unwrap).collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for frame in &frames {
            assert!(frame.is_tile_batch());
            let batch: Vec<TileEntry> = serde_json::from_str(frame.data().unwrap()).unwrap();
            assert!(batch.len() <= 2_000);
            total += batch.len();
            for tile in batch {
                assert!(seen.insert(tile.key()), "duplicate tile {:?}", tile);
            }
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(total, 4_500);
        assert_eq!(seen.len(), 4_500);
    }

    #[test]
    fn test_frame_order_is_tiles_revisions_characters() {
        let (builder, tiles, revisions, characters) = builder();
        tiles.record(&acme(), tile_key(0));
        revisions.bump(&acme(), 7);
        revisions.bump(&acme(), 3);
        characters.upsert(
            &acme(),
            CharacterState {
                id: 1,
                name: "scout".to_string(),
                map_id: 7,
                position: Coord::new(0, 0),
                kind: "player".to_string(),
                rotation: 0,
                speed: 0,
                last_updated: 1,
            },
        );

        let snapshot = builder.build(&acme(), None, true);
        let frames: Vec<Frame> = snapshot.frames(2_000).map(Result::unwrap).collect();

        let names: Vec<_> = frames.iter().map(Frame::event_name).collect();
        assert_eq!(
            names,
            vec![
                None,
                Some("mapRevision"),
                Some("mapRevision"),
                Some("charactersSnapshot")
            ]
        );
        let first_revision: Value = serde_json::from_str(frames[1].data().unwrap()).unwrap();
        assert_eq!(first_revision["mapId"], 3);
    }

    #[test]
    fn test_empty_character_snapshot_is_still_sent() {
        let (builder, _, _, _) = builder();

        let snapshot = builder.build(&acme(), None, true);
        let frames: Vec<Frame> = snapshot.frames(2_000).map(Result::unwrap).collect();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_name(), Some("charactersSnapshot"));
        assert_eq!(frames[0].data(), Some("[]"));
    }

    #[test]
    fn test_revisions_are_restricted_to_tenant() {
        let (builder, _, revisions, _) = builder();
        revisions.bump(&acme(), 1);
        revisions.bump(&TenantId::from("globex"), 2);

        let snapshot = builder.build(&acme(), None, false);

        assert_eq!(snapshot.revisions.keys().copied().collect::<Vec<_>>(), vec![1]);
    }
}
