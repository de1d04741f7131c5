use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cache::{CharacterTracker, MapRevisions, TileRevisionCache};
use crate::event::{
    Category, ChangeToken, CharacterDelta, CharacterId, CharacterState, EventBus, MapEvent, MapId,
    MapInfo, MergeInfo, TenantId, TileChangeEvent, TileKey,
};

/// Write paths used by the subsystems that change map state
///
/// Every operation updates the shared caches first and then publishes, so a
/// session that connects in between sees the change in its snapshot, its
/// live stream, or both.
#[derive(Clone)]
pub struct Producers {
    event_bus: EventBus,
    tiles: Arc<TileRevisionCache>,
    revisions: Arc<MapRevisions>,
    characters: Arc<CharacterTracker>,
}

impl Producers {
    pub fn new(
        event_bus: EventBus,
        tiles: Arc<TileRevisionCache>,
        revisions: Arc<MapRevisions>,
        characters: Arc<CharacterTracker>,
    ) -> Self {
        Self {
            event_bus,
            tiles,
            revisions,
            characters,
        }
    }

    /// A tile (or one synthesized zoom level of it) was written
    pub fn tile_written(&self, tenant_id: &TenantId, key: TileKey) -> ChangeToken {
        let token = self.tiles.record(tenant_id, key);
        self.event_bus
            .publish(MapEvent::Tile(TileChangeEvent::new(tenant_id.clone(), key, token)));
        token
    }

    /// A batch of tiles was written, e.g. an upload plus its zoom pyramid
    pub fn tiles_written(
        &self,
        tenant_id: &TenantId,
        keys: impl IntoIterator<Item = TileKey>,
    ) -> Vec<ChangeToken> {
        keys.into_iter()
            .map(|key| self.tile_written(tenant_id, key))
            .collect()
    }

    fn publish_revision(&self, tenant_id: &TenantId, map_id: MapId) -> u64 {
        let revision = self.revisions.bump(tenant_id, map_id);
        self.event_bus.publish(MapEvent::MapRevision {
            tenant_id: tenant_id.clone(),
            map_id,
            revision,
        });
        revision
    }

    /// Tiles of a map were moved; every cached tile URL of it is stale
    #[instrument(skip(self))]
    pub fn map_shifted(&self, tenant_id: &TenantId, map_id: MapId) -> u64 {
        let removed = self.tiles.remove_map(tenant_id, map_id);
        let revision = self.publish_revision(tenant_id, map_id);
        info!(removed = removed, revision = revision, "Map shifted");
        revision
    }

    /// Map metadata (name, visibility, priority) changed
    pub fn map_updated(&self, tenant_id: &TenantId, map: MapInfo) {
        self.revisions.register(tenant_id, map.id);
        self.event_bus.publish(MapEvent::MapUpdated {
            tenant_id: tenant_id.clone(),
            map,
        });
    }

    #[instrument(skip(self))]
    pub fn map_deleted(&self, tenant_id: &TenantId, map_id: MapId) {
        let removed = self.tiles.remove_map(tenant_id, map_id);
        self.revisions.retire(tenant_id, map_id);
        self.event_bus.publish(MapEvent::MapDeleted {
            tenant_id: tenant_id.clone(),
            map_id,
        });
        info!(removed = removed, "Map deleted");
    }

    /// Two maps were stitched together; both lose their cached tiles
    #[instrument(skip(self))]
    pub fn maps_merged(&self, tenant_id: &TenantId, merge: MergeInfo) {
        for map_id in [merge.from_map_id, merge.to_map_id] {
            self.tiles.remove_map(tenant_id, map_id);
        }
        let (from, to) = (merge.from_map_id, merge.to_map_id);
        self.event_bus.publish(MapEvent::Merge {
            tenant_id: tenant_id.clone(),
            merge,
        });
        self.publish_revision(tenant_id, from);
        self.publish_revision(tenant_id, to);
    }

    /// All of a tenant's tiles were wiped
    #[instrument(skip(self))]
    pub fn tenant_wiped(&self, tenant_id: &TenantId) {
        let removed = self.tiles.invalidate_tenant(tenant_id);
        for map_id in self.revisions.maps_of(tenant_id) {
            self.publish_revision(tenant_id, map_id);
        }
        info!(removed = removed, "Tenant tiles wiped");
    }

    /// A character reported its position; stale reports are not published
    pub fn position_reported(&self, tenant_id: &TenantId, state: CharacterState) -> bool {
        if !self.characters.upsert(tenant_id, state.clone()) {
            return false;
        }
        self.event_bus
            .publish(MapEvent::Characters(CharacterDelta::update(tenant_id.clone(), state)));
        true
    }

    /// The inactivity sweeper dropped characters
    pub fn characters_expired(
        &self,
        tenant_id: &TenantId,
        ids: impl IntoIterator<Item = CharacterId>,
    ) -> usize {
        let removed: Vec<CharacterId> = ids
            .into_iter()
            .filter(|id| self.characters.remove(tenant_id, *id).is_some())
            .collect();
        if removed.is_empty() {
            return 0;
        }

        debug!(tenant_id = %tenant_id, count = removed.len(), "Characters expired");
        let count = removed.len();
        self.event_bus
            .publish(MapEvent::Characters(CharacterDelta::deletions(tenant_id.clone(), removed)));
        count
    }

    /// Forwards an event owned by another subsystem (markers, roads, timers, ...)
    ///
    /// Tiles, characters and map metadata must go through their dedicated
    /// methods so the caches stay in step; such events are rejected here.
    pub fn entity_event(&self, event: MapEvent) -> bool {
        match event.category() {
            Category::Tile | Category::Character | Category::MapMetadata => {
                warn!(
                    category = %event.category(),
                    "Refusing to forward cache-backed event without updating caches"
                );
                false
            }
            Category::Marker
            | Category::CustomMarker
            | Category::Road
            | Category::Overlay
            | Category::Notification
            | Category::Timer
            | Category::Ping => {
                self.event_bus.publish(event);
                true
            }
        }
    }
}
