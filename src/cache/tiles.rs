use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::event::{ChangeToken, MapId, TenantId, TileEntry, TileKey};

/// Current Unix time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One tenant's tiles plus the highest token issued or stored for it
#[derive(Debug, Default)]
struct TenantTiles {
    tiles: DashMap<TileKey, ChangeToken>,
    high_water: AtomicI64,
}

impl TenantTiles {
    /// Next token of the tenant: the clock, or one past the last token when
    /// the clock has not moved past it
    fn issue(&self, now: ChangeToken) -> ChangeToken {
        let previous = self
            .high_water
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Stores `token` for `key` unless the key already holds a newer one
    fn store(&self, key: TileKey, token: ChangeToken) -> bool {
        self.high_water.fetch_max(token, Ordering::AcqRel);
        let stored = match self.tiles.entry(key) {
            Entry::Occupied(mut current) => {
                if *current.get() >= token {
                    false
                } else {
                    current.insert(token);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(token);
                true
            }
        };
        stored
    }
}

/// Latest change token of every known tile, per tenant
///
/// Tokens increase across all tiles of a tenant, so `since` set to any
/// token a client has seen selects every later write. Readers copy matching
/// entries out before using them.
#[derive(Debug, Default)]
pub struct TileRevisionCache {
    tenants: DashMap<TenantId, Arc<TenantTiles>>,
}

impl TileRevisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant_tiles(&self, tenant_id: &TenantId) -> Arc<TenantTiles> {
        if let Some(tiles) = self.tenants.get(tenant_id) {
            return Arc::clone(tiles.value());
        }
        Arc::clone(self.tenants.entry(tenant_id.clone()).or_default().value())
    }

    fn existing_tiles(&self, tenant_id: &TenantId) -> Option<Arc<TenantTiles>> {
        self.tenants
            .get(tenant_id)
            .map(|tiles| Arc::clone(tiles.value()))
    }

    /// Issues a fresh token for a written tile and stores it
    ///
    /// The token is the current time in milliseconds, bumped past the last
    /// token issued for the tenant when the clock has not moved on.
    pub fn record(&self, tenant_id: &TenantId, key: TileKey) -> ChangeToken {
        let tenant = self.tenant_tiles(tenant_id);
        let token = tenant.issue(now_millis());
        tenant.store(key, token);
        token
    }

    /// Stores an externally issued token unless a newer one is already known
    pub fn upsert(&self, tenant_id: &TenantId, key: TileKey, token: ChangeToken) -> bool {
        self.tenant_tiles(tenant_id).store(key, token)
    }

    pub fn get(&self, tenant_id: &TenantId, key: &TileKey) -> Option<ChangeToken> {
        let tenant = self.existing_tiles(tenant_id)?;
        let token = tenant.tiles.get(key).map(|token| *token);
        token
    }

    /// Number of tiles known for a tenant
    pub fn len(&self, tenant_id: &TenantId) -> usize {
        self.existing_tiles(tenant_id)
            .map(|tenant| tenant.tiles.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, tenant_id: &TenantId) -> bool {
        self.len(tenant_id) == 0
    }

    /// Drops every tile of one map
    #[instrument(skip(self))]
    pub fn remove_map(&self, tenant_id: &TenantId, map_id: MapId) -> usize {
        let Some(tenant) = self.existing_tiles(tenant_id) else {
            return 0;
        };
        let before = tenant.tiles.len();
        tenant.tiles.retain(|key, _| key.map_id != map_id);
        let removed = before.saturating_sub(tenant.tiles.len());
        debug!(removed = removed, "Removed map tiles from cache");
        removed
    }

    /// Drops every tile of a tenant; the token high-water mark is kept
    ///
    /// Writes racing with the invalidation land in the same map and survive it.
    #[instrument(skip(self))]
    pub fn invalidate_tenant(&self, tenant_id: &TenantId) -> usize {
        let Some(tenant) = self.existing_tiles(tenant_id) else {
            return 0;
        };
        let removed = tenant.tiles.len();
        tenant.tiles.clear();
        debug!(removed = removed, "Invalidated tenant tile cache");
        removed
    }

    /// Copies the tenant's tiles newer than `since` (all tiles when `None`)
    ///
    /// Entries are ordered by token, then map, zoom and coordinate.
    pub fn snapshot(&self, tenant_id: &TenantId, since: Option<ChangeToken>) -> Vec<TileEntry> {
        let Some(tenant) = self.existing_tiles(tenant_id) else {
            return Vec::new();
        };

        let mut entries: Vec<TileEntry> = tenant
            .tiles
            .iter()
            .filter(|entry| since.map_or(true, |since| *entry.value() > since))
            .map(|entry| TileEntry::new(entry.key(), *entry.value()))
            .collect();
        entries.sort_unstable_by_key(|tile| (tile.token, tile.map_id, tile.zoom, tile.x, tile.y));
        entries
    }
}
