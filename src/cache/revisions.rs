use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::event::{MapId, TenantId};

#[derive(Debug, Clone)]
struct MapRevision {
    tenant_id: TenantId,
    revision: u64,
    deleted: bool,
}

/// Per-map revision counters used by clients to bust cached tile URLs
///
/// Counters only ever grow; deleting a map does not reset its counter, it
/// only hides the map from its tenant until the map is registered again.
#[derive(Debug, Default)]
pub struct MapRevisions {
    maps: DashMap<MapId, MapRevision>,
}

impl MapRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a map known at revision 1 if it has no counter yet and revives
    /// a deleted one; returns the current revision
    pub fn register(&self, tenant_id: &TenantId, map_id: MapId) -> u64 {
        let mut entry = self.maps.entry(map_id).or_insert_with(|| MapRevision {
            tenant_id: tenant_id.clone(),
            revision: 1,
            deleted: false,
        });
        entry.deleted = false;
        entry.revision
    }

    /// Increments a map's revision and returns the new value
    pub fn bump(&self, tenant_id: &TenantId, map_id: MapId) -> u64 {
        self.advance(tenant_id, map_id, false)
    }

    /// Increments the revision of a deleted map and hides it from its tenant
    pub fn retire(&self, tenant_id: &TenantId, map_id: MapId) -> u64 {
        self.advance(tenant_id, map_id, true)
    }

    fn advance(&self, tenant_id: &TenantId, map_id: MapId, deleted: bool) -> u64 {
        let mut entry = self.maps.entry(map_id).or_insert_with(|| MapRevision {
            tenant_id: tenant_id.clone(),
            revision: 0,
            deleted: false,
        });

        if &entry.tenant_id != tenant_id {
            warn!(
                map_id = map_id,
                owner = %entry.tenant_id,
                tenant_id = %tenant_id,
                "Map revision bumped by a different tenant, reassigning owner"
            );
            entry.tenant_id = tenant_id.clone();
        }

        entry.revision += 1;
        if deleted {
            entry.deleted = true;
        }
        debug!(
            map_id = map_id,
            revision = entry.revision,
            deleted = entry.deleted,
            "Map revision bumped"
        );
        entry.revision
    }

    pub fn get(&self, map_id: MapId) -> Option<u64> {
        self.maps.get(&map_id).map(|entry| entry.revision)
    }

    /// Copies the revisions of every live map owned by a tenant
    pub fn for_tenant(&self, tenant_id: &TenantId) -> BTreeMap<MapId, u64> {
        self.maps
            .iter()
            .filter(|entry| &entry.tenant_id == tenant_id && !entry.deleted)
            .map(|entry| (*entry.key(), entry.revision))
            .collect()
    }

    /// Ids of every map owned by a tenant
    pub fn maps_of(&self, tenant_id: &TenantId) -> Vec<MapId> {
        self.for_tenant(tenant_id).into_keys().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bump_starts_at_one_and_increments() {
        let revisions = MapRevisions::new();
        let acme = TenantId::from("acme");

        assert_eq!(revisions.get(7), None);
        assert_eq!(revisions.bump(&acme, 7), 1);
        assert_eq!(revisions.bump(&acme, 7), 2);
        assert_eq!(revisions.get(7), Some(2));
    }

    #[test]
    fn test_register_does_not_reset() {
        let revisions = MapRevisions::new();
        let acme = TenantId::from("acme");

        assert_eq!(revisions.register(&acme, 3), 1);
        revisions.bump(&acme, 3);
        assert_eq!(revisions.register(&acme, 3), 2);
    }

    #[test]
    fn test_for_tenant_is_restricted() {
        let revisions = MapRevisions::new();
        let acme = TenantId::from("acme");
        let globex = TenantId::from("globex");

        revisions.bump(&acme, 1);
        revisions.bump(&acme, 2);
        revisions.bump(&acme, 2);
        revisions.bump(&globex, 3);

        let acme_maps = revisions.for_tenant(&acme);
        assert_eq!(acme_maps.len(), 2);
        assert_eq!(acme_maps[&1], 1);
        assert_eq!(acme_maps[&2], 2);
        assert_eq!(revisions.maps_of(&globex), vec![3]);
    }

    #[test]
    fn test_retired_map_is_hidden_until_registered() {
        let revisions = MapRevisions::new();
        let acme = TenantId::from("acme");
        revisions.bump(&acme, 1);
        revisions.bump(&acme, 2);

        assert_eq!(revisions.retire(&acme, 2), 2);

        assert_eq!(revisions.maps_of(&acme), vec![1]);
        assert_eq!(revisions.get(2), Some(2));

        // A recreated map keeps counting from where it left off.
        assert_eq!(revisions.register(&acme, 2), 2);
        assert_eq!(revisions.bump(&acme, 2), 3);
        assert_eq!(revisions.maps_of(&acme), vec![1, 2]);
    }

    #[test]
    fn test_concurrent_bumps_are_not_lost() {
        let revisions = Arc::new(MapRevisions::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let revisions = Arc::clone(&revisions);
                thread::spawn(move || {
                    for _ in 0..500 {
                        revisions.bump(&TenantId::from("acme"), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(revisions.get(1), Some(2_000));
    }
}
