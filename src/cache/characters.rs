use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use crate::event::{CharacterId, CharacterState, TenantId};

/// Latest known state of every visible character
///
/// Entries are removed by an external inactivity sweeper; a missing entry
/// means "not visible".
#[derive(Debug, Default)]
pub struct CharacterTracker {
    characters: DashMap<(TenantId, CharacterId), CharacterState>,
}

impl CharacterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a position report; reports older than the stored one are ignored
    pub fn upsert(&self, tenant_id: &TenantId, state: CharacterState) -> bool {
        match self.characters.entry((tenant_id.clone(), state.id)) {
            Entry::Occupied(mut current) => {
                if current.get().last_updated > state.last_updated {
                    trace!(
                        tenant_id = %tenant_id,
                        character_id = state.id,
                        "Ignoring out-of-order position report"
                    );
                    false
                } else {
                    current.insert(state);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    pub fn remove(&self, tenant_id: &TenantId, id: CharacterId) -> Option<CharacterState> {
        self.characters
            .remove(&(tenant_id.clone(), id))
            .map(|(_, state)| state)
    }

    pub fn get(&self, tenant_id: &TenantId, id: CharacterId) -> Option<CharacterState> {
        self.characters
            .get(&(tenant_id.clone(), id))
            .map(|entry| entry.value().clone())
    }

    /// Copies every character of a tenant, ordered by id
    pub fn snapshot(&self, tenant_id: &TenantId) -> Vec<CharacterState> {
        let mut characters: Vec<_> = self
            .characters
            .iter()
            .filter(|entry| &entry.key().0 == tenant_id)
            .map(|entry| entry.value().clone())
            .collect();
        characters.sort_by_key(|c| c.id);
        characters
    }

    /// Ids of a tenant's characters not updated since `older_than` (Unix ms)
    pub fn stale(&self, tenant_id: &TenantId, older_than: i64) -> Vec<CharacterId> {
        let mut ids: Vec<_> = self
            .characters
            .iter()
            .filter(|entry| &entry.key().0 == tenant_id && entry.value().last_updated < older_than)
            .map(|entry| entry.key().1)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}
