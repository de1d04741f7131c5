use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumCount, EnumIter};

/// Opaque tenant isolation key carried by every event and cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

pub type MapId = i64;
pub type CharacterId = i64;

/// Millisecond-epoch based marker of a tile's last write
pub type ChangeToken = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Identifies one tile within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub map_id: MapId,
    pub coord: Coord,
    pub zoom: i32,
}

impl TileKey {
    pub fn new(map_id: MapId, coord: Coord, zoom: i32) -> Self {
        Self {
            map_id,
            coord,
            zoom,
        }
    }
}

/// A tile was written (uploaded, merged or synthesized at a zoom level)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileChangeEvent {
    pub tenant_id: TenantId,
    pub map_id: MapId,
    pub coord: Coord,
    pub zoom: i32,
    pub token: ChangeToken,
}

impl TileChangeEvent {
    pub fn new(tenant_id: TenantId, key: TileKey, token: ChangeToken) -> Self {
        Self {
            tenant_id,
            map_id: key.map_id,
            coord: key.coord,
            zoom: key.zoom,
            token,
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.map_id, self.coord, self.zoom)
    }
}

/// Wire form of a tile, `{M,X,Y,Z,T}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileEntry {
    #[serde(rename = "M")]
    pub map_id: MapId,
    #[serde(rename = "X")]
    pub x: i32,
    #[serde(rename = "Y")]
    pub y: i32,
    #[serde(rename = "Z")]
    pub zoom: i32,
    #[serde(rename = "T")]
    pub token: ChangeToken,
}

impl TileEntry {
    pub fn new(key: &TileKey, token: ChangeToken) -> Self {
        Self {
            map_id: key.map_id,
            x: key.coord.x,
            y: key.coord.y,
            zoom: key.zoom,
            token,
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.map_id, Coord::new(self.x, self.y), self.zoom)
    }
}

impl From<&TileChangeEvent> for TileEntry {
    fn from(event: &TileChangeEvent) -> Self {
        Self::new(&event.key(), event.token)
    }
}

/// Last reported state of a visible character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterState {
    pub id: CharacterId,
    pub name: String,
    #[serde(rename = "map")]
    pub map_id: MapId,
    #[serde(flatten)]
    pub position: Coord,
    #[serde(rename = "type")]
    pub kind: String,
    pub rotation: i32,
    pub speed: i32,
    /// Unix milliseconds of the report
    pub last_updated: i64,
}

/// Ephemeral batch of character changes for one tenant
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterDelta {
    pub tenant_id: TenantId,
    pub updates: HashMap<CharacterId, CharacterState>,
    pub deletions: HashSet<CharacterId>,
}

impl CharacterDelta {
    pub fn update(tenant_id: TenantId, state: CharacterState) -> Self {
        let mut updates = HashMap::new();
        updates.insert(state.id, state);
        Self {
            tenant_id,
            updates,
            deletions: HashSet::new(),
        }
    }

    pub fn deletions(tenant_id: TenantId, ids: impl IntoIterator<Item = CharacterId>) -> Self {
        Self {
            tenant_id,
            updates: HashMap::new(),
            deletions: ids.into_iter().collect(),
        }
    }
}

/// Wire form of a `characterDelta` frame; entries are sorted by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterDeltaPayload {
    pub updates: Vec<CharacterState>,
    pub deletions: Vec<CharacterId>,
}

impl CharacterDeltaPayload {
    pub fn from_parts(
        updates: impl IntoIterator<Item = CharacterState>,
        deletions: impl IntoIterator<Item = CharacterId>,
    ) -> Self {
        let mut updates: Vec<_> = updates.into_iter().collect();
        updates.sort_by_key(|c| c.id);
        let mut deletions: Vec<_> = deletions.into_iter().collect();
        deletions.sort_unstable();
        Self { updates, deletions }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
    pub id: MapId,
    pub name: String,
    pub hidden: bool,
    pub priority: bool,
}

/// Two maps were stitched together; tiles of `from` now live in `to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeInfo {
    pub from_map_id: MapId,
    pub to_map_id: MapId,
    pub shift_x: i32,
    pub shift_y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRevisionPayload {
    pub map_id: MapId,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDeletedPayload {
    pub id: MapId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    Created,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Created,
    Read,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Created,
    Updated,
    Completed,
    Deleted,
}

/// Event categories; the bus keeps one broadcast channel per category.
///
/// Declaration order is the per-tick drain order of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Tile,
    Marker,
    Character,
    MapMetadata,
    CustomMarker,
    Road,
    Overlay,
    Notification,
    Timer,
    Ping,
}

impl Category {
    /// Position of this category in declaration order
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Changes that can be published to map viewers
///
/// Payloads owned by other subsystems (markers, roads, timers, ...) travel as
/// opaque JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    Tile(TileChangeEvent),
    Characters(CharacterDelta),
    Marker {
        tenant_id: TenantId,
        action: EntityAction,
        payload: Value,
    },
    MapUpdated {
        tenant_id: TenantId,
        map: MapInfo,
    },
    MapDeleted {
        tenant_id: TenantId,
        map_id: MapId,
    },
    MapRevision {
        tenant_id: TenantId,
        map_id: MapId,
        revision: u64,
    },
    Merge {
        tenant_id: TenantId,
        merge: MergeInfo,
    },
    CustomMarker {
        tenant_id: TenantId,
        action: EntityAction,
        payload: Value,
    },
    Ping {
        tenant_id: TenantId,
        action: PingAction,
        payload: Value,
    },
    Road {
        tenant_id: TenantId,
        action: EntityAction,
        payload: Value,
    },
    Overlay {
        tenant_id: TenantId,
        payload: Value,
    },
    Notification {
        tenant_id: TenantId,
        action: NotificationAction,
        payload: Value,
    },
    Timer {
        tenant_id: TenantId,
        action: TimerAction,
        payload: Value,
    },
}

impl MapEvent {
    /// Get the tenant this event belongs to
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            MapEvent::Tile(tile) => &tile.tenant_id,
            MapEvent::Characters(delta) => &delta.tenant_id,
            MapEvent::Marker { tenant_id, .. } => tenant_id,
            MapEvent::MapUpdated { tenant_id, .. } => tenant_id,
            MapEvent::MapDeleted { tenant_id, .. } => tenant_id,
            MapEvent::MapRevision { tenant_id, .. } => tenant_id,
            MapEvent::Merge { tenant_id, .. } => tenant_id,
            MapEvent::CustomMarker { tenant_id, .. } => tenant_id,
            MapEvent::Ping { tenant_id, .. } => tenant_id,
            MapEvent::Road { tenant_id, .. } => tenant_id,
            MapEvent::Overlay { tenant_id, .. } => tenant_id,
            MapEvent::Notification { tenant_id, .. } => tenant_id,
            MapEvent::Timer { tenant_id, .. } => tenant_id,
        }
    }

    /// Get the bus channel this event travels on
    pub fn category(&self) -> Category {
        match self {
            MapEvent::Tile(_) => Category::Tile,
            MapEvent::Characters(_) => Category::Character,
            MapEvent::Marker { .. } => Category::Marker,
            MapEvent::MapUpdated { .. }
            | MapEvent::MapDeleted { .. }
            | MapEvent::MapRevision { .. }
            | MapEvent::Merge { .. } => Category::MapMetadata,
            MapEvent::CustomMarker { .. } => Category::CustomMarker,
            MapEvent::Ping { .. } => Category::Ping,
            MapEvent::Road { .. } => Category::Road,
            MapEvent::Overlay { .. } => Category::Overlay,
            MapEvent::Notification { .. } => Category::Notification,
            MapEvent::Timer { .. } => Category::Timer,
        }
    }

    /// SSE event name; `None` for tiles, which go out as unnamed batches
    pub fn event_name(&self) -> Option<&'static str> {
        let name = match self {
            MapEvent::Tile(_) => return None,
            MapEvent::Characters(_) => "characterDelta",
            MapEvent::Marker { action, .. } => match action {
                EntityAction::Created => "markerCreated",
                EntityAction::Updated => "markerUpdated",
                EntityAction::Deleted => "markerDeleted",
            },
            MapEvent::MapUpdated { .. } => "mapUpdate",
            MapEvent::MapDeleted { .. } => "mapDelete",
            MapEvent::MapRevision { .. } => "mapRevision",
            MapEvent::Merge { .. } => "merge",
            MapEvent::CustomMarker { action, .. } => match action {
                EntityAction::Created => "customMarkerCreated",
                EntityAction::Updated => "customMarkerUpdated",
                EntityAction::Deleted => "customMarkerDeleted",
            },
            MapEvent::Ping { action, .. } => match action {
                PingAction::Created => "pingCreated",
                PingAction::Deleted => "pingDeleted",
            },
            MapEvent::Road { action, .. } => match action {
                EntityAction::Created => "roadCreated",
                EntityAction::Updated => "roadUpdated",
                EntityAction::Deleted => "roadDeleted",
            },
            MapEvent::Overlay { .. } => "overlayUpdated",
            MapEvent::Notification { action, .. } => match action {
                NotificationAction::Created => "notificationCreated",
                NotificationAction::Read => "notificationRead",
                NotificationAction::Dismissed => "notificationDismissed",
            },
            MapEvent::Timer { action, .. } => match action {
                TimerAction::Created => "timerCreated",
                TimerAction::Updated => "timerUpdated",
                TimerAction::Completed => "timerCompleted",
                TimerAction::Deleted => "timerDeleted",
            },
        };
        Some(name)
    }

    /// Serialize the data line of this event's frame
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            MapEvent::Tile(tile) => serde_json::to_string(&TileEntry::from(tile)),
            MapEvent::Characters(delta) => serde_json::to_string(&CharacterDeltaPayload::from_parts(
                delta.updates.values().cloned(),
                delta.deletions.iter().copied(),
            )),
            MapEvent::MapUpdated { map, .. } => serde_json::to_string(map),
            MapEvent::MapDeleted { map_id, .. } => {
                serde_json::to_string(&MapDeletedPayload { id: *map_id })
            }
            MapEvent::MapRevision {
                map_id, revision, ..
            } => serde_json::to_string(&MapRevisionPayload {
                map_id: *map_id,
                revision: *revision,
            }),
            MapEvent::Merge { merge, .. } => serde_json::to_string(merge),
            MapEvent::Marker { payload, .. }
            | MapEvent::CustomMarker { payload, .. }
            | MapEvent::Ping { payload, .. }
            | MapEvent::Road { payload, .. }
            | MapEvent::Overlay { payload, .. }
            | MapEvent::Notification { payload, .. }
            | MapEvent::Timer { payload, .. } => serde_json::to_string(payload),
        }
    }
}
