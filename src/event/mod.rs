// Event distribution
//
// Producers publish typed map events onto a category-keyed bus; each stream
// session holds a tenant-bound subscription and drains it on its own tick.

// Public API - what other modules can use
pub use bus::EventBus;
pub use events::{
    Category, ChangeToken, CharacterDelta, CharacterDeltaPayload, CharacterId, CharacterState,
    Coord, EntityAction, MapDeletedPayload, MapEvent, MapId, MapInfo, MapRevisionPayload,
    MergeInfo, NotificationAction, PingAction, TenantId, TileChangeEvent, TileEntry, TileKey,
    TimerAction,
};
pub use subscription::{Subscription, SubscriptionError};

// Internal modules
mod bus;
mod events;
mod subscription;
