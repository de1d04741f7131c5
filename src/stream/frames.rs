use axum::response::sse::Event;
use serde::Serialize;

use crate::event::{MapEvent, TileEntry};

pub const CHARACTER_DELTA: &str = "characterDelta";
pub const CHARACTERS_SNAPSHOT: &str = "charactersSnapshot";
pub const MAP_REVISION: &str = "mapRevision";

/// One unit written to a client's event stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A data frame; unnamed frames (`event: None`) carry tile batches
    Data {
        event: Option<&'static str>,
        data: String,
    },
    /// Zero-payload comment line keeping intermediaries from closing an idle stream
    Heartbeat,
}

impl Frame {
    /// Unnamed frame holding a JSON array of tiles
    pub fn tile_batch(tiles: &[TileEntry]) -> Result<Self, serde_json::Error> {
        Ok(Frame::Data {
            event: None,
            data: serde_json::to_string(tiles)?,
        })
    }

    pub fn named<T: Serialize + ?Sized>(
        event: &'static str,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Frame::Data {
            event: Some(event),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Frame for an event that is forwarded as soon as it is drained
    pub fn from_event(event: &MapEvent) -> Result<Self, serde_json::Error> {
        Ok(Frame::Data {
            event: event.event_name(),
            data: event.payload_json()?,
        })
    }

    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Frame::Data { event, .. } => *event,
            Frame::Heartbeat => None,
        }
    }

    pub fn data(&self) -> Option<&str> {
        match self {
            Frame::Data { data, .. } => Some(data),
            Frame::Heartbeat => None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Heartbeat)
    }

    /// Whether this is an unnamed tile batch
    pub fn is_tile_batch(&self) -> bool {
        matches!(self, Frame::Data { event: None, .. })
    }

    pub fn into_sse_event(self) -> Event {
        match self {
            Frame::Data {
                event: Some(name),
                data,
            } => Event::default().event(name).data(data),
            Frame::Data { event: None, data } => Event::default().data(data),
            Frame::Heartbeat => Event::default().comment(""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EntityAction, MapEvent, TenantId};
    use serde_json::{json, Value};

    #[test]
    fn test_tile_batch_is_unnamed_array() {
        let tiles = vec![
            TileEntry {
                map_id: 7,
                x: 1,
                y: 2,
                zoom: 0,
                token: 10,
            },
            TileEntry {
                map_id: 7,
                x: 1,
                y: 3,
                zoom: 0,
                token: 11,
            },
        ];

        let frame = Frame::tile_batch(&tiles).unwrap();

        assert!(frame.is_tile_batch());
        assert_eq!(frame.event_name(), None);
        let json: Value = serde_json::from_str(frame.data().unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[1]["T"], 11);
    }

    #[test]
    fn test_from_event_uses_event_name() {
        let event = MapEvent::Road {
            tenant_id: TenantId::from("acme"),
            action: EntityAction::Deleted,
            payload: json!({"id": 12}),
        };

        let frame = Frame::from_event(&event).unwrap();

        assert_eq!(frame.event_name(), Some("roadDeleted"));
        assert_eq!(frame.data(), Some(r#"{"id":12}"#));
        assert!(!frame.is_heartbeat());
    }

    #[test]
    fn test_heartbeat_has_no_payload() {
        let frame = Frame::Heartbeat;
        assert!(frame.is_heartbeat());
        assert!(frame.data().is_none());
        assert!(!frame.is_tile_batch());
    }

    #[test]
    fn test_named_payload() {
        let frame = Frame::named(MAP_REVISION, &json!({"mapId": 1, "revision": 2})).unwrap();
        assert_eq!(frame.event_name(), Some("mapRevision"));
    }
}
