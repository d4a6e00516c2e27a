//! `strata-types` – shared vocabulary for the Strata layer-fusion stack.
//!
//! Holds the ROS-shaped [`msg`] types, the [`Event`] envelope routed over the
//! internal bus and the workspace-wide [`StrataError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod msg;

pub use msg::{DistanceMapSlice, Header, Point, PointCloud2, PointField, Time};

/// Distance value nvblox writes into cells it has never observed.
pub const UNKNOWN_DISTANCE: f32 = 1000.0;

/// Which side of the ground plane a message was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// The base layer; fused output is always derived from it.
    Above,
    /// The cached layer that only ever contributes values.
    Below,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "strata-middleware::rosbridge/nvblox_node/static_map_slice"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    MapSlice(DistanceMapSlice),
    PointCloud(PointCloud2),
    /// Free-form status line for operators (stage enabled, input rejected, …).
    Diagnostic(String),
}

/// Global error type for the transport and configuration boundaries.
///
/// The fusion engines themselves never fail; they fall back to
/// pass-through and report an outcome instead.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum StrataError {
    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Shape Mismatch: expected {expected} values, found {found}")]
    Shape { expected: usize, found: usize },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice() -> DistanceMapSlice {
        DistanceMapSlice {
            header: Header::default(),
            resolution: 0.05,
            width: 2,
            height: 1,
            origin: Point::new(1.0, -2.0, 0.0),
            unknown_value: UNKNOWN_DISTANCE,
            data: vec![0.25, 1000.0],
        }
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new("strata-middleware::test", EventPayload::MapSlice(slice()));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        match back.payload {
            EventPayload::MapSlice(s) => assert_eq!(s, slice()),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn map_slice_defaults_missing_optional_fields() {
        let json = r#"{"resolution":0.1,"width":1,"height":1,"origin":{"x":0.0,"y":0.0},"data":[3.5]}"#;
        let s: DistanceMapSlice = serde_json::from_str(json).unwrap();
        assert_eq!(s.unknown_value, UNKNOWN_DISTANCE);
        assert_eq!(s.header.frame_id, "");
        assert_eq!(s.cell_count(), 1);
    }

    #[test]
    fn point_cloud_data_is_written_as_base64() {
        let cloud = PointCloud2::xyzi(Header::default(), vec![0, 0, 128, 63]);
        let json = serde_json::to_value(&cloud).unwrap();
        assert_eq!(json["data"], "AACAPw==");
    }

    #[test]
    fn point_cloud_data_accepts_base64_and_arrays() {
        let encoded = r#"{"height":1,"width":1,"point_step":16,"row_step":16,"data":"AACAPw=="}"#;
        let raw = r#"{"height":1,"width":1,"point_step":16,"row_step":16,"data":[0,0,128,63]}"#;
        let a: PointCloud2 = serde_json::from_str(encoded).unwrap();
        let b: PointCloud2 = serde_json::from_str(raw).unwrap();
        assert_eq!(a.data, vec![0, 0, 128, 63]);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn xyzi_cloud_layout() {
        let cloud = PointCloud2::xyzi(Header::default(), vec![0u8; 48]);
        assert_eq!(cloud.width, 3);
        assert_eq!(cloud.row_step, 48);
        assert_eq!(cloud.fields.len(), 4);
        assert_eq!(cloud.fields[3].name, "intensity");
        assert_eq!(cloud.fields[3].offset, 12);
    }

    #[test]
    fn strata_error_display() {
        let err = StrataError::Shape { expected: 4, found: 3 };
        assert!(err.to_string().contains("expected 4"));

        let err2 = StrataError::Parsing("bad frame".to_string());
        assert!(err2.to_string().contains("bad frame"));
    }

    #[test]
    fn layer_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Layer::Below).unwrap(), "\"below\"");
    }
}
