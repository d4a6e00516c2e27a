//! ROS-shaped message types exchanged with the outside world.
//!
//! The field layout mirrors `nvblox_msgs/msg/DistanceMapSlice` and
//! `sensor_msgs/msg/PointCloud2` so that frames coming out of a
//! `rosbridge_server` deserialize without any translation layer.

use serde::{Deserialize, Serialize};

/// `builtin_interfaces/msg/Time`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

/// `std_msgs/msg/Header`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub frame_id: String,
}

/// `geometry_msgs/msg/Point`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A horizontal slice through an ESDF volume.
///
/// `data` is row-major with `height` rows of `width` cells; `origin` is the
/// world position of cell `(0, 0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMapSlice {
    #[serde(default)]
    pub header: Header,
    pub resolution: f32,
    pub width: u32,
    pub height: u32,
    pub origin: Point,
    /// Value written into cells that were never observed.
    #[serde(default = "default_unknown_value")]
    pub unknown_value: f32,
    pub data: Vec<f32>,
}

fn default_unknown_value() -> f32 {
    crate::UNKNOWN_DISTANCE
}

impl DistanceMapSlice {
    /// Number of cells implied by `width × height`.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// `sensor_msgs/msg/PointField`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    /// `sensor_msgs/msg/PointField::FLOAT32`.
    pub const FLOAT32: u8 = 7;

    pub fn float32(name: &str, offset: u32) -> Self {
        Self {
            name: name.to_string(),
            offset,
            datatype: Self::FLOAT32,
            count: 1,
        }
    }
}

/// `sensor_msgs/msg/PointCloud2`.
///
/// Only the packed `x, y, z, intensity` float32 layout is interpreted by the
/// fusion engine; everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud2 {
    #[serde(default)]
    pub header: Header,
    pub height: u32,
    pub width: u32,
    #[serde(default)]
    pub fields: Vec<PointField>,
    #[serde(default)]
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    #[serde(with = "byte_array")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub is_dense: bool,
}

impl PointCloud2 {
    /// Build an unorganised `x, y, z, intensity` cloud around `data`.
    pub fn xyzi(header: Header, data: Vec<u8>) -> Self {
        let point_step = 16;
        let width = (data.len() / point_step as usize) as u32;
        Self {
            header,
            height: 1,
            width,
            fields: vec![
                PointField::float32("x", 0),
                PointField::float32("y", 4),
                PointField::float32("z", 8),
                PointField::float32("intensity", 12),
            ],
            is_bigendian: false,
            point_step,
            row_step: width * point_step,
            data,
            is_dense: true,
        }
    }
}

/// ROS `uint8[]` fields travel as base64 strings through rosbridge, but plain
/// JSON arrays are common from hand-written clients. Both are accepted on the
/// way in; base64 is always written on the way out.
mod byte_array {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Encoded(String),
        Raw(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Wire::deserialize(deserializer)? {
            Wire::Encoded(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            Wire::Raw(bytes) => Ok(bytes),
        }
    }
}
