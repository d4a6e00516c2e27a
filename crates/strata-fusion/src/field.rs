//! Dense 2-D scalar fields.
//!
//! A [`SpatialField2D`] is the in-memory form of a
//! [`DistanceMapSlice`]: a row-major block of `height × width` values, the
//! world size of one cell, and the world position of cell `(0, 0)`.

use strata_types::{DistanceMapSlice, StrataError};

// ────────────────────────────────────────────────────────────────────────────
// Origin2
// ────────────────────────────────────────────────────────────────────────────

/// World-space position of a grid's reference corner.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Origin2 {
    pub x: f64,
    pub y: f64,
}

impl Origin2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SpatialField2D
// ────────────────────────────────────────────────────────────────────────────

/// A dense grid of scalar values with resolution and world-space origin.
///
/// The invariant `values.len() == height * width` is enforced by every
/// constructor. Zero-sized fields are valid.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialField2D {
    values: Vec<f32>,
    height: usize,
    width: usize,
    /// World units per cell.
    resolution: f32,
    origin: Origin2,
}

impl SpatialField2D {
    /// Build a field from row-major `values`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Shape`] when `values.len() != height * width`.
    pub fn new(
        values: Vec<f32>,
        height: usize,
        width: usize,
        resolution: f32,
        origin: Origin2,
    ) -> Result<Self, StrataError> {
        let expected = height * width;
        if values.len() != expected {
            return Err(StrataError::Shape {
                expected,
                found: values.len(),
            });
        }
        Ok(Self {
            values,
            height,
            width,
            resolution,
            origin,
        })
    }

    /// A field of `height × width` cells all set to `value`.
    pub fn filled(value: f32, height: usize, width: usize, resolution: f32, origin: Origin2) -> Self {
        Self {
            values: vec![value; height * width],
            height,
            width,
            resolution,
            origin,
        }
    }

    /// Convert a [`DistanceMapSlice`] into a field, copying its data.
    pub fn from_slice(msg: &DistanceMapSlice) -> Result<Self, StrataError> {
        Self::new(
            msg.data.clone(),
            msg.height as usize,
            msg.width as usize,
            msg.resolution,
            Origin2::new(msg.origin.x, msg.origin.y),
        )
    }

    /// Replace the data of `msg` with this field's values.
    ///
    /// Everything else in the message (header, origin, shape) is left as the
    /// inbound message had it.
    pub fn write_into(self, msg: &mut DistanceMapSlice) {
        msg.data = self.values;
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn origin(&self) -> Origin2 {
        self.origin
    }

    /// True when the field holds no cells at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.height && col < self.width {
            Some(self.values[row * self.width + col])
        } else {
            None
        }
    }

    /// One row as a slice.
    ///
    /// # Panics
    ///
    /// Panics when `row >= height`.
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.width;
        &self.values[start..start + self.width]
    }

    /// One row as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics when `row >= height`.
    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        let start = row * self.width;
        &mut self.values[start..start + self.width]
    }

    /// Apply `f` to every cell in place.
    pub fn map_in_place(&mut self, f: impl Fn(f32) -> f32) {
        for v in &mut self.values {
            *v = f(*v);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
