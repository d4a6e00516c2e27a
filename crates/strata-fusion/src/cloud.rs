//! Point Fusion Engine.
//!
//! Merges the intensity channel of a cached below-ground ESDF point cloud
//! into an incoming above-ground cloud.
//!
//! Both clouds are packed `x, y, z, intensity` float32 records (16 bytes per
//! point, little-endian). A below point contributes to an above point only
//! when their `(x, y)` coincide after rounding to millimetres; the merged
//! intensity is the lower of the two. `z` is never looked at.
//!
//! ```text
//! key(p)   = (round_half_even(p.x * 1000), round_half_even(p.y * 1000))
//! above.i  = min(above.i, denoise(below.i))   for key(above) == key(below)
//! ```

use std::collections::HashMap;

use strata_types::StrataError;
use tracing::debug;

use crate::cache::LayerCache;
use crate::grid::{denoise_below, merge_min};
use crate::outcome::{FusionOutcome, PassThrough};

/// Floats per packed record.
pub const FLOATS_PER_POINT: usize = 4;

/// Bytes per packed record.
pub const POINT_STEP: usize = FLOATS_PER_POINT * std::mem::size_of::<f32>();

/// Coordinates are matched at this many decimal places.
const MATCH_SCALE: f32 = 1000.0;

const X: usize = 0;
const Y: usize = 1;
const INTENSITY: usize = 3;

// ────────────────────────────────────────────────────────────────────────────
// PointBuffer
// ────────────────────────────────────────────────────────────────────────────

/// A raw packed point buffer whose length is a whole number of records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PointBuffer {
    bytes: Vec<u8>,
}

impl PointBuffer {
    /// Wrap `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Parsing`] when the length is not a multiple of
    /// [`POINT_STEP`].
    pub fn new(bytes: Vec<u8>) -> Result<Self, StrataError> {
        if bytes.len() % POINT_STEP != 0 {
            return Err(StrataError::Parsing(format!(
                "point buffer of {} bytes is not a multiple of {POINT_STEP}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Encode `samples` as a packed buffer.
    pub fn from_samples(samples: &[PointSample]) -> Self {
        let mut floats = Vec::with_capacity(samples.len() * FLOATS_PER_POINT);
        for s in samples {
            floats.extend_from_slice(&[s.x, s.y, s.z, s.intensity]);
        }
        Self {
            bytes: encode(&floats),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / POINT_STEP
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Reinterpret the bytes as a flat float sequence.
    pub fn floats(&self) -> Vec<f32> {
        decode(&self.bytes)
    }

    /// Decode every record.
    pub fn samples(&self) -> Vec<PointSample> {
        self.floats()
            .chunks_exact(FLOATS_PER_POINT)
            .map(|r| PointSample::new(r[0], r[1], r[2], r[3]))
            .collect()
    }
}

/// One decoded record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl PointSample {
    pub fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self { x, y, z, intensity }
    }
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn encode(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Matching
// ────────────────────────────────────────────────────────────────────────────

/// Rounded `(x, y)` key used for the exact-match join.
type MatchKey = (i64, i64);

/// Round to millimetres with ties going to the even neighbour.
///
/// Returns `None` for NaN, which never equals anything.
fn match_key(x: f32, y: f32) -> Option<MatchKey> {
    if x.is_nan() || y.is_nan() {
        return None;
    }
    let rx = (x * MATCH_SCALE).round_ties_even() as i64;
    let ry = (y * MATCH_SCALE).round_ties_even() as i64;
    Some((rx, ry))
}

// ────────────────────────────────────────────────────────────────────────────
// Fusion
// ────────────────────────────────────────────────────────────────────────────

/// Fuse the cached `below` buffer into `above`.
///
/// Returns the above buffer with matched intensities lowered, or the above
/// buffer unchanged plus the reason nothing was merged. Record order, count
/// and byte length are always preserved.
///
/// When several below points share a rounded position, the one with the
/// highest index is applied last and determines the result.
pub fn fuse_points(above: Vec<u8>, below: Option<&PointBuffer>) -> (Vec<u8>, FusionOutcome) {
    if above.is_empty() {
        return (above, FusionOutcome::PassThrough(PassThrough::EmptyInput));
    }
    let Some(below) = below.filter(|b| !b.is_empty()) else {
        return (above, FusionOutcome::PassThrough(PassThrough::NoCachedLayer));
    };
    if above.len() % POINT_STEP != 0 {
        return (above, FusionOutcome::PassThrough(PassThrough::Malformed));
    }

    // Later inserts overwrite earlier ones, so each key ends up holding the
    // last below point that rounds to it.
    let below_floats = below.floats();
    let mut index: HashMap<MatchKey, f32> = HashMap::with_capacity(below.len());
    for record in below_floats.chunks_exact(FLOATS_PER_POINT) {
        if let Some(key) = match_key(record[X], record[Y]) {
            index.insert(key, denoise_below(record[INTENSITY]));
        }
    }

    let mut floats = decode(&above);
    let mut merged = 0;
    for record in floats.chunks_exact_mut(FLOATS_PER_POINT) {
        let Some(&below_intensity) = match_key(record[X], record[Y]).and_then(|k| index.get(&k))
        else {
            continue;
        };
        record[INTENSITY] = merge_min(record[INTENSITY], below_intensity);
        merged += 1;
    }

    if merged == 0 {
        // Nothing changed; hand back the original bytes untouched.
        return (above, FusionOutcome::Fused { merged });
    }
    (encode(&floats), FusionOutcome::Fused { merged })
}

// ────────────────────────────────────────────────────────────────────────────
// PointFusionEngine
// ────────────────────────────────────────────────────────────────────────────

/// Point-cloud fusion with its own below-layer cache.
#[derive(Debug, Default)]
pub struct PointFusionEngine {
    below: LayerCache<PointBuffer>,
}

impl PointFusionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached below-ground cloud.
    ///
    /// Empty buffers are ignored; the raw bytes are decoded only when an
    /// above-ground cloud arrives.
    pub fn update_below(&self, buffer: PointBuffer) {
        if buffer.is_empty() {
            debug!("ignoring empty below-ground cloud");
            return;
        }
        debug!(points = buffer.len(), "cached below-ground cloud");
        self.below.store(buffer);
    }

    pub fn has_below(&self) -> bool {
        self.below.is_present()
    }

    /// Fuse the raw `above` bytes against the current below-ground snapshot.
    pub fn fuse(&self, above: Vec<u8>) -> (Vec<u8>, FusionOutcome) {
        let below = self.below.snapshot();
        let (fused, outcome) = fuse_points(above, below.as_deref());
        debug!(%outcome, "point fusion");
        (fused, outcome)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(points: &[(f32, f32, f32, f32)]) -> PointBuffer {
        let samples: Vec<PointSample> = points
            .iter()
            .map(|&(x, y, z, i)| PointSample::new(x, y, z, i))
            .collect();
        PointBuffer::from_samples(&samples)
    }

    fn intensities(bytes: &[u8]) -> Vec<f32> {
        PointBuffer::new(bytes.to_vec())
            .unwrap()
            .samples()
            .iter()
            .map(|s| s.intensity)
            .collect()
    }

    #[test]
    fn point_buffer_rejects_partial_record() {
        assert!(matches!(PointBuffer::new(vec![0; 17]), Err(StrataError::Parsing(_))));
        assert!(PointBuffer::new(vec![0; 32]).is_ok());
    }

    #[test]
    fn samples_decode_record_layout() {
        let b = buf(&[(1.0, 2.0, 3.0, 4.0), (5.0, 6.0, 7.0, 8.0)]);
        assert_eq!(b.len(), 2);
        assert_eq!(b.as_bytes().len(), 32);
        assert_eq!(b.samples()[1], PointSample::new(5.0, 6.0, 7.0, 8.0));
        assert_eq!(&b.as_bytes()[0..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn coincident_points_take_minimum() {
        let above = buf(&[(1.0001, 2.0, 0.0, 5.0), (1.1, 2.0, 0.0, 5.0)]);
        let below = buf(&[(1.0, 2.0, 0.0, 1.0)]);
        let (out, outcome) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(outcome, FusionOutcome::Fused { merged: 1 });
        // below 1.0 is denoised to 0 before the merge.
        assert_eq!(intensities(&out), vec![0.0, 5.0]);
    }

    #[test]
    fn below_above_threshold_is_merged_as_is() {
        let above = buf(&[(1.0001, 2.0, 0.0, 5.0)]);
        let below = buf(&[(1.0, 2.0, 0.0, 3.0)]);
        let (out, _) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(intensities(&out), vec![3.0]);
    }

    #[test]
    fn below_exactly_threshold_is_zeroed() {
        let above = buf(&[(0.25, 0.75, 0.0, 3.0)]);
        let below = buf(&[(0.25, 0.75, 0.0, 2.0)]);
        let (out, _) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(intensities(&out), vec![0.0]);
    }

    #[test]
    fn nan_above_intensity_is_kept_when_matched() {
        let above = buf(&[(1.0, 1.0, 0.0, f32::NAN)]);
        let below = buf(&[(1.0, 1.0, 0.0, 5.0)]);
        let (out, outcome) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(outcome, FusionOutcome::Fused { merged: 1 });
        assert!(intensities(&out)[0].is_nan());
    }

    #[test]
    fn below_denoise_zeroes_small_intensity() {
        let above = buf(&[(0.5, 0.5, 0.0, 3.0)]);
        let below = buf(&[(0.5, 0.5, 9.0, 1.5)]);
        let (out, _) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(intensities(&out), vec![0.0]);
    }

    #[test]
    fn lower_above_intensity_is_kept() {
        let above = buf(&[(0.0, 0.0, 0.0, 2.5)]);
        let below = buf(&[(0.0, 0.0, 0.0, 4.0)]);
        let (out, outcome) = fuse_points(above.into_bytes(), Some(&below));
        assert!(outcome.is_fused());
        assert_eq!(intensities(&out), vec![2.5]);
    }

    #[test]
    fn z_and_coordinates_are_untouched() {
        let above = buf(&[(3.0, 4.0, 1.25, 9.0)]);
        let below = buf(&[(3.0, 4.0, -7.0, 4.0)]);
        let (out, _) = fuse_points(above.into_bytes(), Some(&below));
        let s = PointBuffer::new(out).unwrap().samples()[0];
        assert_eq!(s, PointSample::new(3.0, 4.0, 1.25, 4.0));
    }

    #[test]
    fn no_cached_below_returns_identical_bytes() {
        let above = buf(&[(1.0, 2.0, 3.0, 4.0), (-1.0, 0.5, 0.0, 0.25)]).into_bytes();
        let (out, outcome) = fuse_points(above.clone(), None);
        assert_eq!(out, above);
        assert_eq!(outcome, FusionOutcome::PassThrough(PassThrough::NoCachedLayer));
    }

    #[test]
    fn unmatched_points_return_identical_bytes() {
        let above = buf(&[(1.0, 2.0, 3.0, 4.0)]).into_bytes();
        let below = buf(&[(9.0, 9.0, 9.0, 0.0)]);
        let (out, outcome) = fuse_points(above.clone(), Some(&below));
        assert_eq!(out, above);
        assert_eq!(outcome, FusionOutcome::Fused { merged: 0 });
    }

    #[test]
    fn empty_above_passes_through() {
        let below = buf(&[(0.0, 0.0, 0.0, 0.0)]);
        let (out, outcome) = fuse_points(Vec::new(), Some(&below));
        assert!(out.is_empty());
        assert_eq!(outcome, FusionOutcome::PassThrough(PassThrough::EmptyInput));
    }

    #[test]
    fn malformed_above_passes_through() {
        let below = buf(&[(0.0, 0.0, 0.0, 0.0)]);
        let above = vec![1u8; 20];
        let (out, outcome) = fuse_points(above.clone(), Some(&below));
        assert_eq!(out, above);
        assert_eq!(outcome, FusionOutcome::PassThrough(PassThrough::Malformed));
    }

    #[test]
    fn last_duplicate_below_point_wins() {
        let above = buf(&[(1.0, 1.0, 0.0, 10.0)]);
        let below = buf(&[(1.0, 1.0, 0.0, 3.0), (1.0004, 1.0, 0.0, 8.0)]);
        let (out, _) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(intensities(&out), vec![8.0]);
    }

    #[test]
    fn nan_coordinates_never_match() {
        let above = buf(&[(f32::NAN, 0.0, 0.0, 10.0)]);
        let below = buf(&[(f32::NAN, 0.0, 0.0, 3.0)]);
        let (out, _) = fuse_points(above.into_bytes(), Some(&below));
        assert_eq!(intensities(&out), vec![10.0]);
    }

    #[test]
    fn engine_caches_latest_below() {
        let engine = PointFusionEngine::new();
        assert!(!engine.has_below());
        engine.update_below(buf(&[(0.0, 0.0, 0.0, 5.0)]));
        engine.update_below(buf(&[(0.0, 0.0, 0.0, 4.0)]));
        engine.update_below(PointBuffer::default());
        assert!(engine.has_below());

        let (out, _) = engine.fuse(buf(&[(0.0, 0.0, 0.0, 9.0)]).into_bytes());
        assert_eq!(intensities(&out), vec![4.0]);
    }
}
