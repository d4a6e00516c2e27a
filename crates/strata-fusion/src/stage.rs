//! Message-level capability interface over the fusion engines.
//!
//! A [`LayerFusion`] stage accepts whole ROS-shaped messages: below-layer
//! messages refresh the stage's cache, above-layer messages come back fused
//! (or untouched). The transport's composition root holds one boxed stage per
//! enabled data shape and never needs to know which engine sits behind it.

use strata_types::{DistanceMapSlice, PointCloud2};
use tracing::warn;

use crate::cloud::{PointBuffer, PointFusionEngine};
use crate::field::SpatialField2D;
use crate::grid::GridFusionEngine;
use crate::outcome::{FusionOutcome, PassThrough};

/// One independently constructible fusion capability.
pub trait LayerFusion: Send + Sync {
    /// The message type this stage consumes and emits.
    type Message;

    /// Human-readable stage name used in logs.
    fn name(&self) -> &'static str;

    /// Cache a below-layer message. Malformed or empty messages are dropped.
    fn update_below(&self, msg: Self::Message);

    /// Fuse an above-layer message against the cache.
    ///
    /// Always returns the message to publish.
    fn fuse_above(&self, msg: Self::Message) -> (Self::Message, FusionOutcome);
}

// ────────────────────────────────────────────────────────────────────────────
// Grid stage
// ────────────────────────────────────────────────────────────────────────────

impl LayerFusion for GridFusionEngine {
    type Message = DistanceMapSlice;

    fn name(&self) -> &'static str {
        "grid"
    }

    fn update_below(&self, msg: DistanceMapSlice) {
        match SpatialField2D::from_slice(&msg) {
            Ok(field) => GridFusionEngine::update_below(self, field),
            Err(e) => warn!(error = %e, "dropping malformed below-ground slice"),
        }
    }

    fn fuse_above(&self, mut msg: DistanceMapSlice) -> (DistanceMapSlice, FusionOutcome) {
        if msg.data.is_empty() {
            return (msg, FusionOutcome::PassThrough(PassThrough::EmptyInput));
        }
        let field = match SpatialField2D::from_slice(&msg) {
            Ok(field) => field,
            Err(e) => {
                warn!(error = %e, "above-ground slice is malformed; passing through");
                return (msg, FusionOutcome::PassThrough(PassThrough::Malformed));
            }
        };
        let (fused, outcome) = self.fuse(field);
        if outcome.is_fused() {
            fused.write_into(&mut msg);
        }
        (msg, outcome)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Point stage
// ────────────────────────────────────────────────────────────────────────────

impl LayerFusion for PointFusionEngine {
    type Message = PointCloud2;

    fn name(&self) -> &'static str {
        "pointcloud"
    }

    fn update_below(&self, msg: PointCloud2) {
        if msg.is_bigendian {
            warn!("dropping big-endian below-ground cloud");
            return;
        }
        match PointBuffer::new(msg.data) {
            Ok(buffer) => PointFusionEngine::update_below(self, buffer),
            Err(e) => warn!(error = %e, "dropping malformed below-ground cloud"),
        }
    }

    fn fuse_above(&self, mut msg: PointCloud2) -> (PointCloud2, FusionOutcome) {
        if msg.is_bigendian {
            warn!("above-ground cloud is big-endian; passing through");
            return (msg, FusionOutcome::PassThrough(PassThrough::Malformed));
        }
        let data = std::mem::take(&mut msg.data);
        let (fused, outcome) = self.fuse(data);
        if outcome == FusionOutcome::PassThrough(PassThrough::Malformed) {
            warn!(bytes = fused.len(), "above-ground cloud is malformed; passing through");
        }
        msg.data = fused;
        (msg, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PointSample;
    use crate::grid::GridFusionConfig;
    use strata_types::{Header, Point, UNKNOWN_DISTANCE};

    fn slice(data: Vec<f32>, h: u32, w: u32, origin: (f64, f64)) -> DistanceMapSlice {
        DistanceMapSlice {
            header: Header {
                frame_id: "map".to_string(),
                ..Header::default()
            },
            resolution: 1.0,
            width: w,
            height: h,
            origin: Point::new(origin.0, origin.1, 0.0),
            unknown_value: UNKNOWN_DISTANCE,
            data,
        }
    }

    fn cloud(points: &[(f32, f32, f32, f32)]) -> PointCloud2 {
        let samples: Vec<PointSample> = points
            .iter()
            .map(|&(x, y, z, i)| PointSample::new(x, y, z, i))
            .collect();
        PointCloud2::xyzi(Header::default(), PointBuffer::from_samples(&samples).into_bytes())
    }

    fn grid_stage() -> GridFusionEngine {
        GridFusionEngine::new(GridFusionConfig {
            invert_below_ground: false,
            above_ground_denoise_level: 100.0,
        })
    }

    #[test]
    fn grid_stage_fuses_message_and_keeps_metadata() {
        let stage = grid_stage();
        LayerFusion::update_below(&stage, slice(vec![3.0], 1, 1, (1.0, 1.0)));

        let above = slice(vec![5.0; 9], 3, 3, (0.0, 0.0));
        let (out, outcome) = stage.fuse_above(above.clone());
        assert!(outcome.is_fused());
        assert_eq!(out.data[4], 3.0);
        assert_eq!(out.header, above.header);
        assert_eq!(out.origin, above.origin);
        assert_eq!((out.width, out.height), (3, 3));
    }

    #[test]
    fn grid_stage_passes_malformed_above_through() {
        let stage = grid_stage();
        LayerFusion::update_below(&stage, slice(vec![3.0], 1, 1, (0.0, 0.0)));
        let bad = slice(vec![5.0; 5], 3, 3, (0.0, 0.0));
        let (out, outcome) = stage.fuse_above(bad.clone());
        assert_eq!(out, bad);
        assert!(!outcome.is_fused());
    }

    #[test]
    fn grid_stage_drops_malformed_below() {
        let stage = grid_stage();
        LayerFusion::update_below(&stage, slice(vec![3.0; 2], 3, 3, (0.0, 0.0)));
        assert!(!stage.has_below());
    }

    #[test]
    fn grid_stage_empty_above_is_returned_as_is() {
        let stage = grid_stage();
        let empty = slice(Vec::new(), 0, 0, (0.0, 0.0));
        let (out, outcome) = stage.fuse_above(empty.clone());
        assert_eq!(out, empty);
        assert_eq!(outcome, FusionOutcome::PassThrough(PassThrough::EmptyInput));
    }

    #[test]
    fn point_stage_fuses_message() {
        let stage = PointFusionEngine::new();
        LayerFusion::update_below(&stage, cloud(&[(1.0, 2.0, 0.0, 1.0)]));
        let above = cloud(&[(1.0001, 2.0, 0.0, 5.0), (1.1, 2.0, 0.0, 5.0)]);
        let (out, outcome) = stage.fuse_above(above.clone());
        assert_eq!(outcome, FusionOutcome::Fused { merged: 1 });
        assert_eq!(out.data.len(), above.data.len());
        assert_eq!(out.width, above.width);
        let samples = PointBuffer::new(out.data).unwrap().samples();
        assert_eq!(samples[0].intensity, 0.0);
        assert_eq!(samples[1].intensity, 5.0);
    }

    #[test]
    fn point_stage_rejects_big_endian() {
        let stage = PointFusionEngine::new();
        let mut below = cloud(&[(0.0, 0.0, 0.0, 0.0)]);
        below.is_bigendian = true;
        LayerFusion::update_below(&stage, below);
        assert!(!stage.has_below());

        LayerFusion::update_below(&stage, cloud(&[(0.0, 0.0, 0.0, 0.0)]));
        let mut above = cloud(&[(0.0, 0.0, 0.0, 7.0)]);
        above.is_bigendian = true;
        let (out, outcome) = stage.fuse_above(above.clone());
        assert_eq!(out, above);
        assert_eq!(outcome, FusionOutcome::PassThrough(PassThrough::Malformed));
    }

    #[test]
    fn point_stage_drops_malformed_below() {
        let stage = PointFusionEngine::new();
        let mut below = cloud(&[(0.0, 0.0, 0.0, 0.0)]);
        below.data.pop();
        LayerFusion::update_below(&stage, below);
        assert!(!stage.has_below());
    }

    #[test]
    fn stage_names() {
        assert_eq!(grid_stage().name(), "grid");
        assert_eq!(PointFusionEngine::new().name(), "pointcloud");
    }
}
