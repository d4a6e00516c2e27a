//! Grid Fusion Engine.
//!
//! Lays the cached below-ground ESDF slice under an incoming above-ground
//! slice and keeps, per cell, the lower of the two distances.
//!
//! # Alignment
//!
//! The below grid must fit entirely inside the above grid. Its placement is
//! derived from the world-space origin difference, truncated to whole cells:
//!
//! ```text
//! near_row = |trunc((above.origin.x − below.origin.x) / resolution)|
//! near_col = |trunc((above.origin.y − below.origin.y) / resolution)|
//! far      = (above_dim − below_dim) − near
//! window   = above[near_row .. height − far_row, near_col .. width − far_col]
//! ```
//!
//! **The axes are swapped**: the world *x* difference selects the row offset
//! and the world *y* difference the column offset.
//!
//! # Example
//!
//! ```rust
//! use strata_fusion::field::{Origin2, SpatialField2D};
//! use strata_fusion::grid::{GridFusionConfig, GridFusionEngine};
//!
//! let engine = GridFusionEngine::new(GridFusionConfig {
//!     invert_below_ground: false,
//!     above_ground_denoise_level: 10.0,
//! });
//!
//! let below = SpatialField2D::filled(5.0, 1, 1, 1.0, Origin2::new(1.0, 1.0));
//! engine.update_below(below);
//!
//! let above = SpatialField2D::filled(8.0, 3, 3, 1.0, Origin2::new(0.0, 0.0));
//! let (fused, outcome) = engine.fuse(above);
//! assert!(outcome.is_fused());
//! assert_eq!(fused.get(1, 1), Some(5.0));
//! assert_eq!(fused.get(0, 0), Some(8.0));
//! ```

use std::ops::Range;

use strata_types::UNKNOWN_DISTANCE;
use tracing::debug;

use crate::cache::LayerCache;
use crate::field::SpatialField2D;
use crate::outcome::{FusionOutcome, PassThrough};

/// Distance at or below which a below-ground cell counts as a hole, and the
/// level above-ground obstacles are pushed to when denoising.
pub const DENOISE_THRESHOLD: f32 = 2.0;

/// Pivot for reflecting below-ground distances in invert mode.
pub const INVERT_PIVOT: f32 = 2.0;

/// Distance meaning "free" in the below layer.
pub const FREE_SPACE: f32 = 0.0;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Grid fusion policy, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFusionConfig {
    /// Reflect and squash the below layer instead of denoising both layers.
    pub invert_below_ground: bool,
    /// Above-ground cells at or above this distance are clamped to
    /// [`DENOISE_THRESHOLD`] when not inverting.
    pub above_ground_denoise_level: f32,
}

impl Default for GridFusionConfig {
    fn default() -> Self {
        Self {
            invert_below_ground: false,
            above_ground_denoise_level: 0.5,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Alignment
// ────────────────────────────────────────────────────────────────────────────

/// Cell offsets placing a below grid inside an above grid.
///
/// Both pairs are `(row, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    /// Index of the first aligned row / column.
    pub near: (usize, usize),
    /// Number of rows / columns left over past the aligned window.
    pub far: (usize, usize),
}

impl Alignment {
    /// Compute the alignment of `below` inside `above`.
    ///
    /// Offsets are measured in cells of `above`'s resolution.
    ///
    /// # Errors
    ///
    /// * [`PassThrough::BelowLarger`] – `below` exceeds `above` in an axis.
    /// * [`PassThrough::InvalidResolution`] – the resolution cannot convert
    ///   metres to cells.
    /// * [`PassThrough::WindowMismatch`] – the window would run past the far
    ///   edge of `above`.
    pub fn compute(above: &SpatialField2D, below: &SpatialField2D) -> Result<Self, PassThrough> {
        let (above_h, above_w) = above.shape();
        let (below_h, below_w) = below.shape();
        if below_h > above_h || below_w > above_w {
            return Err(PassThrough::BelowLarger);
        }

        let resolution = above.resolution();
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(PassThrough::InvalidResolution);
        }

        let a = above.origin();
        let b = below.origin();
        // x selects rows, y selects columns (see module docs).
        let near_row = cell_offset(a.x - b.x, resolution);
        let near_col = cell_offset(a.y - b.y, resolution);

        let far_row = (above_h - below_h)
            .checked_sub(near_row)
            .ok_or(PassThrough::WindowMismatch)?;
        let far_col = (above_w - below_w)
            .checked_sub(near_col)
            .ok_or(PassThrough::WindowMismatch)?;

        let alignment = Self {
            near: (near_row, near_col),
            far: (far_row, far_col),
        };
        if alignment.window_shape(above) != below.shape() {
            return Err(PassThrough::WindowMismatch);
        }
        Ok(alignment)
    }

    /// Row range of the aligned window inside a grid of `above`'s shape.
    pub fn rows(&self, above: &SpatialField2D) -> Range<usize> {
        self.near.0..above.height() - self.far.0
    }

    /// Column range of the aligned window inside a grid of `above`'s shape.
    pub fn cols(&self, above: &SpatialField2D) -> Range<usize> {
        self.near.1..above.width() - self.far.1
    }

    fn window_shape(&self, above: &SpatialField2D) -> (usize, usize) {
        (self.rows(above).len(), self.cols(above).len())
    }
}

/// `|trunc(delta / resolution)|` as a cell count.
fn cell_offset(delta: f64, resolution: f32) -> usize {
    // Float-to-int `as` saturates; NaN maps to 0.
    (delta / f64::from(resolution)).trunc().abs() as usize
}

// ────────────────────────────────────────────────────────────────────────────
// Value transforms
// ────────────────────────────────────────────────────────────────────────────

/// Standard logistic function `1 / (1 + e^−x)`.
pub fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Invert-mode transform of one below-ground distance.
///
/// The unknown sentinel is treated as free space, the distance is reflected
/// about [`INVERT_PIVOT`], squashed, and reflected again.
pub fn invert_below(v: f32) -> f32 {
    let v = if v == UNKNOWN_DISTANCE { FREE_SPACE } else { v };
    INVERT_PIVOT - logistic(INVERT_PIVOT - v)
}

/// Cell-wise minimum that keeps NaN instead of discarding it.
pub fn merge_min(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() { f32::NAN } else { a.min(b) }
}

/// Non-invert transform of one below-ground distance: holes become free.
pub fn denoise_below(v: f32) -> f32 {
    if v <= DENOISE_THRESHOLD { FREE_SPACE } else { v }
}

/// Non-invert transform of one above-ground distance: anything at or past
/// `level` is pushed to [`DENOISE_THRESHOLD`].
pub fn denoise_above(v: f32, level: f32) -> f32 {
    if v >= level { DENOISE_THRESHOLD } else { v }
}

// ────────────────────────────────────────────────────────────────────────────
// Fusion
// ────────────────────────────────────────────────────────────────────────────

/// Fuse `below` into `above`.
///
/// Always returns a grid to publish: either `above` with the below layer
/// merged into its aligned window, or `above` untouched together with the
/// reason fusion did not happen. `below` is never modified.
pub fn fuse_grids(
    mut above: SpatialField2D,
    below: Option<&SpatialField2D>,
    config: &GridFusionConfig,
) -> (SpatialField2D, FusionOutcome) {
    if above.is_empty() {
        return (above, FusionOutcome::PassThrough(PassThrough::EmptyInput));
    }
    let Some(below) = below.filter(|b| !b.is_empty()) else {
        return (above, FusionOutcome::PassThrough(PassThrough::NoCachedLayer));
    };
    let alignment = match Alignment::compute(&above, below) {
        Ok(a) => a,
        Err(reason) => return (above, FusionOutcome::PassThrough(reason)),
    };

    let mut below = below.clone();
    if config.invert_below_ground {
        below.map_in_place(invert_below);
    } else {
        below.map_in_place(denoise_below);
        let level = config.above_ground_denoise_level;
        above.map_in_place(|v| denoise_above(v, level));
    }

    let cols = alignment.cols(&above);
    for (below_row, above_row) in alignment.rows(&above).enumerate() {
        let window = &mut above.row_mut(above_row)[cols.clone()];
        for (a, &b) in window.iter_mut().zip(below.row(below_row)) {
            *a = merge_min(*a, b);
        }
    }

    let merged = below.height() * below.width();
    (above, FusionOutcome::Fused { merged })
}

// ────────────────────────────────────────────────────────────────────────────
// GridFusionEngine
// ────────────────────────────────────────────────────────────────────────────

/// Grid fusion with its own below-layer cache.
///
/// Feed below-ground slices via [`GridFusionEngine::update_below`]; every
/// above-ground slice handed to [`GridFusionEngine::fuse`] is fused against
/// the most recent one.
#[derive(Debug, Default)]
pub struct GridFusionEngine {
    config: GridFusionConfig,
    below: LayerCache<SpatialField2D>,
}

impl GridFusionEngine {
    pub fn new(config: GridFusionConfig) -> Self {
        Self {
            config,
            below: LayerCache::new(),
        }
    }

    pub fn config(&self) -> &GridFusionConfig {
        &self.config
    }

    /// Replace the cached below-ground grid (and with it, its origin).
    ///
    /// Empty grids are ignored so that a blank slice never wipes a good one.
    pub fn update_below(&self, field: SpatialField2D) {
        if field.is_empty() {
            debug!("ignoring empty below-ground grid");
            return;
        }
        debug!(
            height = field.height(),
            width = field.width(),
            "cached below-ground grid"
        );
        self.below.store(field);
    }

    /// True once a below-ground grid has been cached.
    pub fn has_below(&self) -> bool {
        self.below.is_present()
    }

    /// Fuse `above` against the current below-ground snapshot.
    pub fn fuse(&self, above: SpatialField2D) -> (SpatialField2D, FusionOutcome) {
        let below = self.below.snapshot();
        let (fused, outcome) = fuse_grids(above, below.as_deref(), &self.config);
        debug!(%outcome, "grid fusion");
        (fused, outcome)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
