//! `strata-fusion` – above/below-ground layer fusion.
//!
//! Folds a cached below-ground ESDF layer into every incoming above-ground
//! layer, for both dense slices and packed point clouds.
//!
//! # Modules
//!
//! - [`field`] – [`SpatialField2D`][field::SpatialField2D]: dense row-major
//!   scalar grid with resolution and world origin.
//! - [`grid`] – [`GridFusionEngine`][grid::GridFusionEngine]: aligns the
//!   below grid inside the above grid by origin offset and keeps the
//!   cell-wise minimum.
//! - [`cloud`] – [`PointFusionEngine`][cloud::PointFusionEngine]: joins two
//!   packed `x, y, z, intensity` clouds on millimetre-rounded `(x, y)` and
//!   keeps the lower intensity.
//! - [`cache`] – [`LayerCache`][cache::LayerCache]: single-slot,
//!   snapshot-on-read store for the most recent below-layer input.
//! - [`stage`] – [`LayerFusion`][stage::LayerFusion]: message-level
//!   capability trait implemented by both engines.
//! - [`outcome`] – [`FusionOutcome`][outcome::FusionOutcome]: whether a call
//!   merged anything, and if not, why.

pub mod cache;
pub mod cloud;
pub mod field;
pub mod grid;
pub mod outcome;
pub mod stage;

pub use cache::LayerCache;
pub use cloud::{PointBuffer, PointFusionEngine, PointSample};
pub use field::{Origin2, SpatialField2D};
pub use grid::{Alignment, GridFusionConfig, GridFusionEngine};
pub use outcome::{FusionOutcome, PassThrough};
pub use stage::LayerFusion;
