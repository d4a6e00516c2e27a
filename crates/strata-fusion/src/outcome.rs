//! What a fusion call actually did.
//!
//! Both engines always hand back a publishable output. The outcome tells the
//! caller whether that output carries merged below-layer data or is the
//! above-layer input passed through, and why.

use std::fmt;

/// Reason an above-layer input was emitted unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassThrough {
    /// The above-layer input carried no cells / points.
    EmptyInput,
    /// No below-layer data has been cached yet.
    NoCachedLayer,
    /// The cached below grid exceeds the above grid in at least one axis.
    BelowLarger,
    /// The above grid's resolution is zero, negative or not finite.
    InvalidResolution,
    /// The aligned sub-window does not match the below grid's shape.
    WindowMismatch,
    /// The input breaks its own shape invariant (grid data length differs
    /// from `width × height`, point buffer not a whole number of records,
    /// unsupported byte order).
    Malformed,
}

impl fmt::Display for PassThrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassThrough::EmptyInput => "empty above-layer input",
            PassThrough::NoCachedLayer => "no below-layer data cached",
            PassThrough::BelowLarger => "below grid larger than above grid",
            PassThrough::InvalidResolution => "invalid grid resolution",
            PassThrough::WindowMismatch => "aligned window does not match below grid",
            PassThrough::Malformed => "malformed input",
        };
        f.write_str(s)
    }
}

/// Result classification of one fusion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionOutcome {
    /// Below-layer values were merged into `merged` cells or points.
    Fused { merged: usize },
    /// The input was emitted unchanged.
    PassThrough(PassThrough),
}

impl FusionOutcome {
    pub fn is_fused(&self) -> bool {
        matches!(self, FusionOutcome::Fused { .. })
    }
}

impl fmt::Display for FusionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionOutcome::Fused { merged } => write!(f, "fused ({merged} merged)"),
            FusionOutcome::PassThrough(reason) => write!(f, "pass-through: {reason}"),
        }
    }
}
