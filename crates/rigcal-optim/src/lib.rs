//! Bundle-adjustment state machinery for `rigcal`.
//!
//! This crate owns the calibration state (cameras, boards, poses, motion,
//! observations, inlier mask) and everything needed to refine it by
//! nonlinear least squares:
//! - a flag-dependent flat parameter layout with exact encode/decode,
//! - a Jacobian sparsity pattern matching the true residual dependencies,
//! - a stateless reprojection residual problem,
//! - a Levenberg-Marquardt backend behind a narrow solver trait,
//! - the iterative outlier-rejection adjustment loop.

pub mod adjust;
pub mod flags;
pub mod layout;
pub mod problem;
pub mod robust;
pub mod sparsity;
pub mod state;
pub mod stats;

#[cfg(test)]
mod test_fixtures;

pub use adjust::{select_threshold, AdjustOptions, LossKind, ScaleFn, ThresholdFn};
pub use flags::OptimizeFlags;
pub use layout::ParamLayout;
pub use problem::{LmBackend, ResidualProblem, SolveOptions, SolveReport, SolverBackend};
pub use robust::RobustKernel;
pub use sparsity::{build_pattern, IndexMapper, SparsityPattern};
pub use state::Calibration;
pub use stats::{error_stats, quantile, ErrorStats};
