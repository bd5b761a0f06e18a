//! Error statistics and progress reporting.

use crate::state::Calibration;
use anyhow::{ensure, Result};
use rigcal_core::Real;

/// Linear-interpolation quantile over an unsorted sample.
///
/// Matches the convention where the `q`-quantile of `[1, 2, 3, 4]` at
/// `q = 0.5` is `2.5`: the index `q * (n - 1)` is interpolated between its
/// neighbours in the sorted sample.
pub fn quantile(values: &[Real], q: Real) -> Result<Real> {
    ensure!(!values.is_empty(), "quantile of an empty sample");
    ensure!((0.0..=1.0).contains(&q), "quantile {} outside [0, 1]", q);
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q * (sorted.len() - 1) as Real;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as Real;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Summary statistics of an error sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub mse: Real,
    pub rms: Real,
    /// `[min, p25, p50, p75, max]`.
    pub quantiles: [Real; 5],
    pub n: usize,
}

/// Compute error statistics; the sample must be non-empty.
pub fn error_stats(errors: &[Real]) -> Result<ErrorStats> {
    ensure!(!errors.is_empty(), "statistics of an empty error sample");
    let mse = errors.iter().map(|e| e * e).sum::<Real>() / errors.len() as Real;
    let mut quantiles = [0.0; 5];
    for (slot, q) in quantiles.iter_mut().zip([0.0, 0.25, 0.5, 0.75, 1.0]) {
        *slot = quantile(errors, q)?;
    }
    Ok(ErrorStats {
        mse,
        rms: mse.sqrt(),
        quantiles,
        n: errors.len(),
    })
}

impl Calibration {
    /// Log inlier and overall reprojection statistics for a pipeline stage.
    pub fn report(&self, stage: &str) {
        let overall = match self.reprojection_error().and_then(|e| error_stats(&e)) {
            Ok(stats) => stats,
            Err(_) => {
                log::warn!("{}: no valid observations to report", stage);
                return;
            }
        };

        if self.inlier_mask.is_some() {
            match self.reprojection_inliers().and_then(|e| error_stats(&e)) {
                Ok(inliers) => log::info!(
                    "{}: reprojection RMS={:.3} ({:.3}), n={} ({}), quantiles={:?}",
                    stage,
                    inliers.rms,
                    overall.rms,
                    inliers.n,
                    overall.n,
                    overall.quantiles
                ),
                Err(_) => log::warn!("{}: inlier set is empty", stage),
            }
        } else {
            log::info!(
                "{}: reprojection RMS={:.3}, n={}, quantiles={:?}",
                stage,
                overall.rms,
                overall.n,
                overall.quantiles
            );
        }
    }
}
