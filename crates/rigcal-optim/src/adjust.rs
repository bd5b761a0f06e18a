//! Bundle adjustment and the outlier-rejection loop.

use crate::problem::{LmBackend, ReprojectionProblem, SolveOptions, SolverBackend};
use crate::robust::RobustKernel;
use crate::state::Calibration;
use crate::stats::quantile;
use anyhow::{ensure, Result};
use rigcal_core::Real;

/// Robust loss selector for [`AdjustOptions`]; the scale comes from
/// `f_scale` (possibly auto-computed per iteration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LossKind {
    #[default]
    Linear,
    SoftL1,
    Huber,
    Cauchy,
}

impl LossKind {
    fn kernel(self, f_scale: Real) -> RobustKernel {
        match self {
            LossKind::Linear => RobustKernel::None,
            LossKind::SoftL1 => RobustKernel::SoftL1 { scale: f_scale },
            LossKind::Huber => RobustKernel::Huber { scale: f_scale },
            LossKind::Cauchy => RobustKernel::Cauchy { scale: f_scale },
        }
    }
}

/// Options for a single bundle-adjustment solve.
#[derive(Debug, Clone, Copy)]
pub struct AdjustOptions {
    pub tolerance: Real,
    pub f_scale: Real,
    pub max_iterations: usize,
    pub loss: LossKind,
    pub verbose: bool,
}

impl Default for AdjustOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            f_scale: 1.0,
            max_iterations: 100,
            loss: LossKind::Linear,
            verbose: false,
        }
    }
}

/// Policy computing a rejection threshold from the overall error sample.
pub type ThresholdFn = Box<dyn Fn(&[Real]) -> Result<Real>>;
/// Policy computing the robust-loss scale from the overall error sample.
pub type ScaleFn = Box<dyn Fn(&[Real]) -> Result<Real>>;

/// Quantile-based threshold policy: `quantile(errors, q) * factor`.
pub fn select_threshold(q: Real, factor: Real) -> ThresholdFn {
    Box::new(move |errors| Ok(quantile(errors, q)? * factor))
}

impl Calibration {
    /// Refine the state by nonlinear least squares on the current inliers,
    /// using the default [`LmBackend`].
    pub fn bundle_adjust(&self, opts: &AdjustOptions) -> Result<Calibration> {
        self.bundle_adjust_with(&LmBackend, opts)
    }

    /// Refine the state with an explicit solver backend.
    ///
    /// Whatever vector the backend returns is decoded and accepted as the
    /// new state; non-convergence is logged, not surfaced.
    pub fn bundle_adjust_with<B: SolverBackend>(
        &self,
        backend: &B,
        opts: &AdjustOptions,
    ) -> Result<Calibration> {
        let problem = ReprojectionProblem::new(self, opts.loss.kernel(opts.f_scale))?;
        let x0 = problem.initial();
        let (x, report) = backend.solve(
            &problem,
            x0,
            &SolveOptions {
                max_iterations: opts.max_iterations,
                tolerance: opts.tolerance,
                verbose: opts.verbose,
            },
        );
        log::info!(
            "bundle adjust: {} evaluations, cost {:.6e}, converged={}",
            report.iterations,
            report.final_cost,
            report.converged
        );
        problem.decode(&x)
    }

    /// New state whose inlier mask keeps valid cells with error within
    /// `threshold` (inclusive, so a threshold at the error maximum keeps
    /// every valid cell). Errors when there is no valid cell at all.
    pub fn reject_outliers(&self, threshold: Real) -> Result<Calibration> {
        let (errors, valid) = self.cell_errors()?;
        let num_valid = valid.iter().filter(|&&v| v).count();
        ensure!(num_valid > 0, "no valid observations to threshold");

        let inliers: Vec<bool> = errors
            .iter()
            .zip(&valid)
            .map(|(&e, &v)| v && e <= threshold)
            .collect();
        let num_inliers = inliers.iter().filter(|&&v| v).count();
        let num_outliers = num_valid - num_inliers;
        log::info!(
            "rejecting {} outliers with error > {:.2} pixels, keeping {} / {} inliers ({:.2}%)",
            num_outliers,
            threshold,
            num_inliers,
            num_valid,
            100.0 * num_inliers as Real / num_valid as Real
        );

        self.with_inlier_mask(Some(inliers))
    }

    /// Threshold at `quantile(overall error, q) * factor`, then reject.
    pub fn reject_outliers_quantile(&self, q: Real, factor: Real) -> Result<Calibration> {
        let errors = self.reprojection_error()?;
        let threshold = quantile(&errors, q)? * factor;
        self.reject_outliers(threshold)
    }

    /// Alternate solving and re-masking for a fixed number of iterations.
    ///
    /// Runs exactly `num_adjustments` solves, with no convergence-based
    /// early exit. Each iteration: report, compute the robust-loss scale
    /// from the overall pre-rejection error (1.0 without an `auto_scale`
    /// policy), optionally recompute the inlier mask via `outliers`, then
    /// solve.
    pub fn adjust_outliers(
        &self,
        num_adjustments: usize,
        auto_scale: Option<&ScaleFn>,
        outliers: Option<&ThresholdFn>,
        opts: &AdjustOptions,
    ) -> Result<Calibration> {
        log::info!(
            "beginning adjustments ({}), enabled: {:?}",
            num_adjustments,
            self.optimize
        );

        let mut state = self.clone();
        for i in 0..num_adjustments {
            state.report(&format!("adjust_outliers {}", i));

            // The scale sample is the overall error before this iteration's
            // rejection, matching the established rejection behavior.
            let f_scale = match auto_scale {
                Some(policy) => {
                    let errors = state.reprojection_error()?;
                    ensure!(!errors.is_empty(), "no valid observations for auto scaling");
                    let scale = policy(&errors)?;
                    log::info!("auto scaling for outlier influence at {:.4}", scale);
                    scale
                }
                None => 1.0,
            };

            if let Some(policy) = outliers {
                let errors = state.reprojection_error()?;
                ensure!(!errors.is_empty(), "no valid observations to threshold");
                let threshold = policy(&errors)?;
                state = state.reject_outliers(threshold)?;
            }

            state = state.bundle_adjust(&AdjustOptions { f_scale, ..*opts })?;
        }
        state.report("adjust_outliers end");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{ResidualProblem, SolveReport};
    use crate::test_fixtures::synthetic_calibration;
    use nalgebra::DVector;

    #[test]
    fn backends_are_swappable_behind_the_solver_seam() {
        struct FrozenBackend;
        impl SolverBackend for FrozenBackend {
            fn solve<P: ResidualProblem>(
                &self,
                _problem: &P,
                x0: DVector<Real>,
                _opts: &SolveOptions,
            ) -> (DVector<Real>, SolveReport) {
                let report = SolveReport {
                    iterations: 0,
                    final_cost: 0.0,
                    converged: true,
                };
                (x0, report)
            }
        }

        let calib = synthetic_calibration();
        let out = calib
            .bundle_adjust_with(&FrozenBackend, &AdjustOptions::default())
            .unwrap();
        for (a, b) in calib
            .camera_poses
            .poses()
            .iter()
            .zip(out.camera_poses.poses())
        {
            assert!((a.to_homogeneous() - b.to_homogeneous()).norm() < 1e-12);
        }
    }

    #[test]
    fn quantile_one_keeps_every_valid_cell() {
        let calib = synthetic_calibration();
        let rejected = calib.reject_outliers_quantile(1.0, 1.0).unwrap();
        assert_eq!(rejected.inliers(), calib.valid());
    }

    #[test]
    fn higher_threshold_never_loses_inliers() {
        let calib = synthetic_calibration();
        let tight = calib.reject_outliers(1e-12).unwrap();
        let loose = calib.reject_outliers(10.0).unwrap();
        let n_tight = tight.inliers().iter().filter(|&&v| v).count();
        let n_loose = loose.inliers().iter().filter(|&&v| v).count();
        assert!(n_loose >= n_tight);
    }

    #[test]
    fn mask_is_subset_of_validity_after_rejection() {
        let calib = synthetic_calibration();
        let rejected = calib.reject_outliers(0.5).unwrap();
        let valid = rejected.valid();
        for (i, &inlier) in rejected.inliers().iter().enumerate() {
            assert!(!inlier || valid[i]);
        }
    }

    #[test]
    fn select_threshold_scales_quantile() {
        let policy = select_threshold(1.0, 2.0);
        let t = policy(&[1.0, 2.0, 4.0]).unwrap();
        assert!((t - 8.0).abs() < 1e-12);
    }
}
