//! Residual problems and the solver backend seam.
//!
//! [`ResidualProblem`] is the narrow contract the solver consumes: a
//! stateless residual function plus an optional sparsity pattern and robust
//! row scaling. The provided Jacobian is a forward-difference approximation
//! restricted to the declared pattern. [`LmBackend`] wraps the
//! `levenberg_marquardt` crate; the backend is swappable without touching
//! the calibration logic.

use crate::layout::ParamLayout;
use crate::robust::RobustKernel;
use crate::sparsity::{build_pattern, IndexMapper, SparsityPattern, RESIDUALS_PER_CELL};
use crate::state::Calibration;
use anyhow::{ensure, Result};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use rigcal_core::Real;

/// Relative forward-difference step (square root of machine epsilon).
const FD_REL_STEP: Real = 1.4901161193847656e-8;

/// Residual substituted for an inlier cell whose prediction leaves the
/// camera's view during a trial step. Large enough that any such step
/// raises the cost and gets rejected by the solver.
const OUT_OF_VIEW_RESIDUAL: Real = 1e6;

/// Nonlinear least-squares problem over a dense parameter vector.
///
/// Every call must be independent of prior calls: the solver's numerical
/// differencing is only valid against a stateless residual function.
pub trait ResidualProblem {
    fn num_params(&self) -> usize;
    fn num_residuals(&self) -> usize;

    /// Unweighted residuals, or `None` if the vector cannot be evaluated.
    fn residuals_raw(&self, x: &DVector<Real>) -> Option<DVector<Real>>;

    /// Advisory residual/parameter incidence. `None` means dense.
    fn sparsity(&self) -> Option<&SparsityPattern> {
        None
    }

    /// Per-row IRLS scales computed from unweighted residuals.
    fn robust_row_scales(&self, r_raw: &DVector<Real>) -> DVector<Real> {
        DVector::from_element(r_raw.len(), 1.0)
    }

    /// Robustly scaled residuals consumed by the solver.
    fn residuals(&self, x: &DVector<Real>) -> Option<DVector<Real>> {
        let mut r = self.residuals_raw(x)?;
        let scales = self.robust_row_scales(&r);
        r.component_mul_assign(&scales);
        Some(r)
    }

    /// Forward-difference Jacobian, filled only on the declared pattern.
    fn jacobian(&self, x: &DVector<Real>) -> Option<DMatrix<Real>> {
        let r0 = self.residuals_raw(x)?;
        let scales = self.robust_row_scales(&r0);
        let mut jac = DMatrix::zeros(self.num_residuals(), self.num_params());
        let mut xp = x.clone();
        for col in 0..self.num_params() {
            let h = FD_REL_STEP * (1.0 + x[col].abs());
            xp[col] = x[col] + h;
            let rc = self.residuals_raw(&xp)?;
            xp[col] = x[col];
            match self.sparsity() {
                Some(pattern) => {
                    for &row in pattern.col_rows(col) {
                        jac[(row, col)] = (rc[row] - r0[row]) / h * scales[row];
                    }
                }
                None => {
                    for row in 0..r0.len() {
                        jac[(row, col)] = (rc[row] - r0[row]) / h * scales[row];
                    }
                }
            }
        }
        Some(jac)
    }
}

/// Reprojection residuals of the current inlier set against a base state.
///
/// `residuals_raw` decodes the vector into a fresh state on every call and
/// returns `(predicted - measured)` pixel errors of the inlier cells,
/// flattened x,y per cell. The inlier row set and the sparsity pattern are
/// fixed at construction; a cell that becomes unprojectable at the trial
/// vector contributes [`OUT_OF_VIEW_RESIDUAL`] in both components.
pub struct ReprojectionProblem<'a> {
    base: &'a Calibration,
    layout: ParamLayout,
    pattern: SparsityPattern,
    inlier_cells: Vec<usize>,
    kernel: RobustKernel,
}

impl<'a> ReprojectionProblem<'a> {
    pub fn new(base: &'a Calibration, kernel: RobustKernel) -> Result<Self> {
        let layout = ParamLayout::of(base);
        let pattern = build_pattern(base, &layout);
        let mapper = IndexMapper::new(&base.inliers(), base.size());
        let inlier_cells = mapper.inlier_cells();
        ensure!(
            !inlier_cells.is_empty(),
            "no inlier observations to optimize"
        );
        Ok(Self {
            base,
            layout,
            pattern,
            inlier_cells,
            kernel,
        })
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Encoded parameters of the base state.
    pub fn initial(&self) -> DVector<Real> {
        self.layout.encode(self.base)
    }

    /// Decode a refined vector against the base state.
    pub fn decode(&self, x: &DVector<Real>) -> Result<Calibration> {
        self.layout.decode(self.base, x)
    }
}

impl ResidualProblem for ReprojectionProblem<'_> {
    fn num_params(&self) -> usize {
        self.layout.total()
    }

    fn num_residuals(&self) -> usize {
        self.inlier_cells.len() * RESIDUALS_PER_CELL
    }

    fn residuals_raw(&self, x: &DVector<Real>) -> Option<DVector<Real>> {
        let state = self.layout.decode(self.base, x).ok()?;
        let predicted = state.reprojected();
        let mut r = DVector::zeros(self.num_residuals());
        for (i, &flat) in self.inlier_cells.iter().enumerate() {
            let (rx, ry) = if predicted.is_valid(flat) {
                let diff = predicted.point(flat) - state.point_table.point(flat);
                (diff.x, diff.y)
            } else {
                (OUT_OF_VIEW_RESIDUAL, OUT_OF_VIEW_RESIDUAL)
            };
            r[RESIDUALS_PER_CELL * i] = rx;
            r[RESIDUALS_PER_CELL * i + 1] = ry;
        }
        Some(r)
    }

    fn sparsity(&self) -> Option<&SparsityPattern> {
        Some(&self.pattern)
    }

    fn robust_row_scales(&self, r_raw: &DVector<Real>) -> DVector<Real> {
        self.kernel.row_scales(r_raw)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// Function-evaluation cap handed to the backend.
    pub max_iterations: usize,
    /// Relative tolerance on cost reduction and parameter updates.
    pub tolerance: Real,
    /// Emit per-solve diagnostics at debug level.
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub iterations: usize,
    pub final_cost: Real,
    pub converged: bool,
}

/// Black-box minimizer of a [`ResidualProblem`].
///
/// Must be deterministic given identical inputs and terminate within the
/// iteration cap. The sparsity pattern is a performance hint only.
pub trait SolverBackend {
    fn solve<P: ResidualProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}

struct LmWrapper<'a, P: ResidualProblem> {
    problem: &'a P,
    params: DVector<Real>,
}

impl<P: ResidualProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmWrapper<'_, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        self.problem.residuals(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        self.problem.jacobian(&self.params)
    }
}

/// Levenberg-Marquardt backend over the `levenberg_marquardt` crate.
#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl SolverBackend for LmBackend {
    fn solve<P: ResidualProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        if opts.verbose {
            log::debug!(
                "lm solve: {} residuals x {} params",
                problem.num_residuals(),
                problem.num_params()
            );
        }
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.tolerance)
            .with_xtol(opts.tolerance)
            .with_gtol(opts.tolerance)
            .with_patience(opts.max_iterations.max(1));

        let wrapper = LmWrapper {
            problem,
            params: x0,
        };

        let (wrapper, report) = lm.minimize(wrapper);
        let x_opt = wrapper.params();
        if opts.verbose {
            log::debug!("lm termination: {:?}", report.termination);
        }

        (
            x_opt,
            SolveReport {
                iterations: report.number_of_evaluations,
                final_cost: report.objective_function,
                converged: report.termination.was_successful(),
            },
        )
    }
}
