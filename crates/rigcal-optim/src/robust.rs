//! Robust loss kernels for iteratively re-weighted least squares.
//!
//! Each kernel carries its own scale (the loop's `f_scale`): residuals are
//! judged relative to the scale, so growing the scale widens the quadratic
//! region. Residual and Jacobian rows are multiplied by `sqrt(w)` before
//! the linearised solve.

use nalgebra::DVector;
use rigcal_core::Real;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum RobustKernel {
    /// Pure L2 (quadratic) loss.
    #[default]
    None,
    /// Quadratic up to `scale`, linear beyond.
    Huber { scale: Real },
    /// Smooth approximation of L1.
    SoftL1 { scale: Real },
    /// Heavy-tailed loss, aggressively down-weights large residuals.
    Cauchy { scale: Real },
}

impl RobustKernel {
    /// IRLS weight for a squared residual.
    pub fn weight(self, r2: Real) -> Real {
        match self {
            RobustKernel::None => 1.0,
            RobustKernel::Huber { scale } => {
                let r = r2.sqrt();
                if r <= scale {
                    1.0
                } else {
                    scale / r
                }
            }
            RobustKernel::SoftL1 { scale } => {
                let t = r2 / (scale * scale);
                1.0 / (1.0 + t).sqrt()
            }
            RobustKernel::Cauchy { scale } => {
                let t = r2 / (scale * scale);
                1.0 / (1.0 + t)
            }
        }
    }

    /// Per-row `sqrt(weight)` factors for a residual vector.
    pub fn row_scales(self, residuals: &DVector<Real>) -> DVector<Real> {
        if self == RobustKernel::None {
            return DVector::from_element(residuals.len(), 1.0);
        }
        DVector::from_iterator(
            residuals.len(),
            residuals.iter().map(|&r| self.weight(r * r).sqrt()),
        )
    }
}
