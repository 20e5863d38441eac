//! Dense least-squares for the gravity/velocity/scale alignment.
//!
//! # State Vector
//!
//! - Velocities: 3D per keyframe (n * 3)
//! - Gravity: 3D in the initial solve, 2D tangent correction in refinement
//! - Scale: 1D, only for up-to-scale poses

use nalgebra::{DMatrix, DVector};

use super::config::AlignmentConfig;
use crate::error::{InitError, Result};

/// Parameter indexing for the stacked linear system.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StateLayout {
    num_keyframes: usize,
    gravity_dim: usize,
    estimate_scale: bool,
}

impl StateLayout {
    pub fn new(num_keyframes: usize, gravity_dim: usize, estimate_scale: bool) -> Self {
        Self {
            num_keyframes,
            gravity_dim,
            estimate_scale,
        }
    }

    /// Total number of parameters.
    pub fn total_params(&self) -> usize {
        self.num_keyframes * 3 + self.gravity_dim + usize::from(self.estimate_scale)
    }

    /// Start index for velocity of keyframe i.
    pub fn vel_start(&self, kf_idx: usize) -> usize {
        kf_idx * 3
    }

    /// Start index for gravity (full vector or tangent correction).
    pub fn gravity_start(&self) -> usize {
        self.num_keyframes * 3
    }

    /// Index of the scale parameter, if estimated.
    pub fn scale_index(&self) -> Option<usize> {
        self.estimate_scale
            .then(|| self.num_keyframes * 3 + self.gravity_dim)
    }

    /// Rows of the stacked system: 3 position + 3 velocity per interval.
    pub fn total_rows(&self) -> usize {
        self.num_keyframes.saturating_sub(1) * 6
    }
}

/// Least-squares solution with its conditioning diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct LinearSolution {
    pub x: DVector<f64>,
    pub condition: f64,
}

/// Solve `a x ≈ b` with unit-norm columns and SVD.
///
/// Zero columns and numerically zero singular values are `RankDeficient`;
/// a condition number above the configured limit is `IllConditioned`.
pub(crate) fn solve_equilibrated(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    config: &AlignmentConfig,
) -> Result<LinearSolution> {
    let (rows, cols) = a.shape();
    if rows < cols {
        return Err(InitError::RankDeficient(format!(
            "{rows} equations for {cols} unknowns"
        )));
    }

    let mut col_scale = DVector::zeros(cols);
    let mut scaled = a.clone();
    for j in 0..cols {
        let norm = a.column(j).norm();
        if !norm.is_finite() || norm <= f64::MIN_POSITIVE {
            return Err(InitError::RankDeficient(format!(
                "unknown {j} does not appear in any equation"
            )));
        }
        col_scale[j] = 1.0 / norm;
        scaled.column_mut(j).scale_mut(col_scale[j]);
    }

    let svd = scaled.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    if !sigma_max.is_finite() || sigma_min <= config.rank_tolerance * sigma_max {
        return Err(InitError::RankDeficient(format!(
            "singular values [{sigma_min:.3e}, {sigma_max:.3e}]"
        )));
    }

    let condition = sigma_max / sigma_min;
    if condition > config.max_condition_number {
        return Err(InitError::IllConditioned {
            condition,
            limit: config.max_condition_number,
        });
    }

    let y = svd
        .solve(b, 0.0)
        .map_err(|e| InitError::RankDeficient(e.to_string()))?;
    Ok(LinearSolution {
        x: y.component_mul(&col_scale),
        condition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_indices() {
        let layout = StateLayout::new(4, 3, true);
        assert_eq!(layout.total_params(), 16);
        assert_eq!(layout.vel_start(2), 6);
        assert_eq!(layout.gravity_start(), 12);
        assert_eq!(layout.scale_index(), Some(15));
        assert_eq!(layout.total_rows(), 18);

        let metric = StateLayout::new(4, 2, false);
        assert_eq!(metric.total_params(), 14);
        assert_eq!(metric.scale_index(), None);
    }

    #[test]
    fn test_badly_scaled_columns_solved() {
        // Columns differ by six orders of magnitude
        let a = DMatrix::from_row_slice(3, 2, &[1e-3, 1e3, 2e-3, 0.0, 0.0, 5e3]);
        let x_true = DVector::from_vec(vec![2.0, -0.5]);
        let b = &a * &x_true;

        let solution = solve_equilibrated(&a, &b, &AlignmentConfig::default()).unwrap();
        assert_relative_eq!(solution.x, x_true, epsilon = 1e-9);
        assert!(solution.condition < 10.0);
    }

    #[test]
    fn test_zero_column_rank_deficient() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            solve_equilibrated(&a, &b, &AlignmentConfig::default()),
            Err(InitError::RankDeficient(_))
        ));
    }

    #[test]
    fn test_dependent_columns_rank_deficient() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            solve_equilibrated(&a, &b, &AlignmentConfig::default()),
            Err(InitError::RankDeficient(_))
        ));
    }

    #[test]
    fn test_near_dependent_columns_ill_conditioned() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 1.0, 1.0 + 1e-7, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let config = AlignmentConfig {
            max_condition_number: 1e4,
            ..AlignmentConfig::default()
        };
        assert!(matches!(
            solve_equilibrated(&a, &b, &config),
            Err(InitError::IllConditioned { limit, .. }) if limit == 1e4
        ));
    }
}
