//! Descriptive statistics and covariance estimators
//!
//! The covariance estimators take residual series laid out one series per
//! row, all rows of equal length (one column per aligned time point).

use crate::matrix::Matrix;
use crate::{MathError, Result};

/// Ridge added to the diagonal of a shrunk covariance
const SHRINKAGE_RIDGE: f64 = 2e-8;

/// Guards the standardisation of near-constant residual series
const STD_EPSILON: f64 = 1e-12;

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot take the mean of an empty series".to_string(),
        ));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (denominator `n - 1`)
pub fn variance(values: &[f64]) -> Result<f64> {
    if values.len() < 2 {
        return Err(MathError::InsufficientData(format!(
            "Sample variance needs at least 2 values, have {}",
            values.len()
        )));
    }
    let m = mean(values)?;
    Ok(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64)
}

/// Mean of squared values (uncentred second moment)
pub fn mean_square(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot take the mean square of an empty series".to_string(),
        ));
    }
    Ok(values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64)
}

fn check_residual_layout(residuals: &[Vec<f64>]) -> Result<usize> {
    let n_samples = residuals.first().map_or(0, Vec::len);
    if residuals.is_empty() || n_samples < 2 {
        return Err(MathError::InsufficientData(
            "Covariance estimation needs at least one series with 2 aligned samples".to_string(),
        ));
    }
    if let Some((i, row)) = residuals
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != n_samples)
    {
        return Err(MathError::InvalidInput(format!(
            "Residual series {} has {} samples, expected {}",
            i,
            row.len(),
            n_samples
        )));
    }
    Ok(n_samples)
}

/// Cross-product covariance `W = R Rᵀ / T` of one-step residuals
pub fn residual_covariance(residuals: &[Vec<f64>]) -> Result<Matrix> {
    let n_samples = check_residual_layout(residuals)?;
    let n = residuals.len();
    let mut w = Matrix::zeros(n, n);

    for i in 0..n {
        for j in 0..=i {
            let v = residuals[i]
                .iter()
                .zip(&residuals[j])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / n_samples as f64;
            w[(i, j)] = v;
            w[(j, i)] = v;
        }
    }

    Ok(w)
}

/// Covariance shrunk toward its diagonal
#[derive(Debug, Clone)]
pub struct ShrunkCovariance {
    /// Shrunk covariance matrix
    pub covariance: Matrix,
    /// Shrinkage intensity in `[0, 1]`
    pub lambda: f64,
}

/// Schäfer–Strimmer shrinkage of the residual covariance toward its diagonal
///
/// The intensity is estimated from the variance of the standardised
/// cross-products, so no tuning parameter is needed.
pub fn shrunk_covariance(residuals: &[Vec<f64>]) -> Result<ShrunkCovariance> {
    let n_samples = check_residual_layout(residuals)?;
    let t = n_samples as f64;
    let w = residual_covariance(residuals)?;

    let standardized: Vec<Vec<f64>> = residuals
        .iter()
        .map(|row| {
            let m = row.iter().sum::<f64>() / t;
            let sd = (row.iter().map(|v| (v - m).powi(2)).sum::<f64>() / t).sqrt();
            row.iter().map(|v| (v - m) / (sd + STD_EPSILON)).collect()
        })
        .collect();

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..standardized.len() {
        for j in 0..i {
            let products: Vec<f64> = standardized[i]
                .iter()
                .zip(&standardized[j])
                .map(|(a, b)| a * b)
                .collect();
            let products_mean = products.iter().sum::<f64>() / t;
            numerator += products
                .iter()
                .map(|p| (p - products_mean).powi(2))
                .sum::<f64>();
            denominator += products_mean * products_mean;
        }
    }
    numerator /= t * (t - 1.0);

    let lambda = if denominator > 0.0 {
        (numerator / denominator).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let n = w.rows();
    let mut covariance = w.scale(1.0 - lambda);
    for i in 0..n {
        covariance[(i, i)] = w[(i, i)] + SHRINKAGE_RIDGE;
    }

    Ok(ShrunkCovariance { covariance, lambda })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_basic_moments() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(mean(&v).unwrap(), 2.5);
        assert_abs_diff_eq!(variance(&v).unwrap(), 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean_square(&v).unwrap(), 7.5);

        assert!(mean(&[]).is_err());
        assert!(variance(&[1.0]).is_err());
    }

    #[test]
    fn test_residual_covariance_is_symmetric() {
        let r = vec![vec![1.0, -1.0, 2.0], vec![0.5, 0.5, -1.0]];
        let w = residual_covariance(&r).unwrap();
        assert_abs_diff_eq!(w[(0, 0)], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[(0, 1)], w[(1, 0)]);
        assert_abs_diff_eq!(w[(0, 1)], (0.5 - 0.5 - 2.0) / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shrinkage_keeps_diagonal() {
        let r = vec![
            vec![1.0, -0.5, 0.3, 0.9, -1.2, 0.4],
            vec![0.8, -0.4, 0.1, 1.1, -0.9, 0.2],
            vec![-0.2, 0.6, -0.7, 0.1, 0.3, -0.5],
        ];
        let raw = residual_covariance(&r).unwrap();
        let shrunk = shrunk_covariance(&r).unwrap();

        assert!((0.0..=1.0).contains(&shrunk.lambda));
        for i in 0..3 {
            assert_abs_diff_eq!(
                shrunk.covariance[(i, i)],
                raw[(i, i)] + SHRINKAGE_RIDGE,
                epsilon = 1e-15
            );
        }
        assert!(shrunk.covariance[(0, 1)].abs() <= raw[(0, 1)].abs() + 1e-15);
    }

    #[test]
    fn test_layout_validation() {
        assert!(residual_covariance(&[]).is_err());
        assert!(residual_covariance(&[vec![1.0]]).is_err());
        assert!(residual_covariance(&[vec![1.0, 2.0], vec![1.0]]).is_err());
    }
}
