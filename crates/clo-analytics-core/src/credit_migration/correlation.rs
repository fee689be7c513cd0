use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use super::config::CorrelationConfig;
use super::pool::CollateralPoolReader;
use crate::error::CloAnalyticsError;
use crate::CloAnalyticsResult;

const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Smallest eigenvalue kept when repairing a matrix.
const EIGENVALUE_FLOOR: f64 = 1e-8;

// ---------------------------------------------------------------------------
// CorrelationMatrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    dim: usize,
    /// Row-major `dim * dim` entries.
    values: Vec<f64>,
    asset_order: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl CorrelationMatrix {
    /// Generic matrix with a constant off-diagonal correlation.
    ///
    /// Carries no asset identities; `asset_order` is empty.
    pub fn default_matrix(size: usize, correlation: f64) -> CloAnalyticsResult<Self> {
        check_unit_interval("default_correlation", correlation)?;
        let mut values = vec![correlation; size * size];
        for i in 0..size {
            values[i * size + i] = 1.0;
        }
        Ok(CorrelationMatrix {
            dim: size,
            values,
            asset_order: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Matrix over the pool's assets, in the pool's enumeration order.
    ///
    /// Two assets sharing an industry classification get the intra-industry
    /// correlation; every other pair (including unclassified assets) gets the
    /// inter-industry one.
    pub fn pool_matrix(
        pool: &dyn CollateralPoolReader,
        config: &CorrelationConfig,
    ) -> CloAnalyticsResult<Self> {
        let ids = pool.get_asset_ids();
        Self::for_assets(pool, &ids, config)
    }

    /// Pool-derived matrix restricted to `asset_ids`, in that order.
    pub fn for_assets(
        pool: &dyn CollateralPoolReader,
        asset_ids: &[String],
        config: &CorrelationConfig,
    ) -> CloAnalyticsResult<Self> {
        config.validate()?;

        let mut industries = Vec::with_capacity(asset_ids.len());
        for id in asset_ids {
            let industry = pool
                .get_asset(id)?
                .industry
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty());
            industries.push(industry);
        }

        let n = asset_ids.len();
        let mut values = vec![0.0; n * n];
        for (i, a) in industries.iter().enumerate() {
            values[i * n + i] = 1.0;
            for (j, b) in industries.iter().enumerate().skip(i + 1) {
                let rho = match (a, b) {
                    (Some(a), Some(b)) if a == b => config.intra_industry_correlation,
                    _ => config.inter_industry_correlation,
                };
                values[i * n + j] = rho;
                values[j * n + i] = rho;
            }
        }

        Ok(Self::with_order(n, values, asset_ids.to_vec()))
    }

    /// Explicit matrix over named assets.
    pub fn from_rows(rows: &[Vec<f64>], asset_order: Vec<String>) -> CloAnalyticsResult<Self> {
        let n = rows.len();
        if !asset_order.is_empty() && asset_order.len() != n {
            return Err(CloAnalyticsError::InvalidCorrelation(format!(
                "{} asset ids for a {}x{} matrix",
                asset_order.len(),
                n,
                n
            )));
        }
        let mut values = Vec::with_capacity(n * n);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(CloAnalyticsError::InvalidCorrelation(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    n
                )));
            }
            values.extend_from_slice(row);
        }
        let m = Self::with_order(n, values, asset_order);
        m.validate()?;
        Ok(m)
    }

    fn with_order(dim: usize, values: Vec<f64>, asset_order: Vec<String>) -> Self {
        let index = asset_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        CorrelationMatrix {
            dim,
            values,
            asset_order,
            index,
        }
    }

    /// Check symmetry, unit diagonal and entries in [0, 1].
    pub fn validate(&self) -> CloAnalyticsResult<()> {
        let n = self.dim;
        for i in 0..n {
            if (self.get(i, i) - 1.0).abs() > SYMMETRY_TOLERANCE {
                return Err(CloAnalyticsError::InvalidCorrelation(format!(
                    "diagonal element {} is {}, expected 1.0",
                    i,
                    self.get(i, i)
                )));
            }
            for j in 0..n {
                let rho = self.get(i, j);
                if !rho.is_finite() || !(0.0..=1.0).contains(&rho) {
                    return Err(CloAnalyticsError::InvalidCorrelation(format!(
                        "entry ({}, {}) = {} outside [0, 1]",
                        i, j, rho
                    )));
                }
                if (rho - self.get(j, i)).abs() > SYMMETRY_TOLERANCE {
                    return Err(CloAnalyticsError::InvalidCorrelation(format!(
                        "not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.dim + j]
    }

    pub fn asset_order(&self) -> &[String] {
        &self.asset_order
    }

    /// Row/column of `asset_id`, if the matrix is asset-keyed.
    pub fn index_of(&self, asset_id: &str) -> Option<usize> {
        if self.index.len() != self.asset_order.len() {
            // Deserialised matrices skip the index.
            return self.asset_order.iter().position(|id| id == asset_id);
        }
        self.index.get(asset_id).copied()
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.values
            .chunks(self.dim.max(1))
            .take(self.dim)
            .map(|r| r.to_vec())
            .collect()
    }
}

pub(crate) fn check_unit_interval(field: &str, value: f64) -> CloAnalyticsResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(CloAnalyticsError::InvalidInput {
            field: field.into(),
            reason: format!("must be in [0, 1], got {}", value),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

/// Maps independent standard normals to normals with a target correlation.
pub trait CorrelationFactor: Send + Sync {
    fn dim(&self) -> usize;

    /// Write `L * independent` into `out`. Both slices have length `dim()`.
    fn correlate(&self, independent: &[f64], out: &mut [f64]);
}

/// Lower-triangular Cholesky factor, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    lower: Vec<f64>,
    dim: usize,
    repaired: bool,
}

impl CholeskyFactor {
    /// Factorise `matrix`, repairing it first if it is not positive definite.
    pub fn factorize(matrix: &CorrelationMatrix) -> CloAnalyticsResult<Self> {
        let n = matrix.dim();
        if let Some(lower) = cholesky(&matrix.values, n) {
            return Ok(CholeskyFactor {
                lower,
                dim: n,
                repaired: false,
            });
        }

        warn!(dim = n, "correlation matrix not positive definite, clipping eigenvalues");
        let repaired = clip_to_psd(&matrix.values, n);
        let lower = cholesky_psd(&repaired, n).ok_or_else(|| {
            CloAnalyticsError::InvalidCorrelation(
                "eigenvalue repair did not yield a factorisable matrix".into(),
            )
        })?;
        Ok(CholeskyFactor {
            lower,
            dim: n,
            repaired: true,
        })
    }

    /// Whether the source matrix had to be repaired.
    pub fn was_repaired(&self) -> bool {
        self.repaired
    }

    /// `L * L^T`, the matrix this factor actually reproduces.
    pub fn implied_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.dim;
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        (0..=i.min(j))
                            .map(|k| self.lower[i * n + k] * self.lower[j * n + k])
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }
}

impl CorrelationFactor for CholeskyFactor {
    fn dim(&self) -> usize {
        self.dim
    }

    fn correlate(&self, independent: &[f64], out: &mut [f64]) {
        let n = self.dim;
        for (i, o) in out.iter_mut().enumerate().take(n) {
            let row = &self.lower[i * n..i * n + i + 1];
            *o = row.iter().zip(independent).map(|(l, z)| l * z).sum();
        }
    }
}

/// Plain Cholesky; `None` if the matrix is not positive definite.
fn cholesky(values: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut lower = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| lower[i * n + k] * lower[j * n + k]).sum();
            if i == j {
                let diag = values[i * n + i] - sum;
                if diag <= 0.0 {
                    return None;
                }
                lower[i * n + i] = diag.sqrt();
            } else {
                lower[i * n + j] = (values[i * n + j] - sum) / lower[j * n + j];
            }
        }
    }
    Some(lower)
}

/// Cholesky tolerant of zero pivots from a semidefinite input.
fn cholesky_psd(values: &[f64], n: usize) -> Option<Vec<f64>> {
    let tol = EIGENVALUE_FLOOR;
    let mut lower = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| lower[i * n + k] * lower[j * n + k]).sum();
            let sum = values[i * n + j] - dot;
            if i == j {
                if sum < -tol {
                    return None;
                }
                lower[i * n + i] = sum.max(tol).sqrt();
            } else if lower[j * n + j] > tol {
                lower[i * n + j] = sum / lower[j * n + j];
            }
        }
    }
    Some(lower)
}

/// Nearest unit-diagonal PSD matrix by eigenvalue clipping.
fn clip_to_psd(values: &[f64], n: usize) -> Vec<f64> {
    let m = DMatrix::from_row_slice(n, n, values);
    let sym = (&m + m.transpose()) * 0.5;
    let eig = SymmetricEigen::new(sym);
    let clipped = eig.eigenvalues.map(|l| l.max(EIGENVALUE_FLOOR));
    let rebuilt =
        &eig.eigenvectors * DMatrix::from_diagonal(&clipped) * eig.eigenvectors.transpose();

    let mut out = vec![0.0; n * n];
    for (i, row) in out.chunks_mut(n.max(1)).enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let scale = (rebuilt[(i, i)] * rebuilt[(j, j)]).sqrt();
            *cell = if i == j {
                1.0
            } else if scale > 0.0 {
                (rebuilt[(i, j)] / scale).clamp(-1.0, 1.0)
            } else {
                0.0
            };
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
