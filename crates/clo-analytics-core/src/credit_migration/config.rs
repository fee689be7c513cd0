use serde::{Deserialize, Serialize};

use super::correlation::check_unit_interval;
use super::period::PeriodType;
use crate::error::CloAnalyticsError;
use crate::CloAnalyticsResult;

// ---------------------------------------------------------------------------
// Correlation settings
// ---------------------------------------------------------------------------

/// Parameters for building correlation matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Dimension of the generic matrix built when no pool is known at setup.
    #[serde(default = "default_matrix_size")]
    pub default_size: usize,
    /// Off-diagonal value of the generic matrix.
    #[serde(default = "default_correlation")]
    pub default_correlation: f64,
    /// Correlation between two assets in the same industry.
    #[serde(default = "default_intra_industry")]
    pub intra_industry_correlation: f64,
    /// Correlation between assets in different or unknown industries.
    #[serde(default = "default_inter_industry")]
    pub inter_industry_correlation: f64,
}

fn default_matrix_size() -> usize {
    100
}

fn default_correlation() -> f64 {
    0.20
}

fn default_intra_industry() -> f64 {
    0.30
}

fn default_inter_industry() -> f64 {
    0.10
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            default_size: default_matrix_size(),
            default_correlation: default_correlation(),
            intra_industry_correlation: default_intra_industry(),
            inter_industry_correlation: default_inter_industry(),
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> CloAnalyticsResult<()> {
        check_unit_interval("correlation.default_correlation", self.default_correlation)?;
        check_unit_interval(
            "correlation.intra_industry_correlation",
            self.intra_industry_correlation,
        )?;
        check_unit_interval(
            "correlation.inter_industry_correlation",
            self.inter_industry_correlation,
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulation settings
// ---------------------------------------------------------------------------

/// Everything `setup` needs besides the collateral pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Number of simulation paths to allocate.
    #[serde(default = "default_num_simulations")]
    pub num_simulations: usize,
    #[serde(default)]
    pub period: PeriodType,
    /// Base seed; path `k` uses `seed + k`. Drawn from entropy when absent.
    pub seed: Option<u64>,
    /// Emit per-period debug events.
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    /// Optional 18x18 annual calibration replacing the built-in table.
    pub annual_transition_matrix: Option<Vec<Vec<f64>>>,
}

fn default_num_simulations() -> usize {
    1_000
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            num_simulations: default_num_simulations(),
            period: PeriodType::default(),
            seed: None,
            debug_mode: false,
            correlation: CorrelationConfig::default(),
            annual_transition_matrix: None,
        }
    }
}

impl MigrationConfig {
    pub fn from_json(json: &str) -> CloAnalyticsResult<Self> {
        let config: MigrationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> CloAnalyticsResult<()> {
        self.correlation.validate()?;
        if let Some(rows) = &self.annual_transition_matrix {
            if rows.is_empty() {
                return Err(CloAnalyticsError::InvalidInput {
                    field: "annual_transition_matrix".into(),
                    reason: "must not be empty when provided".into(),
                });
            }
        }
        Ok(())
    }
}
