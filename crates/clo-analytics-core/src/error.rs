use thiserror::Error;

/// Failures raised by a collateral pool collaborator.
///
/// The simulation engine never interprets these; they reach the caller of
/// `run_rating_history` as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Asset not found in collateral pool: {0}")]
    AssetNotFound(String),

    #[error("Missing {field} for asset {asset_id}")]
    MissingData { asset_id: String, field: String },

    #[error("Collateral pool error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CloAnalyticsError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Unsupported period type: {0}")]
    UnsupportedPeriod(String),

    #[error("Period mismatch: engine configured for {configured}, run requested {requested}")]
    PeriodMismatch { configured: String, requested: String },

    #[error("Engine not initialized: call setup() first")]
    NotInitialized,

    #[error("Invalid correlation matrix: {0}")]
    InvalidCorrelation(String),

    #[error("Date error: {0}")]
    DateError(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Export error: {0}")]
    Export(String),
}

impl From<serde_json::Error> for CloAnalyticsError {
    fn from(e: serde_json::Error) -> Self {
        CloAnalyticsError::SerializationError(e.to_string())
    }
}

impl From<csv::Error> for CloAnalyticsError {
    fn from(e: csv::Error) -> Self {
        CloAnalyticsError::Export(e.to_string())
    }
}
