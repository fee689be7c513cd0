pub mod error;
pub mod types;

#[cfg(feature = "credit_migration")]
pub mod credit_migration;

pub use error::{CloAnalyticsError, PoolError};
pub use types::*;

/// Standard result type for all CLO analytics operations
pub type CloAnalyticsResult<T> = Result<T, CloAnalyticsError>;

/// Result type returned by collateral pool collaborators
pub type PoolResult<T> = Result<T, PoolError>;
