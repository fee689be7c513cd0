pub mod aggregator;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod path;
pub mod period;
pub mod pool;
pub mod rating_scale;
pub mod results;
pub mod sampler;
pub mod transition;

pub use aggregator::{PeriodAggregator, RatingHist, RatingHistBal};
pub use config::{CorrelationConfig, MigrationConfig};
pub use correlation::{CholeskyFactor, CorrelationFactor, CorrelationMatrix};
pub use engine::{AssetOutcome, AssetStatus, CorrelationSource, CreditMigrationEngine, SimHistory};
pub use path::RatingPathSimulator;
pub use period::PeriodType;
pub use pool::{
    AssetProfile, CollateralAsset, CollateralPoolReader, CollateralPoolWriter,
    InMemoryCollateralPool, PrincipalPayment, RatingAction,
};
pub use rating_scale::{rank_of, symbol_of, unrecognised_rating, Migration, Rating};
pub use results::{DistributionSummary, MigrationFrame, MigrationRow, MigrationStatistics, SimulationResults};
pub use sampler::CorrelatedSampler;
pub use transition::TransitionMatrix;
