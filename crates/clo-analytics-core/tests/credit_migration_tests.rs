use chrono::NaiveDate;
use clo_analytics_core::credit_migration::{
    AssetProfile, CollateralAsset, CollateralPoolReader, CreditMigrationEngine,
    InMemoryCollateralPool, MigrationConfig, MigrationFrame, PeriodType, Rating,
};
use clo_analytics_core::{CloAnalyticsError, Money, PoolError, PoolResult};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn analysis_date() -> NaiveDate {
    d(2024, 1, 1)
}

/// BBB $1M, A $2M and CCC+ $500k, all maturing 2024-10-01.
fn three_asset_pool() -> InMemoryCollateralPool {
    InMemoryCollateralPool::new(vec![
        CollateralAsset::new("ASSET_1", dec!(1_000_000), Some("BBB"), d(2024, 10, 1))
            .with_industry(Some("Technology")),
        CollateralAsset::new("ASSET_2", dec!(2_000_000), Some("A"), d(2024, 10, 1))
            .with_industry(Some("Healthcare")),
        CollateralAsset::new("ASSET_3", dec!(500_000), Some("CCC+"), d(2024, 10, 1))
            .with_industry(Some("Technology")),
    ])
}

fn seeded_engine(pool: &dyn CollateralPoolReader, sims: usize, seed: u64) -> CreditMigrationEngine {
    let mut engine = CreditMigrationEngine::new();
    let config = MigrationConfig {
        num_simulations: sims,
        period: PeriodType::Quarterly,
        ..Default::default()
    }
    .with_seed(seed);
    engine.setup_with_config(&config, Some(pool)).unwrap();
    engine
}

// ===========================================================================
// End-to-end runs
// ===========================================================================

#[test]
fn test_three_asset_pool_quarterly_run() {
    let pool = three_asset_pool();
    let mut engine = CreditMigrationEngine::new();
    engine.setup(1, false, Some(&pool), "QUARTERLY").unwrap();

    let history = engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();

    assert_eq!(history.rating_hist.len(), 4);
    assert_eq!(history.rating_hist_bal.len(), 4);

    let snapshot = &history.rating_hist[0];
    assert_eq!(snapshot.period, 0);
    assert_eq!(snapshot.upgrades, 0);
    assert_eq!(snapshot.downgrades, 0);
    assert_eq!(snapshot.new_defaults, 0);
    assert_eq!(snapshot.count(Rating::Bbb), 1);
    assert_eq!(snapshot.count(Rating::A), 1);
    assert_eq!(snapshot.count(Rating::Ccc), 1);

    let balances = &history.rating_hist_bal[0];
    assert_eq!(balances.balance(Rating::Bbb), dec!(1_000_000));
    assert_eq!(balances.balance(Rating::A), dec!(2_000_000));
    assert_eq!(balances.balance(Rating::Ccc), dec!(500_000));
    assert_eq!(balances.total(), dec!(3_500_000));
    for r in Rating::ALL {
        if !matches!(r, Rating::Bbb | Rating::A | Rating::Ccc) {
            assert_eq!(balances.balance(r), Decimal::ZERO, "bucket {}", r);
        }
    }
    assert_eq!(balances.cdr, Decimal::ZERO);

    for (i, (hist, bal)) in history
        .rating_hist
        .iter()
        .zip(&history.rating_hist_bal)
        .enumerate()
    {
        assert_eq!(hist.period, i as u32);
        assert_eq!(bal.period, i as u32);
        assert!(bal.cdr >= Decimal::ZERO && bal.cdr <= Decimal::ONE);
    }
}

#[test]
fn test_deal_collateral_excludes_other_assets() {
    let pool = three_asset_pool();
    let mut engine = seeded_engine(&pool, 3, 11);
    let deal: HashMap<String, Money> = [
        ("ASSET_1".to_string(), dec!(1_000_000)),
        ("ASSET_2".to_string(), dec!(2_000_000)),
    ]
    .into_iter()
    .collect();

    for _ in 0..3 {
        let history = engine
            .run_rating_history(analysis_date(), &pool, Some(&deal), "QUARTERLY")
            .unwrap();
        assert_eq!(history.rating_hist_bal[0].total(), dec!(3_000_000));
        assert_eq!(history.rating_hist_bal[0].balance(Rating::Ccc), Decimal::ZERO);
        for (hist, bal) in history.rating_hist.iter().zip(&history.rating_hist_bal) {
            assert!(hist.total() <= 2);
            assert!(bal.total() <= dec!(3_000_000));
        }
        assert!(history
            .asset_outcomes
            .iter()
            .all(|o| o.asset_id != "ASSET_3"));
    }
}

#[test]
fn test_seeded_runs_are_identical() {
    let pool = three_asset_pool();
    let mut first = seeded_engine(&pool, 5, 2024);
    let mut second = seeded_engine(&pool, 5, 2024);
    first
        .run_all_simulations(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();
    second
        .run_all_simulations(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();

    for k in 0..5 {
        assert_eq!(first.sim_hist(k), second.sim_hist(k));
    }
    assert_eq!(first.export_to_dataframe(), second.export_to_dataframe());
}

#[test]
fn test_paths_use_distinct_seeds() {
    let pool = three_asset_pool();
    let mut engine = seeded_engine(&pool, 3, 7);
    engine
        .run_all_simulations(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();
    let seeds: Vec<u64> = engine.completed().map(|h| h.seed).collect();
    assert_eq!(seeds, vec![7, 8, 9]);
}

#[test]
fn test_zero_asset_pool_runs() {
    let pool = InMemoryCollateralPool::default();
    let mut engine = CreditMigrationEngine::new();
    engine.setup(2, false, Some(&pool), "QUARTERLY").unwrap();
    assert_eq!(engine.num_assets(), 0);

    let history = engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();
    assert_eq!(history.rating_hist.len(), 1);
    assert_eq!(history.rating_hist[0].total(), 0);
    assert_eq!(history.rating_hist_bal[0].total(), Decimal::ZERO);
    assert_eq!(history.rating_hist_bal[0].cdr, Decimal::ZERO);
}

#[test]
fn test_pool_loaded_from_json() {
    let json = r#"[
        {"asset_id": "L1", "par_amount": "250000", "sp_rating": "BB-",
         "industry": "Retail", "maturity": "2025-01-01",
         "amortization": [{"date": "2024-07-01", "amount": "50000"}]},
        {"asset_id": "L2", "par_amount": "750000", "sp_rating": null,
         "maturity": "2025-01-01"}
    ]"#;
    let pool = InMemoryCollateralPool::from_json(json).unwrap();
    let mut engine = seeded_engine(&pool, 1, 3);
    let history = engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();
    let snapshot = &history.rating_hist_bal[0];
    assert_eq!(snapshot.balance(Rating::BbMinus), dec!(250000));
    // An unrated asset starts in DEFAULT.
    assert_eq!(snapshot.balance(Rating::Default), dec!(750000));
    assert_eq!(history.rating_hist.len(), 5);
}

// ===========================================================================
// Reporting
// ===========================================================================

#[test]
fn test_results_zeroed_before_any_run() {
    let mut engine = CreditMigrationEngine::new();
    engine.setup(10, false, None, "QUARTERLY").unwrap();
    let results = engine.get_simulation_results();
    assert_eq!(results.num_simulations, 0);
    assert_eq!(results.num_periods, 0);
    assert_eq!(results.period_type, Some(PeriodType::Quarterly));
    assert_eq!(results.analysis_date, None);
    assert_eq!(results.statistics.terminal_default_rate.mean, 0.0);
    assert_eq!(results.statistics.mean_upgrades, 0.0);
}

#[test]
fn test_empty_frame_has_columns() {
    let mut engine = CreditMigrationEngine::new();
    engine.setup(1, false, None, "ANNUALLY").unwrap();
    let frame = engine.export_to_dataframe();
    assert!(frame.rows.is_empty());
    assert_eq!(frame.columns, MigrationFrame::column_names());
    for required in ["simulation", "period", "upgrades", "downgrades", "num_defaults", "cdr"] {
        assert!(frame.columns.iter().any(|c| c == required), "missing {}", required);
    }
    assert!(frame.columns.iter().any(|c| c == "count_BBB"));
    assert!(frame.columns.iter().any(|c| c == "balance_D"));
}

#[test]
fn test_results_after_full_batch() {
    let pool = three_asset_pool();
    let mut engine = seeded_engine(&pool, 50, 99);
    engine
        .run_all_simulations(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();

    let results = engine.get_simulation_results();
    assert_eq!(results.num_simulations, 50);
    assert_eq!(results.num_periods, 3);
    assert_eq!(results.analysis_date, Some(analysis_date()));
    let stats = &results.statistics;
    assert_eq!(stats.mean_cdr_by_period.len(), 4);
    assert!(stats.terminal_default_rate.min >= 0.0);
    assert!(stats.terminal_default_rate.max <= 1.0);
    assert!(stats.terminal_default_rate.p25 <= stats.terminal_default_rate.p75);

    let frame = engine.export_to_dataframe();
    assert_eq!(frame.rows.len(), 50 * 4);
    let csv = frame.to_csv_string().unwrap();
    assert_eq!(csv.lines().count(), 1 + 50 * 4);
}

// ===========================================================================
// State machine and failures
// ===========================================================================

#[test]
fn test_run_requires_setup() {
    let pool = three_asset_pool();
    let mut engine = CreditMigrationEngine::new();
    let err = engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap_err();
    assert!(matches!(err, CloAnalyticsError::NotInitialized));

    engine.setup(1, false, Some(&pool), "QUARTERLY").unwrap();
    engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap();
    engine.cleanup();
    assert!(!engine.is_initialized());
    assert_eq!(engine.get_simulation_results().num_simulations, 0);
    let err = engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap_err();
    assert!(matches!(err, CloAnalyticsError::NotInitialized));
}

#[test]
fn test_unsupported_period_fails_fast() {
    let pool = three_asset_pool();
    let mut engine = CreditMigrationEngine::new();
    let err = engine.setup(1, false, Some(&pool), "FORTNIGHTLY").unwrap_err();
    assert!(matches!(err, CloAnalyticsError::UnsupportedPeriod(_)));

    engine.setup(1, false, Some(&pool), "QUARTERLY").unwrap();
    let err = engine
        .run_rating_history(analysis_date(), &pool, None, "FORTNIGHTLY")
        .unwrap_err();
    assert!(matches!(err, CloAnalyticsError::UnsupportedPeriod(_)));
}

/// Pool whose balance lookup fails for one asset.
struct FailingPool {
    inner: InMemoryCollateralPool,
    broken: &'static str,
}

impl CollateralPoolReader for FailingPool {
    fn get_asset_ids(&self) -> Vec<String> {
        self.inner.get_asset_ids()
    }

    fn get_asset(&self, asset_id: &str) -> PoolResult<AssetProfile> {
        self.inner.get_asset(asset_id)
    }

    fn get_sp_rating(&self, asset_id: &str, as_of: Option<NaiveDate>) -> PoolResult<Option<String>> {
        self.inner.get_sp_rating(asset_id, as_of)
    }

    fn get_asset_maturity(&self, asset_id: &str) -> PoolResult<NaiveDate> {
        self.inner.get_asset_maturity(asset_id)
    }

    fn is_defaulted(&self, asset_id: &str) -> PoolResult<bool> {
        self.inner.is_defaulted(asset_id)
    }

    fn get_last_maturity_date(&self) -> Option<NaiveDate> {
        self.inner.get_last_maturity_date()
    }

    fn get_beginning_balance(&self, asset_id: &str, as_of: NaiveDate) -> PoolResult<Money> {
        if asset_id == self.broken {
            return Err(PoolError::MissingData {
                asset_id: asset_id.to_string(),
                field: "beginning_balance".into(),
            });
        }
        self.inner.get_beginning_balance(asset_id, as_of)
    }

    fn get_scheduled_principal(
        &self,
        asset_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> PoolResult<Money> {
        self.inner
            .get_scheduled_principal(asset_id, period_start, period_end)
    }
}

#[test]
fn test_collaborator_errors_propagate_unchanged() {
    let pool = FailingPool {
        inner: three_asset_pool(),
        broken: "ASSET_2",
    };
    let mut engine = seeded_engine(&pool, 1, 1);
    let err = engine
        .run_rating_history(analysis_date(), &pool, None, "QUARTERLY")
        .unwrap_err();
    match err {
        CloAnalyticsError::Pool(PoolError::MissingData { asset_id, field }) => {
            assert_eq!(asset_id, "ASSET_2");
            assert_eq!(field, "beginning_balance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.get_simulation_results().num_simulations, 0);
}

#[test]
fn test_unknown_asset_in_pool_lookup() {
    let pool = three_asset_pool();
    let err = pool.get_asset_maturity("NOPE").unwrap_err();
    assert_eq!(err, PoolError::AssetNotFound("NOPE".into()));
}
