use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::aggregator::{PeriodAggregator, RatingHist, RatingHistBal};
use super::config::{CorrelationConfig, MigrationConfig};
use super::correlation::CorrelationMatrix;
use super::path::RatingPathSimulator;
use super::period::{num_periods, period_bounds, period_end, PeriodType};
use super::pool::{CollateralPoolReader, CollateralPoolWriter};
use super::rating_scale::Rating;
use super::sampler::CorrelatedSampler;
use super::transition::TransitionMatrix;
use crate::error::CloAnalyticsError;
use crate::types::Money;
use crate::CloAnalyticsResult;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Performing,
    Matured,
    Defaulted,
}

/// Where one asset ended up on one simulation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub asset_id: String,
    pub initial_rating: Rating,
    pub final_rating: Rating,
    pub final_balance: Money,
    pub status: AssetStatus,
    /// Period in which the asset matured or defaulted. Period 0 marks an
    /// asset that was already in default on the analysis date.
    pub resolved_period: Option<u32>,
}

/// One simulation path: snapshot plus one entry per transition period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimHistory {
    pub simulation: usize,
    pub seed: u64,
    pub analysis_date: NaiveDate,
    pub rating_hist: Vec<RatingHist>,
    pub rating_hist_bal: Vec<RatingHistBal>,
    pub asset_outcomes: Vec<AssetOutcome>,
}

impl SimHistory {
    pub fn num_periods(&self) -> u32 {
        self.rating_hist.len().saturating_sub(1) as u32
    }

    /// Total balance in the period-0 snapshot.
    pub fn initial_balance(&self) -> Money {
        self.rating_hist_bal
            .first()
            .map_or(Decimal::ZERO, RatingHistBal::total)
    }

    pub fn terminal(&self) -> Option<(&RatingHist, &RatingHistBal)> {
        self.rating_hist.last().zip(self.rating_hist_bal.last())
    }
}

/// How the setup-time correlation matrix was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationSource {
    /// Derived from a collateral pool; rows are keyed by asset id.
    Pool,
    /// Generic matrix; rows are assigned to assets by position.
    Default,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineState {
    period: PeriodType,
    debug_mode: bool,
    base_seed: u64,
    correlation_config: CorrelationConfig,
    transition: TransitionMatrix,
    correlation: CorrelationMatrix,
    correlation_source: CorrelationSource,
    sampler: CorrelatedSampler,
    /// Built on the first run the setup matrix cannot serve, then reused.
    run_local: Option<RunLocalCorrelation>,
    asset_order: Vec<String>,
    analysis_date: Option<NaiveDate>,
    num_periods: u32,
    sim_hist: Vec<Option<SimHistory>>,
}

/// Either uninitialised or holding one set of matrices built by `setup`.
///
/// Path `k` draws from its own generator seeded with `base_seed + k`, so
/// paths are reproducible one by one and may run in any order.
#[derive(Default)]
pub struct CreditMigrationEngine {
    state: Option<EngineState>,
}

impl CreditMigrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build matrices and allocate `num_simulations` empty slots.
    ///
    /// `period` is parsed leniently (`"QUARTERLY"`, `"q"`, `"annual"`, ...);
    /// anything outside the supported grains fails with
    /// [`CloAnalyticsError::UnsupportedPeriod`]. Any previous state is
    /// discarded first.
    pub fn setup(
        &mut self,
        num_simulations: usize,
        debug_mode: bool,
        pool: Option<&dyn CollateralPoolReader>,
        period: &str,
    ) -> CloAnalyticsResult<()> {
        self.cleanup();
        let config = MigrationConfig {
            num_simulations,
            period: period.parse()?,
            debug_mode,
            ..Default::default()
        };
        self.setup_with_config(&config, pool)
    }

    pub fn setup_with_config(
        &mut self,
        config: &MigrationConfig,
        pool: Option<&dyn CollateralPoolReader>,
    ) -> CloAnalyticsResult<()> {
        self.cleanup();
        config.validate()?;

        let transition = match &config.annual_transition_matrix {
            Some(rows) => TransitionMatrix::from_annual(rows, config.period)?,
            None => TransitionMatrix::for_period(config.period),
        };

        let (correlation, correlation_source) = match pool {
            Some(pool) => (
                CorrelationMatrix::pool_matrix(pool, &config.correlation)?,
                CorrelationSource::Pool,
            ),
            None => (
                CorrelationMatrix::default_matrix(
                    config.correlation.default_size,
                    config.correlation.default_correlation,
                )?,
                CorrelationSource::Default,
            ),
        };
        let sampler = CorrelatedSampler::new(&correlation)?;
        let asset_order = correlation.asset_order().to_vec();
        let base_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());

        info!(
            period = %config.period,
            num_simulations = config.num_simulations,
            num_assets = asset_order.len(),
            correlation_dim = correlation.dim(),
            correlation_source = ?correlation_source,
            seed = base_seed,
            "credit migration engine set up"
        );

        self.state = Some(EngineState {
            period: config.period,
            debug_mode: config.debug_mode,
            base_seed,
            correlation_config: config.correlation.clone(),
            transition,
            correlation,
            correlation_source,
            sampler,
            run_local: None,
            asset_order,
            analysis_date: None,
            num_periods: 0,
            sim_hist: (0..config.num_simulations).map(|_| None).collect(),
        });
        Ok(())
    }

    /// Drop all matrices and histories. The engine can be set up again.
    pub fn cleanup(&mut self) {
        self.state = None;
    }

    /// Simulate one path into the next free slot.
    ///
    /// Once every allocated slot is filled, further runs append a new slot.
    /// Collaborator failures are returned unchanged and leave the slot empty.
    pub fn run_rating_history(
        &mut self,
        analysis_date: NaiveDate,
        pool: &dyn CollateralPoolReader,
        deal_collateral: Option<&HashMap<String, Money>>,
        period: &str,
    ) -> CloAnalyticsResult<&SimHistory> {
        let state = self.state.as_mut().ok_or(CloAnalyticsError::NotInitialized)?;
        state.check_period(period)?;

        let slot = state
            .sim_hist
            .iter()
            .position(Option::is_none)
            .unwrap_or(state.sim_hist.len());
        let seed = state.seed_for(slot);

        let history = {
            let plan = state.plan_run(pool, analysis_date, deal_collateral)?;
            plan.simulate(pool, slot, seed)?
        };

        if slot == state.sim_hist.len() {
            warn!(
                simulation = slot,
                allocated = state.sim_hist.len(),
                "all simulation slots filled, appending a new one"
            );
            state.sim_hist.push(None);
        }
        state.analysis_date = Some(analysis_date);
        state.num_periods = history.num_periods();
        info!(
            simulation = slot,
            seed,
            num_periods = state.num_periods,
            "rating history complete"
        );
        Ok(state.sim_hist[slot].insert(history))
    }

    /// Fill every empty slot, on rayon when the `parallel` feature is on.
    ///
    /// Paths that complete are kept even when another path fails; the first
    /// failure is then returned. On success returns the number of paths run.
    pub fn run_all_simulations(
        &mut self,
        analysis_date: NaiveDate,
        pool: &(dyn CollateralPoolReader + Sync),
        deal_collateral: Option<&HashMap<String, Money>>,
        period: &str,
    ) -> CloAnalyticsResult<usize> {
        let state = self.state.as_mut().ok_or(CloAnalyticsError::NotInitialized)?;
        state.check_period(period)?;

        let pending: Vec<usize> = state
            .sim_hist
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_none())
            .map(|(k, _)| k)
            .collect();
        let base_seed = state.base_seed;

        let (results, periods) = {
            let plan = state.plan_run(pool, analysis_date, deal_collateral)?;
            let results = maybe_parallel_map(&pending, |&k| {
                plan.simulate(pool, k, base_seed.wrapping_add(k as u64))
            });
            (results, plan.num_periods)
        };

        let mut completed = 0;
        let mut first_error = None;
        for (k, result) in pending.into_iter().zip(results) {
            match result {
                Ok(history) => {
                    state.sim_hist[k] = Some(history);
                    completed += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if completed > 0 {
            state.analysis_date = Some(analysis_date);
            state.num_periods = periods;
        }
        info!(completed, num_periods = periods, "simulation batch complete");

        match first_error {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    /// Stamp each asset's final simulated rating from path `simulation` onto
    /// `pool`, dated at the end of the period in which the asset resolved
    /// (or the last period for assets still performing).
    pub fn write_back_ratings(
        &self,
        simulation: usize,
        pool: &mut dyn CollateralPoolWriter,
    ) -> CloAnalyticsResult<usize> {
        let state = self.state.as_ref().ok_or(CloAnalyticsError::NotInitialized)?;
        let history = state
            .sim_hist
            .get(simulation)
            .and_then(Option::as_ref)
            .ok_or_else(|| CloAnalyticsError::InvalidInput {
                field: "simulation".into(),
                reason: format!("no completed simulation at index {simulation}"),
            })?;

        let last = history.num_periods();
        for outcome in &history.asset_outcomes {
            let period = outcome.resolved_period.unwrap_or(last);
            let as_of = period_end(history.analysis_date, period, state.period)?;
            pool.add_sp_rating(&outcome.asset_id, as_of, outcome.final_rating.symbol())?;
        }
        Ok(history.asset_outcomes.len())
    }

    // -- accessors ----------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn period_type(&self) -> Option<PeriodType> {
        self.state.as_ref().map(|s| s.period)
    }

    pub fn debug_mode(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.debug_mode)
    }

    pub fn base_seed(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.base_seed)
    }

    pub fn transition_matrix(&self) -> Option<&TransitionMatrix> {
        self.state.as_ref().map(|s| &s.transition)
    }

    pub fn correlation_matrix(&self) -> Option<&CorrelationMatrix> {
        self.state.as_ref().map(|s| &s.correlation)
    }

    pub fn correlation_source(&self) -> Option<CorrelationSource> {
        self.state.as_ref().map(|s| s.correlation_source)
    }

    /// Asset ids fixed at setup. Empty when no pool was supplied.
    pub fn asset_order(&self) -> &[String] {
        self.state
            .as_ref()
            .map_or(&[][..], |s| s.asset_order.as_slice())
    }

    pub fn num_assets(&self) -> usize {
        self.asset_order().len()
    }

    /// Allocated simulation slots, filled or not.
    pub fn num_simulations(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.sim_hist.len())
    }

    pub fn analysis_date(&self) -> Option<NaiveDate> {
        self.state.as_ref().and_then(|s| s.analysis_date)
    }

    /// Transition periods of the most recent run.
    pub fn num_periods(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.num_periods)
    }

    pub fn sim_hist(&self, simulation: usize) -> Option<&SimHistory> {
        self.state
            .as_ref()
            .and_then(|s| s.sim_hist.get(simulation))
            .and_then(Option::as_ref)
    }

    /// Completed paths in slot order.
    pub fn completed(&self) -> impl Iterator<Item = &SimHistory> + '_ {
        self.state
            .iter()
            .flat_map(|s| s.sim_hist.iter())
            .filter_map(Option::as_ref)
    }

    pub fn num_completed(&self) -> usize {
        self.completed().count()
    }
}

// ---------------------------------------------------------------------------
// Run planning
// ---------------------------------------------------------------------------

impl EngineState {
    fn check_period(&self, period: &str) -> CloAnalyticsResult<()> {
        let requested: PeriodType = period.parse()?;
        if requested != self.period {
            return Err(CloAnalyticsError::PeriodMismatch {
                configured: self.period.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }

    fn seed_for(&self, simulation: usize) -> u64 {
        self.base_seed.wrapping_add(simulation as u64)
    }

    /// Select the assets of this run, read their starting state and pick
    /// the correlation rows they draw from.
    fn plan_run(
        &mut self,
        pool: &dyn CollateralPoolReader,
        analysis_date: NaiveDate,
        deal_collateral: Option<&HashMap<String, Money>>,
    ) -> CloAnalyticsResult<RunPlan<'_>> {
        let mut assets = Vec::new();
        for asset_id in pool.get_asset_ids() {
            if deal_collateral.is_some_and(|deal| !deal.contains_key(&asset_id)) {
                continue;
            }
            let maturity = pool.get_asset_maturity(&asset_id)?;
            if maturity <= analysis_date {
                continue;
            }
            let defaulted = pool.is_defaulted(&asset_id)?;
            let rating = if defaulted {
                Rating::Default
            } else {
                Rating::from_symbol(pool.get_sp_rating(&asset_id, Some(analysis_date))?.as_deref())
            };
            let balance = pool.get_beginning_balance(&asset_id, analysis_date)?;
            let draw_index = assets.len();
            assets.push(PlannedAsset {
                asset_id,
                draw_index,
                rating,
                balance,
                maturity,
                defaulted,
            });
        }

        let use_run_local = self.assign_rows(pool, &mut assets)?;
        let sampler = match &self.run_local {
            Some(local) if use_run_local => &local.sampler,
            _ => &self.sampler,
        };

        let periods = pool
            .get_last_maturity_date()
            .map_or(0, |last| num_periods(analysis_date, last, self.period));

        Ok(RunPlan {
            transition: &self.transition,
            sampler,
            period: self.period,
            analysis_date,
            num_periods: periods,
            debug_mode: self.debug_mode,
            assets,
        })
    }

    /// Point each asset at its correlation row. Returns `true` when the run
    /// draws from the run-local matrix, whose rows follow `assets` by
    /// position.
    fn assign_rows(
        &mut self,
        pool: &dyn CollateralPoolReader,
        assets: &mut [PlannedAsset],
    ) -> CloAnalyticsResult<bool> {
        let n = assets.len();
        let key = match self.correlation_source {
            CorrelationSource::Pool => {
                let rows: Option<Vec<usize>> = assets
                    .iter()
                    .map(|a| self.correlation.index_of(&a.asset_id))
                    .collect();
                if let Some(rows) = rows {
                    for (asset, row) in assets.iter_mut().zip(rows) {
                        asset.draw_index = row;
                    }
                    return Ok(false);
                }
                RunLocalKey::Assets(assets.iter().map(|a| a.asset_id.clone()).collect())
            }
            CorrelationSource::Default if n <= self.correlation.dim() => return Ok(false),
            CorrelationSource::Default => RunLocalKey::Dim(n),
        };

        if self.run_local.as_ref().is_some_and(|local| local.key == key) {
            return Ok(true);
        }
        let matrix = match &key {
            RunLocalKey::Assets(ids) => {
                warn!(
                    num_assets = n,
                    "assets outside the setup correlation matrix, building a run-local one"
                );
                CorrelationMatrix::for_assets(pool, ids, &self.correlation_config)?
            }
            RunLocalKey::Dim(dim) => {
                warn!(
                    num_assets = n,
                    correlation_dim = self.correlation.dim(),
                    "default correlation matrix too small, building a run-local one"
                );
                CorrelationMatrix::default_matrix(
                    *dim,
                    self.correlation_config.default_correlation,
                )?
            }
        };
        self.run_local = Some(RunLocalCorrelation {
            key,
            sampler: CorrelatedSampler::new(&matrix)?,
        });
        Ok(true)
    }
}

/// What a run-local matrix was built for: the selected asset ids when the
/// setup matrix is pool-derived, the asset count when it is generic.
#[derive(Debug, PartialEq, Eq)]
enum RunLocalKey {
    Assets(Vec<String>),
    Dim(usize),
}

struct RunLocalCorrelation {
    key: RunLocalKey,
    sampler: CorrelatedSampler,
}

struct PlannedAsset {
    asset_id: String,
    /// Row of the sampler's correlation matrix this asset draws from.
    draw_index: usize,
    rating: Rating,
    balance: Money,
    maturity: NaiveDate,
    defaulted: bool,
}

struct AssetState {
    rating: Rating,
    balance: Money,
    status: AssetStatus,
    resolved_period: Option<u32>,
}

/// Everything a single path needs, shared read-only across paths.
struct RunPlan<'s> {
    transition: &'s TransitionMatrix,
    sampler: &'s CorrelatedSampler,
    period: PeriodType,
    analysis_date: NaiveDate,
    num_periods: u32,
    debug_mode: bool,
    assets: Vec<PlannedAsset>,
}

impl RunPlan<'_> {
    fn simulate(
        &self,
        pool: &dyn CollateralPoolReader,
        simulation: usize,
        seed: u64,
    ) -> CloAnalyticsResult<SimHistory> {
        let mut rng = StdRng::seed_from_u64(seed);
        let path = RatingPathSimulator::new(self.transition);
        let mut agg = PeriodAggregator::new();
        let capacity = self.num_periods as usize + 1;
        let mut rating_hist = Vec::with_capacity(capacity);
        let mut rating_hist_bal = Vec::with_capacity(capacity);

        let mut states: Vec<AssetState> = self
            .assets
            .iter()
            .map(|a| AssetState {
                rating: a.rating,
                balance: a.balance,
                status: if a.defaulted {
                    AssetStatus::Defaulted
                } else {
                    AssetStatus::Performing
                },
                resolved_period: a.defaulted.then_some(0),
            })
            .collect();

        for s in &states {
            agg.record_initial(s.rating, s.balance);
        }
        let (hist, bal) = agg.snapshot();
        rating_hist.push(hist);
        rating_hist_bal.push(bal);

        let mut active = Vec::with_capacity(states.len());
        let mut rows = Vec::with_capacity(states.len());
        for period in 1..=self.num_periods {
            let (start, end) = period_bounds(self.analysis_date, period, self.period)?;

            active.clear();
            rows.clear();
            for (k, s) in states.iter().enumerate() {
                if s.status == AssetStatus::Performing {
                    active.push(k);
                    rows.push(self.assets[k].draw_index);
                }
            }
            let draws = self.sampler.draw_subset(&mut rng, &rows);

            agg.begin_period(period);
            for (&k, &draw) in active.iter().zip(&draws) {
                let asset = &self.assets[k];
                let s = &mut states[k];
                let old = s.rating;
                let new = path.next_rating(old, draw);
                let beginning = s.balance;
                let ending = if new.is_default() {
                    s.status = AssetStatus::Defaulted;
                    s.resolved_period = Some(period);
                    beginning
                } else {
                    let principal = pool.get_scheduled_principal(&asset.asset_id, start, end)?;
                    if asset.maturity <= end {
                        s.status = AssetStatus::Matured;
                        s.resolved_period = Some(period);
                    }
                    (beginning - principal).max(Decimal::ZERO)
                };
                agg.record_transition(old, new, beginning, ending);
                s.rating = new;
                s.balance = ending;
            }

            let (hist, bal) = agg.finish();
            if self.debug_mode {
                debug!(
                    simulation,
                    period,
                    active = active.len(),
                    upgrades = hist.upgrades,
                    downgrades = hist.downgrades,
                    new_defaults = hist.new_defaults,
                    cdr = %bal.cdr,
                    "period complete"
                );
            }
            rating_hist.push(hist);
            rating_hist_bal.push(bal);
        }

        let asset_outcomes = self
            .assets
            .iter()
            .zip(&states)
            .map(|(a, s)| AssetOutcome {
                asset_id: a.asset_id.clone(),
                initial_rating: a.rating,
                final_rating: s.rating,
                final_balance: s.balance,
                status: s.status,
                resolved_period: s.resolved_period,
            })
            .collect();

        Ok(SimHistory {
            simulation,
            seed,
            analysis_date: self.analysis_date,
            rating_hist,
            rating_hist_bal,
            asset_outcomes,
        })
    }
}

/// Map over `items`, in parallel when the `parallel` feature is enabled.
fn maybe_parallel_map<T, U, F>(items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    #[cfg(feature = "parallel")]
    let mapped = {
        use rayon::prelude::*;
        items.par_iter().map(f).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let mapped = items.iter().map(f).collect();

    mapped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
