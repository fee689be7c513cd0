use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;

use super::aggregator::{RatingHist, RatingHistBal};
use super::engine::{CreditMigrationEngine, SimHistory};
use super::period::PeriodType;
use super::rating_scale::{Rating, NUM_RATINGS};
use crate::error::CloAnalyticsError;
use crate::types::{Money, Rate};
use crate::CloAnalyticsResult;

// ---------------------------------------------------------------------------
// Summary types
// ---------------------------------------------------------------------------

/// Descriptive statistics of one per-path quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatistics {
    /// Terminal cumulative default balance over initial balance, per path.
    pub terminal_default_rate: DistributionSummary,
    pub mean_terminal_defaults: f64,
    /// Mean over paths of upgrades summed across all periods.
    pub mean_upgrades: f64,
    pub mean_downgrades: f64,
    /// Mean CDR at each period index, period 0 included.
    pub mean_cdr_by_period: Vec<f64>,
    /// Mean terminal asset count in each rating bucket.
    pub mean_terminal_counts: BTreeMap<Rating, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResults {
    /// Completed paths.
    pub num_simulations: usize,
    pub num_periods: u32,
    pub period_type: Option<PeriodType>,
    pub analysis_date: Option<NaiveDate>,
    pub statistics: MigrationStatistics,
}

// ---------------------------------------------------------------------------
// Flat export
// ---------------------------------------------------------------------------

/// One (simulation, period) row of the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRow {
    pub simulation: usize,
    pub period: u32,
    pub upgrades: u32,
    pub downgrades: u32,
    /// New defaults in this period.
    pub num_defaults: u32,
    pub counts: [u32; NUM_RATINGS],
    pub balances: [Money; NUM_RATINGS],
    pub cdr: Rate,
}

impl MigrationRow {
    fn from_period(simulation: usize, hist: &RatingHist, bal: &RatingHistBal) -> Self {
        MigrationRow {
            simulation,
            period: hist.period,
            upgrades: hist.upgrades,
            downgrades: hist.downgrades,
            num_defaults: hist.new_defaults,
            counts: hist.counts,
            balances: bal.balances,
            cdr: bal.cdr,
        }
    }

    /// Values in [`MigrationFrame::column_names`] order.
    pub fn record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(6 + 2 * NUM_RATINGS);
        record.push(self.simulation.to_string());
        record.push(self.period.to_string());
        record.push(self.upgrades.to_string());
        record.push(self.downgrades.to_string());
        record.push(self.num_defaults.to_string());
        record.extend(self.counts.iter().map(u32::to_string));
        record.extend(self.balances.iter().map(Decimal::to_string));
        record.push(self.cdr.to_string());
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFrame {
    pub columns: Vec<String>,
    pub rows: Vec<MigrationRow>,
}

impl Default for MigrationFrame {
    fn default() -> Self {
        MigrationFrame {
            columns: Self::column_names(),
            rows: Vec::new(),
        }
    }
}

impl MigrationFrame {
    /// `simulation, period, upgrades, downgrades, num_defaults`, then
    /// `count_<SYM>` and `balance_<SYM>` for every bucket, then `cdr`.
    pub fn column_names() -> Vec<String> {
        let mut columns: Vec<String> = ["simulation", "period", "upgrades", "downgrades", "num_defaults"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        columns.extend(Rating::ALL.iter().map(|r| format!("count_{}", r.symbol())));
        columns.extend(Rating::ALL.iter().map(|r| format!("balance_{}", r.symbol())));
        columns.push("cdr".to_string());
        columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the frame as CSV. The header row is always written.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> CloAnalyticsResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.record())?;
        }
        wtr.flush()
            .map_err(|e| CloAnalyticsError::Export(e.to_string()))
    }

    pub fn to_csv_string(&self) -> CloAnalyticsResult<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|e| CloAnalyticsError::Export(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Engine reporting
// ---------------------------------------------------------------------------

impl CreditMigrationEngine {
    /// Summary across completed paths. Zeroed when nothing has run yet.
    pub fn get_simulation_results(&self) -> SimulationResults {
        let histories: Vec<&SimHistory> = self.completed().collect();
        SimulationResults {
            num_simulations: histories.len(),
            num_periods: self.num_periods(),
            period_type: self.period_type(),
            analysis_date: self.analysis_date(),
            statistics: compute_statistics(&histories),
        }
    }

    /// One row per completed (simulation, period), in slot then period order.
    pub fn export_to_dataframe(&self) -> MigrationFrame {
        let rows = self
            .completed()
            .flat_map(|h| {
                h.rating_hist
                    .iter()
                    .zip(&h.rating_hist_bal)
                    .map(move |(hist, bal)| MigrationRow::from_period(h.simulation, hist, bal))
            })
            .collect();
        MigrationFrame {
            columns: MigrationFrame::column_names(),
            rows,
        }
    }
}

fn compute_statistics(histories: &[&SimHistory]) -> MigrationStatistics {
    let mut totals = [0.0; NUM_RATINGS];
    let mut default_rates = Vec::with_capacity(histories.len());
    let mut terminal_defaults = 0.0;
    let mut upgrades = 0.0;
    let mut downgrades = 0.0;
    let mut cdr_sums: Vec<f64> = Vec::new();
    let mut cdr_paths: Vec<u32> = Vec::new();

    for h in histories {
        if let Some((hist, bal)) = h.terminal() {
            for (total, &count) in totals.iter_mut().zip(&hist.counts) {
                *total += count as f64;
            }
            terminal_defaults += hist.cumulative_defaults as f64;
            let initial = h.initial_balance();
            let rate = if initial > Decimal::ZERO {
                (bal.cumulative_default_balance / initial).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };
            default_rates.push(rate);
        }
        upgrades += h.rating_hist.iter().map(|r| r.upgrades as f64).sum::<f64>();
        downgrades += h.rating_hist.iter().map(|r| r.downgrades as f64).sum::<f64>();

        if cdr_sums.len() < h.rating_hist_bal.len() {
            cdr_sums.resize(h.rating_hist_bal.len(), 0.0);
            cdr_paths.resize(h.rating_hist_bal.len(), 0);
        }
        for (i, bal) in h.rating_hist_bal.iter().enumerate() {
            cdr_sums[i] += bal.cdr.to_f64().unwrap_or(0.0);
            cdr_paths[i] += 1;
        }
    }

    let n = histories.len().max(1) as f64;
    MigrationStatistics {
        terminal_default_rate: summarize(&mut default_rates),
        mean_terminal_defaults: terminal_defaults / n,
        mean_upgrades: upgrades / n,
        mean_downgrades: downgrades / n,
        mean_cdr_by_period: cdr_sums
            .iter()
            .zip(&cdr_paths)
            .map(|(s, &k)| if k > 0 { s / k as f64 } else { 0.0 })
            .collect(),
        mean_terminal_counts: Rating::ALL
            .iter()
            .map(|r| (*r, totals[r.index()] / n))
            .collect(),
    }
}

fn summarize(values: &mut [f64]) -> DistributionSummary {
    if values.is_empty() {
        return DistributionSummary::default();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    DistributionSummary {
        mean,
        std_dev: variance.sqrt(),
        min: values[0],
        max: values[values.len() - 1],
        p5: percentile_sorted(values, 5.0),
        p25: percentile_sorted(values, 25.0),
        p50: percentile_sorted(values, 50.0),
        p75: percentile_sorted(values, 75.0),
        p95: percentile_sorted(values, 95.0),
    }
}

/// Linear-interpolated percentile of a sorted, non-empty slice.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}
