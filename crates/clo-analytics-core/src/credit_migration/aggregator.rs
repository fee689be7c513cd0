use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rating_scale::{Migration, Rating, DEFAULT_INDEX, NUM_RATINGS};
use crate::types::{Money, Rate};

/// Count of assets per rating bucket at the end of one period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingHist {
    pub period: u32,
    /// Indexed best (AAA) to worst (D).
    pub counts: [u32; NUM_RATINGS],
    pub upgrades: u32,
    pub downgrades: u32,
    pub unchanged: u32,
    /// Assets entering DEFAULT this period.
    pub new_defaults: u32,
    /// Assets that have entered DEFAULT during the run, through this period.
    pub cumulative_defaults: u32,
}

impl RatingHist {
    pub fn count(&self, rating: Rating) -> u32 {
        self.counts[rating.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

/// Balance-weighted counterpart of [`RatingHist`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingHistBal {
    pub period: u32,
    pub balances: [Money; NUM_RATINGS],
    /// Outstanding balance of the assets that entered the period performing.
    pub beginning_performing_balance: Money,
    pub new_default_balance: Money,
    pub cumulative_default_balance: Money,
    /// `new_default_balance / beginning_performing_balance`, zero when the
    /// denominator is zero.
    pub cdr: Rate,
}

impl RatingHistBal {
    pub fn balance(&self, rating: Rating) -> Money {
        self.balances[rating.index()]
    }

    pub fn total(&self) -> Money {
        self.balances.iter().copied().sum()
    }
}

/// Builds the [`RatingHist`]/[`RatingHistBal`] pair period by period.
///
/// Assets in DEFAULT are carried in the D bucket of every later period at
/// their balance on default. Other assets only appear in a period when they
/// are recorded for it.
#[derive(Debug, Clone, Default)]
pub struct PeriodAggregator {
    hist: RatingHist,
    bal: RatingHistBal,
    carried_defaults: u32,
    carried_default_balance: Money,
    cumulative_defaults: u32,
    cumulative_default_balance: Money,
}

impl PeriodAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an asset's starting state in the period-0 snapshot.
    pub fn record_initial(&mut self, rating: Rating, balance: Money) {
        if rating.is_default() {
            self.carried_defaults += 1;
            self.carried_default_balance += balance;
        }
        self.add_to_bucket(rating, balance);
    }

    /// Close the period-0 snapshot: no transitions, no new defaults.
    pub fn snapshot(&mut self) -> (RatingHist, RatingHistBal) {
        self.hist.period = 0;
        self.bal.period = 0;
        self.take()
    }

    /// Start transition period `period`. Assets already in DEFAULT are
    /// pre-loaded into the D bucket.
    pub fn begin_period(&mut self, period: u32) {
        self.hist = RatingHist {
            period,
            ..Default::default()
        };
        self.bal = RatingHistBal {
            period,
            ..Default::default()
        };
        self.hist.counts[DEFAULT_INDEX] = self.carried_defaults;
        self.bal.balances[DEFAULT_INDEX] = self.carried_default_balance;
    }

    /// Record one performing asset's move from `old` to `new`.
    ///
    /// `beginning_balance` feeds the CDR denominator; `ending_balance` goes
    /// into the bucket of the new rating.
    pub fn record_transition(
        &mut self,
        old: Rating,
        new: Rating,
        beginning_balance: Money,
        ending_balance: Money,
    ) {
        self.bal.beginning_performing_balance += beginning_balance;
        match Migration::classify(old, new) {
            Migration::Upgrade => self.hist.upgrades += 1,
            Migration::Downgrade => self.hist.downgrades += 1,
            Migration::Unchanged => self.hist.unchanged += 1,
        }
        if new.is_default() && !old.is_default() {
            self.hist.new_defaults += 1;
            self.bal.new_default_balance += ending_balance;
            self.cumulative_defaults += 1;
            self.cumulative_default_balance += ending_balance;
            self.carried_defaults += 1;
            self.carried_default_balance += ending_balance;
        }
        self.add_to_bucket(new, ending_balance);
    }

    /// Close the current period and return its snapshots.
    pub fn finish(&mut self) -> (RatingHist, RatingHistBal) {
        self.take()
    }

    fn add_to_bucket(&mut self, rating: Rating, balance: Money) {
        let i = rating.index();
        self.hist.counts[i] += 1;
        self.bal.balances[i] += balance;
    }

    fn take(&mut self) -> (RatingHist, RatingHistBal) {
        self.hist.cumulative_defaults = self.cumulative_defaults;
        self.bal.cumulative_default_balance = self.cumulative_default_balance;
        self.bal.cdr = if self.bal.beginning_performing_balance > Decimal::ZERO {
            self.bal.new_default_balance / self.bal.beginning_performing_balance
        } else {
            Decimal::ZERO
        };
        (
            std::mem::take(&mut self.hist),
            std::mem::take(&mut self.bal),
        )
    }
}
