use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PoolError;
use crate::types::Money;
use crate::{CloAnalyticsResult, PoolResult};

/// Read-only view of one asset, as used for correlation grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProfile {
    pub asset_id: String,
    pub sp_rating: Option<String>,
    pub industry: Option<String>,
}

pub trait CollateralPoolReader {
    /// Asset ids in a stable enumeration order.
    fn get_asset_ids(&self) -> Vec<String>;

    fn get_asset(&self, asset_id: &str) -> PoolResult<AssetProfile>;

    /// S&P rating in force on `as_of` (or the current one when `None`).
    fn get_sp_rating(&self, asset_id: &str, as_of: Option<NaiveDate>)
        -> PoolResult<Option<String>>;

    fn get_asset_maturity(&self, asset_id: &str) -> PoolResult<NaiveDate>;

    fn is_defaulted(&self, asset_id: &str) -> PoolResult<bool>;

    /// Latest maturity across the pool; `None` for an empty pool.
    fn get_last_maturity_date(&self) -> Option<NaiveDate>;

    /// Outstanding principal on `as_of`.
    fn get_beginning_balance(&self, asset_id: &str, as_of: NaiveDate) -> PoolResult<Money>;

    /// Principal scheduled to be repaid in `(period_start, period_end]`.
    fn get_scheduled_principal(
        &self,
        asset_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> PoolResult<Money>;
}

pub trait CollateralPoolWriter {
    fn add_sp_rating(&mut self, asset_id: &str, as_of: NaiveDate, rating: &str) -> PoolResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory pool
// ---------------------------------------------------------------------------

/// A dated principal repayment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalPayment {
    pub date: NaiveDate,
    pub amount: Money,
}

/// A dated rating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingAction {
    pub date: NaiveDate,
    pub rating: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralAsset {
    pub asset_id: String,
    /// Original principal.
    pub par_amount: Money,
    /// Rating in force before any dated action.
    pub sp_rating: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    pub maturity: NaiveDate,
    #[serde(default)]
    pub defaulted: bool,
    /// Scheduled amortisation. Principal outstanding at maturity is not listed.
    #[serde(default)]
    pub amortization: Vec<PrincipalPayment>,
    #[serde(default)]
    pub rating_history: Vec<RatingAction>,
}

impl CollateralAsset {
    pub fn new(asset_id: &str, par_amount: Money, sp_rating: Option<&str>, maturity: NaiveDate) -> Self {
        CollateralAsset {
            asset_id: asset_id.to_string(),
            par_amount,
            sp_rating: sp_rating.map(str::to_string),
            industry: None,
            maturity,
            defaulted: false,
            amortization: Vec::new(),
            rating_history: Vec::new(),
        }
    }

    pub fn with_industry(mut self, industry: Option<&str>) -> Self {
        self.industry = industry.map(str::to_string);
        self
    }

    pub fn with_amortization(mut self, payments: Vec<PrincipalPayment>) -> Self {
        self.amortization = payments;
        self
    }

    pub fn defaulted(mut self) -> Self {
        self.defaulted = true;
        self
    }

    fn rating_on(&self, as_of: Option<NaiveDate>) -> Option<String> {
        let latest = self
            .rating_history
            .iter()
            .filter(|a| as_of.is_none_or(|d| a.date <= d))
            .max_by_key(|a| a.date);
        match latest {
            Some(action) => Some(action.rating.clone()),
            None => self.sp_rating.clone(),
        }
    }

    fn repaid_through(&self, as_of: NaiveDate) -> Money {
        self.amortization
            .iter()
            .filter(|p| p.date <= as_of)
            .map(|p| p.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<CollateralAsset>", into = "Vec<CollateralAsset>")]
pub struct InMemoryCollateralPool {
    assets: Vec<CollateralAsset>,
    index: HashMap<String, usize>,
}

impl From<Vec<CollateralAsset>> for InMemoryCollateralPool {
    fn from(assets: Vec<CollateralAsset>) -> Self {
        Self::new(assets)
    }
}

impl From<InMemoryCollateralPool> for Vec<CollateralAsset> {
    fn from(pool: InMemoryCollateralPool) -> Self {
        pool.assets
    }
}

impl InMemoryCollateralPool {
    /// Build a pool. A repeated asset id replaces the earlier entry in place.
    pub fn new(assets: Vec<CollateralAsset>) -> Self {
        let mut pool = InMemoryCollateralPool::default();
        for asset in assets {
            pool.insert(asset);
        }
        pool
    }

    /// Load a JSON array of assets.
    pub fn from_json(json: &str) -> CloAnalyticsResult<Self> {
        let assets: Vec<CollateralAsset> = serde_json::from_str(json)?;
        Ok(Self::new(assets))
    }

    pub fn insert(&mut self, asset: CollateralAsset) {
        match self.index.get(&asset.asset_id) {
            Some(&i) => self.assets[i] = asset,
            None => {
                self.index.insert(asset.asset_id.clone(), self.assets.len());
                self.assets.push(asset);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn assets(&self) -> &[CollateralAsset] {
        &self.assets
    }

    /// Sum of beginning balances on `as_of`.
    pub fn total_balance(&self, as_of: NaiveDate) -> Money {
        self.assets
            .iter()
            .map(|a| (a.par_amount - a.repaid_through(as_of)).max(Decimal::ZERO))
            .sum()
    }

    fn asset(&self, asset_id: &str) -> PoolResult<&CollateralAsset> {
        self.index
            .get(asset_id)
            .map(|&i| &self.assets[i])
            .ok_or_else(|| PoolError::AssetNotFound(asset_id.to_string()))
    }
}

impl CollateralPoolReader for InMemoryCollateralPool {
    fn get_asset_ids(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.asset_id.clone()).collect()
    }

    fn get_asset(&self, asset_id: &str) -> PoolResult<AssetProfile> {
        let a = self.asset(asset_id)?;
        Ok(AssetProfile {
            asset_id: a.asset_id.clone(),
            sp_rating: a.rating_on(None),
            industry: a.industry.clone(),
        })
    }

    fn get_sp_rating(
        &self,
        asset_id: &str,
        as_of: Option<NaiveDate>,
    ) -> PoolResult<Option<String>> {
        Ok(self.asset(asset_id)?.rating_on(as_of))
    }

    fn get_asset_maturity(&self, asset_id: &str) -> PoolResult<NaiveDate> {
        Ok(self.asset(asset_id)?.maturity)
    }

    fn is_defaulted(&self, asset_id: &str) -> PoolResult<bool> {
        Ok(self.asset(asset_id)?.defaulted)
    }

    fn get_last_maturity_date(&self) -> Option<NaiveDate> {
        self.assets.iter().map(|a| a.maturity).max()
    }

    fn get_beginning_balance(&self, asset_id: &str, as_of: NaiveDate) -> PoolResult<Money> {
        let a = self.asset(asset_id)?;
        Ok((a.par_amount - a.repaid_through(as_of)).max(Decimal::ZERO))
    }

    fn get_scheduled_principal(
        &self,
        asset_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> PoolResult<Money> {
        let a = self.asset(asset_id)?;
        Ok(a.amortization
            .iter()
            .filter(|p| p.date > period_start && p.date <= period_end)
            .map(|p| p.amount)
            .sum())
    }
}

impl CollateralPoolWriter for InMemoryCollateralPool {
    fn add_sp_rating(&mut self, asset_id: &str, as_of: NaiveDate, rating: &str) -> PoolResult<()> {
        let i = *self
            .index
            .get(asset_id)
            .ok_or_else(|| PoolError::AssetNotFound(asset_id.to_string()))?;
        let asset = &mut self.assets[i];
        asset.rating_history.retain(|a| a.date != as_of);
        asset.rating_history.push(RatingAction {
            date: as_of,
            rating: rating.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
