use serde::{Deserialize, Serialize};

use super::period::PeriodType;
use super::rating_scale::{Rating, DEFAULT_INDEX, NUM_RATINGS};
use crate::error::CloAnalyticsError;
use crate::CloAnalyticsResult;

pub type Matrix = [[f64; NUM_RATINGS]; NUM_RATINGS];

// ---------------------------------------------------------------------------
// Built-in annual calibration
// ---------------------------------------------------------------------------

/// One-year default rate by starting notch, AAA through CCC.
const ANNUAL_DEFAULT_RATE: [f64; NUM_RATINGS - 1] = [
    0.0001, 0.0002, 0.0002, 0.0003, 0.0005, 0.0006, 0.0008, 0.0011, 0.0016, 0.0026, 0.0035,
    0.0055, 0.0095, 0.0180, 0.0320, 0.0600, 0.2650,
];

/// One-year probability of ending in the starting notch, AAA through CCC.
const ANNUAL_STABILITY: [f64; NUM_RATINGS - 1] = [
    0.870, 0.800, 0.800, 0.790, 0.790, 0.800, 0.790, 0.780, 0.790, 0.780, 0.720, 0.730, 0.730,
    0.720, 0.700, 0.620, 0.450,
];

/// Share of non-default migration mass that moves up the scale.
const UPGRADE_SHARE: f64 = 0.35;

/// Geometric decay of migration mass per notch of distance.
const NOTCH_DECAY: f64 = 0.45;

const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Spread `mass` over `targets`, weighting each by decay^(distance - 1).
fn spread_by_distance(row: &mut [f64; NUM_RATINGS], from: usize, targets: &[usize], mass: f64) {
    if targets.is_empty() || mass <= 0.0 {
        return;
    }
    let weights: Vec<f64> = targets
        .iter()
        .map(|&j| NOTCH_DECAY.powi(from.abs_diff(j) as i32 - 1))
        .collect();
    let total: f64 = weights.iter().sum();
    for (&j, w) in targets.iter().zip(weights) {
        row[j] = mass * w / total;
    }
}

/// Annual marginal transition probabilities of the built-in calibration.
pub fn annual_calibration() -> Matrix {
    let mut m = [[0.0; NUM_RATINGS]; NUM_RATINGS];

    for (i, (&pd, &stay)) in ANNUAL_DEFAULT_RATE.iter().zip(&ANNUAL_STABILITY).enumerate() {
        let migrate = (1.0 - stay - pd).max(0.0);

        let above: Vec<usize> = (0..i).collect();
        let below: Vec<usize> = (i + 1..DEFAULT_INDEX).collect();
        let up_share = match (above.is_empty(), below.is_empty()) {
            (true, _) => 0.0,
            (false, true) => 1.0,
            (false, false) => UPGRADE_SHARE,
        };

        let row = &mut m[i];
        row[i] = stay;
        row[DEFAULT_INDEX] = pd;
        spread_by_distance(row, i, &above, migrate * up_share);
        spread_by_distance(row, i, &below, migrate * (1.0 - up_share));
    }
    m[DEFAULT_INDEX][DEFAULT_INDEX] = 1.0;
    m
}

// ---------------------------------------------------------------------------
// Matrix operations
// ---------------------------------------------------------------------------

fn matrix_multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let mut result = [[0.0; NUM_RATINGS]; NUM_RATINGS];
    for (a_row, out_row) in a.iter().zip(result.iter_mut()) {
        for (j, cell) in out_row.iter_mut().enumerate() {
            *cell = a_row.iter().zip(b.iter()).map(|(x, b_row)| x * b_row[j]).sum();
        }
    }
    result
}

fn identity() -> Matrix {
    let mut id = [[0.0; NUM_RATINGS]; NUM_RATINGS];
    for (i, row) in id.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    id
}

/// Raise a transition matrix to an integer power via repeated squaring.
fn matrix_power(m: &Matrix, exp: u32) -> Matrix {
    let mut base = *m;
    let mut result = identity();
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = matrix_multiply(&result, &base);
        }
        base = matrix_multiply(&base, &base);
        e >>= 1;
    }
    result
}

/// Rescale annual off-diagonal probabilities to one period of `year_fraction`.
fn rescale_to_period(annual: &Matrix, year_fraction: f64) -> Matrix {
    let mut m = [[0.0; NUM_RATINGS]; NUM_RATINGS];
    for (i, (annual_row, row)) in annual.iter().zip(m.iter_mut()).enumerate() {
        let mut off_diagonal = 0.0;
        for (j, (&p, cell)) in annual_row.iter().zip(row.iter_mut()).enumerate() {
            if i != j {
                *cell = p * year_fraction;
                off_diagonal += *cell;
            }
        }
        row[i] = (1.0 - off_diagonal).max(0.0);
    }
    m
}

fn cumulate(marginal: &Matrix) -> Matrix {
    let mut cumulative = [[0.0; NUM_RATINGS]; NUM_RATINGS];
    for (row, cum_row) in marginal.iter().zip(cumulative.iter_mut()) {
        let mut acc = 0.0_f64;
        let mut prev = 0.0_f64;
        for (p, c) in row.iter().zip(cum_row.iter_mut()) {
            acc += p;
            prev = acc.min(1.0).max(prev);
            *c = prev;
        }
        cum_row[DEFAULT_INDEX] = 1.0;
    }
    cumulative[DEFAULT_INDEX] = [0.0; NUM_RATINGS];
    cumulative[DEFAULT_INDEX][DEFAULT_INDEX] = 1.0;
    cumulative
}

fn validate_annual(annual: &[Vec<f64>]) -> CloAnalyticsResult<Matrix> {
    if annual.len() != NUM_RATINGS {
        return Err(CloAnalyticsError::InvalidInput {
            field: "annual_transition_matrix".into(),
            reason: format!("expected {} rows, got {}", NUM_RATINGS, annual.len()),
        });
    }

    let mut m = [[0.0; NUM_RATINGS]; NUM_RATINGS];
    for (i, row) in annual.iter().enumerate() {
        if row.len() != NUM_RATINGS {
            return Err(CloAnalyticsError::InvalidInput {
                field: format!("annual_transition_matrix[{}]", i),
                reason: format!("row has {} columns but {} ratings", row.len(), NUM_RATINGS),
            });
        }
        for (j, &p) in row.iter().enumerate() {
            if !p.is_finite() || p < 0.0 {
                return Err(CloAnalyticsError::InvalidInput {
                    field: format!("annual_transition_matrix[{}][{}]", i, j),
                    reason: format!("probability must be finite and non-negative, got {}", p),
                });
            }
            m[i][j] = p;
        }
        let row_sum: f64 = row.iter().sum();
        if (row_sum - 1.0).abs() > ROW_SUM_TOLERANCE {
            return Err(CloAnalyticsError::InvalidInput {
                field: format!("annual_transition_matrix[{}]", i),
                reason: format!(
                    "row '{}' sums to {}",
                    Rating::ALL[i].symbol(),
                    row_sum
                ),
            });
        }
    }

    if (m[DEFAULT_INDEX][DEFAULT_INDEX] - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(CloAnalyticsError::InvalidInput {
            field: "annual_transition_matrix".into(),
            reason: format!(
                "default state is not absorbing (self-transition = {})",
                m[DEFAULT_INDEX][DEFAULT_INDEX]
            ),
        });
    }

    Ok(m)
}

// ---------------------------------------------------------------------------
// TransitionMatrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    period: PeriodType,
    marginal: Matrix,
    cumulative: Matrix,
}

impl TransitionMatrix {
    /// Matrix for `period` derived from the built-in annual calibration.
    pub fn for_period(period: PeriodType) -> Self {
        Self::from_annual_matrix(&annual_calibration(), period)
    }

    /// Matrix for `period` derived from a caller-supplied annual table.
    pub fn from_annual(annual: &[Vec<f64>], period: PeriodType) -> CloAnalyticsResult<Self> {
        let m = validate_annual(annual)?;
        Ok(Self::from_annual_matrix(&m, period))
    }

    fn from_annual_matrix(annual: &Matrix, period: PeriodType) -> Self {
        let marginal = rescale_to_period(annual, period.year_fraction());
        let cumulative = cumulate(&marginal);
        TransitionMatrix {
            period,
            marginal,
            cumulative,
        }
    }

    pub fn period(&self) -> PeriodType {
        self.period
    }

    /// Row-cumulative table, `M[i][j] = P(end state <= j | start i)`.
    pub fn cumulative(&self) -> &Matrix {
        &self.cumulative
    }

    pub fn row(&self, from: Rating) -> &[f64; NUM_RATINGS] {
        &self.cumulative[from.index()]
    }

    /// One-period probability of moving from `from` to `to`.
    pub fn probability(&self, from: Rating, to: Rating) -> f64 {
        self.marginal[from.index()][to.index()]
    }

    /// Probability of having defaulted within `periods` periods.
    pub fn cumulative_default_probability(&self, from: Rating, periods: u32) -> f64 {
        matrix_power(&self.marginal, periods)[from.index()][DEFAULT_INDEX]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_invariants(m: &TransitionMatrix) {
        for (i, row) in m.cumulative().iter().enumerate() {
            assert!(row.windows(2).all(|w| w[0] <= w[1]), "row {} not monotone", i);
            assert_eq!(row[DEFAULT_INDEX], 1.0, "row {} does not end at 1.0", i);
        }
        let d = &m.cumulative()[DEFAULT_INDEX];
        assert_eq!(d[DEFAULT_INDEX], 1.0);
        assert!(d[..DEFAULT_INDEX].iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_annual_calibration_rows_sum_to_one() {
        let m = annual_calibration();
        for (i, row) in m.iter().enumerate() {
            let s: f64 = row.iter().sum();
            assert!((s - 1.0).abs() < 1e-12, "row {} sums to {}", i, s);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_annual_calibration_default_monotone() {
        let m = annual_calibration();
        assert!(m[..DEFAULT_INDEX]
            .windows(2)
            .all(|w| w[0][DEFAULT_INDEX] <= w[1][DEFAULT_INDEX]));
    }

    #[test]
    fn test_quarterly_invariants() {
        assert_invariants(&TransitionMatrix::for_period(PeriodType::Quarterly));
    }

    #[test]
    fn test_annual_invariants() {
        assert_invariants(&TransitionMatrix::for_period(PeriodType::Annually));
    }

    #[test]
    fn test_quarterly_default_prob_is_quarter_of_annual() {
        let q = TransitionMatrix::for_period(PeriodType::Quarterly);
        let a = TransitionMatrix::for_period(PeriodType::Annually);
        let pq = q.probability(Rating::B, Rating::Default);
        let pa = a.probability(Rating::B, Rating::Default);
        assert!((pq - pa / 4.0).abs() < 1e-15);
        assert!(q.probability(Rating::B, Rating::B) > a.probability(Rating::B, Rating::B));
    }

    #[test]
    fn test_four_quarters_close_to_annual_default() {
        let q = TransitionMatrix::for_period(PeriodType::Quarterly);
        let a = TransitionMatrix::for_period(PeriodType::Annually);
        let four_q = q.cumulative_default_probability(Rating::Bbb, 4);
        let one_a = a.cumulative_default_probability(Rating::Bbb, 1);
        assert!((four_q - one_a).abs() < 0.002, "{} vs {}", four_q, one_a);
    }

    #[test]
    fn test_default_probability_grows_with_horizon() {
        let q = TransitionMatrix::for_period(PeriodType::Quarterly);
        let p4 = q.cumulative_default_probability(Rating::Bbb, 4);
        let p20 = q.cumulative_default_probability(Rating::Bbb, 20);
        assert!(p20 > p4);
        assert_eq!(q.cumulative_default_probability(Rating::Default, 7), 1.0);
    }

    #[test]
    fn test_from_annual_rejects_bad_shape() {
        let bad = vec![vec![1.0; 3]; 3];
        assert!(TransitionMatrix::from_annual(&bad, PeriodType::Quarterly).is_err());
    }

    #[test]
    fn test_from_annual_rejects_row_sum() {
        let mut rows: Vec<Vec<f64>> = annual_calibration().iter().map(|r| r.to_vec()).collect();
        rows[3][3] += 0.1;
        let err = TransitionMatrix::from_annual(&rows, PeriodType::Annually).unwrap_err();
        assert!(matches!(err, CloAnalyticsError::InvalidInput { .. }));
    }

    #[test]
    fn test_from_annual_rejects_non_absorbing_default() {
        let mut rows: Vec<Vec<f64>> = annual_calibration().iter().map(|r| r.to_vec()).collect();
        rows[DEFAULT_INDEX][DEFAULT_INDEX] = 0.5;
        rows[DEFAULT_INDEX][0] = 0.5;
        assert!(TransitionMatrix::from_annual(&rows, PeriodType::Annually).is_err());
    }

    #[test]
    fn test_from_annual_accepts_calibration() {
        let rows: Vec<Vec<f64>> = annual_calibration().iter().map(|r| r.to_vec()).collect();
        let m = TransitionMatrix::from_annual(&rows, PeriodType::SemiAnnually).unwrap();
        assert_eq!(m, TransitionMatrix::for_period(PeriodType::SemiAnnually));
    }

    proptest! {
        #[test]
        fn prop_random_annual_tables_keep_invariants(
            raw in proptest::collection::vec(
                proptest::collection::vec(0.0f64..1.0, NUM_RATINGS),
                NUM_RATINGS - 1,
            ),
            monthly in any::<bool>(),
        ) {
            let mut rows: Vec<Vec<f64>> = raw
                .into_iter()
                .map(|r| {
                    let s: f64 = r.iter().sum::<f64>().max(1e-9);
                    r.into_iter().map(|p| p / s).collect()
                })
                .collect();
            let mut absorbing = vec![0.0; NUM_RATINGS];
            absorbing[DEFAULT_INDEX] = 1.0;
            rows.push(absorbing);

            let period = if monthly { PeriodType::Monthly } else { PeriodType::Annually };
            if let Ok(m) = TransitionMatrix::from_annual(&rows, period) {
                for row in m.cumulative() {
                    prop_assert!(row.windows(2).all(|w| w[0] <= w[1]));
                    prop_assert_eq!(row[DEFAULT_INDEX], 1.0);
                }
            }
        }
    }
}
