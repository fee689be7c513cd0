use rand::Rng;
use statrs::distribution::{ContinuousCDF, Normal};

use super::correlation::{CholeskyFactor, CorrelationFactor, CorrelationMatrix};
use crate::error::CloAnalyticsError;
use crate::CloAnalyticsResult;

/// Gaussian copula over a correlation factor.
///
/// Holds no random state: the generator is passed to every draw, so one
/// sampler can serve many independently seeded paths.
pub struct CorrelatedSampler<F: CorrelationFactor = CholeskyFactor> {
    factor: F,
    normal: Normal,
}

impl CorrelatedSampler<CholeskyFactor> {
    pub fn new(matrix: &CorrelationMatrix) -> CloAnalyticsResult<Self> {
        Self::with_factor(CholeskyFactor::factorize(matrix)?)
    }
}

impl<F: CorrelationFactor> CorrelatedSampler<F> {
    pub fn with_factor(factor: F) -> CloAnalyticsResult<Self> {
        let normal = Normal::new(0.0, 1.0).map_err(|e| CloAnalyticsError::InvalidInput {
            field: "normal".into(),
            reason: format!("Invalid Normal parameters: {e}"),
        })?;
        Ok(CorrelatedSampler { factor, normal })
    }

    pub fn num_assets(&self) -> usize {
        self.factor.dim()
    }

    pub fn factor(&self) -> &F {
        &self.factor
    }

    /// One correlated uniform per asset of the underlying matrix.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let n = self.factor.dim();
        let independent: Vec<f64> = (0..n).map(|_| rng.sample(self.normal)).collect();
        let mut correlated = vec![0.0; n];
        self.factor.correlate(&independent, &mut correlated);
        correlated
            .into_iter()
            .map(|x| self.normal.cdf(x).clamp(0.0, 1.0))
            .collect()
    }

    /// Correlated uniforms for the assets at `indices` only, in that order.
    ///
    /// The joint law of the returned values is the copula of the
    /// corresponding sub-matrix.
    pub fn draw_subset<R: Rng + ?Sized>(&self, rng: &mut R, indices: &[usize]) -> Vec<f64> {
        if indices.is_empty() {
            return Vec::new();
        }
        let full = self.draw(rng);
        indices.iter().map(|&i| full[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_correlation(sampler: &CorrelatedSampler, rng: &mut StdRng, n: usize) -> f64 {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        for _ in 0..n {
            let u = sampler.draw(rng);
            xs.push(normal.inverse_cdf(u[0].clamp(1e-12, 1.0 - 1e-12)));
            ys.push(normal.inverse_cdf(u[1].clamp(1e-12, 1.0 - 1e-12)));
        }
        let mx = xs.iter().sum::<f64>() / n as f64;
        let my = ys.iter().sum::<f64>() / n as f64;
        let cov: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
        let vx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
        let vy: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
        cov / (vx.sqrt() * vy.sqrt())
    }

    #[test]
    fn test_draw_length_and_range() {
        let m = CorrelationMatrix::default_matrix(25, 0.2).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let u = sampler.draw(&mut rng);
            assert_eq!(u.len(), 25);
            assert!(u.iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }

    #[test]
    fn test_consecutive_draws_differ() {
        let m = CorrelationMatrix::default_matrix(3, 0.2).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        assert_ne!(sampler.draw(&mut rng), sampler.draw(&mut rng));
    }

    #[test]
    fn test_same_seed_same_draws() {
        let m = CorrelationMatrix::default_matrix(4, 0.3).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        let a = sampler.draw(&mut StdRng::seed_from_u64(99));
        let b = sampler.draw(&mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn test_induces_target_correlation() {
        let m = CorrelationMatrix::default_matrix(2, 0.6).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);
        let rho = sample_correlation(&sampler, &mut rng, 20_000);
        assert!((rho - 0.6).abs() < 0.05, "sample correlation {}", rho);
    }

    #[test]
    fn test_zero_correlation_is_roughly_independent() {
        let m = CorrelationMatrix::default_matrix(2, 0.0).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let rho = sample_correlation(&sampler, &mut rng, 20_000);
        assert!(rho.abs() < 0.05, "sample correlation {}", rho);
    }

    #[test]
    fn test_draw_subset_picks_indices() {
        let m = CorrelationMatrix::default_matrix(6, 0.2).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        let full = sampler.draw(&mut StdRng::seed_from_u64(3));
        let subset = sampler.draw_subset(&mut StdRng::seed_from_u64(3), &[4, 1]);
        assert_eq!(subset, vec![full[4], full[1]]);
        assert!(sampler
            .draw_subset(&mut StdRng::seed_from_u64(3), &[])
            .is_empty());
    }

    #[test]
    fn test_empty_sampler() {
        let m = CorrelationMatrix::default_matrix(0, 0.2).unwrap();
        let sampler = CorrelatedSampler::new(&m).unwrap();
        assert!(sampler.draw(&mut StdRng::seed_from_u64(1)).is_empty());
    }

    proptest! {
        #[test]
        fn prop_uniforms_in_unit_interval(seed in any::<u64>(), n in 1usize..30, rho in 0.0f64..1.0) {
            let m = CorrelationMatrix::default_matrix(n, rho).unwrap();
            let sampler = CorrelatedSampler::new(&m).unwrap();
            let u = sampler.draw(&mut StdRng::seed_from_u64(seed));
            prop_assert_eq!(u.len(), n);
            prop_assert!(u.iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }
}
