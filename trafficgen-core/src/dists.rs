//! Bounded random variables
//!
//! Sizes, counts and delays of the traffic models come from heavy-tailed
//! distributions truncated to a finite range. Truncation is done by rejection:
//! draws outside the range are thrown away and the distribution is sampled again,
//! so the shape inside the range is preserved (a clamp would pile mass on the
//! bounds).
//!
//! Each variable owns its generator (see [`crate::randomness`]).

use rand::Rng;
use rand_distr::{Distribution, Exp, LogNormal, Pareto};

use crate::error::DistributionError;
use crate::randomness::SimRng;

/// Anything that yields a non-negative integer per draw.
///
/// Lets a model swap a sampled quantity for a fixed one without changing the
/// code that consumes it.
pub trait IntegerSampler: Send {
    fn sample_integer(&mut self) -> u64;
}

/// Always returns the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantInteger(pub u64);

impl IntegerSampler for ConstantInteger {
    fn sample_integer(&mut self) -> u64 {
        self.0
    }
}

fn check_bounds(low: f64, high: f64) -> Result<(), DistributionError> {
    if low > high {
        return Err(DistributionError::InvertedBounds { low, high });
    }
    Ok(())
}

fn rejection_sample<D: Distribution<f64>>(dist: &D, rng: &mut SimRng, low: u64, high: u64) -> u64 {
    if low == high {
        return low;
    }
    loop {
        let value = dist.sample(rng);
        // Truncation towards zero; values beyond u64 are rejected below.
        if value.is_finite() && value >= 0.0 && value < u64::MAX as f64 {
            let candidate = value as u64;
            if (low..=high).contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Log-normal variable parameterised by its arithmetic mean and standard deviation,
/// truncated to the integer range `[low, high]`.
#[derive(Debug, Clone)]
pub struct BoundedLogNormal {
    mean: f64,
    std_dev: f64,
    mu: f64,
    sigma: f64,
    low: u64,
    high: u64,
    dist: LogNormal<f64>,
    rng: SimRng,
}

impl BoundedLogNormal {
    pub fn new(
        mean: f64,
        std_dev: f64,
        low: u64,
        high: u64,
        rng: SimRng,
    ) -> Result<Self, DistributionError> {
        check_bounds(low as f64, high as f64)?;
        let (mu, sigma) = Self::log_space_parameters(mean, std_dev)?;
        let dist = LogNormal::new(mu, sigma).map_err(|_| DistributionError::InvalidParameter {
            name: "std_dev",
            value: std_dev,
        })?;
        Ok(Self {
            mean,
            std_dev,
            mu,
            sigma,
            low,
            high,
            dist,
            rng,
        })
    }

    /// Derive `(mu, sigma)` of the underlying normal from the desired moments.
    pub fn log_space_parameters(mean: f64, std_dev: f64) -> Result<(f64, f64), DistributionError> {
        if !(mean > 0.0) || !mean.is_finite() {
            return Err(DistributionError::InvalidParameter { name: "mean", value: mean });
        }
        if !(std_dev >= 0.0) || !std_dev.is_finite() {
            return Err(DistributionError::InvalidParameter {
                name: "std_dev",
                value: std_dev,
            });
        }
        let a = (1.0 + (std_dev * std_dev) / (mean * mean)).ln();
        Ok((mean.ln() - a / 2.0, a.sqrt()))
    }

    pub fn set_mean(&mut self, mean: f64) -> Result<(), DistributionError> {
        self.reparameterise(mean, self.std_dev)
    }

    pub fn set_std_dev(&mut self, std_dev: f64) -> Result<(), DistributionError> {
        self.reparameterise(self.mean, std_dev)
    }

    fn reparameterise(&mut self, mean: f64, std_dev: f64) -> Result<(), DistributionError> {
        let (mu, sigma) = Self::log_space_parameters(mean, std_dev)?;
        self.dist = LogNormal::new(mu, sigma).map_err(|_| DistributionError::InvalidParameter {
            name: "std_dev",
            value: std_dev,
        })?;
        self.mean = mean;
        self.std_dev = std_dev;
        self.mu = mu;
        self.sigma = sigma;
        Ok(())
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn bounds(&self) -> (u64, u64) {
        (self.low, self.high)
    }

    /// Draw until the value lands in `[low, high]`.
    pub fn sample_bounded_integer(&mut self) -> u64 {
        rejection_sample(&self.dist, &mut self.rng, self.low, self.high)
    }
}

impl IntegerSampler for BoundedLogNormal {
    fn sample_integer(&mut self) -> u64 {
        self.sample_bounded_integer()
    }
}

/// Pareto variable with minimum `scale`, truncated to `[scale, bound]`.
#[derive(Debug, Clone)]
pub struct BoundedPareto {
    shape: f64,
    scale: f64,
    bound: f64,
    low: u64,
    high: u64,
    dist: Pareto<f64>,
    rng: SimRng,
}

impl BoundedPareto {
    pub fn new(shape: f64, scale: f64, bound: f64, rng: SimRng) -> Result<Self, DistributionError> {
        if (shape - 1.0).abs() < f64::EPSILON {
            return Err(DistributionError::ParetoShapeOne { shape });
        }
        if !(shape > 0.0) || !shape.is_finite() {
            return Err(DistributionError::InvalidParameter { name: "shape", value: shape });
        }
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(DistributionError::InvalidParameter { name: "scale", value: scale });
        }
        check_bounds(scale, bound)?;
        let low = scale.ceil();
        let high = bound.floor();
        // No integer inside [scale, bound].
        check_bounds(low, high)?;
        let dist = Pareto::new(scale, shape)
            .map_err(|_| DistributionError::InvalidParameter { name: "shape", value: shape })?;
        Ok(Self {
            shape,
            scale,
            bound,
            low: low as u64,
            high: high as u64,
            dist,
            rng,
        })
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    /// Mean of the untruncated distribution, `shape * scale / (shape - 1)`.
    pub fn mean(&self) -> f64 {
        self.shape * self.scale / (self.shape - 1.0)
    }

    /// Draw until the value lands in `[scale, bound]`.
    pub fn sample_bounded_integer(&mut self) -> u64 {
        rejection_sample(&self.dist, &mut self.rng, self.low, self.high)
    }

    /// Bounded draw shifted down by the scale, so the result starts at zero.
    pub fn sample_bounded_normalized_integer(&mut self) -> u64 {
        self.sample_bounded_integer() - self.low
    }

    /// View that yields normalized draws through [`IntegerSampler`].
    pub fn normalized(self) -> NormalizedPareto {
        NormalizedPareto(self)
    }
}

impl IntegerSampler for BoundedPareto {
    fn sample_integer(&mut self) -> u64 {
        self.sample_bounded_integer()
    }
}

/// A [`BoundedPareto`] sampled with [`BoundedPareto::sample_bounded_normalized_integer`].
#[derive(Debug, Clone)]
pub struct NormalizedPareto(BoundedPareto);

impl NormalizedPareto {
    pub fn inner(&self) -> &BoundedPareto {
        &self.0
    }
}

impl IntegerSampler for NormalizedPareto {
    fn sample_integer(&mut self) -> u64 {
        self.0.sample_bounded_normalized_integer()
    }
}

/// Exponential variable given by its mean. A zero mean always yields zero.
#[derive(Debug, Clone)]
pub struct Exponential {
    mean: f64,
    dist: Option<Exp<f64>>,
    rng: SimRng,
}

impl Exponential {
    pub fn new(mean: f64, rng: SimRng) -> Result<Self, DistributionError> {
        if !(mean >= 0.0) || !mean.is_finite() {
            return Err(DistributionError::InvalidParameter { name: "mean", value: mean });
        }
        let dist = if mean == 0.0 {
            None
        } else {
            Some(
                Exp::new(1.0 / mean)
                    .map_err(|_| DistributionError::InvalidParameter { name: "mean", value: mean })?,
            )
        };
        Ok(Self { mean, dist, rng })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sample(&mut self) -> f64 {
        match &self.dist {
            Some(dist) => self.rng.sample(dist),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::randomness::stream_rng;

    #[test]
    fn test_lognormal_moment_recovery() {
        let (mu, sigma) = BoundedLogNormal::log_space_parameters(10710.0, 25032.0).unwrap();
        let recovered = (mu + sigma * sigma / 2.0).exp();
        assert!((recovered - 10710.0).abs() < 1e-6, "recovered mean {recovered}");
    }

    #[test]
    fn test_lognormal_reparameterise() {
        let mut var = BoundedLogNormal::new(10710.0, 25032.0, 100, 2_000_000, stream_rng(1, 0)).unwrap();
        var.set_mean(7758.0).unwrap();
        var.set_std_dev(126168.0).unwrap();
        let recovered = (var.mu() + var.sigma() * var.sigma() / 2.0).exp();
        assert!((recovered - 7758.0).abs() < 1e-6);
        assert!(var.set_mean(0.0).is_err());
        // failed update leaves the variable usable
        assert!((var.mean() - 7758.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lognormal_samples_stay_in_bounds() {
        let mut var = BoundedLogNormal::new(10710.0, 25032.0, 100, 2_000_000, stream_rng(1, 0)).unwrap();
        for _ in 0..10_000 {
            let x = var.sample_bounded_integer();
            assert!((100..=2_000_000).contains(&x), "sample {x} out of range");
        }
    }

    #[test]
    fn test_lognormal_narrow_range() {
        let mut var = BoundedLogNormal::new(10710.0, 25032.0, 5000, 5200, stream_rng(1, 1)).unwrap();
        for _ in 0..1_000 {
            let x = var.sample_bounded_integer();
            assert!((5000..=5200).contains(&x));
        }
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = BoundedLogNormal::new(100.0, 10.0, 200, 100, stream_rng(1, 0)).unwrap_err();
        assert_eq!(err, DistributionError::InvertedBounds { low: 200.0, high: 100.0 });

        let err = BoundedPareto::new(1.2, 300.0, 250.0, stream_rng(1, 0)).unwrap_err();
        assert!(matches!(err, DistributionError::InvertedBounds { .. }));
    }

    #[test]
    fn test_pareto_shape_one_rejected() {
        let err = BoundedPareto::new(1.0, 2.0, 55.0, stream_rng(1, 0)).unwrap_err();
        assert_eq!(err, DistributionError::ParetoShapeOne { shape: 1.0 });
    }

    #[test]
    fn test_pareto_mean() {
        let var = BoundedPareto::new(1.2, 40.0, 250.0, stream_rng(1, 0)).unwrap();
        assert!((var.mean() - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_pareto_samples_stay_in_bounds() {
        let mut var = BoundedPareto::new(1.2, 40.0, 250.0, stream_rng(3, 0)).unwrap();
        for _ in 0..10_000 {
            let x = var.sample_bounded_integer();
            assert!((40..=250).contains(&x), "sample {x} out of range");
        }
    }

    #[test]
    fn test_normalized_pareto_starts_at_zero() {
        let mut var = BoundedPareto::new(1.1, 2.0, 55.0, stream_rng(3, 1)).unwrap();
        let mut saw_zero = false;
        for _ in 0..10_000 {
            let x = var.sample_bounded_normalized_integer();
            assert!(x <= 53, "sample {x} out of range");
            saw_zero |= x == 0;
        }
        assert!(saw_zero);
    }

    #[test]
    fn test_degenerate_range_returns_the_single_value() {
        let mut pareto = BoundedPareto::new(1.2, 15_000.0, 15_000.0, stream_rng(1, 0)).unwrap();
        let mut lognormal = BoundedLogNormal::new(350.0, 0.0, 350, 350, stream_rng(1, 1)).unwrap();
        for _ in 0..10 {
            assert_eq!(pareto.sample_bounded_integer(), 15_000);
            assert_eq!(pareto.sample_bounded_normalized_integer(), 0);
            assert_eq!(lognormal.sample_bounded_integer(), 350);
        }
    }

    #[test]
    fn test_integer_sampler_objects() {
        let mut samplers: Vec<Box<dyn IntegerSampler>> = vec![
            Box::new(ConstantInteger(3)),
            Box::new(BoundedPareto::new(1.1, 2.0, 55.0, stream_rng(5, 0)).unwrap().normalized()),
        ];
        assert_eq!(samplers[0].sample_integer(), 3);
        assert!(samplers[1].sample_integer() <= 53);
    }

    #[test]
    fn test_same_stream_same_sequence() {
        let mut a = BoundedPareto::new(1.2, 40.0, 250.0, stream_rng(9, 2)).unwrap();
        let mut b = BoundedPareto::new(1.2, 40.0, 250.0, stream_rng(9, 2)).unwrap();
        for _ in 0..100 {
            assert_eq!(a.sample_bounded_integer(), b.sample_bounded_integer());
        }
    }

    #[test]
    fn test_draws_on_one_stream_do_not_perturb_another() {
        let mut reference = BoundedLogNormal::new(7758.0, 126168.0, 50, 2_000_000, stream_rng(9, 1)).unwrap();
        let expected: Vec<u64> = (0..50).map(|_| reference.sample_bounded_integer()).collect();

        let mut noisy = BoundedPareto::new(1.2, 40.0, 250.0, stream_rng(9, 0)).unwrap();
        let mut var = BoundedLogNormal::new(7758.0, 126168.0, 50, 2_000_000, stream_rng(9, 1)).unwrap();
        let mut actual = Vec::new();
        for _ in 0..50 {
            for _ in 0..7 {
                noisy.sample_bounded_integer();
            }
            actual.push(var.sample_bounded_integer());
        }
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_exponential() {
        let mut zero = Exponential::new(0.0, stream_rng(1, 0)).unwrap();
        assert_eq!(zero.sample(), 0.0);
        assert!(Exponential::new(-1.0, stream_rng(1, 0)).is_err());

        let mut exp = Exponential::new(30.0, stream_rng(1, 1)).unwrap();
        let n = 20_000;
        let avg: f64 = (0..n).map(|_| exp.sample()).sum::<f64>() / n as f64;
        assert!((avg - 30.0).abs() < 1.5, "average {avg}");
    }
}
