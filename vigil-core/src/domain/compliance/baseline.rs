// vigil-core/src/domain/compliance/baseline.rs

use serde::{Deserialize, Serialize};

use super::signal::SignalScope;

/// Rolling summary of a metric between runs (population variance).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BaselineKey {
    pub asset: String,
    pub scope: SignalScope,
}

impl BaselineKey {
    pub fn new(asset: &str, scope: SignalScope) -> Self {
        Self {
            asset: asset.to_string(),
            scope,
        }
    }
}

impl Baseline {
    pub fn from_samples(samples: &[f64]) -> Self {
        samples.iter().fold(Self::default(), |mut b, x| {
            b.observe(*x);
            b
        })
    }

    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Welford's online update: no need to replay history.
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.variance = 0.0;
            return;
        }
        let old_mean = self.mean;
        self.mean += (value - old_mean) / self.count as f64;
        // M2_new = M2_old + (x - old_mean) * (x - new_mean)
        let prev_m2 = self.variance * (self.count - 1) as f64;
        let new_m2 = prev_m2 + (value - old_mean) * (value - self.mean);
        self.variance = new_m2 / self.count as f64;
    }

    /// Chan et al. parallel combination of two summaries.
    pub fn merge(&self, other: &Baseline) -> Baseline {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * n_b / n;
        let m2 = self.variance * n_a + other.variance * n_b + delta * delta * n_a * n_b / n;
        Baseline {
            mean,
            variance: m2 / n,
            count: self.count + other.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 8] = [0.91, 0.97, 0.88, 1.0, 0.93, 0.95, 0.9, 0.99];

    fn batch_stats(samples: &[f64]) -> (f64, f64) {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let (mean, var) = batch_stats(&SAMPLES);
        let b = Baseline::from_samples(&SAMPLES);
        assert_eq!(b.count, SAMPLES.len() as u64);
        assert_close(b.mean, mean);
        assert_close(b.variance, var);
    }

    #[test]
    fn test_order_does_not_matter() {
        let (mean, var) = batch_stats(&SAMPLES);
        let mut reversed = SAMPLES;
        reversed.reverse();
        let mut rotated = SAMPLES;
        rotated.rotate_left(3);
        let mut interleaved: Vec<f64> = SAMPLES.iter().step_by(2).copied().collect();
        interleaved.extend(SAMPLES.iter().skip(1).step_by(2));

        for order in [reversed.to_vec(), rotated.to_vec(), interleaved] {
            let b = Baseline::from_samples(&order);
            assert_close(b.mean, mean);
            assert_close(b.variance, var);
        }
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let (left, right) = SAMPLES.split_at(3);
        let merged = Baseline::from_samples(left).merge(&Baseline::from_samples(right));
        let whole = Baseline::from_samples(&SAMPLES);
        assert_eq!(merged.count, whole.count);
        assert_close(merged.mean, whole.mean);
        assert_close(merged.variance, whole.variance);
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let b = Baseline::from_samples(&SAMPLES);
        assert_eq!(b.merge(&Baseline::default()), b);
        assert_eq!(Baseline::default().merge(&b), b);
    }
}
