use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Draws a candidate with probability `weight / sum(weights)`.
///
/// Candidates are taken in the order given; callers pass variants in name order so a
/// seeded sampler replays the same sequence.
pub struct WeightedSampler {
    rng: Mutex<StdRng>,
}

impl WeightedSampler {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// `None` when there are no candidates or every weight is zero.
    pub fn pick<'a>(&self, candidates: &[(&'a str, f64)]) -> Option<&'a str> {
        if candidates.is_empty() {
            return None;
        }
        let dist = WeightedIndex::new(candidates.iter().map(|(_, weight)| *weight)).ok()?;
        let idx = dist.sample(&mut *self.rng.lock());
        candidates.get(idx).map(|(name, _)| *name)
    }
}

impl Default for WeightedSampler {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chi_square(observed: &[u64], weights: &[f64]) -> f64 {
        let n: u64 = observed.iter().sum();
        let total: f64 = weights.iter().sum();
        observed
            .iter()
            .zip(weights)
            .map(|(obs, weight)| {
                let expected = n as f64 * weight / total;
                (*obs as f64 - expected).powi(2) / expected
            })
            .sum()
    }

    #[test]
    fn frequencies_fit_weights() {
        // Critical values at p = 0.001.
        let cases: [(&[f64], f64); 3] = [
            (&[1.0, 1.0], 10.83),
            (&[1.0, 2.0, 7.0], 13.82),
            (&[0.05, 0.15, 0.3, 0.5], 16.27),
        ];
        let names = ["a", "b", "c", "d"];
        for (seed, (weights, critical)) in cases.iter().enumerate() {
            let sampler = WeightedSampler::seeded(seed as u64 + 7);
            let candidates = names
                .iter()
                .zip(weights.iter())
                .map(|(name, weight)| (*name, *weight))
                .collect::<Vec<_>>();
            let mut counts = vec![0u64; weights.len()];
            for _ in 0..20_000 {
                let picked = sampler.pick(&candidates).unwrap();
                let idx = names.iter().position(|n| *n == picked).unwrap();
                counts[idx] += 1;
            }
            let stat = chi_square(&counts, weights);
            assert!(stat < *critical, "chi-square {stat} for weights {weights:?}");
        }
    }

    #[test]
    fn zero_weight_is_never_drawn() {
        let sampler = WeightedSampler::seeded(1);
        let candidates = [("a", 1.0), ("b", 0.0)];
        for _ in 0..1_000 {
            assert_eq!(sampler.pick(&candidates), Some("a"));
        }
    }

    #[test]
    fn all_zero_or_empty_yields_none() {
        let sampler = WeightedSampler::seeded(1);
        assert_eq!(sampler.pick(&[("a", 0.0), ("b", 0.0)]), None);
        assert_eq!(sampler.pick(&[]), None);
    }

    #[test]
    fn same_seed_replays_sequence() {
        let first = WeightedSampler::seeded(99);
        let second = WeightedSampler::seeded(99);
        let candidates = [("a", 1.0), ("b", 3.0), ("c", 2.0)];
        for _ in 0..100 {
            assert_eq!(first.pick(&candidates), second.pick(&candidates));
        }
    }
}
