use crate::{Rng, SamplingError};

/// Discrete sampler over `N` items, with replacement.
///
/// In unweighted mode every item is equally likely; in weighted mode each
/// draw inverts the cumulative weight function.
#[derive(Debug, Clone)]
pub struct Resampler {
    n: usize,
    /// Cumulative weights; `None` in unweighted mode.
    cumulative: Option<Vec<f64>>,
}

impl Resampler {
    /// An unweighted sampler over `n` items.
    pub fn uniform(n: usize) -> Result<Self, SamplingError> {
        if n == 0 {
            return Err(SamplingError::EmptyPopulation);
        }
        Ok(Self {
            n,
            cumulative: None,
        })
    }

    /// A weighted sampler. Weights need not be normalised but must all be
    /// non-negative.
    pub fn weighted(weights: &[f64]) -> Result<Self, SamplingError> {
        if weights.is_empty() {
            return Err(SamplingError::EmptyPopulation);
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for (index, &weight) in weights.iter().enumerate() {
            if weight < 0.0 {
                return Err(SamplingError::NegativeWeight { index, weight });
            }
            total += weight;
            cumulative.push(total);
        }
        Ok(Self {
            n: weights.len(),
            cumulative: Some(cumulative),
        })
    }

    /// Draw `k` item indices, with replacement.
    pub fn draw(&self, k: usize, rng: &mut Rng) -> Vec<usize> {
        let mut indices = Vec::with_capacity(k);
        match &self.cumulative {
            None => {
                for _ in 0..k {
                    let index = (rng.uniform01() * self.n as f64) as usize;
                    // uniform01 < 1 keeps this in range; clamp anyway
                    indices.push(index.min(self.n - 1));
                }
            }
            Some(cumulative) => {
                let total = *cumulative.last().expect("non-empty by construction");
                for _ in 0..k {
                    let target = rng.uniform01() * total;
                    // smallest j with W_j >= target
                    let j = cumulative.partition_point(|&w| w < target);
                    indices.push(j.min(self.n - 1));
                }
            }
        }
        indices
    }

    /// Draw one index per item in the population.
    pub fn draw_population(&self, rng: &mut Rng) -> Vec<usize> {
        self.draw(self.n, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unweighted_draw_is_deterministic_under_seed() {
        let sampler = Resampler::uniform(5).unwrap();
        let mut rng = Rng::from_seed(10);
        let first = sampler.draw(5, &mut rng);

        rng.set_seed(10);
        let second = sampler.draw(5, &mut rng);
        assert_eq!(first, second);
        assert!(first.iter().all(|&i| i < 5));
    }

    #[test]
    fn weighted_rejects_negative_weight() {
        let err = Resampler::weighted(&[0.5, -0.1, 0.6]).unwrap_err();
        assert_eq!(
            err,
            SamplingError::NegativeWeight {
                index: 1,
                weight: -0.1
            }
        );
    }

    #[test]
    fn degenerate_weights_collapse_to_one_index() {
        let sampler = Resampler::weighted(&[1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let mut rng = Rng::from_seed(4);
        assert!(sampler.draw(100, &mut rng).iter().all(|&i| i == 0));
    }

    #[test]
    fn weighted_frequencies_converge() {
        let weights = [1.0, 2.0, 3.0, 4.0];
        let total: f64 = weights.iter().sum();
        let sampler = Resampler::weighted(&weights).unwrap();
        let mut rng = Rng::from_seed(99);

        let draws = 1_000_000;
        let mut counts = [0u64; 4];
        for index in sampler.draw(draws, &mut rng) {
            counts[index] += 1;
        }
        for (i, &count) in counts.iter().enumerate() {
            let p = weights[i] / total;
            let expected = draws as f64 * p;
            // three sigma of the multinomial count
            let sigma = (draws as f64 * p * (1.0 - p)).sqrt();
            assert!(
                (count as f64 - expected).abs() < 3.0 * sigma,
                "index {}: {} vs {}",
                i,
                count,
                expected
            );
        }
    }

    #[test]
    fn draws_exactly_k_indices() {
        let sampler = Resampler::weighted(&[0.2, 0.8]).unwrap();
        let mut rng = Rng::from_seed(1);
        assert_eq!(sampler.draw(17, &mut rng).len(), 17);
        assert_eq!(sampler.draw_population(&mut rng).len(), 2);
    }
}
