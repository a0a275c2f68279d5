use rand::{rngs::StdRng, Rng as _, SeedableRng};

/// Pseudo-random number source for one vehicle's filter.
///
/// One instance lives per vehicle actor so updates never contend on a shared
/// generator and a replay with the same seed reproduces the same trajectory.
#[derive(Debug, Clone)]
pub struct Rng {
    inner: StdRng,
    /// Box-Muller produces normals in pairs; the spare is kept for the next call.
    spare_normal: Option<f64>,
}

impl Rng {
    /// A generator seeded from operating system entropy.
    pub fn new() -> Self {
        Self {
            inner: StdRng::from_entropy(),
            spare_normal: None,
        }
    }

    /// A deterministic generator.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            spare_normal: None,
        }
    }

    /// Reseed in place, discarding any cached state.
    pub fn set_seed(&mut self, seed: u64) {
        self.inner = StdRng::seed_from_u64(seed);
        self.spare_normal = None;
    }

    /// A uniform draw from [0, 1).
    pub fn uniform01(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// A standard normal draw, via the Box-Muller transform.
    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.spare_normal.take() {
            return z;
        }
        // u1 must be strictly positive for the log.
        let mut u1 = self.uniform01();
        while u1 <= f64::MIN_POSITIVE {
            u1 = self.uniform01();
        }
        let u2 = self.uniform01();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        self.spare_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform01_stays_in_unit_interval() {
        let mut rng = Rng::from_seed(1);
        for _ in 0..10_000 {
            let u = rng.uniform01();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = Rng::from_seed(10);
        let mut b = Rng::from_seed(10);
        for _ in 0..100 {
            assert_eq!(a.uniform01(), b.uniform01());
            assert_eq!(a.standard_normal(), b.standard_normal());
        }
    }

    #[test]
    fn standard_normal_moments() {
        let mut rng = Rng::from_seed(7);
        let n = 100_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.standard_normal()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.02);
        assert!((var - 1.0).abs() < 0.03);
    }
}
