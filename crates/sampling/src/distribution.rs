//! Parametric distributions used by the particle transition and likelihood
//! models. Each exposes `pdf`, `log_pdf` and `sample`.

use crate::{Rng, SamplingError};

const LOG_2PI: f64 = 1.837_877_066_409_345_5;

/// Continuous uniform distribution on `[a, b)`.
#[derive(Debug, Clone, Copy)]
pub struct Uniform {
    a: f64,
    b: f64,
}

impl Uniform {
    pub fn new(a: f64, b: f64) -> Result<Self, SamplingError> {
        if a >= b {
            return Err(SamplingError::EmptyInterval { a, b });
        }
        Ok(Self { a, b })
    }

    pub fn pdf(&self, x: f64) -> f64 {
        if x >= self.a && x <= self.b {
            1.0 / (self.b - self.a)
        } else {
            0.0
        }
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        if x >= self.a && x <= self.b {
            -(self.b - self.a).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    pub fn sample(&self, rng: &mut Rng) -> f64 {
        self.a + (self.b - self.a) * rng.uniform01()
    }
}

/// Normal distribution with mean `mu` and standard deviation `sigma`.
#[derive(Debug, Clone, Copy)]
pub struct Normal {
    mu: f64,
    sigma: f64,
}

impl Normal {
    pub fn new(mu: f64, sigma: f64) -> Result<Self, SamplingError> {
        if sigma <= 0.0 {
            return Err(SamplingError::NonPositiveParameter {
                name: "sigma",
                value: sigma,
            });
        }
        Ok(Self { mu, sigma })
    }

    pub fn pdf(&self, x: f64) -> f64 {
        self.log_pdf(x).exp()
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        -0.5 * LOG_2PI
            - self.sigma.ln()
            - (x - self.mu).powi(2) / (2.0 * self.sigma.powi(2))
    }

    pub fn sample(&self, rng: &mut Rng) -> f64 {
        self.mu + self.sigma * rng.standard_normal()
    }
}

/// Exponential distribution with rate `lambda`.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    lambda: f64,
}

impl Exponential {
    pub fn new(lambda: f64) -> Result<Self, SamplingError> {
        if lambda <= 0.0 {
            return Err(SamplingError::NonPositiveParameter {
                name: "lambda",
                value: lambda,
            });
        }
        Ok(Self { lambda })
    }

    pub fn pdf(&self, x: f64) -> f64 {
        if x >= 0.0 {
            self.lambda * (-self.lambda * x).exp()
        } else {
            0.0
        }
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        if x >= 0.0 {
            self.lambda.ln() - self.lambda * x
        } else {
            f64::NEG_INFINITY
        }
    }

    pub fn sample(&self, rng: &mut Rng) -> f64 {
        // Inverse transform; guard against ln(0).
        let mut u = rng.uniform01();
        while u <= f64::MIN_POSITIVE {
            u = rng.uniform01();
        }
        -u.ln() / self.lambda
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_rejects_empty_interval() {
        assert!(Uniform::new(1.0, 1.0).is_err());
        assert!(Uniform::new(2.0, 1.0).is_err());
    }

    #[test]
    fn uniform_density_and_support() {
        let d = Uniform::new(2.0, 6.0).unwrap();
        assert_eq!(d.pdf(4.0), 0.25);
        assert_eq!(d.pdf(1.0), 0.0);
        assert_eq!(d.log_pdf(7.0), f64::NEG_INFINITY);

        let mut rng = Rng::from_seed(3);
        for _ in 0..1_000 {
            let x = d.sample(&mut rng);
            assert!((2.0..6.0).contains(&x));
        }
    }

    #[test]
    fn normal_rejects_non_positive_sigma() {
        assert!(Normal::new(0.0, 0.0).is_err());
        assert!(Normal::new(0.0, -1.0).is_err());
    }

    #[test]
    fn normal_log_pdf_at_mean() {
        let d = Normal::new(5.0, 2.0).unwrap();
        let expected = -0.5 * LOG_2PI - 2.0_f64.ln();
        assert!((d.log_pdf(5.0) - expected).abs() < 1e-12);
        // symmetric around the mean
        assert!((d.log_pdf(4.0) - d.log_pdf(6.0)).abs() < 1e-12);
    }

    #[test]
    fn exponential_rejects_non_positive_rate() {
        assert!(Exponential::new(0.0).is_err());
        assert!(Exponential::new(-0.5).is_err());
    }

    #[test]
    fn exponential_mean_approximates_inverse_rate() {
        let d = Exponential::new(0.5).unwrap();
        let mut rng = Rng::from_seed(11);
        let n = 50_000;
        let mean = (0..n).map(|_| d.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.05);
        assert_eq!(d.log_pdf(-1.0), f64::NEG_INFINITY);
        assert!((d.log_pdf(0.0) - 0.5_f64.ln()).abs() < 1e-12);
    }
}
