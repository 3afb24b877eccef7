use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::error::SamplerError;

/// Block of the prior: maps unit-cube draws to parameter space and exposes
/// the log density. A run composes one or more blocks whose dimensions
/// concatenate in order.
pub trait Prior: Send + Sync {
    fn n_dimensions(&self) -> usize;

    fn transform(&self, unit: &[f64]) -> Vec<f64>;

    /// Negative infinity outside the support.
    fn ln_density(&self, parameters: &[f64]) -> f64;

    fn in_support(&self, parameters: &[f64]) -> bool {
        self.ln_density(parameters).is_finite()
    }
}

pub struct UniformPrior {
    minima: Vec<f64>,
    maxima: Vec<f64>,
    ln_density: f64,
}

impl UniformPrior {
    pub fn new(minima: Vec<f64>, maxima: Vec<f64>) -> Result<Self, SamplerError> {
        if minima.is_empty() || minima.len() != maxima.len() {
            return Err(SamplerError::InvalidConfig(
                "uniform prior bounds must be non-empty and of equal length".into(),
            ));
        }
        if minima
            .iter()
            .zip(maxima.iter())
            .any(|(lo, hi)| !(lo < hi) || !lo.is_finite() || !hi.is_finite())
        {
            return Err(SamplerError::InvalidConfig(
                "uniform prior requires finite minima strictly below maxima".into(),
            ));
        }
        let ln_density = -minima
            .iter()
            .zip(maxima.iter())
            .map(|(lo, hi)| (hi - lo).ln())
            .sum::<f64>();
        Ok(Self {
            minima,
            maxima,
            ln_density,
        })
    }
}

impl Prior for UniformPrior {
    fn n_dimensions(&self) -> usize {
        self.minima.len()
    }

    fn transform(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(self.minima.iter().zip(self.maxima.iter()))
            .map(|(u, (lo, hi))| lo + u * (hi - lo))
            .collect()
    }

    fn ln_density(&self, parameters: &[f64]) -> f64 {
        let inside = parameters
            .iter()
            .zip(self.minima.iter().zip(self.maxima.iter()))
            .all(|(x, (lo, hi))| lo <= x && x <= hi);
        if inside {
            self.ln_density
        } else {
            f64::NEG_INFINITY
        }
    }
}

pub struct NormalPrior {
    distributions: Vec<Normal>,
}

impl NormalPrior {
    pub fn new(means: Vec<f64>, stds: Vec<f64>) -> Result<Self, SamplerError> {
        if means.is_empty() || means.len() != stds.len() {
            return Err(SamplerError::InvalidConfig(
                "normal prior means and stds must be non-empty and of equal length".into(),
            ));
        }
        let distributions = means
            .iter()
            .zip(stds.iter())
            .map(|(&mean, &std)| {
                Normal::new(mean, std).map_err(|e| {
                    SamplerError::InvalidConfig(format!("normal prior parameters: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { distributions })
    }
}

impl Prior for NormalPrior {
    fn n_dimensions(&self) -> usize {
        self.distributions.len()
    }

    fn transform(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(self.distributions.iter())
            .map(|(&u, distribution)| distribution.inverse_cdf(u))
            .collect()
    }

    fn ln_density(&self, parameters: &[f64]) -> f64 {
        parameters
            .iter()
            .zip(self.distributions.iter())
            .map(|(&x, distribution)| distribution.ln_pdf(x))
            .sum()
    }
}

pub fn total_dimensions(priors: &[Box<dyn Prior + Send + Sync>]) -> usize {
    priors.iter().map(|prior| prior.n_dimensions()).sum()
}

pub fn transform_unit_cube(priors: &[Box<dyn Prior + Send + Sync>], unit: &[f64]) -> Vec<f64> {
    let mut parameters = Vec::with_capacity(unit.len());
    let mut offset = 0;
    for prior in priors {
        let block = &unit[offset..offset + prior.n_dimensions()];
        parameters.extend(prior.transform(block));
        offset += prior.n_dimensions();
    }
    parameters
}

pub fn ln_prior_density(priors: &[Box<dyn Prior + Send + Sync>], parameters: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut offset = 0;
    for prior in priors {
        let block = &parameters[offset..offset + prior.n_dimensions()];
        total += prior.ln_density(block);
        offset += prior.n_dimensions();
    }
    total
}
