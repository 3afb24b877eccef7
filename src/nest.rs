use std::sync::Arc;
use std::time::Instant;

use lnexp::LnExp;
use logsumexp::LogAddExp;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::cluster::{ClusterAssignment, Clusterer};
use crate::ellipsoid::{Ellipsoid, EllipsoidSet};
use crate::error::SamplerError;
use crate::likelihood::Likelihood;
use crate::point::{ArchivedPoint, LivePoint, LivePointPopulation, PosteriorArchive};
use crate::prior::{ln_prior_density, total_dimensions, transform_unit_cube, Prior};
use crate::reducer::{Reducer, SamplerStats};
use crate::RunReport;

fn logsubexp(a: f64, b: f64) -> f64 {
    a + (b - a).ln_1m_exp()
}

fn finite_or_rejected(ln_likelihood: f64) -> f64 {
    if ln_likelihood.is_finite() {
        ln_likelihood
    } else {
        f64::NEG_INFINITY
    }
}

/// How the prior-mass decrement is apportioned when several ellipsoids are
/// alive at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractionPolicy {
    /// Global geometric decrement `X -> X * exp(-1 / n_live)` regardless of
    /// the decomposition. The documented default convention.
    Uniform,
    /// Decrement scaled by the removed point's ellipsoid volume share over
    /// that ellipsoid's member count; identical to `Uniform` while a single
    /// ellipsoid is alive.
    VolumeShare,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub n_dimensions: usize,
    pub initial_n_objects: usize,
    pub min_n_objects: usize,
    /// Fraction by which each ellipsoid axis is enlarged at full prior
    /// mass; decays as `X^shrinking_rate` over the run.
    pub initial_enlargement_fraction: f64,
    pub shrinking_rate: f64,
    /// Candidate draws evaluated per batch; 1 keeps the draw loop serial.
    pub n_parallel_draws: usize,
    pub contraction: ContractionPolicy,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_dimensions: 2,
            initial_n_objects: 400,
            min_n_objects: 400,
            initial_enlargement_fraction: 2.5,
            shrinking_rate: 0.6,
            n_parallel_draws: 1,
            contraction: ContractionPolicy::Uniform,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    fn validate(&self) -> Result<(), SamplerError> {
        if self.n_dimensions < 1 {
            return Err(SamplerError::InvalidConfig(
                "at least one free parameter is required".into(),
            ));
        }
        if self.min_n_objects < 1 || self.initial_n_objects < self.min_n_objects {
            return Err(SamplerError::InvalidConfig(
                "live-point counts must satisfy 1 <= min <= initial".into(),
            ));
        }
        if !(self.initial_enlargement_fraction >= 0.0)
            || !self.initial_enlargement_fraction.is_finite()
        {
            return Err(SamplerError::InvalidConfig(
                "enlargement fraction must be finite and non-negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.shrinking_rate) {
            return Err(SamplerError::InvalidConfig(
                "shrinking rate must lie in [0, 1]".into(),
            ));
        }
        if self.n_parallel_draws < 1 {
            return Err(SamplerError::InvalidConfig(
                "at least one candidate draw per batch is required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Initializing,
    Sampling,
    Clustering,
    Reducing,
    Terminated,
}

pub struct MultiEllipsoidSampler {
    priors: Vec<Box<dyn Prior + Send + Sync>>,
    likelihood: Arc<dyn Likelihood + Send + Sync>,
    clusterer: Box<dyn Clusterer + Send + Sync>,
    config: SamplerConfig,
    population: LivePointPopulation,
    archive: PosteriorArchive,
    ellipsoids: Option<EllipsoidSet>,
    state: SamplerState,
    iteration: usize,
    ln_evidence: f64,
    ln_evidence_error: f64,
    information_gain: f64,
    ln_prior_mass: f64,
    rng: ChaCha8Rng,
}

impl MultiEllipsoidSampler {
    pub fn new(
        priors: Vec<Box<dyn Prior + Send + Sync>>,
        likelihood: Arc<dyn Likelihood + Send + Sync>,
        clusterer: Box<dyn Clusterer + Send + Sync>,
        config: SamplerConfig,
    ) -> Result<Self, SamplerError> {
        config.validate()?;
        if priors.is_empty() {
            return Err(SamplerError::InvalidConfig(
                "at least one prior block is required".into(),
            ));
        }
        if total_dimensions(&priors) != config.n_dimensions {
            return Err(SamplerError::InvalidConfig(format!(
                "prior blocks cover {} dimensions but the sampler is configured for {}",
                total_dimensions(&priors),
                config.n_dimensions
            )));
        }
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let min_n_objects = config.min_n_objects;
        Ok(Self {
            priors,
            likelihood,
            clusterer,
            config,
            population: LivePointPopulation::new(Vec::new(), min_n_objects),
            archive: PosteriorArchive::new(),
            ellipsoids: None,
            state: SamplerState::Initializing,
            iteration: 0,
            ln_evidence: f64::NEG_INFINITY,
            ln_evidence_error: f64::INFINITY,
            information_gain: 0.0,
            ln_prior_mass: 0.0,
            rng,
        })
    }

    /// Drives the nested-sampling loop to completion. A sampler runs once;
    /// statistics and the archive stay readable afterwards.
    pub fn run(
        &mut self,
        reducer: &dyn Reducer,
        n_initial_iterations_without_clustering: usize,
        n_iterations_with_same_clustering: usize,
        max_n_draw_attempts: usize,
        termination_factor: f64,
    ) -> Result<RunReport, SamplerError> {
        if self.state != SamplerState::Initializing {
            return Err(SamplerError::InvalidConfig(
                "a sampler can only be run once".into(),
            ));
        }
        if n_iterations_with_same_clustering < 1 {
            return Err(SamplerError::InvalidConfig(
                "clustering cadence must be at least 1 iteration".into(),
            ));
        }
        if max_n_draw_attempts < 1 {
            return Err(SamplerError::InvalidConfig(
                "at least one draw attempt per iteration is required".into(),
            ));
        }
        if !(termination_factor > 0.0) {
            return Err(SamplerError::InvalidConfig(
                "termination factor must be positive".into(),
            ));
        }

        let start = Instant::now();
        self.initialize();
        info!(
            n_live = self.population.len(),
            n_dimensions = self.config.n_dimensions,
            "live points initialized from the prior"
        );

        loop {
            self.iteration += 1;

            if self.iteration == 1
                || (self.iteration - 1) % n_iterations_with_same_clustering == 0
            {
                let with_clustering =
                    self.iteration > n_initial_iterations_without_clustering;
                self.refit_ellipsoids(with_clustering)?;
            }

            let (worst_idx, ln_worst) = self.population.worst();
            let worst_parameters = self.population.points()[worst_idx].parameters.clone();

            let ln_mass_next = self.ln_prior_mass + self.ln_mass_decrement(&worst_parameters);
            let ln_width = logsubexp(self.ln_prior_mass, ln_mass_next);
            self.archive.push(ArchivedPoint {
                parameters: worst_parameters,
                ln_likelihood: ln_worst,
                ln_width,
            });
            let n_live = self.population.len();
            self.update_statistics(ln_width, ln_worst, n_live);
            self.ln_prior_mass = ln_mass_next;

            let stats = self.statistics();
            self.state = SamplerState::Reducing;
            if reducer.should_terminate(&stats) || stats.remainder_ratio() < termination_factor {
                self.population.remove(worst_idx);
                break;
            }

            self.state = SamplerState::Sampling;
            let replacement = self.draw_replacement(ln_worst, max_n_draw_attempts)?;
            self.population.replace(worst_idx, replacement);

            let next_n_objects = reducer.next_n_objects(&stats).max(self.config.min_n_objects);
            while self.population.len() > next_n_objects && self.population.can_shrink() {
                let (idx, _) = self.population.worst();
                let removed = self.population.remove(idx);
                let n_live = self.population.len();
                self.update_statistics(ln_width, removed.ln_likelihood, n_live);
                self.archive.push(ArchivedPoint {
                    parameters: removed.parameters,
                    ln_likelihood: removed.ln_likelihood,
                    ln_width,
                });
            }

            if self.iteration % 100 == 0 {
                info!(
                    iteration = self.iteration,
                    ln_evidence = self.ln_evidence,
                    threshold = ln_worst,
                    ln_max_likelihood = stats.ln_max_likelihood,
                    remainder_ratio = stats.remainder_ratio(),
                    n_live = self.population.len(),
                    n_ellipsoids = self.ellipsoids.as_ref().map_or(0, EllipsoidSet::len),
                    "nested sampling progress"
                );
            }
        }

        self.finalize();
        info!(
            iteration = self.iteration,
            ln_evidence = self.ln_evidence,
            ln_evidence_error = self.ln_evidence_error,
            information_gain = self.information_gain,
            n_archived = self.archive.len(),
            "nested sampling terminated"
        );
        Ok(RunReport {
            iterations: self.iteration,
            n_archived: self.archive.len(),
            ln_evidence: self.ln_evidence,
            ln_evidence_error: self.ln_evidence_error,
            information_gain: self.information_gain,
            duration: start.elapsed(),
        })
    }

    fn initialize(&mut self) {
        let n_dimensions = self.config.n_dimensions;
        let mut points = Vec::with_capacity(self.config.initial_n_objects);
        for _ in 0..self.config.initial_n_objects {
            let unit: Vec<f64> = (0..n_dimensions).map(|_| self.rng.gen::<f64>()).collect();
            let parameters = transform_unit_cube(&self.priors, &unit);
            let ln_likelihood = finite_or_rejected(self.likelihood.ln_likelihood(&parameters));
            points.push(LivePoint::new(parameters, ln_likelihood));
        }
        self.population = LivePointPopulation::new(points, self.config.min_n_objects);
    }

    fn refit_ellipsoids(&mut self, with_clustering: bool) -> Result<(), SamplerError> {
        self.state = SamplerState::Clustering;
        let enlargement_fraction = self.config.initial_enlargement_fraction
            * (self.config.shrinking_rate * self.ln_prior_mass).exp();
        let vectors = self.population.parameter_vectors();
        let assignment = if with_clustering {
            self.clusterer.cluster(&vectors, &mut self.rng)
        } else {
            ClusterAssignment::single(vectors.len())
        };
        let mut ellipsoids = Vec::with_capacity(assignment.n_clusters);
        for group in assignment.groups() {
            if group.is_empty() {
                continue;
            }
            let members: Vec<Vec<f64>> =
                group.iter().map(|&idx| vectors[idx].clone()).collect();
            ellipsoids.push(Ellipsoid::fit_regularized(&members, enlargement_fraction)?);
        }
        debug!(
            iteration = self.iteration,
            n_ellipsoids = ellipsoids.len(),
            enlargement_fraction,
            "rebuilt ellipsoid decomposition"
        );
        self.ellipsoids = Some(EllipsoidSet::new(ellipsoids)?);
        Ok(())
    }

    fn ln_mass_decrement(&self, removed_point: &[f64]) -> f64 {
        let uniform = -1.0 / self.population.len() as f64;
        match self.config.contraction {
            ContractionPolicy::Uniform => uniform,
            ContractionPolicy::VolumeShare => match &self.ellipsoids {
                Some(set) => match set.first_containing(removed_point) {
                    Some(idx) => {
                        let share = set.volume_share(idx);
                        let members = set.ellipsoids()[idx].n_members().max(1);
                        -(share / members as f64)
                    }
                    None => uniform,
                },
                None => uniform,
            },
        }
    }

    fn update_statistics(&mut self, ln_width: f64, ln_likelihood: f64, n_live: usize) {
        let ln_term = ln_width + ln_likelihood;
        if ln_term > f64::NEG_INFINITY {
            let ln_evidence_next = self.ln_evidence.ln_add_exp(ln_term);
            // Skilling's running information estimator; the first finite
            // contribution has no previous-evidence term.
            self.information_gain = if self.ln_evidence == f64::NEG_INFINITY {
                (ln_term - ln_evidence_next).exp() * ln_likelihood - ln_evidence_next
            } else {
                (ln_term - ln_evidence_next).exp() * ln_likelihood
                    + (self.ln_evidence - ln_evidence_next).exp()
                        * (self.information_gain + self.ln_evidence)
                    - ln_evidence_next
            };
            self.ln_evidence = ln_evidence_next;
        }
        self.ln_evidence_error =
            (self.information_gain.max(0.0) / n_live.max(1) as f64).sqrt();
    }

    fn draw_replacement(
        &mut self,
        ln_worst: f64,
        max_n_draw_attempts: usize,
    ) -> Result<LivePoint, SamplerError> {
        let set = match self.ellipsoids.as_ref() {
            Some(set) => set,
            None => {
                return Err(SamplerError::InvalidConfig(
                    "no ellipsoid decomposition available for drawing".into(),
                ))
            }
        };
        let priors = &self.priors;
        let likelihood = &self.likelihood;

        if self.config.n_parallel_draws <= 1 {
            let rng = &mut self.rng;
            for _ in 0..max_n_draw_attempts {
                if let Some(point) =
                    Self::try_candidate(set, priors, likelihood.as_ref(), ln_worst, rng)
                {
                    return Ok(point);
                }
            }
        } else {
            let seed = self.config.seed;
            let iteration = self.iteration;
            let mut attempts = 0usize;
            while attempts < max_n_draw_attempts {
                let batch = self
                    .config
                    .n_parallel_draws
                    .min(max_n_draw_attempts - attempts);
                // First accepted candidate by index wins, independent of
                // which worker finishes first.
                let found = (0..batch)
                    .into_par_iter()
                    .map(|offset| {
                        let mut rng =
                            Self::candidate_rng(seed, iteration, (attempts + offset) as u64);
                        Self::try_candidate(set, priors, likelihood.as_ref(), ln_worst, &mut rng)
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .flatten()
                    .next();
                attempts += batch;
                if let Some(point) = found {
                    return Ok(point);
                }
            }
        }
        Err(SamplerError::DrawAttemptsExhausted {
            iteration: self.iteration,
            attempts: max_n_draw_attempts,
        })
    }

    fn try_candidate<R: Rng + ?Sized>(
        set: &EllipsoidSet,
        priors: &[Box<dyn Prior + Send + Sync>],
        likelihood: &dyn Likelihood,
        ln_worst: f64,
        rng: &mut R,
    ) -> Option<LivePoint> {
        let candidate = set.draw_union(rng)?;
        if !ln_prior_density(priors, &candidate).is_finite() {
            return None;
        }
        let ln_likelihood = finite_or_rejected(likelihood.ln_likelihood(&candidate));
        (ln_likelihood > ln_worst).then(|| LivePoint::new(candidate, ln_likelihood))
    }

    fn candidate_rng(seed: u64, iteration: usize, candidate: u64) -> ChaCha8Rng {
        let mixed = seed
            ^ (iteration as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ candidate.wrapping_mul(0xD1B5_4A32_D192_ED03);
        ChaCha8Rng::seed_from_u64(mixed)
    }

    fn finalize(&mut self) {
        self.state = SamplerState::Terminated;
        let n_live = self.population.len();
        if n_live > 0 {
            let ln_width = self.ln_prior_mass - (n_live as f64).ln();
            for point in self.population.drain() {
                let ln_likelihood = point.ln_likelihood;
                self.update_statistics(ln_width, ln_likelihood, n_live);
                self.archive.push(ArchivedPoint {
                    parameters: point.parameters,
                    ln_likelihood,
                    ln_width,
                });
            }
        }
    }

    pub fn statistics(&self) -> SamplerStats {
        SamplerStats {
            iteration: self.iteration,
            n_live: self.population.len(),
            ln_evidence: self.ln_evidence,
            ln_evidence_error: self.ln_evidence_error,
            information_gain: self.information_gain,
            ln_remaining_prior_mass: self.ln_prior_mass,
            ln_max_likelihood: self.population.ln_max_likelihood(),
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn n_dimensions(&self) -> usize {
        self.config.n_dimensions
    }

    pub fn ln_evidence(&self) -> f64 {
        self.ln_evidence
    }

    pub fn ln_evidence_error(&self) -> f64 {
        self.ln_evidence_error
    }

    pub fn information_gain(&self) -> f64 {
        self.information_gain
    }

    pub fn ln_remaining_prior_mass(&self) -> f64 {
        self.ln_prior_mass
    }

    pub fn archive(&self) -> &PosteriorArchive {
        &self.archive
    }

    /// Parameter matrix of the archive: rows are dimensions, columns follow
    /// archive order.
    pub fn posterior_sample(&self) -> Vec<Vec<f64>> {
        self.archive.parameter_matrix()
    }

    pub fn live_points(&self) -> &LivePointPopulation {
        &self.population
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::cluster::KmeansClusterer;
    use crate::likelihood::{Gaussian, Null};
    use crate::metric::EuclideanMetric;
    use crate::prior::UniformPrior;
    use crate::reducer::FerozReducer;

    fn box_prior() -> Vec<Box<dyn Prior + Send + Sync>> {
        vec![Box::new(
            UniformPrior::new(vec![-5.0, -5.0], vec![5.0, 5.0]).unwrap(),
        )]
    }

    fn kmeans() -> Box<dyn Clusterer + Send + Sync> {
        Box::new(KmeansClusterer::new(Box::new(EuclideanMetric), 1, 2, 5, 0.4).unwrap())
    }

    #[test]
    fn logsubexp_matches_direct_subtraction() {
        let result = logsubexp(0.0, -1.0);
        assert_relative_eq!(result.exp(), 1.0 - (-1.0f64).exp(), epsilon = 1e-12);
        assert_eq!(logsubexp(0.0, f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn config_validation_catches_bad_fields() {
        let bad = SamplerConfig {
            min_n_objects: 500,
            initial_n_objects: 400,
            ..SamplerConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = SamplerConfig {
            shrinking_rate: 1.5,
            ..SamplerConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = SamplerConfig {
            n_parallel_draws: 0,
            ..SamplerConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn prior_dimension_mismatch_is_rejected() {
        let config = SamplerConfig {
            n_dimensions: 3,
            ..SamplerConfig::default()
        };
        let result = MultiEllipsoidSampler::new(box_prior(), Arc::new(Null), kmeans(), config);
        assert!(matches!(result, Err(SamplerError::InvalidConfig(_))));
    }

    #[test]
    fn candidate_streams_are_disjoint() {
        let mut a = MultiEllipsoidSampler::candidate_rng(42, 7, 0);
        let mut b = MultiEllipsoidSampler::candidate_rng(42, 7, 1);
        let mut c = MultiEllipsoidSampler::candidate_rng(42, 8, 0);
        let draws_a: Vec<f64> = (0..4).map(|_| a.gen()).collect();
        let draws_b: Vec<f64> = (0..4).map(|_| b.gen()).collect();
        let draws_c: Vec<f64> = (0..4).map(|_| c.gen()).collect();
        assert_ne!(draws_a, draws_b);
        assert_ne!(draws_a, draws_c);
        // Same key reproduces the same stream.
        let mut a_again = MultiEllipsoidSampler::candidate_rng(42, 7, 0);
        let again: Vec<f64> = (0..4).map(|_| a_again.gen()).collect();
        assert_eq!(draws_a, again);
    }

    #[test]
    fn flat_likelihood_exhausts_the_draw_budget() {
        // Every candidate ties the threshold, so no draw is ever accepted.
        let config = SamplerConfig {
            initial_n_objects: 50,
            min_n_objects: 50,
            ..SamplerConfig::default()
        };
        let mut sampler =
            MultiEllipsoidSampler::new(box_prior(), Arc::new(Null), kmeans(), config).unwrap();
        let reducer = FerozReducer::new(0.01, 50).unwrap();
        let result = sampler.run(&reducer, 100, 10, 25, 0.01);
        match result {
            Err(SamplerError::DrawAttemptsExhausted {
                iteration,
                attempts,
            }) => {
                assert_eq!(iteration, 1);
                assert_eq!(attempts, 25);
            }
            other => panic!("expected exhausted draw budget, got {other:?}"),
        }
        // Partial results stay readable.
        assert_eq!(sampler.archive().len(), 1);
    }

    #[test]
    fn gaussian_run_recovers_the_analytic_evidence() {
        let config = SamplerConfig {
            initial_n_objects: 200,
            min_n_objects: 200,
            seed: 99,
            ..SamplerConfig::default()
        };
        let likelihood = Gaussian::new(vec![0.0, 0.0], 1.0);
        let mut sampler =
            MultiEllipsoidSampler::new(box_prior(), Arc::new(likelihood), kmeans(), config)
                .unwrap();
        let reducer = FerozReducer::new(0.01, 200).unwrap();
        let report = sampler
            .run(&reducer, 150, 20, 50_000, 0.01)
            .expect("run completes");
        // Z = integral of the normalized Gaussian over the box / box volume.
        let expected = -(100.0f64).ln();
        assert!(
            (report.ln_evidence - expected).abs() < 0.6,
            "ln_evidence = {}, expected about {}",
            report.ln_evidence,
            expected
        );
        assert!(report.ln_evidence_error > 0.0);
        assert_eq!(sampler.state(), SamplerState::Terminated);
        assert_eq!(report.n_archived, sampler.archive().len());

        // Widths describe a strictly shrinking prior mass.
        let widths = sampler.archive().ln_widths();
        assert!(widths.iter().all(|w| w.is_finite()));

        // Normalized posterior weights sum to one.
        let total: f64 = sampler
            .archive()
            .ln_weights()
            .iter()
            .map(|w| (w - report.ln_evidence).exp())
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-8);
    }
}
