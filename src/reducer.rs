use crate::error::SamplerError;

/// Snapshot of the sampler's running totals, rebuilt every iteration and
/// handed to the reducer read-only.
#[derive(Debug, Clone, Copy)]
pub struct SamplerStats {
    pub iteration: usize,
    pub n_live: usize,
    pub ln_evidence: f64,
    pub ln_evidence_error: f64,
    pub information_gain: f64,
    pub ln_remaining_prior_mass: f64,
    pub ln_max_likelihood: f64,
}

impl SamplerStats {
    /// Upper bound on the evidence still held by the live points.
    pub fn ln_live_evidence_remainder(&self) -> f64 {
        self.ln_max_likelihood + self.ln_remaining_prior_mass
    }

    /// Remainder relative to the evidence accumulated so far; infinite
    /// before any evidence has been collected.
    pub fn remainder_ratio(&self) -> f64 {
        (self.ln_live_evidence_remainder() - self.ln_evidence).exp()
    }
}

/// Termination and live-point-count policy, consulted once per iteration.
pub trait Reducer {
    fn should_terminate(&self, stats: &SamplerStats) -> bool;

    /// Live-point count for the next iteration; the sampler never shrinks
    /// below its configured floor regardless of what this returns.
    fn next_n_objects(&self, stats: &SamplerStats) -> usize {
        stats.n_live
    }
}

/// Standard stopping rule: terminate once the evidence still contained in
/// the live points falls below a tolerance times the accumulated evidence.
/// The population shrinks toward the floor as the remainder dies away.
pub struct FerozReducer {
    tolerance_on_evidence: f64,
    min_n_objects: usize,
}

impl FerozReducer {
    pub fn new(tolerance_on_evidence: f64, min_n_objects: usize) -> Result<Self, SamplerError> {
        if !(tolerance_on_evidence > 0.0) {
            return Err(SamplerError::InvalidConfig(
                "tolerance on evidence must be positive".into(),
            ));
        }
        if min_n_objects < 1 {
            return Err(SamplerError::InvalidConfig(
                "minimum number of live points must be at least 1".into(),
            ));
        }
        Ok(Self {
            tolerance_on_evidence,
            min_n_objects,
        })
    }
}

impl Reducer for FerozReducer {
    fn should_terminate(&self, stats: &SamplerStats) -> bool {
        stats.remainder_ratio() < self.tolerance_on_evidence
    }

    fn next_n_objects(&self, stats: &SamplerStats) -> usize {
        let ratio = stats.remainder_ratio().min(1.0);
        let span = stats.n_live.saturating_sub(self.min_n_objects) as f64;
        self.min_n_objects + (span * ratio).floor() as usize
    }
}

/// Schedule-driven alternative: terminate once the remaining prior mass
/// itself drops below `termination_factor`, independent of how the live
/// likelihoods behave; the population decays geometrically.
pub struct ExponentialReducer {
    ln_termination_factor: f64,
    reduction_rate: f64,
    min_n_objects: usize,
}

impl ExponentialReducer {
    pub fn new(
        termination_factor: f64,
        reduction_rate: f64,
        min_n_objects: usize,
    ) -> Result<Self, SamplerError> {
        if !(termination_factor > 0.0 && termination_factor < 1.0) {
            return Err(SamplerError::InvalidConfig(
                "termination factor must lie strictly between 0 and 1".into(),
            ));
        }
        if !(reduction_rate >= 0.0) {
            return Err(SamplerError::InvalidConfig(
                "reduction rate must be non-negative".into(),
            ));
        }
        if min_n_objects < 1 {
            return Err(SamplerError::InvalidConfig(
                "minimum number of live points must be at least 1".into(),
            ));
        }
        Ok(Self {
            ln_termination_factor: termination_factor.ln(),
            reduction_rate,
            min_n_objects,
        })
    }
}

impl Reducer for ExponentialReducer {
    fn should_terminate(&self, stats: &SamplerStats) -> bool {
        stats.ln_remaining_prior_mass < self.ln_termination_factor
    }

    fn next_n_objects(&self, stats: &SamplerStats) -> usize {
        let next = (stats.n_live as f64 * (-self.reduction_rate).exp()).floor() as usize;
        next.max(self.min_n_objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(ln_evidence: f64, ln_mass: f64, ln_max_likelihood: f64) -> SamplerStats {
        SamplerStats {
            iteration: 500,
            n_live: 400,
            ln_evidence,
            ln_evidence_error: 0.05,
            information_gain: 2.0,
            ln_remaining_prior_mass: ln_mass,
            ln_max_likelihood,
        }
    }

    #[test]
    fn feroz_flips_at_the_tolerance_boundary() {
        let reducer = FerozReducer::new(0.01, 100).unwrap();
        // Remainder: exp(-1.0 - 2.0) vs evidence exp(-2.5): ratio e^{-0.5} ~ 0.61.
        assert!(!reducer.should_terminate(&stats(-2.5, -2.0, -1.0)));
        // Remainder ratio e^{-7.5} ~ 5.5e-4 < 0.01.
        assert!(reducer.should_terminate(&stats(-2.5, -9.0, -1.0)));
    }

    #[test]
    fn feroz_never_terminates_before_any_evidence() {
        let reducer = FerozReducer::new(0.01, 100).unwrap();
        let early = stats(f64::NEG_INFINITY, 0.0, -3.0);
        assert!(!reducer.should_terminate(&early));
        // No shrinkage while the remainder dominates.
        assert_eq!(reducer.next_n_objects(&early), 400);
    }

    #[test]
    fn feroz_shrinks_toward_the_floor_as_the_remainder_dies() {
        let reducer = FerozReducer::new(0.01, 100).unwrap();
        let half = stats(0.0, (0.5f64).ln(), 0.0);
        assert_eq!(reducer.next_n_objects(&half), 250);
        let late = stats(0.0, -20.0, 0.0);
        assert_eq!(reducer.next_n_objects(&late), 100);
    }

    #[test]
    fn exponential_terminates_on_the_mass_schedule() {
        let reducer = ExponentialReducer::new(0.01, 0.0, 100).unwrap();
        assert!(!reducer.should_terminate(&stats(-2.5, -1.0, 5.0)));
        assert!(reducer.should_terminate(&stats(-2.5, -5.0, 5.0)));
        assert_eq!(reducer.next_n_objects(&stats(-2.5, -1.0, 5.0)), 400);
    }

    #[test]
    fn exponential_decays_the_population() {
        let reducer = ExponentialReducer::new(0.01, 0.01, 350).unwrap();
        let next = reducer.next_n_objects(&stats(-2.5, -1.0, 5.0));
        assert_eq!(next, 396); // floor(400 * e^{-0.01})
        assert_eq!(
            ExponentialReducer::new(0.01, 1.0, 350)
                .unwrap()
                .next_n_objects(&stats(-2.5, -1.0, 5.0)),
            350
        );
    }

    #[test]
    fn invalid_construction_is_rejected() {
        assert!(FerozReducer::new(0.0, 100).is_err());
        assert!(FerozReducer::new(-1.0, 100).is_err());
        assert!(FerozReducer::new(0.01, 0).is_err());
        assert!(ExponentialReducer::new(1.5, 0.0, 100).is_err());
        assert!(ExponentialReducer::new(0.01, -0.1, 100).is_err());
    }
}
