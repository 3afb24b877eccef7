use std::time::Duration;

pub mod cluster;
pub mod ellipsoid;
pub mod error;
pub mod likelihood;
pub mod metric;
pub mod nest;
pub mod point;
pub mod prior;
pub mod reducer;
pub mod results;

pub use error::{GeometryError, SamplerError};

/// Outcome of a completed run; the sampler itself keeps the archive and
/// the full statistics.
#[derive(Debug)]
pub struct RunReport {
    pub iterations: usize,
    pub n_archived: usize,
    pub ln_evidence: f64,
    pub ln_evidence_error: f64,
    pub information_gain: f64,
    pub duration: Duration,
}

impl RunReport {
    pub fn print_summary(&self) {
        println!("Sampling time: {:.2}s", self.duration.as_secs_f64());
        println!(
            "ln evidence: {:.3} +/- {:.3}",
            self.ln_evidence, self.ln_evidence_error
        );
        println!("information gain: {:.3} nats", self.information_gain);
        println!(
            "{} iterations, {} archived points",
            self.iterations, self.n_archived
        );
    }
}

pub fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

pub fn variance(x: &[f64]) -> f64 {
    let m = mean(x);
    x.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / x.len() as f64
}
