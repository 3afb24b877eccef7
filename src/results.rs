use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use crate::nest::MultiEllipsoidSampler;

/// Per-parameter summary of the marginalized posterior. Credible limits are
/// the bounds of the shortest interval holding the requested probability.
#[derive(Debug, Clone, Copy)]
pub struct ParameterEstimate {
    pub mean: f64,
    pub median: f64,
    pub mode: f64,
    pub lower_credible_limit: f64,
    pub upper_credible_limit: f64,
}

/// Read-only consumer of a finished sampler; turns the archive into
/// normalized probabilities, per-parameter estimates and plain-text files.
pub struct Results<'a> {
    sampler: &'a MultiEllipsoidSampler,
}

impl<'a> Results<'a> {
    pub fn new(sampler: &'a MultiEllipsoidSampler) -> Self {
        Self { sampler }
    }

    /// Real probabilities (not densities), normalized by the evidence.
    pub fn posterior_probability(&self) -> Vec<f64> {
        let ln_evidence = self.sampler.ln_evidence();
        self.sampler
            .archive()
            .ln_weights()
            .iter()
            .map(|w| (w - ln_evidence).exp())
            .collect()
    }

    /// Expectation, median, mode and shortest credible interval per free
    /// parameter. `credible_level` is a percentage, e.g. 68.27.
    pub fn parameter_estimation(&self, credible_level: f64) -> Vec<ParameterEstimate> {
        let probabilities = self.posterior_probability();
        self.sampler
            .posterior_sample()
            .iter()
            .map(|component| estimate_parameter(component, &probabilities, credible_level))
            .collect()
    }

    /// One single-column file per parameter, `<prefix>_000.txt` onward.
    pub fn write_parameters_to_file(&self, path_prefix: &str) -> io::Result<()> {
        for (dim, component) in self.sampler.posterior_sample().iter().enumerate() {
            let mut contents = String::from("# Posterior sample from nested sampling\n");
            for value in component {
                let _ = writeln!(contents, "{value:.9e}");
            }
            fs::write(format!("{path_prefix}_{dim:03}.txt"), contents)?;
        }
        Ok(())
    }

    pub fn write_log_likelihood_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut contents = String::from(
            "# Posterior sample from nested sampling\n# log(Likelihood)\n",
        );
        for value in self.sampler.archive().ln_likelihoods() {
            let _ = writeln!(contents, "{value:.9e}");
        }
        fs::write(path, contents)
    }

    pub fn write_evidence_information_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut contents = String::from(
            "# Evidence results from nested sampling\n\
             # log(Evidence)    Error of log(Evidence)    Information Gain\n",
        );
        let _ = writeln!(
            contents,
            "{:.9e}    {:.9e}    {:.9e}",
            self.sampler.ln_evidence(),
            self.sampler.ln_evidence_error(),
            self.sampler.information_gain()
        );
        fs::write(path, contents)
    }

    pub fn write_posterior_probability_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut contents =
            String::from("# Posterior probability distribution from nested sampling\n");
        for value in self.posterior_probability() {
            let _ = writeln!(contents, "{value:.9e}");
        }
        fs::write(path, contents)
    }

    pub fn write_parameters_summary_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        credible_level: f64,
    ) -> io::Result<()> {
        let mut contents = String::from("# Summary of parameter estimation from nested sampling\n");
        let _ = writeln!(
            contents,
            "# Credible level: {credible_level:.2} %\n\
             # Column #1: Expectation\n\
             # Column #2: Median\n\
             # Column #3: Mode\n\
             # Column #4: Lower credible limit\n\
             # Column #5: Upper credible limit"
        );
        for estimate in self.parameter_estimation(credible_level) {
            let _ = writeln!(
                contents,
                "{:.9e}    {:.9e}    {:.9e}    {:.9e}    {:.9e}",
                estimate.mean,
                estimate.median,
                estimate.mode,
                estimate.lower_credible_limit,
                estimate.upper_credible_limit
            );
        }
        fs::write(path, contents)
    }
}

/// Weighted marginal over one parameter: stable sort by value, then a
/// run-length merge of duplicate values into fresh arrays.
fn merged_marginal(values: &[f64], probabilities: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut merged_values = Vec::with_capacity(values.len());
    let mut merged_probabilities = Vec::with_capacity(values.len());
    for &idx in &order {
        match merged_values.last() {
            Some(&last) if last == values[idx] => {
                let tail = merged_probabilities.len() - 1;
                merged_probabilities[tail] += probabilities[idx];
            }
            _ => {
                merged_values.push(values[idx]);
                merged_probabilities.push(probabilities[idx]);
            }
        }
    }
    (merged_values, merged_probabilities)
}

fn estimate_parameter(
    component: &[f64],
    probabilities: &[f64],
    credible_level: f64,
) -> ParameterEstimate {
    let (values, marginal) = merged_marginal(component, probabilities);
    let total: f64 = marginal.iter().sum();

    let mean = values
        .iter()
        .zip(marginal.iter())
        .map(|(v, p)| v * p)
        .sum::<f64>()
        / total;

    let mut cumulative = 0.0;
    let mut median = values[0];
    for (value, probability) in values.iter().zip(marginal.iter()) {
        median = *value;
        cumulative += probability;
        if cumulative >= 0.5 * total {
            break;
        }
    }

    let mode_idx = marginal
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let mode = values[mode_idx];

    let (lower_credible_limit, upper_credible_limit) =
        shortest_credible_interval(&values, &marginal, credible_level / 100.0 * total);

    ParameterEstimate {
        mean,
        median,
        mode,
        lower_credible_limit,
        upper_credible_limit,
    }
}

/// Shortest window over the sorted marginal whose probability reaches the
/// target mass.
fn shortest_credible_interval(values: &[f64], marginal: &[f64], target: f64) -> (f64, f64) {
    let n = values.len();
    let mut best = (values[0], values[n - 1]);
    let mut best_width = f64::INFINITY;
    let mut window = 0.0;
    let mut right = 0;
    for left in 0..n {
        while right < n && window < target {
            window += marginal[right];
            right += 1;
        }
        if window >= target {
            let width = values[right - 1] - values[left];
            if width < best_width {
                best_width = width;
                best = (values[left], values[right - 1]);
            }
        } else {
            break;
        }
        window -= marginal[left];
    }
    best
}
