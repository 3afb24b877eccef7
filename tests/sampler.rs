use std::sync::Arc;

use approx::assert_relative_eq;

use ellipnest::cluster::KmeansClusterer;
use ellipnest::likelihood::{Gaussian, GaussianMixture};
use ellipnest::metric::EuclideanMetric;
use ellipnest::nest::{ContractionPolicy, MultiEllipsoidSampler, SamplerConfig, SamplerState};
use ellipnest::prior::{Prior, UniformPrior};
use ellipnest::reducer::FerozReducer;
use ellipnest::results::Results;

fn box_prior() -> Vec<Box<dyn Prior + Send + Sync>> {
    vec![Box::new(
        UniformPrior::new(vec![-5.0, -5.0], vec![5.0, 5.0]).unwrap(),
    )]
}

fn bimodal_likelihood() -> GaussianMixture {
    GaussianMixture::new(vec![
        Gaussian::new(vec![-2.5, 0.0], 0.4),
        Gaussian::new(vec![2.5, 0.0], 0.4),
    ])
}

fn kmeans(max_n_clusters: usize) -> Box<KmeansClusterer> {
    Box::new(
        KmeansClusterer::new(Box::new(EuclideanMetric), 1, max_n_clusters, 5, 0.4).unwrap(),
    )
}

// Both peaks are normalized and sit well inside the box, so the evidence
// is the inverse box volume.
const EXPECTED_LN_EVIDENCE: f64 = -4.605170185988091;

#[test]
fn bimodal_run_recovers_evidence_and_both_modes() {
    let config = SamplerConfig {
        n_dimensions: 2,
        initial_n_objects: 400,
        min_n_objects: 400,
        initial_enlargement_fraction: 2.5,
        shrinking_rate: 0.6,
        n_parallel_draws: 1,
        contraction: ContractionPolicy::Uniform,
        seed: 7,
    };
    let mut sampler = MultiEllipsoidSampler::new(
        box_prior(),
        Arc::new(bimodal_likelihood()),
        kmeans(3),
        config,
    )
    .unwrap();
    let reducer = FerozReducer::new(0.01, 400).unwrap();
    let report = sampler
        .run(&reducer, 200, 20, 50_000, 0.01)
        .expect("bimodal run completes");

    assert!(
        (report.ln_evidence - EXPECTED_LN_EVIDENCE).abs() < 0.5,
        "ln_evidence = {}, expected about {}",
        report.ln_evidence,
        EXPECTED_LN_EVIDENCE
    );
    assert_eq!(sampler.state(), SamplerState::Terminated);
    assert!(report.information_gain > 0.0);
    assert!(report.ln_evidence_error > 0.0 && report.ln_evidence_error < 1.0);

    // The widths partition the unit prior mass.
    let total_mass: f64 = sampler
        .archive()
        .ln_widths()
        .iter()
        .map(|w| w.exp())
        .sum();
    assert_relative_eq!(total_mass, 1.0, epsilon = 1e-6);

    // Normalized posterior weights sum to one.
    let total_weight: f64 = sampler
        .archive()
        .ln_weights()
        .iter()
        .map(|w| (w - report.ln_evidence).exp())
        .sum();
    assert_relative_eq!(total_weight, 1.0, epsilon = 1e-8);

    // Each mode must hold a substantial share of the posterior mass.
    let results = Results::new(&sampler);
    let probabilities = results.posterior_probability();
    let mass_near = |center: (f64, f64)| -> f64 {
        sampler
            .archive()
            .points()
            .iter()
            .zip(probabilities.iter())
            .filter(|(point, _)| {
                let dx = point.parameters[0] - center.0;
                let dy = point.parameters[1] - center.1;
                (dx.powi(2) + dy.powi(2)).sqrt() < 1.0
            })
            .map(|(_, probability)| probability)
            .sum()
    };
    let left_mass = mass_near((-2.5, 0.0));
    let right_mass = mass_near((2.5, 0.0));
    assert!(left_mass > 0.25, "left mode mass = {left_mass}");
    assert!(right_mass > 0.25, "right mode mass = {right_mass}");

    // The symmetric mixture has zero-mean marginals and a mode at a peak.
    let estimates = results.parameter_estimation(68.3);
    assert!(estimates[0].mean.abs() < 0.4, "mean = {}", estimates[0].mean);
    assert!(
        (estimates[0].mode.abs() - 2.5).abs() < 0.5,
        "mode = {}",
        estimates[0].mode
    );
    assert!(estimates[1].mean.abs() < 0.4);
}

#[test]
fn parallel_candidate_draws_reach_the_same_answer() {
    let config = SamplerConfig {
        n_dimensions: 2,
        initial_n_objects: 200,
        min_n_objects: 200,
        initial_enlargement_fraction: 2.5,
        shrinking_rate: 0.6,
        n_parallel_draws: 4,
        contraction: ContractionPolicy::Uniform,
        seed: 31,
    };
    let mut sampler = MultiEllipsoidSampler::new(
        box_prior(),
        Arc::new(bimodal_likelihood()),
        kmeans(2),
        config,
    )
    .unwrap();
    let reducer = FerozReducer::new(0.01, 200).unwrap();
    let report = sampler
        .run(&reducer, 150, 20, 50_000, 0.01)
        .expect("parallel run completes");
    assert!(
        (report.ln_evidence - EXPECTED_LN_EVIDENCE).abs() < 0.8,
        "ln_evidence = {}",
        report.ln_evidence
    );
}

#[test]
fn volume_share_contraction_stays_consistent() {
    let config = SamplerConfig {
        n_dimensions: 2,
        initial_n_objects: 200,
        min_n_objects: 200,
        initial_enlargement_fraction: 2.5,
        shrinking_rate: 0.6,
        n_parallel_draws: 1,
        contraction: ContractionPolicy::VolumeShare,
        seed: 13,
    };
    let mut sampler = MultiEllipsoidSampler::new(
        box_prior(),
        Arc::new(bimodal_likelihood()),
        kmeans(2),
        config,
    )
    .unwrap();
    let reducer = FerozReducer::new(0.01, 200).unwrap();
    let report = sampler
        .run(&reducer, 150, 20, 50_000, 0.01)
        .expect("volume-share run completes");
    // The apportioning convention changes the path, not the destination.
    assert!(
        (report.ln_evidence - EXPECTED_LN_EVIDENCE).abs() < 0.8,
        "ln_evidence = {}",
        report.ln_evidence
    );
    let total_weight: f64 = sampler
        .archive()
        .ln_weights()
        .iter()
        .map(|w| (w - report.ln_evidence).exp())
        .sum();
    assert_relative_eq!(total_weight, 1.0, epsilon = 1e-8);
}

#[test]
fn results_writers_produce_readable_files() {
    let config = SamplerConfig {
        n_dimensions: 2,
        initial_n_objects: 100,
        min_n_objects: 100,
        initial_enlargement_fraction: 2.0,
        shrinking_rate: 0.6,
        n_parallel_draws: 1,
        contraction: ContractionPolicy::Uniform,
        seed: 3,
    };
    let likelihood = Gaussian::new(vec![0.0, 0.0], 1.0);
    let mut sampler =
        MultiEllipsoidSampler::new(box_prior(), Arc::new(likelihood), kmeans(2), config).unwrap();
    let reducer = FerozReducer::new(0.05, 100).unwrap();
    sampler
        .run(&reducer, 10_000, 10, 50_000, 0.05)
        .expect("gaussian run completes");

    let dir = tempfile::tempdir().unwrap();
    let results = Results::new(&sampler);
    let prefix = dir.path().join("parameter");
    results
        .write_parameters_to_file(prefix.to_str().unwrap())
        .unwrap();
    let evidence_path = dir.path().join("evidence.txt");
    results
        .write_evidence_information_to_file(&evidence_path)
        .unwrap();
    let summary_path = dir.path().join("summary.txt");
    results
        .write_parameters_summary_to_file(&summary_path, 68.3)
        .unwrap();
    let likelihood_path = dir.path().join("likelihood.txt");
    results
        .write_log_likelihood_to_file(&likelihood_path)
        .unwrap();
    let probability_path = dir.path().join("posterior.txt");
    results
        .write_posterior_probability_to_file(&probability_path)
        .unwrap();

    for dim in 0..2 {
        let path = dir.path().join(format!("parameter_{dim:03}.txt"));
        assert!(path.exists());
    }
    let evidence = std::fs::read_to_string(&evidence_path).unwrap();
    let data_line = evidence
        .lines()
        .find(|line| !line.starts_with('#'))
        .expect("evidence file has a data line");
    let fields: Vec<f64> = data_line
        .split_whitespace()
        .map(|field| field.parse().unwrap())
        .collect();
    assert_eq!(fields.len(), 3);
    assert_relative_eq!(fields[0], sampler.ln_evidence(), epsilon = 1e-6);

    let summary = std::fs::read_to_string(&summary_path).unwrap();
    let data_lines = summary.lines().filter(|l| !l.starts_with('#')).count();
    assert_eq!(data_lines, 2);

    // The unimodal posterior is centered at the origin.
    let estimates = results.parameter_estimation(68.3);
    assert!(estimates[0].mean.abs() < 0.5);
    assert!(estimates[0].lower_credible_limit < estimates[0].upper_credible_limit);
}
