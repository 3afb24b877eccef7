use std::sync::Arc;

use ellipnest::cluster::KmeansClusterer;
use ellipnest::likelihood::Himmelblau;
use ellipnest::metric::EuclideanMetric;
use ellipnest::nest::{ContractionPolicy, MultiEllipsoidSampler, SamplerConfig};
use ellipnest::prior::{Prior, UniformPrior};
use ellipnest::reducer::FerozReducer;
use ellipnest::results::Results;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    // Uniform prior over the square where all four degenerate maxima live.
    let priors: Vec<Box<dyn Prior + Send + Sync>> = vec![Box::new(UniformPrior::new(
        vec![-5.0, -5.0],
        vec![5.0, 5.0],
    )?)];

    let kmeans = KmeansClusterer::new(Box::new(EuclideanMetric), 1, 6, 10, 0.4)?;

    let config = SamplerConfig {
        n_dimensions: 2,
        initial_n_objects: 400,
        min_n_objects: 400,
        initial_enlargement_fraction: 2.5,
        shrinking_rate: 0.6,
        n_parallel_draws: 1,
        contraction: ContractionPolicy::Uniform,
        seed: 4,
    };
    let mut sampler = MultiEllipsoidSampler::new(
        priors,
        Arc::new(Himmelblau),
        Box::new(kmeans),
        config,
    )?;

    let tolerance_on_evidence = 0.01;
    let reducer = FerozReducer::new(tolerance_on_evidence, 400)?;

    let n_initial_iterations_without_clustering = 100;
    let n_iterations_with_same_clustering = 10;
    let max_n_draw_attempts = 50_000;
    let termination_factor = 0.01;
    let report = sampler.run(
        &reducer,
        n_initial_iterations_without_clustering,
        n_iterations_with_same_clustering,
        max_n_draw_attempts,
        termination_factor,
    )?;
    report.print_summary();

    let results = Results::new(&sampler);
    results.write_parameters_to_file("himmelblau_parameter")?;
    results.write_log_likelihood_to_file("himmelblau_likelihood_distribution.txt")?;
    results.write_evidence_information_to_file("himmelblau_evidence_information.txt")?;
    results.write_posterior_probability_to_file("himmelblau_posterior_distribution.txt")?;
    results.write_parameters_summary_to_file("himmelblau_parameter_summary.txt", 68.3)?;

    Ok(())
}
