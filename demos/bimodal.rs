use std::sync::Arc;

use ellipnest::cluster::KmeansClusterer;
use ellipnest::likelihood::{Gaussian, GaussianMixture};
use ellipnest::metric::EuclideanMetric;
use ellipnest::nest::{ContractionPolicy, MultiEllipsoidSampler, SamplerConfig};
use ellipnest::prior::{Prior, UniformPrior};
use ellipnest::reducer::FerozReducer;
use ellipnest::results::Results;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let priors: Vec<Box<dyn Prior + Send + Sync>> = vec![Box::new(UniformPrior::new(
        vec![-5.0, -5.0],
        vec![5.0, 5.0],
    )?)];

    let likelihood = GaussianMixture::new(vec![
        Gaussian::new(vec![-2.5, 0.0], 0.4),
        Gaussian::new(vec![2.5, 0.0], 0.4),
    ]);

    let kmeans = KmeansClusterer::new(Box::new(EuclideanMetric), 1, 4, 10, 0.4)?;

    let config = SamplerConfig {
        n_dimensions: 2,
        initial_n_objects: 400,
        min_n_objects: 400,
        initial_enlargement_fraction: 2.5,
        shrinking_rate: 0.6,
        n_parallel_draws: 4,
        contraction: ContractionPolicy::Uniform,
        seed: 21,
    };
    let mut sampler = MultiEllipsoidSampler::new(
        priors,
        Arc::new(likelihood),
        Box::new(kmeans),
        config,
    )?;

    let reducer = FerozReducer::new(0.01, 400)?;
    let report = sampler.run(&reducer, 100, 10, 50_000, 0.01)?;

    // Both normalized peaks sit well inside the box, so the evidence is the
    // inverse box volume.
    println!("expected ln evidence: {:.3}", -(100.0f64).ln());
    report.print_summary();

    let results = Results::new(&sampler);
    for (dim, estimate) in results.parameter_estimation(68.3).iter().enumerate() {
        println!(
            "parameter {}: mean {:.3}, median {:.3}, mode {:.3}, CI [{:.3}, {:.3}]",
            dim,
            estimate.mean,
            estimate.median,
            estimate.mode,
            estimate.lower_credible_limit,
            estimate.upper_credible_limit
        );
    }

    Ok(())
}
