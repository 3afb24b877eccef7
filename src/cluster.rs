use rand::seq::index::sample as sample_indices;
use rand::RngCore;
use tracing::debug;

use crate::error::SamplerError;
use crate::metric::Metric;

const MAX_KMEANS_ITERATIONS: usize = 200;

#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub labels: Vec<usize>,
    pub n_clusters: usize,
}

impl ClusterAssignment {
    pub fn single(n_points: usize) -> Self {
        Self {
            labels: vec![0; n_points],
            n_clusters: 1,
        }
    }

    /// Point indices grouped per cluster id.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.n_clusters];
        for (idx, &label) in self.labels.iter().enumerate() {
            groups[label].push(idx);
        }
        groups
    }
}

pub trait Clusterer: Send + Sync {
    fn cluster(&self, points: &[Vec<f64>], rng: &mut dyn RngCore) -> ClusterAssignment;
}

/// K-means with randomized restarts and stability-based selection of the
/// cluster count: the smallest K whose best partition the next K cannot
/// improve by more than `rel_tolerance`.
pub struct KmeansClusterer {
    metric: Box<dyn Metric>,
    min_n_clusters: usize,
    max_n_clusters: usize,
    n_trials: usize,
    rel_tolerance: f64,
}

struct Partition {
    labels: Vec<usize>,
    dispersion: f64,
}

impl KmeansClusterer {
    pub fn new(
        metric: Box<dyn Metric>,
        min_n_clusters: usize,
        max_n_clusters: usize,
        n_trials: usize,
        rel_tolerance: f64,
    ) -> Result<Self, SamplerError> {
        if min_n_clusters < 1 || max_n_clusters < min_n_clusters {
            return Err(SamplerError::InvalidConfig(
                "cluster count bounds must satisfy 1 <= min <= max".into(),
            ));
        }
        if n_trials < 1 {
            return Err(SamplerError::InvalidConfig(
                "at least one clustering trial is required".into(),
            ));
        }
        if !(rel_tolerance >= 0.0) {
            return Err(SamplerError::InvalidConfig(
                "relative tolerance must be non-negative".into(),
            ));
        }
        Ok(Self {
            metric,
            min_n_clusters,
            max_n_clusters,
            n_trials,
            rel_tolerance,
        })
    }

    fn best_of_trials(
        &self,
        n_clusters: usize,
        points: &[Vec<f64>],
        rng: &mut dyn RngCore,
    ) -> Option<Partition> {
        let mut best: Option<Partition> = None;
        for _ in 0..self.n_trials {
            if let Some(partition) = self.single_trial(n_clusters, points, rng) {
                let better = best
                    .as_ref()
                    .map(|b| partition.dispersion < b.dispersion)
                    .unwrap_or(true);
                if better {
                    best = Some(partition);
                }
            }
        }
        best
    }

    fn single_trial(
        &self,
        n_clusters: usize,
        points: &[Vec<f64>],
        rng: &mut dyn RngCore,
    ) -> Option<Partition> {
        let n_points = points.len();
        let n_dimensions = points[0].len();
        let mut centroids: Vec<Vec<f64>> = sample_indices(rng, n_points, n_clusters)
            .iter()
            .map(|idx| points[idx].clone())
            .collect();
        let mut labels = vec![0usize; n_points];

        for _ in 0..MAX_KMEANS_ITERATIONS {
            let mut changed = false;
            for (idx, point) in points.iter().enumerate() {
                let nearest = (0..n_clusters)
                    .min_by(|&a, &b| {
                        self.metric
                            .distance(point, &centroids[a])
                            .total_cmp(&self.metric.distance(point, &centroids[b]))
                    })
                    .unwrap_or(0);
                if labels[idx] != nearest {
                    labels[idx] = nearest;
                    changed = true;
                }
            }

            let mut counts = vec![0usize; n_clusters];
            for &label in &labels {
                counts[label] += 1;
            }
            if let Some(empty) = counts.iter().position(|&count| count == 0) {
                // Reseed a starved centroid at the point farthest from its
                // current assignment and keep iterating.
                let farthest = (0..n_points)
                    .max_by(|&a, &b| {
                        self.metric
                            .distance(&points[a], &centroids[labels[a]])
                            .total_cmp(&self.metric.distance(&points[b], &centroids[labels[b]]))
                    })
                    .unwrap_or(0);
                centroids[empty] = points[farthest].clone();
                continue;
            }

            for (cluster, centroid) in centroids.iter_mut().enumerate() {
                centroid.iter_mut().for_each(|c| *c = 0.0);
                for (idx, point) in points.iter().enumerate() {
                    if labels[idx] == cluster {
                        for dim in 0..n_dimensions {
                            centroid[dim] += point[dim];
                        }
                    }
                }
                centroid
                    .iter_mut()
                    .for_each(|c| *c /= counts[cluster] as f64);
            }

            if !changed {
                let dispersion = points
                    .iter()
                    .zip(labels.iter())
                    .map(|(point, &label)| self.metric.distance(point, &centroids[label]).powi(2))
                    .sum();
                return Some(Partition { labels, dispersion });
            }
        }
        None
    }
}

impl Clusterer for KmeansClusterer {
    fn cluster(&self, points: &[Vec<f64>], rng: &mut dyn RngCore) -> ClusterAssignment {
        let n_points = points.len();
        if n_points == 0 {
            return ClusterAssignment::single(0);
        }
        // Never ask for more clusters than the data can populate.
        let max_n_clusters = self.max_n_clusters.min(n_points / 2).max(self.min_n_clusters);

        let mut partitions: Vec<(usize, Partition)> = Vec::new();
        for n_clusters in self.min_n_clusters..=max_n_clusters {
            if n_clusters > n_points {
                break;
            }
            if let Some(partition) = self.best_of_trials(n_clusters, points, rng) {
                partitions.push((n_clusters, partition));
            }
        }

        // Clustering is a heuristic assist: when nothing converges, fall
        // back to a single all-inclusive cluster.
        if partitions.is_empty() {
            return ClusterAssignment::single(n_points);
        }

        let selected = partitions
            .windows(2)
            .find_map(|pair| {
                let (_, current) = &pair[0];
                let (_, next) = &pair[1];
                if current.dispersion <= f64::EPSILON {
                    return Some(&pair[0]);
                }
                let improvement = (current.dispersion - next.dispersion) / current.dispersion;
                (improvement <= self.rel_tolerance).then_some(&pair[0])
            })
            .unwrap_or_else(|| partitions.last().expect("partitions is non-empty"));

        let n_clusters = selected.0;
        let partition = &selected.1;
        debug!(
            n_clusters,
            dispersion = partition.dispersion,
            "selected cluster count"
        );
        ClusterAssignment {
            labels: partition.labels.clone(),
            n_clusters,
        }
    }
}
