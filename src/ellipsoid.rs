use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use statrs::distribution::Normal;
use statrs::function::gamma::ln_gamma;
use tracing::warn;

use crate::error::GeometryError;

const REGULARIZATION_ATTEMPTS: usize = 8;
const INITIAL_JITTER: f64 = 1e-10;

/// Bounding ellipsoid of a point subset: center at the subset mean, shape
/// from the empirical covariance scaled so every member lies inside, axes
/// enlarged by `1 + enlargement_fraction`.
#[derive(Debug, Clone)]
pub struct Ellipsoid {
    center: DVector<f64>,
    eigenvectors: DMatrix<f64>,
    // Enlarged squared semi-axes, all strictly positive.
    eigenvalues: DVector<f64>,
    ln_volume: f64,
    n_members: usize,
}

impl Ellipsoid {
    pub fn fit(points: &[Vec<f64>], enlargement_fraction: f64) -> Result<Self, GeometryError> {
        Self::fit_with_jitter(points, enlargement_fraction, 0.0)
    }

    /// Fit with recovery: a degenerate subset (too few points, collinear
    /// covariance) is retried with a growing diagonal term instead of
    /// failing the run.
    pub fn fit_regularized(
        points: &[Vec<f64>],
        enlargement_fraction: f64,
    ) -> Result<Self, GeometryError> {
        match Self::fit(points, enlargement_fraction) {
            Ok(ellipsoid) => Ok(ellipsoid),
            Err(GeometryError::DegenerateEllipsoid { .. }) => {
                let mut jitter = INITIAL_JITTER;
                for attempt in 1..=REGULARIZATION_ATTEMPTS {
                    warn!(
                        n_points = points.len(),
                        attempt, jitter, "degenerate ellipsoid, regularizing shape matrix"
                    );
                    if let Ok(ellipsoid) =
                        Self::fit_with_jitter(points, enlargement_fraction, jitter)
                    {
                        return Ok(ellipsoid);
                    }
                    jitter *= 100.0;
                }
                Err(GeometryError::RegularizationFailed {
                    attempts: REGULARIZATION_ATTEMPTS,
                })
            }
            Err(other) => Err(other),
        }
    }

    fn fit_with_jitter(
        points: &[Vec<f64>],
        enlargement_fraction: f64,
        jitter: f64,
    ) -> Result<Self, GeometryError> {
        let n_points = points.len();
        if n_points == 0 {
            return Err(GeometryError::DegenerateEllipsoid {
                n_points: 0,
                n_dimensions: 0,
            });
        }
        let n_dimensions = points[0].len();
        if jitter == 0.0 && n_points < n_dimensions + 1 {
            return Err(GeometryError::DegenerateEllipsoid {
                n_points,
                n_dimensions,
            });
        }

        let mut center = DVector::zeros(n_dimensions);
        for point in points {
            center += DVector::from_column_slice(point);
        }
        center /= n_points as f64;

        let mut covariance = DMatrix::zeros(n_dimensions, n_dimensions);
        for point in points {
            let residual = DVector::from_column_slice(point) - &center;
            covariance += &residual * residual.transpose();
        }
        covariance /= n_points as f64;
        for i in 0..n_dimensions {
            covariance[(i, i)] += jitter;
        }

        let eigen = SymmetricEigen::new(covariance);
        let eigenvalues = eigen.eigenvalues;
        let eigenvectors = eigen.eigenvectors;

        // Degeneracy is judged on the condition number, so a uniformly tiny
        // late-run cloud still fits cleanly.
        let max_eigenvalue = eigenvalues.iter().fold(0.0f64, |a, &b| a.max(b));
        let floor = max_eigenvalue * 1e-12;
        if eigenvalues.iter().any(|&value| value <= floor) {
            return Err(GeometryError::DegenerateEllipsoid {
                n_points,
                n_dimensions,
            });
        }

        // Scale so the farthest member sits on the unit quadratic form,
        // then enlarge the axes.
        let mahalanobis_max = points
            .iter()
            .map(|point| {
                let rotated = eigenvectors.transpose()
                    * (DVector::from_column_slice(point) - &center);
                rotated
                    .iter()
                    .zip(eigenvalues.iter())
                    .map(|(y, lambda)| y.powi(2) / lambda)
                    .sum::<f64>()
            })
            .fold(0.0f64, f64::max)
            .max(f64::EPSILON);
        let axis_scale = mahalanobis_max * (1.0 + enlargement_fraction).powi(2);
        let eigenvalues = eigenvalues.map(|value| value * axis_scale);

        let ln_volume = ln_unit_ball_volume(n_dimensions)
            + 0.5 * eigenvalues.iter().map(|value| value.ln()).sum::<f64>();

        Ok(Self {
            center,
            eigenvectors,
            eigenvalues,
            ln_volume,
            n_members: n_points,
        })
    }

    pub fn n_dimensions(&self) -> usize {
        self.center.len()
    }

    pub fn n_members(&self) -> usize {
        self.n_members
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn ln_volume(&self) -> f64 {
        self.ln_volume
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        let rotated = self.eigenvectors.transpose()
            * (DVector::from_column_slice(point) - &self.center);
        let quadratic_form: f64 = rotated
            .iter()
            .zip(self.eigenvalues.iter())
            .map(|(y, lambda)| y.powi(2) / lambda)
            .sum();
        quadratic_form <= 1.0
    }

    /// Uniform draw inside the ellipsoid: a unit-ball sample pushed through
    /// the eigen square root. Rejection-free.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let n_dimensions = self.n_dimensions();
        let normal = Normal::new(0.0, 1.0).expect("unit normal is well formed");
        let mut direction = DVector::from_iterator(
            n_dimensions,
            (0..n_dimensions).map(|_| rng.sample(normal)),
        );
        let norm = direction.norm();
        if norm > 0.0 {
            direction /= norm;
        }
        let radius = rng.gen::<f64>().powf(1.0 / n_dimensions as f64);
        let ball = direction * radius;
        let stretched = DVector::from_iterator(
            n_dimensions,
            ball.iter()
                .zip(self.eigenvalues.iter())
                .map(|(u, lambda)| u * lambda.sqrt()),
        );
        let point = &self.center + &self.eigenvectors * stretched;
        point.iter().copied().collect()
    }
}

fn ln_unit_ball_volume(n_dimensions: usize) -> f64 {
    let half = n_dimensions as f64 / 2.0;
    half * PI.ln() - ln_gamma(half + 1.0)
}

/// The current ellipsoid decomposition. Draws land uniformly on the union:
/// an ellipsoid is picked by volume share and overlap is corrected by
/// accepting with probability one over the number of containing ellipsoids.
pub struct EllipsoidSet {
    ellipsoids: Vec<Ellipsoid>,
    selector: WeightedIndex<f64>,
    volume_shares: Vec<f64>,
}

impl EllipsoidSet {
    pub fn new(ellipsoids: Vec<Ellipsoid>) -> Result<Self, GeometryError> {
        if ellipsoids.is_empty() {
            return Err(GeometryError::DegenerateEllipsoid {
                n_points: 0,
                n_dimensions: 0,
            });
        }
        // Shares computed in log space before exponentiating, so a huge
        // spread of volumes cannot overflow.
        let ln_max = ellipsoids
            .iter()
            .map(Ellipsoid::ln_volume)
            .fold(f64::NEG_INFINITY, f64::max);
        let relative: Vec<f64> = ellipsoids
            .iter()
            .map(|e| (e.ln_volume() - ln_max).exp())
            .collect();
        let total: f64 = relative.iter().sum();
        let volume_shares: Vec<f64> = relative.iter().map(|share| share / total).collect();
        let selector = WeightedIndex::new(&volume_shares)
            .expect("volume shares are positive and finite");
        Ok(Self {
            ellipsoids,
            selector,
            volume_shares,
        })
    }

    pub fn len(&self) -> usize {
        self.ellipsoids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ellipsoids.is_empty()
    }

    pub fn ellipsoids(&self) -> &[Ellipsoid] {
        &self.ellipsoids
    }

    pub fn volume_share(&self, idx: usize) -> f64 {
        self.volume_shares[idx]
    }

    pub fn n_containing(&self, point: &[f64]) -> usize {
        self.ellipsoids
            .iter()
            .filter(|ellipsoid| ellipsoid.contains(point))
            .count()
    }

    pub fn first_containing(&self, point: &[f64]) -> Option<usize> {
        self.ellipsoids
            .iter()
            .position(|ellipsoid| ellipsoid.contains(point))
    }

    /// One draw attempt over the union. `None` means the overlap correction
    /// rejected the candidate; the caller charges it to the attempt budget.
    pub fn draw_union<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Vec<f64>> {
        let idx = self.selector.sample(rng);
        let point = self.ellipsoids[idx].sample_uniform(rng);
        let n_containing = self.n_containing(&point).max(1);
        if n_containing > 1 && rng.gen::<f64>() * n_containing as f64 > 1.0 {
            return None;
        }
        Some(point)
    }
}
