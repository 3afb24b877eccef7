#[derive(Debug, Clone)]
pub struct LivePoint {
    pub parameters: Vec<f64>,
    pub ln_likelihood: f64,
}

impl LivePoint {
    pub fn new(parameters: Vec<f64>, ln_likelihood: f64) -> Self {
        Self {
            parameters,
            ln_likelihood,
        }
    }
}

/// The live-point population. Members always satisfy the current likelihood
/// threshold; the worst member removed each iteration defines the next one.
pub struct LivePointPopulation {
    points: Vec<LivePoint>,
    min_n_objects: usize,
}

impl LivePointPopulation {
    pub fn new(points: Vec<LivePoint>, min_n_objects: usize) -> Self {
        Self {
            points,
            min_n_objects,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn min_n_objects(&self) -> usize {
        self.min_n_objects
    }

    pub fn points(&self) -> &[LivePoint] {
        &self.points
    }

    pub fn parameter_vectors(&self) -> Vec<Vec<f64>> {
        self.points
            .iter()
            .map(|point| point.parameters.clone())
            .collect()
    }

    pub fn worst(&self) -> (usize, f64) {
        let (idx, point) = self
            .points
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.ln_likelihood.total_cmp(&b.1.ln_likelihood))
            .expect("population is never empty during a run");
        (idx, point.ln_likelihood)
    }

    pub fn ln_max_likelihood(&self) -> f64 {
        self.points
            .iter()
            .map(|point| point.ln_likelihood)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn replace(&mut self, idx: usize, point: LivePoint) -> LivePoint {
        std::mem::replace(&mut self.points[idx], point)
    }

    pub fn remove(&mut self, idx: usize) -> LivePoint {
        self.points.swap_remove(idx)
    }

    pub fn can_shrink(&self) -> bool {
        self.points.len() > self.min_n_objects
    }

    pub fn drain(&mut self) -> Vec<LivePoint> {
        std::mem::take(&mut self.points)
    }
}

#[derive(Debug, Clone)]
pub struct ArchivedPoint {
    pub parameters: Vec<f64>,
    pub ln_likelihood: f64,
    pub ln_width: f64,
}

/// Append-only record of removed live points, in removal order.
#[derive(Debug, Default)]
pub struct PosteriorArchive {
    points: Vec<ArchivedPoint>,
}

impl PosteriorArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: ArchivedPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ArchivedPoint] {
        &self.points
    }

    /// Rows are dimensions, columns follow archive order.
    pub fn parameter_matrix(&self) -> Vec<Vec<f64>> {
        if self.points.is_empty() {
            return Vec::new();
        }
        let n_dimensions = self.points[0].parameters.len();
        (0..n_dimensions)
            .map(|dim| self.points.iter().map(|p| p.parameters[dim]).collect())
            .collect()
    }

    pub fn ln_likelihoods(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.ln_likelihood).collect()
    }

    pub fn ln_widths(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.ln_width).collect()
    }

    /// Posterior log-weights; normalizing by the final evidence makes these
    /// sum to one.
    pub fn ln_weights(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.ln_width + p.ln_likelihood)
            .collect()
    }
}
