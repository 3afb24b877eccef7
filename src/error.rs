use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("degenerate ellipsoid: {n_points} points in {n_dimensions} dimensions")]
    DegenerateEllipsoid {
        n_points: usize,
        n_dimensions: usize,
    },
    #[error("shape matrix still singular after {attempts} regularization attempts")]
    RegularizationFailed { attempts: usize },
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(
        "no acceptable replacement point after {attempts} draw attempts at iteration {iteration}"
    )]
    DrawAttemptsExhausted { iteration: usize, attempts: usize },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
