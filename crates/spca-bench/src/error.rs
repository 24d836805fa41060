use spca_compute::ComputeError;
use spca_matrix::MatrixError;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("no compute devices available")]
    NoDevices,

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}
