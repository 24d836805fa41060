//! Backend abstraction

mod traits;
mod types;

pub use traits::ComputeBackend;
pub use types::*;
