pub mod engine;
pub mod mrc;
pub mod siman;
pub mod spline;
pub mod types;

pub use engine::{CacheEngine, CacheHandle, EngineError, PoolInfo};
pub use mrc::{MrcConfig, MrcEstimator};
pub use siman::{solve, Anneal, SimanParams};
pub use spline::{MonotoneSpline, SplineError};
pub use types::{CacheName, PoolId, PoolMetrics};
