use serde::{Deserialize, Serialize};

/// Pool identifier, unique within a single cache instance.
pub type PoolId = u32;

/// Cache identifier, unique across the orchestrator. Canonically the
/// agent's network address.
pub type CacheName = String;

/// Latest workload metrics reported for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub disk_iops: u32,
    pub miss_ratio: f64,
    pub throughput: u32,
}

impl Default for PoolMetrics {
    fn default() -> Self {
        // A pool that has never been measured misses everything.
        Self { disk_iops: 0, miss_ratio: 1.0, throughput: 0 }
    }
}
