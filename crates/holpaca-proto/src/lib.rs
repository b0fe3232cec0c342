use std::collections::{BTreeMap, HashMap};

use holpaca_core::PoolId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub cache_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub cache_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatusResponse {
    pub cache_status: CacheStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// Target absolute size per pool.
    pub pool_sizes: HashMap<PoolId, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatus {
    /// Advertised capacity: min(virtual size, physical size).
    pub max_size: u64,
    pub proportion: f64,
    pub pools: HashMap<PoolId, PoolStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub pool_id: PoolId,
    pub max_size: u64,
    pub used_size: u64,
    pub disk_iops: u32,
    pub miss_ratio: f64,
    pub throughput: u32,
    pub qos: f64,
    pub proportion: f64,
    /// Sorted size -> miss-ratio curve.
    pub mrc: BTreeMap<u64, f32>,
}
