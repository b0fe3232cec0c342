mod config;
mod server;

pub use config::AgentConfig;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use holpaca_core::engine::{CacheEngine, CacheHandle, EngineError};
use holpaca_core::{MrcConfig, MrcEstimator, PoolId, PoolMetrics};
use holpaca_proto::{CacheStatus, PoolStatus};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("control server: {0}")]
    Server(std::io::Error),
}

/// Data-plane agent fronting one cache engine.
///
/// Interposes on the engine's operations to feed per-pool MRC estimators,
/// keeps the latest workload metrics per pool, and serves the orchestrator's
/// `GetStatus`/`Resize` calls. When both the agent and orchestrator addresses
/// are configured, construction starts the control server and registers with
/// the orchestrator (retrying until it answers); dropping the agent
/// deregisters and shuts the server down.
pub struct Agent {
    core: Arc<AgentCore>,
    control: Option<server::ControlPlane>,
}

pub(crate) struct AgentCore {
    engine: Arc<dyn CacheEngine>,
    virtual_size: u64,
    proportion: f64,
    mrc_acceptance_rate: f64,
    pools: RwLock<PoolTable>,
    /// Serializes pool lifecycle changes against resize batches.
    reshape: Mutex<()>,
}

struct PoolTable {
    shards: HashMap<PoolId, Arc<MrcEstimator>>,
    metrics: HashMap<PoolId, PoolMetrics>,
    qos_levels: HashMap<PoolId, f64>,
    proportions: HashMap<PoolId, f64>,
    active: HashSet<PoolId>,
}

impl PoolTable {
    fn new() -> Self {
        // The engine supports at most 64 pools per instance; reserving up
        // front keeps the maps from rehashing under load.
        Self {
            shards: HashMap::with_capacity(64),
            metrics: HashMap::with_capacity(64),
            qos_levels: HashMap::with_capacity(64),
            proportions: HashMap::with_capacity(64),
            active: HashSet::with_capacity(64),
        }
    }
}

impl Agent {
    pub fn new(config: AgentConfig, engine: Arc<dyn CacheEngine>) -> Result<Self, AgentError> {
        let virtual_size = config.virtual_size.unwrap_or_else(|| engine.ram_cache_size());
        let core = Arc::new(AgentCore {
            engine,
            virtual_size,
            proportion: config.proportion,
            mrc_acceptance_rate: config.mrc_acceptance_rate,
            pools: RwLock::new(PoolTable::new()),
            reshape: Mutex::new(()),
        });
        let control = match (&config.address, &config.orchestrator_address) {
            (Some(address), Some(orchestrator)) => {
                Some(server::ControlPlane::start(core.clone(), address, orchestrator)?)
            }
            _ => None,
        };
        Ok(Self { core, control })
    }

    /// Address the control server actually listens on, once started.
    pub fn advertised_address(&self) -> Option<&str> {
        self.control.as_ref().map(|c| c.address())
    }

    /// Creates a pool in the engine and allocates its MRC estimator.
    pub fn add_pool(
        &self,
        name: &str,
        size: u64,
        qos_level: f64,
        proportion: f64,
    ) -> Result<PoolId, AgentError> {
        let _g = self.core.reshape.lock();
        let id = self.core.engine.add_pool(name, size)?;
        let estimator = Arc::new(MrcEstimator::new(MrcConfig {
            acceptance_rate: self.core.mrc_acceptance_rate,
            bucket_size: 100,
            max_size: self.core.engine.ram_cache_size(),
            ..Default::default()
        }));
        let mut table = self.core.pools.write();
        table.shards.insert(id, estimator);
        table.metrics.insert(id, PoolMetrics::default());
        table.qos_levels.insert(id, qos_level);
        table.proportions.insert(id, proportion);
        table.active.insert(id);
        Ok(id)
    }

    /// Marks the pool inactive and releases its memory.
    pub fn remove_pool(&self, id: PoolId) -> Result<(), AgentError> {
        let _g = self.core.reshape.lock();
        {
            let mut table = self.core.pools.write();
            table.active.remove(&id);
            table.shards.remove(&id);
            table.metrics.remove(&id);
            table.qos_levels.remove(&id);
            table.proportions.remove(&id);
        }
        let size = self.core.engine.pool_info(id)?.pool_size;
        self.core.engine.shrink_pool(id, size)?;
        Ok(())
    }

    pub fn find(&self, key: &[u8]) -> Option<CacheHandle> {
        let handle = self.core.engine.find(key)?;
        if let Some(estimator) = self.core.estimator(handle.pool_id()) {
            estimator.accessed(key, handle.size());
        }
        Some(handle)
    }

    pub fn insert(&self, handle: &CacheHandle) -> Result<bool, AgentError> {
        let inserted = self.core.engine.insert(handle)?;
        if inserted {
            if let Some(estimator) = self.core.estimator(handle.pool_id()) {
                estimator.remove(handle.key());
                estimator.accessed(handle.key(), handle.size());
            }
        }
        Ok(inserted)
    }

    pub fn insert_or_replace(
        &self,
        handle: &CacheHandle,
    ) -> Result<Option<CacheHandle>, AgentError> {
        let old = self.core.engine.insert_or_replace(handle)?;
        if old.is_some() {
            if let Some(estimator) = self.core.estimator(handle.pool_id()) {
                estimator.remove(handle.key());
                estimator.accessed(handle.key(), handle.size());
            }
        }
        Ok(old)
    }

    pub fn allocate(
        &self,
        pool: PoolId,
        key: &[u8],
        size: u32,
    ) -> Result<Option<CacheHandle>, AgentError> {
        Ok(self.core.engine.allocate(pool, key, size)?)
    }

    /// Drops the key from the engine and from its pool's estimator.
    pub fn remove(&self, key: &[u8]) -> Result<bool, AgentError> {
        let pool = self.core.engine.find(key).map(|h| h.pool_id());
        let removed = self.core.engine.remove(key)?;
        if removed {
            if let Some(estimator) = pool.and_then(|p| self.core.estimator(p)) {
                estimator.remove(key);
            }
        }
        Ok(removed)
    }

    /// Overwrites the pool's latest workload metrics.
    pub fn register_metrics(
        &self,
        pool: PoolId,
        disk_iops: u32,
        miss_ratio: f64,
        throughput: u32,
    ) {
        let mut table = self.core.pools.write();
        table
            .metrics
            .insert(pool, PoolMetrics { disk_iops, miss_ratio, throughput });
    }

    pub fn status(&self) -> CacheStatus {
        self.core.status()
    }

    pub fn resize(&self, targets: &HashMap<PoolId, u64>) -> Result<(), AgentError> {
        Ok(self.core.resize(targets)?)
    }
}

impl AgentCore {
    fn estimator(&self, pool: PoolId) -> Option<Arc<MrcEstimator>> {
        self.pools.read().shards.get(&pool).cloned()
    }

    pub(crate) fn status(&self) -> CacheStatus {
        let table = self.pools.read();
        let mut pools = HashMap::new();
        for id in self.engine.pool_ids() {
            if !table.active.contains(&id) {
                continue;
            }
            let Ok(info) = self.engine.pool_info(id) else { continue };
            let metrics = table.metrics.get(&id).copied().unwrap_or_default();
            pools.insert(
                id,
                PoolStatus {
                    pool_id: id,
                    max_size: info.pool_size,
                    used_size: info.current_alloc_size,
                    disk_iops: metrics.disk_iops,
                    miss_ratio: metrics.miss_ratio,
                    throughput: metrics.throughput,
                    qos: table.qos_levels.get(&id).copied().unwrap_or(0.0),
                    proportion: table.proportions.get(&id).copied().unwrap_or(1.0),
                    mrc: table.shards.get(&id).map(|e| e.byte_mrc()).unwrap_or_default(),
                },
            );
        }
        CacheStatus {
            max_size: self.virtual_size.min(self.engine.ram_cache_size()),
            proportion: self.proportion,
            pools,
        }
    }

    /// Applies one resize batch: shrinks before grows so the running total
    /// never exceeds the cache budget.
    pub(crate) fn resize(&self, targets: &HashMap<PoolId, u64>) -> Result<(), EngineError> {
        let _g = self.reshape.lock();
        let mut deltas: Vec<(PoolId, i64)> = Vec::with_capacity(targets.len());
        for (&id, &target) in targets {
            let Ok(info) = self.engine.pool_info(id) else {
                debug!(pool = id, "resize target for unknown pool, skipping");
                continue;
            };
            let delta = target as i64 - info.pool_size as i64;
            if delta != 0 {
                deltas.push((id, delta));
            }
        }
        deltas.sort_by_key(|&(_, delta)| delta);
        for (id, delta) in deltas {
            if delta < 0 {
                self.engine.shrink_pool(id, delta.unsigned_abs())?;
            } else {
                self.engine.grow_pool(id, delta as u64)?;
            }
        }
        Ok(())
    }
}
