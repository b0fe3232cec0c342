use crate::types::PoolId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown pool {0}")]
    UnknownPool(PoolId),
    #[error("capacity exceeded: {0}")]
    Capacity(String),
    #[error("engine error: {0}")]
    Backend(String),
}

/// Size accounting for one pool as reported by the engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_size: u64,
    pub current_alloc_size: u64,
}

/// Handle to a single cached allocation.
///
/// Carries enough for callers to read or fill the value and for the agent
/// to attribute the access to the owning pool without reaching back into
/// engine internals.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    pool: PoolId,
    key: Bytes,
    data: Vec<u8>,
}

impl CacheHandle {
    pub fn new(pool: PoolId, key: impl Into<Bytes>, data: Vec<u8>) -> Self {
        Self { pool, key: key.into(), data }
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Capability interface the underlying slab cache engine must provide.
///
/// The eviction policy behind `find`/`insert` is a black box; the engine
/// guarantees that the sum of pool budgets never exceeds the cache budget,
/// which is why `grow_pool` can fail while `shrink_pool` cannot run out of
/// room.
pub trait CacheEngine: Send + Sync + 'static {
    fn add_pool(&self, name: &str, size: u64) -> Result<PoolId, EngineError>;
    fn grow_pool(&self, id: PoolId, bytes: u64) -> Result<(), EngineError>;
    fn shrink_pool(&self, id: PoolId, bytes: u64) -> Result<(), EngineError>;
    fn pool_info(&self, id: PoolId) -> Result<PoolInfo, EngineError>;
    fn pool_ids(&self) -> Vec<PoolId>;

    /// Physical RAM budget of the whole cache instance.
    fn ram_cache_size(&self) -> u64;

    /// Reserves room for `size` bytes in `pool` and returns a fillable
    /// handle, or `None` when the pool cannot make room.
    fn allocate(&self, pool: PoolId, key: &[u8], size: u32)
        -> Result<Option<CacheHandle>, EngineError>;

    fn find(&self, key: &[u8]) -> Option<CacheHandle>;

    /// Inserts a freshly allocated handle; `false` when the key is already
    /// present.
    fn insert(&self, handle: &CacheHandle) -> Result<bool, EngineError>;

    /// Inserts the handle, returning the displaced allocation if the key
    /// was already present.
    fn insert_or_replace(&self, handle: &CacheHandle)
        -> Result<Option<CacheHandle>, EngineError>;

    fn remove(&self, key: &[u8]) -> Result<bool, EngineError>;
}
