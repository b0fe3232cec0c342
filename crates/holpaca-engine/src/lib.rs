use bytes::Bytes;
use holpaca_core::engine::{CacheEngine, CacheHandle, EngineError, PoolInfo};
use holpaca_core::PoolId;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Reference in-memory cache engine.
///
/// Stands in for a real slab allocator behind the [`CacheEngine`] seam:
/// per-pool byte budgets with FIFO eviction, and the global invariant that
/// the sum of pool budgets never exceeds the cache budget. The eviction
/// policy is deliberately unremarkable; callers treat it as a black box.
#[derive(Clone)]
pub struct MemEngine {
    inner: Arc<RwLock<Inner>>,
    max_size: u64,
}

#[derive(Default)]
struct Inner {
    next_pool: PoolId,
    pools: HashMap<PoolId, Pool>,
    items: HashMap<Bytes, Item>,
}

struct Pool {
    #[allow(dead_code)]
    name: String,
    max_size: u64,
    used: u64,
    // Resident keys in insertion order; evicted front-first.
    queue: VecDeque<Bytes>,
}

struct Item {
    pool: PoolId,
    data: Vec<u8>,
}

impl MemEngine {
    pub fn new(max_size: u64) -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())), max_size }
    }
}

impl Inner {
    fn budget_total(&self) -> u64 {
        self.pools.values().map(|p| p.max_size).sum()
    }

    fn pool_mut(&mut self, id: PoolId) -> Result<&mut Pool, EngineError> {
        self.pools.get_mut(&id).ok_or(EngineError::UnknownPool(id))
    }

    /// Evicts front-of-queue items until `need` more bytes fit in `pool`.
    fn make_room(&mut self, id: PoolId, need: u64) {
        loop {
            let Some(pool) = self.pools.get_mut(&id) else { return };
            if pool.used + need <= pool.max_size {
                return;
            }
            let Some(victim) = pool.queue.pop_front() else { return };
            if let Some(item) = self.items.remove(&victim) {
                let len = item.data.len() as u64;
                if let Some(pool) = self.pools.get_mut(&id) {
                    pool.used = pool.used.saturating_sub(len);
                }
            }
        }
    }

    fn store(&mut self, handle: &CacheHandle) -> bool {
        let id = handle.pool_id();
        let size = u64::from(handle.size());
        let Some(pool) = self.pools.get(&id) else { return false };
        if size > pool.max_size {
            return false;
        }
        self.make_room(id, size);
        let key = Bytes::copy_from_slice(handle.key());
        self.items.insert(key.clone(), Item { pool: id, data: handle.data().to_vec() });
        let pool = self.pools.get_mut(&id).expect("pool checked above");
        pool.used += size;
        pool.queue.push_back(key);
        true
    }

    fn evict_key(&mut self, key: &[u8]) -> Option<Item> {
        let item = self.items.remove(key)?;
        if let Some(pool) = self.pools.get_mut(&item.pool) {
            pool.used = pool.used.saturating_sub(item.data.len() as u64);
            pool.queue.retain(|k| k.as_ref() != key);
        }
        Some(item)
    }
}

impl CacheEngine for MemEngine {
    fn add_pool(&self, name: &str, size: u64) -> Result<PoolId, EngineError> {
        let mut g = self.inner.write();
        if g.budget_total() + size > self.max_size {
            return Err(EngineError::Capacity(format!(
                "pool of {size} B does not fit in {} B cache",
                self.max_size
            )));
        }
        let id = g.next_pool;
        g.next_pool += 1;
        g.pools.insert(
            id,
            Pool { name: name.to_string(), max_size: size, used: 0, queue: VecDeque::new() },
        );
        Ok(id)
    }

    fn grow_pool(&self, id: PoolId, bytes: u64) -> Result<(), EngineError> {
        let mut g = self.inner.write();
        if !g.pools.contains_key(&id) {
            return Err(EngineError::UnknownPool(id));
        }
        if g.budget_total() + bytes > self.max_size {
            return Err(EngineError::Capacity(format!(
                "growing pool {id} by {bytes} B exceeds the cache budget"
            )));
        }
        g.pool_mut(id)?.max_size += bytes;
        Ok(())
    }

    fn shrink_pool(&self, id: PoolId, bytes: u64) -> Result<(), EngineError> {
        let mut g = self.inner.write();
        let pool = g.pool_mut(id)?;
        pool.max_size = pool.max_size.saturating_sub(bytes);
        g.make_room(id, 0);
        Ok(())
    }

    fn pool_info(&self, id: PoolId) -> Result<PoolInfo, EngineError> {
        let g = self.inner.read();
        let pool = g.pools.get(&id).ok_or(EngineError::UnknownPool(id))?;
        Ok(PoolInfo { pool_size: pool.max_size, current_alloc_size: pool.used })
    }

    fn pool_ids(&self) -> Vec<PoolId> {
        let mut ids: Vec<_> = self.inner.read().pools.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn ram_cache_size(&self) -> u64 {
        self.max_size
    }

    fn allocate(
        &self,
        pool: PoolId,
        key: &[u8],
        size: u32,
    ) -> Result<Option<CacheHandle>, EngineError> {
        let g = self.inner.read();
        let p = g.pools.get(&pool).ok_or(EngineError::UnknownPool(pool))?;
        if u64::from(size) > p.max_size {
            return Ok(None);
        }
        Ok(Some(CacheHandle::new(pool, key.to_vec(), vec![0u8; size as usize])))
    }

    fn find(&self, key: &[u8]) -> Option<CacheHandle> {
        let g = self.inner.read();
        let item = g.items.get(key)?;
        Some(CacheHandle::new(item.pool, key.to_vec(), item.data.clone()))
    }

    fn insert(&self, handle: &CacheHandle) -> Result<bool, EngineError> {
        let mut g = self.inner.write();
        if g.items.contains_key(handle.key()) {
            return Ok(false);
        }
        Ok(g.store(handle))
    }

    fn insert_or_replace(
        &self,
        handle: &CacheHandle,
    ) -> Result<Option<CacheHandle>, EngineError> {
        let mut g = self.inner.write();
        let old = g
            .evict_key(handle.key())
            .map(|item| CacheHandle::new(item.pool, handle.key().to_vec(), item.data));
        g.store(handle);
        Ok(old)
    }

    fn remove(&self, key: &[u8]) -> Result<bool, EngineError> {
        Ok(self.inner.write().evict_key(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(engine: &MemEngine, pool: PoolId, key: &[u8], size: u32) -> CacheHandle {
        let mut h = engine.allocate(pool, key, size).unwrap().expect("allocate");
        h.data_mut().fill(0xAB);
        h
    }

    #[test]
    fn pool_budgets_never_exceed_cache_budget() {
        let engine = MemEngine::new(1_000);
        let p0 = engine.add_pool("a", 600).unwrap();
        assert!(engine.add_pool("b", 600).is_err(), "1200 > 1000 must be rejected");
        let p1 = engine.add_pool("b", 400).unwrap();
        assert!(engine.grow_pool(p1, 1).is_err(), "budget is exactly full");
        engine.shrink_pool(p0, 100).unwrap();
        engine.grow_pool(p1, 100).unwrap();
        assert_eq!(engine.pool_info(p0).unwrap().pool_size, 500);
        assert_eq!(engine.pool_info(p1).unwrap().pool_size, 500);
    }

    #[test]
    fn eviction_is_fifo_within_a_pool() {
        let engine = MemEngine::new(100);
        let pool = engine.add_pool("p", 100).unwrap();
        for key in [&b"k1"[..], b"k2", b"k3", b"k4"] {
            let h = filled(&engine, pool, key, 25);
            assert!(engine.insert(&h).unwrap());
        }
        // A fifth 25-byte item displaces the oldest.
        let h = filled(&engine, pool, b"k5", 25);
        assert!(engine.insert(&h).unwrap());
        assert!(engine.find(b"k1").is_none(), "oldest key should be evicted");
        assert!(engine.find(b"k5").is_some());
        assert_eq!(engine.pool_info(pool).unwrap().current_alloc_size, 100);
    }

    #[test]
    fn shrink_evicts_down_to_the_new_budget() {
        let engine = MemEngine::new(100);
        let pool = engine.add_pool("p", 100).unwrap();
        for key in [&b"a"[..], b"b", b"c", b"d"] {
            engine.insert(&filled(&engine, pool, key, 25)).unwrap();
        }
        engine.shrink_pool(pool, 50).unwrap();
        let info = engine.pool_info(pool).unwrap();
        assert_eq!(info.pool_size, 50);
        assert!(info.current_alloc_size <= 50, "used {} > 50", info.current_alloc_size);
    }

    #[test]
    fn insert_or_replace_returns_the_displaced_value() {
        let engine = MemEngine::new(100);
        let pool = engine.add_pool("p", 100).unwrap();
        engine.insert(&filled(&engine, pool, b"k", 10)).unwrap();

        let mut h = engine.allocate(pool, b"k", 4).unwrap().unwrap();
        h.data_mut().copy_from_slice(b"newv");
        let old = engine.insert_or_replace(&h).unwrap().expect("old value");
        assert_eq!(old.size(), 10);
        assert_eq!(engine.find(b"k").unwrap().data(), b"newv");
        assert_eq!(engine.pool_info(pool).unwrap().current_alloc_size, 4);
    }

    #[test]
    fn remove_releases_the_bytes() {
        let engine = MemEngine::new(100);
        let pool = engine.add_pool("p", 100).unwrap();
        engine.insert(&filled(&engine, pool, b"k", 40)).unwrap();
        assert!(engine.remove(b"k").unwrap());
        assert!(!engine.remove(b"k").unwrap());
        assert_eq!(engine.pool_info(pool).unwrap().current_alloc_size, 0);
    }
}
