use std::sync::Arc;

use holpaca_agent::Agent;
use holpaca_core::PoolId;
use parking_lot::Mutex;
use tracing::warn;

use crate::store::{BackingStore, Field, Status};

#[derive(Debug, Default)]
struct Window {
    hits: u64,
    misses: u64,
    store_reads: u64,
    prev_hits: u64,
    prev_misses: u64,
    prev_store_reads: u64,
}

/// One benchmark client's view of a cache pool backed by a store.
///
/// Reads go through the cache; writes go to the store first and refresh the
/// cached copy only when one exists. Cumulative hit/miss/IO counters feed
/// the agent's per-pool metrics as windowed deltas on each flush.
pub struct CachedStore {
    agent: Arc<Agent>,
    store: Arc<dyn BackingStore>,
    pool: PoolId,
    window: Mutex<Window>,
}

impl CachedStore {
    pub fn new(agent: Arc<Agent>, store: Arc<dyn BackingStore>, pool: PoolId) -> Self {
        Self { agent, store, pool, window: Mutex::new(Window::default()) }
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn read(
        &self,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> (Status, Vec<Field>) {
        if let Some(handle) = self.agent.find(key.as_bytes()) {
            self.window.lock().hits += 1;
            return (Status::Ok, vec![Field::new("data", handle.data().to_vec())]);
        }

        {
            let mut window = self.window.lock();
            window.misses += 1;
            window.store_reads += 1;
        }
        let (status, rows) = self.store.read(table, key, fields);
        if status != Status::Ok {
            return (status, rows);
        }
        let value = rows.first().map(|f| f.value.as_slice()).unwrap_or_default();
        (self.fill(key, value), rows)
    }

    pub fn update(&self, table: &str, key: &str, values: &[Field]) -> Status {
        if self.store.update(table, key, values) != Status::Ok {
            return Status::Error;
        }
        // Refresh only a cached copy; updating an uncached key is a no-op
        // success once the store took the write.
        if self.agent.find(key.as_bytes()).is_none() {
            return Status::Ok;
        }
        let value = values.first().map(|f| f.value.as_slice()).unwrap_or_default();
        self.fill(key, value)
    }

    pub fn insert(&self, table: &str, key: &str, values: &[Field]) -> Status {
        if self.store.insert(table, key, values) != Status::Ok {
            return Status::Error;
        }
        if self.agent.find(key.as_bytes()).is_none() {
            return Status::Ok;
        }
        let value = values.first().map(|f| f.value.as_slice()).unwrap_or_default();
        self.fill(key, value)
    }

    pub fn delete(&self, table: &str, key: &str) -> Status {
        let status = self.store.delete(table, key);
        if status == Status::Ok {
            if let Err(e) = self.agent.remove(key.as_bytes()) {
                warn!(key, error = %e, "dropping cached copy failed");
            }
        }
        status
    }

    fn fill(&self, key: &str, value: &[u8]) -> Status {
        let handle = match self.agent.allocate(self.pool, key.as_bytes(), value.len() as u32) {
            Ok(Some(mut handle)) => {
                handle.data_mut().copy_from_slice(value);
                handle
            }
            Ok(None) => return Status::Error,
            Err(e) => {
                warn!(key, error = %e, "cache allocation failed");
                return Status::Error;
            }
        };
        match self.agent.insert_or_replace(&handle) {
            Ok(_) => Status::Ok,
            Err(e) => {
                warn!(key, error = %e, "cache insert failed");
                Status::Error
            }
        }
    }

    /// Registers the deltas since the previous flush as this pool's
    /// metrics: backing-store reads as disk IOPS, the windowed miss ratio,
    /// and total operations as throughput.
    pub fn flush_metrics(&self) {
        let (hits, misses, reads) = {
            let mut window = self.window.lock();
            let hits = window.hits - window.prev_hits;
            let misses = window.misses - window.prev_misses;
            let reads = window.store_reads - window.prev_store_reads;
            window.prev_hits = window.hits;
            window.prev_misses = window.misses;
            window.prev_store_reads = window.store_reads;
            (hits, misses, reads)
        };
        let ops = hits + misses;
        let miss_ratio = if ops == 0 { 0.0 } else { misses as f64 / ops as f64 };
        self.agent.register_metrics(self.pool, reads as u32, miss_ratio, ops as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use holpaca_agent::AgentConfig;
    use holpaca_engine::MemEngine;

    fn client() -> (CachedStore, Arc<Agent>, Arc<MemStore>) {
        let engine = Arc::new(MemEngine::new(100_000));
        let config = AgentConfig { mrc_acceptance_rate: 1.0, ..Default::default() };
        let agent = Arc::new(Agent::new(config, engine).unwrap());
        let pool = agent.add_pool("bench", 100_000, 0.0, 1.0).unwrap();
        let store = Arc::new(MemStore::new());
        let cached = CachedStore::new(agent.clone(), store.clone(), pool);
        (cached, agent, store)
    }

    fn row(value: &[u8]) -> Vec<Field> {
        vec![Field::new("data", value.to_vec())]
    }

    #[test]
    fn read_through_populates_the_cache() {
        let (client, agent, store) = client();
        store.insert("t", "k", &row(b"hello"));

        let (status, rows) = client.read("t", "k", None);
        assert_eq!(status, Status::Ok);
        assert_eq!(rows[0].value, b"hello");
        assert!(agent.find(b"k").is_some(), "miss must fill the cache");

        let (status, _) = client.read("t", "k", None);
        assert_eq!(status, Status::Ok);

        client.flush_metrics();
        let pools = agent.status().pools;
        let status = pools.values().next().unwrap();
        assert_eq!(status.disk_iops, 1, "one backing-store read");
        assert_eq!(status.throughput, 2, "two operations in the window");
        assert!((status.miss_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn update_of_an_uncached_key_is_a_no_op_success() {
        let (client, agent, store) = client();
        assert_eq!(client.update("t", "k", &row(b"v1")), Status::Ok);
        assert!(agent.find(b"k").is_none(), "no cache entry may appear");
        assert_eq!(store.read("t", "k", None).0, Status::Ok, "the store took the write");
    }

    #[test]
    fn update_refreshes_a_cached_copy() {
        let (client, agent, store) = client();
        store.insert("t", "k", &row(b"old"));
        client.read("t", "k", None); // populate cache

        assert_eq!(client.update("t", "k", &row(b"new")), Status::Ok);
        assert_eq!(agent.find(b"k").unwrap().data(), b"new");
    }

    #[test]
    fn delete_drops_the_cached_copy() {
        let (client, agent, store) = client();
        store.insert("t", "k", &row(b"v"));
        client.read("t", "k", None);

        assert_eq!(client.delete("t", "k"), Status::Ok);
        assert!(agent.find(b"k").is_none());
        assert_eq!(store.read("t", "k", None).0, Status::NotFound);
    }

    #[test]
    fn missing_reads_surface_not_found() {
        let (client, _, _) = client();
        assert_eq!(client.read("t", "absent", None).0, Status::NotFound);
    }

    #[test]
    fn empty_window_reports_zero_miss_ratio() {
        let (client, agent, _) = client();
        client.flush_metrics();
        let pools = agent.status().pools;
        let status = pools.values().next().unwrap();
        assert_eq!(status.miss_ratio, 0.0);
        assert_eq!(status.throughput, 0);
    }
}
