use std::collections::HashMap;
use std::sync::Arc;

use holpaca_agent::Agent;
use parking_lot::Mutex;

use crate::store::BackingStore;

struct Entry {
    agent: Arc<Agent>,
    store: Arc<dyn BackingStore>,
    refs: usize,
}

/// Shares cache instances between benchmark clients by name.
///
/// Multiple clients may target the same cache; the instance is built on
/// first acquisition and torn down when the last reference is released.
#[derive(Default)]
pub struct CacheRegistry {
    inner: Mutex<HashMap<String, Entry>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire<F>(
        &self,
        name: &str,
        build: F,
    ) -> anyhow::Result<(Arc<Agent>, Arc<dyn BackingStore>)>
    where
        F: FnOnce() -> anyhow::Result<(Agent, Arc<dyn BackingStore>)>,
    {
        let mut entries = self.inner.lock();
        if let Some(entry) = entries.get_mut(name) {
            entry.refs += 1;
            return Ok((entry.agent.clone(), entry.store.clone()));
        }
        let (agent, store) = build()?;
        let agent = Arc::new(agent);
        entries.insert(
            name.to_string(),
            Entry { agent: agent.clone(), store: store.clone(), refs: 1 },
        );
        Ok((agent, store))
    }

    /// Drops one reference; the last release removes the instance.
    pub fn release(&self, name: &str) {
        let mut entries = self.inner.lock();
        if let Some(entry) = entries.get_mut(name) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(name);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
