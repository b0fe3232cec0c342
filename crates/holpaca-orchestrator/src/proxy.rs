use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use holpaca_core::{CacheName, PoolId};
use holpaca_proto::{CacheStatus, GetStatusResponse, ResizeRequest};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PoolResize {
    pub id: PoolId,
    pub size: u64,
}

/// Resize instructions for one cache, keyed by its registered name.
#[derive(Debug, Clone)]
pub struct CacheResize {
    pub name: CacheName,
    pub pools: Vec<PoolResize>,
}

/// What a controller sees of the agent fleet.
#[async_trait]
pub trait ProxyManager: Send + Sync {
    /// Fans `GetStatus` out to every registered agent. Agents that fail this
    /// round are omitted from the result but stay registered for the next.
    async fn get_status(&self) -> HashMap<CacheName, CacheStatus>;

    /// Dispatches one `Resize` per plan entry. The whole plan is discarded
    /// unless it covers exactly the registered agents, so a fleet change
    /// between observe and act never causes partial application.
    async fn resize(&self, plan: Vec<CacheResize>);
}

/// Live directory of registered agents.
#[derive(Clone, Default)]
pub struct ProxyDirectory {
    // Cache name -> base URL of its control server.
    proxies: Arc<RwLock<HashMap<CacheName, String>>>,
    client: reqwest::Client,
}

fn base_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{addr}")
    }
}

impl ProxyDirectory {
    pub fn new() -> Self {
        Self {
            proxies: Arc::new(RwLock::new(HashMap::new())),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Registers an agent; a repeated connect replaces the existing proxy.
    pub async fn connect(&self, cache_address: &str) {
        let url = base_url(cache_address);
        info!(cache = %cache_address, "agent connected");
        self.proxies.write().await.insert(cache_address.to_string(), url);
    }

    /// Removes an agent; idempotent on absent names.
    pub async fn disconnect(&self, cache_address: &str) {
        info!(cache = %cache_address, "agent disconnected");
        self.proxies.write().await.remove(cache_address);
    }

    pub async fn len(&self) -> usize {
        self.proxies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.proxies.read().await.is_empty()
    }
}

#[async_trait]
impl ProxyManager for ProxyDirectory {
    async fn get_status(&self) -> HashMap<CacheName, CacheStatus> {
        let snapshot: Vec<(CacheName, String)> = self
            .proxies
            .read()
            .await
            .iter()
            .map(|(name, url)| (name.clone(), url.clone()))
            .collect();

        let mut statuses = HashMap::with_capacity(snapshot.len());
        for (name, url) in snapshot {
            let response = self.client.get(format!("{url}/status")).send().await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    match resp.json::<GetStatusResponse>().await {
                        Ok(body) => {
                            statuses.insert(name, body.cache_status);
                        }
                        Err(e) => warn!(cache = %name, error = %e, "bad status payload"),
                    }
                }
                Ok(resp) => warn!(cache = %name, status = %resp.status(), "status rejected"),
                Err(e) => warn!(cache = %name, error = %e, "agent unreachable"),
            }
        }
        statuses
    }

    async fn resize(&self, plan: Vec<CacheResize>) {
        let snapshot: HashMap<CacheName, String> = self.proxies.read().await.clone();
        if plan.len() != snapshot.len() {
            warn!(
                plan = plan.len(),
                proxies = snapshot.len(),
                "plan does not cover the fleet, discarding"
            );
            return;
        }

        for entry in plan {
            let Some(url) = snapshot.get(&entry.name) else {
                warn!(cache = %entry.name, "plan entry for unregistered agent, skipping");
                continue;
            };
            let request = ResizeRequest {
                pool_sizes: entry.pools.iter().map(|p| (p.id, p.size)).collect(),
            };
            let sent = self
                .client
                .post(format!("{url}/resize"))
                .json(&request)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(cache = %entry.name, status = %resp.status(), "resize rejected"),
                Err(e) => warn!(cache = %entry.name, error = %e, "resize dispatch failed"),
            }
        }
    }
}
