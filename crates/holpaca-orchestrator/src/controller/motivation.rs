use async_trait::async_trait;

use super::Controller;
use crate::proxy::{CacheResize, PoolResize, ProxyManager};

/// Baseline controller: splits total memory proportionally to the declared
/// `cache.proportion * pool.proportion` weights.
pub struct Motivation;

#[async_trait]
impl Controller for Motivation {
    async fn tick(&mut self, proxies: &dyn ProxyManager) {
        let caches = proxies.get_status().await;

        let mut weight_sum = 0.0;
        let mut total_size: u64 = 0;
        for status in caches.values() {
            total_size += status.max_size;
            for pool in status.pools.values() {
                weight_sum += pool.proportion * status.proportion;
            }
        }
        if weight_sum == 0.0 {
            return;
        }

        let mut plan = Vec::with_capacity(caches.len());
        for (name, status) in &caches {
            let pools = status
                .pools
                .values()
                .map(|pool| PoolResize {
                    id: pool.pool_id,
                    size: (total_size as f64 * pool.proportion * status.proportion
                        / weight_sum) as u64,
                })
                .collect();
            plan.push(CacheResize { name: name.clone(), pools });
        }
        proxies.resize(plan).await;
    }
}
