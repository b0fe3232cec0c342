use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Physical cache size in bytes.
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,
    /// Capacity advertised to the orchestrator instead of the physical size.
    #[serde(default)]
    pub virtual_size: Option<u64>,
    /// Address the agent's control server binds to.
    #[serde(default)]
    pub address: Option<String>,
    /// Orchestrator endpoint. Registration happens only when both this and
    /// `address` are set.
    #[serde(default)]
    pub orchestrator_address: Option<String>,
    /// Share of memory this instance claims under the proportional
    /// controller.
    #[serde(default = "default_proportion")]
    pub proportion: f64,
    /// Fraction of keys sampled by each pool's MRC estimator.
    #[serde(default = "default_mrc_acceptance_rate")]
    pub mrc_acceptance_rate: f64,
}

fn default_cache_size() -> u64 {
    1_000_000_000
}

fn default_proportion() -> f64 {
    1.0
}

fn default_mrc_acceptance_rate() -> f64 {
    0.001
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            virtual_size: None,
            address: None,
            orchestrator_address: None,
            proportion: default_proportion(),
            mrc_acceptance_rate: default_mrc_acceptance_rate(),
        }
    }
}
