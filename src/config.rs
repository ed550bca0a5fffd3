//! `ManagerConfig`: the TOML-loaded configuration surface for a node
//! (spec.md's ambient stack — config loading, not named by spec.md itself
//! but required by any runnable binary; grounded on the teacher's own
//! `StrataConfig`, a flat `serde`-derived struct loaded with `toml`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use xapiand_pool::PoolConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root directory each endpoint's path is resolved under.
    pub data_path: PathBuf,

    /// Name of the cluster this node gossips to join. Nodes in different
    /// clusters ignore each other's datagrams entirely (spec.md §4.G).
    pub cluster_name: String,

    /// Fixed node name. `None` lets the discovery FSM autogenerate one,
    /// which it is then free to retry on a naming conflict rather than
    /// treat the conflict as fatal (spec.md §4.G SNEER handling).
    pub node_name: Option<String>,

    pub discovery_bind: SocketAddr,
    pub discovery_broadcast: SocketAddr,
    pub http_port: u16,
    pub binary_port: u16,
    pub num_replicas: usize,

    /// `0` runs scheduled tasks inline on the scheduler's own driver
    /// thread; otherwise the size of its dispatch pool (spec.md §4.F).
    pub scheduler_workers: usize,

    /// `None` disables the schema LRU's capacity bound (unbounded cache).
    pub schema_cache_capacity: Option<usize>,

    pub writable_lru_size: usize,
    pub readable_lru_size: usize,
    pub writable_count_cap: usize,
    pub readable_count_cap: usize,
    pub checkout_timeout_ms: u64,
    pub max_checkout_retries: u32,
    pub idle_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let pool_defaults = PoolConfig::default();
        ManagerConfig {
            data_path: PathBuf::from("./data"),
            cluster_name: "xapiand".to_string(),
            node_name: None,
            discovery_bind: "0.0.0.0:8897".parse().unwrap(),
            discovery_broadcast: "255.255.255.255:8897".parse().unwrap(),
            http_port: 8880,
            binary_port: 8890,
            num_replicas: 3,
            scheduler_workers: 4,
            schema_cache_capacity: Some(4096),
            writable_lru_size: pool_defaults.writable_lru_size,
            readable_lru_size: pool_defaults.readable_lru_size,
            writable_count_cap: pool_defaults.writable_count_cap,
            readable_count_cap: pool_defaults.readable_count_cap,
            checkout_timeout_ms: pool_defaults.checkout_timeout.as_millis() as u64,
            max_checkout_retries: pool_defaults.max_retries,
            idle_timeout_ms: pool_defaults.idle_timeout.as_millis() as u64,
        }
    }
}

impl ManagerConfig {
    /// Parse a node's TOML config file. Missing fields fall back to
    /// `Default` (`#[serde(default)]` above), so a config only needs to
    /// name the fields it overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            writable_lru_size: self.writable_lru_size,
            readable_lru_size: self.readable_lru_size,
            writable_count_cap: self.writable_count_cap,
            readable_count_cap: self.readable_count_cap,
            checkout_timeout: Duration::from_millis(self.checkout_timeout_ms),
            max_retries: self.max_checkout_retries,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = ManagerConfig::from_toml_str(r#"cluster_name = "prod""#).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.num_replicas, ManagerConfig::default().num_replicas);
    }

    #[test]
    fn pool_config_mirrors_the_flattened_fields() {
        let mut config = ManagerConfig::default();
        config.writable_count_cap = 7;
        assert_eq!(config.pool_config().writable_count_cap, 7);
    }
}
