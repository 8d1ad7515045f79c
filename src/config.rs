//! Configuration management for the bridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::types::{CellDep, Chain, HashType, H160, H256};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub ckb: CkbConfig,
    pub multisig: MultisigConfig,
    #[serde(default)]
    pub chains: BTreeMap<Chain, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Sleep between ticks when a loop found nothing to do
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Backoff after a failed tick
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Interval between commitment status polls
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }
}

fn default_error_backoff_ms() -> u64 {
    5_000
}

fn default_confirm_poll_ms() -> u64 {
    3_000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    /// Volatile in-process ledger, for local runs only
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: DatabaseBackend,
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

fn default_backend() -> DatabaseBackend {
    DatabaseBackend::Postgres
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTemplate {
    pub code_hash: H256,
    pub hash_type: HashType,
}

/// Deployed bridge scripts on CKB
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    pub sudt_type: ScriptTemplate,
    pub bridge_lock: ScriptTemplate,
    pub recipient_type: ScriptTemplate,
    pub multisig_lock: ScriptTemplate,
    #[serde(default)]
    pub cell_deps: Vec<CellDep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CkbConfig {
    pub rpc_url: String,
    pub indexer_url: String,
    #[serde(default)]
    pub start_height: u64,
    pub confirm_timeout_secs: u64,
    pub sync_timeout_secs: u64,
    pub fee: u64,
    pub min_change_capacity: u64,
    pub sudt_cell_capacity: u64,
    pub bridge_cell_capacity: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    pub scripts: ScriptsConfig,
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: H160,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultisigConfig {
    pub threshold: u8,
    #[serde(default)]
    pub require_first_n: u8,
    pub members: Vec<H160>,
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Deadline of one signing round
    pub timeout_secs: u64,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

/// One external chain, reached through its adapter service
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub enabled: bool,
    pub rpc_url: String,
    /// Defaults to `rpc_url` when the adapter serves both
    pub indexer_url: Option<String>,
    pub custody_address: String,
    #[serde(default)]
    pub start_height: u64,
    pub fee: u64,
    pub min_change_capacity: u64,
    pub token_cell_capacity: u64,
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_sync_timeout_secs() -> u64 {
    60
}

impl ChainConfig {
    pub fn indexer_url(&self) -> &str {
        self.indexer_url.as_deref().unwrap_or(&self.rpc_url)
    }
}

impl Settings {
    /// Load settings from the file named by `RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let members = &self.multisig.members;
        if self.multisig.threshold == 0 || self.multisig.threshold as usize > members.len() {
            anyhow::bail!(
                "Multisig threshold {} must be between 1 and {} members",
                self.multisig.threshold,
                members.len()
            );
        }
        for peer in &self.multisig.peers {
            if !members.contains(&peer.id) {
                anyhow::bail!("Peer {:#x} at {} is not a multisig member", peer.id, peer.url);
            }
        }

        if self.database.backend == DatabaseBackend::Postgres && self.database.url.is_empty() {
            anyhow::bail!("Postgres backend needs database.url");
        }
        if self.relayer.batch_size == 0 {
            anyhow::bail!("relayer.batch_size must be positive");
        }

        if self.chains.contains_key(&Chain::Ckb) {
            anyhow::bail!("CKB is configured in [ckb], not under [chains]");
        }
        for (chain, config) in self.enabled_chains() {
            if config.rpc_url.is_empty() {
                anyhow::bail!("Chain {} has no RPC URL configured", chain);
            }
            if config.custody_address.is_empty() {
                anyhow::bail!("Chain {} has no custody address configured", chain);
            }
        }
        if self.enabled_chains().is_empty() {
            tracing::warn!("No external chain enabled, only burns will be recorded");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(Chain, &ChainConfig)> {
        self.chains
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(chain, c)| (*chain, c))
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid pattern");
    }
    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn unset_variables_become_empty() {
        let result = substitute_env_vars("a=\"${CKB_BRIDGE_SURELY_UNSET_VAR}\"");
        assert_eq!(result, "a=\"\"");
    }

    const MEMBER_A: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";
    const MEMBER_B: &str = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf";

    fn sample(threshold: u8, peer: &str) -> String {
        format!(
            r#"
[relayer]
instance_id = "relayer-1"
poll_interval_ms = 1000
batch_size = 50
max_retries = 3
retry_delay_ms = 500

[database]
url = "${{CKB_BRIDGE_TEST_DB_URL}}"
max_connections = 10
min_connections = 1

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = true
port = 9090

[ckb]
rpc_url = "http://127.0.0.1:8114"
indexer_url = "http://127.0.0.1:8116"
confirm_timeout_secs = 120
sync_timeout_secs = 60
fee = 100000
min_change_capacity = 6400000000
sudt_cell_capacity = 30000000000
bridge_cell_capacity = 10000000000

[ckb.scripts.sudt_type]
code_hash = "0x{h1}"
hash_type = "type"

[ckb.scripts.bridge_lock]
code_hash = "0x{h2}"
hash_type = "data"

[ckb.scripts.recipient_type]
code_hash = "0x{h3}"
hash_type = "type"

[ckb.scripts.multisig_lock]
code_hash = "0x{h4}"
hash_type = "type"

[multisig]
threshold = {threshold}
members = ["{MEMBER_A}", "{MEMBER_B}"]
timeout_secs = 30

[[multisig.peers]]
id = "{peer}"
url = "http://10.0.0.2:8080"

[chains.btc]
enabled = true
rpc_url = "http://127.0.0.1:9000"
custody_address = "bc1qcustody"
fee = 500
min_change_capacity = 546
token_cell_capacity = 546
confirm_timeout_secs = 600
"#,
            h1 = "11".repeat(32),
            h2 = "22".repeat(32),
            h3 = "33".repeat(32),
            h4 = "44".repeat(32),
        )
    }

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_sample_config() {
        env::set_var("CKB_BRIDGE_TEST_DB_URL", "postgres://relayer@localhost/bridge");
        let file = write(&sample(2, MEMBER_B));
        let settings = Settings::load_from(file.path()).unwrap();

        assert_eq!(settings.database.url, "postgres://relayer@localhost/bridge");
        assert_eq!(settings.database.backend, DatabaseBackend::Postgres);
        assert_eq!(settings.multisig.private_key_env, "RELAYER_PRIVATE_KEY");
        assert_eq!(settings.ckb.scripts.bridge_lock.hash_type, HashType::Data);
        assert_eq!(settings.relayer.error_backoff_ms, 5_000);

        let chains = settings.enabled_chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].0, Chain::Btc);
        assert_eq!(chains[0].1.indexer_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn threshold_above_members_is_rejected() {
        env::set_var("CKB_BRIDGE_TEST_DB_URL", "postgres://relayer@localhost/bridge");
        let file = write(&sample(3, MEMBER_B));
        assert!(Settings::load_from(file.path()).is_err());
    }

    #[test]
    fn unknown_peer_is_rejected() {
        env::set_var("CKB_BRIDGE_TEST_DB_URL", "postgres://relayer@localhost/bridge");
        let file = write(&sample(2, "0x0000000000000000000000000000000000000009"));
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("not a multisig member"));
    }
}
