use crate::error::{BlockchainError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Process-wide configuration used by the binary. Library components take
/// their settings explicitly.
pub static GLOBAL_CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:3000";
static DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_TARGET_BITS: u32 = 16;

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const SEED_NODE_KEY: &str = "SEED_NODE";
const DATA_DIR_KEY: &str = "DATA_DIR";
const TARGET_BITS_KEY: &str = "TARGET_BITS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address this node listens on and announces to peers
    pub node_addr: String,
    /// Peer contacted at startup
    pub seed_node: String,
    pub data_dir: PathBuf,
    /// Leading zero bits required of a mined block hash
    pub target_bits: u32,
    /// Reward address for mined blocks
    pub mining_addr: Option<String>,
    pub mining_interval_ms: u64,
    pub dial_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_addr: DEFAULT_NODE_ADDR.to_string(),
            seed_node: DEFAULT_NODE_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            target_bits: DEFAULT_TARGET_BITS,
            mining_addr: None,
            mining_interval_ms: 10_000,
            dial_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then environment variables
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    /// Overrides fields from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            self.node_addr = addr;
        }
        if let Some(addr) = lookup(SEED_NODE_KEY) {
            self.seed_node = addr;
        }
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(bits) = lookup(TARGET_BITS_KEY) {
            self.target_bits = bits.parse().map_err(|e| {
                BlockchainError::Config(format!("{TARGET_BITS_KEY}={bits} is not a number: {e}"))
            })?;
        }
        if let Some(addr) = lookup(MINING_ADDRESS_KEY) {
            self.mining_addr = Some(addr);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.target_bits) {
            return Err(BlockchainError::Config(format!(
                "target_bits must be within 1..=255, got {}",
                self.target_bits
            )));
        }
        for (name, addr) in [("node_addr", &self.node_addr), ("seed_node", &self.seed_node)] {
            addr.parse::<SocketAddr>().map_err(|e| {
                BlockchainError::Config(format!("{name} {addr} is not a socket address: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn is_miner(&self) -> bool {
        self.mining_addr.is_some()
    }

    pub fn is_seed(&self) -> bool {
        self.node_addr == self.seed_node
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn mining_interval(&self) -> Duration {
        Duration::from_millis(self.mining_interval_ms)
    }

    /// Directory holding the sled database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.is_seed());
        assert!(!config.is_miner());
        assert_eq!(config.target_bits, DEFAULT_TARGET_BITS);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = Config::from_toml_str(
            r#"
            node_addr = "127.0.0.1:3001"
            target_bits = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.node_addr, "127.0.0.1:3001");
        assert_eq!(config.target_bits, 12);
        assert_eq!(config.seed_node, DEFAULT_NODE_ADDR);
        assert!(!config.is_seed());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("node.toml");
        fs::write(&path, "target_bits = 12\n").unwrap();

        let mut config = Config::from_toml_file(&path).unwrap();
        let vars = HashMap::from([
            (TARGET_BITS_KEY, "20"),
            (MINING_ADDRESS_KEY, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            (DATA_DIR_KEY, "/tmp/ledger"),
        ]);
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.target_bits, 20);
        assert!(config.is_miner());
        assert_eq!(config.db_path(), PathBuf::from("/tmp/ledger/blocks"));
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env(|key| (key == TARGET_BITS_KEY).then(|| "lots".to_string())),
            Err(BlockchainError::Config(_))
        ));

        config.target_bits = 0;
        assert!(config.validate().is_err());

        let config = Config {
            seed_node: "nowhere".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(BlockchainError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        assert!(matches!(
            Config::from_toml_str("target_bits = ["),
            Err(BlockchainError::Config(_))
        ));
    }
}
