use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::ClientConfig;
use crate::orchestrator::{FarmSettings, SyncConfig};

// Limits for user-supplied values
const MAX_WINDOW_SIZE: u32 = 64;
const MAX_MINING_DURATION_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub signer: SignerConfig,
    pub farm: FarmConfig,
    pub sync: SyncSection,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub bridge_url: String,
    // Prefer KALE_BRIDGE_API_KEY over storing the key here
    #[serde(default)]
    pub api_key: Option<String>,
    /// Long enough for a human to approve in the wallet
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    /// Entry stake in stroops
    #[serde(default)]
    pub stake_amount: i64,
    pub mining_duration_ms: u64,
    pub mining_chunk_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    pub poll_interval_secs: u64,
    pub window_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Session file (identity and known identities)
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("kale_farmer").join("session.json"))
        .unwrap_or_else(|| PathBuf::from("kale_farmer_session.json"))
}

impl Default for Config {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            gateway: GatewayConfig {
                base_url: client.base_url,
                request_timeout_secs: client.request_timeout,
            },
            signer: SignerConfig {
                bridge_url: "http://localhost:8787".to_string(),
                api_key: None,
                timeout_secs: 300,
            },
            farm: FarmConfig {
                stake_amount: 0,
                mining_duration_ms: 10_000,
                mining_chunk_ms: 100,
            },
            sync: SyncSection {
                poll_interval_secs: 5,
                window_size: 5,
            },
            storage: StorageConfig {
                path: default_storage_path(),
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.poll_interval_secs == 0 {
            bail!("sync.poll_interval_secs must be at least 1");
        }
        if self.sync.window_size == 0 || self.sync.window_size > MAX_WINDOW_SIZE {
            bail!("sync.window_size must be between 1 and {}", MAX_WINDOW_SIZE);
        }
        if self.farm.mining_duration_ms == 0 || self.farm.mining_duration_ms > MAX_MINING_DURATION_MS {
            bail!(
                "farm.mining_duration_ms must be between 1 and {}",
                MAX_MINING_DURATION_MS
            );
        }
        if self.farm.mining_chunk_ms == 0 {
            bail!("farm.mining_chunk_ms must be at least 1");
        }
        if self.farm.stake_amount < 0 {
            bail!("farm.stake_amount cannot be negative");
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.gateway.base_url.clone(),
            request_timeout: self.gateway.request_timeout_secs,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.sync.poll_interval_secs),
            window_size: self.sync.window_size,
        }
    }

    pub fn farm_settings(&self) -> FarmSettings {
        FarmSettings {
            stake_amount: i128::from(self.farm.stake_amount),
            mining_duration: Duration::from_millis(self.farm.mining_duration_ms),
        }
    }

    pub fn mining_chunk(&self) -> Duration {
        Duration::from_millis(self.farm.mining_chunk_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.sync_config().poll_interval, Duration::from_secs(5));
        assert_eq!(config.sync_config().window_size, 5);
        assert_eq!(config.farm_settings().mining_duration, Duration::from_millis(10_000));
        assert_eq!(config.mining_chunk(), Duration::from_millis(100));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("kale_farmer_cfg_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.farm.stake_amount = 10_000_000_000;
        config.signer.api_key = Some("secret".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.farm.stake_amount, 10_000_000_000);
        assert_eq!(loaded.signer.api_key.as_deref(), Some("secret"));
        assert_eq!(loaded.storage.path, config.storage.path);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.sync.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.farm.mining_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let path = std::env::temp_dir().join(format!("missing_{}.toml", uuid::Uuid::new_v4()));
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.sync.window_size, 5);
    }
}
