use alloy::primitives::U256;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    pub security: SecurityConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Used when gas estimation fails.
    pub default_gas_limit: u64,
    pub max_gas_price: Option<u64>,
    pub priority_fee: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allow_write_operations: bool,
    /// Upper bound on the wei attached to a single transaction.
    pub max_transaction_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// How often live log feeds poll for new blocks.
    pub poll_interval_ms: u64,
    /// Capacity of the channel between a log feed and its consumer.
    pub log_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            log_buffer: 128,
        }
    }
}

impl SecurityConfig {
    /// Reject a state-changing operation that the configuration does not
    /// permit.
    pub fn check_write(&self, value: U256) -> Result<()> {
        if !self.allow_write_operations {
            return Err(anyhow!(
                "Write operations are disabled. Set security.allow_write_operations = true or pass --allow-writes"
            ));
        }

        if let Some(max) = &self.max_transaction_value {
            let max = U256::from_str_radix(max.trim(), 10)
                .map_err(|_| anyhow!("Invalid security.max_transaction_value: '{}'", max))?;
            if value > max {
                return Err(anyhow!(
                    "Transaction value {} wei exceeds the configured maximum of {} wei",
                    value,
                    max
                ));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 1,
                explorer_url: Some("https://etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 300000,
                    max_gas_price: Some(50_000_000_000), // 50 Gwei
                    priority_fee: Some(2_000_000_000),   // 2 Gwei
                },
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-sepolia.g.alchemy.com/v2/demo".to_string(),
                chain_id: 11155111,
                explorer_url: Some("https://sepolia.etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 300000,
                    max_gas_price: Some(20_000_000_000), // 20 Gwei
                    priority_fee: Some(1_000_000_000),   // 1 Gwei
                },
            },
        );

        networks.insert(
            "local".to_string(),
            NetworkConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                explorer_url: None,
                gas: GasConfig {
                    default_gas_limit: 3_000_000,
                    max_gas_price: None,
                    priority_fee: None,
                },
            },
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            security: SecurityConfig {
                allow_write_operations: false,
                max_transaction_value: None,
            },
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    /// Substitute `ALCHEMY_API_KEY` into Alchemy RPC URLs.
    fn apply_env_vars(&mut self) {
        match std::env::var("ALCHEMY_API_KEY") {
            Ok(api_key) => self.apply_alchemy_key(&api_key),
            Err(_) => {
                for (network_name, network_config) in &self.networks {
                    if network_config.rpc_url.contains("/demo") {
                        tracing::warn!("Using demo RPC endpoint for {}, set ALCHEMY_API_KEY environment variable for better reliability", network_name);
                    }
                }
            }
        }
    }

    fn apply_alchemy_key(&mut self, api_key: &str) {
        tracing::info!("Using ALCHEMY_API_KEY environment variable for RPC URLs");

        for (network_name, network_config) in &mut self.networks {
            if network_config.rpc_url.contains("alchemy.com/v2/demo") {
                network_config.rpc_url = network_config
                    .rpc_url
                    .replace("/demo", &format!("/{}", api_key));
                tracing::debug!("Updated {} RPC URL with API key", network_name);
            } else if network_config.rpc_url.contains("YOUR_API_KEY_HERE") {
                network_config.rpc_url = network_config
                    .rpc_url
                    .replace("YOUR_API_KEY_HERE", api_key);
                tracing::debug!("Updated {} RPC URL with API key", network_name);
            }
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# contract-bind configuration file
# Networks, write permissions and live event feed settings

# Default network to use when none is specified
default_network = "ethereum"

[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
default_gas_limit = 300000
max_gas_price = 50_000_000_000  # 50 Gwei
priority_fee = 2_000_000_000    # 2 Gwei

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
default_gas_limit = 300000
max_gas_price = 20_000_000_000  # 20 Gwei
priority_fee = 1_000_000_000    # 1 Gwei

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.local.gas]
default_gas_limit = 3_000_000

# Security settings
[security]
allow_write_operations = false
# max_transaction_value = "1000000000000000000"  # 1 ETH in wei

# Live event feeds
[events]
poll_interval_ms = 2000
log_buffer = 128

# Environment variables that can be used:
# ETHERSCAN_API_KEY - Your Etherscan API key for ABI resolution
# ALCHEMY_API_KEY - Your Alchemy API key (replace YOUR_API_KEY_HERE above)
# PRIVATE_KEY - Signing key for send and deploy
"#;
        sample_config.to_string()
    }
}
