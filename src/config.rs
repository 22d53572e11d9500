use std::fs;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::{utils::parse_ether, Address, U256};
use hex_literal::hex;
use serde::{Deserialize, Serialize};

use crate::errors::{ClientError, ClientResult};

/// Client configuration, loaded from TOML.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub contract: ContractConfig,
    pub polling: PollingConfig,
}

/// The single network the sale lives on.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Shown to the user when asking them to switch.
    pub name: String,
    pub chain_id: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "rinkeby".into(),
            chain_id: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContractConfig {
    pub address: Address,
    pub max_supply: u64,
    /// Price per token in ether, e.g. `"0.01"`.
    pub mint_price: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: Address::new(hex!("5fbdb2315678afecb367f032d93f642f64180aa3")),
            max_supply: 20,
            mint_price: "0.01".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    /// Presale start/end detection cadence.
    pub phase_interval_ms: u64,
    /// Minted-count cadence. Keeps running after the presale ends.
    pub token_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            phase_interval_ms: 5_000,
            token_interval_ms: 5_000,
        }
    }
}

impl PollingConfig {
    pub fn phase_interval(&self) -> Duration {
        Duration::from_millis(self.phase_interval_ms)
    }

    pub fn token_interval(&self) -> Duration {
        Duration::from_millis(self.token_interval_ms)
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| ClientError::Config(format!("unable to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ClientResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ClientError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.network.chain_id == 0 {
            return Err(ClientError::Config("network.chain_id must be non-zero".into()));
        }
        if self.contract.address == Address::ZERO {
            return Err(ClientError::Config("contract.address must be set".into()));
        }
        if self.contract.max_supply == 0 {
            return Err(ClientError::Config("contract.max_supply must be positive".into()));
        }
        if self.polling.phase_interval_ms == 0 || self.polling.token_interval_ms == 0 {
            return Err(ClientError::Config("polling intervals must be positive".into()));
        }
        self.mint_price_wei()?;
        Ok(())
    }

    pub fn mint_price_wei(&self) -> ClientResult<U256> {
        parse_ether(&self.contract.mint_price).map_err(|err| {
            ClientError::Config(format!(
                "invalid contract.mint_price {:?}: {err}",
                self.contract.mint_price
            ))
        })
    }
}
