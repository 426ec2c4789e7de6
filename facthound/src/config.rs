use serde::*;
use serde_json::from_str;
use std::{path::Path, time::Duration};
use web3::types::Address;

use crate::{
    error::{Error, Result},
    utils::parse_address,
};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub chain: Chain,
    pub backend: BackendConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(rename = "sessionFile", default = "default_session_file")]
    pub session_file: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Chain {
    pub name: String,
    #[serde(rename = "chainId")]
    pub chain_id: String,

    pub endpoint: String,
    /// FactHound contract address
    pub contract: String,
    /// block explorer base url, e.g. https://basescan.org
    pub explorer: String,
    #[serde(rename = "pollIntervalMs", default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// http request timeout, seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WalletConfig {
    /// file holding the hex secret key; no wallet is connected when absent
    #[serde(rename = "secretFile", default)]
    pub secret_file: Option<String>,
    /// sign without asking
    #[serde(rename = "autoApprove", default)]
    pub auto_approve: bool,
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_timeout() -> u64 {
    30
}

fn default_session_file() -> String {
    "session.json".to_string()
}

impl Config {
    pub fn parse_from_file(file: &Path) -> Result<Self> {
        use std::fs::read_to_string;
        let confstr = read_to_string(file)
            .map_err(|e| Error::Config(format!("read {}: {}", file.display(), e)))?;
        let config: Self = from_str(&confstr)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.chain.endpoint.is_empty() {
            return Err(Error::Config("chain.endpoint is empty".to_string()));
        }
        if self.backend.url.is_empty() {
            return Err(Error::Config("backend.url is empty".to_string()));
        }
        self.chain_id()?;
        self.contract_address()?;
        Ok(())
    }

    pub fn chain_id(&self) -> Result<u64> {
        self.chain
            .chain_id
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::Config(format!("chainId {:?}: {}", self.chain.chain_id, e)))
    }

    pub fn contract_address(&self) -> Result<Address> {
        parse_address(&self.chain.contract)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.chain.poll_interval_ms)
    }

    pub fn show() {
        let de = Self {
            chain: Chain {
                poll_interval_ms: default_poll_interval(),
                timeout: default_timeout(),
                ..Default::default()
            },
            backend: BackendConfig {
                timeout: default_timeout(),
                ..Default::default()
            },
            session_file: default_session_file(),
            ..Default::default()
        };
        match serde_json::to_string_pretty(&de) {
            Ok(s) => println!("{}", s),
            Err(e) => log::error!("failed to render config template: {}", e),
        }
    }
}
