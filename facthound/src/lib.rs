pub mod api;
pub mod backend;
pub mod chain;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod error;
pub mod hasher;
pub mod policy;
pub mod session;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::{Error, Result};
use config::Config;
use log::{info, warn};
use reqwest::{Client, Url};
use std::time::Duration;
use web3::{
    self,
    api::{Accounts, Eth},
    transports::Http,
    types::{TransactionReceipt, H256, U256, U64},
};

pub use coordinator::{Coordinator, TransactionDescriptor, TransactionState};
pub use hasher::ContentHash;

/// Connection to the chain's JSON-RPC node.
#[derive(Debug, Clone)]
pub struct BlockClient {
    pub web3: web3::Web3<Http>,
    pub eth: Eth<Http>,
    pub accounts: Accounts<Http>,
}

impl BlockClient {
    pub fn setup(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.chain.timeout))
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        let url = Url::parse(config.chain.endpoint.as_str())
            .map_err(|e| Error::Config(format!("chain endpoint {:?}: {}", config.chain.endpoint, e)))?;
        let transport = Http::with_client(client, url);
        let web3 = web3::Web3::new(transport);
        let eth = web3.eth();
        let accounts = web3.accounts();

        Ok(Self { web3, eth, accounts })
    }

    pub async fn chain_id(&self) -> Result<U256> {
        Ok(self.eth.chain_id().await?)
    }

    pub async fn block_number(&self) -> Result<U64> {
        Ok(self.eth.block_number().await?)
    }

    /// Verifies the node serves the configured chain.
    pub async fn check_chain(&self, config: &Config) -> Result<()> {
        let chain_id = self.chain_id().await?;
        if chain_id != U256::from(config.chain_id()?) {
            return Err(Error::CheckChainErr);
        }
        let block = self.block_number().await?;
        info!(
            "chain_name:{:?}, chain_id:{}, block_num:{}, endpoint:{:?}, contract:{:?}",
            config.chain.name, chain_id, block, config.chain.endpoint, config.chain.contract
        );
        Ok(())
    }

    pub async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        Ok(self.eth.transaction_receipt(hash).await?)
    }

    /// Polls until the receipt appears. There is no upper bound; drop the
    /// future to stop watching.
    pub async fn wait_for_tx_receipt(&self, hash: H256, interval: Duration) -> TransactionReceipt {
        let mut tries = 1u64;
        loop {
            match self.transaction_receipt(hash).await {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => {}
                Err(e) => warn!("failed to get receipt for {:?}, tries {}, {}", hash, tries, e),
            }
            tries += 1;
            tokio::time::sleep(interval).await;
        }
    }
}
