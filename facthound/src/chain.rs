//! Chain boundary: simulate, submit, and watch a contract call.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use web3::types::{Address, Bytes, CallRequest, H256, U256};

use crate::{contract::BountyFunction, wallet::Wallet, BlockClient};

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    /// The node says the call would revert (or cannot be paid for).
    #[error("transaction simulation failed: {0}")]
    Simulation(String),
    /// The wallet holder declined to sign.
    #[error("transaction rejected in wallet")]
    UserRejected,
    #[error("transaction submission failed: {0}")]
    Submission(String),
    #[error("chain transport error: {0}")]
    Transport(String),
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Reverted,
}

/// A contract call ready for simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    pub from: Address,
    pub to: Address,
    pub function: BountyFunction,
    pub data: Bytes,
    pub value: Option<U256>,
}

impl ContractCall {
    pub fn call_request(&self) -> CallRequest {
        CallRequest {
            from: Some(self.from),
            to: Some(self.to),
            value: self.value,
            data: Some(self.data.clone()),
            ..Default::default()
        }
    }
}

/// A call that passed simulation, with the gas limit to submit it with.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub call: ContractCall,
    pub gas: U256,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn simulate(&self, call: &ContractCall) -> Result<PreparedCall, ChainError>;

    /// Hands the call to the wallet; resolves once it is signed and broadcast.
    async fn submit(&self, request: &PreparedCall) -> Result<H256, ChainError>;

    /// Resolves once the transaction is mined. Dropping the future stops watching.
    async fn wait_for_confirmation(&self, tx: H256) -> Result<TxStatus, ChainError>;
}

pub struct Web3Chain {
    client: Arc<BlockClient>,
    wallet: Option<Arc<dyn Wallet>>,
    poll_interval: Duration,
}

impl Web3Chain {
    pub fn new(client: Arc<BlockClient>, wallet: Option<Arc<dyn Wallet>>, poll_interval: Duration) -> Self {
        Self {
            client,
            wallet,
            poll_interval,
        }
    }
}

/// Estimated gas plus a 20% margin.
fn gas_with_margin(estimate: U256) -> U256 {
    estimate.saturating_add(estimate / 5)
}

#[async_trait]
impl ChainClient for Web3Chain {
    async fn simulate(&self, call: &ContractCall) -> Result<PreparedCall, ChainError> {
        let request = call.call_request();

        // eth_call surfaces the revert reason; estimate_gas sizes the real submission
        self.client
            .eth
            .call(request.clone(), None)
            .await
            .map_err(|e| ChainError::Simulation(e.to_string()))?;
        let estimate = self
            .client
            .eth
            .estimate_gas(request, None)
            .await
            .map_err(|e| ChainError::Simulation(e.to_string()))?;
        debug!("{} from {:?} estimated gas {}", call.function, call.from, estimate);

        Ok(PreparedCall {
            call: call.clone(),
            gas: gas_with_margin(estimate),
        })
    }

    async fn submit(&self, request: &PreparedCall) -> Result<H256, ChainError> {
        match &self.wallet {
            Some(wallet) => wallet.send_transaction(request).await,
            None => Err(ChainError::Submission("no wallet connected".to_string())),
        }
    }

    async fn wait_for_confirmation(&self, tx: H256) -> Result<TxStatus, ChainError> {
        let receipt = self.client.wait_for_tx_receipt(tx, self.poll_interval).await;
        match receipt.status.map(|s| s.as_u64()) {
            Some(1) => Ok(TxStatus::Confirmed),
            Some(_) => Ok(TxStatus::Reverted),
            None => {
                // pre-Byzantium receipts carry no status
                warn!("receipt for {:?} has no status field, treating as reverted", tx);
                Ok(TxStatus::Reverted)
            }
        }
    }
}
