use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use log::info;
use web3::{
    api::{Accounts, Eth},
    signing::SecretKey,
    transports::Http,
    types::{Address, TransactionParameters, H256},
};

use crate::{
    chain::{ChainError, PreparedCall},
    utils::address_of,
    BlockClient,
};

/// The connected wallet: an account plus the ability to sign for it.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// `None` once disconnected.
    fn account(&self) -> Option<Address>;

    /// Asks the holder to approve, then signs and broadcasts the call.
    async fn send_transaction(&self, request: &PreparedCall) -> Result<H256, ChainError>;

    /// Personal-message signature (EIP-191), hex encoded with `0x`.
    fn sign_message(&self, message: &str) -> Result<String, ChainError>;

    fn disconnect(&self);
}

/// Decides whether the holder signs a given call. Waiting on the holder must
/// yield to the runtime so teardown can drop a pending approval.
#[async_trait]
pub trait Approval: Send + Sync {
    async fn approve(&self, request: &PreparedCall) -> bool;
}

/// Signs every call without asking.
pub struct AutoApprove;

#[async_trait]
impl Approval for AutoApprove {
    async fn approve(&self, _request: &PreparedCall) -> bool {
        true
    }
}

/// A wallet backed by a local secp256k1 key.
pub struct LocalWallet {
    eth: Eth<Http>,
    accounts: Accounts<Http>,
    chain_id: u64,
    key: RwLock<Option<SecretKey>>,
    approval: Box<dyn Approval>,
}

impl LocalWallet {
    pub fn new(client: &BlockClient, chain_id: u64, key: SecretKey, approval: Box<dyn Approval>) -> Self {
        Self {
            eth: client.eth.clone(),
            accounts: client.accounts.clone(),
            chain_id,
            key: RwLock::new(Some(key)),
            approval,
        }
    }

    fn key(&self) -> Option<SecretKey> {
        *self.key.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn account(&self) -> Option<Address> {
        self.key().map(|key| address_of(&key))
    }

    async fn send_transaction(&self, request: &PreparedCall) -> Result<H256, ChainError> {
        let key = self
            .key()
            .ok_or_else(|| ChainError::Submission("wallet disconnected".to_string()))?;

        if !self.approval.approve(request).await {
            return Err(ChainError::UserRejected);
        }

        let tx = TransactionParameters {
            to: Some(request.call.to),
            gas: request.gas,
            value: request.call.value.unwrap_or_default(),
            data: request.call.data.clone(),
            chain_id: Some(self.chain_id),
            ..Default::default()
        };
        let signed = self
            .accounts
            .sign_transaction(tx, &key)
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?;
        self.eth
            .send_raw_transaction(signed.raw_transaction)
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))
    }

    fn sign_message(&self, message: &str) -> Result<String, ChainError> {
        let key = self
            .key()
            .ok_or_else(|| ChainError::Submission("wallet disconnected".to_string()))?;
        let signed = self.accounts.sign(message, &key);
        Ok(format!("0x{}", hex::encode(signed.signature.0)))
    }

    fn disconnect(&self) {
        let mut key = self.key.write().unwrap_or_else(PoisonError::into_inner);
        if key.take().is_some() {
            info!("wallet disconnected");
        }
    }
}
