//! In-memory chain, backend, and wallet for coordinator and policy tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, RwLock,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use web3::types::{Address, H256, U256};

use crate::{
    api::{AnswerRecord, ConfirmRecord, QuestionRecord, RecordResponse, ReplyRecord, SelectionRecord, WhoAmI},
    backend::{Backend, BackendError},
    chain::{ChainClient, ChainError, ContractCall, PreparedCall, TxStatus},
    wallet::Wallet,
};

pub const FAKE_TX: H256 = H256([0x7a; 32]);

#[derive(Default)]
pub struct FakeChain {
    pub simulate_error: Mutex<Option<String>>,
    pub reject_signature: AtomicBool,
    pub revert: AtomicBool,
    /// Submission blocks until `release_confirmation` when set, like a wallet
    /// prompt left open.
    pub hold_signature: AtomicBool,
    /// Confirmation blocks until `release_confirmation` when set.
    pub hold_confirmation: AtomicBool,
    released: Notify,
    pub simulated: Mutex<Vec<ContractCall>>,
    pub submitted: AtomicUsize,
    pub waited: AtomicUsize,
}

impl FakeChain {
    pub fn failing_simulation(reason: &str) -> Self {
        let chain = Self::default();
        *chain.simulate_error.lock().unwrap() = Some(reason.to_string());
        chain
    }

    pub fn release_confirmation(&self) {
        self.released.notify_one();
    }

    pub fn simulated(&self) -> Vec<ContractCall> {
        self.simulated.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.simulated.lock().unwrap().len()
            + self.submitted.load(Ordering::SeqCst)
            + self.waited.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn simulate(&self, call: &ContractCall) -> Result<PreparedCall, ChainError> {
        self.simulated.lock().unwrap().push(call.clone());
        if let Some(reason) = self.simulate_error.lock().unwrap().clone() {
            return Err(ChainError::Simulation(reason));
        }
        Ok(PreparedCall {
            call: call.clone(),
            gas: U256::from(100_000),
        })
    }

    async fn submit(&self, _request: &PreparedCall) -> Result<H256, ChainError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.hold_signature.load(Ordering::SeqCst) {
            self.released.notified().await;
        }
        if self.reject_signature.load(Ordering::SeqCst) {
            return Err(ChainError::UserRejected);
        }
        Ok(FAKE_TX)
    }

    async fn wait_for_confirmation(&self, _tx: H256) -> Result<TxStatus, ChainError> {
        self.waited.fetch_add(1, Ordering::SeqCst);
        if self.hold_confirmation.load(Ordering::SeqCst) {
            self.released.notified().await;
        }
        if self.revert.load(Ordering::SeqCst) {
            Ok(TxStatus::Reverted)
        } else {
            Ok(TxStatus::Confirmed)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Question(QuestionRecord),
    Answer(AnswerRecord),
    Reply(ReplyRecord),
    Selection(SelectionRecord),
    Confirm(ConfirmRecord),
}

pub struct FakeBackend {
    pub session_valid: AtomicBool,
    pub reject_records: AtomicBool,
    /// Fails only `confirm`; record creation still succeeds.
    pub reject_confirm: AtomicBool,
    pub who_am_i_calls: AtomicUsize,
    pub calls: Mutex<Vec<BackendCall>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            session_valid: AtomicBool::new(true),
            reject_records: AtomicBool::new(false),
            reject_confirm: AtomicBool::new(false),
            who_am_i_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: BackendCall) -> Result<RecordResponse, BackendError> {
        self.calls.lock().unwrap().push(call);
        if self.reject_records.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("hash mismatch".to_string()));
        }
        Ok(RecordResponse {
            message: Some("question posted, success".to_string()),
            thread: Some(1),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn who_am_i(&self) -> Result<WhoAmI, BackendError> {
        self.who_am_i_calls.fetch_add(1, Ordering::SeqCst);
        if !self.session_valid.load(Ordering::SeqCst) {
            return Ok(WhoAmI {
                code: Some("token_not_valid".to_string()),
                ..Default::default()
            });
        }
        Ok(WhoAmI {
            username: Some("alice".to_string()),
            ..Default::default()
        })
    }

    async fn create_question(&self, record: &QuestionRecord) -> Result<RecordResponse, BackendError> {
        self.record(BackendCall::Question(record.clone()))
    }

    async fn create_answer(&self, record: &AnswerRecord) -> Result<RecordResponse, BackendError> {
        self.record(BackendCall::Answer(record.clone()))
    }

    async fn post_reply(&self, record: &ReplyRecord) -> Result<RecordResponse, BackendError> {
        self.record(BackendCall::Reply(record.clone()))
    }

    async fn create_selection(&self, record: &SelectionRecord) -> Result<RecordResponse, BackendError> {
        self.record(BackendCall::Selection(*record))
    }

    async fn confirm(&self, record: &ConfirmRecord) -> Result<RecordResponse, BackendError> {
        if self.reject_confirm.load(Ordering::SeqCst) {
            self.calls.lock().unwrap().push(BackendCall::Confirm(record.clone()));
            return Err(BackendError::Rejected("confirmation unsuccessful".to_string()));
        }
        self.record(BackendCall::Confirm(record.clone()))
    }
}

pub struct FakeWallet {
    account: RwLock<Option<Address>>,
}

impl FakeWallet {
    pub fn connected(account: Address) -> Self {
        Self {
            account: RwLock::new(Some(account)),
        }
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    fn account(&self) -> Option<Address> {
        *self.account.read().unwrap()
    }

    async fn send_transaction(&self, _request: &PreparedCall) -> Result<H256, ChainError> {
        Ok(FAKE_TX)
    }

    fn sign_message(&self, _message: &str) -> Result<String, ChainError> {
        Ok(format!("0x{}", "00".repeat(65)))
    }

    fn disconnect(&self) {
        self.account.write().unwrap().take();
    }
}
