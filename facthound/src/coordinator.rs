//! Bounty transaction coordinator.
//!
//! One `Coordinator` drives one logical action through
//! `Idle -> Preparing -> AwaitingSignature -> Pending -> Success | Error`.
//! The state is published on a watch channel so a view can render every
//! phase; the run itself returns the final state as data.

use std::{fmt, future::Future, sync::Arc};

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use web3::{
    contract::tokens::Tokenize,
    ethabi::Token,
    types::{Address, Bytes, H256, U256},
};

use crate::{
    api::{AnswerRecord, ChainReference, ConfirmKind, ConfirmRecord, QuestionRecord, SelectionRecord},
    backend::{Backend, BackendError},
    chain::{ChainClient, ChainError, ContractCall, TxStatus},
    contract::{BountyFunction, FactHoundContract},
    error::{Error, Result},
    session::SessionGuard,
    utils::explorer_tx_url,
};

pub const REJECTED_NOTICE: &str = "Transaction rejected in wallet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// `notice` carries the transient message left by a wallet rejection.
    Idle { notice: Option<String> },
    Preparing,
    AwaitingSignature,
    Pending { tx: H256 },
    Success { tx: H256 },
    Error { tx: Option<H256>, detail: String },
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::Idle { notice: None }
    }
}

impl TransactionState {
    pub fn hash(&self) -> Option<H256> {
        match self {
            TransactionState::Pending { tx } | TransactionState::Success { tx } => Some(*tx),
            TransactionState::Error { tx, .. } => *tx,
            _ => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            TransactionState::Error { detail, .. } => Some(detail),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<&str> {
        match self {
            TransactionState::Idle { notice } => notice.as_deref(),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, TransactionState::Idle { .. })
    }

    /// Success or Error; both accept a reset.
    pub fn is_finished(&self) -> bool {
        matches!(self, TransactionState::Success { .. } | TransactionState::Error { .. })
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Idle { notice: Some(n) } => write!(f, "{}", n),
            TransactionState::Idle { notice: None } => write!(f, "idle"),
            TransactionState::Preparing => write!(f, "preparing transaction"),
            TransactionState::AwaitingSignature => write!(f, "waiting for wallet signature"),
            TransactionState::Pending { tx } => write!(f, "pending: {:?}", tx),
            TransactionState::Success { tx } => write!(f, "success: {:?}", tx),
            TransactionState::Error { detail, .. } => write!(f, "error: {}", detail),
        }
    }
}

/// Backend call made once the transaction is confirmed. Every variant except
/// `None` carries the chain reference the backend needs to verify the event.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Question { record: QuestionRecord, chain: ChainReference },
    Answer { record: AnswerRecord, chain: ChainReference },
    Selection { record: SelectionRecord, chain: ChainReference },
    None,
}

impl Reconciliation {
    /// Creates the record tagged with `tx`, then asks the backend to confirm it.
    async fn apply(&self, backend: &dyn Backend, tx: H256) -> std::result::Result<(), BackendError> {
        let confirm = match self {
            Reconciliation::Question { record, chain } => {
                let mut record = record.clone();
                record.transaction_hash = Some(tx);
                backend.create_question(&record).await?;
                ConfirmRecord::new(ConfirmKind::Question, chain, tx)
            }
            Reconciliation::Answer { record, chain } => {
                let mut record = record.clone();
                record.transaction_hash = Some(tx);
                backend.create_answer(&record).await?;
                ConfirmRecord::new(ConfirmKind::Answer, chain, tx)
            }
            Reconciliation::Selection { record, chain } => {
                backend.create_selection(record).await?;
                ConfirmRecord::new(ConfirmKind::Selection, chain, tx)
            }
            Reconciliation::None => return Ok(()),
        };
        backend.confirm(&confirm).await?;
        Ok(())
    }
}

/// Immutable input of one coordinator run. Construction checks the arguments
/// against the contract interface, so a descriptor that exists is encodable.
#[derive(Debug, Clone)]
pub struct TransactionDescriptor {
    pub actor: Address,
    pub contract: Address,
    pub function: BountyFunction,
    pub args: Vec<Token>,
    pub value: Option<U256>,
    calldata: Bytes,
    pub on_chain_success: Reconciliation,
}

impl TransactionDescriptor {
    pub fn new(
        contract: &FactHoundContract,
        actor: Address,
        function: BountyFunction,
        args: impl Tokenize,
        value: Option<U256>,
        on_chain_success: Reconciliation,
    ) -> Result<Self> {
        let args = args.into_tokens();
        let calldata = contract.encode_call(function, &args, value)?;
        Ok(Self {
            actor,
            contract: contract.address,
            function,
            args,
            value,
            calldata,
            on_chain_success,
        })
    }

    pub fn call(&self) -> ContractCall {
        ContractCall {
            from: self.actor,
            to: self.contract,
            function: self.function,
            data: self.calldata.clone(),
            value: self.value,
        }
    }
}

pub struct Coordinator {
    chain: Arc<dyn ChainClient>,
    backend: Arc<dyn Backend>,
    explorer: String,
    state: watch::Sender<TransactionState>,
    torn_down: CancellationToken,
}

impl Coordinator {
    pub fn new(chain: Arc<dyn ChainClient>, backend: Arc<dyn Backend>, explorer: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TransactionState::default());
        Self {
            chain,
            backend,
            explorer: explorer.into(),
            state,
            torn_down: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransactionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> TransactionState {
        self.state.borrow().clone()
    }

    /// Returns a finished run to `Idle`. Refused while a run is in flight.
    pub fn reset(&self) -> bool {
        self.update(|state| {
            if state.is_finished() || state.notice().is_some() {
                *state = TransactionState::default();
                true
            } else {
                false
            }
        })
    }

    /// Stops any in-flight run; the state is `Idle` and never changes again.
    pub fn teardown(&self) {
        if self.torn_down.is_cancelled() {
            return;
        }
        debug!("coordinator torn down in state {:?}", self.snapshot());
        self.torn_down.cancel();
        self.state.send_replace(TransactionState::default());
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.is_cancelled()
    }

    /// Applies `f` under the channel lock unless torn down.
    fn update(&self, f: impl FnOnce(&mut TransactionState) -> bool) -> bool {
        let torn_down = &self.torn_down;
        self.state
            .send_if_modified(|state| !torn_down.is_cancelled() && f(state))
    }

    fn transition(&self, next: TransactionState) -> TransactionState {
        self.update(|state| {
            debug!("transaction state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
        self.snapshot()
    }

    fn fail(&self, tx: Option<H256>, detail: String) -> TransactionState {
        self.transition(TransactionState::Error { tx, detail })
    }

    /// `None` once torn down; the outcome of `fut` is then discarded.
    async fn until_torn_down<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.torn_down.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Runs one action to completion.
    ///
    /// User-facing failures end up in the returned state. Only an invalid
    /// session, a descriptor that does not match the contract, or a second
    /// run while this one is busy come back as `Err`.
    pub async fn run<F>(&self, guard: &SessionGuard, build: F) -> Result<TransactionState>
    where
        F: FnOnce() -> Result<TransactionDescriptor> + Send,
    {
        let started = self.update(|state| {
            if state.is_idle() {
                *state = TransactionState::Preparing;
                true
            } else {
                false
            }
        });
        if !started {
            if self.is_torn_down() {
                return Ok(self.snapshot());
            }
            return Err(Error::AlreadyRunning);
        }
        debug!("transaction state Idle -> Preparing");

        match self.until_torn_down(guard.ensure_valid()).await {
            None => return Ok(self.snapshot()),
            Some(Err(e)) => {
                self.transition(TransactionState::default());
                return Err(e);
            }
            Some(Ok(_)) => {}
        }

        let descriptor = match build() {
            Ok(descriptor) => descriptor,
            Err(Error::ArgumentMismatch(e)) => {
                self.transition(TransactionState::default());
                return Err(Error::ArgumentMismatch(e));
            }
            Err(e) => return Ok(self.fail(None, e.to_string())),
        };
        let function = descriptor.function;

        let prepared = match self.until_torn_down(self.chain.simulate(&descriptor.call())).await {
            None => return Ok(self.snapshot()),
            Some(Ok(prepared)) => prepared,
            Some(Err(e)) => {
                warn!("{} simulation failed: {}", function, e);
                return Ok(self.fail(None, e.to_string()));
            }
        };

        self.transition(TransactionState::AwaitingSignature);
        let tx = match self.until_torn_down(self.chain.submit(&prepared)).await {
            None => return Ok(self.snapshot()),
            Some(Ok(tx)) => tx,
            Some(Err(ChainError::UserRejected)) => {
                info!("{} rejected in wallet", function);
                return Ok(self.transition(TransactionState::Idle {
                    notice: Some(REJECTED_NOTICE.to_string()),
                }));
            }
            Some(Err(e)) => {
                warn!("{} submission failed: {}", function, e);
                return Ok(self.fail(None, e.to_string()));
            }
        };

        info!("{} pending, {}", function, explorer_tx_url(&self.explorer, &tx));
        self.transition(TransactionState::Pending { tx });

        match self.until_torn_down(self.chain.wait_for_confirmation(tx)).await {
            None => return Ok(self.snapshot()),
            Some(Ok(TxStatus::Confirmed)) => {}
            Some(Ok(TxStatus::Reverted)) => {
                warn!("{} reverted: {:?}", function, tx);
                return Ok(self.fail(Some(tx), format!("Transaction {:?} reverted on-chain", tx)));
            }
            Some(Err(e)) => {
                warn!("{} confirmation failed: {}", function, e);
                return Ok(self.fail(Some(tx), format!("Could not confirm transaction {:?}: {}", tx, e)));
            }
        }

        match self
            .until_torn_down(descriptor.on_chain_success.apply(self.backend.as_ref(), tx))
            .await
        {
            None => return Ok(self.snapshot()),
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("{} confirmed in {:?} but reconciliation failed: {}", function, tx, e);
                return Ok(self.fail(
                    Some(tx),
                    format!(
                        "Transaction {:?} was confirmed on-chain but the record was not saved: {}",
                        tx, e
                    ),
                ));
            }
        }

        Ok(self.transition(TransactionState::Success { tx }))
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.torn_down.cancel();
    }
}
