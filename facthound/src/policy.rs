//! User actions and how each one reaches the chain and the backend.
//!
//! A policy decides between the direct backend path and a coordinator run,
//! builds the contract call, and names the record that finalizes it.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use log::{debug, info};
use web3::types::{Address, U256};

use crate::{
    api::{AnswerRecord, ChainReference, Post, QuestionRecord, RecordResponse, ReplyRecord, SelectionRecord},
    backend::Backend,
    contract::{AnswerData, BountyFunction, FactHoundContract, QuestionData},
    coordinator::{Coordinator, Reconciliation, TransactionDescriptor, TransactionState},
    error::{Error, Result},
    hasher::ContentHash,
    session::SessionGuard,
    wallet::Wallet,
};

/// What a policy needs to act for the current user.
pub struct ActionContext {
    pub backend: Arc<dyn Backend>,
    pub guard: Arc<SessionGuard>,
    pub wallet: Option<Arc<dyn Wallet>>,
    pub contract: FactHoundContract,
}

impl ActionContext {
    /// The connected wallet account, if any.
    pub fn actor(&self) -> Option<Address> {
        self.wallet.as_ref().and_then(|w| w.account())
    }

    /// The contract a post was created under, or the configured one.
    fn contract_for(&self, post: &Post) -> Result<FactHoundContract> {
        Ok(match post.contract_address()? {
            Some(address) => self.contract.at(address),
            None => self.contract.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Handled by the backend alone.
    Recorded(RecordResponse),
    /// Ran through the coordinator; the final state.
    OnChain(TransactionState),
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Recorded(resp) => write!(f, "{}", resp),
            ActionOutcome::OnChain(state) => write!(f, "{}", state),
        }
    }
}

#[async_trait]
pub trait ActionPolicy: Send + Sync {
    async fn execute(&self, ctx: &ActionContext, coordinator: &Coordinator) -> Result<ActionOutcome>;
}

/// Posts a question; a non-zero bounty is escrowed on-chain with it.
#[derive(Debug, Clone)]
pub struct CreateQuestion {
    pub topic: String,
    pub text: String,
    pub tags: Vec<String>,
    pub bounty: U256,
}

#[async_trait]
impl ActionPolicy for CreateQuestion {
    async fn execute(&self, ctx: &ActionContext, coordinator: &Coordinator) -> Result<ActionOutcome> {
        let record = QuestionRecord::new(self.topic.clone(), self.text.clone(), self.tags.clone());
        if self.bounty.is_zero() {
            ctx.guard.ensure_valid().await?;
            debug!("question without bounty, posting off-chain");
            let resp = ctx.backend.create_question(&record).await?;
            return Ok(ActionOutcome::Recorded(resp));
        }

        let state = coordinator
            .run(&ctx.guard, || {
                let actor = ctx.actor().ok_or(Error::WalletNotConnected)?;
                let question_hash = ContentHash::derive(actor, &self.text);
                let chain = ChainReference {
                    contract: ctx.contract.address,
                    question_hash,
                    answer_hash: None,
                };
                TransactionDescriptor::new(
                    &ctx.contract,
                    actor,
                    BountyFunction::CreateQuestion,
                    QuestionData { question_hash },
                    Some(self.bounty),
                    Reconciliation::Question {
                        record: record.with_chain(chain.contract, question_hash),
                        chain,
                    },
                )
            })
            .await?;
        Ok(ActionOutcome::OnChain(state))
    }
}

/// Answers a question; on-chain only when the question itself is.
#[derive(Debug, Clone)]
pub struct SubmitAnswer {
    pub thread: u64,
    pub question: Post,
    pub text: String,
}

#[async_trait]
impl ActionPolicy for SubmitAnswer {
    async fn execute(&self, ctx: &ActionContext, coordinator: &Coordinator) -> Result<ActionOutcome> {
        let question_id = self
            .question
            .question_id
            .ok_or_else(|| Error::NotFound(format!("post {} is not a question", self.question.id)))?;
        let record = AnswerRecord::new(self.thread, question_id, self.text.clone());

        let question_hash = match self.question.question_hash()? {
            Some(hash) => hash,
            None => {
                ctx.guard.ensure_valid().await?;
                debug!("question {} is off-chain, answering off-chain", question_id);
                let resp = ctx.backend.create_answer(&record).await?;
                return Ok(ActionOutcome::Recorded(resp));
            }
        };
        let contract = ctx.contract_for(&self.question)?;

        let state = coordinator
            .run(&ctx.guard, || {
                let actor = ctx.actor().ok_or(Error::WalletNotConnected)?;
                let answer_hash = ContentHash::derive(actor, &self.text);
                let chain = ChainReference {
                    contract: contract.address,
                    question_hash,
                    answer_hash: Some(answer_hash),
                };
                TransactionDescriptor::new(
                    &contract,
                    actor,
                    BountyFunction::CreateAnswer,
                    AnswerData {
                        question_hash,
                        answer_hash,
                    },
                    None,
                    Reconciliation::Answer {
                        record: record.with_chain(contract.address, question_hash, answer_hash),
                        chain,
                    },
                )
            })
            .await?;
        Ok(ActionOutcome::OnChain(state))
    }
}

/// Marks an answer as the accepted one. Only the asker may do this.
#[derive(Debug, Clone)]
pub struct SelectAnswer {
    pub question: Post,
    pub answer: Post,
}

/// Fails unless `answer` was posted to `question`.
fn answers_question(question: &Post, answer: &Post) -> Result<()> {
    match (question.question_id, answer.question_id) {
        (Some(q), Some(a)) if q == a => Ok(()),
        _ => Err(Error::NotFound(format!(
            "post {} is not an answer to question {}",
            answer.id, question.id
        ))),
    }
}

impl SelectAnswer {
    fn record(&self) -> Result<SelectionRecord> {
        answers_question(&self.question, &self.answer)?;
        match (self.question.question_id, self.answer.answer_id) {
            (Some(question), Some(answer)) => Ok(SelectionRecord { question, answer }),
            _ => Err(Error::NotFound("selection needs a question and one of its answers".to_string())),
        }
    }

    /// Off-chain questions accept the asker by username or by wallet.
    fn asked_off_chain_by(&self, username: Option<&str>, actor: Option<Address>) -> bool {
        let by_name = matches!(
            (username, self.question.poster_name.as_deref()),
            (Some(user), Some(poster)) if user == poster
        );
        let by_wallet = actor.is_some() && actor == self.question.poster_address();
        by_name || by_wallet
    }
}

#[async_trait]
impl ActionPolicy for SelectAnswer {
    async fn execute(&self, ctx: &ActionContext, coordinator: &Coordinator) -> Result<ActionOutcome> {
        let record = self.record()?;
        let hashes = (self.question.question_hash()?, self.answer.answer_hash()?);

        let (question_hash, answer_hash) = match hashes {
            (Some(q), Some(a)) => (q, a),
            _ => {
                let username = ctx.guard.session().username();
                if !self.asked_off_chain_by(username.as_deref(), ctx.actor()) {
                    info!("selection on question {} refused: not the asker", record.question);
                    return Err(Error::NotAuthorized("only the asker can select an answer".to_string()));
                }
                ctx.guard.ensure_valid().await?;
                let resp = ctx.backend.create_selection(&record).await?;
                return Ok(ActionOutcome::Recorded(resp));
            }
        };

        let actor = ctx.actor().ok_or(Error::WalletNotConnected)?;
        if self.question.poster_address() != Some(actor) {
            info!("selection on question {} refused: {:?} is not the asker", record.question, actor);
            return Err(Error::NotAuthorized("only the asker can select an answer".to_string()));
        }
        let contract = ctx.contract_for(&self.question)?;

        let state = coordinator
            .run(&ctx.guard, || {
                let chain = ChainReference {
                    contract: contract.address,
                    question_hash,
                    answer_hash: Some(answer_hash),
                };
                TransactionDescriptor::new(
                    &contract,
                    actor,
                    BountyFunction::SelectAnswer,
                    AnswerData {
                        question_hash,
                        answer_hash,
                    },
                    None,
                    Reconciliation::Selection { record, chain },
                )
            })
            .await?;
        Ok(ActionOutcome::OnChain(state))
    }
}

/// A thread post that answers no question. Never on-chain.
#[derive(Debug, Clone)]
pub struct PostReply {
    pub thread: u64,
    pub text: String,
}

#[async_trait]
impl ActionPolicy for PostReply {
    async fn execute(&self, ctx: &ActionContext, _coordinator: &Coordinator) -> Result<ActionOutcome> {
        ctx.guard.ensure_valid().await?;
        let resp = ctx
            .backend
            .post_reply(&ReplyRecord {
                thread: self.thread,
                text: self.text.clone(),
            })
            .await?;
        Ok(ActionOutcome::Recorded(resp))
    }
}

/// Pays the escrowed bounty out to the selected answerer. The payout is
/// purely on-chain, so nothing is reconciled.
#[derive(Debug, Clone)]
pub struct RedeemBounty {
    pub question: Post,
    pub answer: Post,
}

#[async_trait]
impl ActionPolicy for RedeemBounty {
    async fn execute(&self, ctx: &ActionContext, coordinator: &Coordinator) -> Result<ActionOutcome> {
        answers_question(&self.question, &self.answer)?;
        let question_hash = self.question.question_hash()?.ok_or_else(|| {
            Error::NotFound(format!("question {} carries no on-chain bounty", self.question.id))
        })?;
        let actor = ctx.actor().ok_or(Error::WalletNotConnected)?;
        if self.answer.poster_address() != Some(actor) {
            info!("redeem refused: {:?} did not post answer {}", actor, self.answer.id);
            return Err(Error::NotAuthorized("only the selected answerer can redeem the bounty".to_string()));
        }
        let contract = ctx.contract_for(&self.question)?;

        let state = coordinator
            .run(&ctx.guard, || {
                TransactionDescriptor::new(
                    &contract,
                    actor,
                    BountyFunction::RedeemAnswer,
                    QuestionData { question_hash },
                    None,
                    Reconciliation::None,
                )
            })
            .await?;
        Ok(ActionOutcome::OnChain(state))
    }
}
