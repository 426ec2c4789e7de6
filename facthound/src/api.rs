//! Backend wire types.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use web3::types::{Address, H256};

use crate::{
    backend::BackendError,
    error::Result,
    hasher::ContentHash,
    utils::parse_address,
};

/// On-chain correlation of a record: where it lives and which content hashes it was posted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReference {
    pub contract: Address,
    pub question_hash: ContentHash,
    pub answer_hash: Option<ContentHash>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QuestionRecord {
    pub topic: String,
    pub text: String,
    pub tags: Vec<String>,
    #[serde(rename = "questionAddress")]
    pub question_address: Option<Address>,
    #[serde(rename = "questionHash", skip_serializing_if = "Option::is_none")]
    pub question_hash: Option<ContentHash>,
    #[serde(rename = "transactionHash", skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<H256>,
}

impl QuestionRecord {
    pub fn new(topic: impl Into<String>, text: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            text: text.into(),
            tags,
            question_address: None,
            question_hash: None,
            transaction_hash: None,
        }
    }

    pub fn with_chain(mut self, contract: Address, question_hash: ContentHash) -> Self {
        self.question_address = Some(contract);
        self.question_hash = Some(question_hash);
        self
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub thread: u64,
    pub text: String,
    pub question: u64,
    #[serde(rename = "contractAddress", skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    #[serde(rename = "questionHash", skip_serializing_if = "Option::is_none")]
    pub question_hash: Option<ContentHash>,
    #[serde(rename = "answerHash", skip_serializing_if = "Option::is_none")]
    pub answer_hash: Option<ContentHash>,
    #[serde(rename = "transactionHash", skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<H256>,
}

impl AnswerRecord {
    pub fn new(thread: u64, question: u64, text: impl Into<String>) -> Self {
        Self {
            thread,
            text: text.into(),
            question,
            contract_address: None,
            question_hash: None,
            answer_hash: None,
            transaction_hash: None,
        }
    }

    pub fn with_chain(mut self, contract: Address, question_hash: ContentHash, answer_hash: ContentHash) -> Self {
        self.contract_address = Some(contract);
        self.question_hash = Some(question_hash);
        self.answer_hash = Some(answer_hash);
        self
    }
}

/// A post in a thread that answers no question.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReplyRecord {
    pub thread: u64,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRecord {
    pub question: u64,
    pub answer: u64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmKind {
    Question,
    Answer,
    Selection,
}

/// Asks the backend to verify a mined transaction and mark the record chain-backed.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConfirmRecord {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: H256,
    pub kind: ConfirmKind,
    #[serde(rename = "contractAddress")]
    pub contract_address: Address,
    #[serde(rename = "questionHash")]
    pub question_hash: ContentHash,
    #[serde(rename = "answerHash", skip_serializing_if = "Option::is_none")]
    pub answer_hash: Option<ContentHash>,
}

impl ConfirmRecord {
    pub fn new(kind: ConfirmKind, chain: &ChainReference, tx: H256) -> Self {
        Self {
            transaction_hash: tx,
            kind,
            contract_address: chain.contract,
            question_hash: chain.question_hash,
            answer_hash: chain.answer_hash,
        }
    }
}

/// What a record-creation response must say to count as accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessMarker {
    Exact(&'static str),
    /// A whole word of the message starts with the marker and no word
    /// reports a failure, so "created successfully" passes and
    /// "confirmation unsuccessful" does not.
    Word(&'static str),
}

pub const QUESTION_POSTED: SuccessMarker = SuccessMarker::Exact("question posted");
const FAILURE_WORDS: [&str; 3] = ["unsuccess", "fail", "error"];

pub const RECORD_SUCCESS: SuccessMarker = SuccessMarker::Word("success");

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RecordResponse {
    pub message: Option<String>,
    pub thread: Option<u64>,
    pub code: Option<String>,
    pub detail: Option<String>,
}

impl RecordResponse {
    pub fn is_accepted(&self, marker: SuccessMarker) -> bool {
        match (marker, self.message.as_deref()) {
            (SuccessMarker::Exact(m), Some(msg)) => msg == m,
            (SuccessMarker::Word(m), Some(msg)) => {
                let words: Vec<String> = msg
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(str::to_lowercase)
                    .collect();
                words.iter().any(|w| w.starts_with(m))
                    && !words.iter().any(|w| FAILURE_WORDS.iter().any(|f| w.starts_with(f)))
            }
            (_, None) => false,
        }
    }

    /// Rejects responses without the success marker, whatever the HTTP status.
    pub fn require(self, marker: SuccessMarker) -> std::result::Result<Self, BackendError> {
        if self.is_accepted(marker) {
            Ok(self)
        } else {
            Err(BackendError::Rejected(self.to_string()))
        }
    }
}

impl Display for RecordResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .detail
            .as_deref()
            .or(self.message.as_deref())
            .or(self.code.as_deref())
            .unwrap_or("no message");
        f.write_str(text)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WhoAmI {
    pub username: Option<String>,
    pub wallet: Option<String>,
    pub code: Option<String>,
    pub detail: Option<String>,
}

impl WhoAmI {
    pub fn is_token_invalid(&self) -> bool {
        self.code.as_deref() == Some("token_not_valid")
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub detail: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct SiweRequest {
    pub message: String,
    pub signed_message: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Post {
    pub id: u64,
    pub text: String,
    pub dt: String,
    pub poster_id: Option<u64>,
    pub poster_name: Option<String>,
    pub poster_wallet: Option<String>,
    pub thread_id: Option<u64>,
    pub thread_topic: Option<String>,
    pub question_id: Option<u64>,
    pub question_address: Option<String>,
    pub question_hash: Option<String>,
    pub answer_id: Option<u64>,
    pub answer_hash: Option<String>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Post {
    pub fn is_question(&self) -> bool {
        self.question_id.is_some() && self.answer_id.is_none()
    }

    pub fn is_answer(&self) -> bool {
        self.question_id.is_some() && self.answer_id.is_some()
    }

    pub fn question_hash(&self) -> Result<Option<ContentHash>> {
        non_empty(&self.question_hash).map(ContentHash::from_hex).transpose()
    }

    pub fn answer_hash(&self) -> Result<Option<ContentHash>> {
        non_empty(&self.answer_hash).map(ContentHash::from_hex).transpose()
    }

    pub fn contract_address(&self) -> Result<Option<Address>> {
        non_empty(&self.question_address).map(parse_address).transpose()
    }

    pub fn poster_address(&self) -> Option<Address> {
        non_empty(&self.poster_wallet).and_then(|w| parse_address(w).ok())
    }

    pub fn author(&self) -> &str {
        non_empty(&self.poster_name)
            .or(non_empty(&self.poster_wallet))
            .unwrap_or("anonymous")
    }
}

impl Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.question_id, self.answer_id) {
            (Some(q), None) => format!("[question {}]", q),
            (Some(_), Some(a)) => format!("[answer {}]", a),
            _ => "[reply]".to_string(),
        };
        write!(f, "{} {}: {}", label, self.author(), self.text)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Thread {
    #[serde(rename = "threadId")]
    pub thread_id: u64,
    #[serde(rename = "threadTopic", default)]
    pub topic: String,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl Thread {
    pub fn question(&self, question_id: u64) -> Option<&Post> {
        self.posts
            .iter()
            .find(|p| p.is_question() && p.question_id == Some(question_id))
    }

    pub fn answer(&self, answer_id: u64) -> Option<&Post> {
        self.posts.iter().find(|p| p.answer_id == Some(answer_id))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct UserHistory {
    pub userid: u64,
    pub username: Option<String>,
    pub wallet: Option<String>,
    pub questions: Vec<Post>,
    pub answers: Vec<Post>,
}
