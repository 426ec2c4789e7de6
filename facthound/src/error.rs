use std::fmt::Formatter;

use crate::{backend::BackendError, chain::ChainError};

pub type Result<T> = std::result::Result<T, Error>;

/// Why a privileged action was refused before it reached the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFailure {
    /// No cached credential; the user has never logged in or has logged out.
    Missing,
    /// The backend rejected the cached credential.
    Rejected,
    /// The access token expired and could not be refreshed.
    Expired,
}

#[derive(Debug)]
pub enum Error {
    CheckChainErr,
    Config(String),
    SessionInvalid(SessionFailure),
    WalletNotConnected,
    NotAuthorized(String),
    NotFound(String),
    ArgumentMismatch(String),
    AlreadyRunning,
    InvalidHash(String),
    InvalidAmount(String),
    Chain(ChainError),
    Backend(BackendError),
    Abi(web3::ethabi::Error),
    Web3(web3::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::CheckChainErr => write!(f, "chain id check failed"),
            Error::Config(e) => write!(f, "config error: {}", e),
            Error::SessionInvalid(SessionFailure::Missing) => write!(f, "not logged in, please log in first"),
            Error::SessionInvalid(_) => {
                write!(f, "Authentication error. Your session has expired. Please log back in.")
            }
            Error::WalletNotConnected => write!(f, "Please connect your wallet"),
            Error::NotAuthorized(e) => write!(f, "not authorized: {}", e),
            Error::NotFound(e) => write!(f, "not found: {}", e),
            Error::ArgumentMismatch(e) => write!(f, "contract argument mismatch: {}", e),
            Error::AlreadyRunning => write!(f, "a transaction for this action is already in progress"),
            Error::InvalidHash(e) => write!(f, "invalid content hash: {}", e),
            Error::InvalidAmount(e) => write!(f, "invalid amount: {}", e),
            Error::Chain(e) => write!(f, "{}", e),
            Error::Backend(e) => write!(f, "{}", e),
            Error::Abi(e) => write!(f, "Abi error: {}", e),
            Error::Web3(e) => write!(f, "Web3 error: {}", e),
            Error::Io(e) => write!(f, "Io error {:?}", e),
            Error::Json(e) => write!(f, "Json error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Chain(e) => Some(e),
            Error::Backend(e) => Some(e),
            Error::Abi(e) => Some(e),
            Error::Web3(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ChainError> for Error {
    fn from(e: ChainError) -> Self {
        Error::Chain(e)
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Session(failure) => Error::SessionInvalid(failure),
            e => Error::Backend(e),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Backend(e.into())
    }
}

impl From<web3::ethabi::Error> for Error {
    fn from(e: web3::ethabi::Error) -> Self {
        Error::Abi(e)
    }
}

impl From<web3::Error> for Error {
    fn from(e: web3::Error) -> Self {
        Error::Web3(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
