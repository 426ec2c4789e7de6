//! Backend session: the cached credential, its validation before privileged
//! actions, and sign-in message construction.

use std::{
    fs,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use web3::types::Address;

use crate::{
    api::WhoAmI,
    backend::{Backend, BackendError},
    error::{Error, Result, SessionFailure},
    utils::checksum_address,
    wallet::Wallet,
};

/// Tokens are treated as expired this many seconds before their `exp`.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

pub const SIWE_STATEMENT: &str = "Sign in with Ethereum to the app.";

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// The credential cache, passed explicitly to whoever needs it.
/// Persisted to `path` when one is given.
#[derive(Debug, Default)]
pub struct SessionContext {
    path: Option<PathBuf>,
    credentials: RwLock<Option<Credentials>>,
}

impl SessionContext {
    pub fn in_memory(credentials: Option<Credentials>) -> Self {
        Self {
            path: None,
            credentials: RwLock::new(credentials),
        }
    }

    /// Loads the cache file; a missing file is an empty session.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let credentials = match fs::read_to_string(&path) {
            Ok(s) => Some(serde_json::from_str::<Credentials>(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        debug!("session loaded from {}, present: {}", path.display(), credentials.is_some());
        Ok(Self {
            path: Some(path),
            credentials: RwLock::new(credentials),
        })
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_present(&self) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn username(&self) -> Option<String> {
        self.credentials().and_then(|c| c.username)
    }

    pub fn store(&self, credentials: Credentials) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_vec_pretty(&credentials)?)?;
        }
        *self.credentials.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials);
        Ok(())
    }

    pub fn clear(&self) {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove session file {}: {}", path.display(), e),
            }
        }
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// True when `token` is not a decodable JWT or expires within the margin.
pub fn token_expires_soon(token: &str, now: i64) -> bool {
    let claims = token
        .split('.')
        .nth(1)
        .and_then(|payload| URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok())
        .and_then(|bytes| serde_json::from_slice::<JwtClaims>(&bytes).ok());
    match claims {
        Some(claims) => claims.exp < now + EXPIRY_MARGIN_SECS,
        None => true,
    }
}

/// Validates the cached credential against the backend, once per privileged action.
pub struct SessionGuard {
    session: Arc<SessionContext>,
    backend: Arc<dyn Backend>,
    wallet: Option<Arc<dyn Wallet>>,
}

impl SessionGuard {
    pub fn new(session: Arc<SessionContext>, backend: Arc<dyn Backend>, wallet: Option<Arc<dyn Wallet>>) -> Self {
        Self {
            session,
            backend,
            wallet,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn ensure_valid(&self) -> Result<WhoAmI> {
        if !self.session.is_present() {
            return Err(Error::SessionInvalid(SessionFailure::Missing));
        }
        let failure = match self.backend.who_am_i().await {
            Ok(me) if !me.is_token_invalid() => return Ok(me),
            Ok(_) | Err(BackendError::Unauthorized) => SessionFailure::Rejected,
            Err(BackendError::Session(failure)) => failure,
            Err(e) => {
                warn!("session check failed: {}", e);
                SessionFailure::Rejected
            }
        };
        self.invalidate();
        Err(Error::SessionInvalid(failure))
    }

    /// Drops the cached credential and the linked wallet session.
    pub fn invalidate(&self) {
        info!("session invalid, clearing credentials");
        self.session.clear();
        if let Some(wallet) = &self.wallet {
            wallet.disconnect();
        }
    }
}

/// EIP-4361 sign-in message.
pub fn siwe_message(
    domain: &str,
    uri: &str,
    address: &Address,
    chain_id: u64,
    nonce: &str,
    issued_at: DateTime<Utc>,
) -> String {
    format!(
        "{domain} wants you to sign in with your Ethereum account:\n\
         {address}\n\
         \n\
         {statement}\n\
         \n\
         URI: {uri}\n\
         Version: 1\n\
         Chain ID: {chain_id}\n\
         Nonce: {nonce}\n\
         Issued At: {issued_at}",
        domain = domain,
        address = checksum_address(address),
        statement = SIWE_STATEMENT,
        uri = uri,
        chain_id = chain_id,
        nonce = nonce,
        issued_at = issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}
