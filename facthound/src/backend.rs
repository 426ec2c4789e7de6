//! REST backend holding the forum's question, answer, and selection records.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    api::{
        AnswerRecord, ConfirmRecord, LoginRequest, NonceResponse, QuestionRecord, RecordResponse,
        RefreshRequest, RegisterRequest, ReplyRecord, SelectionRecord, SiweRequest, SuccessMarker, Thread,
        TokenPair, UserHistory, WhoAmI, QUESTION_POSTED, RECORD_SUCCESS,
    },
    config::BackendConfig,
    error::{Error, Result, SessionFailure},
    session::{token_expires_soon, Credentials, SessionContext},
};

const WHO_AM_I: &str = "/api/auth/who_am_i/";
const TOKEN_REFRESH: &str = "/api/auth/token/refresh/";
const LOGIN: &str = "/auth/api/token/";
const REGISTER: &str = "/api/auth/register/";
const SIWE_NONCE: &str = "/auth/api/get_nonce/";
const SIWE_TOKEN: &str = "/auth/api/siwetoken/";
const CREATE_QUESTION: &str = "/questions/api/question/";
const CREATE_ANSWER: &str = "/api/questions/answer/";
const CREATE_REPLY: &str = "/api/questions/post/";
const CREATE_SELECTION: &str = "/api/questions/selection/";
const CONFIRM: &str = "/api/questions/confirm/";
const THREAD: &str = "/api/questions/thread";
const USER_HISTORY: &str = "/api/questions/userhistory";

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("backend rejected the credential")]
    Unauthorized,
    #[error("session invalid: {0:?}")]
    Session(SessionFailure),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("backend transport error: {0}")]
    Transport(String),
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Record endpoints the coordinator and policies call. Every record method
/// returns `Ok` only when the backend's response carries its success marker.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn who_am_i(&self) -> std::result::Result<WhoAmI, BackendError>;

    async fn create_question(&self, record: &QuestionRecord) -> std::result::Result<RecordResponse, BackendError>;

    async fn create_answer(&self, record: &AnswerRecord) -> std::result::Result<RecordResponse, BackendError>;

    async fn post_reply(&self, record: &ReplyRecord) -> std::result::Result<RecordResponse, BackendError>;

    async fn create_selection(&self, record: &SelectionRecord) -> std::result::Result<RecordResponse, BackendError>;

    async fn confirm(&self, record: &ConfirmRecord) -> std::result::Result<RecordResponse, BackendError>;
}

pub struct HttpBackend {
    client: Client,
    base: String,
    session: Arc<SessionContext>,
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, session: Arc<SessionContext>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base: config.url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Current access token, refreshed first when it is about to expire.
    async fn bearer(&self) -> std::result::Result<Option<String>, BackendError> {
        let creds = match self.session.credentials() {
            Some(creds) => creds,
            None => return Ok(None),
        };
        if !token_expires_soon(&creds.access, chrono::Utc::now().timestamp()) {
            return Ok(Some(creds.access));
        }

        let refreshed = match creds.refresh.as_deref() {
            Some(refresh) => self.refresh(refresh).await?,
            None => None,
        };
        match refreshed {
            Some(pair) => {
                debug!("access token refreshed");
                let refreshed = Credentials {
                    access: pair.access.clone(),
                    refresh: pair.refresh.or(creds.refresh),
                    username: creds.username,
                };
                if let Err(e) = self.session.store(refreshed) {
                    warn!("failed to persist refreshed session: {}", e);
                }
                Ok(Some(pair.access))
            }
            None => {
                info!("access token expired and could not be refreshed");
                self.session.clear();
                Err(BackendError::Session(SessionFailure::Expired))
            }
        }
    }

    async fn refresh(&self, refresh: &str) -> std::result::Result<Option<RefreshedTokens>, BackendError> {
        let resp = self
            .client
            .post(self.url(TOKEN_REFRESH))
            .json(&RefreshRequest {
                refresh: refresh.to_string(),
            })
            .send()
            .await;
        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!("token refresh refused: {}", resp.status());
                return Ok(None);
            }
            Err(e) => {
                warn!("token refresh failed: {}", e);
                return Ok(None);
            }
        };
        let pair: TokenPair = resp.json().await?;
        Ok(pair.access.map(|access| RefreshedTokens {
            access,
            refresh: pair.refresh,
        }))
    }

    async fn authorized(&self, builder: RequestBuilder) -> std::result::Result<RequestBuilder, BackendError> {
        Ok(match self.bearer().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> std::result::Result<T, BackendError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                detail: truncate(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(format!("{}: {}", e, truncate(&body))))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<T, BackendError> {
        let builder = self.authorized(self.client.get(self.url(path)).query(query)).await?;
        Self::decode(builder.send().await?).await
    }

    /// Posts a record and checks the success marker. Any non-2xx status is an
    /// error; a JSON body on it only supplies the detail.
    async fn post_record<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        marker: SuccessMarker,
    ) -> std::result::Result<RecordResponse, BackendError> {
        let builder = self.authorized(self.client.post(self.url(path)).json(body)).await?;
        let resp = builder.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        let text = resp.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<RecordResponse>(&text)
                .ok()
                .filter(|r| r.message.is_some() || r.detail.is_some() || r.code.is_some())
                .map(|r| r.to_string())
                .unwrap_or_else(|| truncate(&text));
            return Err(BackendError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        let record: RecordResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Decode(format!("{}: {}", e, truncate(&text))))?;
        debug!("{} -> {} {:?}", path, status, record.message);
        record.require(marker)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url(LOGIN))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let pair: TokenPair = Self::decode(resp).await?;
        self.store_tokens(pair, Some(username.to_string()))
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url(REGISTER))
            .json(&RegisterRequest {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(resp).await?;
        Ok(())
    }

    pub async fn siwe_nonce(&self) -> Result<String> {
        let resp = self
            .client
            .get(self.url(SIWE_NONCE))
            .send()
            .await?;
        let nonce: NonceResponse = Self::decode(resp).await?;
        Ok(nonce.nonce)
    }

    pub async fn siwe_login(&self, message: String, signed_message: String) -> Result<()> {
        let resp = self
            .client
            .post(self.url(SIWE_TOKEN))
            .json(&SiweRequest { message, signed_message })
            .send()
            .await?;
        let pair: TokenPair = Self::decode(resp).await?;
        self.store_tokens(pair, None)
    }

    fn store_tokens(&self, pair: TokenPair, username: Option<String>) -> Result<()> {
        let access = pair.access.ok_or_else(|| {
            Error::Backend(BackendError::Rejected(
                pair.detail.unwrap_or_else(|| "Login failed. Please try again.".to_string()),
            ))
        })?;
        self.session.store(Credentials {
            access,
            refresh: pair.refresh,
            username,
        })
    }

    pub async fn thread(&self, thread_id: u64) -> Result<Thread> {
        Ok(self.get(THREAD, &[("threadId", thread_id.to_string())]).await?)
    }

    pub async fn user_history(&self, user: u64) -> Result<UserHistory> {
        Ok(self.get(USER_HISTORY, &[("user", user.to_string())]).await?)
    }
}

struct RefreshedTokens {
    access: String,
    refresh: Option<String>,
}

#[async_trait]
impl Backend for HttpBackend {
    async fn who_am_i(&self) -> std::result::Result<WhoAmI, BackendError> {
        self.get(WHO_AM_I, &[]).await
    }

    async fn create_question(&self, record: &QuestionRecord) -> std::result::Result<RecordResponse, BackendError> {
        self.post_record(CREATE_QUESTION, record, QUESTION_POSTED).await
    }

    async fn create_answer(&self, record: &AnswerRecord) -> std::result::Result<RecordResponse, BackendError> {
        self.post_record(CREATE_ANSWER, record, RECORD_SUCCESS).await
    }

    async fn post_reply(&self, record: &ReplyRecord) -> std::result::Result<RecordResponse, BackendError> {
        self.post_record(CREATE_REPLY, record, RECORD_SUCCESS).await
    }

    async fn create_selection(&self, record: &SelectionRecord) -> std::result::Result<RecordResponse, BackendError> {
        self.post_record(CREATE_SELECTION, record, RECORD_SUCCESS).await
    }

    async fn confirm(&self, record: &ConfirmRecord) -> std::result::Result<RecordResponse, BackendError> {
        self.post_record(CONFIRM, record, RECORD_SUCCESS).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde_json::{json, Value};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use web3::types::{Address, H256};

    use super::*;
    use crate::{
        api::{ChainReference, ConfirmKind},
        hasher::ContentHash,
    };

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        bearer: Option<String>,
        body: String,
    }

    type Routes = Arc<Vec<(&'static str, u16, Value)>>;

    /// Local HTTP server answering each path with a canned status and JSON body.
    struct StubServer {
        base: String,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl StubServer {
        async fn start(routes: Vec<(&'static str, u16, Value)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let seen = Arc::new(Mutex::new(Vec::new()));
            let routes: Routes = Arc::new(routes);
            let log = seen.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, routes.clone(), log.clone()));
                }
            });
            Self { base, seen }
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }

        fn paths(&self) -> Vec<String> {
            self.seen().into_iter().map(|s| s.path).collect()
        }
    }

    async fn serve(mut stream: TcpStream, routes: Routes, seen: Arc<Mutex<Vec<Seen>>>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line
            .next()
            .unwrap_or_default()
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        let mut length = 0usize;
        let mut bearer = None;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim();
                match name.to_ascii_lowercase().as_str() {
                    "content-length" => length = value.parse().unwrap_or(0),
                    "authorization" => bearer = value.strip_prefix("Bearer ").map(str::to_string),
                    _ => {}
                }
            }
        }
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

        let (status, reply) = routes
            .iter()
            .find(|(p, _, _)| *p == path)
            .map(|(_, status, reply)| (*status, reply.to_string()))
            .unwrap_or((404, json!({"detail": "Not found."}).to_string()));
        seen.lock().unwrap().push(Seen {
            method,
            path,
            bearer,
            body,
        });

        let response = format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reply.len(),
            reply
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
    }

    fn jwt(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{}}}", exp));
        format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", payload)
    }

    fn fresh() -> String {
        jwt(chrono::Utc::now().timestamp() + 3600)
    }

    fn stale() -> String {
        jwt(chrono::Utc::now().timestamp() - 60)
    }

    fn logged_in(access: String, refresh: Option<&str>) -> Option<Credentials> {
        Some(Credentials {
            access,
            refresh: refresh.map(str::to_string),
            username: Some("alice".to_string()),
        })
    }

    fn backend(stub: &StubServer, credentials: Option<Credentials>) -> (HttpBackend, Arc<SessionContext>) {
        let session = Arc::new(SessionContext::in_memory(credentials));
        let config = BackendConfig {
            url: format!("{}/", stub.base),
            timeout: 5,
        };
        (HttpBackend::new(&config, session.clone()).unwrap(), session)
    }

    fn confirm_record() -> ConfirmRecord {
        let chain = ChainReference {
            contract: Address::repeat_byte(0xfa),
            question_hash: ContentHash::derive(Address::repeat_byte(1), "q"),
            answer_hash: None,
        };
        ConfirmRecord::new(ConfirmKind::Question, &chain, H256::repeat_byte(7))
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_before_the_request() {
        let renewed = fresh();
        let stub = StubServer::start(vec![
            (TOKEN_REFRESH, 200, json!({"access": renewed.clone(), "refresh": "r2"})),
            (WHO_AM_I, 200, json!({"username": "alice"})),
        ])
        .await;
        let (backend, session) = backend(&stub, logged_in(stale(), Some("r1")));

        let me = backend.who_am_i().await.unwrap();
        assert_eq!(me.username.as_deref(), Some("alice"));

        let seen = stub.seen();
        assert_eq!(stub.paths(), vec![TOKEN_REFRESH, WHO_AM_I]);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(serde_json::from_str::<Value>(&seen[0].body).unwrap(), json!({"refresh": "r1"}));
        assert_eq!(seen[1].bearer.as_deref(), Some(renewed.as_str()));

        let stored = session.credentials().unwrap();
        assert_eq!(stored.access, renewed);
        assert_eq!(stored.refresh.as_deref(), Some("r2"));
        assert_eq!(stored.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn refused_refresh_clears_the_session() {
        let stub = StubServer::start(vec![
            (
                TOKEN_REFRESH,
                401,
                json!({"detail": "Token is invalid or expired", "code": "token_not_valid"}),
            ),
            (WHO_AM_I, 200, json!({"username": "alice"})),
        ])
        .await;
        let (backend, session) = backend(&stub, logged_in(stale(), Some("r1")));

        let err = backend.who_am_i().await.unwrap_err();
        assert!(matches!(err, BackendError::Session(SessionFailure::Expired)));
        assert!(matches!(Error::from(err), Error::SessionInvalid(SessionFailure::Expired)));
        assert!(session.credentials().is_none());
        assert_eq!(stub.paths(), vec![TOKEN_REFRESH]);
    }

    #[tokio::test]
    async fn unauthorized_status_is_reported() {
        let token = fresh();
        let stub = StubServer::start(vec![(WHO_AM_I, 401, json!({"detail": "Authentication credentials were not provided."}))]).await;
        let (backend, _) = backend(&stub, logged_in(token.clone(), None));

        assert!(matches!(backend.who_am_i().await, Err(BackendError::Unauthorized)));
        let seen = stub.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bearer.as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn error_status_is_never_accepted() {
        let stub = StubServer::start(vec![
            (CREATE_ANSWER, 500, json!({"message": "answer unsuccessful: hash mismatch"})),
            (CREATE_SELECTION, 400, json!({"message": "success"})),
        ])
        .await;
        let (backend, _) = backend(&stub, logged_in(fresh(), None));

        match backend.create_answer(&AnswerRecord::new(1, 2, "text")).await {
            Err(BackendError::Status { status, detail }) => {
                assert_eq!(status, 500);
                assert_eq!(detail, "answer unsuccessful: hash mismatch");
            }
            other => panic!("unexpected {:?}", other),
        }
        let selection = SelectionRecord { question: 1, answer: 2 };
        match backend.create_selection(&selection).await {
            Err(BackendError::Status { status, .. }) => assert_eq!(status, 400),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn ok_status_still_needs_the_marker() {
        let stub = StubServer::start(vec![
            (CONFIRM, 200, json!({"message": "confirmation unsuccessful"})),
            (CREATE_REPLY, 200, json!({"detail": "thread closed"})),
            (CREATE_QUESTION, 200, json!({"message": "question posted", "thread": 9})),
        ])
        .await;
        let (backend, _) = backend(&stub, logged_in(fresh(), None));

        match backend.confirm(&confirm_record()).await {
            Err(BackendError::Rejected(msg)) => assert_eq!(msg, "confirmation unsuccessful"),
            other => panic!("unexpected {:?}", other),
        }
        let reply = ReplyRecord {
            thread: 3,
            text: "hi".to_string(),
        };
        assert!(matches!(backend.post_reply(&reply).await, Err(BackendError::Rejected(_))));

        let posted = backend
            .create_question(&QuestionRecord::new("topic", "body", vec![]))
            .await
            .unwrap();
        assert_eq!(posted.thread, Some(9));

        let confirm = &stub.seen()[0];
        assert_eq!(confirm.method, "POST");
        let sent: Value = serde_json::from_str(&confirm.body).unwrap();
        assert_eq!(sent["kind"], "question");
        assert_eq!(sent["transactionHash"], format!("{:?}", H256::repeat_byte(7)));
    }

    #[tokio::test]
    async fn login_stores_the_token_pair() {
        let stub = StubServer::start(vec![(LOGIN, 200, json!({"access": "a1", "refresh": "r1"}))]).await;
        let (backend, session) = backend(&stub, None);

        backend.login("alice", "pw").await.unwrap();
        let stored = session.credentials().unwrap();
        assert_eq!(stored.access, "a1");
        assert_eq!(stored.refresh.as_deref(), Some("r1"));
        assert_eq!(session.username().as_deref(), Some("alice"));

        let sent: Value = serde_json::from_str(&stub.seen()[0].body).unwrap();
        assert_eq!(sent, json!({"username": "alice", "password": "pw"}));
        assert_eq!(stub.seen()[0].bearer, None);
    }

    #[tokio::test]
    async fn login_without_access_token_keeps_no_session() {
        let stub = StubServer::start(vec![(LOGIN, 200, json!({"detail": "No active account found"}))]).await;
        let (backend, session) = backend(&stub, None);

        let err = backend.login("alice", "wrong").await.unwrap_err();
        assert!(err.to_string().contains("No active account found"));
        assert!(session.credentials().is_none());
    }
}
