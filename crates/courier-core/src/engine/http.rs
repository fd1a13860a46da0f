//! HTTP engine built on reqwest
//!
//! Each resumed task runs as one tokio task:
//! - Streams the request body in chunks, reporting each one sent
//! - Answers 401/407 challenges through the delegate
//! - Promotes itself to a download task when the delegate asks, writing the
//!   body to a temporary file that is deleted after the delegate has seen it
//! - Reports download progress whether the body goes to a file or memory
//! - Races the transfer against its cancellation token. Handing a finished
//!   file to the delegate is not cancellable.

use super::{
    DeliveryJob, EngineRequest, NetworkEngine, ResponseDisposition, TaskDelegate, TaskId,
};
use crate::error::{SessionError, TransportError, TransportErrorKind};
use base64::Engine as _;
use bytes::Bytes;
use courier_types::{
    AuthChallenge, ChallengeDisposition, Credential, HttpMethod, Progress, ResponseMetadata,
    SessionConfig,
};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request bodies are handed to the connection in chunks of this size
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Credentials offered for a single task before the challenge response is delivered as-is
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Network engine backed by a shared reqwest client
pub struct HttpEngine {
    shared: Arc<EngineShared>,
    /// Created but not yet resumed
    pending: Mutex<HashMap<TaskId, PendingTask>>,
    runtime: Handle,
}

struct EngineShared {
    client: Client,
    next_id: AtomicI64,
    /// Cancellation tokens of live tasks, keyed by their current identifier
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
    temp_dir: PathBuf,
}

struct PendingTask {
    request: EngineRequest,
    delegate: Arc<dyn TaskDelegate>,
    token: CancellationToken,
}

impl HttpEngine {
    /// Build an engine from the session configuration. Must be called
    /// from within a tokio runtime; tasks run on that runtime.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let runtime = Handle::try_current()
            .map_err(|e| SessionError::Configuration(format!("no tokio runtime: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SessionError::Configuration(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SessionError::Configuration(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let redirect = if config.max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(config.max_redirects)
        };

        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .redirect(redirect)
            .default_headers(headers);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SessionError::Configuration(e.to_string()))?;

        let temp_dir = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            shared: Arc::new(EngineShared {
                client,
                next_id: AtomicI64::new(1),
                tokens: Mutex::new(HashMap::new()),
                temp_dir,
            }),
            pending: Mutex::new(HashMap::new()),
            runtime,
        })
    }

    fn spawn(&self, task: TaskId, pending: PendingTask) {
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(run_task(shared, task, pending));
    }
}

impl NetworkEngine for HttpEngine {
    fn create_upload_task(
        &self,
        request: EngineRequest,
        delegate: Arc<dyn TaskDelegate>,
    ) -> TaskId {
        let task = self.shared.allocate_id();
        let token = CancellationToken::new();
        self.shared.tokens.lock().insert(task, token.clone());
        self.pending.lock().insert(
            task,
            PendingTask {
                request,
                delegate,
                token,
            },
        );
        task
    }

    fn resume(&self, task: TaskId) {
        match self.pending.lock().remove(&task) {
            Some(pending) => self.spawn(task, pending),
            None => debug!("Task {} is not suspended; ignoring resume", task),
        }
    }

    fn cancel(&self, task: TaskId) {
        if let Some(token) = self.shared.tokens.lock().get(&task) {
            token.cancel();
        }
        // A suspended task still has to report its completion
        if let Some(pending) = self.pending.lock().remove(&task) {
            self.spawn(task, pending);
        }
    }

    fn cancel_all(&self) {
        for token in self.shared.tokens.lock().values() {
            token.cancel();
        }
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (task, pending) in pending {
            self.spawn(task, pending);
        }
    }

    fn dispatch(&self, job: DeliveryJob) {
        self.runtime.spawn(async move { job() });
    }
}

impl EngineShared {
    fn allocate_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The token stays reachable under the original identifier too, since
    /// callers only ever learned that one
    fn alias(&self, from: TaskId, to: TaskId) {
        let mut tokens = self.tokens.lock();
        if let Some(token) = tokens.get(&from).cloned() {
            tokens.insert(to, token);
        }
    }
}

/// A finished exchange. `download` holds the body of a promoted task until
/// the delegate has taken it.
struct Exchange {
    response: ResponseMetadata,
    download: Option<TempPath>,
}

async fn run_task(shared: Arc<EngineShared>, task: TaskId, pending: PendingTask) {
    let PendingTask {
        request,
        delegate,
        token,
    } = pending;
    let mut current = task;

    let exchange = if token.is_cancelled() {
        Err(TransportError::cancelled())
    } else {
        tokio::select! {
            _ = token.cancelled() => Err(TransportError::cancelled()),
            result = execute(&shared, &mut current, &request, &delegate) => result,
        }
    };

    // The hand-off is outside the race: the delegate may be moving the file
    // onto the caller's destination and must see it through
    let outcome = match exchange {
        Ok(Exchange {
            response,
            download: Some(location),
        }) => finish_download(current, location, &delegate)
            .await
            .map(|()| response),
        Ok(Exchange {
            response,
            download: None,
        }) => Ok(response),
        Err(error) => Err(error),
    };

    {
        let mut tokens = shared.tokens.lock();
        tokens.remove(&task);
        tokens.remove(&current);
    }
    match outcome {
        Ok(response) => {
            info!("Task {} finished with status {}", current, response.status);
            delegate.did_complete(current, Some(response), None);
        }
        Err(error) => {
            info!("Task {} failed: {}", current, error);
            delegate.did_complete(current, None, Some(error));
        }
    }
}

async fn execute(
    shared: &EngineShared,
    current: &mut TaskId,
    request: &EngineRequest,
    delegate: &Arc<dyn TaskDelegate>,
) -> Result<Exchange, TransportError> {
    let mut failures = 0;
    let mut credential: Option<(Credential, bool)> = None;
    // Upload progress keeps counting across credential retries
    let sent = Arc::new(AtomicU64::new(0));

    loop {
        let response = send(
            shared,
            *current,
            request,
            credential.as_ref(),
            &sent,
            delegate,
        )
        .await?;

        if let Some(challenge) = challenge_for(&response, failures) {
            let answer = delegate.did_receive_challenge(Some(*current), &challenge);
            match (answer.disposition, answer.credential) {
                (ChallengeDisposition::UseCredential, Some(offered))
                    if failures < MAX_AUTH_ATTEMPTS =>
                {
                    debug!("Task {} retrying with credential for {}", current, challenge.host);
                    failures += 1;
                    credential = Some((offered, challenge.proxy));
                    continue;
                }
                (ChallengeDisposition::CancelAuthenticationChallenge, _) => {
                    return Err(TransportError::cancelled());
                }
                _ => {}
            }
        }

        return receive(shared, current, request.method, response, delegate).await;
    }
}

async fn send(
    shared: &EngineShared,
    task: TaskId,
    request: &EngineRequest,
    credential: Option<&(Credential, bool)>,
    sent: &Arc<AtomicU64>,
    delegate: &Arc<dyn TaskDelegate>,
) -> Result<reqwest::Response, TransportError> {
    let mut builder = shared
        .client
        .request(method_of(request.method), request.url.clone());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some((credential, proxy)) = credential {
        let header = if *proxy {
            reqwest::header::PROXY_AUTHORIZATION
        } else {
            reqwest::header::AUTHORIZATION
        };
        builder = builder.header(header, authorization_value(credential));
    }

    if !request.body.is_empty() {
        let total = request.body.len() as u64;
        let chunks: Vec<Bytes> = (0..request.body.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| {
                let end = (start + UPLOAD_CHUNK_SIZE).min(request.body.len());
                request.body.slice(start..end)
            })
            .collect();
        let delegate = Arc::clone(delegate);
        let sent = Arc::clone(sent);
        // A retry sends the body again, so it extends what is expected
        let expected_total = Some(sent.load(Ordering::Relaxed) + total);
        let stream = futures::stream::iter(chunks).map(move |chunk| {
            let bytes = chunk.len() as u64;
            let total_bytes = sent.fetch_add(bytes, Ordering::Relaxed) + bytes;
            delegate.did_send_body_data(
                task,
                Progress {
                    bytes,
                    total_bytes,
                    expected_total,
                },
            );
            Ok::<_, std::io::Error>(chunk)
        });
        builder = builder
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream));
    }

    Ok(builder.send().await?)
}

async fn receive(
    shared: &EngineShared,
    current: &mut TaskId,
    method: HttpMethod,
    response: reqwest::Response,
    delegate: &Arc<dyn TaskDelegate>,
) -> Result<Exchange, TransportError> {
    let metadata = metadata_of(&response);

    match delegate.did_receive_response(*current, &metadata) {
        ResponseDisposition::BecomeDownload => {
            let download = shared.allocate_id();
            shared.alias(*current, download);
            debug!("Task {} became download task {}", current, download);
            delegate.did_become_download_task(*current, download);
            *current = download;

            let download = if method.expects_response_body() {
                Some(download_to_temp_file(shared, *current, response, delegate).await?)
            } else {
                None
            };
            Ok(Exchange {
                response: metadata,
                download,
            })
        }
        ResponseDisposition::Allow => {
            let expected_total = response.content_length();
            let mut received = 0u64;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                let bytes = chunk.len() as u64;
                received += bytes;
                delegate.did_receive_data(*current, chunk);
                delegate.did_write_data(
                    *current,
                    Progress {
                        bytes,
                        total_bytes: received,
                        expected_total,
                    },
                );
            }
            Ok(Exchange {
                response: metadata,
                download: None,
            })
        }
    }
}

/// Stream the body into a temporary file. Dropping the returned path
/// deletes the file, so an abandoned transfer leaves nothing behind.
async fn download_to_temp_file(
    shared: &EngineShared,
    task: TaskId,
    response: reqwest::Response,
    delegate: &Arc<dyn TaskDelegate>,
) -> Result<TempPath, TransportError> {
    let temp_path = tempfile::Builder::new()
        .prefix("courier-")
        .suffix(".download")
        .tempfile_in(&shared.temp_dir)?
        .into_temp_path();

    let expected_total = response.content_length();
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&temp_path)
        .await?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        let bytes = chunk.len() as u64;
        written += bytes;
        delegate.did_write_data(
            task,
            Progress {
                bytes,
                total_bytes: written,
                expected_total,
            },
        );
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(temp_path)
}

/// Give the finished file to the delegate, then delete it
async fn finish_download(
    task: TaskId,
    location: TempPath,
    delegate: &Arc<dyn TaskDelegate>,
) -> Result<(), TransportError> {
    // The delegate moves and maps files; keep that off the async workers
    let path = location.to_path_buf();
    let finisher = Arc::clone(delegate);
    let joined =
        tokio::task::spawn_blocking(move || finisher.did_finish_downloading(task, &path)).await;

    if let Err(e) = location.close() {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove temporary file for task {}: {}", task, e);
        }
    }
    joined.map_err(|e| TransportError::with_source(TransportErrorKind::Other, e))
}

fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn metadata_of(response: &reqwest::Response) -> ResponseMetadata {
    ResponseMetadata {
        status: response.status().as_u16(),
        url: response.url().clone(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        content_length: response.content_length(),
    }
}

/// Build a challenge from a 401 or 407 response that names a scheme
fn challenge_for(response: &reqwest::Response, previous_failure_count: u32) -> Option<AuthChallenge> {
    let (header, proxy) = match response.status() {
        StatusCode::UNAUTHORIZED => (reqwest::header::WWW_AUTHENTICATE, false),
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => (reqwest::header::PROXY_AUTHENTICATE, true),
        _ => return None,
    };
    let value = response.headers().get(header)?.to_str().ok()?;
    let (scheme, params) = parse_challenge(value)?;
    let url = response.url();

    Some(AuthChallenge {
        scheme,
        realm: params,
        host: url.host_str().unwrap_or_default().to_string(),
        port: url.port_or_known_default(),
        proxy,
        previous_failure_count,
    })
}

/// Split `Basic realm="example"` into its scheme and realm
fn parse_challenge(value: &str) -> Option<(String, Option<String>)> {
    let value = value.trim();
    let (scheme, rest) = value.split_once(' ').unwrap_or((value, ""));
    if scheme.is_empty() {
        return None;
    }
    let realm = rest.split(',').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("realm")
            .then(|| value.trim().trim_matches('"').to_string())
    });
    Some((scheme.to_string(), realm))
}

fn authorization_value(credential: &Credential) -> String {
    match credential {
        Credential::Basic { username, password } => {
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            format!("Basic {}", encoded)
        }
        Credential::Bearer { token } => format!("Bearer {}", token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge_with_realm() {
        let (scheme, realm) = parse_challenge(r#"Basic realm="courier", charset="UTF-8""#).unwrap();
        assert_eq!(scheme, "Basic");
        assert_eq!(realm.as_deref(), Some("courier"));
    }

    #[test]
    fn test_parse_challenge_without_params() {
        let (scheme, realm) = parse_challenge("Bearer").unwrap();
        assert_eq!(scheme, "Bearer");
        assert!(realm.is_none());
        assert!(parse_challenge("   ").is_none());
    }

    #[test]
    fn test_basic_authorization_value() {
        let credential = Credential::Basic {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(authorization_value(&credential), "Basic YWxpY2U6c2VjcmV0");
    }

    #[tokio::test]
    async fn test_identifiers_are_unique_and_positive() {
        let engine = HttpEngine::new(&SessionConfig::default()).unwrap();
        let first = engine.shared.allocate_id();
        let second = engine.shared.allocate_id();
        assert!(first.is_valid());
        assert!(second > first);
    }

    #[test]
    fn test_engine_requires_runtime() {
        assert!(matches!(
            HttpEngine::new(&SessionConfig::default()),
            Err(SessionError::Configuration(_))
        ));
    }

    type Completed = (Option<ResponseMetadata>, Option<TransportError>);

    /// Delegate whose file hand-off is slow enough to be cancelled mid-way
    struct SlowHandOff {
        started: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
        seen: Mutex<Option<Vec<u8>>>,
        completed: Mutex<Option<tokio::sync::oneshot::Sender<Completed>>>,
    }

    impl TaskDelegate for SlowHandOff {
        fn did_send_body_data(&self, _task: TaskId, _progress: Progress) {}

        fn did_receive_response(
            &self,
            _task: TaskId,
            _response: &ResponseMetadata,
        ) -> ResponseDisposition {
            ResponseDisposition::BecomeDownload
        }

        fn did_become_download_task(&self, _upload: TaskId, _download: TaskId) {}

        fn did_receive_data(&self, _task: TaskId, _data: Bytes) {}

        fn did_write_data(&self, _task: TaskId, _progress: Progress) {}

        fn did_finish_downloading(&self, _task: TaskId, location: &std::path::Path) {
            if let Some(started) = self.started.lock().take() {
                let _ = started.send(());
            }
            std::thread::sleep(std::time::Duration::from_millis(300));
            *self.seen.lock() = std::fs::read(location).ok();
        }

        fn did_complete(
            &self,
            _task: TaskId,
            response: Option<ResponseMetadata>,
            error: Option<TransportError>,
        ) {
            if let Some(completed) = self.completed.lock().take() {
                let _ = completed.send((response, error));
            }
        }

        fn did_receive_challenge(
            &self,
            _task: Option<TaskId>,
            _challenge: &AuthChallenge,
        ) -> courier_types::ChallengeResponse {
            courier_types::ChallengeResponse::default_handling()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_hand_off_keeps_file_until_delegate_returns() {
        let app = axum::Router::new().route("/payload", axum::routing::get(|| async { "payload" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (completed_tx, completed_rx) = tokio::sync::oneshot::channel();
        let delegate = Arc::new(SlowHandOff {
            started: Mutex::new(Some(started_tx)),
            seen: Mutex::new(None),
            completed: Mutex::new(Some(completed_tx)),
        });

        let engine = HttpEngine::new(&SessionConfig::default()).unwrap();
        let request = EngineRequest {
            method: HttpMethod::Get,
            url: url::Url::parse(&format!("http://{}/payload", addr)).unwrap(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        };
        let task = engine.create_upload_task(request, delegate.clone());
        engine.resume(task);

        started_rx.await.unwrap();
        engine.cancel(task);

        let (response, error) = completed_rx.await.unwrap();
        assert_eq!(delegate.seen.lock().as_deref(), Some(&b"payload"[..]));
        assert!(error.is_none());
        assert_eq!(response.unwrap().status, 200);
    }
}
