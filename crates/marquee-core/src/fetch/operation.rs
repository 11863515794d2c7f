//! Fetch operation - one scheduled HTTP request and its lifecycle

use super::{AuthChallengeResponse, FetchListener, FetchRequest};
use crate::{
    types::{CachePolicy, Credentials, OperationId},
    Error, Result,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{header, Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Largest body pre-allocation taken from a declared content length
const PREALLOCATE_LIMIT: u64 = 4 * 1024 * 1024;

/// Lifecycle states of a fetch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    /// Created, not started
    Ready,
    /// Request in flight
    Executing,
    /// Body delivered
    Succeeded,
    /// Error delivered
    Failed,
    /// Cancelled before finishing
    Cancelled,
}

impl OperationState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, target),
            (Ready, Executing)
                | (Ready, Cancelled)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Executing, Cancelled)
        )
    }

    pub fn is_executing(&self) -> bool {
        *self == OperationState::Executing
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Cancelled
        )
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationState::Ready => write!(f, "ready"),
            OperationState::Executing => write!(f, "executing"),
            OperationState::Succeeded => write!(f, "succeeded"),
            OperationState::Failed => write!(f, "failed"),
            OperationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

struct Lifecycle {
    state: OperationState,
    content_length: Option<u64>,
    bytes_received: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    body: Option<Bytes>,
    error: Option<Error>,
    task: Option<JoinHandle<()>>,
}

struct OperationInner {
    id: OperationId,
    client: Client,
    request: Mutex<FetchRequest>,
    listener: Mutex<Option<Arc<dyn FetchListener>>>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<OperationState>,
}

/// A cancellable unit of work performing one HTTP(S) request
///
/// The handle is cheap to clone; all clones refer to the same operation. The
/// state only moves forward: `Ready -> Executing -> {Succeeded, Failed}`, with
/// `Cancelled` reachable from `Ready` and `Executing`. Exactly one terminal
/// notification is delivered to the listener, after which the listener slot
/// is released.
#[derive(Clone)]
pub struct FetchOperation {
    inner: Arc<OperationInner>,
}

impl FetchOperation {
    /// Create a new operation with its own HTTP client
    pub fn new(request: FetchRequest) -> Self {
        Self::with_client(request, Client::new())
    }

    /// Create a new operation sharing an existing HTTP client
    pub fn with_client(request: FetchRequest, client: Client) -> Self {
        let (state_tx, _) = watch::channel(OperationState::Ready);

        Self {
            inner: Arc::new(OperationInner {
                id: OperationId::new(),
                client,
                request: Mutex::new(request),
                listener: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle {
                    state: OperationState::Ready,
                    content_length: None,
                    bytes_received: 0,
                    started_at: None,
                    finished_at: None,
                    body: None,
                    error: None,
                    task: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn url(&self) -> Url {
        self.inner.request.lock().url.clone()
    }

    /// Snapshot of the request as currently configured
    pub fn request(&self) -> FetchRequest {
        self.inner.request.lock().clone()
    }

    pub fn state(&self) -> OperationState {
        self.inner.lifecycle.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == OperationState::Ready
    }

    pub fn is_executing(&self) -> bool {
        self.state().is_executing()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == OperationState::Cancelled
    }

    /// Declared body length, once response headers arrived
    pub fn content_length(&self) -> Option<u64> {
        self.inner.lifecycle.lock().content_length
    }

    /// Body bytes received so far
    pub fn bytes_received(&self) -> u64 {
        self.inner.lifecycle.lock().bytes_received
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lifecycle.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lifecycle.lock().finished_at
    }

    /// The failure, once the operation has failed
    pub fn error(&self) -> Option<Error> {
        self.inner.lifecycle.lock().error.clone()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.inner.state_tx.subscribe()
    }

    /// Register the listener. Only valid before [`start`](Self::start).
    pub fn set_listener(&self, listener: Arc<dyn FetchListener>) -> Result<()> {
        let lifecycle = self.inner.lifecycle.lock();
        ensure_configurable(lifecycle.state, "listener")?;
        *self.inner.listener.lock() = Some(listener);
        Ok(())
    }

    pub fn set_credentials(&self, credentials: Option<Credentials>) -> Result<()> {
        self.configure("credentials", |request| request.settings.credentials = credentials)
    }

    pub fn set_cache_policy(&self, policy: CachePolicy) -> Result<()> {
        self.configure("cache policy", |request| request.settings.cache_policy = policy)
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.configure("timeout", |request| request.settings.timeout = timeout)
    }

    pub fn set_max_size(&self, max_size: Option<u64>) -> Result<()> {
        self.configure("maximum size", |request| request.settings.max_size = max_size)
    }

    fn configure(&self, what: &str, apply: impl FnOnce(&mut FetchRequest)) -> Result<()> {
        let lifecycle = self.inner.lifecycle.lock();
        ensure_configurable(lifecycle.state, what)?;
        apply(&mut self.inner.request.lock());
        Ok(())
    }

    /// Begin the request on the current tokio runtime
    ///
    /// Fails only when called outside a runtime or on an operation that is
    /// not `Ready`; every fetch failure is reported to the listener instead.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Internal("fetch operations must be started inside a tokio runtime".to_string())
        })?;

        let mut lifecycle = self.inner.lifecycle.lock();
        self.transition_locked(&mut lifecycle, OperationState::Executing)?;

        let operation = self.clone();
        lifecycle.task = Some(runtime.spawn(async move { operation.run().await }));

        Ok(())
    }

    /// Cancel the operation
    ///
    /// Returns `true` when the cancellation took effect. After that no
    /// listener hook fires except [`FetchListener::on_cancelled`].
    pub fn cancel(&self) -> bool {
        let task = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if self.transition_locked(&mut lifecycle, OperationState::Cancelled).is_err() {
                return false;
            }
            lifecycle.task.take()
        };

        if let Some(task) = task {
            task.abort();
        }

        info!(operation = %self.inner.id, "Fetch cancelled");

        if let Some(listener) = self.take_listener() {
            listener.on_cancelled(self);
        }

        true
    }

    /// Wait until the operation finishes and return its body
    ///
    /// Never resolves for an operation that is never started or cancelled.
    pub async fn wait(&self) -> Result<Bytes> {
        let mut rx = self.inner.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_finished()).await {
            Ok(state) => *state,
            Err(_) => return Err(Error::Internal("operation state channel closed".to_string())),
        };

        let lifecycle = self.inner.lifecycle.lock();
        match state {
            OperationState::Succeeded => lifecycle
                .body
                .clone()
                .ok_or_else(|| Error::Internal("operation succeeded without a body".to_string())),
            OperationState::Failed => Err(lifecycle
                .error
                .clone()
                .unwrap_or_else(|| Error::Internal("operation failed without an error".to_string()))),
            _ => Err(Error::Cancelled),
        }
    }

    fn transition_locked(&self, lifecycle: &mut Lifecycle, to: OperationState) -> Result<()> {
        let from = lifecycle.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        lifecycle.state = to;
        if to == OperationState::Executing {
            lifecycle.started_at = Some(Utc::now());
        } else if to.is_finished() {
            lifecycle.finished_at = Some(Utc::now());
        }
        self.inner.state_tx.send_replace(to);

        debug!(operation = %self.inner.id, from = %from, to = %to, "Operation state transition");

        Ok(())
    }

    fn take_listener(&self) -> Option<Arc<dyn FetchListener>> {
        self.inner.listener.lock().take()
    }

    fn listener(&self) -> Option<Arc<dyn FetchListener>> {
        self.inner.listener.lock().clone()
    }

    #[instrument(skip(self), fields(operation = %self.inner.id))]
    async fn run(self) {
        let request = self.request();
        let timeout = request.settings.timeout;

        info!(url = %request.url, cache_policy = ?request.settings.cache_policy, "Fetch started");

        let outcome = match tokio::time::timeout(timeout, self.perform(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(data) => self.complete(data),
            Err(error) => self.fail(error),
        }
    }

    async fn perform(&self, request: &FetchRequest) -> Result<Bytes> {
        let mut stored = request.settings.credentials.clone();
        let mut answer: Option<Credentials> = None;
        let mut consulted_listener = false;

        loop {
            let response = self.send(request, answer.as_ref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return self.read_body(request, response).await;
            }

            if !is_challenge_for(&response, &request.url) {
                warn!(url = %response.url(), "Unauthorized response without a matching challenge");
                return Err(Error::AuthenticationFailed {
                    url: request.url.to_string(),
                });
            }

            if answer.is_none() {
                if let Some(credentials) = stored.take() {
                    debug!(username = %credentials.username, "Answering challenge with stored credentials");
                    answer = Some(credentials);
                    continue;
                }
            }

            if !consulted_listener {
                consulted_listener = true;
                match self.request_credentials() {
                    AuthChallengeResponse::UseCredentials(credentials) => {
                        debug!(username = %credentials.username, "Answering challenge with listener credentials");
                        answer = Some(credentials);
                        continue;
                    }
                    AuthChallengeResponse::Cancel => {
                        info!("Authentication withdrawn by listener");
                        if let Some(listener) = self.listener() {
                            listener.on_authentication_canceled(self);
                        }
                    }
                    AuthChallengeResponse::Unanswered => {}
                }
            }

            return Err(Error::AuthenticationFailed {
                url: request.url.to_string(),
            });
        }
    }

    fn request_credentials(&self) -> AuthChallengeResponse {
        if self.is_cancelled() {
            return AuthChallengeResponse::Unanswered;
        }
        match self.listener() {
            Some(listener) => listener.on_authentication_needed(self),
            None => AuthChallengeResponse::Unanswered,
        }
    }

    async fn send(&self, request: &FetchRequest, credentials: Option<&Credentials>) -> Result<Response> {
        let mut builder = self.inner.client.get(request.url.clone());

        for (name, value) in request.settings.cache_policy.request_headers() {
            builder = builder.header(*name, *value);
        }
        if let Some(credentials) = credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        Ok(builder.send().await?)
    }

    async fn read_body(&self, request: &FetchRequest, mut response: Response) -> Result<Bytes> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let declared = response.content_length();
        let limit = request.settings.max_size;
        self.inner.lifecycle.lock().content_length = declared;

        debug!(status = status.as_u16(), content_length = ?declared, "Response headers received");

        if let (Some(limit), Some(declared)) = (limit, declared) {
            if declared > limit {
                return Err(Error::SizeExceeded {
                    received: declared,
                    limit,
                });
            }
        }

        let capacity = declared.map(|d| d.min(PREALLOCATE_LIMIT) as usize).unwrap_or(0);
        let mut buffer = BytesMut::with_capacity(capacity);

        while let Some(chunk) = response.chunk().await? {
            let total = self.record_chunk(chunk.len() as u64)?;
            if let Some(limit) = limit {
                if total > limit {
                    return Err(Error::SizeExceeded { received: total, limit });
                }
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }

    fn record_chunk(&self, len: u64) -> Result<u64> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != OperationState::Executing {
            return Err(Error::Cancelled);
        }
        lifecycle.bytes_received += len;
        Ok(lifecycle.bytes_received)
    }

    fn complete(&self, data: Bytes) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if self.transition_locked(&mut lifecycle, OperationState::Succeeded).is_err() {
                debug!(operation = %self.inner.id, "Discarding body of cancelled operation");
                return;
            }
            lifecycle.body = Some(data.clone());
            lifecycle.task = None;
        }

        info!(operation = %self.inner.id, bytes = data.len(), "Fetch finished");

        if let Some(listener) = self.take_listener() {
            listener.on_finished(self, data);
        }
    }

    fn fail(&self, error: Error) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if self.transition_locked(&mut lifecycle, OperationState::Failed).is_err() {
                debug!(operation = %self.inner.id, error = %error, "Discarding failure of cancelled operation");
                return;
            }
            lifecycle.error = Some(error.clone());
            lifecycle.task = None;
        }

        warn!(operation = %self.inner.id, code = error.error_code(), error = %error, "Fetch failed");

        if let Some(listener) = self.take_listener() {
            listener.on_failed(self, &error);
        }
    }
}

impl std::fmt::Debug for FetchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOperation")
            .field("id", &self.inner.id)
            .field("url", &self.url().as_str())
            .field("state", &self.state())
            .finish()
    }
}

fn ensure_configurable(state: OperationState, what: &str) -> Result<()> {
    if state == OperationState::Ready {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("cannot change {what} once the operation is {state}")))
    }
}

/// A 401 counts as a challenge only when it carries `WWW-Authenticate` and
/// comes from the origin that was asked
fn is_challenge_for(response: &Response, target: &Url) -> bool {
    response.headers().contains_key(header::WWW_AUTHENTICATE) && response.url().origin() == target.origin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        failed: AtomicUsize,
        finished: AtomicUsize,
        cancelled: AtomicUsize,
    }

    impl FetchListener for CountingListener {
        fn on_failed(&self, _operation: &FetchOperation, _error: &Error) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finished(&self, _operation: &FetchOperation, _data: Bytes) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn on_cancelled(&self, _operation: &FetchOperation) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> FetchRequest {
        FetchRequest::new(Url::parse("http://127.0.0.1:9/playlist.xml").unwrap())
    }

    #[test]
    fn test_state_transitions() {
        use OperationState::*;
        assert!(Ready.can_transition_to(Executing));
        assert!(Ready.can_transition_to(Cancelled));
        assert!(Executing.can_transition_to(Succeeded));
        assert!(Executing.can_transition_to(Failed));
        assert!(Executing.can_transition_to(Cancelled));

        assert!(!Ready.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Executing));
        assert!(!Failed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Ready));
    }

    #[test]
    fn test_executing_and_finished_are_exclusive() {
        use OperationState::*;
        for state in [Ready, Executing, Succeeded, Failed, Cancelled] {
            assert!(!(state.is_executing() && state.is_finished()));
        }
    }

    #[test]
    fn test_start_outside_runtime_is_rejected() {
        let operation = FetchOperation::new(request());
        assert!(operation.start().is_err());
        assert!(operation.is_ready());
    }

    #[test]
    fn test_cancel_from_ready_acknowledges_once() {
        let listener = Arc::new(CountingListener::default());
        let operation = FetchOperation::new(request());
        operation.set_listener(listener.clone()).unwrap();

        assert!(operation.cancel());
        assert!(!operation.cancel());

        assert!(operation.is_cancelled());
        assert!(operation.is_finished());
        assert_eq!(listener.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(listener.failed.load(Ordering::SeqCst), 0);
        assert_eq!(listener.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configuration_rejected_after_start() {
        let operation = FetchOperation::new(request());
        operation.set_credentials(Some(Credentials::new("u", "p"))).unwrap();

        operation.start().unwrap();
        assert!(operation.start().is_err());

        assert!(matches!(
            operation.set_credentials(None),
            Err(Error::InvalidConfig(_))
        ));
        assert!(operation.set_timeout(Duration::from_secs(1)).is_err());
        assert!(operation.set_listener(Arc::new(CountingListener::default())).is_err());

        // Port 9 refuses quickly, so the fetch may already have failed
        operation.cancel();
        assert!(operation.wait().await.is_err());
        assert!(operation.is_finished());
    }
}
