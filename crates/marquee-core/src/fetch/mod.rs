//! Network fetching
//!
//! A [`FetchOperation`] performs a single HTTP(S) request on its own tokio
//! task, accumulates the body and reports the outcome to a [`FetchListener`].
//! [`FetchQueue`] schedules many operations with bounded concurrency.

mod operation;
pub mod queue;

pub use operation::{FetchOperation, OperationState};
pub use queue::FetchQueue;

use crate::{
    types::{duration_ms, CachePolicy, Credentials},
    Error,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Request settings shared by every fetch of a given kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Cache behaviour
    pub cache_policy: CachePolicy,
    /// Upper bound for the whole fetch, connection through last byte
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Maximum accepted body size in bytes (`None` = unbounded)
    pub max_size: Option<u64>,
    /// Credentials answered to an authentication challenge
    pub credentials: Option<Credentials>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            cache_policy: CachePolicy::UseProtocolDefault,
            timeout: Duration::from_secs(60),
            max_size: None,
            credentials: None,
        }
    }
}

/// One fetch attempt: target plus settings
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: Url,
    pub settings: FetchSettings,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            settings: FetchSettings::default(),
        }
    }

    pub fn with_settings(url: Url, settings: FetchSettings) -> Self {
        Self { url, settings }
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.settings.cache_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.settings.max_size = Some(max_size);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.settings.credentials = Some(Credentials::new(username, password));
        self
    }
}

/// Listener answer to an authentication challenge
#[derive(Debug, Clone, Default)]
pub enum AuthChallengeResponse {
    /// Retry the challenge with these credentials
    UseCredentials(Credentials),
    /// Withdraw: stop answering the challenge
    Cancel,
    /// No answer; the fetch fails
    #[default]
    Unanswered,
}

/// Receives the outcome of a [`FetchOperation`]
///
/// Only [`on_failed`](FetchListener::on_failed) is mandatory. Callbacks run on
/// the operation's task, not on the caller that started it.
pub trait FetchListener: Send + Sync {
    /// The fetch failed; the operation is finished
    fn on_failed(&self, operation: &FetchOperation, error: &Error);

    /// The fetch completed with the full body
    fn on_finished(&self, _operation: &FetchOperation, _data: Bytes) {}

    /// The server challenged and no stored credentials were accepted
    fn on_authentication_needed(&self, _operation: &FetchOperation) -> AuthChallengeResponse {
        AuthChallengeResponse::Unanswered
    }

    /// Credentials for a challenge were withdrawn
    fn on_authentication_canceled(&self, _operation: &FetchOperation) {}

    /// Acknowledges a successful [`FetchOperation::cancel`]
    fn on_cancelled(&self, _operation: &FetchOperation) {}
}
