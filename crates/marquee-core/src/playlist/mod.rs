//! Playlist loading
//!
//! [`PlaylistParser`] owns one [`FetchOperation`] for the playlist URL, runs
//! the fetched document through [`DocumentParser`] and reports the entries (or
//! the failure) to a [`PlaylistListener`].

mod document;

pub use document::{parse_document, DocumentParser, PlaylistSchema};

use crate::{
    fetch::{FetchListener, FetchOperation, FetchRequest, FetchSettings},
    types::{Credentials, MovieEntry},
    Error, Result,
};
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Receives the outcome of a [`PlaylistParser`]
pub trait PlaylistListener: Send + Sync {
    /// Fetching or parsing failed
    fn on_parse_failed(&self, parser: &PlaylistParser, error: &Error);

    /// The playlist was parsed; `entries` may be empty
    fn on_parse_finished(&self, _parser: &PlaylistParser, _entries: Vec<MovieEntry>) {}
}

/// Lifecycle of a playlist parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseState {
    Ready,
    Fetching,
    Finished,
    Failed,
    Cancelled,
}

impl ParseState {
    pub fn is_done(&self) -> bool {
        matches!(self, ParseState::Finished | ParseState::Failed | ParseState::Cancelled)
    }
}

impl std::fmt::Display for ParseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseState::Ready => write!(f, "ready"),
            ParseState::Fetching => write!(f, "fetching"),
            ParseState::Finished => write!(f, "finished"),
            ParseState::Failed => write!(f, "failed"),
            ParseState::Cancelled => write!(f, "cancelled"),
        }
    }
}

struct ParserConfig {
    schema: PlaylistSchema,
    settings: FetchSettings,
    listener: Option<Arc<dyn PlaylistListener>>,
}

struct ParserRun {
    state: ParseState,
    operation: Option<FetchOperation>,
    entries: Option<Vec<MovieEntry>>,
    error: Option<Error>,
}

struct ParserInner {
    url: Url,
    client: Client,
    config: Mutex<ParserConfig>,
    run: Mutex<ParserRun>,
    state_tx: watch::Sender<ParseState>,
}

/// Loads and parses a playlist document asynchronously
#[derive(Clone)]
pub struct PlaylistParser {
    inner: Arc<ParserInner>,
}

impl PlaylistParser {
    pub fn new(url: Url) -> Self {
        Self::with_client(url, Client::new())
    }

    pub fn with_client(url: Url, client: Client) -> Self {
        let (state_tx, _) = watch::channel(ParseState::Ready);

        Self {
            inner: Arc::new(ParserInner {
                url,
                client,
                config: Mutex::new(ParserConfig {
                    schema: PlaylistSchema::default(),
                    settings: FetchSettings::default(),
                    listener: None,
                }),
                run: Mutex::new(ParserRun {
                    state: ParseState::Ready,
                    operation: None,
                    entries: None,
                    error: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn state(&self) -> ParseState {
        self.inner.run.lock().state
    }

    /// The fetch currently in flight, if any
    pub fn operation(&self) -> Option<FetchOperation> {
        self.inner.run.lock().operation.clone()
    }

    pub fn schema(&self) -> PlaylistSchema {
        self.inner.config.lock().schema.clone()
    }

    pub fn set_listener(&self, listener: Arc<dyn PlaylistListener>) -> Result<()> {
        self.configure("listener", |config| config.listener = Some(listener))
    }

    pub fn set_schema(&self, schema: PlaylistSchema) -> Result<()> {
        self.configure("schema", |config| config.schema = schema)
    }

    pub fn set_fetch_settings(&self, settings: FetchSettings) -> Result<()> {
        self.configure("fetch settings", |config| config.settings = settings)
    }

    pub fn set_credentials(&self, credentials: Option<Credentials>) -> Result<()> {
        self.configure("credentials", |config| config.settings.credentials = credentials)
    }

    fn configure(&self, what: &str, apply: impl FnOnce(&mut ParserConfig)) -> Result<()> {
        let run = self.inner.run.lock();
        if run.state != ParseState::Ready {
            return Err(Error::InvalidConfig(format!(
                "cannot change {what} once the parser is {}",
                run.state
            )));
        }
        apply(&mut self.inner.config.lock());
        Ok(())
    }

    /// Create and start the fetch for the playlist
    ///
    /// Only misuse (no runtime, already started) is reported here; fetch and
    /// parse failures go to [`PlaylistListener::on_parse_failed`].
    pub fn start(&self) -> Result<()> {
        let settings = self.inner.config.lock().settings.clone();
        let request = FetchRequest::with_settings(self.inner.url.clone(), settings);
        let operation = FetchOperation::with_client(request, self.inner.client.clone());
        operation.set_listener(Arc::new(FetchBridge {
            parser: Arc::downgrade(&self.inner),
        }))?;

        {
            let mut run = self.inner.run.lock();
            if run.state != ParseState::Ready {
                return Err(Error::InvalidStateTransition {
                    from: run.state.to_string(),
                    to: ParseState::Fetching.to_string(),
                });
            }
            run.state = ParseState::Fetching;
            run.operation = Some(operation.clone());
            self.inner.state_tx.send_replace(ParseState::Fetching);
        }

        info!(url = %self.inner.url, operation = %operation.id(), "Loading playlist");

        if let Err(e) = operation.start() {
            let mut run = self.inner.run.lock();
            if run.state == ParseState::Fetching {
                run.state = ParseState::Ready;
                run.operation = None;
                self.inner.state_tx.send_replace(ParseState::Ready);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Cancel the owned fetch and discard parse state without notifying
    pub fn cancel(&self) -> bool {
        let operation = {
            let mut run = self.inner.run.lock();
            if run.state.is_done() {
                return false;
            }
            run.state = ParseState::Cancelled;
            run.entries = None;
            self.inner.state_tx.send_replace(ParseState::Cancelled);
            run.operation.take()
        };

        if let Some(operation) = operation {
            operation.cancel();
        }

        info!(url = %self.inner.url, "Playlist loading cancelled");
        true
    }

    /// Wait for the outcome
    ///
    /// Never resolves for a parser that is never started or cancelled.
    pub async fn wait(&self) -> Result<Vec<MovieEntry>> {
        let mut rx = self.inner.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_done()).await {
            Ok(state) => *state,
            Err(_) => return Err(Error::Internal("parser state channel closed".to_string())),
        };

        let run = self.inner.run.lock();
        match state {
            ParseState::Finished => Ok(run.entries.clone().unwrap_or_default()),
            ParseState::Failed => Err(run
                .error
                .clone()
                .unwrap_or_else(|| Error::Internal("parser failed without an error".to_string()))),
            _ => Err(Error::Cancelled),
        }
    }

    fn handle_document(&self, data: Bytes) {
        if self.state() != ParseState::Fetching {
            return;
        }

        let schema = self.schema();
        debug!(url = %self.inner.url, bytes = data.len(), "Parsing playlist document");

        match parse_document(&data, &schema) {
            Ok(entries) => self.finish(entries),
            Err(e) => self.fail(e),
        }
    }

    fn finish(&self, entries: Vec<MovieEntry>) {
        {
            let mut run = self.inner.run.lock();
            if run.state != ParseState::Fetching {
                return;
            }
            run.state = ParseState::Finished;
            run.operation = None;
            run.entries = Some(entries.clone());
            self.inner.state_tx.send_replace(ParseState::Finished);
        }

        info!(url = %self.inner.url, entries = entries.len(), "Playlist parsed");

        let listener = self.inner.config.lock().listener.clone();
        if let Some(listener) = listener {
            listener.on_parse_finished(self, entries);
        }
    }

    fn fail(&self, error: Error) {
        {
            let mut run = self.inner.run.lock();
            if run.state != ParseState::Fetching {
                return;
            }
            run.state = ParseState::Failed;
            run.operation = None;
            run.error = Some(error.clone());
            self.inner.state_tx.send_replace(ParseState::Failed);
        }

        warn!(url = %self.inner.url, code = error.error_code(), error = %error, "Playlist loading failed");

        let listener = self.inner.config.lock().listener.clone();
        if let Some(listener) = listener {
            listener.on_parse_failed(self, &error);
        }
    }
}

impl std::fmt::Debug for PlaylistParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistParser")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// Routes fetch outcomes back to the parser without keeping it alive
struct FetchBridge {
    parser: Weak<ParserInner>,
}

impl FetchBridge {
    fn parser(&self) -> Option<PlaylistParser> {
        self.parser.upgrade().map(|inner| PlaylistParser { inner })
    }
}

impl FetchListener for FetchBridge {
    fn on_failed(&self, _operation: &FetchOperation, error: &Error) {
        if let Some(parser) = self.parser() {
            parser.fail(error.clone());
        }
    }

    fn on_finished(&self, _operation: &FetchOperation, data: Bytes) {
        if let Some(parser) = self.parser() {
            parser.handle_document(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> PlaylistParser {
        PlaylistParser::new(Url::parse("http://127.0.0.1:9/movies.xml").unwrap())
    }

    #[test]
    fn test_start_outside_runtime_keeps_parser_ready() {
        let parser = parser();
        assert!(parser.start().is_err());
        assert_eq!(parser.state(), ParseState::Ready);
        assert!(parser.operation().is_none());
    }

    #[test]
    fn test_cancel_before_start() {
        let parser = parser();
        assert!(parser.cancel());
        assert!(!parser.cancel());
        assert_eq!(parser.state(), ParseState::Cancelled);
        assert!(parser.set_schema(PlaylistSchema::default()).is_err());
    }

    #[tokio::test]
    async fn test_configuration_rejected_after_start() {
        let parser = parser();
        parser.set_credentials(Some(Credentials::new("u", "p"))).unwrap();
        parser.start().unwrap();

        assert!(parser.start().is_err());
        assert!(matches!(
            parser.set_fetch_settings(FetchSettings::default()),
            Err(Error::InvalidConfig(_))
        ));

        parser.cancel();
    }
}
