//! Headless media backend
//!
//! [`ClockBackend`] opens sessions that render nothing: their position is a
//! clock advancing with the playback rate. It backs the command-line player
//! and the controller tests.

use super::session::{MediaBackend, MediaSession, OpenedSession, SessionEvent};
use crate::{types::ScalingMode, Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tracing::debug;
use url::Url;

/// How often an open session checks whether it reached the end
const END_CHECK_INTERVAL: Duration = Duration::from_millis(50);

struct ClockState {
    anchor_position: Duration,
    anchor_instant: Instant,
    rate: f32,
    volume: f32,
    scaling: ScalingMode,
}

/// Session whose position advances with wall time times rate
pub struct ClockSession {
    url: Url,
    duration: Option<Duration>,
    state: Mutex<ClockState>,
}

impl ClockSession {
    fn new(url: Url, duration: Option<Duration>, scaling: ScalingMode) -> Self {
        Self {
            url,
            duration,
            state: Mutex::new(ClockState {
                anchor_position: Duration::ZERO,
                anchor_instant: Instant::now(),
                rate: 0.0,
                volume: 1.0,
                scaling,
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn scaling_mode(&self) -> ScalingMode {
        self.state.lock().scaling
    }

    fn position(&self, state: &ClockState) -> Duration {
        let elapsed = Instant::now().saturating_duration_since(state.anchor_instant);
        // Out-of-range products saturate instead of panicking
        let travelled = Duration::try_from_secs_f64(elapsed.as_secs_f64() * f64::from(state.rate.abs()))
            .unwrap_or(Duration::MAX);
        let position = if state.rate >= 0.0 {
            state.anchor_position.saturating_add(travelled)
        } else {
            state.anchor_position.saturating_sub(travelled)
        };
        self.clamp(position)
    }

    fn clamp(&self, position: Duration) -> Duration {
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn reached_end(&self) -> bool {
        let state = self.state.lock();
        match self.duration {
            Some(duration) => state.rate > 0.0 && self.position(&state) >= duration,
            None => false,
        }
    }
}

impl MediaSession for ClockSession {
    fn rate(&self) -> f32 {
        self.state.lock().rate
    }

    fn set_rate(&self, rate: f32) {
        let mut state = self.state.lock();
        state.anchor_position = self.position(&state);
        state.anchor_instant = Instant::now();
        state.rate = rate;
    }

    fn current_time(&self) -> Duration {
        let state = self.state.lock();
        self.position(&state)
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn seek(&self, to: Duration) {
        let mut state = self.state.lock();
        state.anchor_position = self.clamp(to);
        state.anchor_instant = Instant::now();
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().volume = volume;
    }

    fn set_scaling_mode(&self, mode: ScalingMode) {
        self.state.lock().scaling = mode;
    }
}

/// Test and tooling handle onto a session opened by [`ClockBackend`]
///
/// Holds no strong reference; once the controller drops the session the
/// handle's accessors return `None`.
#[derive(Clone)]
pub struct ClockHandle {
    session: Weak<ClockSession>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ClockHandle {
    /// Signal that the session can play
    pub fn mark_ready(&self) {
        let _ = self.events.send(SessionEvent::ReadyToPlay);
    }

    /// Signal the natural end of the media
    pub fn end(&self) {
        let _ = self.events.send(SessionEvent::PlayedToEnd);
    }

    /// Signal a fatal session error
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.events.send(SessionEvent::Failed(message.into()));
    }

    pub fn is_alive(&self) -> bool {
        self.session.strong_count() > 0
    }

    pub fn rate(&self) -> Option<f32> {
        self.session.upgrade().map(|s| s.rate())
    }

    pub fn position(&self) -> Option<Duration> {
        self.session.upgrade().map(|s| s.current_time())
    }

    pub fn volume(&self) -> Option<f32> {
        self.session.upgrade().map(|s| s.volume())
    }

    pub fn scaling_mode(&self) -> Option<ScalingMode> {
        self.session.upgrade().map(|s| s.scaling_mode())
    }
}

/// Opens [`ClockSession`]s
pub struct ClockBackend {
    duration: Option<Duration>,
    ready_after: Option<Duration>,
    open_error: Option<String>,
    opened: watch::Sender<Option<ClockHandle>>,
}

impl ClockBackend {
    /// Sessions of the given length that become ready right away
    pub fn new(duration: Option<Duration>) -> Self {
        let (opened, _) = watch::channel(None);
        Self {
            duration,
            ready_after: Some(Duration::ZERO),
            open_error: None,
            opened,
        }
    }

    /// Become ready only after `delay`
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_after = Some(delay);
        self
    }

    /// Never become ready on their own; use [`ClockHandle::mark_ready`]
    pub fn manual_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    /// Refuse to open anything
    pub fn failing(message: impl Into<String>) -> Self {
        let mut backend = Self::new(None);
        backend.open_error = Some(message.into());
        backend
    }

    /// Handle onto the most recently opened session
    pub fn last_session(&self) -> Option<ClockHandle> {
        self.opened.borrow().clone()
    }

    /// Wait until a session has been opened
    pub async fn opened(&self) -> Result<ClockHandle> {
        let mut rx = self.opened.subscribe();
        let handle = rx
            .wait_for(|handle| handle.is_some())
            .await
            .map_err(|_| Error::Internal("clock backend dropped".to_string()))?
            .clone();
        handle.ok_or_else(|| Error::Internal("clock backend opened nothing".to_string()))
    }
}

#[async_trait]
impl MediaBackend for ClockBackend {
    async fn open(&self, url: &Url, scaling: ScalingMode) -> Result<OpenedSession> {
        if let Some(message) = &self.open_error {
            return Err(Error::session(message.clone()));
        }

        let session = Arc::new(ClockSession::new(url.clone(), self.duration, scaling));
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = ClockHandle {
            session: Arc::downgrade(&session),
            events: tx.clone(),
        };

        tokio::spawn(watch_session(Arc::downgrade(&session), tx, self.ready_after));
        self.opened.send_replace(Some(handle));

        debug!(url = %url, duration = ?self.duration, "Clock session opened");

        Ok(OpenedSession { session, events: rx })
    }
}

async fn watch_session(
    session: Weak<ClockSession>,
    events: mpsc::UnboundedSender<SessionEvent>,
    ready_after: Option<Duration>,
) {
    let Some(ready_after) = ready_after else {
        // Readiness is signalled by hand; still watch for the end
        return watch_end(session, events).await;
    };

    if !ready_after.is_zero() {
        tokio::time::sleep(ready_after).await;
    }
    if session.strong_count() == 0 || events.send(SessionEvent::ReadyToPlay).is_err() {
        return;
    }

    watch_end(session, events).await
}

async fn watch_end(session: Weak<ClockSession>, events: mpsc::UnboundedSender<SessionEvent>) {
    let mut ticker = tokio::time::interval(END_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            return;
        };
        if session.reached_end() {
            let _ = events.send(SessionEvent::PlayedToEnd);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://media.example.com/a/index.m3u8").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_advances_with_rate() {
        let session = ClockSession::new(url(), Some(Duration::from_secs(60)), ScalingMode::default());
        assert_eq!(session.current_time(), Duration::ZERO);

        session.set_rate(1.0);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(session.current_time(), Duration::from_secs(10));

        session.set_rate(2.0);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(session.current_time(), Duration::from_secs(20));

        session.set_rate(0.0);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(session.current_time(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_is_clamped_to_duration() {
        let session = ClockSession::new(url(), Some(Duration::from_secs(3)), ScalingMode::default());
        session.seek(Duration::from_secs(10));
        assert_eq!(session.current_time(), Duration::from_secs(3));

        session.seek(Duration::from_secs(1));
        session.set_rate(1.0);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(session.current_time(), Duration::from_secs(3));
        assert!(session.reached_end());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_rates_saturate() {
        let live = ClockSession::new(url(), None, ScalingMode::default());
        live.set_rate(f32::MAX);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(live.current_time(), Duration::MAX);

        live.set_rate(f32::MIN);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(live.current_time(), Duration::ZERO);

        let bounded = ClockSession::new(url(), Some(Duration::from_secs(3)), ScalingMode::default());
        bounded.set_rate(1e30);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(bounded.current_time(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_reports_ready_then_end() {
        let backend = ClockBackend::new(Some(Duration::from_secs(1)));
        let OpenedSession { session, mut events } = backend.open(&url(), ScalingMode::ResizeAspectFill).await.unwrap();

        assert_eq!(events.recv().await, Some(SessionEvent::ReadyToPlay));
        assert_eq!(backend.last_session().unwrap().scaling_mode(), Some(ScalingMode::ResizeAspectFill));

        session.set_rate(1.0);
        assert_eq!(events.recv().await, Some(SessionEvent::PlayedToEnd));
    }

    #[tokio::test]
    async fn test_failing_backend() {
        let backend = ClockBackend::failing("no decoder");
        assert!(matches!(
            backend.open(&url(), ScalingMode::default()).await,
            Err(Error::SessionError(_))
        ));
        assert!(backend.last_session().is_none());
    }
}
