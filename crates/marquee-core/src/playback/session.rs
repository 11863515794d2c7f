//! Media session boundary
//!
//! Decoding and rendering live outside this crate. A [`MediaBackend`] opens a
//! [`MediaSession`] for a stream URL and reports its lifecycle through a
//! channel of [`SessionEvent`]s.

use crate::{types::ScalingMode, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Lifecycle notifications from an open session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Enough is buffered to start playing
    ReadyToPlay,
    /// Playback reached the end of the media
    PlayedToEnd,
    /// The session can no longer play
    Failed(String),
}

/// Transport surface of an opened stream
pub trait MediaSession: Send + Sync {
    /// Current playback rate (0.0 = stopped)
    fn rate(&self) -> f32;

    fn set_rate(&self, rate: f32);

    fn current_time(&self) -> Duration;

    /// Total length, `None` for live or not yet known
    fn duration(&self) -> Option<Duration>;

    fn seek(&self, to: Duration);

    fn set_volume(&self, volume: f32);

    fn set_scaling_mode(&self, mode: ScalingMode);
}

/// A freshly opened session plus its event stream
pub struct OpenedSession {
    pub session: Arc<dyn MediaSession>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Opens media sessions
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open(&self, url: &Url, scaling: ScalingMode) -> Result<OpenedSession>;
}
