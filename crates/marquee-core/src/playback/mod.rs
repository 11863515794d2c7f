//! Playback control
//!
//! A [`PlaybackController`] owns one media session opened through a
//! [`MediaBackend`] and drives it through the playback state machine:
//!
//! ```text
//! Idle -> Loading -> Ready <-> Playing <-> Paused
//!                               \         /
//!                                Scrubbing
//!
//! any active state -> Finished(PlaybackEnded | PlaybackError)
//! ```
//!
//! Observers follow the controller through [`PlaybackEvent`]s and the state
//! and time `watch` channels.

mod clock;
mod controller;
mod session;

pub use clock::{ClockBackend, ClockHandle, ClockSession};
pub use controller::PlaybackController;
pub use session::{MediaBackend, MediaSession, OpenedSession, SessionEvent};

use crate::types::{duration_ms, ControllerId, FinishReason, Orientation, PlaybackState, ScalingMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller behaviour, fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// Start playing as soon as the session is ready
    pub autoplay: bool,
    pub scaling_mode: ScalingMode,
    /// Period of the elapsed/remaining time sampler
    #[serde(with = "duration_ms")]
    pub sample_interval: Duration,
    /// Idle time while playing before the controls hide; zero disables hiding
    #[serde(with = "duration_ms")]
    pub hide_controls_after: Duration,
    /// Rate applied while scrubbing
    pub scrub_rate: f32,
    /// Rate used by `play()`
    pub preferred_rate: f32,
    /// Enter fullscreen in landscape and leave it in portrait
    pub rotate_to_fullscreen: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            autoplay: false,
            scaling_mode: ScalingMode::default(),
            sample_interval: Duration::from_millis(250),
            hide_controls_after: Duration::from_secs(5),
            scrub_rate: 0.0,
            preferred_rate: 1.0,
            rotate_to_fullscreen: true,
        }
    }
}

/// Notifications broadcast by a [`PlaybackController`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged {
        controller: ControllerId,
        from: PlaybackState,
        to: PlaybackState,
    },
    ControlsVisibility {
        controller: ControllerId,
        visible: bool,
    },
    LayoutChanged {
        controller: ControllerId,
        fullscreen: bool,
        orientation: Orientation,
    },
    /// Sent exactly once per controller
    Finished {
        controller: ControllerId,
        reason: FinishReason,
    },
}

impl PlaybackEvent {
    pub fn controller(&self) -> ControllerId {
        match self {
            PlaybackEvent::StateChanged { controller, .. }
            | PlaybackEvent::ControlsVisibility { controller, .. }
            | PlaybackEvent::LayoutChanged { controller, .. }
            | PlaybackEvent::Finished { controller, .. } => *controller,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = PlaybackOptions::default();
        assert!(!options.autoplay);
        assert_eq!(options.scaling_mode, ScalingMode::ResizeAspect);
        assert_eq!(options.sample_interval, Duration::from_millis(250));
        assert_eq!(options.hide_controls_after, Duration::from_secs(5));
        assert_eq!(options.scrub_rate, 0.0);
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: PlaybackOptions =
            serde_json::from_str(r#"{"autoplay": true, "hide_controls_after": 1500, "scaling_mode": "resize_aspect_fill"}"#)
                .unwrap();

        assert!(options.autoplay);
        assert_eq!(options.hide_controls_after, Duration::from_millis(1500));
        assert_eq!(options.scaling_mode, ScalingMode::ResizeAspectFill);
        assert_eq!(options.sample_interval, Duration::from_millis(250));
    }
}
