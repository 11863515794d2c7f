//! Core types for Marquee

use nom::{
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res, opt},
    multi::separated_list1,
    sequence::{pair, preceded},
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Unique identifier for a fetch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a playback controller, carried by its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerId(pub Uuid);

impl ControllerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ControllerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ControllerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One playable entry of a playlist document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovieEntry {
    /// Display title
    pub title: String,
    /// Duration as published (usually `mm:ss`)
    pub duration: String,
    /// Poster image location, possibly relative to the playlist
    pub poster: String,
    /// Media stream location, possibly relative to the playlist
    pub path: String,
}

impl MovieEntry {
    pub fn new(
        title: impl Into<String>,
        duration: impl Into<String>,
        poster: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            duration: duration.into(),
            poster: poster.into(),
            path: path.into(),
        }
    }

    /// Parse the published duration (`ss`, `mm:ss` or `hh:mm:ss`, optional
    /// fractional seconds). Returns `None` when it is not a clock value.
    pub fn duration_hint(&self) -> Option<Duration> {
        parse_clock(&self.duration)
    }

    /// Resolve the media path against the playlist location
    pub fn media_url(&self, base: &Url) -> crate::Result<Url> {
        Ok(base.join(self.path.trim())?)
    }

    /// Resolve the poster location against the playlist location
    pub fn poster_url(&self, base: &Url) -> crate::Result<Url> {
        Ok(base.join(self.poster.trim())?)
    }
}

fn clock_components(input: &str) -> IResult<&str, (Vec<u64>, Option<&str>)> {
    all_consuming(pair(
        separated_list1(tag(":"), map_res(digit1, |s: &str| s.parse::<u64>())),
        opt(preceded(tag("."), digit1)),
    ))
    .parse(input)
}

/// Parse a clock string such as `10:00` or `1:02:03.5` into a [`Duration`]
pub fn parse_clock(input: &str) -> Option<Duration> {
    let (_, (parts, fraction)) = clock_components(input.trim()).ok()?;

    if parts.len() > 3 {
        return None;
    }
    // Only the leading component may overflow its unit
    if parts.iter().skip(1).any(|p| *p >= 60) {
        return None;
    }

    let whole = parts.iter().fold(0u64, |acc, p| acc * 60 + p);
    let frac = match fraction {
        Some(digits) => format!("0.{digits}").parse::<f64>().ok()?,
        None => 0.0,
    };

    Some(Duration::from_secs(whole) + Duration::from_secs_f64(frac))
}

/// Format a duration the way the transport bar shows it (`m:ss` or `h:mm:ss`)
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Cache behaviour of a fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Let HTTP semantics decide
    #[default]
    UseProtocolDefault,
    /// Always revalidate with the origin
    IgnoreCache,
    /// Accept stale cached data, load when there is none
    ReturnCacheElseLoad,
    /// Only accept cached data, never load
    ReturnCacheDontLoad,
}

impl CachePolicy {
    /// Request headers expressing this policy
    pub fn request_headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            CachePolicy::UseProtocolDefault => &[],
            CachePolicy::IgnoreCache => &[("cache-control", "no-cache"), ("pragma", "no-cache")],
            CachePolicy::ReturnCacheElseLoad => &[("cache-control", "max-stale")],
            CachePolicy::ReturnCacheDontLoad => &[("cache-control", "only-if-cached")],
        }
    }
}

/// Username/password pair answered to authentication challenges
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How video content is scaled into its view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Preserve aspect ratio, fit within bounds
    #[default]
    ResizeAspect,
    /// Preserve aspect ratio, fill bounds (cropping)
    ResizeAspectFill,
    /// Stretch to fill bounds
    Resize,
}

impl std::fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingMode::ResizeAspect => write!(f, "aspect-fit"),
            ScalingMode::ResizeAspectFill => write!(f, "aspect-fill"),
            ScalingMode::Resize => write!(f, "stretch"),
        }
    }
}

/// Device orientation reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
}

impl Orientation {
    pub fn is_landscape(&self) -> bool {
        matches!(self, Orientation::LandscapeLeft | Orientation::LandscapeRight)
    }

    pub fn is_portrait(&self) -> bool {
        matches!(self, Orientation::Portrait | Orientation::PortraitUpsideDown)
    }
}

/// Why a playback session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    PlaybackEnded,
    PlaybackError,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::PlaybackEnded => write!(f, "playback ended"),
            FinishReason::PlaybackError => write!(f, "playback error"),
        }
    }
}

/// Playback controller state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No session opened yet
    Idle,
    /// Session opened, waiting until it can play
    Loading,
    /// Session can play, playback not started
    Ready,
    /// Content is playing
    Playing,
    /// Playback paused
    Paused,
    /// Interactive seek in progress
    Scrubbing,
    /// Terminal
    Finished(FinishReason),
}

impl PlaybackState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, target),
            // From Idle
            (Idle, Loading) |
            // From Loading
            (Loading, Ready) | (Loading, Finished(_)) |
            // From Ready
            (Ready, Playing) | (Ready, Finished(_)) |
            // From Playing
            (Playing, Paused) | (Playing, Scrubbing) | (Playing, Finished(_)) |
            // From Paused
            (Paused, Playing) | (Paused, Scrubbing) | (Paused, Finished(_)) |
            // From Scrubbing
            (Scrubbing, Playing) | (Scrubbing, Paused) | (Scrubbing, Finished(_))
        )
    }

    /// Whether the session has reached a state where time is meaningful
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Scrubbing
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, PlaybackState::Finished(_))
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Scrubbing => write!(f, "scrubbing"),
            PlaybackState::Finished(reason) => write!(f, "finished ({})", reason),
        }
    }
}

/// Sampled playback clock
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackTime {
    /// Current position
    pub elapsed: Duration,
    /// Total length, when known
    pub duration: Option<Duration>,
}

impl PlaybackTime {
    /// Time left until the end, when the total is known
    pub fn remaining(&self) -> Option<Duration> {
        self.duration.map(|d| d.saturating_sub(self.elapsed))
    }

    /// Position as a fraction of the total (0.0 when unknown)
    pub fn progress(&self) -> f64 {
        match self.duration {
            Some(d) if !d.is_zero() => (self.elapsed.as_secs_f64() / d.as_secs_f64()).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    /// Elapsed label, e.g. `1:05`
    pub fn elapsed_label(&self) -> String {
        format_clock(self.elapsed)
    }

    /// Remaining label, e.g. `-3:55`; `--:--` when the total is unknown
    pub fn remaining_label(&self) -> String {
        match self.remaining() {
            Some(r) => format!("-{}", format_clock(r)),
            None => "--:--".to_string(),
        }
    }
}

/// Serialize [`Duration`] values as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("10:00"), Some(Duration::from_secs(600)));
        assert_eq!(parse_clock("1:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_clock("95"), Some(Duration::from_secs(95)));
        assert_eq!(parse_clock(" 0:30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_clock("0:01.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_clock("1:75"), None);
        assert_eq!(parse_clock("abc"), None);
        assert_eq!(parse_clock("1:2:3:4"), None);
        assert_eq!(parse_clock(""), None);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(Duration::from_secs(65)), "1:05");
        assert_eq!(format_clock(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(format_clock(Duration::ZERO), "0:00");
    }

    #[test]
    fn test_entry_urls() {
        let base = Url::parse("https://cdn.example.com/lists/movies.xml").unwrap();
        let entry = MovieEntry::new("A", "10:00", "posters/a.png", "https://media.example.com/a.m3u8");

        assert_eq!(entry.poster_url(&base).unwrap().as_str(), "https://cdn.example.com/lists/posters/a.png");
        assert_eq!(entry.media_url(&base).unwrap().as_str(), "https://media.example.com/a.m3u8");
        assert_eq!(entry.duration_hint(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_playback_state_transitions() {
        use PlaybackState::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Scrubbing));
        assert!(Scrubbing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Finished(FinishReason::PlaybackEnded)));

        assert!(!Idle.can_transition_to(Playing));
        assert!(!Ready.can_transition_to(Scrubbing));
        assert!(!Finished(FinishReason::PlaybackEnded).can_transition_to(Playing));
        assert!(!Finished(FinishReason::PlaybackError).can_transition_to(Finished(FinishReason::PlaybackEnded)));
    }

    #[test]
    fn test_playback_time_labels() {
        let time = PlaybackTime {
            elapsed: Duration::from_secs(65),
            duration: Some(Duration::from_secs(300)),
        };
        assert_eq!(time.elapsed_label(), "1:05");
        assert_eq!(time.remaining_label(), "-3:55");
        assert!((time.progress() - 65.0 / 300.0).abs() < 1e-9);

        let live = PlaybackTime { elapsed: Duration::from_secs(5), duration: None };
        assert_eq!(live.remaining_label(), "--:--");
        assert_eq!(live.progress(), 0.0);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
