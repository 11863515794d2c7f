//! Marquee Core - playlist loading and stream playback control
//!
//! This crate provides the building blocks of a network video browser:
//! - Asynchronous HTTP fetch operations with authentication and size limits
//! - A bounded-concurrency fetch queue for background downloads
//! - Playlist document parsing into movie entries
//! - A playback controller driving a media session through its state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Marquee Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     │
//! │  │    Fetch     │────▶│   Playlist   │     │    Fetch     │     │
//! │  │  Operation   │     │    Parser    │     │    Queue     │     │
//! │  └──────────────┘     └──────┬───────┘     └──────────────┘     │
//! │                              │ Vec<MovieEntry>                  │
//! │                              ▼                                  │
//! │                       ┌──────────────┐     ┌──────────────┐     │
//! │                       │   Playback   │────▶│    Media     │     │
//! │                       │  Controller  │     │   Session    │     │
//! │                       └──────┬───────┘     └──────────────┘     │
//! │                              │                                  │
//! │                       ┌──────┴───────┐                          │
//! │                       │ PlaybackEvent│                          │
//! │                       │  broadcast   │                          │
//! │                       └──────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod playback;
pub mod playlist;
pub mod types;

pub use config::MarqueeConfig;
pub use error::{Error, Result};
pub use fetch::{AuthChallengeResponse, FetchListener, FetchOperation, FetchQueue, FetchRequest, FetchSettings, OperationState};
pub use playback::{
    ClockBackend, MediaBackend, MediaSession, PlaybackController, PlaybackEvent, PlaybackOptions, SessionEvent,
};
pub use playlist::{parse_document, ParseState, PlaylistListener, PlaylistParser, PlaylistSchema};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Marquee Core initialized");
}
