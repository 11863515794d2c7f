//! Playback controller - owns a media session and its transport state

use super::{
    session::{MediaBackend, MediaSession, OpenedSession, SessionEvent},
    PlaybackEvent, PlaybackOptions,
};
use crate::{
    types::{ControllerId, FinishReason, Orientation, PlaybackState, PlaybackTime, ScalingMode},
    Error, Result,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

const EVENT_CAPACITY: usize = 64;

/// Lower bound for the sampler period
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Aborts its task when dropped
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ControllerCore {
    // Tasks are declared ahead of the session so they drop first
    sampler: Option<TaskGuard>,
    hide_timer: Option<TaskGuard>,
    session: Option<Arc<dyn MediaSession>>,
    state: PlaybackState,
    rate_to_restore: f32,
    preferred_rate: f32,
    fullscreen: bool,
    orientation: Orientation,
    controls_visible: bool,
    volume: f32,
    scaling_mode: ScalingMode,
}

struct ControllerInner {
    id: ControllerId,
    url: Url,
    options: PlaybackOptions,
    runtime: Handle,
    core: Mutex<ControllerCore>,
    state_tx: watch::Sender<PlaybackState>,
    time_tx: Arc<watch::Sender<PlaybackTime>>,
    events: broadcast::Sender<PlaybackEvent>,
}

/// Drives one media session through the playback state machine
///
/// Transport methods are synchronous and return whether they changed
/// anything; calls that make no sense in the current state are no-ops.
/// Session failures never surface as errors, only as
/// [`PlaybackEvent::Finished`] with [`FinishReason::PlaybackError`].
///
/// Dropping the controller stops its sampler and timers, then releases the
/// session.
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
    driver: Option<TaskGuard>,
}

impl PlaybackController {
    /// Open `url` through `backend` and start tracking it
    ///
    /// The controller is in `Loading` when this returns. Fails only when
    /// called outside a tokio runtime.
    pub fn new(url: Url, backend: Arc<dyn MediaBackend>, options: PlaybackOptions) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Internal("playback controller requires a tokio runtime".to_string()))?;

        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        let (time_tx, _) = watch::channel(PlaybackTime::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let preferred_rate = if options.preferred_rate.is_finite() && options.preferred_rate != 0.0 {
            options.preferred_rate
        } else {
            1.0
        };
        let scaling_mode = options.scaling_mode;

        let inner = Arc::new(ControllerInner {
            id: ControllerId::new(),
            url,
            options,
            runtime: runtime.clone(),
            core: Mutex::new(ControllerCore {
                sampler: None,
                hide_timer: None,
                session: None,
                state: PlaybackState::Idle,
                rate_to_restore: 0.0,
                preferred_rate,
                fullscreen: false,
                orientation: Orientation::default(),
                controls_visible: true,
                volume: 1.0,
                scaling_mode,
            }),
            state_tx,
            time_tx: Arc::new(time_tx),
            events,
        });

        {
            let mut core = inner.core.lock();
            inner.transition(&mut core, PlaybackState::Loading);
        }

        info!(controller = %inner.id, url = %inner.url, "Opening media session");

        let driver = runtime.spawn(drive(Arc::downgrade(&inner), backend));

        Ok(Self {
            inner,
            driver: Some(TaskGuard(driver)),
        })
    }

    pub fn id(&self) -> ControllerId {
        self.inner.id
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn options(&self) -> &PlaybackOptions {
        &self.inner.options
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.core.lock().state
    }

    /// Most recent time sample
    pub fn time(&self) -> PlaybackTime {
        *self.inner.time_tx.borrow()
    }

    /// Current session rate (0.0 before the session opens)
    pub fn rate(&self) -> f32 {
        let core = self.inner.core.lock();
        core.session.as_ref().map(|s| s.rate()).unwrap_or(0.0)
    }

    pub fn is_fullscreen(&self) -> bool {
        self.inner.core.lock().fullscreen
    }

    pub fn is_scrubbing(&self) -> bool {
        self.state() == PlaybackState::Scrubbing
    }

    pub fn orientation(&self) -> Orientation {
        self.inner.core.lock().orientation
    }

    pub fn controls_visible(&self) -> bool {
        self.inner.core.lock().controls_visible
    }

    pub fn volume(&self) -> f32 {
        self.inner.core.lock().volume
    }

    pub fn scaling_mode(&self) -> ScalingMode {
        self.inner.core.lock().scaling_mode
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_time(&self) -> watch::Receiver<PlaybackTime> {
        self.inner.time_tx.subscribe()
    }

    /// Subscribe to controller events
    ///
    /// Only events sent after subscribing are received; check [`state`](Self::state)
    /// or use [`wait_finished`](Self::wait_finished) for the terminal outcome.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until playback finishes
    #[instrument(skip(self), fields(controller = %self.inner.id))]
    pub async fn wait_finished(&self) -> Result<FinishReason> {
        let mut rx = self.inner.state_tx.subscribe();
        let state = *rx
            .wait_for(|state| state.is_finished())
            .await
            .map_err(|_| Error::Internal("controller state channel closed".to_string()))?;

        match state {
            PlaybackState::Finished(reason) => Ok(reason),
            other => Err(Error::Internal(format!("unexpected state {other}"))),
        }
    }

    /// Start or resume playback at the preferred rate
    pub fn play(&self) -> bool {
        let mut core = self.inner.core.lock();
        self.inner.play_locked(&mut core)
    }

    pub fn pause(&self) -> bool {
        let mut core = self.inner.core.lock();
        self.inner.pause_locked(&mut core)
    }

    /// Enter scrubbing, remembering the current rate
    pub fn begin_scrub(&self) -> bool {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if !matches!(core.state, PlaybackState::Playing | PlaybackState::Paused) {
            return false;
        }

        let rate = core.session.as_ref().map(|s| s.rate()).unwrap_or(0.0);
        core.rate_to_restore = rate;
        if let Some(session) = &core.session {
            session.set_rate(inner.options.scrub_rate);
        }

        inner.transition(&mut core, PlaybackState::Scrubbing);
        core.hide_timer = None;
        inner.show_controls(&mut core);

        debug!(controller = %inner.id, rate_to_restore = rate, "Scrub started");
        true
    }

    /// Seek to `fraction` (0.0..=1.0) of the duration while scrubbing
    pub fn scrub_to(&self, fraction: f64) -> bool {
        let inner = &self.inner;
        let core = inner.core.lock();
        if core.state != PlaybackState::Scrubbing || !fraction.is_finite() {
            return false;
        }
        let Some(session) = core.session.as_ref() else {
            return false;
        };
        let Some(duration) = session.duration() else {
            debug!(controller = %inner.id, "Cannot scrub a stream of unknown length");
            return false;
        };

        let target = duration.mul_f64(fraction.clamp(0.0, 1.0));
        session.seek(target);
        inner.time_tx.send_replace(PlaybackTime {
            elapsed: target,
            duration: Some(duration),
        });
        true
    }

    /// Leave scrubbing and restore the remembered rate
    pub fn end_scrub(&self) -> bool {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.state != PlaybackState::Scrubbing {
            return false;
        }

        let rate = core.rate_to_restore;
        if let Some(session) = &core.session {
            session.set_rate(rate);
        }

        let target = if rate != 0.0 {
            core.preferred_rate = rate;
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        };
        inner.transition(&mut core, target);
        inner.restart_hide_timer(&mut core);

        debug!(controller = %inner.id, rate, "Scrub ended");
        true
    }

    /// Change the playback rate
    ///
    /// While scrubbing this only replaces the rate restored afterwards. A zero
    /// rate pauses; a non-zero rate while ready or paused starts playing.
    pub fn set_rate(&self, rate: f32) -> bool {
        if !rate.is_finite() {
            return false;
        }

        let inner = &self.inner;
        let mut core = inner.core.lock();
        match core.state {
            PlaybackState::Scrubbing => {
                core.rate_to_restore = rate;
                true
            }
            PlaybackState::Playing if rate == 0.0 => inner.pause_locked(&mut core),
            PlaybackState::Playing => {
                core.preferred_rate = rate;
                if let Some(session) = &core.session {
                    session.set_rate(rate);
                }
                true
            }
            PlaybackState::Ready | PlaybackState::Paused if rate != 0.0 => {
                core.preferred_rate = rate;
                inner.play_locked(&mut core)
            }
            _ => false,
        }
    }

    pub fn set_fullscreen(&self, fullscreen: bool) -> bool {
        let mut core = self.inner.core.lock();
        self.inner.set_fullscreen_locked(&mut core, fullscreen)
    }

    pub fn toggle_fullscreen(&self) -> bool {
        let mut core = self.inner.core.lock();
        let target = !core.fullscreen;
        self.inner.set_fullscreen_locked(&mut core, target)
    }

    /// Record a device rotation
    ///
    /// With `rotate_to_fullscreen`, landscape enters fullscreen and portrait
    /// leaves it. Face-up and face-down keep the current layout.
    pub fn set_orientation(&self, orientation: Orientation) -> bool {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.state.is_finished() || core.orientation == orientation {
            return false;
        }
        core.orientation = orientation;

        let wanted = if !inner.options.rotate_to_fullscreen {
            None
        } else if orientation.is_landscape() {
            Some(true)
        } else if orientation.is_portrait() {
            Some(false)
        } else {
            None
        };

        let relaid = wanted.is_some_and(|fullscreen| inner.set_fullscreen_locked(&mut core, fullscreen));
        if !relaid {
            inner.emit(PlaybackEvent::LayoutChanged {
                controller: inner.id,
                fullscreen: core.fullscreen,
                orientation,
            });
        }
        true
    }

    /// Set the output volume, clamped to 0.0..=1.0; returns the applied value
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        let mut core = self.inner.core.lock();
        core.volume = volume;
        if let Some(session) = &core.session {
            session.set_volume(volume);
        }
        volume
    }

    /// Change how the video fills its bounds; applied to the session once open
    pub fn set_scaling_mode(&self, mode: ScalingMode) -> bool {
        let mut core = self.inner.core.lock();
        if core.state.is_finished() || core.scaling_mode == mode {
            return false;
        }
        core.scaling_mode = mode;
        if let Some(session) = &core.session {
            session.set_scaling_mode(mode);
        }
        debug!(controller = %self.inner.id, mode = %mode, "Scaling mode changed");
        true
    }

    /// Show the controls and restart the auto-hide timer
    pub fn user_interaction(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if !core.state.is_active() {
            return;
        }
        inner.show_controls(&mut core);
        inner.restart_hide_timer(&mut core);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.driver.take();

        let session = {
            let mut core = self.inner.core.lock();
            core.sampler = None;
            core.hide_timer = None;
            core.session.take()
        };
        drop(session);

        debug!(controller = %self.inner.id, "Playback controller released");
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl ControllerInner {
    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, core: &mut ControllerCore, to: PlaybackState) -> bool {
        let from = core.state;
        if !from.can_transition_to(to) {
            debug!(controller = %self.id, from = %from, to = %to, "Ignoring state transition");
            return false;
        }

        core.state = to;
        self.state_tx.send_replace(to);
        self.emit(PlaybackEvent::StateChanged {
            controller: self.id,
            from,
            to,
        });

        info!(controller = %self.id, from = %from, to = %to, "State transition");
        true
    }

    fn attach(&self, session: Arc<dyn MediaSession>) {
        let mut core = self.core.lock();
        if core.state.is_finished() {
            return;
        }
        session.set_volume(core.volume);
        session.set_scaling_mode(core.scaling_mode);
        self.time_tx.send_replace(PlaybackTime {
            elapsed: session.current_time(),
            duration: session.duration(),
        });
        core.session = Some(session);
    }

    fn session_ready(self: &Arc<Self>) {
        let mut core = self.core.lock();
        if core.state != PlaybackState::Loading || core.session.is_none() {
            return;
        }

        self.transition(&mut core, PlaybackState::Ready);
        self.start_sampler(&mut core);
        self.show_controls(&mut core);

        if self.options.autoplay {
            self.play_locked(&mut core);
        }
    }

    fn play_locked(self: &Arc<Self>, core: &mut ControllerCore) -> bool {
        if !matches!(core.state, PlaybackState::Ready | PlaybackState::Paused) {
            return false;
        }
        if let Some(session) = &core.session {
            session.set_rate(core.preferred_rate);
        }
        self.transition(core, PlaybackState::Playing);
        self.show_controls(core);
        self.restart_hide_timer(core);
        true
    }

    fn pause_locked(&self, core: &mut ControllerCore) -> bool {
        if core.state != PlaybackState::Playing {
            return false;
        }
        if let Some(session) = &core.session {
            session.set_rate(0.0);
        }
        self.transition(core, PlaybackState::Paused);
        core.hide_timer = None;
        self.show_controls(core);
        true
    }

    fn set_fullscreen_locked(self: &Arc<Self>, core: &mut ControllerCore, fullscreen: bool) -> bool {
        if !matches!(
            core.state,
            PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused
        ) || core.fullscreen == fullscreen
        {
            return false;
        }

        core.fullscreen = fullscreen;
        self.emit(PlaybackEvent::LayoutChanged {
            controller: self.id,
            fullscreen,
            orientation: core.orientation,
        });
        info!(controller = %self.id, fullscreen, "Layout changed");

        self.show_controls(core);
        self.restart_hide_timer(core);
        true
    }

    fn show_controls(&self, core: &mut ControllerCore) {
        if core.controls_visible {
            return;
        }
        core.controls_visible = true;
        self.emit(PlaybackEvent::ControlsVisibility {
            controller: self.id,
            visible: true,
        });
    }

    fn hide_controls(&self) {
        let mut core = self.core.lock();
        if core.state != PlaybackState::Playing || !core.controls_visible {
            return;
        }
        core.controls_visible = false;
        self.emit(PlaybackEvent::ControlsVisibility {
            controller: self.id,
            visible: false,
        });
        debug!(controller = %self.id, "Controls hidden");
    }

    /// Arm the auto-hide timer; it only runs while playing
    fn restart_hide_timer(self: &Arc<Self>, core: &mut ControllerCore) {
        core.hide_timer = None;
        let delay = self.options.hide_controls_after;
        if core.state != PlaybackState::Playing || delay.is_zero() {
            return;
        }

        let controller = Arc::downgrade(self);
        core.hide_timer = Some(TaskGuard(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(controller) = controller.upgrade() {
                controller.hide_controls();
            }
        })));
    }

    fn start_sampler(&self, core: &mut ControllerCore) {
        let Some(session) = core.session.as_ref() else {
            return;
        };
        let session: Weak<dyn MediaSession> = Arc::downgrade(session);
        let time_tx = self.time_tx.clone();
        let period = self.options.sample_interval.max(MIN_SAMPLE_INTERVAL);

        core.sampler = Some(TaskGuard(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                time_tx.send_replace(PlaybackTime {
                    elapsed: session.current_time(),
                    duration: session.duration(),
                });
            }
        })));
    }

    fn finish(&self, reason: FinishReason) {
        let mut core = self.core.lock();
        if core.state.is_finished() {
            return;
        }
        if !self.transition(&mut core, PlaybackState::Finished(reason)) {
            return;
        }

        core.sampler = None;
        core.hide_timer = None;
        if let Some(session) = &core.session {
            session.set_rate(0.0);
            self.time_tx.send_replace(PlaybackTime {
                elapsed: session.current_time(),
                duration: session.duration(),
            });
        }

        self.emit(PlaybackEvent::Finished {
            controller: self.id,
            reason,
        });
        info!(controller = %self.id, reason = %reason, "Playback finished");
    }
}

/// Opens the session, then feeds its events into the controller
async fn drive(controller: Weak<ControllerInner>, backend: Arc<dyn MediaBackend>) {
    let Some((url, scaling)) = controller
        .upgrade()
        .map(|inner| (inner.url.clone(), inner.core.lock().scaling_mode))
    else {
        return;
    };

    let opened = backend.open(&url, scaling).await;

    let mut events = {
        let Some(inner) = controller.upgrade() else {
            return;
        };
        match opened {
            Ok(OpenedSession { session, events }) => {
                inner.attach(session);
                events
            }
            Err(e) => {
                warn!(controller = %inner.id, url = %url, error = %e, "Media session could not be opened");
                inner.finish(FinishReason::PlaybackError);
                return;
            }
        }
    };

    while let Some(event) = events.recv().await {
        let Some(inner) = controller.upgrade() else {
            return;
        };

        match event {
            SessionEvent::ReadyToPlay => inner.session_ready(),
            SessionEvent::PlayedToEnd => inner.finish(FinishReason::PlaybackEnded),
            SessionEvent::Failed(message) => {
                warn!(controller = %inner.id, error = %message, "Media session failed");
                inner.finish(FinishReason::PlaybackError);
            }
        }

        if inner.core.lock().state.is_finished() {
            return;
        }
    }

    if let Some(inner) = controller.upgrade() {
        warn!(controller = %inner.id, "Media session went away");
        inner.finish(FinishReason::PlaybackError);
    }
}
