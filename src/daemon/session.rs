//! Session engine: the single owner of all session state.
//!
//! Every mutation (user commands, fade steps, alarm fires, focus loss)
//! goes through `SessionEngine` on one command context, so no locking is
//! needed around the registry, fades or focus state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::fade::{FadeAction, FadeController, ScheduledStep, StepScheduler};
use super::lifecycle::{SessionEvent, SessionLifecycleManager};
use super::registry::{Occupancy, TrackRegistry};
use super::timer::{SleepTimerScheduler, TimerError};
use crate::focus::{FocusCoordinator, FocusHost};
use crate::sound::{AudioBackend, Track};
use crate::types::{clamp_volume, EngineConfig, EngineStatus, FocusState, TimerStatus};

/// External collaborators the engine is built from.
pub struct EngineHosts {
    /// Audio output and media decoding
    pub backend: Arc<dyn AudioBackend>,
    /// Exclusive output arbitration
    pub focus: Box<dyn FocusHost>,
    /// Delivery of delayed fade steps
    pub steps: Box<dyn StepScheduler>,
    /// Persisted sleep timer
    pub timers: SleepTimerScheduler,
    /// Outbound notices
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Result of a `play` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// A new track was created and is fading in.
    Started,
    /// The id was already registered; only its volume changed.
    Retargeted,
    /// Focus was refused; nothing was created.
    FocusDenied,
    /// The resource could not be prepared; nothing was registered.
    ResourceUnavailable,
    /// The request had no usable id.
    Ignored,
}

impl PlayOutcome {
    /// Returns the string representation of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayOutcome::Started => "started",
            PlayOutcome::Retargeted => "retargeted",
            PlayOutcome::FocusDenied => "focus_denied",
            PlayOutcome::ResourceUnavailable => "resource_unavailable",
            PlayOutcome::Ignored => "ignored",
        }
    }
}

/// The session engine.
pub struct SessionEngine {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    registry: TrackRegistry,
    fades: FadeController,
    focus: FocusCoordinator,
    lifecycle: SessionLifecycleManager,
    timers: SleepTimerScheduler,
}

impl SessionEngine {
    pub fn new(config: EngineConfig, hosts: EngineHosts) -> Self {
        let fades = FadeController::new(hosts.steps, &config);
        Self {
            backend: hosts.backend,
            registry: TrackRegistry::new(),
            fades,
            focus: FocusCoordinator::new(hosts.focus),
            lifecycle: SessionLifecycleManager::new(hosts.events),
            timers: hosts.timers,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Track commands
    // ------------------------------------------------------------------------

    /// Acquires focus ahead of the first `play` without activating a session.
    pub fn initialize(&mut self) -> bool {
        self.focus.request()
    }

    /// Starts a track, or retargets its volume if the id is registered.
    pub fn play(&mut self, id: &str, resource: Option<&str>, volume: f32) -> PlayOutcome {
        if id.trim().is_empty() {
            debug!("Ignoring play without an id");
            return PlayOutcome::Ignored;
        }
        if !self.focus.request() {
            info!("Play '{}' rejected: audio focus not granted", id);
            return PlayOutcome::FocusDenied;
        }

        let volume = clamp_volume(volume);
        if self.registry.contains(id) {
            self.set_volume(id, volume);
            return PlayOutcome::Retargeted;
        }

        let mut track = Track::open(id, resource, volume, &self.backend, &self.config);
        if !track.is_ready() {
            warn!("Track '{}' unavailable; not registered", id);
            return PlayOutcome::ResourceUnavailable;
        }
        if let Err(e) = track.start() {
            warn!("Track '{}' failed to start: {}", id, e);
            track.stop();
            return PlayOutcome::ResourceUnavailable;
        }

        match self.registry.insert(track) {
            Ok(Occupancy::Activated) => self.lifecycle.activate(),
            Ok(_) => {}
            Err(mut duplicate) => {
                // Unreachable while the contains() check above holds.
                duplicate.stop();
                return PlayOutcome::Retargeted;
            }
        }

        self.fades.begin_fade_in(id, volume);
        info!("Track '{}' started", id);
        PlayOutcome::Started
    }

    /// Stops one track. Returns whether it was registered.
    pub fn stop(&mut self, id: &str) -> bool {
        let Some((mut track, occupancy)) = self.registry.remove(id) else {
            if self.registry.is_empty() {
                self.terminate_session();
            }
            return false;
        };

        self.fades.cancel_all();
        // Cancelled fades leave survivors at an intermediate gain.
        for survivor in self.registry.iter_mut() {
            survivor.set_live_volume(survivor.volume());
        }

        track.stop();
        self.lifecycle.track_terminated(id);
        info!("Track '{}' stopped", id);

        if occupancy == Occupancy::Emptied {
            self.terminate_session();
        }
        true
    }

    /// Stops every track and terminates the session.
    pub fn stop_all(&mut self) {
        self.fades.cancel_all();
        for mut track in self.registry.drain() {
            track.stop();
            self.lifecycle.track_terminated(track.id());
        }
        self.terminate_session();
    }

    /// Fades every track out over the configured duration, then stops all.
    ///
    /// With no tracks this is a plain `stop_all`.
    pub fn fade_out_and_stop(&mut self) {
        if self.registry.is_empty() {
            self.stop_all();
            return;
        }
        self.fades.begin_fade_out();
        self.apply_global(self.fades.scalar());
        info!("Fade-out started");
    }

    /// Updates a track's volume. Unknown ids are ignored.
    pub fn set_volume(&mut self, id: &str, volume: f32) -> bool {
        let scalar = self.fades.scalar();
        let fading_out = self.fades.is_fading_out();
        let Some(track) = self.registry.get_mut(id) else {
            debug!("set_volume for unknown track '{}' ignored", id);
            return false;
        };

        self.fades.cancel_fade_in(id);
        track.set_volume(volume);
        if fading_out {
            track.set_live_volume(track.volume() * scalar);
        }
        true
    }

    /// Applies a delivered fade step.
    pub fn handle_fade_step(&mut self, step: ScheduledStep) {
        let Some(action) = self.fades.accept(step) else {
            return;
        };
        match action {
            FadeAction::SetTrackVolume { track_id, volume } => {
                let scalar = self.fades.scalar();
                if let Some(track) = self.registry.get_mut(&track_id) {
                    if track.is_playing() {
                        track.set_live_volume(volume * scalar);
                    }
                }
            }
            FadeAction::ApplyGlobal(scalar) => self.apply_global(scalar),
            FadeAction::FadeOutComplete => {
                self.apply_global(0.0);
                info!("Fade-out complete");
                self.stop_all();
            }
        }
    }

    fn apply_global(&mut self, scalar: f32) {
        for track in self.registry.iter_mut() {
            if track.is_playing() {
                track.set_live_volume(track.volume() * scalar);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Host events
    // ------------------------------------------------------------------------

    /// Soft timer alarm: fades out an active session, otherwise does nothing.
    pub fn timer_fired(&mut self) {
        if !self.lifecycle.is_active() {
            debug!("Sleep timer fired with no active session");
            return;
        }
        info!("Sleep timer fired");
        self.fade_out_and_stop();
    }

    /// Focus loss notification from the host.
    pub fn focus_lost(&mut self, transient: bool) {
        if self.focus.on_focus_lost(transient) {
            self.stop_all();
        }
    }

    fn terminate_session(&mut self) {
        self.focus.release();
        self.lifecycle.terminate();
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Arms or clears (`<= 0`) the soft timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer cannot be armed or persisted.
    pub fn set_soft_timer(&mut self, target_ms: i64) -> Result<(), TimerError> {
        self.timers.set_soft_timer(target_ms)
    }

    /// Sets or clears (`<= 0`) the atomic timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer cannot be persisted.
    pub fn set_atomic_timer(&mut self, target_ms: i64) -> Result<(), TimerError> {
        self.timers.set_atomic_timer(target_ms)
    }

    pub fn remaining(&self) -> TimerStatus {
        self.timers.remaining()
    }

    pub fn persisted_atomic_target(&self) -> i64 {
        self.timers.atomic_target()
    }

    /// Re-arms a persisted soft target after a restart.
    pub fn restore_timers(&mut self) -> bool {
        self.timers.restore()
    }

    /// Stops everything and clears both timer slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleared timer state cannot be persisted.
    pub fn clear_all_data(&mut self) -> Result<(), TimerError> {
        self.stop_all();
        self.timers.clear_all()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    pub fn track_count(&self) -> usize {
        self.registry.len()
    }

    pub fn focus_state(&self) -> FocusState {
        self.focus.state()
    }

    /// Current global fade scalar.
    pub fn fade_scalar(&self) -> f32 {
        self.fades.scalar()
    }

    /// Gain currently applied to a track's player.
    pub fn live_volume(&self, id: &str) -> Option<f32> {
        self.registry.get(id).map(Track::live_volume)
    }

    /// Requested volume of a track.
    pub fn volume(&self, id: &str) -> Option<f32> {
        self.registry.get(id).map(Track::volume)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            active: self.lifecycle.is_active(),
            focus: self.focus.state(),
            tracks: self.registry.snapshots(),
            timer: self.timers.remaining(),
        }
    }

    /// Stops everything before the engine is dropped.
    pub fn shutdown(&mut self) {
        info!("Session engine shutting down");
        self.stop_all();
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("registry", &self.registry)
            .field("fades", &self.fades)
            .field("focus", &self.focus)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
