//! Exclusive audio output ("focus") coordination.
//!
//! The host audio system decides whether this engine may hold the output.
//! `FocusCoordinator` tracks the resulting state:
//!
//! ```text
//! Unrequested ──request ok──▶ Granted ──loss──▶ Lost
//!      ▲                         │
//!      └──────── release ────────┘
//! ```
//!
//! Losing focus is reported by the host asynchronously; the engine reacts
//! by stopping everything. There is no pause/resume.

pub mod error;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use error::FocusError;

use crate::types::FocusState;

/// Host side of audio focus.
pub trait FocusHost: Send {
    /// Asks for exclusive output.
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses or fails.
    fn request_exclusive(&mut self) -> Result<(), FocusError>;

    /// Gives exclusive output back to the host.
    fn abandon(&mut self);
}

/// Desktop hosts have no focus arbitration; requests always succeed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopFocusHost;

impl FocusHost for DesktopFocusHost {
    fn request_exclusive(&mut self) -> Result<(), FocusError> {
        Ok(())
    }

    fn abandon(&mut self) {}
}

#[derive(Debug, Default)]
struct MockFocusState {
    deny: AtomicBool,
    requests: AtomicUsize,
    abandons: AtomicUsize,
}

/// Mock focus host for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFocusHost {
    state: Arc<MockFocusState>,
}

impl MockFocusHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deny(&self, deny: bool) {
        self.state.deny.store(deny, Ordering::SeqCst);
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn abandon_count(&self) -> usize {
        self.state.abandons.load(Ordering::SeqCst)
    }
}

impl FocusHost for MockFocusHost {
    fn request_exclusive(&mut self) -> Result<(), FocusError> {
        self.state.requests.fetch_add(1, Ordering::SeqCst);
        if self.state.deny.load(Ordering::SeqCst) {
            return Err(FocusError::Denied);
        }
        Ok(())
    }

    fn abandon(&mut self) {
        self.state.abandons.fetch_add(1, Ordering::SeqCst);
    }
}

/// Tracks focus state on behalf of the session engine.
pub struct FocusCoordinator {
    host: Box<dyn FocusHost>,
    state: FocusState,
}

impl FocusCoordinator {
    pub fn new(host: Box<dyn FocusHost>) -> Self {
        Self {
            host,
            state: FocusState::Unrequested,
        }
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    /// Requests focus. Returns whether it is held afterwards.
    pub fn request(&mut self) -> bool {
        match self.host.request_exclusive() {
            Ok(()) => {
                if self.state != FocusState::Granted {
                    debug!("Audio focus granted");
                }
                self.state = FocusState::Granted;
                true
            }
            Err(e) => {
                warn!("Audio focus request failed: {}", e);
                false
            }
        }
    }

    /// Handles a loss notification. Returns true when this moved the
    /// state from `Granted` to `Lost`.
    pub fn on_focus_lost(&mut self, transient: bool) -> bool {
        if self.state != FocusState::Granted {
            debug!("Ignoring focus loss in state {}", self.state.as_str());
            return false;
        }
        info!(
            "Audio focus lost{}",
            if transient { " (transient)" } else { "" }
        );
        self.state = FocusState::Lost;
        true
    }

    /// Gives focus back to the host if held. A `Lost` state is kept.
    pub fn release(&mut self) {
        if self.state == FocusState::Granted {
            self.host.abandon();
            self.state = FocusState::Unrequested;
            debug!("Audio focus released");
        }
    }
}

impl std::fmt::Debug for FocusCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusCoordinator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
