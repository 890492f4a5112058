//! Session lifecycle and outbound notices.

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Notices emitted by the engine to the collaborator layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The first track of a session started.
    SessionActivated,
    /// The session ended (registry emptied or focus lost).
    SessionTerminated,
    /// A track was stopped through any stop path.
    TrackTerminated { id: String },
}

/// Tracks whether a session is active and relays notices outward.
///
/// Transitions are edge-triggered: activating an active session or
/// terminating an inactive one emits nothing.
#[derive(Debug)]
pub struct SessionLifecycleManager {
    active: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionLifecycleManager {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            active: false,
            events,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        if !self.active {
            self.active = true;
            info!("Session activated");
            self.emit(SessionEvent::SessionActivated);
        }
    }

    pub fn terminate(&mut self) {
        if self.active {
            self.active = false;
            info!("Session terminated");
            self.emit(SessionEvent::SessionTerminated);
        }
    }

    pub fn track_terminated(&self, id: &str) {
        self.emit(SessionEvent::TrackTerminated { id: id.to_string() });
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.send(event) {
            debug!("No listener for session event: {:?}", e.0);
        }
    }
}
