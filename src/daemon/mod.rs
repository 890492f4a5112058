//! Daemon module for the sleep sounds engine.
//!
//! This module contains the session engine and its host plumbing:
//! - `session`: The engine that owns tracks, fades, focus and timers
//! - `fade`: Fade-in ramps and the global fade-out
//! - `registry` / `lifecycle`: Active tracks and session notices
//! - `timer`: Persisted sleep timer with wall-clock alarms
//! - `processor`: Serialized command context and `SessionHandle`
//! - `ipc` / `service`: Unix socket server and daemon entry point

pub mod fade;
pub mod ipc;
pub mod lifecycle;
pub mod processor;
pub mod registry;
pub mod service;
pub mod session;
pub mod timer;

pub use fade::{FadeController, ManualStepScheduler, ScheduledStep, StepScheduler};
pub use lifecycle::SessionEvent;
pub use processor::{CommandError, SessionBuilder, SessionHandle};
pub use session::{EngineHosts, PlayOutcome, SessionEngine};
pub use timer::{SleepTimerScheduler, TimerError};
