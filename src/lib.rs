//! Sleep Sounds Library
//!
//! This library provides the ambient sound session engine behind the
//! `sleepsounds` CLI. It includes:
//! - Looping file playback and synthesized noise (white, pink, brown, filtered)
//! - A session engine with per-track fade-in and a global fade-out
//! - Exclusive output ("focus") coordination
//! - A restart-safe sleep timer with persisted targets
//! - IPC server/client for daemon-CLI communication
//! - Type definitions for configuration and state

pub mod cli;
pub mod daemon;
pub mod focus;
pub mod sound;
pub mod synth;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    EngineConfig, EngineStatus, FocusState, IpcRequest, IpcResponse, PlayParams, ResponseData,
    SleepTimerState, TimerStatus, TrackKind, TrackSnapshot,
};

// Re-export engine types
pub use daemon::{
    CommandError, PlayOutcome, SessionBuilder, SessionEngine, SessionEvent, SessionHandle,
    TimerError,
};

// Re-export audio types
pub use sound::{AudioBackend, MockBackend, RodioBackend, SoundError};

// Re-export synthesis types
pub use synth::{NoiseFlavor, NoiseSynthesizer};

// Re-export focus types
pub use focus::{FocusCoordinator, FocusError, FocusHost, MockFocusHost};
