//! Sound output layer for the session engine.
//!
//! This module provides everything below the session engine that touches
//! audio:
//!
//! - Resource classification and locator resolution
//! - The host audio backend abstraction (PCM output streams and looping
//!   media decoders)
//! - The looping file player and the uniform `Track` handle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │      Track       │ ← Uniform handle used by the engine
//! └────────┬─────────┘
//!          │
//!     ┌────┴──────────────┐
//!     ▼                   ▼
//! ┌──────────────────┐ ┌──────────────────┐
//! │ LoopStreamPlayer │ │   SynthPlayer    │
//! └────────┬─────────┘ └────────┬─────────┘
//!          │ MediaHandle        │ PcmStream
//!          ▼                    ▼
//! ┌───────────────────────────────────────┐
//! │ AudioBackend (RodioBackend / Mock)    │
//! └───────────────────────────────────────┘
//! ```

mod error;
mod file_player;
mod mock;
mod rodio_backend;
mod source;
mod track;

use std::sync::Arc;

pub use error::SoundError;
pub use file_player::LoopStreamPlayer;
pub use mock::{MockBackend, MockMediaState, MockStreamState};
pub use rodio_backend::RodioBackend;
pub use source::{classify_track, ResourceLocator, SYNTHETIC_SCHEME};
pub use track::{Player, Track};

/// Shape of a PCM output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channels: u16,
}

impl PcmFormat {
    /// 16-bit interleaved stereo at the given rate.
    #[must_use]
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }
}

/// A device stream fed with interleaved 16-bit PCM.
///
/// All methods take `&self` so a generation thread can write while the
/// command context adjusts gain or tears the stream down.
pub trait PcmStream: Send + Sync {
    /// Starts the device consuming queued samples.
    fn play(&self) -> Result<(), SoundError>;

    /// Queues samples, blocking while the device queue is full.
    ///
    /// Returns the number of samples accepted.
    fn write(&self, samples: &[i16]) -> Result<usize, SoundError>;

    /// Sets the device gain (`[0, 1]`).
    fn set_volume(&self, volume: f32) -> Result<(), SoundError>;

    /// Whether the device is currently consuming samples.
    fn is_playing(&self) -> Result<bool, SoundError>;

    /// Pauses consumption.
    fn pause(&self) -> Result<(), SoundError>;

    /// Drops any queued samples.
    fn flush(&self) -> Result<(), SoundError>;

    /// Stops playback.
    fn stop(&self) -> Result<(), SoundError>;

    /// Releases the device. Subsequent writes fail.
    fn release(&self) -> Result<(), SoundError>;
}

/// A prepared, seamlessly looping media decoder.
pub trait MediaHandle: Send {
    /// Starts (or resumes) playback.
    fn start(&mut self) -> Result<(), SoundError>;

    /// Stops playback.
    fn stop(&mut self) -> Result<(), SoundError>;

    /// Sets the decoder gain (`[0, 1]`).
    fn set_volume(&mut self, volume: f32) -> Result<(), SoundError>;

    /// Whether the decoder is producing audio.
    fn is_playing(&self) -> Result<bool, SoundError>;

    /// Releases decoder resources.
    fn release(&mut self) -> Result<(), SoundError>;
}

/// Host audio collaborator: opens PCM streams and prepares media.
pub trait AudioBackend: Send + Sync {
    /// Opens a PCM output stream.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    fn open_pcm_stream(&self, format: PcmFormat) -> Result<Arc<dyn PcmStream>, SoundError>;

    /// Opens and decodes a looping media resource at the given gain.
    ///
    /// This may block while a remote resource is fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be opened or decoded.
    fn prepare_media(
        &self,
        locator: &ResourceLocator,
        volume: f32,
    ) -> Result<Box<dyn MediaHandle>, SoundError>;
}
