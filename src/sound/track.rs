//! Uniform track handle over both player families.

use std::sync::Arc;

use tracing::warn;

use super::error::SoundError;
use super::file_player::LoopStreamPlayer;
use super::source::{classify_track, ResourceLocator};
use super::AudioBackend;
use crate::synth::{parse_synthetic_flavor, NoiseFlavor, SynthPlayer};
use crate::types::{clamp_volume, EngineConfig, TrackKind, TrackSnapshot};

/// The player backing a track.
#[derive(Debug)]
pub enum Player {
    /// Decoded looping resource
    File(LoopStreamPlayer),
    /// Procedurally generated noise
    Synthetic(SynthPlayer),
}

/// One registered sound.
///
/// `volume` is the level the caller asked for; the player's live gain may
/// differ while a fade is in progress.
#[derive(Debug)]
pub struct Track {
    id: String,
    resource: Option<String>,
    volume: f32,
    player: Player,
}

impl Track {
    /// Builds the right player for `(id, resource)` with a live gain of 0.
    ///
    /// File resources are prepared here, which may block on a remote fetch.
    pub fn open(
        id: &str,
        resource: Option<&str>,
        volume: f32,
        backend: &Arc<dyn AudioBackend>,
        config: &EngineConfig,
    ) -> Self {
        let player = match classify_track(id, resource) {
            TrackKind::Synthetic => {
                let flavor = NoiseFlavor::parse(&parse_synthetic_flavor(resource, Some(id)));
                Player::Synthetic(SynthPlayer::new(id, flavor, Arc::clone(backend), config, 0.0))
            }
            TrackKind::File => {
                let locator = resource.and_then(|r| {
                    ResourceLocator::resolve(r, &config.asset_root)
                        .map_err(|e| warn!("Track '{}': {}", id, e))
                        .ok()
                });
                Player::File(LoopStreamPlayer::new(backend, locator, 0.0))
            }
        };

        Self {
            id: id.to_string(),
            resource: resource.map(str::to_string),
            volume: clamp_volume(volume),
            player,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn kind(&self) -> TrackKind {
        match self.player {
            Player::File(_) => TrackKind::File,
            Player::Synthetic(_) => TrackKind::Synthetic,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Whether the track can be started. Synthetic tracks open their
    /// device stream on start, so they are always ready here.
    pub fn is_ready(&self) -> bool {
        match &self.player {
            Player::File(p) => p.is_prepared(),
            Player::Synthetic(_) => true,
        }
    }

    /// Starts playback.
    ///
    /// # Errors
    ///
    /// Returns an error if a synthetic track cannot open its output.
    pub fn start(&mut self) -> Result<(), SoundError> {
        match &mut self.player {
            Player::File(p) => {
                p.start();
                Ok(())
            }
            Player::Synthetic(p) => p.start(),
        }
    }

    /// Stops and releases the player. Never fails.
    pub fn stop(&mut self) {
        match &mut self.player {
            Player::File(p) => p.stop(),
            Player::Synthetic(p) => p.stop(),
        }
    }

    /// Requested volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the requested volume and applies it live.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
        self.set_live_volume(self.volume);
    }

    /// Applies a gain to the player without changing the requested volume.
    pub fn set_live_volume(&mut self, volume: f32) {
        match &mut self.player {
            Player::File(p) => p.set_volume(volume),
            Player::Synthetic(p) => p.set_volume(volume),
        }
    }

    /// Gain currently applied to the player.
    pub fn live_volume(&self) -> f32 {
        match &self.player {
            Player::File(p) => p.volume(),
            Player::Synthetic(p) => p.volume(),
        }
    }

    pub fn is_playing(&self) -> bool {
        match &self.player {
            Player::File(p) => p.is_playing(),
            Player::Synthetic(p) => p.is_playing(),
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id.clone(),
            kind: self.kind(),
            volume: self.volume,
            playing: self.is_playing(),
        }
    }
}
