//! Seamlessly looping player for decoded audio resources.

use std::sync::Arc;

use tracing::{debug, warn};

use super::source::ResourceLocator;
use super::{AudioBackend, MediaHandle};
use crate::types::clamp_volume;

/// Loops a finite audio resource through the host media decoder.
///
/// Preparation happens at construction. A player whose resource could not
/// be prepared stays inert: `start` does nothing and `is_playing` reports
/// `false`.
pub struct LoopStreamPlayer {
    locator: Option<ResourceLocator>,
    media: Option<Box<dyn MediaHandle>>,
    volume: f32,
}

impl LoopStreamPlayer {
    /// Prepares the resource at the given initial volume.
    ///
    /// Failures are logged and leave the player unprepared.
    pub fn new(backend: &Arc<dyn AudioBackend>, locator: Option<ResourceLocator>, volume: f32) -> Self {
        let volume = clamp_volume(volume);
        let media = match &locator {
            Some(locator) => match backend.prepare_media(locator, volume) {
                Ok(media) => Some(media),
                Err(e) => {
                    warn!("Failed to prepare '{}': {}", locator.describe(), e);
                    None
                }
            },
            None => {
                warn!("No resource given for file track");
                None
            }
        };

        Self {
            locator,
            media,
            volume,
        }
    }

    /// Whether preparation succeeded and the decoder is still held.
    pub fn is_prepared(&self) -> bool {
        self.media.is_some()
    }

    /// Resolved locator, if any.
    pub fn locator(&self) -> Option<&ResourceLocator> {
        self.locator.as_ref()
    }

    /// Starts looping playback. No-op if unprepared.
    pub fn start(&mut self) {
        if let Some(media) = self.media.as_mut() {
            if let Err(e) = media.start() {
                warn!("Failed to start media: {}", e);
            }
        }
    }

    /// Updates the live decoder gain and the cached value.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
        if let Some(media) = self.media.as_mut() {
            if let Err(e) = media.set_volume(self.volume) {
                debug!("Failed to set media volume: {}", e);
            }
        }
    }

    /// Last gain applied.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Whether the decoder is producing audio. Query failures read as `false`.
    pub fn is_playing(&self) -> bool {
        self.media
            .as_ref()
            .is_some_and(|media| media.is_playing().unwrap_or(false))
    }

    /// Stops and releases the decoder. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut media) = self.media.take() {
            if let Err(e) = media.stop() {
                debug!("Media stop failed during teardown: {}", e);
            }
            if let Err(e) = media.release() {
                debug!("Media release failed during teardown: {}", e);
            }
        }
    }
}

impl Drop for LoopStreamPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LoopStreamPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopStreamPlayer")
            .field("locator", &self.locator)
            .field("prepared", &self.is_prepared())
            .field("volume", &self.volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::MockBackend;
    use std::path::PathBuf;

    fn setup() -> (MockBackend, Arc<dyn AudioBackend>) {
        let mock = MockBackend::new();
        let backend: Arc<dyn AudioBackend> = Arc::new(mock.clone());
        (mock, backend)
    }

    fn locator() -> Option<ResourceLocator> {
        Some(ResourceLocator::Path(PathBuf::from("/tmp/rain.mp3")))
    }

    #[test]
    fn test_start_and_volume() {
        let (mock, backend) = setup();
        let mut player = LoopStreamPlayer::new(&backend, locator(), 0.0);
        assert!(player.is_prepared());
        assert!(!player.is_playing());

        player.start();
        assert!(player.is_playing());

        player.set_volume(0.6);
        assert_eq!(player.volume(), 0.6);
        assert_eq!(mock.media()[0].volume(), 0.6);
    }

    #[test]
    fn test_volume_is_clamped() {
        let (_mock, backend) = setup();
        let mut player = LoopStreamPlayer::new(&backend, locator(), 3.0);
        assert_eq!(player.volume(), 1.0);
        player.set_volume(-1.0);
        assert_eq!(player.volume(), 0.0);
    }

    #[test]
    fn test_unprepared_player_is_inert() {
        let (mock, backend) = setup();
        mock.set_media_unavailable(true);
        let mut player = LoopStreamPlayer::new(&backend, locator(), 1.0);
        assert!(!player.is_prepared());
        player.start();
        assert!(!player.is_playing());
        player.stop();
    }

    #[test]
    fn test_missing_locator_is_inert() {
        let (mock, backend) = setup();
        let player = LoopStreamPlayer::new(&backend, None, 1.0);
        assert!(!player.is_prepared());
        assert_eq!(mock.media_prepared(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mock, backend) = setup();
        let mut player = LoopStreamPlayer::new(&backend, locator(), 1.0);
        player.start();
        player.stop();
        player.stop();
        assert!(!player.is_playing());
        assert_eq!(mock.live_media(), 0);
    }

    #[test]
    fn test_stop_survives_teardown_failure() {
        let (mock, backend) = setup();
        mock.set_fail_teardown(true);
        let mut player = LoopStreamPlayer::new(&backend, locator(), 1.0);
        player.start();
        player.stop();
        assert_eq!(mock.live_media(), 0);
    }

    #[test]
    fn test_drop_releases() {
        let (mock, backend) = setup();
        {
            let mut player = LoopStreamPlayer::new(&backend, locator(), 1.0);
            player.start();
        }
        assert_eq!(mock.live_media(), 0);
    }
}
