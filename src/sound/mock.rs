//! In-memory audio backend for tests.
//!
//! Records every stream and media handle it hands out so tests can
//! observe gains, transport state and teardown without an audio device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::error::SoundError;
use super::source::ResourceLocator;
use super::{AudioBackend, MediaHandle, PcmFormat, PcmStream};

/// Simulated device time per written block.
const WRITE_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct MockState {
    streams: Mutex<Vec<Arc<MockStreamState>>>,
    media: Mutex<Vec<Arc<MockMediaState>>>,
    stream_unavailable: AtomicBool,
    media_unavailable: AtomicBool,
    fail_teardown: AtomicBool,
}

/// Observable state of one mock PCM stream.
#[derive(Debug)]
pub struct MockStreamState {
    format: PcmFormat,
    playing: AtomicBool,
    released: AtomicBool,
    samples_written: AtomicUsize,
    volume: Mutex<f32>,
    fail_teardown: bool,
}

impl MockStreamState {
    /// Format requested at open time.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Whether `release` has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Total samples accepted by `write`.
    pub fn samples_written(&self) -> usize {
        self.samples_written.load(Ordering::SeqCst)
    }

    /// Last gain set on the stream.
    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }
}

/// Observable state of one mock media handle.
#[derive(Debug)]
pub struct MockMediaState {
    locator: ResourceLocator,
    playing: AtomicBool,
    released: AtomicBool,
    volume: Mutex<f32>,
    fail_teardown: bool,
}

impl MockMediaState {
    /// Locator the handle was prepared from.
    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    /// Whether the handle is playing.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Whether `release` has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Last gain set on the handle.
    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }
}

/// Mock audio backend for testing.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open_pcm_stream` fail.
    pub fn set_stream_unavailable(&self, unavailable: bool) {
        self.state
            .stream_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Makes `prepare_media` fail.
    pub fn set_media_unavailable(&self, unavailable: bool) {
        self.state
            .media_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Makes `stop`, `flush` and `release` report errors on handles
    /// created afterwards. The release still takes effect.
    pub fn set_fail_teardown(&self, fail: bool) {
        self.state.fail_teardown.store(fail, Ordering::SeqCst);
    }

    /// Number of PCM streams opened so far.
    #[must_use]
    pub fn streams_opened(&self) -> usize {
        self.state.streams.lock().unwrap().len()
    }

    /// Number of PCM streams not yet released.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.state
            .streams
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.is_released())
            .count()
    }

    /// Number of media handles prepared so far.
    #[must_use]
    pub fn media_prepared(&self) -> usize {
        self.state.media.lock().unwrap().len()
    }

    /// Number of media handles not yet released.
    #[must_use]
    pub fn live_media(&self) -> usize {
        self.state
            .media
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_released())
            .count()
    }

    /// Snapshot of every stream handed out, in order.
    #[must_use]
    pub fn streams(&self) -> Vec<Arc<MockStreamState>> {
        self.state.streams.lock().unwrap().clone()
    }

    /// Snapshot of every media handle handed out, in order.
    #[must_use]
    pub fn media(&self) -> Vec<Arc<MockMediaState>> {
        self.state.media.lock().unwrap().clone()
    }
}

impl AudioBackend for MockBackend {
    fn open_pcm_stream(&self, format: PcmFormat) -> Result<Arc<dyn PcmStream>, SoundError> {
        if self.state.stream_unavailable.load(Ordering::SeqCst) {
            return Err(SoundError::DeviceNotAvailable("mock stream".to_string()));
        }
        let stream = Arc::new(MockStreamState {
            format,
            playing: AtomicBool::new(false),
            released: AtomicBool::new(false),
            samples_written: AtomicUsize::new(0),
            volume: Mutex::new(1.0),
            fail_teardown: self.state.fail_teardown.load(Ordering::SeqCst),
        });
        self.state.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(Arc::new(MockPcmStream(stream)))
    }

    fn prepare_media(
        &self,
        locator: &ResourceLocator,
        volume: f32,
    ) -> Result<Box<dyn MediaHandle>, SoundError> {
        if self.state.media_unavailable.load(Ordering::SeqCst) {
            return Err(SoundError::FileNotFound(locator.describe()));
        }
        let media = Arc::new(MockMediaState {
            locator: locator.clone(),
            playing: AtomicBool::new(false),
            released: AtomicBool::new(false),
            volume: Mutex::new(volume),
            fail_teardown: self.state.fail_teardown.load(Ordering::SeqCst),
        });
        self.state.media.lock().unwrap().push(Arc::clone(&media));
        Ok(Box::new(MockMedia(media)))
    }
}

struct MockPcmStream(Arc<MockStreamState>);

impl MockPcmStream {
    fn teardown_result(&self, what: &str) -> Result<(), SoundError> {
        if self.0.fail_teardown {
            Err(SoundError::StreamError(format!("mock {} failure", what)))
        } else {
            Ok(())
        }
    }
}

impl PcmStream for MockPcmStream {
    fn play(&self) -> Result<(), SoundError> {
        if self.0.is_released() {
            return Err(SoundError::StreamError("released".to_string()));
        }
        self.0.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, samples: &[i16]) -> Result<usize, SoundError> {
        if self.0.is_released() {
            return Err(SoundError::StreamError("released".to_string()));
        }
        thread::sleep(WRITE_DELAY);
        self.0
            .samples_written
            .fetch_add(samples.len(), Ordering::SeqCst);
        Ok(samples.len())
    }

    fn set_volume(&self, volume: f32) -> Result<(), SoundError> {
        *self.0.volume.lock().unwrap() = volume;
        Ok(())
    }

    fn is_playing(&self) -> Result<bool, SoundError> {
        Ok(self.0.playing.load(Ordering::SeqCst) && !self.0.is_released())
    }

    fn pause(&self) -> Result<(), SoundError> {
        self.0.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&self) -> Result<(), SoundError> {
        self.teardown_result("flush")
    }

    fn stop(&self) -> Result<(), SoundError> {
        self.0.playing.store(false, Ordering::SeqCst);
        self.teardown_result("stop")
    }

    fn release(&self) -> Result<(), SoundError> {
        self.0.playing.store(false, Ordering::SeqCst);
        self.0.released.store(true, Ordering::SeqCst);
        self.teardown_result("release")
    }
}

struct MockMedia(Arc<MockMediaState>);

impl MediaHandle for MockMedia {
    fn start(&mut self) -> Result<(), SoundError> {
        if self.0.is_released() {
            return Err(SoundError::PlaybackError("released".to_string()));
        }
        self.0.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        self.0.playing.store(false, Ordering::SeqCst);
        if self.0.fail_teardown {
            return Err(SoundError::PlaybackError("mock stop failure".to_string()));
        }
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), SoundError> {
        *self.0.volume.lock().unwrap() = volume;
        Ok(())
    }

    fn is_playing(&self) -> Result<bool, SoundError> {
        if self.0.is_released() {
            return Err(SoundError::PlaybackError("released".to_string()));
        }
        Ok(self.0.is_playing())
    }

    fn release(&mut self) -> Result<(), SoundError> {
        self.0.playing.store(false, Ordering::SeqCst);
        self.0.released.store(true, Ordering::SeqCst);
        if self.0.fail_teardown {
            return Err(SoundError::PlaybackError("mock release failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn locator() -> ResourceLocator {
        ResourceLocator::Path(PathBuf::from("/tmp/rain.mp3"))
    }

    #[test]
    fn test_stream_lifecycle() {
        let backend = MockBackend::new();
        let stream = backend.open_pcm_stream(PcmFormat::stereo(44_100)).unwrap();
        assert_eq!(backend.streams_opened(), 1);
        assert_eq!(backend.live_streams(), 1);

        stream.play().unwrap();
        assert!(stream.is_playing().unwrap());
        assert_eq!(stream.write(&[0; 8]).unwrap(), 8);
        assert_eq!(backend.streams()[0].samples_written(), 8);

        stream.release().unwrap();
        assert_eq!(backend.live_streams(), 0);
        assert!(stream.write(&[0; 8]).is_err());
    }

    #[test]
    fn test_stream_unavailable() {
        let backend = MockBackend::new();
        backend.set_stream_unavailable(true);
        let result = backend.open_pcm_stream(PcmFormat::stereo(44_100));
        assert!(matches!(result, Err(SoundError::DeviceNotAvailable(_))));
        assert_eq!(backend.streams_opened(), 0);
    }

    #[test]
    fn test_media_lifecycle() {
        let backend = MockBackend::new();
        let mut media = backend.prepare_media(&locator(), 0.0).unwrap();
        assert_eq!(backend.media_prepared(), 1);

        media.start().unwrap();
        media.set_volume(0.7).unwrap();
        assert!(media.is_playing().unwrap());
        assert_eq!(backend.media()[0].volume(), 0.7);

        media.release().unwrap();
        assert_eq!(backend.live_media(), 0);
        assert!(media.is_playing().is_err());
    }

    #[test]
    fn test_failing_teardown_still_releases() {
        let backend = MockBackend::new();
        backend.set_fail_teardown(true);
        let stream = backend.open_pcm_stream(PcmFormat::stereo(44_100)).unwrap();
        assert!(stream.stop().is_err());
        assert!(stream.release().is_err());
        assert_eq!(backend.live_streams(), 0);
    }

    #[test]
    fn test_media_unavailable() {
        let backend = MockBackend::new();
        backend.set_media_unavailable(true);
        assert!(backend.prepare_media(&locator(), 1.0).is_err());
    }
}
