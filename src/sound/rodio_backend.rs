//! Audio backend implementation using rodio.
//!
//! Provides the host media decoder and output device for the engine on top
//! of the rodio v0.20 audio library. The `OutputStream` lives on its own
//! thread so the backend itself can be shared freely.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, warn};

use super::error::SoundError;
use super::source::ResourceLocator;
use super::{AudioBackend, MediaHandle, PcmFormat, PcmStream};

/// Blocks queued ahead of the device (about 100 ms at 44.1 kHz).
const PCM_QUEUE_BLOCKS: usize = 4;

/// Longest a single `write` waits for queue space.
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// Remote resources are buffered in memory up to this size.
const MAX_REMOTE_BYTES: u64 = 64 * 1024 * 1024;

/// Connect timeout for a remote resource.
const REMOTE_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest wait for any single socket read of a remote resource.
const REMOTE_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a whole remote fetch.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// RodioBackend
// ============================================================================

/// An audio backend that uses rodio for decoding and output.
pub struct RodioBackend {
    /// Handle to the output stream for creating sinks.
    handle: OutputStreamHandle,
    /// Dropping this sender lets the output thread release the device.
    _shutdown: Sender<()>,
}

impl RodioBackend {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns `SoundError::DeviceNotAvailable` if no audio output device
    /// is available.
    pub fn new() -> Result<Self, SoundError> {
        let (ready_tx, ready_rx) = bounded::<Result<OutputStreamHandle, String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until the backend is dropped.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Audio output stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| SoundError::DeviceNotAvailable(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|e| SoundError::DeviceNotAvailable(e.to_string()))?
            .map_err(SoundError::DeviceNotAvailable)?;

        debug!("Audio output stream initialized");
        Ok(Self {
            handle,
            _shutdown: shutdown_tx,
        })
    }

    fn paused_sink(&self, volume: f32) -> Result<Sink, SoundError> {
        let sink = Sink::try_new(&self.handle).map_err(|e| SoundError::StreamError(e.to_string()))?;
        sink.pause();
        sink.set_volume(volume);
        Ok(sink)
    }

    fn remote_agent(connect: Duration, read: Duration, total: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .timeout(total)
            .build()
    }

    fn fetch_remote(url: &str) -> Result<Vec<u8>, SoundError> {
        let agent = Self::remote_agent(REMOTE_CONNECT_TIMEOUT, REMOTE_READ_TIMEOUT, REMOTE_TIMEOUT);
        Self::fetch_with(&agent, url)
    }

    fn fetch_with(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, SoundError> {
        let response = agent
            .get(url)
            .call()
            .map_err(|e| SoundError::RemoteFetch(format!("{}: {}", url, e)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_REMOTE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| SoundError::RemoteFetch(format!("{}: {}", url, e)))?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}

impl std::fmt::Debug for RodioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioBackend").finish_non_exhaustive()
    }
}

impl AudioBackend for RodioBackend {
    fn open_pcm_stream(&self, format: PcmFormat) -> Result<Arc<dyn PcmStream>, SoundError> {
        let (tx, rx) = bounded::<Vec<i16>>(PCM_QUEUE_BLOCKS);
        let sink = self.paused_sink(1.0)?;
        sink.append(ChannelSource::new(rx.clone(), format));

        Ok(Arc::new(RodioPcmStream {
            sink: Mutex::new(Some(sink)),
            tx: Mutex::new(Some(tx)),
            drain: Mutex::new(Some(rx)),
        }))
    }

    fn prepare_media(
        &self,
        locator: &ResourceLocator,
        volume: f32,
    ) -> Result<Box<dyn MediaHandle>, SoundError> {
        let sink = self.paused_sink(volume)?;
        match locator {
            ResourceLocator::Path(path) => {
                let file = File::open(path)
                    .map_err(|e| SoundError::FileNotFound(format!("{}: {}", path.display(), e)))?;
                let decoder = Decoder::new_looped(BufReader::new(file))
                    .map_err(|e| SoundError::DecodeError(e.to_string()))?;
                sink.append(decoder);
            }
            ResourceLocator::Remote(url) => {
                let bytes = Self::fetch_remote(url)?;
                let decoder = Decoder::new_looped(Cursor::new(bytes))
                    .map_err(|e| SoundError::DecodeError(e.to_string()))?;
                sink.append(decoder);
            }
        }
        debug!("Prepared looping media: {}", locator.describe());
        Ok(Box::new(RodioMedia { sink: Some(sink) }))
    }
}

// ============================================================================
// PCM stream
// ============================================================================

/// Feeds queued PCM blocks to the mixer, emitting silence on underrun.
struct ChannelSource {
    rx: Receiver<Vec<i16>>,
    current: Vec<i16>,
    pos: usize,
    /// Zero samples still owed to finish a silent frame.
    silence: usize,
    format: PcmFormat,
}

impl ChannelSource {
    fn new(rx: Receiver<Vec<i16>>, format: PcmFormat) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            silence: 0,
            format,
        }
    }
}

impl Iterator for ChannelSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.silence > 0 {
            self.silence -= 1;
            return Some(0);
        }
        while self.pos >= self.current.len() {
            match self.rx.try_recv() {
                Ok(block) => {
                    self.current = block;
                    self.pos = 0;
                }
                // One silent frame keeps the channels aligned.
                Err(TryRecvError::Empty) => {
                    self.silence = usize::from(self.format.channels).saturating_sub(1);
                    return Some(0);
                }
                Err(TryRecvError::Disconnected) => return None,
            }
        }
        let sample = self.current[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for ChannelSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

struct RodioPcmStream {
    sink: Mutex<Option<Sink>>,
    tx: Mutex<Option<Sender<Vec<i16>>>>,
    drain: Mutex<Option<Receiver<Vec<i16>>>>,
}

impl RodioPcmStream {
    fn released() -> SoundError {
        SoundError::StreamError("stream released".to_string())
    }

    fn with_sink<T>(&self, f: impl FnOnce(&Sink) -> T) -> Result<T, SoundError> {
        lock(&self.sink).as_ref().map(f).ok_or_else(Self::released)
    }
}

impl PcmStream for RodioPcmStream {
    fn play(&self) -> Result<(), SoundError> {
        self.with_sink(Sink::play)
    }

    fn write(&self, samples: &[i16]) -> Result<usize, SoundError> {
        // Clone the sender so a blocked write never holds the lock.
        let tx = lock(&self.tx).clone().ok_or_else(Self::released)?;
        match tx.send_timeout(samples.to_vec(), WRITE_TIMEOUT) {
            Ok(()) => Ok(samples.len()),
            Err(SendTimeoutError::Timeout(_)) => Ok(0),
            Err(SendTimeoutError::Disconnected(_)) => Err(Self::released()),
        }
    }

    fn set_volume(&self, volume: f32) -> Result<(), SoundError> {
        self.with_sink(|sink| sink.set_volume(volume))
    }

    fn is_playing(&self) -> Result<bool, SoundError> {
        self.with_sink(|sink| !sink.is_paused())
    }

    fn pause(&self) -> Result<(), SoundError> {
        self.with_sink(Sink::pause)
    }

    fn flush(&self) -> Result<(), SoundError> {
        if let Some(rx) = lock(&self.drain).as_ref() {
            while rx.try_recv().is_ok() {}
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), SoundError> {
        self.with_sink(Sink::pause)
    }

    fn release(&self) -> Result<(), SoundError> {
        lock(&self.tx).take();
        lock(&self.drain).take();
        match lock(&self.sink).take() {
            Some(sink) => {
                sink.stop();
                Ok(())
            }
            None => Err(Self::released()),
        }
    }
}

// ============================================================================
// Media handle
// ============================================================================

struct RodioMedia {
    sink: Option<Sink>,
}

impl RodioMedia {
    fn sink(&self) -> Result<&Sink, SoundError> {
        self.sink
            .as_ref()
            .ok_or_else(|| SoundError::PlaybackError("media released".to_string()))
    }
}

impl MediaHandle for RodioMedia {
    fn start(&mut self) -> Result<(), SoundError> {
        self.sink()?.play();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        self.sink()?.pause();
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), SoundError> {
        self.sink()?.set_volume(volume);
        Ok(())
    }

    fn is_playing(&self) -> Result<bool, SoundError> {
        let sink = self.sink()?;
        Ok(!sink.is_paused() && !sink.empty())
    }

    fn release(&mut self) -> Result<(), SoundError> {
        match self.sink.take() {
            Some(sink) => {
                sink.stop();
                Ok(())
            }
            None => {
                warn!("Media released twice");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // Note: These tests may fail in environments without audio hardware
    // (e.g., CI containers). Tests are designed to handle this gracefully.

    #[test]
    fn test_channel_source_silence_on_underrun() {
        let (_tx, rx) = bounded::<Vec<i16>>(1);
        let mut source = ChannelSource::new(rx, PcmFormat::stereo(44_100));
        assert_eq!(source.next(), Some(0));
        assert_eq!(source.next(), Some(0));
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 44_100);
        assert!(source.total_duration().is_none());
    }

    #[test]
    fn test_channel_source_plays_blocks_then_ends() {
        let (tx, rx) = bounded::<Vec<i16>>(2);
        tx.send(vec![1, 1, 2, 2]).unwrap();
        drop(tx);
        let source = ChannelSource::new(rx, PcmFormat::stereo(44_100));
        let samples: Vec<i16> = source.collect();
        assert_eq!(samples, vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_channel_source_underrun_emits_one_frame() {
        let (tx, rx) = bounded::<Vec<i16>>(2);
        let mut source = ChannelSource::new(rx, PcmFormat::stereo(44_100));
        assert_eq!(source.next(), Some(0));
        tx.send(vec![7, 7]).unwrap();
        // The silent frame is finished before the new block starts.
        assert_eq!(source.next(), Some(0));
        assert_eq!(source.next(), Some(7));
        assert_eq!(source.next(), Some(7));
        assert_eq!(source.next(), Some(0));
    }

    #[test]
    fn test_channel_source_skips_empty_blocks() {
        let (tx, rx) = bounded::<Vec<i16>>(2);
        tx.send(Vec::new()).unwrap();
        tx.send(vec![3, 4]).unwrap();
        let mut source = ChannelSource::new(rx, PcmFormat::stereo(44_100));
        assert_eq!(source.next(), Some(3));
        assert_eq!(source.next(), Some(4));
    }

    #[test]
    fn test_remote_timeouts_are_bounded() {
        assert!(REMOTE_CONNECT_TIMEOUT < REMOTE_TIMEOUT);
        assert!(REMOTE_READ_TIMEOUT < REMOTE_TIMEOUT);
        assert!(REMOTE_TIMEOUT <= Duration::from_secs(10));
    }

    #[test]
    fn test_stalled_remote_fails_on_read_timeout() {
        use std::net::TcpListener;
        use std::time::Instant;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts and never answers.
        let server = thread::spawn(move || {
            let conn = listener.accept();
            thread::sleep(Duration::from_millis(600));
            drop(conn);
        });

        let agent = RodioBackend::remote_agent(
            Duration::from_millis(200),
            Duration::from_millis(200),
            Duration::from_secs(2),
        );
        let start = Instant::now();
        let result = RodioBackend::fetch_with(&agent, &format!("http://{}/rain.mp3", addr));

        assert!(matches!(result, Err(SoundError::RemoteFetch(_))));
        assert!(start.elapsed() < Duration::from_millis(550));
        server.join().unwrap();
    }

    #[test]
    fn test_missing_file_is_file_not_found() {
        let backend = match RodioBackend::new() {
            Ok(b) => b,
            Err(_) => return, // Skip test if no audio
        };
        let locator = ResourceLocator::Path(PathBuf::from("/nonexistent/rain.mp3"));
        let result = backend.prepare_media(&locator, 0.5);
        assert!(matches!(result, Err(SoundError::FileNotFound(_))));
    }

    #[test]
    fn test_pcm_stream_release() {
        let backend = match RodioBackend::new() {
            Ok(b) => b,
            Err(_) => return,
        };
        let stream = backend.open_pcm_stream(PcmFormat::stereo(44_100)).unwrap();
        assert!(!stream.is_playing().unwrap());
        stream.play().unwrap();
        assert!(stream.is_playing().unwrap());
        stream.release().unwrap();
        assert!(stream.write(&[0; 4]).is_err());
        assert!(stream.release().is_err());
    }

    #[test]
    fn test_debug_impl() {
        let backend = match RodioBackend::new() {
            Ok(b) => b,
            Err(_) => return,
        };
        assert!(format!("{:?}", backend).contains("RodioBackend"));
    }
}
