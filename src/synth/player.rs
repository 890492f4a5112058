//! Threaded player for synthesized noise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use super::{NoiseFlavor, NoiseSynthesizer};
use crate::sound::{AudioBackend, PcmFormat, PcmStream, SoundError};
use crate::types::{clamp_volume, EngineConfig};

/// A running generation thread and the stream it feeds.
struct Worker {
    stream: Arc<dyn PcmStream>,
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

/// Plays a `NoiseSynthesizer` through a PCM output stream.
///
/// Each `start` opens a fresh stream and spawns a generation thread that
/// writes one block at a time, blocking on device backpressure and checking
/// its stop flag between blocks.
pub struct SynthPlayer {
    id: String,
    flavor: NoiseFlavor,
    backend: Arc<dyn AudioBackend>,
    format: PcmFormat,
    block_frames: usize,
    join_timeout: Duration,
    volume: f32,
    worker: Option<Worker>,
}

impl SynthPlayer {
    /// Creates an idle player.
    pub fn new(
        id: impl Into<String>,
        flavor: NoiseFlavor,
        backend: Arc<dyn AudioBackend>,
        config: &EngineConfig,
        volume: f32,
    ) -> Self {
        Self {
            id: id.into(),
            flavor,
            backend,
            format: PcmFormat::stereo(config.sample_rate),
            block_frames: config.block_frames.max(1),
            join_timeout: Duration::from_millis(config.synth_join_timeout_ms),
            volume: clamp_volume(volume),
            worker: None,
        }
    }

    pub fn flavor(&self) -> &NoiseFlavor {
        &self.flavor
    }

    /// Starts (or restarts) generation with fresh synthesis state.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream cannot be opened or started.
    pub fn start(&mut self) -> Result<(), SoundError> {
        self.stop();

        let stream = self.backend.open_pcm_stream(self.format)?;
        if let Err(e) = stream.set_volume(self.volume) {
            debug!("Failed to set initial synth volume: {}", e);
        }
        if let Err(e) = stream.play() {
            release_stream(&stream);
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded::<()>(1);
        let synth = NoiseSynthesizer::new(self.flavor.clone(), self.format.sample_rate);
        let frames = self.block_frames;
        let thread_stream = Arc::clone(&stream);
        let thread_stop = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name(format!("synth-{}", self.id))
            .spawn(move || {
                generation_loop(synth, frames, &*thread_stream, &thread_stop);
                let _ = done_tx.send(());
            });

        let thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                release_stream(&stream);
                return Err(SoundError::PlaybackError(format!(
                    "failed to spawn synthesis thread: {}",
                    e
                )));
            }
        };

        debug!("Synth '{}' started (flavor: {})", self.id, self.flavor.text());
        self.worker = Some(Worker {
            stream,
            stop,
            done: done_rx,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Updates the device gain and the cached value.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
        if let Some(worker) = &self.worker {
            if let Err(e) = worker.stream.set_volume(self.volume) {
                debug!("Failed to set synth volume: {}", e);
            }
        }
    }

    /// Last gain applied.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Whether generation is running and the device is consuming.
    pub fn is_playing(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| {
            !worker.stop.load(Ordering::SeqCst) && worker.stream.is_playing().unwrap_or(false)
        })
    }

    /// Signals the thread, waits for it up to the join timeout, then
    /// releases the stream. Every step runs even if an earlier one fails.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        worker.stop.store(true, Ordering::SeqCst);
        match worker.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = worker.thread.take() {
                    if thread.join().is_err() {
                        warn!("Synth '{}' thread panicked", self.id);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread exits on its next write once the stream is released.
                warn!(
                    "Synth '{}' thread did not exit within {:?}",
                    self.id, self.join_timeout
                );
            }
        }

        release_stream(&worker.stream);
        debug!("Synth '{}' stopped", self.id);
    }
}

impl Drop for SynthPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SynthPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthPlayer")
            .field("id", &self.id)
            .field("flavor", &self.flavor.text())
            .field("volume", &self.volume)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

fn generation_loop(
    mut synth: NoiseSynthesizer,
    frames: usize,
    stream: &dyn PcmStream,
    stop: &AtomicBool,
) {
    let mut block = vec![0i16; frames * 2];
    'blocks: while !stop.load(Ordering::SeqCst) {
        synth.fill_block(&mut block);
        loop {
            match stream.write(&block) {
                Ok(0) if stop.load(Ordering::SeqCst) => break 'blocks,
                Ok(0) => continue,
                Ok(_) => break,
                Err(e) => {
                    debug!("Synthesis stream closed: {}", e);
                    break 'blocks;
                }
            }
        }
    }
}

fn release_stream(stream: &Arc<dyn PcmStream>) {
    let results = [
        ("pause", stream.pause()),
        ("flush", stream.flush()),
        ("stop", stream.stop()),
        ("release", stream.release()),
    ];
    for (name, result) in results {
        if let Err(e) = result {
            debug!("Stream {} failed during teardown: {}", name, e);
        }
    }
}
