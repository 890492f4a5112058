//! Fade state machines.
//!
//! Fades are sequences of delayed steps delivered back into the command
//! context. Every step carries the epoch it was scheduled under; bumping
//! the epoch cancels everything in flight at once, so a stale step can
//! never touch a track after a stop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::types::EngineConfig;

// ============================================================================
// Steps and scheduling
// ============================================================================

/// A single fade step.
#[derive(Debug, Clone, PartialEq)]
pub enum FadeStep {
    /// Move one track's gain along its fade-in ramp.
    FadeIn {
        /// Track id
        track_id: String,
        /// Fade-in job the step belongs to
        job: u64,
        /// Step index, 1-based
        step: u32,
        /// Gain to apply
        volume: f32,
    },
    /// Advance the global fade-out.
    FadeOutTick {
        /// Tick index, 1-based
        tick: u32,
    },
}

/// A step tagged with the cancellation epoch it was scheduled under.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStep {
    pub epoch: u64,
    pub step: FadeStep,
}

/// Delivers steps back to the command context after a delay.
pub trait StepScheduler: Send {
    fn schedule(&mut self, delay: Duration, step: ScheduledStep);
}

#[derive(Debug, Default)]
struct ManualQueue {
    now: Duration,
    seq: u64,
    pending: Vec<(Duration, u64, ScheduledStep)>,
}

/// Virtual-time scheduler for deterministic tests.
///
/// Clones share the same queue, so a test can keep one clone while the
/// fade controller owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualStepScheduler {
    queue: Arc<Mutex<ManualQueue>>,
}

impl ManualStepScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.queue.lock().unwrap().now
    }

    /// Number of steps not yet delivered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().pending.len()
    }

    /// Delivers every step due at or before `until`, in due order, then
    /// sets the clock to `until`. Steps scheduled during delivery are
    /// honoured if they fall inside the window.
    pub fn run_until(&self, until: Duration, mut deliver: impl FnMut(ScheduledStep)) {
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap();
                let earliest = queue
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, (due, _, _))| *due <= until)
                    .min_by_key(|(_, (due, seq, _))| (*due, *seq))
                    .map(|(index, _)| index);
                earliest.map(|index| {
                    let (due, _, step) = queue.pending.remove(index);
                    queue.now = queue.now.max(due);
                    step
                })
            };
            match next {
                Some(step) => deliver(step),
                None => break,
            }
        }
        let mut queue = self.queue.lock().unwrap();
        queue.now = queue.now.max(until);
    }

    /// Advances the clock by `by`, delivering due steps.
    pub fn advance(&self, by: Duration, deliver: impl FnMut(ScheduledStep)) {
        let until = self.now() + by;
        self.run_until(until, deliver);
    }
}

impl StepScheduler for ManualStepScheduler {
    fn schedule(&mut self, delay: Duration, step: ScheduledStep) {
        let mut queue = self.queue.lock().unwrap();
        let due = queue.now + delay;
        let seq = queue.seq;
        queue.seq += 1;
        queue.pending.push((due, seq, step));
    }
}

// ============================================================================
// FadeController
// ============================================================================

/// What the session engine should do with an accepted step.
#[derive(Debug, Clone, PartialEq)]
pub enum FadeAction {
    /// Apply this gain to a track (before the global scalar).
    SetTrackVolume { track_id: String, volume: f32 },
    /// Apply the global scalar to every playing track.
    ApplyGlobal(f32),
    /// The fade-out reached zero; stop everything.
    FadeOutComplete,
}

/// Owns fade-in jobs, the global fade-out and the cancellation epoch.
pub struct FadeController {
    scheduler: Box<dyn StepScheduler>,
    epoch: u64,
    next_job: u64,
    fade_ins: HashMap<String, u64>,
    fade_out_active: bool,
    scalar: f32,
    fade_in: Duration,
    fade_in_steps: u32,
    fade_out_tick: Duration,
    fade_out_ticks: u32,
}

impl FadeController {
    pub fn new(scheduler: Box<dyn StepScheduler>, config: &EngineConfig) -> Self {
        Self {
            scheduler,
            epoch: 0,
            next_job: 0,
            fade_ins: HashMap::new(),
            fade_out_active: false,
            scalar: 1.0,
            fade_in: Duration::from_millis(config.fade_in_ms),
            fade_in_steps: config.fade_in_steps.max(1),
            fade_out_tick: Duration::from_millis(config.fade_out_tick_ms),
            fade_out_ticks: config.fade_out_ticks(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current global scalar (1.0 unless a fade-out is running).
    pub fn scalar(&self) -> f32 {
        self.scalar
    }

    pub fn is_fading_out(&self) -> bool {
        self.fade_out_active
    }

    pub fn has_fade_in(&self, track_id: &str) -> bool {
        self.fade_ins.contains_key(track_id)
    }

    /// Cancels every pending fade-in and fade-out step.
    pub fn cancel_all(&mut self) {
        self.epoch += 1;
        self.fade_ins.clear();
        self.fade_out_active = false;
        self.scalar = 1.0;
    }

    /// Schedules a linear ramp from 0 to `target` for one track,
    /// replacing any ramp already running for it.
    pub fn begin_fade_in(&mut self, track_id: &str, target: f32) {
        let job = self.next_job;
        self.next_job += 1;
        self.fade_ins.insert(track_id.to_string(), job);

        let steps = self.fade_in_steps;
        let total_us = self.fade_in.as_micros() as u64;
        for i in 1..=steps {
            let delay = Duration::from_micros(total_us * u64::from(i) / u64::from(steps));
            let volume = target * i as f32 / steps as f32;
            self.scheduler.schedule(
                delay,
                ScheduledStep {
                    epoch: self.epoch,
                    step: FadeStep::FadeIn {
                        track_id: track_id.to_string(),
                        job,
                        step: i,
                        volume,
                    },
                },
            );
        }
    }

    /// Drops the fade-in job of one track; its remaining steps are ignored.
    pub fn cancel_fade_in(&mut self, track_id: &str) {
        self.fade_ins.remove(track_id);
    }

    /// Cancels everything and starts the global fade-out at scalar 1.0.
    pub fn begin_fade_out(&mut self) {
        self.cancel_all();
        self.fade_out_active = true;
        self.schedule_tick(1);
    }

    fn schedule_tick(&mut self, tick: u32) {
        self.scheduler.schedule(
            self.fade_out_tick,
            ScheduledStep {
                epoch: self.epoch,
                step: FadeStep::FadeOutTick { tick },
            },
        );
    }

    /// Validates a delivered step and turns it into an action.
    ///
    /// Returns `None` for steps from a cancelled epoch or a replaced job.
    pub fn accept(&mut self, scheduled: ScheduledStep) -> Option<FadeAction> {
        if scheduled.epoch != self.epoch {
            return None;
        }

        match scheduled.step {
            FadeStep::FadeIn {
                track_id,
                job,
                step,
                volume,
            } => {
                if self.fade_ins.get(&track_id) != Some(&job) {
                    return None;
                }
                if step >= self.fade_in_steps {
                    self.fade_ins.remove(&track_id);
                }
                Some(FadeAction::SetTrackVolume { track_id, volume })
            }
            FadeStep::FadeOutTick { tick } => {
                if !self.fade_out_active {
                    return None;
                }
                self.scalar = fade_out_scalar(tick, self.fade_out_ticks);
                if tick >= self.fade_out_ticks {
                    self.fade_out_active = false;
                    Some(FadeAction::FadeOutComplete)
                } else {
                    self.schedule_tick(tick + 1);
                    Some(FadeAction::ApplyGlobal(self.scalar))
                }
            }
        }
    }
}

impl std::fmt::Debug for FadeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FadeController")
            .field("epoch", &self.epoch)
            .field("fade_ins", &self.fade_ins.len())
            .field("fade_out_active", &self.fade_out_active)
            .field("scalar", &self.scalar)
            .finish_non_exhaustive()
    }
}

/// Scalar after `tick` of `total` fade-out ticks: `max(0, 1 - tick/total)`.
pub fn fade_out_scalar(tick: u32, total: u32) -> f32 {
    (1.0 - tick as f32 / total.max(1) as f32).max(0.0)
}
