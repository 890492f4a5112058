//! Serialized command context for the session engine.
//!
//! Everything that touches the engine is a `SessionCommand` on one
//! unbounded channel: caller requests (with a oneshot reply), delayed
//! fade steps, alarm fires and focus-loss notices. `CommandProcessor`
//! drains the channel one command at a time.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::fade::{ScheduledStep, StepScheduler};
use super::lifecycle::SessionEvent;
use super::session::{EngineHosts, PlayOutcome, SessionEngine};
use super::timer::{
    AlarmScheduler, Clock, MemoryTimerStore, SleepTimerScheduler, SystemClock, TimerError,
    TimerStore, TokioAlarmScheduler,
};
use crate::focus::{DesktopFocusHost, FocusHost};
use crate::sound::AudioBackend;
use crate::types::{EngineConfig, EngineStatus, TimerStatus};

// ============================================================================
// Commands
// ============================================================================

/// A unit of work for the command context.
#[derive(Debug)]
pub enum SessionCommand {
    Initialize {
        reply: oneshot::Sender<bool>,
    },
    Play {
        id: String,
        resource: Option<String>,
        volume: f32,
        reply: oneshot::Sender<PlayOutcome>,
    },
    Stop {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    StopAll {
        reply: oneshot::Sender<()>,
    },
    FadeOut {
        reply: oneshot::Sender<()>,
    },
    SetVolume {
        id: String,
        volume: f32,
        reply: oneshot::Sender<bool>,
    },
    SetSoftTimer {
        target_ms: i64,
        reply: oneshot::Sender<Result<(), TimerError>>,
    },
    SetAtomicTimer {
        target_ms: i64,
        reply: oneshot::Sender<Result<(), TimerError>>,
    },
    Remaining {
        reply: oneshot::Sender<TimerStatus>,
    },
    PersistedTimestamp {
        reply: oneshot::Sender<i64>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    ClearAllData {
        reply: oneshot::Sender<Result<(), TimerError>>,
    },
    /// Host revoked exclusive output.
    FocusLost { transient: bool },
    /// A delayed fade step came due.
    FadeStep(ScheduledStep),
    /// The soft timer alarm fired.
    TimerFired,
    /// Stop everything and end the processor loop.
    Shutdown,
}

/// Errors returned to callers of `SessionHandle`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command processor is no longer running.
    #[error("セッションエンジンが停止しています")]
    SessionClosed,

    /// A timer request was rejected.
    #[error(transparent)]
    Timer(#[from] TimerError),
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Cloneable sender side of the command context.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Posts a command without waiting. Returns false if the processor is gone.
    pub fn post(&self, command: SessionCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)
    }

    pub async fn initialize(&self) -> Result<bool, CommandError> {
        self.request(|reply| SessionCommand::Initialize { reply })
            .await
    }

    pub async fn play(
        &self,
        id: &str,
        resource: Option<&str>,
        volume: f32,
    ) -> Result<PlayOutcome, CommandError> {
        self.request(|reply| SessionCommand::Play {
            id: id.to_string(),
            resource: resource.map(str::to_string),
            volume,
            reply,
        })
        .await
    }

    pub async fn stop(&self, id: &str) -> Result<bool, CommandError> {
        self.request(|reply| SessionCommand::Stop {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn stop_all(&self) -> Result<(), CommandError> {
        self.request(|reply| SessionCommand::StopAll { reply }).await
    }

    pub async fn fade_out_and_stop(&self) -> Result<(), CommandError> {
        self.request(|reply| SessionCommand::FadeOut { reply }).await
    }

    pub async fn set_volume(&self, id: &str, volume: f32) -> Result<bool, CommandError> {
        self.request(|reply| SessionCommand::SetVolume {
            id: id.to_string(),
            volume,
            reply,
        })
        .await
    }

    pub async fn set_soft_timer(&self, target_ms: i64) -> Result<(), CommandError> {
        self.request(|reply| SessionCommand::SetSoftTimer { target_ms, reply })
            .await?
            .map_err(CommandError::from)
    }

    pub async fn set_atomic_timer(&self, target_ms: i64) -> Result<(), CommandError> {
        self.request(|reply| SessionCommand::SetAtomicTimer { target_ms, reply })
            .await?
            .map_err(CommandError::from)
    }

    pub async fn remaining(&self) -> Result<TimerStatus, CommandError> {
        self.request(|reply| SessionCommand::Remaining { reply })
            .await
    }

    pub async fn persisted_timestamp(&self) -> Result<i64, CommandError> {
        self.request(|reply| SessionCommand::PersistedTimestamp { reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, CommandError> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    pub async fn clear_all_data(&self) -> Result<(), CommandError> {
        self.request(|reply| SessionCommand::ClearAllData { reply })
            .await?
            .map_err(CommandError::from)
    }

    pub fn focus_lost(&self, transient: bool) -> bool {
        self.post(SessionCommand::FocusLost { transient })
    }

    pub fn timer_fired(&self) -> bool {
        self.post(SessionCommand::TimerFired)
    }

    pub fn shutdown(&self) -> bool {
        self.post(SessionCommand::Shutdown)
    }
}

// ============================================================================
// TokioStepScheduler
// ============================================================================

/// Delivers fade steps back into the command channel after a tokio sleep.
#[derive(Debug, Clone)]
pub struct TokioStepScheduler {
    handle: SessionHandle,
}

impl TokioStepScheduler {
    pub fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }
}

impl StepScheduler for TokioStepScheduler {
    fn schedule(&mut self, delay: Duration, step: ScheduledStep) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; fade step dropped");
            return;
        };
        let handle = self.handle.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !handle.post(SessionCommand::FadeStep(step)) {
                debug!("Fade step after shutdown dropped");
            }
        });
    }
}

// ============================================================================
// CommandProcessor
// ============================================================================

/// Owns the engine and applies commands in arrival order.
#[derive(Debug)]
pub struct CommandProcessor {
    engine: SessionEngine,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl CommandProcessor {
    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Runs until `Shutdown` arrives.
    ///
    /// The engine's own step scheduler and alarm callback hold handle
    /// clones, so dropping the caller's handles does not end the loop.
    ///
    /// A persisted future soft target is re-armed first.
    pub async fn run(mut self) {
        if self.engine.restore_timers() {
            info!("Restored persisted sleep timer");
        }
        while let Some(command) = self.commands.recv().await {
            if !self.dispatch(command) {
                break;
            }
        }
        self.engine.shutdown();
        info!("Command processor stopped");
    }

    /// Applies one command. Returns false on `Shutdown`.
    pub fn dispatch(&mut self, command: SessionCommand) -> bool {
        // A dropped reply receiver only means the caller gave up waiting.
        match command {
            SessionCommand::Initialize { reply } => {
                let _ = reply.send(self.engine.initialize());
            }
            SessionCommand::Play {
                id,
                resource,
                volume,
                reply,
            } => {
                let outcome = self.engine.play(&id, resource.as_deref(), volume);
                let _ = reply.send(outcome);
            }
            SessionCommand::Stop { id, reply } => {
                let _ = reply.send(self.engine.stop(&id));
            }
            SessionCommand::StopAll { reply } => {
                self.engine.stop_all();
                let _ = reply.send(());
            }
            SessionCommand::FadeOut { reply } => {
                self.engine.fade_out_and_stop();
                let _ = reply.send(());
            }
            SessionCommand::SetVolume { id, volume, reply } => {
                let _ = reply.send(self.engine.set_volume(&id, volume));
            }
            SessionCommand::SetSoftTimer { target_ms, reply } => {
                let _ = reply.send(self.engine.set_soft_timer(target_ms));
            }
            SessionCommand::SetAtomicTimer { target_ms, reply } => {
                let _ = reply.send(self.engine.set_atomic_timer(target_ms));
            }
            SessionCommand::Remaining { reply } => {
                let _ = reply.send(self.engine.remaining());
            }
            SessionCommand::PersistedTimestamp { reply } => {
                let _ = reply.send(self.engine.persisted_atomic_target());
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.engine.status());
            }
            SessionCommand::ClearAllData { reply } => {
                let _ = reply.send(self.engine.clear_all_data());
            }
            SessionCommand::FocusLost { transient } => self.engine.focus_lost(transient),
            SessionCommand::FadeStep(step) => self.engine.handle_fade_step(step),
            SessionCommand::TimerFired => self.engine.timer_fired(),
            SessionCommand::Shutdown => return false,
        }
        true
    }
}

// ============================================================================
// SessionBuilder
// ============================================================================

/// Wires an engine to its command channel and host collaborators.
///
/// Unset collaborators default to the desktop host: no focus arbitration,
/// the system clock, an in-memory timer store and a tokio alarm that
/// posts `TimerFired`.
pub struct SessionBuilder {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    focus: Option<Box<dyn FocusHost>>,
    store: Option<Box<dyn TimerStore>>,
    alarms: Option<Box<dyn AlarmScheduler>>,
    steps: Option<Box<dyn StepScheduler>>,
    clock: Option<Arc<dyn Clock>>,
}

/// Everything `SessionBuilder::build` produces.
#[derive(Debug)]
pub struct Session {
    pub handle: SessionHandle,
    pub processor: CommandProcessor,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionBuilder {
    pub fn new(config: EngineConfig, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            config,
            backend,
            focus: None,
            store: None,
            alarms: None,
            steps: None,
            clock: None,
        }
    }

    pub fn focus_host(mut self, focus: Box<dyn FocusHost>) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn timer_store(mut self, store: Box<dyn TimerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn alarm_scheduler(mut self, alarms: Box<dyn AlarmScheduler>) -> Self {
        self.alarms = Some(alarms);
        self
    }

    pub fn step_scheduler(mut self, steps: Box<dyn StepScheduler>) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Session {
        let (tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = SessionHandle { tx };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let alarms = self.alarms.unwrap_or_else(|| {
            let fire = handle.clone();
            Box::new(TokioAlarmScheduler::new(Arc::clone(&clock), move || {
                fire.timer_fired();
            }))
        });
        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryTimerStore::new()));
        let steps = self
            .steps
            .unwrap_or_else(|| Box::new(TokioStepScheduler::new(handle.clone())));

        let engine = SessionEngine::new(
            self.config,
            EngineHosts {
                backend: self.backend,
                focus: self.focus.unwrap_or_else(|| Box::new(DesktopFocusHost)),
                steps,
                timers: SleepTimerScheduler::new(store, alarms, clock),
                events: events_tx,
            },
        );

        Session {
            handle,
            processor: CommandProcessor { engine, commands },
            events,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
