//! Sleep timer for the session engine.
//!
//! This module provides the restart-safe sleep timer:
//! - Two persisted slots: the soft target (fades out the session when
//!   reached) and the atomic target (display only)
//! - Wall-clock alarms that re-check the clock instead of trusting a
//!   single long sleep, so a suspended process fires late but still fires
//! - Re-arming a future soft target after a restart

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::types::{SleepTimerState, TimerStatus};

/// Longest single sleep of the alarm watcher.
const ALARM_POLL: Duration = Duration::from_secs(1);

// ============================================================================
// TimerError
// ============================================================================

/// Errors raised when arming or persisting a timer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The host does not allow exact alarms.
    #[error("正確なアラームをスケジュールする権限がありません")]
    SchedulingPermissionDenied,

    /// The alarm could not be armed.
    #[error("アラームの設定に失敗しました: {0}")]
    ScheduleFailed(String),

    /// The timer state could not be read or written.
    #[error("タイマー状態の保存に失敗しました: {0}")]
    PersistenceFailed(String),
}

impl TimerError {
    /// Returns true if retrying after granting permission may help.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::SchedulingPermissionDenied)
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::SchedulingPermissionDenied => "アラームの権限を許可してから再度お試しください",
            Self::ScheduleFailed(_) => "デーモンを再起動してください",
            Self::PersistenceFailed(_) => "データディレクトリの書き込み権限を確認してください",
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Settable clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: i64) {
        self.now.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Remaining time for a soft target: whole seconds, or stopped once the
/// target is unset or reached.
pub fn remaining_at(target_ms: i64, now_ms: i64) -> TimerStatus {
    if target_ms <= 0 || now_ms >= target_ms {
        return TimerStatus::stopped();
    }
    TimerStatus {
        seconds_left: ((target_ms - now_ms) / 1000) as u64,
        running: true,
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Durable storage for both timer slots.
pub trait TimerStore: Send {
    /// Loads the persisted state; a missing store reads as both slots unset.
    fn load(&self) -> Result<SleepTimerState, TimerError>;

    /// Persists both slots.
    fn save(&mut self, state: &SleepTimerState) -> Result<(), TimerError>;
}

/// JSON file store (`{"softTimerTargetMs":…,"atomicTimerTargetMs":…}`).
#[derive(Debug, Clone)]
pub struct JsonTimerStore {
    path: PathBuf,
}

impl JsonTimerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TimerStore for JsonTimerStore {
    fn load(&self) -> Result<SleepTimerState, TimerError> {
        if !self.path.exists() {
            return Ok(SleepTimerState::default());
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| TimerError::PersistenceFailed(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| TimerError::PersistenceFailed(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&mut self, state: &SleepTimerState) -> Result<(), TimerError> {
        let fail = |e: std::io::Error| TimerError::PersistenceFailed(format!("{}: {}", self.path.display(), e));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(fail)?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| TimerError::PersistenceFailed(e.to_string()))?;

        // Write-then-rename keeps the previous state intact on a crash.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(fail)?;
        std::fs::rename(&tmp, &self.path).map_err(fail)?;
        Ok(())
    }
}

/// In-memory store for tests. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTimerStore {
    state: Arc<Mutex<SleepTimerState>>,
    fail: Arc<AtomicBool>,
}

impl MemoryTimerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: SleepTimerState) -> Self {
        let store = Self::default();
        *store.state.lock().unwrap() = state;
        store
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> SleepTimerState {
        *self.state.lock().unwrap()
    }
}

impl TimerStore for MemoryTimerStore {
    fn load(&self) -> Result<SleepTimerState, TimerError> {
        Ok(*self.state.lock().unwrap())
    }

    fn save(&mut self, state: &SleepTimerState) -> Result<(), TimerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TimerError::PersistenceFailed("mock failure".to_string()));
        }
        *self.state.lock().unwrap() = *state;
        Ok(())
    }
}

// ============================================================================
// Alarms
// ============================================================================

/// Host alarm service delivering the soft timer fire.
pub trait AlarmScheduler: Send {
    /// Whether exact alarms are allowed.
    fn can_schedule_exact(&self) -> bool;

    /// Arms the alarm for `target_ms`, replacing any previous one.
    fn schedule(&mut self, target_ms: i64) -> Result<(), TimerError>;

    /// Disarms the alarm. No-op if none is armed.
    fn cancel(&mut self);
}

/// Alarm watcher running on the tokio runtime.
///
/// Sleeps in bounded slices and re-reads the wall clock each time, then
/// invokes the fire callback once the target is reached.
pub struct TokioAlarmScheduler {
    clock: Arc<dyn Clock>,
    on_fire: Arc<dyn Fn() + Send + Sync>,
    task: Option<JoinHandle<()>>,
}

impl TokioAlarmScheduler {
    pub fn new(clock: Arc<dyn Clock>, on_fire: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            clock,
            on_fire: Arc::new(on_fire),
            task: None,
        }
    }

    /// Whether an alarm is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn can_schedule_exact(&self) -> bool {
        true
    }

    fn schedule(&mut self, target_ms: i64) -> Result<(), TimerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TimerError::ScheduleFailed(e.to_string()))?;
        self.cancel();

        let clock = Arc::clone(&self.clock);
        let on_fire = Arc::clone(&self.on_fire);
        self.task = Some(runtime.spawn(async move {
            loop {
                let left = target_ms - clock.now_ms();
                if left <= 0 {
                    break;
                }
                sleep(ALARM_POLL.min(Duration::from_millis(left as u64))).await;
            }
            debug!("Sleep timer alarm reached");
            on_fire();
        }));
        debug!("Sleep timer alarm armed for {}", target_ms);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Sleep timer alarm cancelled");
        }
    }
}

impl Drop for TokioAlarmScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TokioAlarmScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioAlarmScheduler")
            .field("armed", &self.is_armed())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct MockAlarmState {
    permitted: AtomicBool,
    fail: AtomicBool,
    armed: Mutex<Option<i64>>,
    schedules: AtomicUsize,
    cancels: AtomicUsize,
}

impl Default for MockAlarmState {
    fn default() -> Self {
        Self {
            permitted: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            armed: Mutex::new(None),
            schedules: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }
}

/// Mock alarm scheduler for testing. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockAlarmScheduler {
    state: Arc<MockAlarmState>,
}

impl MockAlarmScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_permitted(&self, permitted: bool) {
        self.state.permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    /// Target of the armed alarm, if any.
    #[must_use]
    pub fn armed(&self) -> Option<i64> {
        *self.state.armed.lock().unwrap()
    }

    #[must_use]
    pub fn schedule_count(&self) -> usize {
        self.state.schedules.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.state.cancels.load(Ordering::SeqCst)
    }
}

impl AlarmScheduler for MockAlarmScheduler {
    fn can_schedule_exact(&self) -> bool {
        self.state.permitted.load(Ordering::SeqCst)
    }

    fn schedule(&mut self, target_ms: i64) -> Result<(), TimerError> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(TimerError::ScheduleFailed("mock failure".to_string()));
        }
        self.state.schedules.fetch_add(1, Ordering::SeqCst);
        *self.state.armed.lock().unwrap() = Some(target_ms);
        Ok(())
    }

    fn cancel(&mut self) {
        self.state.cancels.fetch_add(1, Ordering::SeqCst);
        *self.state.armed.lock().unwrap() = None;
    }
}

// ============================================================================
// SleepTimerScheduler
// ============================================================================

/// Owns both timer slots, their persistence and the soft timer alarm.
pub struct SleepTimerScheduler {
    store: Box<dyn TimerStore>,
    alarms: Box<dyn AlarmScheduler>,
    clock: Arc<dyn Clock>,
    state: SleepTimerState,
}

impl SleepTimerScheduler {
    /// Creates a scheduler, loading whatever state was persisted.
    ///
    /// An unreadable store is logged and treated as empty.
    pub fn new(
        store: Box<dyn TimerStore>,
        alarms: Box<dyn AlarmScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = store.load().unwrap_or_else(|e| {
            warn!("Failed to load timer state, starting empty: {}", e);
            SleepTimerState::default()
        });
        Self {
            store,
            alarms,
            clock,
            state,
        }
    }

    pub fn state(&self) -> SleepTimerState {
        self.state
    }

    pub fn soft_target(&self) -> i64 {
        self.state.soft_target_ms
    }

    pub fn atomic_target(&self) -> i64 {
        self.state.atomic_target_ms
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Remaining time on the soft timer.
    pub fn remaining(&self) -> TimerStatus {
        remaining_at(self.state.soft_target_ms, self.clock.now_ms())
    }

    /// Arms the soft timer, or clears it for `target_ms <= 0`.
    ///
    /// The slot is persisted only after the alarm is armed; a failed
    /// write disarms it again.
    ///
    /// # Errors
    ///
    /// Returns an error if exact alarms are not permitted, the alarm
    /// cannot be armed, or the state cannot be persisted.
    pub fn set_soft_timer(&mut self, target_ms: i64) -> Result<(), TimerError> {
        if target_ms <= 0 {
            self.alarms.cancel();
            self.state.soft_target_ms = 0;
            info!("Sleep timer cleared");
            return self.persist();
        }

        if !self.alarms.can_schedule_exact() {
            return Err(TimerError::SchedulingPermissionDenied);
        }
        self.alarms.schedule(target_ms)?;

        let previous = self.state.soft_target_ms;
        self.state.soft_target_ms = target_ms;
        if let Err(e) = self.persist() {
            self.alarms.cancel();
            self.state.soft_target_ms = previous;
            return Err(e);
        }
        info!("Sleep timer set for {}", target_ms);
        Ok(())
    }

    /// Sets the atomic (display) timer, or clears it for `target_ms <= 0`.
    ///
    /// # Errors
    ///
    /// Returns an error if exact alarms are not permitted or the state
    /// cannot be persisted.
    pub fn set_atomic_timer(&mut self, target_ms: i64) -> Result<(), TimerError> {
        if target_ms > 0 && !self.alarms.can_schedule_exact() {
            return Err(TimerError::SchedulingPermissionDenied);
        }
        let previous = self.state.atomic_target_ms;
        self.state.atomic_target_ms = target_ms.max(0);
        if let Err(e) = self.persist() {
            self.state.atomic_target_ms = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Re-arms a persisted soft target that is still in the future.
    ///
    /// Returns whether an alarm was armed. Past targets stay inert.
    pub fn restore(&mut self) -> bool {
        let target = self.state.soft_target_ms;
        if target <= 0 || target <= self.clock.now_ms() {
            return false;
        }
        if !self.alarms.can_schedule_exact() {
            warn!("Cannot re-arm sleep timer: exact alarms not permitted");
            return false;
        }
        match self.alarms.schedule(target) {
            Ok(()) => {
                info!("Sleep timer restored for {}", target);
                true
            }
            Err(e) => {
                warn!("Failed to restore sleep timer: {}", e);
                false
            }
        }
    }

    /// Disarms the alarm and clears both slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleared state cannot be persisted.
    pub fn clear_all(&mut self) -> Result<(), TimerError> {
        self.alarms.cancel();
        self.state = SleepTimerState::default();
        self.persist()
    }

    fn persist(&mut self) -> Result<(), TimerError> {
        self.store.save(&self.state)
    }
}

impl std::fmt::Debug for SleepTimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleepTimerScheduler")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
