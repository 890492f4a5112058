//! Core data types for the sleep sounds engine.
//!
//! This module defines the data structures used for:
//! - Engine configuration with validation
//! - Track, focus and timer state shared between components
//! - IPC request/response serialization

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============================================================================
// Volume
// ============================================================================

/// Clamps a volume into `[0, 1]`. NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

// ============================================================================
// EngineConfig
// ============================================================================

fn default_sample_rate() -> u32 {
    44_100
}

fn default_block_frames() -> usize {
    1024
}

fn default_fade_in_ms() -> u64 {
    150
}

fn default_fade_in_steps() -> u32 {
    20
}

fn default_fade_out_ms() -> u64 {
    5000
}

fn default_fade_out_tick_ms() -> u64 {
    100
}

fn default_synth_join_timeout_ms() -> u64 {
    200
}

fn default_asset_root() -> PathBuf {
    PathBuf::from(".")
}

/// Configuration for the session engine.
///
/// Every field has a default, so a partial JSON document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Output sample rate for synthesized tracks (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frames generated per synthesis block
    #[serde(default = "default_block_frames")]
    pub block_frames: usize,
    /// Fade-in duration after a track starts (ms)
    #[serde(default = "default_fade_in_ms")]
    pub fade_in_ms: u64,
    /// Number of discrete fade-in steps
    #[serde(default = "default_fade_in_steps")]
    pub fade_in_steps: u32,
    /// Global fade-out duration (ms)
    #[serde(default = "default_fade_out_ms")]
    pub fade_out_ms: u64,
    /// Interval between global fade-out ticks (ms)
    #[serde(default = "default_fade_out_tick_ms")]
    pub fade_out_tick_ms: u64,
    /// Upper bound on waiting for a synthesis thread to exit (ms)
    #[serde(default = "default_synth_join_timeout_ms")]
    pub synth_join_timeout_ms: u64,
    /// Directory containing the bundled `public/` assets
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_frames: default_block_frames(),
            fade_in_ms: default_fade_in_ms(),
            fade_in_steps: default_fade_in_steps(),
            fade_out_ms: default_fade_out_ms(),
            fade_out_tick_ms: default_fade_out_tick_ms(),
            synth_join_timeout_ms: default_synth_join_timeout_ms(),
            asset_root: default_asset_root(),
        }
    }
}

impl EngineConfig {
    /// Returns a copy with the given global fade-out timing.
    pub fn with_fade_out(mut self, duration_ms: u64, tick_ms: u64) -> Self {
        self.fade_out_ms = duration_ms;
        self.fade_out_tick_ms = tick_ms;
        self
    }

    /// Returns a copy with the given fade-in timing.
    pub fn with_fade_in(mut self, duration_ms: u64, steps: u32) -> Self {
        self.fade_in_ms = duration_ms;
        self.fade_in_steps = steps;
        self
    }

    /// Returns a copy with the given asset root.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    /// Number of ticks in a full global fade-out.
    pub fn fade_out_ticks(&self) -> u32 {
        (self.fade_out_ms / self.fade_out_tick_ms.max(1)).max(1) as u32
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err("サンプルレートは8000-192000Hzの範囲で指定してください".to_string());
        }
        if self.block_frames == 0 || self.block_frames > 16_384 {
            return Err("ブロックサイズは1-16384フレームの範囲で指定してください".to_string());
        }
        if self.fade_in_steps == 0 {
            return Err("フェードインのステップ数は1以上にしてください".to_string());
        }
        if self.fade_out_tick_ms == 0 || self.fade_out_ms < self.fade_out_tick_ms {
            return Err(
                "フェードアウト時間はティック間隔以上、ティック間隔は1ms以上にしてください"
                    .to_string(),
            );
        }
        Ok(())
    }
}

// ============================================================================
// TrackKind
// ============================================================================

/// The two player families a track can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// A decoded, looping audio resource
    File,
    /// Procedurally generated noise
    Synthetic,
}

impl TrackKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::File => "file",
            TrackKind::Synthetic => "synthetic",
        }
    }
}

// ============================================================================
// FocusState
// ============================================================================

/// Exclusive audio output access as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusState {
    /// Never requested, or released after the session terminated
    #[default]
    Unrequested,
    /// Host granted exclusive access
    Granted,
    /// Host revoked access (permanently or transiently)
    Lost,
}

impl FocusState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusState::Unrequested => "unrequested",
            FocusState::Granted => "granted",
            FocusState::Lost => "lost",
        }
    }
}

// ============================================================================
// Sleep timer state
// ============================================================================

/// Persisted sleep timer slots. `0` means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepTimerState {
    /// Soft timer target (epoch ms); triggers a fade-out when reached
    #[serde(rename = "softTimerTargetMs", default)]
    pub soft_target_ms: i64,
    /// Atomic timer target (epoch ms); display only
    #[serde(rename = "atomicTimerTargetMs", default)]
    pub atomic_target_ms: i64,
}

/// Remaining time on the soft timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    /// Whole seconds left until the soft target
    #[serde(rename = "timeLeft")]
    pub seconds_left: u64,
    /// Whether the soft target is still in the future
    #[serde(rename = "isRunning")]
    pub running: bool,
}

impl TimerStatus {
    /// Status for an unset or elapsed timer.
    pub fn stopped() -> Self {
        Self::default()
    }
}

// ============================================================================
// Engine status
// ============================================================================

/// Point-in-time view of one registered track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    /// Track id
    pub id: String,
    /// Player family
    pub kind: TrackKind,
    /// Last requested volume
    pub volume: f32,
    /// Whether the underlying player reports playback
    pub playing: bool,
}

/// Point-in-time view of the whole session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Whether a session is active (registry non-empty)
    pub active: bool,
    /// Current focus state
    pub focus: FocusState,
    /// Registered tracks, ordered by id
    pub tracks: Vec<TrackSnapshot>,
    /// Soft timer status
    pub timer: TimerStatus,
}

// ============================================================================
// IPC Types
// ============================================================================

/// Parameters for the play command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayParams {
    /// Track id
    #[serde(rename = "soundId")]
    pub sound_id: String,
    /// Resource locator (`synthetic://…`, URL, path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Target volume (defaults to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

/// IPC request from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum IpcRequest {
    /// Pre-acquire focus without activating the session
    Initialize,
    /// Start or retarget a track
    Play {
        /// Play parameters
        #[serde(flatten)]
        params: PlayParams,
    },
    /// Stop one track
    Stop {
        /// Track id
        #[serde(rename = "soundId")]
        sound_id: String,
    },
    /// Stop every track (also cancels the soft timer)
    StopAll,
    /// Fade everything out, then stop
    FadeOut,
    /// Update a track's volume
    SetVolume {
        /// Track id
        #[serde(rename = "soundId")]
        sound_id: String,
        /// New volume
        volume: f32,
    },
    /// Arm or clear the soft timer
    SetSleepTimer {
        /// Target epoch ms (`<= 0` clears)
        #[serde(rename = "targetTimestamp")]
        target_timestamp: i64,
    },
    /// Set or clear the atomic (display) timer
    SetAlarmClock {
        /// Target epoch ms (`<= 0` clears)
        #[serde(rename = "targetTimestamp")]
        target_timestamp: i64,
    },
    /// Read the atomic timer slot
    GetPersistedTimestamp,
    /// Query session and timer status
    Status,
    /// Clear persisted state and stop everything
    ClearAllData,
    /// Host notification that exclusive audio access was lost
    FocusLost {
        /// Whether the loss is transient
        #[serde(default)]
        transient: bool,
    },
}

/// Response data for IPC responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    /// Seconds left on the soft timer
    #[serde(rename = "timeLeft", skip_serializing_if = "Option::is_none")]
    pub time_left: Option<u64>,
    /// Whether the soft timer is running
    #[serde(rename = "isRunning", skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    /// Persisted atomic timer value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    /// Whether a session is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Focus state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    /// Registered tracks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<TrackSnapshot>>,
}

impl ResponseData {
    /// Creates response data from an engine status snapshot.
    pub fn from_engine_status(status: &EngineStatus) -> Self {
        Self {
            time_left: Some(status.timer.seconds_left),
            is_running: Some(status.timer.running),
            value: None,
            active: Some(status.active),
            focus: Some(status.focus.as_str().to_string()),
            tracks: Some(status.tracks.clone()),
        }
    }

    /// Creates response data carrying a persisted timestamp.
    pub fn from_timestamp(value: i64) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Optional response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<ResponseData>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod volume_tests {
        use super::*;

        #[test]
        fn test_clamp_volume() {
            assert_eq!(clamp_volume(0.5), 0.5);
            assert_eq!(clamp_volume(-0.1), 0.0);
            assert_eq!(clamp_volume(1.7), 1.0);
            assert_eq!(clamp_volume(f32::NAN), 0.0);
        }
    }

    mod engine_config_tests {
        use super::*;

        #[test]
        fn test_default_values() {
            let config = EngineConfig::default();
            assert_eq!(config.sample_rate, 44_100);
            assert_eq!(config.block_frames, 1024);
            assert_eq!(config.fade_in_ms, 150);
            assert_eq!(config.fade_in_steps, 20);
            assert_eq!(config.fade_out_ms, 5000);
            assert_eq!(config.fade_out_tick_ms, 100);
            assert_eq!(config.synth_join_timeout_ms, 200);
            assert_eq!(config.fade_out_ticks(), 50);
        }

        #[test]
        fn test_default_is_valid() {
            assert!(EngineConfig::default().validate().is_ok());
        }

        #[test]
        fn test_validate_rejects_zero_fade_steps() {
            let config = EngineConfig::default().with_fade_in(150, 0);
            let err = config.validate().unwrap_err();
            assert!(err.contains("ステップ数"));
        }

        #[test]
        fn test_validate_rejects_tick_longer_than_fade() {
            let config = EngineConfig::default().with_fade_out(50, 100);
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_validate_rejects_sample_rate() {
            let config = EngineConfig {
                sample_rate: 100,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_partial_json_uses_defaults() {
            let config: EngineConfig =
                serde_json::from_str(r#"{"fadeOutMs":1000,"assetRoot":"/opt/sounds"}"#).unwrap();
            assert_eq!(config.fade_out_ms, 1000);
            assert_eq!(config.fade_out_ticks(), 10);
            assert_eq!(config.asset_root, PathBuf::from("/opt/sounds"));
            assert_eq!(config.sample_rate, 44_100);
        }
    }

    mod state_tests {
        use super::*;

        #[test]
        fn test_track_kind_as_str() {
            assert_eq!(TrackKind::File.as_str(), "file");
            assert_eq!(TrackKind::Synthetic.as_str(), "synthetic");
        }

        #[test]
        fn test_focus_state_default() {
            assert_eq!(FocusState::default(), FocusState::Unrequested);
            assert_eq!(FocusState::Lost.as_str(), "lost");
        }

        #[test]
        fn test_sleep_timer_state_serialization() {
            let state = SleepTimerState {
                soft_target_ms: 1_700_000_000_000,
                atomic_target_ms: 0,
            };
            let json = serde_json::to_string(&state).unwrap();
            assert!(json.contains("\"softTimerTargetMs\":1700000000000"));
            assert!(json.contains("\"atomicTimerTargetMs\":0"));
        }

        #[test]
        fn test_sleep_timer_state_missing_fields() {
            let state: SleepTimerState = serde_json::from_str("{}").unwrap();
            assert_eq!(state, SleepTimerState::default());
        }

        #[test]
        fn test_timer_status_serialization() {
            let status = TimerStatus {
                seconds_left: 42,
                running: true,
            };
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, r#"{"timeLeft":42,"isRunning":true}"#);
        }
    }

    mod ipc_request_tests {
        use super::*;

        #[test]
        fn test_play_deserialize() {
            let json = r#"{"command":"play","soundId":"rain","url":"/sounds/rain.mp3","volume":0.4}"#;
            let request: IpcRequest = serde_json::from_str(json).unwrap();
            match request {
                IpcRequest::Play { params } => {
                    assert_eq!(params.sound_id, "rain");
                    assert_eq!(params.url, Some("/sounds/rain.mp3".to_string()));
                    assert_eq!(params.volume, Some(0.4));
                }
                _ => panic!("Expected Play request"),
            }
        }

        #[test]
        fn test_play_without_url() {
            let json = r#"{"command":"play","soundId":"box-fan"}"#;
            let request: IpcRequest = serde_json::from_str(json).unwrap();
            match request {
                IpcRequest::Play { params } => {
                    assert!(params.url.is_none());
                    assert!(params.volume.is_none());
                }
                _ => panic!("Expected Play request"),
            }
        }

        #[test]
        fn test_camel_case_commands() {
            let request: IpcRequest = serde_json::from_str(r#"{"command":"stopAll"}"#).unwrap();
            assert!(matches!(request, IpcRequest::StopAll));

            let request: IpcRequest =
                serde_json::from_str(r#"{"command":"setSleepTimer","targetTimestamp":0}"#).unwrap();
            assert!(matches!(
                request,
                IpcRequest::SetSleepTimer {
                    target_timestamp: 0
                }
            ));

            let request: IpcRequest =
                serde_json::from_str(r#"{"command":"getPersistedTimestamp"}"#).unwrap();
            assert!(matches!(request, IpcRequest::GetPersistedTimestamp));
        }

        #[test]
        fn test_focus_lost_default_not_transient() {
            let request: IpcRequest = serde_json::from_str(r#"{"command":"focusLost"}"#).unwrap();
            assert!(matches!(request, IpcRequest::FocusLost { transient: false }));
        }

        #[test]
        fn test_set_volume_serialize() {
            let request = IpcRequest::SetVolume {
                sound_id: "rain".to_string(),
                volume: 0.5,
            };
            let json = serde_json::to_string(&request).unwrap();
            assert!(json.contains("\"command\":\"setVolume\""));
            assert!(json.contains("\"soundId\":\"rain\""));
        }

        #[test]
        fn test_unknown_command_rejected() {
            let result: Result<IpcRequest, _> = serde_json::from_str(r#"{"command":"dance"}"#);
            assert!(result.is_err());
        }
    }

    mod ipc_response_tests {
        use super::*;

        #[test]
        fn test_success_response() {
            let response = IpcResponse::success("ok", None);
            assert_eq!(response.status, "success");
            let json = serde_json::to_string(&response).unwrap();
            assert!(!json.contains("data"));
        }

        #[test]
        fn test_error_response() {
            let response = IpcResponse::error("failed");
            assert_eq!(response.status, "error");
            assert_eq!(response.message, "failed");
            assert!(response.data.is_none());
        }

        #[test]
        fn test_from_engine_status() {
            let status = EngineStatus {
                active: true,
                focus: FocusState::Granted,
                tracks: vec![TrackSnapshot {
                    id: "pink".to_string(),
                    kind: TrackKind::Synthetic,
                    volume: 0.5,
                    playing: true,
                }],
                timer: TimerStatus {
                    seconds_left: 90,
                    running: true,
                },
            };
            let data = ResponseData::from_engine_status(&status);
            assert_eq!(data.time_left, Some(90));
            assert_eq!(data.is_running, Some(true));
            assert_eq!(data.active, Some(true));
            assert_eq!(data.focus, Some("granted".to_string()));
            assert_eq!(data.tracks.unwrap().len(), 1);
            assert!(data.value.is_none());
        }

        #[test]
        fn test_from_timestamp() {
            let data = ResponseData::from_timestamp(1234);
            let json = serde_json::to_string(&data).unwrap();
            assert_eq!(json, r#"{"value":1234}"#);
        }
    }
}
