//! Command definitions for the sleep sounds CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

// ============================================================================
// CLI Structure
// ============================================================================

/// Sleep sounds CLI - ambient sound mixer with a sleep timer
#[derive(Parser, Debug)]
#[command(
    name = "sleepsounds",
    version,
    about = "環境音ミキサーとスリープタイマー",
    long_about = "ループ音源と合成ノイズを重ねて再生し、スリープタイマーで自動的にフェードアウトします。\n\
                  再生はバックグラウンドのデーモンが担当し、各コマンドはソケット経由で指示を送ります。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Daemon socket path (defaults to ~/.sleepsounds/sleepsounds.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Acquire audio output ahead of playback
    Init,

    /// Start a sound, or change its volume if already playing
    Play(PlayArgs),

    /// Stop one sound
    Stop {
        /// Sound id
        #[arg(value_parser = validate_sound_id)]
        id: String,
    },

    /// Stop every sound and cancel the sleep timer
    StopAll,

    /// Fade every sound out, then stop
    FadeOut,

    /// Change the volume of a playing sound
    Volume {
        /// Sound id
        #[arg(value_parser = validate_sound_id)]
        id: String,

        /// Volume (0.0-1.0)
        #[arg(value_parser = validate_volume)]
        volume: f32,
    },

    /// Set or clear the sleep timer (fades out when it expires)
    Timer(TimerArgs),

    /// Set or clear the alarm clock timestamp
    Alarm(TimerArgs),

    /// Show the stored alarm clock timestamp
    AlarmTarget,

    /// Show the current session status
    Status,

    /// Stop everything and erase stored timers
    ClearData,

    /// Run as daemon (background service)
    Daemon(DaemonArgs),

    /// Report that audio output was taken by another application
    #[command(hide = true)]
    FocusLost {
        /// The loss is expected to be temporary
        #[arg(long)]
        transient: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Arguments
// ============================================================================

/// Arguments for the play command
#[derive(Args, Debug, Clone)]
pub struct PlayArgs {
    /// Sound id (e.g. rain, white-noise, box-fan)
    #[arg(value_parser = validate_sound_id)]
    pub id: String,

    /// Resource: synthetic://<flavor>, http(s) URL, or asset path
    #[arg(short, long)]
    pub url: Option<String>,

    /// Volume (0.0-1.0)
    #[arg(long, default_value = "1.0", value_parser = validate_volume)]
    pub volume: f32,
}

/// Arguments for the timer and alarm commands
#[derive(Args, Debug, Clone, PartialEq, Eq)]
#[command(group(ArgGroup::new("target").required(true).args(["minutes", "clear"])))]
pub struct TimerArgs {
    /// Minutes from now (1-720)
    #[arg(value_parser = clap::value_parser!(u32).range(1..=720))]
    pub minutes: Option<u32>,

    /// Clear the timer
    #[arg(long)]
    pub clear: bool,
}

impl TimerArgs {
    /// Absolute target in epoch ms, or `0` to clear.
    pub fn target_ms(&self, now_ms: i64) -> i64 {
        match (self.clear, self.minutes) {
            (false, Some(minutes)) => now_ms + i64::from(minutes) * 60_000,
            _ => 0,
        }
    }
}

/// Arguments for the daemon command
#[derive(Args, Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Engine configuration file (JSON)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validates a sound id.
///
/// - Must not be empty
/// - Must not exceed 100 characters
fn validate_sound_id(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        return Err("サウンドIDは空にできません".to_string());
    }
    if s.chars().count() > 100 {
        return Err("サウンドIDは100文字以内にしてください".to_string());
    }
    Ok(s.to_string())
}

/// Validates a volume in `[0, 1]`.
fn validate_volume(s: &str) -> Result<f32, String> {
    let volume: f32 = s
        .parse()
        .map_err(|_| format!("音量は数値で指定してください: {}", s))?;
    if !(0.0..=1.0).contains(&volume) {
        return Err("音量は0.0-1.0の範囲で指定してください".to_string());
    }
    Ok(volume)
}

// ============================================================================
// Tests
// ============================================================================
