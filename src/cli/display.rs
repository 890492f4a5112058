//! Display utilities for the sleep sounds CLI.
//!
//! This module provides formatted output for:
//! - Success messages
//! - Error messages
//! - Session status (tracks, focus, sleep timer)
//! - Timer information

use crate::types::{IpcResponse, ResponseData, TrackKind};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows the daemon's message for a command that changed something.
    pub fn show_success(response: &IpcResponse) {
        if response.message.is_empty() {
            println!("* 完了しました");
        } else {
            println!("* {}", response.message);
        }
    }

    /// Shows the result of a play or volume command.
    pub fn show_play_success(response: &IpcResponse) {
        Self::show_success(response);
        if let Some(tracks) = response.data.as_ref().and_then(|d| d.tracks.as_ref()) {
            println!("  再生中: {}件", tracks.len());
        }
    }

    /// Shows the result of a timer command.
    pub fn show_timer(response: &IpcResponse) {
        Self::show_success(response);
        if let Some(line) = response.data.as_ref().and_then(Self::timer_line) {
            println!("  {}", line);
        }
    }

    /// Shows the stored alarm clock target.
    pub fn show_alarm_target(response: &IpcResponse, now_ms: i64) {
        let value = response.data.as_ref().and_then(|d| d.value).unwrap_or(0);
        println!("{}", Self::alarm_line(value, now_ms));
    }

    /// Shows the current session status.
    pub fn show_status(response: &IpcResponse) {
        println!("{}", Self::render_status(response.data.as_ref()));
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    fn render_status(data: Option<&ResponseData>) -> String {
        let Some(data) = data else {
            return "デーモンから状態を取得できませんでした".to_string();
        };

        let mut lines = vec![
            "サウンドセッション ステータス".to_string(),
            "─────────────────────────────".to_string(),
        ];

        let state = if data.active == Some(true) {
            "再生中"
        } else {
            "停止中"
        };
        lines.push(format!("状態: {}", state));

        let focus = match data.focus.as_deref() {
            Some("granted") => "確保済み",
            Some("lost") => "他のアプリに奪われました",
            Some("unrequested") | None => "未確保",
            Some(other) => other,
        };
        lines.push(format!("オーディオ出力: {}", focus));

        match data.tracks.as_deref() {
            Some(tracks) if !tracks.is_empty() => {
                lines.push("サウンド:".to_string());
                for track in tracks {
                    let kind = match track.kind {
                        TrackKind::File => "ループ",
                        TrackKind::Synthetic => "ノイズ",
                    };
                    lines.push(format!(
                        "  {} [{}] 音量 {}%{}",
                        track.id,
                        kind,
                        (track.volume * 100.0).round() as u32,
                        if track.playing { "" } else { " (停止)" }
                    ));
                }
            }
            _ => lines.push("サウンド: なし".to_string()),
        }

        lines.push(Self::timer_line(data).unwrap_or_else(|| "スリープタイマー: なし".to_string()));
        lines.join("\n")
    }

    fn timer_line(data: &ResponseData) -> Option<String> {
        match (data.is_running, data.time_left) {
            (Some(true), Some(seconds)) => {
                let (hours, minutes, seconds) = Self::format_time(seconds);
                Some(format!(
                    "スリープタイマー: 残り {}:{:02}:{:02}",
                    hours, minutes, seconds
                ))
            }
            (Some(false), _) => Some("スリープタイマー: なし".to_string()),
            _ => None,
        }
    }

    fn alarm_line(value: i64, now_ms: i64) -> String {
        if value <= 0 {
            return "アラームは設定されていません".to_string();
        }
        if value <= now_ms {
            return "アラームの時刻を過ぎています".to_string();
        }
        let (hours, minutes, seconds) = Self::format_time(((value - now_ms) / 1000) as u64);
        format!("アラーム: 残り {}:{:02}:{:02}", hours, minutes, seconds)
    }

    /// Formats seconds as (hours, minutes, seconds).
    fn format_time(total_seconds: u64) -> (u64, u64, u64) {
        (
            total_seconds / 3600,
            (total_seconds % 3600) / 60,
            total_seconds % 60,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
