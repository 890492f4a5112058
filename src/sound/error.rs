//! Sound system error types.
//!
//! Errors raised while opening, decoding or driving an audio resource.
//! Most of them never leave the engine: a track whose resource cannot be
//! prepared is simply not registered, and teardown failures are logged and
//! skipped.

use thiserror::Error;

/// Errors that can occur in the sound playback system.
#[derive(Debug, Error)]
pub enum SoundError {
    /// Audio device is not available (e.g., no speakers connected).
    #[error("オーディオデバイスが利用できません: {0}")]
    DeviceNotAvailable(String),

    /// Sound file was not found at the specified path.
    #[error("サウンドファイルが見つかりません: {0}")]
    FileNotFound(String),

    /// Failed to decode the audio file.
    #[error("サウンドファイルのデコードに失敗しました: {0}")]
    DecodeError(String),

    /// Failed to create or drive the audio output stream.
    #[error("オーディオストリームの操作に失敗しました: {0}")]
    StreamError(String),

    /// The resource locator is empty or escapes the asset directory.
    #[error("無効なリソースパスです: {0}")]
    InvalidPath(String),

    /// Fetching a remote resource failed.
    #[error("リモートリソースの取得に失敗しました: {0}")]
    RemoteFetch(String),

    /// Generic sound playback error.
    #[error("サウンド再生エラー: {0}")]
    PlaybackError(String),
}

impl SoundError {
    /// Returns true if this error is related to device availability.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceNotAvailable(_) | Self::StreamError(_))
    }

    /// Returns true if this error means the resource itself is unusable.
    #[must_use]
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_) | Self::DecodeError(_) | Self::InvalidPath(_) | Self::RemoteFetch(_)
        )
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::DeviceNotAvailable(_) => "オーディオデバイスを接続してください",
            Self::FileNotFound(_) => "アセットディレクトリの設定を確認してください",
            Self::DecodeError(_) => "サウンドファイルが破損している可能性があります",
            Self::StreamError(_) => "オーディオ設定を確認してください",
            Self::InvalidPath(_) => "アセットディレクトリ内のパスを指定してください",
            Self::RemoteFetch(_) => "ネットワーク接続を確認してください",
            Self::PlaybackError(_) => "デーモンを再起動してください",
        }
    }
}
