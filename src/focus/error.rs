//! Audio focus error types.
//!
//! Focus errors never abort the engine: a denied request only means the
//! `play` that triggered it is dropped.

use thiserror::Error;

/// Errors that can occur while requesting exclusive audio output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FocusError {
    /// Another application holds exclusive output and refused to yield.
    #[error("オーディオフォーカスが拒否されました")]
    Denied,

    /// The host audio system failed to process the request.
    #[error("オーディオフォーカスの要求に失敗しました: {0}")]
    HostFailure(String),
}

impl FocusError {
    /// Returns true if the host explicitly refused focus.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied)
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Denied => "他のアプリの再生を停止してから再度お試しください",
            Self::HostFailure(_) => "オーディオ設定を確認し、デーモンを再起動してください",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert!(FocusError::Denied.to_string().contains("拒否"));
        let err = FocusError::HostFailure("busy".to_string());
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn test_is_denied() {
        assert!(FocusError::Denied.is_denied());
        assert!(!FocusError::HostFailure("x".into()).is_denied());
    }

    #[test]
    fn test_suggestion() {
        assert!(FocusError::Denied.suggestion().contains("他のアプリ"));
        assert!(FocusError::HostFailure("x".into())
            .suggestion()
            .contains("デーモン"));
    }
}
