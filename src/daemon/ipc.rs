//! IPC server for the sleep sounds daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - One JSON request and one JSON response per connection
//! - `RequestHandler`, which turns requests into `SessionHandle` calls

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::types::{IpcRequest, IpcResponse, PlayParams, ResponseData};

use super::processor::{CommandError, SessionHandle};
use super::session::PlayOutcome;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request size in bytes (4KB)
const MAX_REQUEST_SIZE: usize = 4096;

/// Read timeout in seconds
const READ_TIMEOUT_SECS: u64 = 5;

/// Volume used when a play request omits one
const DEFAULT_PLAY_VOLUME: f32 = 1.0;

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Read error
    #[error("Failed to read request: {0}")]
    ReadError(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Request too large
    #[error("Request too large (max {MAX_REQUEST_SIZE} bytes)")]
    RequestTooLarge,

    /// Client closed the connection without sending anything
    #[error("Connection closed by client")]
    Closed,
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a new IPC server bound to the specified socket path.
    ///
    /// A stale socket file is removed and the parent directory created.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accepts an incoming client connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be accepted.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        Ok(stream)
    }

    /// Reads one request until EOF, the size limit or the read timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if reading times out, the request exceeds
    /// `MAX_REQUEST_SIZE`, or the body is not a valid request.
    pub async fn receive_request(stream: &mut UnixStream) -> Result<IpcRequest> {
        let mut buffer = Vec::with_capacity(512);
        let mut limited = (&mut *stream).take(MAX_REQUEST_SIZE as u64 + 1);

        let read_result = timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            read_request_body(&mut limited, &mut buffer),
        )
        .await;

        match read_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string()).into()),
            Err(_) => return Err(IpcError::Timeout.into()),
        }

        if buffer.is_empty() {
            return Err(IpcError::Closed.into());
        }
        if buffer.len() > MAX_REQUEST_SIZE {
            return Err(IpcError::RequestTooLarge.into());
        }

        let request: IpcRequest = serde_json::from_slice(&buffer)
            .with_context(|| "Failed to deserialize IPC request")?;

        Ok(request)
    }

    /// Serializes and sends an IPC response to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
        let json = serde_json::to_vec(response).context("Failed to serialize IPC response")?;

        stream
            .write_all(&json)
            .await
            .context("Failed to write response")?;
        stream.flush().await.context("Failed to flush response")?;

        Ok(())
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Reads until EOF or until a complete JSON value has arrived, so clients
/// that keep the write half open are still served.
async fn read_request_body<R>(reader: &mut R, buffer: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if serde_json::from_slice::<serde_json::Value>(buffer).is_ok() {
            return Ok(());
        }
    }
}

/// Serves one connection: read a request, dispatch it, write the response.
pub async fn serve_connection(mut stream: UnixStream, handler: RequestHandler) {
    let response = match IpcServer::receive_request(&mut stream).await {
        Ok(request) => handler.handle(request).await,
        Err(e) => {
            warn!("Invalid IPC request: {:#}", e);
            IpcResponse::error(format!("不正なリクエストです: {}", e))
        }
    };
    if let Err(e) = IpcServer::send_response(&mut stream, &response).await {
        debug!("Failed to send IPC response: {:#}", e);
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Handles IPC requests by dispatching to the session command context.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    session: SessionHandle,
}

impl RequestHandler {
    /// Creates a new request handler for the given session.
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Handles an IPC request and returns the appropriate response.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        let result = match request {
            IpcRequest::Initialize => self.handle_initialize().await,
            IpcRequest::Play { params } => self.handle_play(params).await,
            IpcRequest::Stop { sound_id } => self.handle_stop(&sound_id).await,
            IpcRequest::StopAll => self.handle_stop_all().await,
            IpcRequest::FadeOut => self.handle_fade_out().await,
            IpcRequest::SetVolume { sound_id, volume } => {
                self.handle_set_volume(&sound_id, volume).await
            }
            IpcRequest::SetSleepTimer { target_timestamp } => {
                self.handle_sleep_timer(target_timestamp).await
            }
            IpcRequest::SetAlarmClock { target_timestamp } => {
                self.handle_alarm_clock(target_timestamp).await
            }
            IpcRequest::GetPersistedTimestamp => self.handle_persisted_timestamp().await,
            IpcRequest::Status => self.handle_status().await,
            IpcRequest::ClearAllData => self.handle_clear_all_data().await,
            IpcRequest::FocusLost { transient } => Ok(self.handle_focus_lost(transient)),
        };
        result.unwrap_or_else(|e| IpcResponse::error(e.to_string()))
    }

    async fn status_data(&self) -> Result<Option<ResponseData>, CommandError> {
        let status = self.session.status().await?;
        Ok(Some(ResponseData::from_engine_status(&status)))
    }

    async fn handle_initialize(&self) -> Result<IpcResponse, CommandError> {
        if self.session.initialize().await? {
            Ok(IpcResponse::success(
                "オーディオ出力を確保しました",
                self.status_data().await?,
            ))
        } else {
            Ok(IpcResponse::error("オーディオ出力を確保できませんでした"))
        }
    }

    async fn handle_play(&self, params: PlayParams) -> Result<IpcResponse, CommandError> {
        let volume = params.volume.unwrap_or(DEFAULT_PLAY_VOLUME);
        let outcome = self
            .session
            .play(&params.sound_id, params.url.as_deref(), volume)
            .await?;

        let response = match outcome {
            PlayOutcome::Started => IpcResponse::success(
                format!("再生を開始しました: {}", params.sound_id),
                self.status_data().await?,
            ),
            PlayOutcome::Retargeted => IpcResponse::success(
                format!("音量を更新しました: {}", params.sound_id),
                self.status_data().await?,
            ),
            PlayOutcome::FocusDenied => {
                IpcResponse::error("オーディオ出力を確保できなかったため再生できません")
            }
            PlayOutcome::ResourceUnavailable => {
                IpcResponse::error(format!("サウンドを読み込めませんでした: {}", params.sound_id))
            }
            PlayOutcome::Ignored => IpcResponse::error("サウンドIDを指定してください"),
        };
        Ok(response)
    }

    async fn handle_stop(&self, sound_id: &str) -> Result<IpcResponse, CommandError> {
        let message = if self.session.stop(sound_id).await? {
            format!("停止しました: {}", sound_id)
        } else {
            format!("再生されていません: {}", sound_id)
        };
        Ok(IpcResponse::success(message, self.status_data().await?))
    }

    /// An explicit stop-all from the caller also cancels the soft timer.
    async fn handle_stop_all(&self) -> Result<IpcResponse, CommandError> {
        self.session.stop_all().await?;
        if let Err(e) = self.session.set_soft_timer(0).await {
            warn!("Failed to clear sleep timer on stop-all: {}", e);
        }
        Ok(IpcResponse::success(
            "すべてのサウンドを停止しました",
            self.status_data().await?,
        ))
    }

    async fn handle_fade_out(&self) -> Result<IpcResponse, CommandError> {
        self.session.fade_out_and_stop().await?;
        Ok(IpcResponse::success(
            "フェードアウトを開始しました",
            self.status_data().await?,
        ))
    }

    async fn handle_set_volume(
        &self,
        sound_id: &str,
        volume: f32,
    ) -> Result<IpcResponse, CommandError> {
        let message = if self.session.set_volume(sound_id, volume).await? {
            format!("音量を変更しました: {}", sound_id)
        } else {
            format!("再生されていません: {}", sound_id)
        };
        Ok(IpcResponse::success(message, self.status_data().await?))
    }

    async fn handle_sleep_timer(&self, target: i64) -> Result<IpcResponse, CommandError> {
        self.session.set_soft_timer(target).await?;
        let remaining = self.session.remaining().await?;
        let message = if target <= 0 {
            "スリープタイマーを解除しました"
        } else {
            "スリープタイマーを設定しました"
        };
        Ok(IpcResponse::success(
            message,
            Some(ResponseData {
                time_left: Some(remaining.seconds_left),
                is_running: Some(remaining.running),
                ..ResponseData::default()
            }),
        ))
    }

    async fn handle_alarm_clock(&self, target: i64) -> Result<IpcResponse, CommandError> {
        self.session.set_atomic_timer(target).await?;
        let message = if target <= 0 {
            "アラームを解除しました"
        } else {
            "アラームを設定しました"
        };
        Ok(IpcResponse::success(
            message,
            Some(ResponseData::from_timestamp(target.max(0))),
        ))
    }

    async fn handle_persisted_timestamp(&self) -> Result<IpcResponse, CommandError> {
        let value = self.session.persisted_timestamp().await?;
        Ok(IpcResponse::success("", Some(ResponseData::from_timestamp(value))))
    }

    async fn handle_status(&self) -> Result<IpcResponse, CommandError> {
        Ok(IpcResponse::success("", self.status_data().await?))
    }

    async fn handle_clear_all_data(&self) -> Result<IpcResponse, CommandError> {
        self.session.clear_all_data().await?;
        Ok(IpcResponse::success(
            "保存データを消去しました",
            self.status_data().await?,
        ))
    }

    fn handle_focus_lost(&self, transient: bool) -> IpcResponse {
        if self.session.focus_lost(transient) {
            IpcResponse::success("オーディオ出力の喪失を通知しました", None)
        } else {
            IpcResponse::error(CommandError::SessionClosed.to_string())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
