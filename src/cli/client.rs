//! IPC client for communicating with the sleep sounds daemon.
//!
//! This module provides:
//! - Unix Domain Socket client
//! - Request/response handling
//! - Connection retry logic with linear back-off
//! - Timeout handling

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::cli::commands::{PlayArgs, TimerArgs};
use crate::daemon::service::default_socket_path;
use crate::daemon::timer::{Clock, SystemClock};
use crate::types::{IpcRequest, IpcResponse, PlayParams};

// ============================================================================
// Constants
// ============================================================================

/// Connection timeout in seconds
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Read/write timeout in seconds (a remote play may take a while to load)
const IO_TIMEOUT_SECS: u64 = 40;

/// Maximum response size in bytes (64KB)
const MAX_RESPONSE_SIZE: u64 = 65536;

/// Maximum connection attempts
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds (base delay, multiplied by attempt number)
const RETRY_DELAY_MS: u64 = 500;

// ============================================================================
// IpcClient
// ============================================================================

/// IPC client for daemon communication.
#[derive(Debug)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    /// Creates a new IPC client with the default socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self> {
        Ok(Self::with_socket_path(default_socket_path()?))
    }

    /// Creates a new IPC client with a custom socket path.
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub async fn initialize(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::Initialize).await
    }

    pub async fn play(&self, args: &PlayArgs) -> Result<IpcResponse> {
        let params = PlayParams {
            sound_id: args.id.clone(),
            url: args.url.clone(),
            volume: Some(args.volume),
        };
        self.send_request_with_retry(&IpcRequest::Play { params })
            .await
    }

    pub async fn stop(&self, id: &str) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::Stop {
            sound_id: id.to_string(),
        })
        .await
    }

    pub async fn stop_all(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::StopAll).await
    }

    pub async fn fade_out(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::FadeOut).await
    }

    pub async fn set_volume(&self, id: &str, volume: f32) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::SetVolume {
            sound_id: id.to_string(),
            volume,
        })
        .await
    }

    /// Sets the sleep timer `minutes` from now, or clears it.
    pub async fn set_sleep_timer(&self, args: &TimerArgs) -> Result<IpcResponse> {
        let target_timestamp = args.target_ms(SystemClock.now_ms());
        self.send_request_with_retry(&IpcRequest::SetSleepTimer { target_timestamp })
            .await
    }

    /// Sets the alarm clock timestamp `minutes` from now, or clears it.
    pub async fn set_alarm_clock(&self, args: &TimerArgs) -> Result<IpcResponse> {
        let target_timestamp = args.target_ms(SystemClock.now_ms());
        self.send_request_with_retry(&IpcRequest::SetAlarmClock { target_timestamp })
            .await
    }

    pub async fn persisted_timestamp(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::GetPersistedTimestamp)
            .await
    }

    pub async fn status(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::Status).await
    }

    pub async fn clear_all_data(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::ClearAllData)
            .await
    }

    pub async fn focus_lost(&self, transient: bool) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::FocusLost { transient })
            .await
    }

    /// Sends a request, retrying transport failures.
    ///
    /// An error response from the daemon is not retried.
    async fn send_request_with_retry(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut attempt = 1;
        let response = loop {
            match self.send_request(request).await {
                Ok(response) => break response,
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!("リクエスト失敗 (試行 {}/{}): {}", attempt, MAX_RETRIES, e);
                    let delay = Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if response.status == "error" {
            anyhow::bail!("{}", response.message);
        }
        Ok(response)
    }

    /// Sends a single request to the daemon.
    async fn send_request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("接続がタイムアウトしました")?
            .context("デーモンに接続できません。'sleepsounds daemon' を起動してください")?;

        let request_json =
            serde_json::to_vec(request).context("リクエストのシリアライズに失敗しました")?;

        timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            stream.write_all(&request_json),
        )
        .await
        .context("書き込みがタイムアウトしました")?
        .context("リクエストの送信に失敗しました")?;

        // Shutdown write side to signal end of request
        stream
            .shutdown()
            .await
            .context("シャットダウンに失敗しました")?;

        let mut buffer = Vec::new();
        let mut limited = (&mut stream).take(MAX_RESPONSE_SIZE);
        timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            limited.read_to_end(&mut buffer),
        )
        .await
        .context("読み込みがタイムアウトしました")?
        .context("レスポンスの受信に失敗しました")?;

        if buffer.is_empty() {
            anyhow::bail!("デーモンからの応答がありませんでした");
        }

        let response: IpcResponse =
            serde_json::from_slice(&buffer).context("レスポンスのパースに失敗しました")?;
        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================
