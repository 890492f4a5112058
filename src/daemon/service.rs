//! Daemon entry point: wires the real host collaborators together.
//!
//! Runs the command processor, the IPC accept loop and a session notice
//! logger on the current runtime until Ctrl-C, then stops everything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::ipc::{serve_connection, IpcServer, RequestHandler};
use super::lifecycle::SessionEvent;
use super::processor::SessionBuilder;
use super::timer::JsonTimerStore;
use crate::sound::{AudioBackend, RodioBackend};
use crate::types::EngineConfig;

/// Data directory under the home directory.
pub const DATA_DIR_NAME: &str = ".sleepsounds";

/// Socket file name inside the data directory.
pub const SOCKET_FILE_NAME: &str = "sleepsounds.sock";

/// Persisted timer file name inside the data directory.
pub const TIMER_FILE_NAME: &str = "timers.json";

/// Overrides the data directory (mainly for tests).
pub const DATA_DIR_ENV: &str = "SLEEPSOUNDS_HOME";

/// Returns the data directory (`$SLEEPSOUNDS_HOME` or `~/.sleepsounds`).
///
/// # Errors
///
/// Returns an error if no home directory can be determined.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("ホームディレクトリが見つかりません")?;
    Ok(home.join(DATA_DIR_NAME))
}

/// Returns the default IPC socket path.
///
/// # Errors
///
/// Returns an error if no home directory can be determined.
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(SOCKET_FILE_NAME))
}

/// Loads and validates an engine configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("設定ファイルを読み込めません: {:?}", path))?;
    let config: EngineConfig = serde_json::from_str(&text)
        .with_context(|| format!("設定ファイルの形式が不正です: {:?}", path))?;
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

/// Options for `run_daemon`.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Engine configuration file
    pub config_path: Option<PathBuf>,
    /// Socket path override
    pub socket_path: Option<PathBuf>,
}

/// Runs the daemon until Ctrl-C.
///
/// # Errors
///
/// Returns an error if configuration, the audio device or the socket
/// cannot be set up.
pub async fn run_daemon(options: DaemonOptions) -> Result<()> {
    let config = match &options.config_path {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    let data_dir = data_dir()?;
    let socket_path = match options.socket_path {
        Some(path) => path,
        None => data_dir.join(SOCKET_FILE_NAME),
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("データディレクトリを作成できません: {:?}", data_dir))?;

    let backend: Arc<dyn AudioBackend> =
        Arc::new(RodioBackend::new().context("オーディオデバイスを初期化できません")?);
    let session = SessionBuilder::new(config, backend)
        .timer_store(Box::new(JsonTimerStore::new(data_dir.join(TIMER_FILE_NAME))))
        .build();

    let server = IpcServer::new(&socket_path)?;
    let handler = RequestHandler::new(session.handle.clone());
    let processor = tokio::spawn(session.processor.run());
    tokio::spawn(log_session_events(session.events));
    info!("Daemon listening on {:?}", server.socket_path());

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    tokio::spawn(serve_connection(stream, handler.clone()));
                }
                Err(e) => warn!("{:#}", e),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    session.handle.shutdown();
    processor.await.context("コマンド処理タスクが異常終了しました")?;
    Ok(())
}

/// Relays session notices to the log.
pub async fn log_session_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::SessionActivated => info!("Session active"),
            SessionEvent::SessionTerminated => info!("Session ended"),
            SessionEvent::TrackTerminated { id } => info!("Track ended: {}", id),
        }
    }
}
