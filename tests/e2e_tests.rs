//! End-to-End Tests for the Sleep Sounds CLI.
//!
//! These tests drive complete user workflows through the IPC client
//! against a daemon-shaped accept loop:
//! - TC-E-001: A night with a sleep timer (play, fade-in, timer, fade-out)
//! - TC-E-002: Exclusive output lost to another app
//! - TC-E-003: Clearing stored data
//! - TC-E-004: Sleep timer survives a daemon restart
//! - TC-E-005: Stopping one sound during a fade-out
//! - TC-E-006: Rapid play/stop cycles

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use sleepsounds::cli::client::IpcClient;
use sleepsounds::cli::commands::{PlayArgs, TimerArgs};
use sleepsounds::daemon::ipc::{serve_connection, IpcServer, RequestHandler};
use sleepsounds::daemon::timer::{
    Clock, JsonTimerStore, MockAlarmScheduler, SystemClock, TimerStore,
};
use sleepsounds::daemon::{SessionBuilder, SessionEvent, SessionHandle};
use sleepsounds::focus::MockFocusHost;
use sleepsounds::sound::MockBackend;
use sleepsounds::types::{EngineConfig, SleepTimerState};

// ============================================================================
// Test Helpers
// ============================================================================

/// Creates a temporary directory that outlives the test.
fn create_temp_dir() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    std::mem::forget(dir);
    path
}

/// Creates a fast configuration so fades finish within a test.
fn create_fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_fade_in(20, 4)
        .with_fade_out(100, 10)
        .with_asset_root("/opt/app")
}

/// A configuration with a fade-out long enough to interrupt.
fn create_slow_fade_out_config() -> EngineConfig {
    create_fast_config().with_fade_out(2_000, 50)
}

/// Daemon-shaped test fixture: session engine plus IPC accept loop.
struct TestDaemon {
    handle: SessionHandle,
    backend: MockBackend,
    focus: MockFocusHost,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    processor: JoinHandle<()>,
    server: JoinHandle<()>,
    socket_path: PathBuf,
}

/// Optional host overrides for `start_daemon`.
#[derive(Default)]
struct DaemonSetup {
    timer_file: Option<PathBuf>,
    alarms: Option<MockAlarmScheduler>,
}

impl TestDaemon {
    fn client(&self) -> IpcClient {
        IpcClient::with_socket_path(self.socket_path.clone())
    }

    fn events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn stop(self) {
        self.server.abort();
        // Wait for the listener to drop so its socket file is gone.
        let _ = self.server.await;
        self.handle.shutdown();
        let _ = timeout(Duration::from_secs(2), self.processor).await;
    }
}

/// Starts a session engine and serves connections the way the daemon does.
async fn start_daemon(dir: &Path, config: EngineConfig, setup: DaemonSetup) -> TestDaemon {
    let backend = MockBackend::new();
    let focus = MockFocusHost::new();

    let mut builder = SessionBuilder::new(config, Arc::new(backend.clone()))
        .focus_host(Box::new(focus.clone()));
    if let Some(path) = setup.timer_file {
        builder = builder.timer_store(Box::new(JsonTimerStore::new(path)));
    }
    if let Some(alarms) = setup.alarms {
        builder = builder.alarm_scheduler(Box::new(alarms));
    }
    let session = builder.build();

    let socket_path = dir.join("e2e.sock");
    let server = IpcServer::new(&socket_path).unwrap();
    let handler = RequestHandler::new(session.handle.clone());
    let server = tokio::spawn(async move {
        while let Ok(stream) = server.accept().await {
            tokio::spawn(serve_connection(stream, handler.clone()));
        }
    });
    let processor = tokio::spawn(session.processor.run());

    // Small delay for server to be ready
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestDaemon {
        handle: session.handle,
        backend,
        focus,
        events: session.events,
        processor,
        server,
        socket_path,
    }
}

fn play_args(id: &str, url: Option<&str>, volume: f32) -> PlayArgs {
    PlayArgs {
        id: id.to_string(),
        url: url.map(str::to_string),
        volume,
    }
}

fn minutes(minutes: u32) -> TimerArgs {
    TimerArgs {
        minutes: Some(minutes),
        clear: false,
    }
}

// ============================================================================
// TC-E-001: A Night with a Sleep Timer
// ============================================================================

/// TC-E-001: スリープタイマー付きの再生
///
/// 前提条件: Daemon起動中
/// テスト手順:
/// 1. `sleepsounds play rain --url /sounds/rain.mp3 --volume 0.7`
/// 2. `sleepsounds play pink-noise --volume 0.4`
/// 3. フェードイン完了を待機
/// 4. スリープタイマーを短い時刻に設定し、発火を待機
/// 期待結果: フェードアウト後にすべて停止し、セッション終了が通知される
#[tokio::test]
async fn tc_e_001_sleep_timer_night() {
    let dir = create_temp_dir();
    let mut daemon = start_daemon(&dir, create_fast_config(), DaemonSetup::default()).await;
    let client = daemon.client();

    // Step 1-2: Start two sounds
    let response = client
        .play(&play_args("rain", Some("/sounds/rain.mp3"), 0.7))
        .await
        .unwrap();
    assert_eq!(response.message, "再生を開始しました: rain");
    client
        .play(&play_args("pink-noise", None, 0.4))
        .await
        .unwrap();
    assert_eq!(daemon.events(), vec![SessionEvent::SessionActivated]);

    // Step 3: Fade-in reaches the requested volumes
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!((daemon.backend.media()[0].volume() - 0.7).abs() < 1e-6);
    assert!((daemon.backend.streams()[0].volume() - 0.4).abs() < 1e-6);

    // Step 4: Arm the timer just ahead of now; the tokio alarm fires it
    let target = SystemClock.now_ms() + 150;
    daemon.handle.set_soft_timer(target).await.unwrap();
    let status = client.status().await.unwrap().data.unwrap();
    assert_eq!(status.is_running, Some(true));

    tokio::time::sleep(Duration::from_millis(700)).await;

    let status = client.status().await.unwrap().data.unwrap();
    assert_eq!(status.active, Some(false));
    assert_eq!(status.is_running, Some(false));
    assert!(status.tracks.unwrap().is_empty());
    assert_eq!(daemon.backend.live_media(), 0);
    assert_eq!(daemon.backend.live_streams(), 0);

    let events = daemon.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last(), Some(&SessionEvent::SessionTerminated));
    assert_eq!(daemon.focus.abandon_count(), 1);

    daemon.stop().await;
}

/// TC-E-001 variant: A timer firing with nothing playing is ignored
#[tokio::test]
async fn tc_e_001_timer_fire_while_idle() {
    let dir = create_temp_dir();
    let mut daemon = start_daemon(&dir, create_fast_config(), DaemonSetup::default()).await;

    assert!(daemon.handle.timer_fired());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = daemon.client().status().await.unwrap().data.unwrap();
    assert_eq!(status.active, Some(false));
    assert!(daemon.events().is_empty());
    assert_eq!(daemon.focus.request_count(), 0);

    daemon.stop().await;
}

// ============================================================================
// TC-E-002: Exclusive Output Lost
// ============================================================================

/// TC-E-002: 他のアプリにオーディオ出力を奪われる
///
/// 前提条件: Daemon起動中、サウンド再生中
/// テスト手順:
/// 1. `sleepsounds focus-lost --transient`
/// 2. `sleepsounds status`
/// 3. `sleepsounds play rain`
/// 期待結果: 即座に全停止し、再度の再生でオーディオ出力を取り直す
#[tokio::test]
async fn tc_e_002_focus_lost_flow() {
    let dir = create_temp_dir();
    let mut daemon = start_daemon(&dir, create_fast_config(), DaemonSetup::default()).await;
    let client = daemon.client();

    client
        .play(&play_args("rain", Some("/sounds/rain.mp3"), 1.0))
        .await
        .unwrap();
    client
        .play(&play_args("box-fan", None, 1.0))
        .await
        .unwrap();

    // Step 1
    let response = client.focus_lost(true).await.unwrap();
    assert_eq!(response.status, "success");

    // Step 2
    let data = client.status().await.unwrap().data.unwrap();
    assert_eq!(data.active, Some(false));
    assert_eq!(data.focus.as_deref(), Some("lost"));
    assert_eq!(daemon.backend.live_media(), 0);
    assert_eq!(daemon.backend.live_streams(), 0);

    let events = daemon.events();
    assert!(events.contains(&SessionEvent::SessionTerminated));

    // A second loss notice changes nothing
    client.focus_lost(false).await.unwrap();
    assert!(daemon.events().is_empty());

    // Step 3
    let response = client
        .play(&play_args("rain", Some("/sounds/rain.mp3"), 1.0))
        .await
        .unwrap();
    let data = response.data.unwrap();
    assert_eq!(data.focus.as_deref(), Some("granted"));
    assert_eq!(data.active, Some(true));
    assert_eq!(daemon.focus.request_count(), 3);

    daemon.stop().await;
}

// ============================================================================
// TC-E-003: Clearing Stored Data
// ============================================================================

/// TC-E-003: 保存データの消去
///
/// 前提条件: Daemon起動中、タイマーとアラームを設定済み、サウンド再生中
/// テスト手順:
/// 1. `sleepsounds clear-data`
/// 期待結果: 再生が停止し、保存ファイルの両スロットが 0 になる
#[tokio::test]
async fn tc_e_003_clear_data_flow() {
    let dir = create_temp_dir();
    let timer_file = dir.join("timers.json");
    let alarms = MockAlarmScheduler::new();
    let daemon = start_daemon(
        &dir,
        create_fast_config(),
        DaemonSetup {
            timer_file: Some(timer_file.clone()),
            alarms: Some(alarms.clone()),
        },
    )
    .await;
    let client = daemon.client();

    client
        .play(&play_args("waves", Some("/sounds/waves.mp3"), 1.0))
        .await
        .unwrap();
    client.set_sleep_timer(&minutes(45)).await.unwrap();
    client.set_alarm_clock(&minutes(480)).await.unwrap();

    let stored = JsonTimerStore::new(&timer_file).load().unwrap();
    assert!(stored.soft_target_ms > 0);
    assert!(stored.atomic_target_ms > 0);
    assert!(alarms.armed().is_some());

    // Step 1
    let response = client.clear_all_data().await.unwrap();
    assert_eq!(response.message, "保存データを消去しました");
    let data = response.data.unwrap();
    assert_eq!(data.active, Some(false));
    assert_eq!(data.is_running, Some(false));

    let stored = JsonTimerStore::new(&timer_file).load().unwrap();
    assert_eq!(stored, SleepTimerState::default());
    assert_eq!(alarms.armed(), None);
    assert_eq!(daemon.backend.live_media(), 0);

    let response = client.persisted_timestamp().await.unwrap();
    assert_eq!(response.data.unwrap().value, Some(0));

    daemon.stop().await;
}

// ============================================================================
// TC-E-004: Restart Restore
// ============================================================================

/// TC-E-004: デーモン再起動後のタイマー復元
///
/// 前提条件: 永続化ファイルを共有する 2 回のデーモン起動
/// テスト手順:
/// 1. 1回目のデーモンで `timer 30` と `alarm 420` を設定して終了
/// 2. 2回目のデーモンを起動し `status` と `alarm-target` を確認
/// 期待結果: ソフトタイマーが再設定され、アラーム時刻も読み出せる
#[tokio::test]
async fn tc_e_004_timer_restored_after_restart() {
    let dir = create_temp_dir();
    let timer_file = dir.join("timers.json");

    // Step 1
    let first_alarms = MockAlarmScheduler::new();
    let first = start_daemon(
        &dir,
        create_fast_config(),
        DaemonSetup {
            timer_file: Some(timer_file.clone()),
            alarms: Some(first_alarms.clone()),
        },
    )
    .await;
    first.client().set_sleep_timer(&minutes(30)).await.unwrap();
    let alarm = first
        .client()
        .set_alarm_clock(&minutes(420))
        .await
        .unwrap()
        .data
        .unwrap()
        .value
        .unwrap();
    let soft_target = first_alarms.armed().unwrap();
    first.stop().await;

    // Step 2
    let second_alarms = MockAlarmScheduler::new();
    let second = start_daemon(
        &dir,
        create_fast_config(),
        DaemonSetup {
            timer_file: Some(timer_file),
            alarms: Some(second_alarms.clone()),
        },
    )
    .await;
    let client = second.client();

    let data = client.status().await.unwrap().data.unwrap();
    assert_eq!(data.is_running, Some(true));
    assert!(data.time_left.unwrap() > 1_700);
    assert_eq!(second_alarms.armed(), Some(soft_target));

    let response = client.persisted_timestamp().await.unwrap();
    assert_eq!(response.data.unwrap().value, Some(alarm));

    second.stop().await;
}

// ============================================================================
// TC-E-005: Stop One Sound During a Fade-out
// ============================================================================

/// TC-E-005: フェードアウト中に1つだけ停止
///
/// 前提条件: 2つのサウンドを再生中、長めのフェードアウト
/// テスト手順:
/// 1. `sleepsounds fade-out`
/// 2. フェードアウト途中で `sleepsounds stop rain`
/// 期待結果: フェードアウトは取り消され、残りのサウンドは要求音量に戻る
#[tokio::test]
async fn tc_e_005_stop_during_fade_out() {
    let dir = create_temp_dir();
    let daemon = start_daemon(&dir, create_slow_fade_out_config(), DaemonSetup::default()).await;
    let client = daemon.client();

    client
        .play(&play_args("rain", Some("/sounds/rain.mp3"), 1.0))
        .await
        .unwrap();
    client
        .play(&play_args("waves", Some("/sounds/waves.mp3"), 0.6))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // Step 1
    client.fade_out().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let waves = daemon.backend.media()[1].clone();
    assert!(waves.volume() < 0.6);

    // Step 2
    let response = client.stop("rain").await.unwrap();
    let data = response.data.unwrap();
    assert_eq!(data.active, Some(true));
    assert_eq!(data.tracks.unwrap().len(), 1);
    assert!((waves.volume() - 0.6).abs() < 1e-6);

    // The cancelled fade-out never completes
    tokio::time::sleep(Duration::from_millis(2_200)).await;
    let data = client.status().await.unwrap().data.unwrap();
    assert_eq!(data.active, Some(true));
    assert!(waves.is_playing());

    daemon.stop().await;
}

// ============================================================================
// TC-E-006: Rapid Play/Stop Cycles
// ============================================================================

/// TC-E-006: 再生と停止の高速な繰り返し
///
/// 前提条件: Daemon起動中
/// テスト手順: `play` と `stop` を 5 回繰り返す
/// 期待結果: 毎回セッションが開始・終了し、リソースが残らない
#[tokio::test]
async fn tc_e_006_rapid_play_stop_cycles() {
    let dir = create_temp_dir();
    let mut daemon = start_daemon(&dir, create_fast_config(), DaemonSetup::default()).await;
    let client = daemon.client();

    for _ in 0..5 {
        client
            .play(&play_args("white-noise", None, 0.8))
            .await
            .unwrap();
        let response = client.stop("white-noise").await.unwrap();
        assert_eq!(response.data.unwrap().active, Some(false));
    }

    // Stale fade-in steps from stopped tracks are dropped
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(daemon.backend.streams_opened(), 5);
    assert_eq!(daemon.backend.live_streams(), 0);

    let events = daemon.events();
    let activations = events
        .iter()
        .filter(|e| **e == SessionEvent::SessionActivated)
        .count();
    let terminations = events
        .iter()
        .filter(|e| **e == SessionEvent::SessionTerminated)
        .count();
    assert_eq!(activations, 5);
    assert_eq!(terminations, 5);

    let status = client.status().await.unwrap().data.unwrap();
    assert!(status.tracks.unwrap().is_empty());

    daemon.stop().await;
}
