use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::net::TcpListener;
use viper_host::settings::VIEW_RANGE_KEY;
use viper_host::{HostConfig, ServiceState, SettingValue, VisualizerError, VisualizerService};

#[path = "helpers.rs"]
mod helpers;
use helpers::{eventually, fake_engine, free_port, offline_config};

#[tokio::test]
async fn await_startup_times_out_before_start() {
    let dir = TempDir::new().unwrap();
    let service = VisualizerService::new(offline_config(dir.path()));

    let started = Instant::now();
    let err = service
        .await_startup(Duration::from_millis(150))
        .await
        .unwrap_err();
    assert!(matches!(err, VisualizerError::StartupTimeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn spawn_failure_stops_the_service() {
    let dir = TempDir::new().unwrap();
    let service = VisualizerService::new(offline_config(dir.path()));

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, VisualizerError::Spawn { .. }));
    assert_eq!(service.state(), ServiceState::Stopped);

    let err = service
        .await_startup(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, VisualizerError::Stopped));
    assert!(matches!(service.start().await, Err(VisualizerError::Stopped)));
}

#[tokio::test]
async fn shutdown_is_idempotent_and_concurrent_safe() {
    let dir = TempDir::new().unwrap();
    let config = offline_config(dir.path());
    std::fs::create_dir_all(&config.work_dir).unwrap();
    let stale = config.work_dir.join("S1-1-1000-old.png");
    std::fs::write(&stale, b"png").unwrap();

    let service = VisualizerService::new(config);
    tokio::join!(service.shutdown(), service.shutdown());
    service.shutdown().await;

    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(!stale.exists());
}

#[tokio::test]
async fn scheduling_before_start_uses_builtin_settings() {
    let dir = TempDir::new().unwrap();
    let service = VisualizerService::new(offline_config(dir.path()));

    let before = service.configuration_hash();
    let key = service.schedule_snapshot("S1", "1", 1000, false);
    assert!(key.ends_with(&before));
    assert!(!service.is_snapshot_done(&key));

    let after = service.set_configuration_value(VIEW_RANGE_KEY, 50);
    assert_ne!(before, after);
    assert_eq!(service.scheduler().queued_len(), 0);
    assert_eq!(
        service.snapshot_path(&key),
        dir.path().join("snapshots").join(format!("{key}.png"))
    );
}

/// Config launching a shell script as the engine, pointed at `port`.
#[cfg(unix)]
fn stub_config(dir: &TempDir, body: &str, port: u16) -> HostConfig {
    let mut config = offline_config(dir.path());
    config.engine.java = helpers::stub_engine(dir.path(), body);
    config.engine.port = port;
    config
}

#[cfg(unix)]
#[tokio::test]
async fn running_engine_that_never_listens_times_out() {
    let dir = TempDir::new().unwrap();
    let service = VisualizerService::new(stub_config(&dir, "exec sleep 30", free_port()));

    service.start().await.unwrap();
    let err = service
        .await_startup(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, VisualizerError::StartupTimeout(_)));
    assert_eq!(service.state(), ServiceState::Connecting);

    service.shutdown().await;
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn engine_exiting_before_connect_is_reported_as_exited() {
    let dir = TempDir::new().unwrap();
    let service = VisualizerService::new(stub_config(&dir, "exit 1", free_port()));

    service.start().await.unwrap();
    let err = service
        .await_startup(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, VisualizerError::EngineExited), "got {err:?}");
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn connected_engine_becomes_ready_and_disables_idle_delay() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        fake_engine(stream).await
    });

    let service = VisualizerService::new(stub_config(&dir, "exec sleep 30", port));
    service.start().await.unwrap();
    service.await_startup(Duration::from_secs(5)).await.unwrap();
    assert_eq!(service.state(), ServiceState::Ready);

    let key = service.schedule_snapshot("S1", "1", 1000, true);
    assert!(eventually(|| service.is_snapshot_done(&key)).await);

    service.shutdown().await;
    let received = engine.await.unwrap();
    assert_eq!(received.first().map(String::as_str), Some("setSleepInterval 0"));
    assert_eq!(received[1], "new");
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn engine_death_after_ready_stops_the_service() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        fake_engine(stream).await
    });

    let stop = dir.path().join("stop");
    let body = format!(
        "while [ ! -e '{}' ]; do sleep 0.05; done",
        stop.display()
    );
    let service = VisualizerService::new(stub_config(&dir, &body, port));
    service.start().await.unwrap();
    service.await_startup(Duration::from_secs(5)).await.unwrap();

    std::fs::write(&stop, b"").unwrap();
    assert!(eventually(|| service.state() == ServiceState::Stopped).await);

    // The worker closed the control connection on its way out.
    let received = engine.await.unwrap();
    assert_eq!(received, vec!["setSleepInterval 0"]);
}

#[cfg(unix)]
#[tokio::test]
async fn settings_changed_before_start_survive_property_file_seeding() {
    let dir = TempDir::new().unwrap();
    let config = stub_config(&dir, "exec sleep 30", free_port());
    std::fs::write(
        &config.engine.property_file,
        "SAM.COLOR_BY=NONE\nSAM.DOWNSAMPLE=false\n",
    )
    .unwrap();
    let service = VisualizerService::new(config);

    service.set_configuration_value("SAM.COLOR_BY", "STRAND");
    let early = service.schedule_snapshot("S1", "1", 1000, false);
    service.start().await.unwrap();

    let settings = service.configuration();
    assert!(settings.contains(&("SAM.COLOR_BY".to_string(), SettingValue::from("STRAND"))));
    assert!(settings.contains(&("SAM.DOWNSAMPLE".to_string(), SettingValue::Bool(false))));

    // The file added a setting, so the hash moved and the early key was forgotten.
    assert_eq!(service.scheduler().queued_len(), 1);
    assert_eq!(service.scheduler().snapshot_state(&early), None);
    let key = service.schedule_snapshot("S1", "1", 1000, false);
    assert!(key.ends_with(&service.configuration_hash()));

    service.shutdown().await;
}
