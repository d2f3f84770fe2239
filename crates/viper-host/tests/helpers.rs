#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use viper_host::HostConfig;

/// In-process stand-in for the engine: acknowledges every line with `OK` and
/// returns everything it received once the worker hangs up.
pub async fn fake_engine<S: AsyncRead + AsyncWrite>(stream: S) -> Vec<String> {
    let (r, mut w) = tokio::io::split(stream);
    let mut lines = BufReader::new(r).lines();
    let mut received = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        received.push(line);
        if w.write_all(b"OK\n").await.is_err() {
            break;
        }
    }
    received
}

/// Poll `cond` every 10ms for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Config whose programs do not exist, rooted in `dir`.
pub fn offline_config(dir: &Path) -> HostConfig {
    let mut config = HostConfig::default();
    config.work_dir = dir.join("snapshots");
    config.bam_dir = dir.join("bam");
    config.engine.java = dir.join("missing-java").display().to_string();
    config.engine.log_file = dir.join("engine.log");
    config.engine.property_file = dir.join("igv.properties");
    config.display.program = dir.join("missing-xvfb").display().to_string();
    config.connect_retry = Duration::from_millis(20);
    config.worker_poll = Duration::from_millis(20);
    config
}

/// Write an executable shell script standing in for the engine launcher.
/// The launch arguments are ignored.
#[cfg(unix)]
pub fn stub_engine(dir: &Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("engine.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// A loopback port nothing is listening on.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
