//! Line-oriented log sources.
//!
//! Each configured source runs as its own task and pushes
//! [`SourceLine`]s into a shared channel until shutdown is signalled or
//! the receiver goes away.
//!
//! | Source | Behaviour |
//! |--------|-----------|
//! | `file` | tail a file by polling, created if missing; follows truncation |
//! | `journald` | stream `journalctl -f --no-pager -o short` |
//! | `syslog` | journald when systemd is running, else tail `/var/log/syslog`, else `fallback_path` |
//!
//! Lines are stamped with the time they are read.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::config::SourceConfig;

const SYSLOG_PATH: &str = "/var/log/syslog";
const SYSTEMD_RUN_DIR: &str = "/run/systemd/system";

/// One line read from a source.
#[derive(Debug, Clone)]
pub struct SourceLine {
    pub source: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// What a source would read from on this host.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_exists: Option<bool>,
    pub journald_available: bool,
}

pub fn journald_available() -> bool {
    Path::new(SYSTEMD_RUN_DIR).exists()
}

pub fn source_info(config: &SourceConfig) -> SourceInfo {
    let journald = journald_available();
    match config {
        SourceConfig::File { path, .. } => SourceInfo {
            name: config.name(),
            kind: "file",
            path: Some(path.clone()),
            path_exists: Some(path.exists()),
            journald_available: journald,
        },
        SourceConfig::Journald { .. } => SourceInfo {
            name: config.name(),
            kind: "journald",
            path: None,
            path_exists: None,
            journald_available: journald,
        },
        SourceConfig::Syslog { .. } => SourceInfo {
            name: config.name(),
            kind: "syslog",
            path: Some(PathBuf::from(SYSLOG_PATH)),
            path_exists: Some(Path::new(SYSLOG_PATH).exists()),
            journald_available: journald,
        },
    }
}

/// Run one source until shutdown. Returns early with an error if the
/// source cannot be opened at all.
pub async fn run_source(
    config: SourceConfig,
    tx: mpsc::Sender<SourceLine>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let name = config.name();
    match config {
        SourceConfig::File {
            path,
            from_start,
            poll_interval_ms,
        } => {
            let tail = FileTail {
                name,
                path,
                from_start,
                poll_interval: Duration::from_millis(poll_interval_ms),
            };
            tail.run(tx, shutdown).await
        }
        SourceConfig::Journald { unit } => run_journald(name, unit, tx, shutdown).await,
        SourceConfig::Syslog { fallback_path } => {
            if journald_available() {
                tracing::info!("syslog source reading from journald");
                return run_journald(name, None, tx, shutdown).await;
            }
            let path = if Path::new(SYSLOG_PATH).exists() {
                PathBuf::from(SYSLOG_PATH)
            } else if let Some(p) = fallback_path {
                tracing::warn!(path = %p.display(), "no syslog found, tailing fallback file");
                p
            } else {
                bail!("syslog source: neither journald nor {} is available", SYSLOG_PATH);
            };
            let tail = FileTail {
                name,
                path,
                from_start: false,
                poll_interval: Duration::from_millis(500),
            };
            tail.run(tx, shutdown).await
        }
    }
}

fn line_from(source: &str, bytes: &[u8]) -> SourceLine {
    let text = String::from_utf8_lossy(bytes);
    SourceLine {
        source: source.to_string(),
        text: text.trim_end_matches(['\r', '\n']).to_string(),
        received_at: Utc::now(),
    }
}

/// Polling `tail -f` over a file.
struct FileTail {
    name: String,
    path: PathBuf,
    from_start: bool,
    poll_interval: Duration,
}

impl FileTail {
    async fn open(&self) -> Result<File> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)
                .await
                .with_context(|| format!("Failed to create log file: {}", self.path.display()))?;
        }
        // Tailing only reads; existing logs are often not writable by us.
        File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open log file: {}", self.path.display()))
    }

    async fn run(
        self,
        tx: mpsc::Sender<SourceLine>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut file = self.open().await?;
        let mut position = if self.from_start {
            0
        } else {
            file.seek(SeekFrom::End(0)).await?
        };
        file.seek(SeekFrom::Start(position)).await?;
        let mut reader = BufReader::new(file);
        let mut pending: Vec<u8> = Vec::new();

        tracing::info!(source = %self.name, position, "tailing file");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = reader.read_until(b'\n', &mut pending).await?;
            if read > 0 {
                position += read as u64;
                if pending.ends_with(b"\n") {
                    let line = line_from(&self.name, &pending);
                    pending.clear();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                continue;
            }

            // At EOF. A shorter file means it was truncated or rotated in place.
            let len = tokio::fs::metadata(&self.path)
                .await
                .map(|m| m.len())
                .unwrap_or(position);
            if len < position {
                tracing::info!(source = %self.name, "file truncated, rewinding");
                position = 0;
                pending.clear();
                reader.seek(SeekFrom::Start(0)).await?;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(source = %self.name, "file tail stopped");
        Ok(())
    }
}

async fn run_journald(
    name: String,
    unit: Option<String>,
    tx: mpsc::Sender<SourceLine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut cmd = Command::new("journalctl");
    cmd.args(["-f", "--no-pager", "-o", "short"]);
    if let Some(unit) = &unit {
        cmd.args(["-u", unit]);
    }
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to start journalctl")?;
    let stdout = child
        .stdout
        .take()
        .context("journalctl stdout not captured")?;
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    tracing::info!(source = %name, "streaming journald");

    loop {
        buf.clear();
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    tracing::warn!(source = %name, "journalctl exited");
                    break;
                }
                if tx.send(line_from(&name, &buf)).await.is_err() {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let _ = child.kill().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    async fn recv(rx: &mut mpsc::Receiver<SourceLine>) -> SourceLine {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("channel closed")
    }

    #[test]
    fn test_line_from_strips_newline_and_bad_utf8() {
        let line = line_from("file:x", b"disk \xff full\r\n");
        assert_eq!(line.text, "disk \u{fffd} full");
        assert_eq!(line.source, "file:x");
    }

    #[test]
    fn test_source_info_for_file() {
        let tmp = TempDir::new().unwrap();
        let config = SourceConfig::File {
            path: tmp.path().join("missing.log"),
            from_start: false,
            poll_interval_ms: 10,
        };
        let info = source_info(&config);
        assert_eq!(info.kind, "file");
        assert_eq!(info.path_exists, Some(false));
    }

    #[tokio::test]
    async fn test_file_tail_creates_and_follows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("app.log");
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        let config = SourceConfig::File {
            path: path.clone(),
            from_start: true,
            poll_interval_ms: 10,
        };
        let handle = tokio::spawn(run_source(config, tx, stop_rx));

        // Wait for the tail to create the file.
        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut f = OpenOptions::new().append(true).open(&path).await.unwrap();
        f.write_all(b"first line\nsecond ").await.unwrap();
        f.flush().await.unwrap();
        assert_eq!(recv(&mut rx).await.text, "first line");

        f.write_all(b"half\n").await.unwrap();
        f.flush().await.unwrap();
        assert_eq!(recv(&mut rx).await.text, "second half");

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_file_tail_from_start_reads_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("old.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        let config = SourceConfig::File {
            path,
            from_start: true,
            poll_interval_ms: 10,
        };
        let handle = tokio::spawn(run_source(config, tx, stop_rx));
        assert_eq!(recv(&mut rx).await.text, "one");
        assert_eq!(recv(&mut rx).await.text, "two");

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_tail_reads_read_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("readonly.log");
        std::fs::write(&path, "kernel: oom-killer invoked\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        let config = SourceConfig::File {
            path: path.clone(),
            from_start: true,
            poll_interval_ms: 10,
        };
        let handle = tokio::spawn(run_source(config, tx, stop_rx));
        assert_eq!(recv(&mut rx).await.text, "kernel: oom-killer invoked");

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o444);
    }
}
