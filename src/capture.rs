//! Capture-process supervision.
//!
//! Spawns the external capture tool against a monitor-mode interface and
//! exposes its CSV output as a live sequence of lines. The tool rewrites its
//! CSV snapshot in place on every write interval, so the line source
//! re-reads the file on each refresh tick instead of byte-tailing it; the
//! aggregator's merge absorbs the repeated rows.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::error::{Result, ScanError};

/// What the orchestrator sees while consuming a capture.
#[derive(Debug)]
pub enum CaptureEvent {
    /// One raw output line.
    Line(String),
    /// The capture process exited on its own.
    Exited(Option<i32>),
    /// The line source ended without a child exit.
    Closed,
}

/// Live capture seam for the session orchestrator.
#[async_trait]
pub trait Capture: Send {
    /// Next line or lifecycle event. Suspends while waiting for output;
    /// callers interleave this with their cancellation signal.
    async fn next_event(&mut self) -> CaptureEvent;

    /// Terminate the capture process: SIGTERM, bounded wait, then SIGKILL.
    /// Idempotent.
    async fn stop(&mut self);

    /// Collect everything still buffered after the process has stopped so
    /// it can be parsed before teardown.
    async fn drain(&mut self) -> Vec<String>;
}

/// Starts captures; the seam lets tests drive the orchestrator without the
/// real tool.
#[async_trait]
pub trait CaptureFactory: Send + Sync {
    async fn start(&self, interface: &str, work_dir: &Path) -> Result<Box<dyn Capture>>;
}

/// airodump-ng factory used by the CLI.
pub struct AirodumpFactory {
    config: CaptureConfig,
    refresh: Duration,
}

impl AirodumpFactory {
    pub fn new(config: CaptureConfig, refresh: Duration) -> Self {
        Self { config, refresh }
    }
}

#[async_trait]
impl CaptureFactory for AirodumpFactory {
    async fn start(&self, interface: &str, work_dir: &Path) -> Result<Box<dyn Capture>> {
        let capture =
            AirodumpCapture::spawn(&self.config, interface, work_dir, self.refresh).await?;
        Ok(Box::new(capture))
    }
}

/// A running airodump-ng process plus the task polling its CSV output.
pub struct AirodumpCapture {
    child: Child,
    lines: mpsc::Receiver<String>,
    tailer_cancel: CancellationToken,
    csv_path: PathBuf,
    stop_timeout: Duration,
    stopped: bool,
}

impl AirodumpCapture {
    /// Check that the capture tool can be executed at all.
    pub async fn tool_available(tool: &str) -> bool {
        Command::new(tool)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok()
    }

    pub async fn spawn(
        config: &CaptureConfig,
        interface: &str,
        work_dir: &Path,
        refresh: Duration,
    ) -> Result<Self> {
        if !Self::tool_available(&config.tool).await {
            return Err(ScanError::CaptureToolMissing(config.tool.clone()));
        }

        let prefix = work_dir.join("scan");
        let mut cmd = build_command(config, interface, &prefix);
        let child = cmd
            .spawn()
            .map_err(|e| ScanError::CaptureLaunchFailed(e.to_string()))?;
        debug!(tool = %config.tool, interface, pid = child.id(), "capture process started");

        // The tool numbers its output files per run.
        let csv_path = work_dir.join("scan-01.csv");

        let (tx, rx) = mpsc::channel(256);
        let tailer_cancel = CancellationToken::new();
        tokio::spawn(poll_capture_file(
            csv_path.clone(),
            tx,
            tailer_cancel.clone(),
            refresh,
        ));

        Ok(Self {
            child,
            lines: rx,
            tailer_cancel,
            csv_path,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs.max(1)),
            stopped: false,
        })
    }
}

#[async_trait]
impl Capture for AirodumpCapture {
    async fn next_event(&mut self) -> CaptureEvent {
        tokio::select! {
            maybe = self.lines.recv() => match maybe {
                Some(line) => CaptureEvent::Line(line),
                None => CaptureEvent::Closed,
            },
            status = self.child.wait(), if !self.stopped => {
                let code = status.ok().and_then(|s| s.code());
                warn!(code, "capture process exited on its own");
                CaptureEvent::Exited(code)
            }
        }
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.tailer_cancel.cancel();

        if let Some(pid) = self.child.id() {
            // SIGTERM first so the tool can flush its output files.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!(code = status.code(), "capture process stopped"),
            Ok(Err(e)) => warn!(error = %e, "failed waiting for capture process"),
            Err(_) => {
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "capture process ignored SIGTERM, killing"
                );
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "failed to kill capture process");
                }
            }
        }
    }

    async fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            out.push(line);
        }

        // One final read of the output file: the last write interval may
        // never have been polled.
        match tokio::fs::read(&self.csv_path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                out.extend(text.lines().map(str::to_string));
            }
            Err(e) => debug!(path = %self.csv_path.display(), error = %e, "no capture output to drain"),
        }
        out
    }
}

fn build_command(config: &CaptureConfig, interface: &str, prefix: &Path) -> Command {
    let mut cmd = Command::new(&config.tool);
    cmd.arg("-w")
        .arg(prefix)
        .arg("--output-format")
        .arg("csv");
    for band in &config.bands {
        cmd.arg("--band").arg(band);
    }
    cmd.arg(interface)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Re-read the capture file on every tick and feed its lines downstream.
/// Ends on cancellation or when the receiver goes away.
async fn poll_capture_file(
    path: PathBuf,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    refresh: Duration,
) {
    let mut tick = tokio::time::interval(refresh);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let text = String::from_utf8_lossy(&bytes);
                        for line in text.lines() {
                            // A full channel must not make the tailer deaf to
                            // cancellation; dropped lines are re-read on the
                            // final drain pass.
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                sent = tx.send(line.to_string()) => {
                                    if sent.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    // The tool needs a moment before the file appears.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed reading capture output"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_args() {
        let config = CaptureConfig::default();
        let cmd = build_command(&config, "wlan0", Path::new("/tmp/run/scan"));

        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-w",
                "/tmp/run/scan",
                "--output-format",
                "csv",
                "--band",
                "bg",
                "wlan0"
            ]
        );
        assert_eq!(cmd.as_std().get_program(), "airodump-ng");
    }

    #[tokio::test]
    async fn test_tool_available_missing_binary() {
        assert!(!AirodumpCapture::tool_available("airscout-no-such-tool").await);
    }

    #[tokio::test]
    async fn test_poll_capture_file_feeds_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan-01.csv");
        tokio::fs::write(&path, "first\nsecond\n").await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_capture_file(
            path.clone(),
            tx,
            cancel.clone(),
            Duration::from_millis(10),
        ));

        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_capture_file_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan-01.csv");

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_capture_file(
            path.clone(),
            tx,
            cancel.clone(),
            Duration::from_millis(5),
        ));

        // Nothing arrives while the file is absent...
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        // ...and lines show up once the tool writes it.
        tokio::fs::write(&path, "late\n").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "late");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_capture_file_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan-01.csv");

        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Pre-cancelled token: the task must end promptly instead of
        // sleeping out the refresh interval.
        poll_capture_file(path, tx, cancel, Duration::from_secs(3600)).await;
    }
}
