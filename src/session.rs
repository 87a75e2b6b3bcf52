//! Scan-session orchestration.
//!
//! `ScanSession` owns the session lifecycle: snapshot the interface, flip it
//! to monitor mode, supervise the capture, fold its output into the record
//! set, and restore the interface on the way out. The central invariant is
//! that no exit path from `Armed` onward skips restoration: every such path
//! funnels through one teardown routine before a terminal state is reached.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{AirodumpFactory, Capture, CaptureEvent, CaptureFactory};
use crate::config::Config;
use crate::error::ScanError;
use crate::iface::{InterfaceState, IwModeController, ModeController};
use crate::records::{Aggregator, RecordSet};
use crate::report;

/// Lifecycle of one scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    Running,
    Stopping,
    Restored,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Armed => write!(f, "armed"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Restored => write!(f, "restored"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Final outcome of a session, handed to the reporting collaborator.
#[derive(Debug)]
pub struct SessionReport {
    /// State the session ended in.
    pub state: SessionState,
    pub records: RecordSet,
    /// Capture rows that failed to parse.
    pub lines_skipped: u64,
    /// Whether the interface is in a known-restored state.
    pub restored: bool,
    /// Whether the session got far enough to mutate the interface.
    pub mutated: bool,
    pub error: Option<ScanError>,
}

impl SessionReport {
    /// Process exit code: 0 clean, 1 failed after the interface was touched
    /// (restoration attempted), 2 failed before any mutation.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            SessionState::Restored => 0,
            SessionState::Failed if self.mutated => 1,
            SessionState::Failed => 2,
            _ => 1,
        }
    }
}

/// The session orchestrator.
pub struct ScanSession {
    interface: String,
    work_dir: PathBuf,
    refresh: Duration,
    live: bool,
    controller: Box<dyn ModeController>,
    factory: Box<dyn CaptureFactory>,
    state: SessionState,
    iface_token: Option<InterfaceState>,
    aggregator: Aggregator,
}

impl ScanSession {
    pub fn new(config: &Config, interface: String, work_dir: PathBuf, live: bool) -> Self {
        let refresh = Duration::from_secs(config.general.refresh_secs.max(1));
        Self::with_parts(
            interface,
            work_dir,
            refresh,
            live,
            Box::new(IwModeController::new()),
            Box::new(AirodumpFactory::new(config.capture.clone(), refresh)),
        )
    }

    /// Construct with explicit seams; tests drive the orchestrator through
    /// this without touching the system.
    pub fn with_parts(
        interface: String,
        work_dir: PathBuf,
        refresh: Duration,
        live: bool,
        controller: Box<dyn ModeController>,
        factory: Box<dyn CaptureFactory>,
    ) -> Self {
        Self {
            interface,
            work_dir,
            refresh,
            live,
            controller,
            factory,
            state: SessionState::Idle,
            iface_token: None,
            aggregator: Aggregator::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, to: SessionState) {
        debug!(from = %self.state, to = %to, "session transition");
        self.state = to;
    }

    /// Idle → Armed: snapshot the interface, then flip it to monitor mode.
    ///
    /// A snapshot failure leaves the session Idle (nothing was mutated). A
    /// mode-flip failure leaves it Armed still holding the snapshot token,
    /// so teardown can attempt a restore.
    pub fn arm(&mut self) -> Result<(), ScanError> {
        let snapshot = self.controller.capture_state(&self.interface)?;
        info!(
            interface = %self.interface,
            mode = %snapshot.mode,
            channel = ?snapshot.channel,
            "captured interface state"
        );
        self.transition(SessionState::Armed);
        self.iface_token = Some(snapshot);
        self.controller.enable_monitor(&self.interface)?;
        Ok(())
    }

    /// Drive the session to a terminal state. Cancellation is cooperative:
    /// the token is observed between capture events, and one shutdown
    /// sequence runs no matter which of interrupt, capture death, or stream
    /// close fires first.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionReport {
        if let Err(e) = self.arm() {
            error!(error = %e, "failed to arm scan session");
            if self.state == SessionState::Idle {
                self.transition(SessionState::Failed);
                return self.into_report(false, true, Some(e));
            }
            return self.finish(None, Some(e)).await;
        }

        let mut capture = match self.factory.start(&self.interface, &self.work_dir).await {
            Ok(capture) => capture,
            Err(e) => {
                error!(error = %e, "failed to start capture");
                return self.finish(None, Some(e)).await;
            }
        };
        self.transition(SessionState::Running);
        info!(interface = %self.interface, dir = %self.work_dir.display(), "scan running");

        let mut tick = tokio::time::interval(self.refresh);
        let mut error = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stop requested, shutting down scan");
                    break;
                }
                event = capture.next_event() => match event {
                    CaptureEvent::Line(line) => self.aggregator.ingest_and_merge(&line),
                    CaptureEvent::Exited(code) => {
                        error = Some(ScanError::CaptureTerminatedUnexpectedly(code));
                        break;
                    }
                    CaptureEvent::Closed => {
                        error = Some(ScanError::CaptureTerminatedUnexpectedly(None));
                        break;
                    }
                },
                _ = tick.tick() => {
                    if self.live {
                        report::render_live(&self.aggregator.snapshot(), &self.interface);
                    }
                }
            }
        }

        self.finish(Some(capture), error).await
    }

    /// The single teardown path. Buffered capture output is drained and
    /// parsed first, then the process is stopped and the interface token is
    /// consumed by restoration. A restoration failure never masks the error
    /// that triggered teardown.
    async fn finish(
        mut self,
        capture: Option<Box<dyn Capture>>,
        mut error: Option<ScanError>,
    ) -> SessionReport {
        self.transition(SessionState::Stopping);

        if let Some(mut capture) = capture {
            capture.stop().await;
            for line in capture.drain().await {
                self.aggregator.ingest_and_merge(&line);
            }
        }

        let restored = match self.iface_token.take() {
            Some(token) => {
                let ok = self.controller.restore(token);
                if !ok {
                    warn!(
                        interface = %self.interface,
                        "interface restoration incomplete, manual intervention may be required"
                    );
                    if error.is_none() {
                        error = Some(ScanError::RestorationFailed(self.interface.clone()));
                    }
                }
                ok
            }
            None => true,
        };

        let terminal = if error.is_none() && restored {
            SessionState::Restored
        } else {
            SessionState::Failed
        };
        self.transition(terminal);
        self.into_report(true, restored, error)
    }

    fn into_report(self, mutated: bool, restored: bool, error: Option<ScanError>) -> SessionReport {
        SessionReport {
            state: self.state,
            lines_skipped: self.aggregator.skipped(),
            records: self.aggregator.into_records(),
            restored,
            mutated,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordSet;

    fn report(state: SessionState, mutated: bool) -> SessionReport {
        SessionReport {
            state,
            records: RecordSet::default(),
            lines_skipped: 0,
            restored: true,
            mutated,
            error: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(report(SessionState::Restored, true).exit_code(), 0);
        assert_eq!(report(SessionState::Failed, true).exit_code(), 1);
        assert_eq!(report(SessionState::Failed, false).exit_code(), 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Stopping.to_string(), "stopping");
        assert_eq!(SessionState::Restored.to_string(), "restored");
    }
}
