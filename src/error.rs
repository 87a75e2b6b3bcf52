use thiserror::Error;

/// Errors surfaced by the scan-session core.
///
/// Per-line parse failures are not represented here: the aggregator counts
/// and skips malformed capture output instead of failing the session.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("wireless interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("permission denied (need root/CAP_NET_ADMIN): {0}")]
    PermissionDenied(String),

    #[error("failed to switch mode on {interface}: {reason}")]
    ModeTransitionFailed { interface: String, reason: String },

    #[error("capture tool not available: {0}")]
    CaptureToolMissing(String),

    #[error("failed to launch capture process: {0}")]
    CaptureLaunchFailed(String),

    #[error("capture process terminated unexpectedly")]
    CaptureTerminatedUnexpectedly(Option<i32>),

    #[error("interface restoration incomplete for {0}")]
    RestorationFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
