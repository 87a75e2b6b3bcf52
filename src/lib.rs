//! airscout — passive Wi-Fi scan sessions with guaranteed interface
//! restoration.
//!
//! The crate takes exclusive control of a wireless interface, flips it into
//! monitor mode, supervises an external capture tool, folds the tool's CSV
//! output into a BSSID-keyed record set, and restores the interface's
//! original mode and channel on every exit path.

pub mod capture;
pub mod config;
pub mod error;
pub mod iface;
pub mod records;
pub mod report;
pub mod session;

pub use capture::{AirodumpCapture, AirodumpFactory, Capture, CaptureEvent, CaptureFactory};
pub use config::Config;
pub use error::{Result, ScanError};
pub use iface::{InterfaceMode, InterfaceState, IwModeController, ModeController};
pub use records::{Aggregator, Encryption, NetworkRecord, RecordFragment, RecordSet};
pub use session::{ScanSession, SessionReport, SessionState};
