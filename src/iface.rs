//! Wireless interface mode control.
//!
//! Discovery goes through nl80211 (via neli-wifi) with an `iw dev` text
//! fallback; mode and channel operations shell out to `iw` / `ip`, which is
//! what survives driver quirks in practice. Mode changes are two-step on
//! purpose: the interface is brought down before the type change and back up
//! after, in the same order for enable and restore, so the operation is its
//! own inverse.

use std::process::Command;
use std::sync::OnceLock;

use neli_wifi::Socket;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Result, ScanError};

/// Wireless interface mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceMode {
    /// Standard managed mode (client)
    Managed,
    /// Monitor mode for passive capture
    Monitor,
    /// Anything else (AP, mesh, ...)
    Unknown,
}

impl InterfaceMode {
    /// Form accepted by `iw set type`. Unknown restores to managed, the only
    /// safe target when the original type did not survive the snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceMode::Managed => "managed",
            InterfaceMode::Monitor => "monitor",
            InterfaceMode::Unknown => "managed",
        }
    }
}

impl From<&str> for InterfaceMode {
    fn from(s: &str) -> Self {
        match s {
            "managed" => InterfaceMode::Managed,
            "monitor" => InterfaceMode::Monitor,
            _ => InterfaceMode::Unknown,
        }
    }
}

impl std::fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceMode::Managed => write!(f, "managed"),
            InterfaceMode::Monitor => write!(f, "monitor"),
            InterfaceMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Snapshot of an interface taken before the session mutates it.
///
/// Held by the orchestrator as an ownership token: captured once at arm time
/// and consumed by value exactly once by [`ModeController::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceState {
    pub name: String,
    pub mode: InterfaceMode,
    pub channel: Option<u8>,
}

/// Mode transition seam for the session orchestrator.
pub trait ModeController: Send + Sync {
    /// Query the current mode/channel of the named interface.
    fn capture_state(&self, name: &str) -> Result<InterfaceState>;

    /// Put the interface into monitor mode. No-op success when it already is.
    fn enable_monitor(&self, name: &str) -> Result<()>;

    /// Best-effort return to the captured state. Never fails: restoration
    /// runs during teardown, where an error must not abort the remaining
    /// cleanup. Returns whether the interface is in a known-restored state.
    fn restore(&self, state: InterfaceState) -> bool;
}

/// System implementation over `iw` and `ip`.
#[derive(Debug, Default)]
pub struct IwModeController;

impl IwModeController {
    pub fn new() -> Self {
        Self
    }

    fn run_checked(&self, interface: &str, program: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(program).args(args).output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(
            interface,
            &format!("{} {}", program, args.join(" ")),
            &stderr,
            output.status.code(),
        ))
    }
}

impl ModeController for IwModeController {
    fn capture_state(&self, name: &str) -> Result<InterfaceState> {
        let output = Command::new("iw").args(["dev", name, "info"]).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_permission_error(&stderr) {
                return Err(ScanError::PermissionDenied(format!("iw dev {} info", name)));
            }
            return Err(ScanError::InterfaceNotFound(name.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (mode, channel) = parse_iface_info(&stdout);
        Ok(InterfaceState {
            name: name.to_string(),
            mode,
            channel,
        })
    }

    fn enable_monitor(&self, name: &str) -> Result<()> {
        let current = self.capture_state(name)?;
        if current.mode == InterfaceMode::Monitor {
            debug!(interface = name, "already in monitor mode");
            return Ok(());
        }

        info!(interface = name, "enabling monitor mode");
        self.run_checked(name, "ip", &["link", "set", name, "down"])?;

        // Some drivers reject `set type monitor`; retry with the older form
        // before giving up, keeping the first error if both fail.
        if let Err(primary) = self.run_checked(name, "iw", &["dev", name, "set", "type", "monitor"])
        {
            self.run_checked(name, "iw", &["dev", name, "set", "monitor", "none"])
                .map_err(|_| primary)?;
        }

        self.run_checked(name, "ip", &["link", "set", name, "up"])?;
        Ok(())
    }

    fn restore(&self, state: InterfaceState) -> bool {
        match self.capture_state(&state.name) {
            Ok(current) if current.mode == state.mode => {
                debug!(interface = %state.name, "interface already in its original mode");
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(interface = %state.name, error = %e, "could not query interface before restore");
            }
        }

        info!(interface = %state.name, mode = %state.mode, "restoring interface");
        let name = state.name.as_str();
        let mut ok = true;
        let steps: [(&str, Vec<&str>); 3] = [
            ("ip", vec!["link", "set", name, "down"]),
            ("iw", vec!["dev", name, "set", "type", state.mode.as_str()]),
            ("ip", vec!["link", "set", name, "up"]),
        ];
        for (program, args) in steps {
            if let Err(e) = self.run_checked(name, program, &args) {
                warn!(interface = name, error = %e, "restore step failed");
                ok = false;
            }
        }

        // Channel can only be pinned on a monitor interface.
        if ok {
            if let (InterfaceMode::Monitor, Some(channel)) = (state.mode, state.channel) {
                let ch = channel.to_string();
                if let Err(e) =
                    self.run_checked(name, "iw", &["dev", name, "set", "channel", &ch])
                {
                    warn!(interface = name, channel, error = %e, "channel restore failed");
                    ok = false;
                }
            }
        }
        ok
    }
}

fn is_permission_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("operation not permitted") || lower.contains("permission denied")
}

fn classify_failure(interface: &str, invocation: &str, stderr: &str, code: Option<i32>) -> ScanError {
    if stderr.contains("No such device") {
        return ScanError::InterfaceNotFound(interface.to_string());
    }
    if is_permission_error(stderr) {
        return ScanError::PermissionDenied(invocation.to_string());
    }
    let reason = if stderr.is_empty() {
        match code {
            Some(code) => format!("{} exited with status {}", invocation, code),
            None => format!("{} was killed by a signal", invocation),
        }
    } else {
        stderr.to_string()
    };
    ScanError::ModeTransitionFailed {
        interface: interface.to_string(),
        reason,
    }
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*type\s+(\S+)").expect("hardcoded pattern"))
}

fn channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*channel\s+(\d+)").expect("hardcoded pattern"))
}

fn interface_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*Interface\s+(\S+)").expect("hardcoded pattern"))
}

fn parse_iface_info(text: &str) -> (InterfaceMode, Option<u8>) {
    let mode = type_re()
        .captures(text)
        .map(|c| InterfaceMode::from(&c[1]))
        .unwrap_or(InterfaceMode::Unknown);
    let channel = channel_re()
        .captures(text)
        .and_then(|c| c[1].parse::<u8>().ok());
    (mode, channel)
}

fn parse_iw_dev(text: &str) -> Vec<String> {
    interface_re()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// One row of the `interfaces` listing.
#[derive(Debug, Clone)]
pub struct InterfaceSummary {
    pub name: String,
    pub phy: Option<u32>,
    pub mode: InterfaceMode,
    pub channel: Option<u8>,
    pub mac: Option<String>,
}

/// List all wireless interfaces on the host.
pub fn list_interfaces() -> Result<Vec<InterfaceSummary>> {
    match list_via_nl80211() {
        Ok(list) if !list.is_empty() => Ok(list),
        Ok(_) => list_via_iw(),
        Err(e) => {
            debug!(error = %e, "nl80211 enumeration failed, falling back to iw");
            list_via_iw()
        }
    }
}

fn list_via_nl80211() -> std::result::Result<Vec<InterfaceSummary>, String> {
    let mut socket = Socket::connect().map_err(|e| e.to_string())?;
    let interfaces = socket.get_interfaces_info().map_err(|e| e.to_string())?;

    let controller = IwModeController::new();
    let mut result = Vec::new();
    for iface in interfaces {
        let name = match iface.name {
            Some(n) => String::from_utf8_lossy(&n)
                .trim_end_matches('\0')
                .to_string(),
            None => continue,
        };
        if name.is_empty() {
            continue;
        }

        let mac = iface.mac.map(|m| {
            m.iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":")
        });

        let state = controller.capture_state(&name).ok();
        result.push(InterfaceSummary {
            name,
            phy: iface.phy,
            mode: state
                .as_ref()
                .map(|s| s.mode)
                .unwrap_or(InterfaceMode::Unknown),
            channel: state
                .and_then(|s| s.channel)
                .or(iface.channel.map(|c| c as u8)),
            mac,
        });
    }
    Ok(result)
}

fn list_via_iw() -> Result<Vec<InterfaceSummary>> {
    let output = Command::new("iw").arg("dev").output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    let controller = IwModeController::new();
    Ok(parse_iw_dev(&stdout)
        .into_iter()
        .map(|name| {
            let state = controller.capture_state(&name).ok();
            InterfaceSummary {
                mode: state
                    .as_ref()
                    .map(|s| s.mode)
                    .unwrap_or(InterfaceMode::Unknown),
                channel: state.and_then(|s| s.channel),
                phy: None,
                mac: None,
                name,
            }
        })
        .collect())
}

/// Pick a scan interface automatically: an interface already in monitor mode
/// wins, otherwise the first wireless interface found.
pub fn pick_interface() -> Result<String> {
    let interfaces = list_interfaces()?;
    if let Some(monitor) = interfaces.iter().find(|i| i.mode == InterfaceMode::Monitor) {
        return Ok(monitor.name.clone());
    }
    interfaces
        .first()
        .map(|i| i.name.clone())
        .ok_or_else(|| ScanError::InterfaceNotFound("no wireless interfaces detected".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IW_INFO: &str = "Interface wlan0\n\tifindex 3\n\twdev 0x1\n\taddr aa:bb:cc:dd:ee:ff\n\ttype managed\n\twiphy 0\n\tchannel 11 (2462 MHz), width: 20 MHz, center1: 2462 MHz\n\ttxpower 20.00 dBm\n";

    #[test]
    fn test_parse_iface_info() {
        let (mode, channel) = parse_iface_info(IW_INFO);
        assert_eq!(mode, InterfaceMode::Managed);
        assert_eq!(channel, Some(11));
    }

    #[test]
    fn test_parse_iface_info_monitor_no_channel() {
        let (mode, channel) = parse_iface_info("Interface mon0\n\ttype monitor\n\twiphy 1\n");
        assert_eq!(mode, InterfaceMode::Monitor);
        assert_eq!(channel, None);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(InterfaceMode::from("managed"), InterfaceMode::Managed);
        assert_eq!(InterfaceMode::from("monitor"), InterfaceMode::Monitor);
        assert_eq!(InterfaceMode::from("mesh point"), InterfaceMode::Unknown);
        assert_eq!(InterfaceMode::Unknown.as_str(), "managed");
    }

    #[test]
    fn test_parse_iw_dev_blocks() {
        let text = "phy#0\n\tInterface wlan0\n\t\tifindex 3\n\t\ttype managed\nphy#1\n\tInterface mon0\n\t\tifindex 5\n\t\ttype monitor\n";
        assert_eq!(parse_iw_dev(text), vec!["wlan0", "mon0"]);
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("wlan9", "iw dev wlan9 info", "command failed: No such device (-19)", Some(237));
        assert!(matches!(err, ScanError::InterfaceNotFound(name) if name == "wlan9"));

        let err = classify_failure(
            "wlan0",
            "iw dev wlan0 set type monitor",
            "command failed: Operation not permitted (-1)",
            Some(1),
        );
        assert!(matches!(err, ScanError::PermissionDenied(_)));

        let err = classify_failure("wlan0", "ip link set wlan0 down", "", Some(2));
        match err {
            ScanError::ModeTransitionFailed { interface, reason } => {
                assert_eq!(interface, "wlan0");
                assert!(reason.contains("status 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
