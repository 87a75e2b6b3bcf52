//! Reporting collaborator: live terminal view, final summary, JSON export.
//!
//! Receives read-only record sets from the orchestrator and owns all
//! formatting; the session core makes no assumption about output shape
//! beyond handing the records over.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::Colorize;
use tabled::{Table, Tabled};

use crate::records::RecordSet;
use crate::session::{SessionReport, SessionState};

#[derive(Tabled)]
struct NetworkRow {
    #[tabled(rename = "BSSID")]
    bssid: String,
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "CH")]
    channel: u8,
    #[tabled(rename = "ENC")]
    encryption: String,
    #[tabled(rename = "CIPHER")]
    cipher: String,
    #[tabled(rename = "AUTH")]
    auth: String,
    #[tabled(rename = "PWR")]
    signal: i16,
    #[tabled(rename = "LAST SEEN")]
    last_seen: String,
}

fn rows(records: &RecordSet) -> Vec<NetworkRow> {
    records
        .sorted_by_signal()
        .into_iter()
        .map(|r| NetworkRow {
            bssid: r.bssid.clone(),
            ssid: if r.ssid.is_empty() {
                "<hidden>".to_string()
            } else {
                r.ssid.clone()
            },
            channel: r.channel,
            encryption: r.encryption.to_string(),
            cipher: r.cipher.clone().unwrap_or_default(),
            auth: r.auth.clone().unwrap_or_default(),
            signal: r.signal_dbm,
            last_seen: r.last_seen.format("%H:%M:%S").to_string(),
        })
        .collect()
}

/// Clear the terminal and print the current snapshot.
pub fn render_live(records: &RecordSet, interface: &str) {
    print!("\x1b[2J\x1b[1;1H");
    println!("{} {}", "Live scan on".bold(), interface.cyan().bold());
    println!();
    if records.is_empty() {
        println!("Waiting for beacons...");
    } else {
        println!("{}", Table::new(rows(records)));
    }
    println!();
    println!("{}", "Press CTRL+C to stop and write the report.".dimmed());
    let _ = std::io::stdout().flush();
}

/// Final session summary: result table, counts, and whether the interface
/// was left in a known-restored state.
pub fn render_summary(report: &SessionReport, interface: &str) {
    println!();
    match report.state {
        SessionState::Restored => println!("{}", "Scan complete".green().bold()),
        _ => println!("{} (ended {})", "Scan failed".red().bold(), report.state),
    }

    if !report.records.is_empty() {
        println!();
        println!("{}", Table::new(rows(&report.records)));
    }
    println!();
    println!("Networks observed: {}", report.records.len());
    if report.lines_skipped > 0 {
        println!("Unparseable capture rows skipped: {}", report.lines_skipped);
    }
    if let Some(error) = &report.error {
        println!("{} {}", "Error:".red().bold(), error);
    }
    if report.mutated {
        if report.restored {
            println!("Interface {} restored: {}", interface, "yes".green());
        } else {
            println!(
                "Interface {} restored: {} — restore it manually (iw dev {} set type managed)",
                interface,
                "NO".red().bold(),
                interface
            );
        }
    }
}

/// Write the record set as pretty JSON into the session work dir.
pub fn write_json(records: &RecordSet, dir: &Path) -> Result<PathBuf> {
    let path = dir.join("scan.json");
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Aggregator, Encryption, RecordFragment};
    use chrono::Utc;

    fn sample_records() -> RecordSet {
        let mut agg = Aggregator::new();
        agg.merge(RecordFragment {
            bssid: "AA:BB:CC:DD:EE:FF".to_string(),
            ssid: String::new(),
            channel: 6,
            signal_dbm: -40,
            encryption: Encryption::Wpa2,
            cipher: Some("CCMP".to_string()),
            auth: Some("PSK".to_string()),
            observed_at: Utc::now(),
        });
        agg.into_records()
    }

    #[test]
    fn test_hidden_ssid_rendered_as_placeholder() {
        let rows = rows(&sample_records());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ssid, "<hidden>");
        assert_eq!(rows[0].encryption, "WPA2");
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(&sample_records(), dir.path()).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["AA:BB:CC:DD:EE:FF"]["channel"], 6);
        assert_eq!(value["AA:BB:CC:DD:EE:FF"]["encryption"], "WPA2");
    }
}
