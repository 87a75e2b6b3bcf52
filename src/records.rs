//! Network records and the capture-output aggregator.
//!
//! The aggregator is a best-effort consumer of the capture tool's
//! semi-structured CSV: it tracks the access-point section of the file,
//! turns rows into record fragments, and folds fragments into a
//! BSSID-keyed set. Rows that do not parse are counted and skipped, never
//! fatal to the session.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

/// Encryption reported for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encryption {
    Unknown,
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
}

impl Encryption {
    /// Map a capture-tool privacy field ("WPA2 WPA", "OPN", ...) onto the
    /// strongest recognized scheme. Unrecognized input stays `Unknown`.
    pub fn from_privacy(field: &str) -> Self {
        let mut best = Encryption::Unknown;
        for token in field.split_whitespace() {
            let candidate = match token {
                "OPN" | "OPEN" => Encryption::Open,
                "WEP" => Encryption::Wep,
                "WPA" => Encryption::Wpa,
                "WPA2" => Encryption::Wpa2,
                "WPA3" => Encryption::Wpa3,
                _ => continue,
            };
            if candidate > best {
                best = candidate;
            }
        }
        best
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encryption::Unknown => write!(f, "?"),
            Encryption::Open => write!(f, "OPN"),
            Encryption::Wep => write!(f, "WEP"),
            Encryption::Wpa => write!(f, "WPA"),
            Encryption::Wpa2 => write!(f, "WPA2"),
            Encryption::Wpa3 => write!(f, "WPA3"),
        }
    }
}

/// One observed wireless network. Identity key is the BSSID; `first_seen`
/// is write-once, every other observation field tracks the latest sighting.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkRecord {
    pub bssid: String,
    pub ssid: String,
    pub channel: u8,
    pub signal_dbm: i16,
    pub encryption: Encryption,
    pub cipher: Option<String>,
    pub auth: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A single parsed observation, not yet merged into the set.
#[derive(Debug, Clone)]
pub struct RecordFragment {
    pub bssid: String,
    pub ssid: String,
    pub channel: u8,
    pub signal_dbm: i16,
    pub encryption: Encryption,
    pub cipher: Option<String>,
    pub auth: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// BSSID-keyed set of network records.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RecordSet {
    records: HashMap<String, NetworkRecord>,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, bssid: &str) -> Option<&NetworkRecord> {
        self.records.get(bssid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkRecord> {
        self.records.values()
    }

    /// Records ordered strongest signal first, for display.
    pub fn sorted_by_signal(&self) -> Vec<&NetworkRecord> {
        let mut records: Vec<&NetworkRecord> = self.records.values().collect();
        records.sort_by(|a, b| b.signal_dbm.cmp(&a.signal_dbm).then_with(|| a.bssid.cmp(&b.bssid)));
        records
    }
}

/// Folds raw capture lines into the owned [`RecordSet`].
#[derive(Debug, Default)]
pub struct Aggregator {
    records: RecordSet,
    in_ap_section: bool,
    parsed: u64,
    skipped: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one raw line. Headers, section markers, and anything outside
    /// the access-point table yield `None` silently; rows inside the table
    /// that fail validation yield `None` and bump the skip counter.
    pub fn ingest(&mut self, line: &str) -> Option<RecordFragment> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let first = trimmed.split(',').next().unwrap_or("").trim();
        if first == "BSSID" {
            self.in_ap_section = true;
            return None;
        }
        if first == "Station MAC" {
            self.in_ap_section = false;
            return None;
        }
        if !self.in_ap_section {
            return None;
        }

        match parse_ap_row(trimmed) {
            Some(fragment) => {
                self.parsed += 1;
                Some(fragment)
            }
            None => {
                self.skipped += 1;
                trace!(line = trimmed, "skipping unparseable capture row");
                None
            }
        }
    }

    /// Upsert a fragment by BSSID. First sight pins `first_seen`; re-sights
    /// overwrite the observation fields. `last_seen` never retreats, so
    /// out-of-order delivery cannot roll a record backwards.
    pub fn merge(&mut self, fragment: RecordFragment) {
        match self.records.records.entry(fragment.bssid.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.ssid = fragment.ssid;
                record.channel = fragment.channel;
                record.signal_dbm = fragment.signal_dbm;
                record.encryption = fragment.encryption;
                record.cipher = fragment.cipher;
                record.auth = fragment.auth;
                if fragment.observed_at > record.last_seen {
                    record.last_seen = fragment.observed_at;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(NetworkRecord {
                    bssid: fragment.bssid,
                    ssid: fragment.ssid,
                    channel: fragment.channel,
                    signal_dbm: fragment.signal_dbm,
                    encryption: fragment.encryption,
                    cipher: fragment.cipher,
                    auth: fragment.auth,
                    first_seen: fragment.observed_at,
                    last_seen: fragment.observed_at,
                });
            }
        }
    }

    pub fn ingest_and_merge(&mut self, line: &str) {
        if let Some(fragment) = self.ingest(line) {
            self.merge(fragment);
        }
    }

    /// Read-only copy of the current set; safe to call mid-session.
    pub fn snapshot(&self) -> RecordSet {
        self.records.clone()
    }

    pub fn into_records(self) -> RecordSet {
        self.records
    }

    /// Rows inside the AP table that failed to parse.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn parsed(&self) -> u64 {
        self.parsed
    }
}

// airodump-ng AP table columns:
// 0 BSSID, 1 First time seen, 2 Last time seen, 3 channel, 4 Speed,
// 5 Privacy, 6 Cipher, 7 Authentication, 8 Power, 9 beacons, 10 #IV,
// 11 LAN IP, 12 ID-length, 13 ESSID, 14 Key
fn parse_ap_row(line: &str) -> Option<RecordFragment> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 14 {
        return None;
    }

    let bssid = canonical_bssid(fields[0])?;
    let channel = fields[3]
        .parse::<u8>()
        .ok()
        .filter(|c| (1..=196u8).contains(c))?;
    let signal_dbm = fields[8].parse::<i16>().ok()?;

    Some(RecordFragment {
        bssid,
        ssid: fields[13].to_string(),
        channel,
        signal_dbm,
        encryption: Encryption::from_privacy(fields[5]),
        cipher: non_empty(fields[6]),
        auth: non_empty(fields[7]),
        observed_at: Utc::now(),
    })
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

/// Validate and canonicalize a MAC address: six colon-separated hex pairs,
/// uppercased.
fn canonical_bssid(raw: &str) -> Option<String> {
    let groups: Vec<&str> = raw.split(':').collect();
    if groups.len() != 6 {
        return None;
    }
    for group in &groups {
        if group.len() != 2 || !group.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
    }
    Some(raw.to_ascii_uppercase())
}
