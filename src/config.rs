use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// General scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Interface to scan on; auto-detected when unset
    pub interface: Option<String>,
    /// Base directory for per-session output folders
    pub output_dir: PathBuf,
    /// Live table / capture poll refresh interval in seconds
    pub refresh_secs: u64,
    /// Render the live results table while scanning
    pub live_view: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            interface: None,
            output_dir: PathBuf::from("wifi_logs"),
            refresh_secs: 3,
            live_view: true,
        }
    }
}

/// External capture tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture tool binary
    pub tool: String,
    /// Band flags passed to the tool ("bg" = 2.4 GHz, "abg" = 2.4 + 5 GHz)
    pub bands: Vec<String>,
    /// How long to wait for the tool to exit after SIGTERM before killing it
    pub stop_timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tool: "airodump-ng".to_string(),
            bands: vec!["bg".to_string()],
            stop_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/airscout/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("airscout/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.general.refresh_secs, 3);
        assert_eq!(parsed.capture.tool, "airodump-ng");
        assert_eq!(parsed.capture.bands, vec!["bg".to_string()]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config =
            toml::from_str("[general]\ninterface = \"wlan1\"\nrefresh_secs = 1\n").unwrap();
        assert_eq!(parsed.general.refresh_secs, 1);
        assert_eq!(parsed.general.interface.as_deref(), Some("wlan1"));
        assert!(parsed.general.live_view);
        assert_eq!(parsed.capture.stop_timeout_secs, 5);
    }
}
