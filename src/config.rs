//! Engine configuration
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::path::PathBuf;
use std::str::FromStr;

use rand::Rng;

use crate::error::Error;

/// Operation mode, gating orchestrator autonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Scan only, ignore capture targets
    Passive,
    /// Scan, auto-capture when a target is known
    Capture,
    /// Scan silently with low-power hints to collaborators
    Drop,
}

impl Mode {
    /// Parse an operator-supplied mode string
    pub fn parse(s: &str) -> Result<Self, Error> {
        Mode::from_str(&s.to_lowercase()).map_err(|_| Error::InvalidMode(s.to_string()))
    }
}

/// Scanning configuration
#[derive(Clone, PartialEq, Debug)]
pub struct ScanConfig {
    /// WiFi interface used for scanning
    pub interface: String,

    /// 2.4GHz channels to scan
    pub channels_2g: Vec<u8>,

    /// 5GHz channels to scan
    pub channels_5g: Vec<u8>,

    /// Channel hop interval in milliseconds
    pub hop_interval_ms: u64,

    /// Shuffle the hop sequence each cycle
    pub randomize_hops: bool,

    /// Depth of the frame channel between the capture thread and the
    /// event loop, in frames
    pub frame_queue_depth: usize,

    /// Probe request ring capacity
    pub probe_ring_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            channels_2g: vec![1, 6, 11],
            channels_5g: vec![36, 40, 44, 48],
            hop_interval_ms: 500,
            randomize_hops: false,
            frame_queue_depth: 1024,
            probe_ring_capacity: 10_000,
        }
    }
}

impl ScanConfig {
    /// All channels in hop order
    pub fn all_channels(&self) -> Vec<u8> {
        let mut channels = self.channels_2g.clone();
        channels.extend_from_slice(&self.channels_5g);
        channels
    }
}

/// Handshake capture configuration
#[derive(Clone, PartialEq, Debug)]
pub struct CaptureConfig {
    /// Deauth frames per burst
    pub deauth_count: u32,

    /// Interval between frames within a burst, in milliseconds
    pub deauth_interval_ms: u64,

    /// Interval between bursts in continuous mode, in milliseconds
    pub burst_interval_ms: u64,

    /// Capture deadline in seconds
    pub timeout_s: u64,

    /// Stop the capture once a complete handshake is held
    pub auto_stop: bool,

    /// In `capture` mode, start a capture the moment a target is known
    /// rather than waiting for an explicit start command
    pub auto_start: bool,

    /// Permit deauth bursts while in `drop` mode
    pub allow_deauth_in_drop: bool,

    /// Directory for capture files
    pub captures_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            deauth_count: 5,
            deauth_interval_ms: 100,
            burst_interval_ms: 1000,
            timeout_s: 120,
            auto_stop: true,
            auto_start: true,
            allow_deauth_in_drop: false,
            captures_dir: PathBuf::from("captures"),
        }
    }
}

/// Setup access point configuration
#[derive(Clone, PartialEq, Debug)]
pub struct ApConfig {
    /// Bring up the setup AP on boot
    pub enabled: bool,

    /// AP SSID, `{random}` is replaced with 4 hex characters
    pub ssid: String,

    /// AP passphrase
    pub password: String,

    /// AP channel
    pub channel: u8,

    /// Hide the AP SSID
    pub hidden: bool,

    /// Seconds in setup mode before auto-switching to monitor
    pub setup_timeout_s: u64,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ssid: "Shadow-{random}".to_string(),
            password: "shadowpass123".to_string(),
            channel: 6,
            hidden: false,
            setup_timeout_s: 60,
        }
    }
}

impl ApConfig {
    /// SSID with the `{random}` template substituted
    pub fn generate_ssid(&self) -> String {
        if self.ssid.contains("{random}") {
            let suffix: u16 = rand::thread_rng().gen();
            self.ssid
                .replace("{random}", &format!("{:04X}", suffix))
        } else {
            self.ssid.clone()
        }
    }
}

/// Target filtering configuration
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TargetsConfig {
    /// Target SSIDs, `*` suffix matches prefixes, empty targets all
    pub ssids: Vec<String>,

    /// Target BSSIDs
    pub bssids: Vec<String>,

    /// SSID substrings to never target
    pub ignore: Vec<String>,
}

impl TargetsConfig {
    /// Check whether a network should be targeted
    pub fn should_target(&self, ssid: &str, bssid: &str) -> bool {
        let ssid_lower = ssid.to_lowercase();

        for pattern in &self.ignore {
            if ssid_lower.contains(&pattern.to_lowercase()) {
                return false;
            }
        }

        // No targets configured matches everything
        if self.ssids.is_empty() && self.bssids.is_empty() {
            return true;
        }

        for pattern in &self.ssids {
            let pattern = pattern.to_lowercase();
            if let Some(prefix) = pattern.strip_suffix('*') {
                if ssid_lower.starts_with(prefix) {
                    return true;
                }
            } else if pattern == ssid_lower {
                return true;
            }
        }

        self.bssids
            .iter()
            .any(|b| b.eq_ignore_ascii_case(bssid))
    }
}

/// Autostart configuration
#[derive(Clone, PartialEq, Debug)]
pub struct AutostartConfig {
    /// Operation mode entered on boot
    pub mode: Mode,
}

impl Default for AutostartConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Passive,
        }
    }
}

/// Top-level engine configuration
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Config {
    pub scan: ScanConfig,
    pub capture: CaptureConfig,
    pub ap: ApConfig,
    pub targets: TargetsConfig,
    pub autostart: AutostartConfig,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_strings() {
        assert_eq!(Mode::parse("passive"), Ok(Mode::Passive));
        assert_eq!(Mode::parse("CAPTURE"), Ok(Mode::Capture));
        assert_eq!(Mode::Drop.to_string(), "drop");
        assert_eq!(
            Mode::parse("stealth"),
            Err(Error::InvalidMode("stealth".to_string()))
        );
    }

    #[test]
    fn ap_ssid_template() {
        let config = ApConfig::default();
        let ssid = config.generate_ssid();

        assert!(ssid.starts_with("Shadow-"));
        assert_eq!(ssid.len(), "Shadow-".len() + 4);
        assert!(ssid["Shadow-".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn target_filtering() {
        let targets = TargetsConfig {
            ssids: vec!["Home*".to_string(), "Office".to_string()],
            bssids: vec!["AA:BB:CC:DD:EE:01".to_string()],
            ignore: vec!["guest".to_string()],
        };

        assert!(targets.should_target("HomeNet", "11:22:33:44:55:66"));
        assert!(targets.should_target("office", "11:22:33:44:55:66"));
        assert!(targets.should_target("Whatever", "aa:bb:cc:dd:ee:01"));
        assert!(!targets.should_target("HomeGuest", "aa:bb:cc:dd:ee:01"));
        assert!(!targets.should_target("CoffeeShop", "11:22:33:44:55:66"));

        // Empty filter targets everything
        assert!(TargetsConfig::default().should_target("Anything", "00:11:22:33:44:55"));
    }
}
