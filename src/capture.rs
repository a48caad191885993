//! EAPOL tracking and handshake capture
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use log::{debug, info, warn};

use crate::classify::EapolEvent;
use crate::error::Error;
use crate::frame::MacAddr;
use crate::pcap;
use crate::timer::Timer;

/// Kind of captured credential material
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CaptureKind {
    Handshake,
    Pmkid,
}

/// Capture session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Waiting,
    Capturing,
    Success,
    Timeout,
    Error,
}

impl CaptureState {
    /// Frames are still being collected in these states
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CaptureState::Waiting | CaptureState::Capturing | CaptureState::Success
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureState::Success | CaptureState::Timeout | CaptureState::Error
        )
    }
}

/// Captured handshake artifact, immutable once emitted
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub bssid: MacAddr,
    pub ssid: String,
    pub client: MacAddr,
    pub kind: CaptureKind,
    /// EAPOL message numbers held at emission
    pub messages: Vec<u8>,
    /// Raw frames, radiotap included
    pub frames: Vec<Bytes>,
    pub captured_at: SystemTime,
    pub pcap_path: Option<PathBuf>,
}

impl Handshake {
    /// A PMKID is complete by definition; a handshake needs M1+M2 or M2+M3
    pub fn is_complete(&self) -> bool {
        match self.kind {
            CaptureKind::Pmkid => true,
            CaptureKind::Handshake => {
                let has = |m: u8| self.messages.contains(&m);
                (has(1) && has(2)) || (has(2) && has(3))
            }
        }
    }
}

/// Capture session statistics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureStats {
    pub target_bssid: MacAddr,
    pub target_ssid: String,
    pub target_channel: Option<u8>,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub state: CaptureState,
    pub eapol_count: u64,
    pub deauth_sent: u64,
    pub persist_failures: u64,
    pub handshakes: Vec<Handshake>,
}

/// EAPOL tracker grouping key frames per (target AP, station) and
/// deciding handshake completeness
pub struct CaptureEngine<T> {
    timer: T,
    captures_dir: PathBuf,
    timeout_ms: u64,

    target: Option<(MacAddr, String)>,
    deadline_at: Option<u64>,

    /// Per-station message maps; later duplicates replace earlier frames
    sessions: HashMap<MacAddr, BTreeMap<u8, Bytes>>,
    /// Stations whose handshake was already emitted
    emitted: HashSet<MacAddr>,

    stats: Option<CaptureStats>,
}

impl<T: Timer> CaptureEngine<T> {
    pub fn new(timer: T, captures_dir: impl Into<PathBuf>, timeout_s: u64) -> Self {
        Self {
            timer,
            captures_dir: captures_dir.into(),
            timeout_ms: timeout_s * 1000,
            target: None,
            deadline_at: None,
            sessions: HashMap::new(),
            emitted: HashSet::new(),
            stats: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.stats
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(CaptureState::Idle)
    }

    pub fn target(&self) -> Option<(MacAddr, String)> {
        self.target.clone()
    }

    /// Arm the engine for a target AP, starting the session deadline
    pub fn set_target(
        &mut self,
        bssid: MacAddr,
        ssid: &str,
        channel: Option<u8>,
    ) -> Result<(), Error> {
        if matches!(
            self.state(),
            CaptureState::Waiting | CaptureState::Capturing
        ) {
            return Err(Error::Busy);
        }

        let now = self.timer.ticks_ms();

        info!("Capture armed for {} ({})", ssid, bssid);

        self.target = Some((bssid, ssid.to_string()));
        self.deadline_at = Some(now + self.timeout_ms);
        self.sessions.clear();
        self.emitted.clear();
        self.stats = Some(CaptureStats {
            target_bssid: bssid,
            target_ssid: ssid.to_string(),
            target_channel: channel,
            started_at: now,
            ended_at: None,
            state: CaptureState::Waiting,
            eapol_count: 0,
            deauth_sent: 0,
            persist_failures: 0,
            handshakes: Vec::new(),
        });

        Ok(())
    }

    /// Stop the session, returning its final statistics
    pub fn stop(&mut self) -> Option<CaptureStats> {
        self.deadline_at = None;
        self.sessions.clear();

        if let Some(stats) = self.stats.as_mut() {
            stats.ended_at = Some(self.timer.ticks_ms());
            if !stats.state.is_terminal() {
                stats.state = CaptureState::Idle;
            }
        }

        debug!("Capture stopped");

        self.stats.clone()
    }

    /// Drop the target and session state entirely
    pub fn clear_target(&mut self) {
        self.stop();
        self.target = None;
        self.stats = None;
        self.emitted.clear();
    }

    /// Mark the session failed after an interface error
    pub fn fail(&mut self) {
        if let Some(stats) = self.stats.as_mut() {
            stats.state = CaptureState::Error;
            stats.ended_at = Some(self.timer.ticks_ms());
        }
    }

    /// Account deauth frames sent on behalf of this session
    pub fn note_deauth(&mut self, n: u64) {
        if let Some(stats) = self.stats.as_mut() {
            stats.deauth_sent += n;
        }
    }

    /// Check the session deadline, transitioning to timeout when reached.
    /// Returns true on the transition.
    pub fn check_deadline(&mut self) -> bool {
        let deadline = match self.deadline_at {
            Some(d) => d,
            None => return false,
        };

        if self.timer.ticks_ms() < deadline {
            return false;
        }

        let stats = match self.stats.as_mut() {
            Some(s) => s,
            None => return false,
        };

        if matches!(stats.state, CaptureState::Waiting | CaptureState::Capturing) {
            info!("Capture deadline reached for {}", stats.target_ssid);
            stats.state = CaptureState::Timeout;
            stats.ended_at = Some(self.timer.ticks_ms());
            self.deadline_at = None;
            return true;
        }

        false
    }

    /// Feed one EAPOL observation. Off-target events are silently
    /// dropped; a handshake is returned exactly once per station, on its
    /// first transition to completeness.
    pub fn on_eapol(&mut self, event: &EapolEvent) -> Option<Handshake> {
        let (target_bssid, target_ssid) = self.target.as_ref()?;

        if event.bssid != *target_bssid {
            return None;
        }

        let target_ssid = target_ssid.clone();
        let stats = self.stats.as_mut()?;

        // Only a live session collects frames
        if !matches!(
            stats.state,
            CaptureState::Waiting | CaptureState::Capturing | CaptureState::Success
        ) {
            return None;
        }

        stats.eapol_count += 1;
        if stats.state == CaptureState::Waiting {
            stats.state = CaptureState::Capturing;
        }

        let msg = event.msg?;

        debug!("EAPOL M{} for {} from {}", msg, event.bssid, event.client);

        let session = self.sessions.entry(event.client).or_default();
        session.insert(msg, event.frame.clone());

        if self.emitted.contains(&event.client) {
            return None;
        }

        // PMKID on the first message allows clientless recovery
        let kind = if msg == 1 && event.pmkid {
            CaptureKind::Pmkid
        } else {
            CaptureKind::Handshake
        };

        let messages: Vec<u8> = session.keys().copied().collect();
        let complete = match kind {
            CaptureKind::Pmkid => true,
            CaptureKind::Handshake => {
                (messages.contains(&1) && messages.contains(&2))
                    || (messages.contains(&2) && messages.contains(&3))
            }
        };

        if !complete {
            return None;
        }

        let mut handshake = Handshake {
            bssid: *target_bssid,
            ssid: target_ssid,
            client: event.client,
            kind,
            messages,
            frames: session.values().cloned().collect(),
            captured_at: SystemTime::now(),
            pcap_path: None,
        };

        // Persistence failure never invalidates the in-memory artifact
        match self.save(&handshake) {
            Ok(path) => handshake.pcap_path = Some(path),
            Err(e) => {
                warn!("Failed to save handshake: {}", e);
                if let Some(stats) = self.stats.as_mut() {
                    stats.persist_failures += 1;
                }
            }
        }

        info!(
            "{} captured: {} ({})",
            handshake.kind, handshake.ssid, handshake.client
        );

        self.emitted.insert(event.client);

        let stats = self.stats.as_mut()?;
        stats.handshakes.push(handshake.clone());
        stats.state = CaptureState::Success;

        Some(handshake)
    }

    /// Write a handshake's frame set to a capture file
    pub fn save(&self, handshake: &Handshake) -> Result<PathBuf, Error> {
        let filename = format!(
            "{}_{}_{}.pcap",
            sanitize_ssid(&handshake.ssid),
            handshake.bssid.flat_hex(),
            file_timestamp(handshake.captured_at),
        );
        let path = self.captures_dir.join(filename);

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.captures_dir)?;

            let mut writer = pcap::Writer::create(&path, pcap::LINKTYPE_IEEE802_11_RADIOTAP)?;
            for frame in &handshake.frames {
                writer.write_frame(handshake.captured_at, frame)?;
            }
            writer.flush()
        };

        write().map_err(|e| Error::PersistenceFailure(e.to_string()))?;

        info!("Saved handshake to {}", path.display());

        Ok(path)
    }

    /// Session statistics snapshot
    pub fn stats(&self) -> Option<CaptureStats> {
        self.stats.clone()
    }
}

/// Replace non-alphanumeric bytes for use in a filename
fn sanitize_ssid(ssid: &str) -> String {
    ssid.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `YYYYmmdd_HHMMSS` derived from the RFC 3339 rendering
fn file_timestamp(at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(at)
        .to_string()
        .chars()
        .filter_map(|c| match c {
            '-' | ':' | 'Z' => None,
            'T' => Some('_'),
            c => Some(c),
        })
        .collect()
}
