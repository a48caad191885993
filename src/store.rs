//! In-memory observation model
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::{debug, info};

use crate::classify::{BeaconEvent, DataEvent, ProbeEvent, Security};
use crate::frame::MacAddr;
use crate::timer::Timer;

/// Cap on distinct SSIDs remembered per station
const PROBED_SSID_CAP: usize = 32;

/// Discovered access point
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPoint {
    pub bssid: MacAddr,
    pub ssid: String,
    pub channel: u8,
    pub signal_dbm: i8,
    pub security: Security,
    pub hidden: bool,
    pub first_seen: u64,
    pub last_seen: u64,
    pub beacon_count: u64,
    pub stations: BTreeSet<MacAddr>,
}

/// Discovered station
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub mac: MacAddr,
    pub bssid: Option<MacAddr>,
    pub signal_dbm: i8,
    pub first_seen: u64,
    pub last_seen: u64,
    pub probed_ssids: Vec<String>,
}

/// Captured directed probe request
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    pub client: MacAddr,
    pub ssid: String,
    pub signal_dbm: i8,
    pub at: u64,
}

/// Single-writer model of discovered APs, stations and probes. Readers
/// receive cheap snapshots, never shared mutable state.
pub struct ObservationStore<T> {
    timer: T,
    aps: HashMap<MacAddr, AccessPoint>,
    stations: HashMap<MacAddr, Station>,
    probes: VecDeque<ProbeRecord>,
    probe_cap: usize,
}

impl<T: Timer> ObservationStore<T> {
    pub fn new(timer: T, probe_cap: usize) -> Self {
        Self {
            timer,
            aps: HashMap::new(),
            stations: HashMap::new(),
            probes: VecDeque::new(),
            probe_cap: probe_cap.max(1),
        }
    }

    /// Apply a beacon observation, returning true for a new AP
    pub fn upsert_ap(&mut self, event: &BeaconEvent) -> bool {
        if event.bssid.is_broadcast() {
            return false;
        }

        let now = self.timer.ticks_ms();

        if let Some(ap) = self.aps.get_mut(&event.bssid) {
            ap.signal_dbm = event.signal_dbm;
            ap.last_seen = now;
            ap.beacon_count += 1;

            if event.channel > 0 {
                ap.channel = event.channel;
            }

            // A named beacon upgrades a hidden AP; a later hidden beacon
            // never erases a known name
            if ap.hidden && !event.hidden {
                ap.ssid = event.ssid.clone();
                ap.hidden = false;
            }

            return false;
        }

        info!(
            "New AP: {} ({}) ch{} {}dBm",
            event.ssid, event.bssid, event.channel, event.signal_dbm
        );

        self.aps.insert(
            event.bssid,
            AccessPoint {
                bssid: event.bssid,
                ssid: event.ssid.clone(),
                channel: event.channel.max(1),
                signal_dbm: event.signal_dbm,
                security: event.security,
                hidden: event.hidden,
                first_seen: now,
                last_seen: now,
                beacon_count: 1,
                stations: BTreeSet::new(),
            },
        );

        true
    }

    /// Record a directed probe, returning true for a new station
    pub fn record_probe(&mut self, event: &ProbeEvent) -> bool {
        if event.client.is_broadcast() || event.ssid.is_empty() {
            return false;
        }

        let now = self.timer.ticks_ms();

        if self.probes.len() == self.probe_cap {
            self.probes.pop_front();
        }
        self.probes.push_back(ProbeRecord {
            client: event.client,
            ssid: event.ssid.clone(),
            signal_dbm: event.signal_dbm,
            at: now,
        });

        debug!("Probe: {} -> {}", event.client, event.ssid);

        let is_new = !self.stations.contains_key(&event.client);

        let station = self
            .stations
            .entry(event.client)
            .or_insert_with(|| Station {
                mac: event.client,
                bssid: None,
                signal_dbm: event.signal_dbm,
                first_seen: now,
                last_seen: now,
                probed_ssids: Vec::new(),
            });

        station.signal_dbm = event.signal_dbm;
        station.last_seen = now;

        if !station.probed_ssids.iter().any(|s| s == &event.ssid)
            && station.probed_ssids.len() < PROBED_SSID_CAP
        {
            station.probed_ssids.push(event.ssid.clone());
        }

        is_new
    }

    /// Record a data frame, binding the client to its BSSID. Returns true
    /// for a new station.
    pub fn record_data(&mut self, event: &DataEvent) -> bool {
        if event.client.is_broadcast() {
            return false;
        }

        let now = self.timer.ticks_ms();
        let is_new = !self.stations.contains_key(&event.client);

        let station = self
            .stations
            .entry(event.client)
            .or_insert_with(|| Station {
                mac: event.client,
                bssid: None,
                signal_dbm: event.signal_dbm,
                first_seen: now,
                last_seen: now,
                probed_ssids: Vec::new(),
            });

        // Re-binding to a different BSSID is allowed
        station.bssid = Some(event.bssid);
        station.signal_dbm = event.signal_dbm;
        station.last_seen = now;

        if is_new {
            debug!("New station: {} -> {}", event.client, event.bssid);
        }

        if let Some(ap) = self.aps.get_mut(&event.bssid) {
            ap.stations.insert(event.client);
        }

        is_new
    }

    /// Snapshot of APs sorted by signal descending, ties by BSSID
    pub fn aps(&self) -> Vec<AccessPoint> {
        let mut aps: Vec<AccessPoint> = self.aps.values().cloned().collect();
        aps.sort_by(|a, b| {
            b.signal_dbm
                .cmp(&a.signal_dbm)
                .then_with(|| a.bssid.cmp(&b.bssid))
        });
        aps
    }

    /// Snapshot of stations
    pub fn stations(&self) -> Vec<Station> {
        self.stations.values().cloned().collect()
    }

    /// Most recent probes, newest first
    pub fn recent_probes(&self, n: usize) -> Vec<ProbeRecord> {
        self.probes.iter().rev().take(n).cloned().collect()
    }

    pub fn get_ap(&self, bssid: &MacAddr) -> Option<AccessPoint> {
        self.aps.get(bssid).cloned()
    }

    pub fn get_station(&self, mac: &MacAddr) -> Option<Station> {
        self.stations.get(mac).cloned()
    }

    pub fn get_ap_by_ssid(&self, ssid: &str) -> Option<AccessPoint> {
        self.aps
            .values()
            .find(|ap| ap.ssid.eq_ignore_ascii_case(ssid))
            .cloned()
    }

    /// (AP, station, probe) counts
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.aps.len(), self.stations.len(), self.probes.len())
    }

    /// Drop all discovered data
    pub fn clear(&mut self) {
        self.aps.clear();
        self.stations.clear();
        self.probes.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classify::Direction;
    use crate::timer::mock::MockTimer;

    fn beacon(bssid: &str, ssid: &str, signal: i8) -> BeaconEvent {
        BeaconEvent {
            bssid: MacAddr::parse(bssid).unwrap(),
            ssid: ssid.to_string(),
            channel: 6,
            signal_dbm: signal,
            security: Security::Wpa2,
            hidden: false,
        }
    }

    #[test]
    fn beacon_update_preserves_first_seen() {
        let timer = MockTimer::new();
        let mut store = ObservationStore::new(timer.clone(), 16);

        timer.set_ms(1000);
        assert!(store.upsert_ap(&beacon("aa:bb:cc:dd:ee:01", "HomeNet", -60)));

        timer.set_ms(2000);
        assert!(!store.upsert_ap(&beacon("aa:bb:cc:dd:ee:01", "HomeNet", -42)));

        let aps = store.aps();
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].signal_dbm, -42);
        assert_eq!(aps[0].beacon_count, 2);
        assert_eq!(aps[0].first_seen, 1000);
        assert_eq!(aps[0].last_seen, 2000);
    }

    #[test]
    fn hidden_ssid_upgrade_is_sticky() {
        let mut store = ObservationStore::new(MockTimer::new(), 16);
        let bssid = MacAddr::parse("aa:bb:cc:dd:ee:02").unwrap();

        let hidden = BeaconEvent {
            ssid: "<hidden_ddee02>".to_string(),
            hidden: true,
            ..beacon("aa:bb:cc:dd:ee:02", "", -60)
        };

        store.upsert_ap(&hidden);
        assert_eq!(store.get_ap(&bssid).unwrap().ssid, "<hidden_ddee02>");

        // A named beacon reveals the SSID
        store.upsert_ap(&beacon("aa:bb:cc:dd:ee:02", "SecretNet", -60));
        let ap = store.get_ap(&bssid).unwrap();
        assert_eq!(ap.ssid, "SecretNet");
        assert!(!ap.hidden);

        // A later hidden beacon does not revert it
        store.upsert_ap(&hidden);
        assert_eq!(store.get_ap(&bssid).unwrap().ssid, "SecretNet");
    }

    #[test]
    fn aps_sorted_by_signal_then_bssid() {
        let mut store = ObservationStore::new(MockTimer::new(), 16);

        store.upsert_ap(&beacon("aa:bb:cc:dd:ee:03", "C", -70));
        store.upsert_ap(&beacon("aa:bb:cc:dd:ee:02", "B", -40));
        store.upsert_ap(&beacon("aa:bb:cc:dd:ee:01", "A", -70));

        let order: Vec<String> = store.aps().iter().map(|ap| ap.ssid.clone()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn probe_ring_displaces_oldest() {
        let mut store = ObservationStore::new(MockTimer::new(), 3);
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();

        for i in 0..4 {
            store.record_probe(&ProbeEvent {
                client,
                ssid: format!("net-{}", i),
                signal_dbm: -60,
            });
        }

        let probes = store.recent_probes(10);
        assert_eq!(probes.len(), 3);
        assert_eq!(probes[0].ssid, "net-3");
        assert!(probes.iter().all(|p| p.ssid != "net-0"));
    }

    #[test]
    fn probed_ssids_deduplicated() {
        let mut store = ObservationStore::new(MockTimer::new(), 16);
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();

        for _ in 0..3 {
            store.record_probe(&ProbeEvent {
                client,
                ssid: "HomeNet".to_string(),
                signal_dbm: -60,
            });
        }

        let stations = store.stations();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].probed_ssids, vec!["HomeNet"]);
    }

    #[test]
    fn data_frame_binds_station_to_ap() {
        let mut store = ObservationStore::new(MockTimer::new(), 16);
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();
        let ap1 = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();
        let ap2 = MacAddr::parse("aa:bb:cc:dd:ee:02").unwrap();

        store.upsert_ap(&beacon("aa:bb:cc:dd:ee:01", "HomeNet", -42));

        assert!(store.record_data(&DataEvent {
            client,
            bssid: ap1,
            signal_dbm: -55,
            direction: Direction::ToAp,
        }));

        assert!(store.get_ap(&ap1).unwrap().stations.contains(&client));
        assert_eq!(store.stations()[0].bssid, Some(ap1));

        // Re-binding to another BSSID updates the link
        assert!(!store.record_data(&DataEvent {
            client,
            bssid: ap2,
            signal_dbm: -50,
            direction: Direction::ToAp,
        }));
        assert_eq!(store.stations()[0].bssid, Some(ap2));
    }

    #[test]
    fn lookup_and_clear() {
        let mut store = ObservationStore::new(MockTimer::new(), 16);
        store.upsert_ap(&beacon("aa:bb:cc:dd:ee:01", "HomeNet", -42));

        assert!(store.get_ap_by_ssid("homenet").is_some());
        assert!(store.get_ap_by_ssid("nope").is_none());

        store.clear();
        assert_eq!(store.counts(), (0, 0, 0));
    }
}
