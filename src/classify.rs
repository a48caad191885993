//! 802.11 frame classification
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use bytes::Bytes;
use log::trace;

use crate::frame::{
    eapol, ie, radiotap, Dot11Header, MacAddr, SUBTYPE_BEACON, SUBTYPE_PROBE_REQ, TYPE_DATA,
    TYPE_MGMT,
};
use crate::source::RawFrame;

pub use crate::frame::ie::Security;

/// Beacon observation
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconEvent {
    pub bssid: MacAddr,
    pub ssid: String,
    pub channel: u8,
    pub signal_dbm: i8,
    pub security: Security,
    pub hidden: bool,
}

/// Directed probe request observation
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeEvent {
    pub client: MacAddr,
    pub ssid: String,
    pub signal_dbm: i8,
}

/// Data frame direction relative to the AP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToAp,
    FromAp,
}

/// Data frame observation attributing a client to a BSSID
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub client: MacAddr,
    pub bssid: MacAddr,
    pub signal_dbm: i8,
    pub direction: Direction,
}

/// EAPOL-Key observation
#[derive(Debug, Clone, PartialEq)]
pub struct EapolEvent {
    pub bssid: MacAddr,
    pub client: MacAddr,
    /// Handshake message number, `None` when the information field fits no
    /// known message
    pub msg: Option<u8>,
    /// The key data section carries a PMKID KDE
    pub pmkid: bool,
    /// Complete captured frame, radiotap included
    pub frame: Bytes,
}

/// Typed classification of one captured frame
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Beacon(BeaconEvent),
    Probe(ProbeEvent),
    Data(DataEvent),
    Eapol(EapolEvent),
    Ignore,
}

/// Classifier statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassifierStats {
    pub frames: u64,
    pub malformed: u64,
}

/// Stateless frame classifier with counters
#[derive(Default)]
pub struct Classifier {
    stats: ClassifierStats,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ClassifierStats {
        self.stats.clone()
    }

    /// Classify a captured frame into a typed event.
    ///
    /// Malformed frames are counted and reported as [`Event::Ignore`],
    /// never surfaced as errors.
    pub fn classify(&mut self, raw: &RawFrame) -> Event {
        self.stats.frames += 1;

        match self.parse(raw) {
            Some(event) => event,
            None => {
                self.stats.malformed += 1;
                trace!("Dropped malformed frame ({} bytes)", raw.bytes.len());
                Event::Ignore
            }
        }
    }

    fn parse(&self, raw: &RawFrame) -> Option<Event> {
        let meta = radiotap::parse(&raw.bytes)?;
        let signal_dbm = meta.signal_dbm.unwrap_or(radiotap::DEFAULT_SIGNAL_DBM);

        let body = &raw.bytes[meta.len..];
        let hdr = Dot11Header::decode(body)?;

        match (hdr.ftype(), hdr.subtype()) {
            (TYPE_MGMT, SUBTYPE_BEACON) => self.beacon(body, &hdr, &meta, signal_dbm),
            (TYPE_MGMT, SUBTYPE_PROBE_REQ) => self.probe(body, &hdr, signal_dbm),
            (TYPE_DATA, _) => Some(self.data(raw, body, &hdr, signal_dbm)),
            _ => Some(Event::Ignore),
        }
    }

    fn beacon(
        &self,
        body: &[u8],
        hdr: &Dot11Header,
        meta: &radiotap::Radiotap,
        signal_dbm: i8,
    ) -> Option<Event> {
        let bssid = hdr.addr3;
        if bssid.is_broadcast() {
            return Some(Event::Ignore);
        }

        // Fixed parameters: timestamp, beacon interval, capability
        if body.len() < Dot11Header::LEN + 12 {
            return None;
        }
        let capability = u16::from_le_bytes([
            body[Dot11Header::LEN + 10],
            body[Dot11Header::LEN + 11],
        ]);
        let ies = &body[Dot11Header::LEN + 12..];

        let raw_ssid = ie::ssid(ies);
        let hidden = match raw_ssid {
            Some(s) => s.is_empty() || s.iter().all(|b| *b == 0),
            None => true,
        };

        let ssid = if hidden {
            format!("<hidden_{}>", &bssid.flat_hex()[6..])
        } else {
            String::from_utf8_lossy(raw_ssid.unwrap_or(&[])).into_owned()
        };

        // DS parameter set, falling back to the tuned channel
        let channel = ie::ds_channel(ies).or(meta.channel).unwrap_or(0);

        Some(Event::Beacon(BeaconEvent {
            bssid,
            ssid,
            channel,
            signal_dbm,
            security: ie::security(capability, ies),
            hidden,
        }))
    }

    fn probe(&self, body: &[u8], hdr: &Dot11Header, signal_dbm: i8) -> Option<Event> {
        let client = hdr.addr2;
        if client.is_broadcast() {
            return Some(Event::Ignore);
        }

        let ies = &body[Dot11Header::LEN..];
        let ssid = ie::ssid(ies)?;

        // Only directed probes are retained
        if ssid.is_empty() {
            return Some(Event::Ignore);
        }

        Some(Event::Probe(ProbeEvent {
            client,
            ssid: String::from_utf8_lossy(ssid).into_owned(),
            signal_dbm,
        }))
    }

    fn data(&self, raw: &RawFrame, body: &[u8], hdr: &Dot11Header, signal_dbm: i8) -> Event {
        if let Some(key) = eapol::extract(body, hdr) {
            let bssid = hdr.addr3;
            if bssid.is_broadcast() {
                return Event::Ignore;
            }

            let client = if hdr.addr2 != bssid {
                hdr.addr2
            } else {
                hdr.addr1
            };

            return Event::Eapol(EapolEvent {
                bssid,
                client,
                msg: eapol::message_number(key.key_info),
                pmkid: eapol::has_pmkid(key.body),
                frame: raw.bytes.clone(),
            });
        }

        // Client attribution from the DS bits
        let (client, bssid, direction) = match (hdr.to_ds(), hdr.from_ds()) {
            (true, false) => (hdr.addr2, hdr.addr1, Direction::ToAp),
            (false, true) => (hdr.addr1, hdr.addr2, Direction::FromAp),
            _ => return Event::Ignore,
        };

        if client.is_broadcast() || client.is_multicast() || bssid.is_broadcast() {
            return Event::Ignore;
        }

        Event::Data(DataEvent {
            client,
            bssid,
            signal_dbm,
            direction,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::*;

    #[test]
    fn classify_wpa3_beacon() {
        let mut classifier = Classifier::new();

        let frame = beacon_frame(
            MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap(),
            b"HomeNet",
            6,
            -42,
            BeaconSecurity::RsnSae,
        );

        match classifier.classify(&RawFrame::new(frame)) {
            Event::Beacon(b) => {
                assert_eq!(b.ssid, "HomeNet");
                assert_eq!(b.channel, 6);
                assert_eq!(b.signal_dbm, -42);
                assert_eq!(b.security, Security::Wpa3);
                assert!(!b.hidden);
            }
            other => panic!("expected beacon, got {:?}", other),
        }

        assert_eq!(classifier.stats().malformed, 0);
    }

    #[test]
    fn classify_hidden_beacon() {
        let mut classifier = Classifier::new();

        let frame = beacon_frame(
            MacAddr::parse("aa:bb:cc:dd:ee:02").unwrap(),
            &[0u8; 8],
            1,
            -60,
            BeaconSecurity::Open,
        );

        match classifier.classify(&RawFrame::new(frame)) {
            Event::Beacon(b) => {
                assert!(b.hidden);
                assert_eq!(b.ssid, "<hidden_ddee02>");
                assert_eq!(b.security, Security::Open);
            }
            other => panic!("expected beacon, got {:?}", other),
        }
    }

    #[test]
    fn classify_probe_request() {
        let mut classifier = Classifier::new();
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();

        match classifier.classify(&RawFrame::new(probe_frame(client, b"CoffeeShop", -70))) {
            Event::Probe(p) => {
                assert_eq!(p.client, client);
                assert_eq!(p.ssid, "CoffeeShop");
                assert_eq!(p.signal_dbm, -70);
            }
            other => panic!("expected probe, got {:?}", other),
        }

        // Broadcast (empty SSID) probes are dropped
        assert_eq!(
            classifier.classify(&RawFrame::new(probe_frame(client, b"", -70))),
            Event::Ignore
        );
    }

    #[test]
    fn classify_data_directions() {
        let mut classifier = Classifier::new();
        let ap = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();

        match classifier.classify(&RawFrame::new(data_frame(client, ap, true, -55))) {
            Event::Data(d) => {
                assert_eq!(d.client, client);
                assert_eq!(d.bssid, ap);
                assert_eq!(d.direction, Direction::ToAp);
            }
            other => panic!("expected data, got {:?}", other),
        }

        match classifier.classify(&RawFrame::new(data_frame(client, ap, false, -55))) {
            Event::Data(d) => {
                assert_eq!(d.direction, Direction::FromAp);
                assert_eq!(d.client, client);
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn classify_eapol_messages() {
        let mut classifier = Classifier::new();
        let ap = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();

        for (msg, from_ap) in [(1u8, true), (2, false), (3, true), (4, false)] {
            let frame = eapol_frame(ap, client, msg, from_ap, false);
            match classifier.classify(&RawFrame::new(frame)) {
                Event::Eapol(e) => {
                    assert_eq!(e.msg, Some(msg));
                    assert_eq!(e.bssid, ap);
                    assert_eq!(e.client, client);
                    assert!(!e.pmkid);
                }
                other => panic!("expected eapol M{}, got {:?}", msg, other),
            }
        }

        let m1_pmkid = eapol_frame(ap, client, 1, true, true);
        match classifier.classify(&RawFrame::new(m1_pmkid)) {
            Event::Eapol(e) => assert!(e.pmkid),
            other => panic!("expected eapol, got {:?}", other),
        }
    }

    #[test]
    fn classify_counts_malformed() {
        let mut classifier = Classifier::new();

        assert_eq!(
            classifier.classify(&RawFrame::new(vec![0xff, 0x00, 0x01])),
            Event::Ignore
        );
        assert_eq!(classifier.stats().malformed, 1);
        assert_eq!(classifier.stats().frames, 1);
    }

    #[test]
    fn classify_default_signal() {
        let mut classifier = Classifier::new();
        let ap = MacAddr::parse("aa:bb:cc:dd:ee:03").unwrap();

        // Radiotap header without an antenna signal field
        let mut frame = vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&beacon_body(ap, b"NoSignal", 3, BeaconSecurity::Open));

        match classifier.classify(&RawFrame::new(frame)) {
            Event::Beacon(b) => assert_eq!(b.signal_dbm, -100),
            other => panic!("expected beacon, got {:?}", other),
        }
    }
}
