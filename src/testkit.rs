//! Synthetic frame builders for tests
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use crate::frame::MacAddr;

/// Security configuration for synthetic beacons
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BeaconSecurity {
    Open,
    Wep,
    WpaVendor,
    RsnPsk,
    RsnSae,
}

/// Minimal radiotap header carrying only an antenna signal
pub fn radiotap_header(signal_dbm: i8) -> Vec<u8> {
    vec![
        0x00,
        0x00,
        0x09,
        0x00,
        0x20,
        0x00,
        0x00,
        0x00,
        signal_dbm as u8,
    ]
}

fn rsn_ie(akm: u8) -> Vec<u8> {
    let mut data = vec![0x30, 18];
    data.extend_from_slice(&[0x01, 0x00]); // version
    data.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]); // group cipher
    data.extend_from_slice(&[0x01, 0x00]); // pairwise count
    data.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]);
    data.extend_from_slice(&[0x01, 0x00]); // AKM count
    data.extend_from_slice(&[0x00, 0x0f, 0xac, akm]);
    data
}

/// 802.11 beacon frame body without the radiotap header
pub fn beacon_body(bssid: MacAddr, ssid: &[u8], channel: u8, security: BeaconSecurity) -> Vec<u8> {
    let mut buf = vec![0x80, 0x00, 0x00, 0x00];
    buf.extend_from_slice(&[0xff; 6]);
    buf.extend_from_slice(&bssid.0);
    buf.extend_from_slice(&bssid.0);
    buf.extend_from_slice(&[0x00, 0x00]);

    // Fixed parameters: timestamp, interval, capability
    buf.extend_from_slice(&[0u8; 8]);
    buf.extend_from_slice(&[0x64, 0x00]);
    let capability: u16 = match security {
        BeaconSecurity::Open => 0x0001,
        _ => 0x0011,
    };
    buf.extend_from_slice(&capability.to_le_bytes());

    buf.push(0x00);
    buf.push(ssid.len() as u8);
    buf.extend_from_slice(ssid);

    buf.extend_from_slice(&[0x03, 0x01, channel]);

    match security {
        BeaconSecurity::RsnPsk => buf.extend_from_slice(&rsn_ie(0x02)),
        BeaconSecurity::RsnSae => buf.extend_from_slice(&rsn_ie(0x08)),
        BeaconSecurity::WpaVendor => {
            buf.extend_from_slice(&[0xdd, 0x06, 0x00, 0x50, 0xf2, 0x01, 0x01, 0x00])
        }
        _ => (),
    }

    buf
}

/// Complete beacon frame as captured in monitor mode
pub fn beacon_frame(
    bssid: MacAddr,
    ssid: &[u8],
    channel: u8,
    signal_dbm: i8,
    security: BeaconSecurity,
) -> Vec<u8> {
    let mut frame = radiotap_header(signal_dbm);
    frame.extend_from_slice(&beacon_body(bssid, ssid, channel, security));
    frame
}

/// Directed probe request frame
pub fn probe_frame(client: MacAddr, ssid: &[u8], signal_dbm: i8) -> Vec<u8> {
    let mut frame = radiotap_header(signal_dbm);

    frame.extend_from_slice(&[0x40, 0x00, 0x00, 0x00]);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&client.0);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&[0x00, 0x00]);

    frame.push(0x00);
    frame.push(ssid.len() as u8);
    frame.extend_from_slice(ssid);

    frame
}

/// Plain (non-EAPOL) data frame between a client and an AP
pub fn data_frame(client: MacAddr, bssid: MacAddr, to_ap: bool, signal_dbm: i8) -> Vec<u8> {
    let mut frame = radiotap_header(signal_dbm);

    if to_ap {
        frame.extend_from_slice(&[0x08, 0x01, 0x00, 0x00]);
        frame.extend_from_slice(&bssid.0);
        frame.extend_from_slice(&client.0);
        frame.extend_from_slice(&bssid.0);
    } else {
        frame.extend_from_slice(&[0x08, 0x02, 0x00, 0x00]);
        frame.extend_from_slice(&client.0);
        frame.extend_from_slice(&bssid.0);
        frame.extend_from_slice(&bssid.0);
    }
    frame.extend_from_slice(&[0x00, 0x00]);

    // LLC/SNAP with an IPv4 ethertype
    frame.extend_from_slice(&[0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00]);
    frame.extend_from_slice(&[0x45, 0x00, 0x00, 0x14]);

    frame
}

/// EAPOL-Key frame numbered M1..M4, optionally carrying a PMKID KDE
pub fn eapol_frame(bssid: MacAddr, client: MacAddr, msg: u8, from_ap: bool, pmkid: bool) -> Vec<u8> {
    let mut frame = radiotap_header(-50);

    if from_ap {
        frame.extend_from_slice(&[0x08, 0x02, 0x00, 0x00]);
        frame.extend_from_slice(&client.0);
        frame.extend_from_slice(&bssid.0);
        frame.extend_from_slice(&bssid.0);
    } else {
        frame.extend_from_slice(&[0x08, 0x01, 0x00, 0x00]);
        frame.extend_from_slice(&bssid.0);
        frame.extend_from_slice(&client.0);
        frame.extend_from_slice(&bssid.0);
    }
    frame.extend_from_slice(&[0x00, 0x00]);

    frame.extend_from_slice(&[0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e]);

    let key_info: u16 = match msg {
        1 => 0x0088,
        2 => 0x0108,
        3 => 0x03c8,
        4 => 0x0308,
        _ => 0x0000,
    };

    let mut key_data = Vec::new();
    if pmkid {
        key_data.extend_from_slice(&[0xdd, 0x14, 0x00, 0x0f, 0xac, 0x04]);
        key_data.extend_from_slice(&[0xab; 16]);
    }

    // EAPOL-Key body after the 802.1X header
    let mut key = vec![0x02]; // descriptor type
    key.extend_from_slice(&key_info.to_be_bytes());
    key.extend_from_slice(&16u16.to_be_bytes());
    key.extend_from_slice(&[0u8; 8]); // replay counter
    key.extend_from_slice(&[0u8; 32]); // nonce
    key.extend_from_slice(&[0u8; 16]); // IV
    key.extend_from_slice(&[0u8; 8]); // RSC
    key.extend_from_slice(&[0u8; 8]); // key ID
    key.extend_from_slice(&[0u8; 16]); // MIC
    key.extend_from_slice(&(key_data.len() as u16).to_be_bytes());
    key.extend_from_slice(&key_data);

    frame.push(0x01); // 802.1X version
    frame.push(0x03); // packet type: key
    frame.extend_from_slice(&(key.len() as u16).to_be_bytes());
    frame.extend_from_slice(&key);

    frame
}
