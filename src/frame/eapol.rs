
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

use super::Dot11Header;

/// 802.1X ethertype carried in the LLC/SNAP header
pub const ETHERTYPE_EAPOL: u16 = 0x888e;

/// LLC/SNAP prefix of an encapsulated ethertype frame
const LLC_SNAP: [u8; 6] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];

/// EAPOL packet type for key frames
const PACKET_TYPE_KEY: u8 = 3;

/// Offset of the key data length within an EAPOL-Key body
const KEY_DATA_LEN_OFFSET: usize = 97;

bitflags! {
    /// EAPOL-Key information field, big-endian on the wire
    pub struct KeyInfo: u16 {
        const KEY_TYPE_PAIRWISE = 1 << 3;
        const INSTALL           = 1 << 6;
        const ACK               = 1 << 7;
        const MIC               = 1 << 8;
        const SECURE            = 1 << 9;
        const ERROR             = 1 << 10;
        const REQUEST           = 1 << 11;
        const ENCRYPTED_KEY_DATA = 1 << 12;
    }
}

/// EAPOL-Key payload lifted out of a data frame
#[derive(Debug, Clone, PartialEq)]
pub struct EapolKey<'a> {
    pub key_info: KeyInfo,
    /// Full 802.1X payload, starting at the version octet
    pub body: &'a [u8],
}

/// Extract an EAPOL-Key payload from a decoded data frame, if it carries
/// one
pub fn extract<'a>(frame: &'a [u8], hdr: &Dot11Header) -> Option<EapolKey<'a>> {
    let offset = hdr.body_offset();
    if frame.len() < offset + 8 {
        return None;
    }

    let llc = &frame[offset..];
    if llc[0..6] != LLC_SNAP || BigEndian::read_u16(&llc[6..8]) != ETHERTYPE_EAPOL {
        return None;
    }

    // 802.1X header: version, packet type, body length
    let body = &llc[8..];
    if body.len() < 7 || body[1] != PACKET_TYPE_KEY {
        return None;
    }

    // Key information sits at offset 5..7 of the EAPOL payload
    let key_info = KeyInfo::from_bits_truncate(BigEndian::read_u16(&body[5..7]));

    Some(EapolKey { key_info, body })
}

/// Number a key frame M1..M4 from its information field.
///
/// The mapping treats a transitional M4 (secure clear) as M2; either way
/// the message pairs with M1/M3 for completeness purposes.
pub fn message_number(key_info: KeyInfo) -> Option<u8> {
    let ack = key_info.contains(KeyInfo::ACK);
    let mic = key_info.contains(KeyInfo::MIC);
    let secure = key_info.contains(KeyInfo::SECURE);
    let install = key_info.contains(KeyInfo::INSTALL);

    if ack && !mic {
        Some(1)
    } else if mic && !ack && !secure {
        Some(2)
    } else if ack && mic && secure && install {
        Some(3)
    } else if mic && secure && !ack {
        Some(4)
    } else {
        None
    }
}

/// Check the key data section for a PMKID key data encapsulation
pub fn has_pmkid(body: &[u8]) -> bool {
    if body.len() < KEY_DATA_LEN_OFFSET + 2 {
        return false;
    }

    let key_data_len =
        BigEndian::read_u16(&body[KEY_DATA_LEN_OFFSET..KEY_DATA_LEN_OFFSET + 2]) as usize;
    let start = KEY_DATA_LEN_OFFSET + 2;

    if body.len() < start + key_data_len {
        return false;
    }

    let key_data = &body[start..start + key_data_len];
    let mut offset = 0;

    while offset + 2 <= key_data.len() {
        let id = key_data[offset];
        let len = key_data[offset + 1] as usize;

        if offset + 2 + len > key_data.len() {
            return false;
        }

        // PMKID KDE: vendor element, IEEE OUI, data type 4
        if id == 0xdd
            && len >= 20
            && key_data[offset + 2..offset + 5] == [0x00, 0x0f, 0xac]
            && key_data[offset + 5] == 0x04
        {
            return true;
        }

        offset += 2 + len;
    }

    false
}
