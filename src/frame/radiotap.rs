
use byteorder::{ByteOrder, LittleEndian};

/// Default signal strength when the radiotap header carries none
pub const DEFAULT_SIGNAL_DBM: i8 = -100;

/// Minimal radiotap header prepended to injected frames: version 0,
/// length 8, no fields present
pub const INJECT_HEADER: [u8; 8] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Parsed radiotap metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Radiotap {
    /// Total header length, the 802.11 frame follows
    pub len: usize,
    /// Antenna signal in dBm, if present
    pub signal_dbm: Option<i8>,
    /// Channel derived from the frequency field, if present
    pub channel: Option<u8>,
}

/// Present-word field bits, in field order
const FIELD_TSFT: u32 = 1 << 0;
const FIELD_FLAGS: u32 = 1 << 1;
const FIELD_RATE: u32 = 1 << 2;
const FIELD_CHANNEL: u32 = 1 << 3;
const FIELD_FHSS: u32 = 1 << 4;
const FIELD_ANT_SIGNAL: u32 = 1 << 5;
const FIELD_EXT: u32 = 1 << 31;

/// Parse the radiotap header of a monitor-mode frame.
///
/// Only the fields preceding antenna signal are walked; later fields do
/// not affect the offsets of interest.
pub fn parse(data: &[u8]) -> Option<Radiotap> {
    if data.len() < 8 || data[0] != 0 {
        return None;
    }

    let len = LittleEndian::read_u16(&data[2..4]) as usize;
    if len < 8 || len > data.len() {
        return None;
    }

    // Present words chain while the extension bit is set
    let first_present = LittleEndian::read_u32(&data[4..8]);
    let mut offset = 8;

    let mut present = first_present;
    while present & FIELD_EXT != 0 {
        if offset + 4 > len {
            return None;
        }
        present = LittleEndian::read_u32(&data[offset..offset + 4]);
        offset += 4;
    }

    let mut meta = Radiotap {
        len,
        signal_dbm: None,
        channel: None,
    };

    // TSFT: 8 bytes, 8-aligned
    if first_present & FIELD_TSFT != 0 {
        offset = (offset + 7) & !7;
        offset += 8;
    }

    if first_present & FIELD_FLAGS != 0 {
        offset += 1;
    }

    if first_present & FIELD_RATE != 0 {
        offset += 1;
    }

    // Channel: frequency + flags, 2-aligned
    if first_present & FIELD_CHANNEL != 0 {
        offset = (offset + 1) & !1;
        if offset + 2 <= len {
            let freq = LittleEndian::read_u16(&data[offset..offset + 2]);
            meta.channel = channel_from_mhz(freq);
        }
        offset += 4;
    }

    if first_present & FIELD_FHSS != 0 {
        offset += 2;
    }

    if first_present & FIELD_ANT_SIGNAL != 0 && offset < len {
        meta.signal_dbm = Some(data[offset] as i8);
    }

    Some(meta)
}

/// Map a centre frequency to its channel number
fn channel_from_mhz(freq: u16) -> Option<u8> {
    match freq {
        2412..=2472 => Some(((freq - 2407) / 5) as u8),
        2484 => Some(14),
        5180..=5885 => Some(((freq - 5000) / 5) as u8),
        _ => None,
    }
}
