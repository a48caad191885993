
use byteorder::{ByteOrder, LittleEndian};

/// Information element identifiers of interest
pub const IE_SSID: u8 = 0;
pub const IE_DS_PARAMS: u8 = 3;
pub const IE_RSN: u8 = 48;
pub const IE_VENDOR: u8 = 221;

/// Capability field privacy bit
pub const CAP_PRIVACY: u16 = 0x0010;

/// RSN AKM suite selector for SAE
pub const AKM_SAE: u8 = 8;

const OUI_IEEE: [u8; 3] = [0x00, 0x0f, 0xac];
const OUI_MSFT: [u8; 3] = [0x00, 0x50, 0xf2];

/// Network security classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Security {
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
    Unknown,
}

/// Iterator over the information elements of a management frame body
pub struct InfoElements<'a> {
    buf: &'a [u8],
}

impl<'a> InfoElements<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for InfoElements<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < 2 {
            return None;
        }

        let id = self.buf[0];
        let len = self.buf[1] as usize;

        if self.buf.len() < 2 + len {
            return None;
        }

        let data = &self.buf[2..2 + len];
        self.buf = &self.buf[2 + len..];

        Some((id, data))
    }
}

/// Raw SSID element payload, if present
pub fn ssid(ies: &[u8]) -> Option<&[u8]> {
    InfoElements::new(ies)
        .find(|(id, _)| *id == IE_SSID)
        .map(|(_, data)| data)
}

/// Channel from the DS parameter set element
pub fn ds_channel(ies: &[u8]) -> Option<u8> {
    InfoElements::new(ies)
        .find(|(id, data)| *id == IE_DS_PARAMS && !data.is_empty())
        .map(|(_, data)| data[0])
}

/// Classify security from the capability field and information elements.
///
/// RSN with an SAE AKM is WPA3, any other RSN is WPA2, a vendor WPA
/// element without RSN is WPA, the bare privacy bit is WEP.
pub fn security(capability: u16, ies: &[u8]) -> Security {
    let mut vendor_wpa = false;

    for (id, data) in InfoElements::new(ies) {
        match id {
            IE_RSN => {
                return if rsn_has_sae(data) {
                    Security::Wpa3
                } else {
                    Security::Wpa2
                };
            }
            IE_VENDOR => {
                if data.len() >= 4 && data[0..3] == OUI_MSFT && data[3] == 0x01 {
                    vendor_wpa = true;
                }
            }
            _ => (),
        }
    }

    if vendor_wpa {
        Security::Wpa
    } else if capability & CAP_PRIVACY != 0 {
        Security::Wep
    } else {
        Security::Open
    }
}

/// Walk the RSN element AKM suite list looking for SAE
fn rsn_has_sae(rsn: &[u8]) -> bool {
    // version, group cipher suite
    if rsn.len() < 8 {
        return false;
    }

    let mut offset = 6;

    // Pairwise cipher suites
    if offset + 2 > rsn.len() {
        return false;
    }
    let pairwise = LittleEndian::read_u16(&rsn[offset..offset + 2]) as usize;
    offset += 2 + pairwise * 4;

    // AKM suites
    if offset + 2 > rsn.len() {
        return false;
    }
    let akms = LittleEndian::read_u16(&rsn[offset..offset + 2]) as usize;
    offset += 2;

    for _ in 0..akms {
        if offset + 4 > rsn.len() {
            return false;
        }

        if rsn[offset..offset + 3] == OUI_IEEE && rsn[offset + 3] == AKM_SAE {
            return true;
        }

        offset += 4;
    }

    false
}
