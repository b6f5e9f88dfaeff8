use crate::attr::{AttrCursor, IeCursor};
use serde::Serialize;
use std::fmt;

const NL80211_BSS_BSSID: u16 = 1;
const NL80211_BSS_FREQUENCY: u16 = 2;
const NL80211_BSS_CAPABILITY: u16 = 5;
const NL80211_BSS_INFORMATION_ELEMENTS: u16 = 6;
const NL80211_BSS_SIGNAL_MBM: u16 = 7;

const IE_SSID: u8 = 0;
const IE_RSN: u8 = 48;
const IE_VENDOR: u8 = 221;
const WPA_OUI_TYPE: [u8; 4] = [0x00, 0x50, 0xf2, 0x01];
const CAPABILITY_PRIVACY: u16 = 1 << 4;

/// Security class advertised by a BSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityClass {
    None,
    Wep,
    Wpa,
    Wpa2,
    Unknown,
}

impl SecurityClass {
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Wep | Self::Wpa | Self::Wpa2)
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "None",
            Self::Wep => "WEP",
            Self::Wpa => "WPA",
            Self::Wpa2 => "WPA2",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// One access point seen in a scan dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    pub ssid: String,
    pub bssid: String,
    pub signal_dbm: i32,
    pub security: SecurityClass,
    pub channel: u32,
    pub frequency: u32,
}

impl NetworkRecord {
    pub fn is_secure(&self) -> bool {
        self.security.is_secure()
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Map a centre frequency in MHz to its 2.4 GHz or 5 GHz channel number, 0 otherwise.
pub fn frequency_to_channel(frequency: u32) -> u32 {
    match frequency {
        2412..=2484 => (frequency - 2412) / 5 + 1,
        5170..=5825 => (frequency - 5170) / 5 + 34,
        _ => 0,
    }
}

/// Classify a BSS from its information elements and capability bitfield.
///
/// RSN wins over a legacy WPA vendor element. Without either, the privacy bit decides
/// between WEP and open. A missing capability attribute yields `Unknown`.
pub fn classify_security(ies: Option<&[u8]>, capability: Option<u16>) -> SecurityClass {
    let mut wpa = false;
    for ie in IeCursor::new(ies.unwrap_or_default()) {
        match ie.id {
            IE_RSN => return SecurityClass::Wpa2,
            IE_VENDOR if ie.body.starts_with(&WPA_OUI_TYPE) => wpa = true,
            _ => {}
        }
    }
    if wpa {
        return SecurityClass::Wpa;
    }
    match capability {
        Some(cap) if cap & CAPABILITY_PRIVACY != 0 => SecurityClass::Wep,
        Some(_) => SecurityClass::None,
        None => SecurityClass::Unknown,
    }
}

/// SSID element text. Hidden networks advertise an empty or all-NUL SSID, both map to "".
pub fn parse_ssid(ies: &[u8]) -> Option<String> {
    let ie = IeCursor::new(ies).find(|ie| ie.id == IE_SSID)?;
    if ie.body.iter().all(|b| *b == 0) {
        return Some(String::new());
    }
    Some(String::from_utf8_lossy(ie.body).into_owned())
}

/// Decode one `NL80211_ATTR_BSS` nest. Returns `None` when no BSSID is present.
pub fn parse_bss(payload: &[u8]) -> Option<NetworkRecord> {
    let mut bssid: Option<[u8; 6]> = None;
    let mut frequency: Option<u32> = None;
    let mut signal_mbm: Option<i32> = None;
    let mut capability: Option<u16> = None;
    let mut ies: Option<&[u8]> = None;

    for attr in AttrCursor::new(payload) {
        match attr.nla_type {
            NL80211_BSS_BSSID => {
                if let Ok(mac) = <[u8; 6]>::try_from(attr.payload) {
                    bssid = Some(mac);
                }
            }
            NL80211_BSS_FREQUENCY => frequency = attr.as_u32(),
            NL80211_BSS_SIGNAL_MBM => signal_mbm = attr.as_i32(),
            NL80211_BSS_CAPABILITY => capability = attr.as_u16(),
            NL80211_BSS_INFORMATION_ELEMENTS => ies = Some(attr.payload),
            _ => {}
        }
    }

    let bssid = bssid?;
    let frequency = frequency.unwrap_or(0);
    Some(NetworkRecord {
        ssid: ies.and_then(parse_ssid).unwrap_or_default(),
        bssid: format_mac(&bssid),
        signal_dbm: signal_mbm.unwrap_or(0) / 100,
        security: classify_security(ies, capability),
        channel: frequency_to_channel(frequency),
        frequency,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::attr::encode_attr;

    /// Builds a BSS nest the way the kernel lays it out.
    pub struct BssBuilder {
        buf: Vec<u8>,
    }

    impl BssBuilder {
        pub fn new(mac: [u8; 6]) -> Self {
            Self {
                buf: encode_attr(super::NL80211_BSS_BSSID, &mac),
            }
        }

        pub fn frequency(mut self, mhz: u32) -> Self {
            self.buf
                .extend(encode_attr(super::NL80211_BSS_FREQUENCY, &mhz.to_ne_bytes()));
            self
        }

        pub fn signal_mbm(mut self, mbm: i32) -> Self {
            self.buf
                .extend(encode_attr(super::NL80211_BSS_SIGNAL_MBM, &mbm.to_ne_bytes()));
            self
        }

        pub fn capability(mut self, cap: u16) -> Self {
            self.buf
                .extend(encode_attr(super::NL80211_BSS_CAPABILITY, &cap.to_ne_bytes()));
            self
        }

        pub fn ies(mut self, ies: &[u8]) -> Self {
            self.buf
                .extend(encode_attr(super::NL80211_BSS_INFORMATION_ELEMENTS, ies));
            self
        }

        pub fn build(self) -> Vec<u8> {
            self.buf
        }
    }

    pub fn ssid_ie(ssid: &str) -> Vec<u8> {
        let mut ie = vec![0u8, ssid.len() as u8];
        ie.extend_from_slice(ssid.as_bytes());
        ie
    }
}
