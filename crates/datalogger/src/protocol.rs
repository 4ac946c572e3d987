//! Adapter protocol selection

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vehicle bus protocol the adapter is told to use during initialization.
///
/// Variants follow the ELM327 `ATSP` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdapterProtocol {
    #[default]
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "J1850_PWM")]
    J1850Pwm,
    #[serde(rename = "J1850_VPW")]
    J1850Vpw,
    #[serde(rename = "ISO_9141_2")]
    Iso9141,
    /// KWP2000, 5 baud init
    #[serde(rename = "ISO_14230_4_KWP")]
    Kwp2000Slow,
    #[serde(rename = "ISO_14230_4_KWP_FAST")]
    Kwp2000Fast,
    #[serde(rename = "CAN_11B_500K")]
    Can11Bit500,
    #[serde(rename = "CAN_29B_500K")]
    Can29Bit500,
    #[serde(rename = "CAN_11B_250K")]
    Can11Bit250,
    #[serde(rename = "CAN_29B_250K")]
    Can29Bit250,
}

impl AdapterProtocol {
    /// ELM327 protocol number
    pub fn number(&self) -> u8 {
        match self {
            AdapterProtocol::Auto => 0,
            AdapterProtocol::J1850Pwm => 1,
            AdapterProtocol::J1850Vpw => 2,
            AdapterProtocol::Iso9141 => 3,
            AdapterProtocol::Kwp2000Slow => 4,
            AdapterProtocol::Kwp2000Fast => 5,
            AdapterProtocol::Can11Bit500 => 6,
            AdapterProtocol::Can29Bit500 => 7,
            AdapterProtocol::Can11Bit250 => 8,
            AdapterProtocol::Can29Bit250 => 9,
        }
    }

    /// `ATSPn` command selecting this protocol
    pub fn to_elm_command(&self) -> String {
        format!("ATSP{}", self.number())
    }

    /// CAN identifier width; `None` on K-line and J1850 buses
    pub fn can_id_bits(&self) -> Option<u8> {
        match self {
            AdapterProtocol::Can11Bit500 | AdapterProtocol::Can11Bit250 => Some(11),
            AdapterProtocol::Can29Bit500 | AdapterProtocol::Can29Bit250 => Some(29),
            _ => None,
        }
    }

    /// Whether `ATSH` headers apply. Auto-detect may settle on CAN, so it
    /// keeps them.
    pub fn accepts_can_headers(&self) -> bool {
        *self == AdapterProtocol::Auto || self.can_id_bits().is_some()
    }
}

impl fmt::Display for AdapterProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.can_id_bits() {
            Some(bits) => write!(f, "CAN {}-bit ({})", bits, self.to_elm_command()),
            None => write!(f, "{:?} ({})", self, self.to_elm_command()),
        }
    }
}
