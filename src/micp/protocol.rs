//! MICP protocol definitions.
//!
//! Assigned numbers, the mute characteristic value encoding and the ATT
//! application error codes used by both roles.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GattError;

/// Upper bound on AICS instances included by one MICP instance.
pub const MAX_AICS_INSTANCES: usize = 4;

/// Upper bound on concurrently tracked remote MICP instances.
pub const MAX_REMOTE_INSTANCES: usize = 8;

const fn uuid16(short: u16) -> Uuid {
   Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | ((short as u128) << 96))
}

/// Microphone Control Service
pub const MICS_UUID: Uuid = uuid16(0x184D);
/// Mute characteristic
pub const MUTE_UUID: Uuid = uuid16(0x2BC3);
/// Audio Input Control Service
pub const AICS_UUID: Uuid = uuid16(0x1843);
/// Client Characteristic Configuration descriptor
pub const CCC_UUID: Uuid = uuid16(0x2902);

/// Mute characteristic value.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   Default,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::IntoStaticStr,
)]
pub enum MuteState {
   #[default]
   #[strum(serialize = "unmuted")]
   Unmuted = 0x00,
   #[strum(serialize = "muted")]
   Muted = 0x01,
   #[strum(serialize = "disabled")]
   Disabled = 0x02,
}

impl MuteState {
   pub fn to_str(self) -> &'static str {
      self.into()
   }

   pub const fn value(self) -> u8 {
      self as u8
   }

   /// Values a peer may write. Disabled is read-only.
   pub const fn is_writable(value: u8) -> bool {
      matches!(value, 0x00 | 0x01)
   }

   pub const fn encode(self) -> [u8; 1] {
      [self as u8]
   }

   /// Decodes a mute characteristic value received from a peer.
   pub fn decode(data: &[u8]) -> Result<Self, GattError> {
      let [value] = data else {
         return Err(GattError::InvalidLength {
            expected: 1,
            actual: data.len(),
         });
      };
      Self::from_repr(*value).ok_or(GattError::InvalidValue(*value))
   }
}

/// ATT error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AttError(u8);

impl AttError {
   pub const INVALID_OFFSET: Self = Self(0x07);
   pub const INVALID_ATTRIBUTE_LEN: Self = Self(0x0D);
   pub const UNLIKELY: Self = Self(0x0E);
   /// Mute functionality currently disabled
   pub const MUTE_DISABLED: Self = Self(0x80);
   /// Written value outside the valid enumeration range
   pub const VAL_OUT_OF_RANGE: Self = Self(0x81);

   pub const fn from_code(code: u8) -> Self {
      Self(code)
   }

   pub const fn code(self) -> u8 {
      self.0
   }

   pub const fn is_application(self) -> bool {
      self.0 >= 0x80 && self.0 <= 0x9F
   }

   pub fn try_to_str(self) -> Option<&'static str> {
      match self {
         Self::INVALID_OFFSET => Some("invalid_offset"),
         Self::INVALID_ATTRIBUTE_LEN => Some("invalid_attribute_len"),
         Self::UNLIKELY => Some("unlikely"),
         Self::MUTE_DISABLED => Some("mute_disabled"),
         Self::VAL_OUT_OF_RANGE => Some("val_out_of_range"),
         _ => None,
      }
   }
}

impl fmt::Display for AttError {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.try_to_str() {
         Some(name) => write!(f, "{name} (0x{:02x})", self.0),
         None => write!(f, "0x{:02x}", self.0),
      }
   }
}
