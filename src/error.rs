//! Error types for the MICP roles.
//!
//! Two channels, never mixed: [`MicpError`] is the administrative channel,
//! returned synchronously from
//! registration, discovery, lookup and request submission. [`GattError`] is the
//! protocol channel, carried inside completion events once the peer (or the
//! transport) has answered.

use thiserror::Error;

use crate::micp::protocol::AttError;

// POSIX errno values reported by `MicpError::errno`.
const EINVAL: i32 = 22;
const EALREADY: i32 = 114;
const ENOENT: i32 = 2;
const EAGAIN: i32 = 11;
const EBUSY: i32 = 16;
const ENOMEM: i32 = 12;
const ENOTCONN: i32 = 107;
const ESHUTDOWN: i32 = 108;
const EIO: i32 = 5;
const EPROTO: i32 = 71;
const EMSGSIZE: i32 = 90;

/// Main error type for administrative MICP calls.
#[derive(Error, Debug)]
pub enum MicpError {
   #[error("Invalid argument: {0}")]
   InvalidArgument(&'static str),

   #[error("Already registered")]
   AlreadyRegistered,

   #[error("Mic device not registered")]
   NotRegistered,

   #[error("Discovery already in progress or completed for this connection")]
   AlreadyDiscovering,

   #[error("Instance not ready")]
   NotReady,

   #[error("Invalid or stale instance handle")]
   InvalidInstance,

   #[error("Request already pending")]
   Busy,

   #[error("No free instance slot")]
   NoMemory,

   #[error("Controller has been shut down")]
   ControllerShutdown,

   #[error("GATT error: {0}")]
   Gatt(#[from] GattError),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("Invalid configuration: {0}")]
   InvalidConfig(String),

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

impl MicpError {
   /// POSIX errno equivalent, positive.
   pub fn errno(&self) -> i32 {
      match self {
         Self::InvalidArgument(_) | Self::InvalidConfig(_) => EINVAL,
         Self::AlreadyRegistered | Self::AlreadyDiscovering => EALREADY,
         Self::NotRegistered | Self::ConfigDirNotFound => ENOENT,
         Self::NotReady => EAGAIN,
         Self::InvalidInstance => EINVAL,
         Self::Busy => EBUSY,
         Self::NoMemory => ENOMEM,
         Self::ControllerShutdown => ESHUTDOWN,
         Self::Gatt(e) => e.code(),
         Self::Io(_) | Self::TomlParse(_) | Self::TomlSerialize(_) => EIO,
      }
   }
}

/// Convenience type alias for Results with `MicpError`.
pub type Result<T> = std::result::Result<T, MicpError>;

/// Protocol-level failure reported through completion events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
   #[error("ATT error: {0}")]
   Att(AttError),

   #[error("MICP service not found")]
   ServiceNotFound,

   #[error("Mute characteristic not found")]
   CharacteristicNotFound,

   #[error("Mute CCC descriptor not found")]
   DescriptorNotFound,

   #[error("Invalid value length: expected {expected} bytes, got {actual}")]
   InvalidLength { expected: usize, actual: usize },

   #[error("Invalid mute value: 0x{0:02x}")]
   InvalidValue(u8),

   #[error("Disconnected")]
   Disconnected,

   #[error("Transport error: {0}")]
   Transport(String),
}

impl GattError {
   /// Error value handed to observers: the ATT code for ATT errors, an errno
   /// otherwise. Never zero.
   pub fn code(&self) -> i32 {
      match self {
         Self::Att(att) => i32::from(att.code()),
         Self::ServiceNotFound | Self::CharacteristicNotFound | Self::DescriptorNotFound => ENOENT,
         Self::InvalidLength { .. } => EMSGSIZE,
         Self::InvalidValue(_) => EPROTO,
         Self::Disconnected => ENOTCONN,
         Self::Transport(_) => EIO,
      }
   }
}

impl From<AttError> for GattError {
   fn from(att: AttError) -> Self {
      Self::Att(att)
   }
}
