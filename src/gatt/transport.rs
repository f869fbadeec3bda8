//! GATT transport boundary.
//!
//! The profile never speaks ATT itself. A client-side transport implements
//! [`GattClient`] (discovery, subscription, read, write against one peer
//! connection) and a server-side transport implements [`GattServer`]
//! (service publication and notification fan-out to subscribed peers).
//! Inbound traffic is pushed into the profile by the transport: notifications
//! and disconnections through [`MicpController`](crate::micp::controller::MicpController),
//! remote reads and writes through [`MicDevice`](crate::micp::mic_dev::MicDevice).

use std::{fmt, sync::Arc};

use bluer::Address;
use futures::future::BoxFuture;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{error::GattError, gatt::aics::AicsRef};

/// Attribute value as carried over the transport.
pub type Packet = SmallVec<[u8; 32]>;

/// An established LE connection to a peer.
///
/// Copyable identity only; the connection's lifetime is owned by the host
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
   pub handle: u16,
   pub address: Address,
}

impl Connection {
   pub const fn new(handle: u16, address: Address) -> Self {
      Self { handle, address }
   }
}

impl fmt::Display for Connection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}#{:04x}", self.address, self.handle)
   }
}

/// Attribute handle range of a discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRange {
   pub start: u16,
   pub end: u16,
}

impl ServiceRange {
   pub const fn new(start: u16, end: u16) -> Self {
      Self { start, end }
   }

   pub const fn contains(&self, handle: u16) -> bool {
      handle >= self.start && handle <= self.end
   }
}

/// Included-service declaration found inside a primary service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludedService {
   pub uuid: Uuid,
   pub range: ServiceRange,
}

/// Characteristic properties bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Properties(u8);

impl Properties {
   pub const READ: u8 = 1 << 1;
   pub const WRITE: u8 = 1 << 3;
   pub const NOTIFY: u8 = 1 << 4;

   pub const fn from_bits(bits: u8) -> Self {
      Self(bits)
   }

   pub const fn bits(self) -> u8 {
      self.0
   }

   pub const fn can_read(self) -> bool {
      self.0 & Self::READ != 0
   }

   pub const fn can_write(self) -> bool {
      self.0 & Self::WRITE != 0
   }

   pub const fn can_notify(self) -> bool {
      self.0 & Self::NOTIFY != 0
   }
}

/// Handles cached after characteristic discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandles {
   pub value_handle: u16,
   pub properties: Properties,
   pub ccc_handle: Option<u16>,
}

/// Characteristic entry in a published service.
#[derive(Debug, Clone)]
pub struct CharacteristicDefinition {
   pub uuid: Uuid,
   pub properties: Properties,
   pub with_ccc: bool,
}

/// Service published by a server-role transport.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
   pub uuid: Uuid,
   pub characteristics: Vec<CharacteristicDefinition>,
   pub included: Vec<AicsRef>,
}

/// Client-side GATT primitives against a single peer connection.
///
/// Every request resolves exactly once. A request outstanding when the link
/// drops should resolve with [`GattError::Disconnected`]; the profile also
/// resolves it on its own when told about the disconnection.
pub trait GattClient: Send + Sync {
   fn discover_primary(
      &self,
      conn: Connection,
      uuid: Uuid,
   ) -> BoxFuture<'_, Result<Option<ServiceRange>, GattError>>;

   fn discover_characteristic(
      &self,
      conn: Connection,
      range: ServiceRange,
      uuid: Uuid,
   ) -> BoxFuture<'_, Result<Option<CharacteristicHandles>, GattError>>;

   fn discover_included(
      &self,
      conn: Connection,
      range: ServiceRange,
   ) -> BoxFuture<'_, Result<Vec<IncludedService>, GattError>>;

   /// Writes the CCC descriptor to enable notifications of `value_handle`.
   fn subscribe(
      &self,
      conn: Connection,
      value_handle: u16,
      ccc_handle: u16,
   ) -> BoxFuture<'_, Result<(), GattError>>;

   fn read(&self, conn: Connection, handle: u16) -> BoxFuture<'_, Result<Packet, GattError>>;

   fn write(
      &self,
      conn: Connection,
      handle: u16,
      data: Packet,
   ) -> BoxFuture<'_, Result<(), GattError>>;
}

/// Server-side GATT primitives.
pub trait GattServer: Send + Sync {
   fn register_service(&self, service: &ServiceDefinition) -> Result<(), GattError>;

   /// Notifies every peer subscribed to `characteristic`.
   fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<(), GattError>;
}

pub type GattClientRef = Arc<dyn GattClient>;
pub type GattServerRef = Arc<dyn GattServer>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_properties() {
      let props = Properties::from_bits(Properties::READ | Properties::WRITE | Properties::NOTIFY);
      assert!(props.can_read() && props.can_write() && props.can_notify());
      assert!(!Properties::from_bits(Properties::READ).can_notify());
   }

   #[test]
   fn test_connection_display() {
      let conn = Connection::new(0x40, Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
      assert_eq!(conn.to_string(), "AA:BB:CC:DD:EE:FF#0040");
   }
}
