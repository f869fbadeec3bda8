//! Discovery of a peer's MICP service.
//!
//! Runs the four discovery steps in order, each gated on the previous one:
//! primary service, mute characteristic and its CCC, notification
//! subscription, then (when enabled) the included AICS instances. The first
//! failure ends the walk and nothing found up to that point is kept.

use log::debug;

use crate::{
   error::GattError,
   gatt::{
      aics::AicsService,
      transport::{Connection, GattClient, ServiceRange},
   },
   micp::{
      included::Included,
      protocol::{MICS_UUID, MUTE_UUID},
   },
};

/// Lifecycle of a remote MICP instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum DiscoveryState {
   #[strum(serialize = "undiscovered")]
   Undiscovered,
   #[strum(serialize = "discovering")]
   Discovering,
   #[strum(serialize = "ready")]
   Ready,
   #[strum(serialize = "failed")]
   Failed,
}

impl DiscoveryState {
   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// Everything a successful discovery yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
   pub service: ServiceRange,
   pub mute_handle: u16,
   pub ccc_handle: u16,
   pub included: Included,
}

/// Discovers and subscribes to the MICP service on `conn`.
///
/// `aics` is `None` when AICS support is disabled; at most `aics_limit`
/// included instances are discovered otherwise.
pub async fn discover(
   client: &dyn GattClient,
   aics: Option<&dyn AicsService>,
   conn: Connection,
   aics_limit: usize,
) -> Result<Discovered, GattError> {
   let service = client
      .discover_primary(conn, MICS_UUID)
      .await?
      .ok_or(GattError::ServiceNotFound)?;
   debug!(
      "{conn}: MICP service at 0x{:04x}..0x{:04x}",
      service.start, service.end
   );

   let mute = client
      .discover_characteristic(conn, service, MUTE_UUID)
      .await?
      .ok_or(GattError::CharacteristicNotFound)?;
   let ccc_handle = mute.ccc_handle.ok_or(GattError::DescriptorNotFound)?;
   debug!(
      "{conn}: Mute characteristic at 0x{:04x} (CCC 0x{ccc_handle:04x}, props 0x{:02x})",
      mute.value_handle,
      mute.properties.bits()
   );

   client
      .subscribe(conn, mute.value_handle, ccc_handle)
      .await?;
   debug!("{conn}: Subscribed to mute notifications");

   let included = match aics {
      Some(aics) if aics_limit > 0 => {
         Included::discover(client, aics, conn, service, aics_limit).await?
      },
      _ => Included::new(),
   };

   Ok(Discovered {
      service,
      mute_handle: mute.value_handle,
      ccc_handle,
      included,
   })
}
