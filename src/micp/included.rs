//! Included AICS instances of a MICP instance.
//!
//! The mic device fills its list once, at registration. A controller fills one
//! list per peer during discovery and only publishes it after discovery has
//! fully succeeded.

use log::{debug, warn};

use crate::{
   error::{GattError, MicpError, Result},
   gatt::{
      aics::{AicsRef, AicsRegisterParam, AicsService},
      transport::{Connection, GattClient, ServiceRange},
   },
   micp::protocol::{AICS_UUID, MAX_AICS_INSTANCES},
};

/// AICS instances included by a MICP instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Included {
   aics: heapless::Vec<AicsRef, MAX_AICS_INSTANCES>,
}

impl Included {
   pub const fn new() -> Self {
      Self {
         aics: heapless::Vec::new(),
      }
   }

   pub fn aics(&self) -> &[AicsRef] {
      &self.aics
   }

   pub fn aics_count(&self) -> u8 {
      self.aics.len() as u8
   }

   pub fn is_empty(&self) -> bool {
      self.aics.is_empty()
   }

   /// Registers one local AICS instance per parameter.
   ///
   /// `params` must hold exactly `expected` entries; nothing is registered
   /// otherwise. On failure, instances registered so far are released.
   pub fn register(
      params: &[AicsRegisterParam],
      expected: usize,
      service: Option<&dyn AicsService>,
   ) -> Result<Self> {
      if params.len() != expected {
         return Err(MicpError::InvalidArgument(
            "AICS parameter count does not match configured instance count",
         ));
      }
      if expected > MAX_AICS_INSTANCES {
         return Err(MicpError::InvalidArgument("AICS instance count exceeds capacity"));
      }

      let mut included = Self::new();
      if params.is_empty() {
         return Ok(included);
      }
      let Some(service) = service else {
         return Err(MicpError::InvalidArgument("AICS enabled without an AICS service"));
      };

      for (i, param) in params.iter().enumerate() {
         let aics = match service.register(param) {
            Ok(aics) => aics,
            Err(e) => {
               warn!("Registering AICS instance {i} failed: {e}");
               included.release(service);
               return Err(e.into());
            },
         };
         debug!("Registered AICS instance {i} as {aics} ({:?})", param.description);
         if let Err(aics) = included.aics.push(aics) {
            service.unregister(aics);
            included.release(service);
            return Err(MicpError::NoMemory);
         }
      }
      Ok(included)
   }

   /// Hands locally registered instances back to the AICS subsystem.
   pub fn release(self, service: &dyn AicsService) {
      for aics in self.aics {
         debug!("Releasing AICS instance {aics}");
         service.unregister(aics);
      }
   }

   /// Discovers the AICS instances included in the peer's MICP service.
   ///
   /// At most `limit` instances are kept. Any failure aborts the walk and
   /// drops what was found so far.
   pub async fn discover(
      client: &dyn GattClient,
      service: &dyn AicsService,
      conn: Connection,
      range: ServiceRange,
      limit: usize,
   ) -> std::result::Result<Self, GattError> {
      let declarations = client.discover_included(conn, range).await?;
      let limit = limit.min(MAX_AICS_INSTANCES);

      let mut included = Self::new();
      let mut candidates = declarations.iter().filter(|inc| inc.uuid == AICS_UUID);
      for inc in candidates.by_ref().take(limit) {
         debug!(
            "{conn}: Discovering included AICS at 0x{:04x}..0x{:04x}",
            inc.range.start, inc.range.end
         );
         let aics = service.discover(conn, inc.range).await?;
         let _ = included.aics.push(aics);
      }

      let ignored = candidates.count();
      if ignored > 0 {
         warn!("{conn}: Ignoring {ignored} included AICS instance(s) beyond limit {limit}");
      }
      Ok(included)
   }
}
