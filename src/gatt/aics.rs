//! Audio Input Control Service boundary.
//!
//! AICS has its own profile logic and owns its instances. MICP only needs to
//! have local instances allocated at registration, run nested discovery of
//! remote ones, and keep non-owning references to the results.

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
   error::GattError,
   gatt::transport::{Connection, ServiceRange},
};

/// Non-owning reference to an AICS instance, resolved by the AICS subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AicsRef(u16);

impl AicsRef {
   pub const fn from_raw(index: u16) -> Self {
      Self(index)
   }

   pub const fn raw(self) -> u16 {
      self.0
   }
}

impl fmt::Display for AicsRef {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "aics#{}", self.0)
   }
}

/// Registration parameters for one local AICS instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AicsRegisterParam {
   #[serde(default)]
   pub gain_setting: i8,
   #[serde(default = "default_units")]
   pub units: u8,
   #[serde(default = "default_min_gain")]
   pub min_gain: i8,
   #[serde(default = "default_max_gain")]
   pub max_gain: i8,
   #[serde(default)]
   pub gain_mode: u8,
   #[serde(default = "default_input_state")]
   pub input_state: bool,
   #[serde(default)]
   pub input_type: u8,
   #[serde(default)]
   pub description: SmolStr,
   #[serde(default)]
   pub desc_writable: bool,
}

const fn default_units() -> u8 {
   1
}

const fn default_min_gain() -> i8 {
   -100
}

const fn default_max_gain() -> i8 {
   100
}

const fn default_input_state() -> bool {
   true
}

impl Default for AicsRegisterParam {
   fn default() -> Self {
      Self {
         gain_setting: 0,
         units: default_units(),
         min_gain: default_min_gain(),
         max_gain: default_max_gain(),
         gain_mode: 0,
         input_state: default_input_state(),
         input_type: 0,
         description: SmolStr::default(),
         desc_writable: false,
      }
   }
}

/// Entry points MICP uses on the AICS subsystem.
pub trait AicsService: Send + Sync {
   /// Allocates and publishes a local instance (mic device role).
   fn register(&self, param: &AicsRegisterParam) -> Result<AicsRef, GattError>;

   /// Frees a local instance returned by [`register`](Self::register). Only
   /// called when mic device registration fails after allocating it.
   fn unregister(&self, aics: AicsRef);

   /// Runs AICS discovery of the included instance at `range` (controller
   /// role).
   fn discover(
      &self,
      conn: Connection,
      range: ServiceRange,
   ) -> BoxFuture<'_, Result<AicsRef, GattError>>;
}

pub type AicsServiceRef = Arc<dyn AicsService>;
