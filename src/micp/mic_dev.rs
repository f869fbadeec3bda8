//! Mic device (server role).
//!
//! A process holds at most one mic device, created by [`register`] and kept
//! for the remainder of the process. The mute state is mutated from two
//! sources: privileged local calls, which always apply, and remote writes
//! arriving through the server transport, which are validated first and can
//! never lift the Disabled state. Each transition, together with its
//! notification and callback, runs under one lock, so observers see changes in
//! the order they were applied.

use std::sync::OnceLock;

use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use parking_lot::ReentrantMutex;
use serde_json::json;

use crate::{
   config::MicDevConfig,
   error::{MicpError, Result},
   event::{MicDevCallbackRef, MicDevEvent},
   gatt::{
      aics::{AicsRegisterParam, AicsService},
      transport::{
         CharacteristicDefinition, Connection, GattServerRef, Properties, ServiceDefinition,
      },
   },
   micp::{
      included::Included,
      protocol::{AttError, MICS_UUID, MUTE_UUID, MuteState},
   },
};

static MIC_DEV: OnceLock<MicDevice> = OnceLock::new();
static REGISTER_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Parameters for [`register`].
#[derive(Default, Clone)]
pub struct MicDevRegisterParam {
   /// One entry per AICS instance; must match the configured count.
   pub aics_param: Vec<AicsRegisterParam>,
   pub cb: Option<MicDevCallbackRef>,
}

/// Registers the process-wide mic device and publishes its service.
///
/// Fails with [`MicpError::AlreadyRegistered`] on every call after the first
/// successful one.
pub fn register(
   config: &MicDevConfig,
   param: MicDevRegisterParam,
   server: GattServerRef,
   aics: Option<&dyn AicsService>,
) -> Result<&'static MicDevice> {
   let _guard = REGISTER_LOCK.lock();
   if MIC_DEV.get().is_some() {
      return Err(MicpError::AlreadyRegistered);
   }
   let device = MicDevice::new(config, param, server, aics)?;
   MIC_DEV
      .set(device)
      .map_err(|_| MicpError::AlreadyRegistered)?;
   MIC_DEV.get().ok_or(MicpError::NotRegistered)
}

/// Returns the registered mic device.
pub fn instance() -> Result<&'static MicDevice> {
   MIC_DEV.get().ok_or(MicpError::NotRegistered)
}

/// Local microphone exposing its mute state over GATT.
pub struct MicDevice {
   state: AtomicCell<MuteState>,
   // Reentrant so callbacks may call back into the device.
   transition: ReentrantMutex<()>,
   included: Included,
   callbacks: Option<MicDevCallbackRef>,
   server: GattServerRef,
}

impl MicDevice {
   pub(crate) fn new(
      config: &MicDevConfig,
      param: MicDevRegisterParam,
      server: GattServerRef,
      aics: Option<&dyn AicsService>,
   ) -> Result<Self> {
      let included = Included::register(&param.aics_param, config.effective_aics_count(), aics)?;

      let service = ServiceDefinition {
         uuid: MICS_UUID,
         characteristics: vec![CharacteristicDefinition {
            uuid: MUTE_UUID,
            properties: Properties::from_bits(
               Properties::READ | Properties::WRITE | Properties::NOTIFY,
            ),
            with_ccc: true,
         }],
         included: included.aics().to_vec(),
      };
      if let Err(e) = server.register_service(&service) {
         warn!("MICP service registration refused: {e}");
         if let Some(aics) = aics {
            included.release(aics);
         }
         return Err(e.into());
      }

      info!(
         "Mic device registered with {} AICS instance(s)",
         included.aics_count()
      );

      Ok(Self {
         state: AtomicCell::new(MuteState::Unmuted),
         transition: ReentrantMutex::new(()),
         included,
         callbacks: param.cb,
         server,
      })
   }

   /// Unmutes; re-enables a disabled microphone.
   pub fn unmute(&self) {
      self.apply_local(MuteState::Unmuted);
   }

   /// Mutes; re-enables a disabled microphone.
   pub fn mute(&self) {
      self.apply_local(MuteState::Muted);
   }

   /// Disables the mute functionality until the next local `mute`/`unmute`.
   pub fn disable(&self) {
      self.apply_local(MuteState::Disabled);
   }

   /// Reads the current state and reports it to the callback.
   pub fn mute_get(&self) -> MuteState {
      let _guard = self.transition.lock();
      let state = self.state.load();
      self.dispatch(MicDevEvent::MuteRead(state));
      state
   }

   /// Current state, without callback.
   pub fn state(&self) -> MuteState {
      self.state.load()
   }

   pub fn included_get(&self) -> &Included {
      &self.included
   }

   /// Serves a remote read of the mute characteristic.
   pub fn read_mute(&self, conn: Connection) -> [u8; 1] {
      let value = self.state.load().encode();
      debug!("→ {conn}: mute {}", hex::encode(value));
      value
   }

   /// Serves a remote write of the mute characteristic.
   ///
   /// Returns the number of bytes consumed, or the ATT error to answer with.
   /// The state is left untouched whenever an error is returned.
   pub fn write_mute(
      &self,
      conn: Connection,
      offset: u16,
      data: &[u8],
   ) -> std::result::Result<usize, AttError> {
      debug!("← {conn}: mute write {}", hex::encode(data));

      if offset != 0 {
         warn!("{conn}: Rejecting mute write at offset {offset}");
         return Err(AttError::INVALID_OFFSET);
      }
      let [value] = data else {
         warn!("{conn}: Rejecting mute write of {} bytes", data.len());
         return Err(AttError::INVALID_ATTRIBUTE_LEN);
      };
      if !MuteState::is_writable(*value) {
         warn!("{conn}: Rejecting out-of-range mute value 0x{value:02x}");
         return Err(AttError::VAL_OUT_OF_RANGE);
      }
      let new = MuteState::from_repr(*value).ok_or(AttError::VAL_OUT_OF_RANGE)?;

      let _guard = self.transition.lock();
      let current = self.state.load();
      if current == MuteState::Disabled {
         warn!("{conn}: Rejecting mute write while disabled");
         return Err(AttError::MUTE_DISABLED);
      }
      if current == new {
         return Ok(data.len());
      }
      self.state.store(new);

      debug!("{conn}: Mute changed by peer: {current} -> {new}");
      self.on_changed(new);
      Ok(data.len())
   }

   pub fn to_json(&self) -> serde_json::Value {
      let aics: Vec<u16> = self.included.aics().iter().map(|a| a.raw()).collect();
      json!({
          "mute": self.state.load().to_str(),
          "aics": aics,
      })
   }

   fn apply_local(&self, new: MuteState) {
      let _guard = self.transition.lock();
      let prev = self.state.swap(new);
      if prev == new {
         debug!("Mute unchanged: {new}");
         return;
      }
      debug!("Mute changed locally: {prev} -> {new}");
      self.on_changed(new);
   }

   fn on_changed(&self, new: MuteState) {
      if let Err(e) = self.server.notify(MUTE_UUID, &new.encode()) {
         warn!("Failed to notify mute state {new}: {e}");
      }
      self.dispatch(MicDevEvent::MuteChanged(new));
   }

   fn dispatch(&self, event: MicDevEvent) {
      if let Some(cb) = &self.callbacks {
         cb.on_event(event);
      }
   }
}
