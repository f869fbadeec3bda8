//! Microphone Input Control Profile (MICP).
//!
//! A mic device role ([`mic_dev`](micp::mic_dev)) owning a process-wide mute
//! state, and a controller role ([`MicpController`]) that discovers the MICP
//! service on peer connections and drives it. Both roles sit on top of the
//! GATT and AICS seams in [`gatt`], which the host stack implements.

pub mod config;
pub mod error;
pub mod event;
pub mod gatt;
pub mod micp;

#[cfg(test)]
mod testing;

pub use config::{Config, MicCtlrConfig, MicDevConfig};
pub use error::{GattError, MicpError, Result};
pub use event::{
   ControllerCallbacks, ControllerEvent, EventQueue, EventSender, MicDevCallbacks, MicDevEvent,
   WriteOp,
};
pub use micp::{
   controller::{MicpController, MicpHandle},
   mic_dev::{MicDevRegisterParam, MicDevice},
   protocol::{AttError, MuteState},
};
