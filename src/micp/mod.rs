//! Microphone Input Control Profile roles.
//!
//! The mic device exposes and enforces the mute state; the controller
//! discovers remote mic devices and reads or writes their mute state.

pub mod controller;
pub mod discovery;
pub mod included;
pub mod mic_dev;
pub mod protocol;
