//! GATT collaborators consumed by the profile.
//!
//! This module defines the transport and AICS seams the MICP roles are
//! written against.

pub mod aics;
pub mod transport;
