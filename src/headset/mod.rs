//! Headset records, registry and command protocol.
//!
//! This module contains everything model specific: which headsets are
//! registered, how they are persisted, and which frame switches each model.

pub mod device;
pub mod discovery;
pub mod profile;
pub mod protocol;
pub mod registry;
