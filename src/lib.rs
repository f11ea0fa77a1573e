//! Noise cancellation control for Bose headsets over Bluetooth.
//!
//! The crate keeps a persistent registry of known headsets, finds which of
//! them are currently connected as audio outputs, and pushes the command
//! frame for a requested noise cancellation level to each of them over a
//! serial port (RFCOMM) channel. The daemon in `main.rs` exposes this on the
//! session bus.

pub mod bluetooth;
pub mod config;
pub mod dbus;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod headset;
