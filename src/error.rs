//! Error types for the noise control service.
//!
//! This module defines the crate-wide error type along with the transport
//! and delivery errors that are reported per device during a dispatch.

use bluer::Address;
use thiserror::Error;

use crate::headset::{profile::DeviceProfile, protocol::Mode};

/// Main error type for the noise control service.
#[derive(Error, Debug)]
pub enum NoiseCtlError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Malformed device record {record:?}: {reason}")]
   MalformedRecord { record: String, reason: &'static str },

   #[error("No command frame for {profile} in mode {mode}")]
   UnsupportedCommand { profile: DeviceProfile, mode: Mode },

   #[error("Invalid address: {0}")]
   InvalidAddress(String),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Adapter not found: {0}")]
   AdapterNotFound(String),

   #[error("Dispatcher has been shut down")]
   DispatcherShutdown,
}

/// Failure of a single transport session.
///
/// Every variant except `RadioDisabled` names the device it happened on and
/// carries the platform's description of what went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
   #[error("Bluetooth radio is disabled")]
   RadioDisabled,

   #[error("Failed to connect to {address}: {detail}")]
   ConnectFailed { address: Address, detail: String },

   #[error("Failed to open output stream to {address}: {detail}")]
   StreamFailed { address: Address, detail: String },

   #[error("Failed to write frame to {address} (repetition {repetition}): {detail}")]
   WriteFailed {
      address: Address,
      repetition: u32,
      detail: String,
   },
}

/// Reason a device did not receive its frame during a dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
   #[error(transparent)]
   Transport(#[from] TransportError),

   #[error("No command frame for {profile} in mode {mode}")]
   Unsupported { profile: DeviceProfile, mode: Mode },
}

impl DeliveryError {
   /// Short machine-readable name of the failure kind.
   pub const fn kind(&self) -> &'static str {
      match self {
         Self::Transport(TransportError::RadioDisabled) => "radio_disabled",
         Self::Transport(TransportError::ConnectFailed { .. }) => "connect_failed",
         Self::Transport(TransportError::StreamFailed { .. }) => "stream_failed",
         Self::Transport(TransportError::WriteFailed { .. }) => "write_failed",
         Self::Unsupported { .. } => "unsupported_command",
      }
   }
}

impl From<NoiseCtlError> for zbus::fdo::Error {
   fn from(e: NoiseCtlError) -> Self {
      match e {
         NoiseCtlError::InvalidAddress(_) | NoiseCtlError::MalformedRecord { .. } => {
            Self::InvalidArgs(e.to_string())
         },
         NoiseCtlError::DBusConnection(e) => e,
         e => Self::Failed(e.to_string()),
      }
   }
}

/// Convenience type alias for Results with `NoiseCtlError`.
pub type Result<T> = std::result::Result<T, NoiseCtlError>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_fdo_error_mapping() {
      let invalid = zbus::fdo::Error::from(NoiseCtlError::InvalidAddress("zz".to_string()));
      assert!(matches!(invalid, zbus::fdo::Error::InvalidArgs(msg) if msg.contains("zz")));

      let missing = zbus::fdo::Error::from(NoiseCtlError::AdapterNotFound("hci7".to_string()));
      assert!(matches!(missing, zbus::fdo::Error::Failed(msg) if msg == "Adapter not found: hci7"));
   }
}
