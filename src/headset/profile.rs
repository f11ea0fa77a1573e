//! Headset models and their command dialects.

use log::debug;
use serde::{Deserialize, Serialize};

/// Identifies which command table applies to a device.
///
/// The short code is what gets persisted in device records. Adding a model
/// means adding a variant here and its rows in the frame table.
#[derive(
   Debug,
   Default,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   PartialOrd,
   Ord,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
pub enum DeviceProfile {
   /// Bose Noise Cancelling Headphones 700
   #[default]
   #[serde(rename = "700")]
   #[strum(serialize = "700")]
   NC700,
   /// Bose QuietComfort 35
   #[serde(rename = "qc35")]
   #[strum(serialize = "qc35")]
   QC35,
}

impl DeviceProfile {
   /// Short machine code used in persisted records.
   pub fn code(self) -> &'static str {
      self.into()
   }

   pub const fn display_name(self) -> &'static str {
      match self {
         Self::NC700 => "Bose NC 700",
         Self::QC35 => "Bose QC 35",
      }
   }

   /// Parses a record code, falling back to the default profile for
   /// anything unrecognised.
   pub fn from_code_lossy(code: &str) -> Self {
      code.parse().unwrap_or_else(|_| {
         debug!("Unknown profile code {code:?}, assuming {}", Self::default());
         Self::default()
      })
   }
}
