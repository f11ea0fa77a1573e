//! Noise control protocol definitions for Bose headsets.
//!
//! Frames are written verbatim on the serial port channel: no length prefix,
//! no checksum. The headsets answer with acknowledgement frames which this
//! service never reads.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
   error::{NoiseCtlError, Result},
   headset::profile::DeviceProfile,
};

/// Noise cancelling strength requested by the user.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::EnumIter,
)]
#[repr(u8)]
pub enum NoiseLevel {
   /// Level 0, lets ambient sound through (transparency).
   Low = 0,
   Medium = 5,
   High = 10,
}

impl NoiseLevel {
   pub const fn value(self) -> u8 {
      self as u8
   }
}

/// Noise control mode, independent of the headset model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
   NoiseCancelling(NoiseLevel),
   Off,
}

impl Mode {
   /// Parses a level token from the command intent interface.
   ///
   /// Accepts `"10"`, `"5"`, `"0"` and `"off"`; anything else is `Off`.
   pub fn from_token(token: &str) -> Self {
      match token {
         "10" => Self::NoiseCancelling(NoiseLevel::High),
         "5" => Self::NoiseCancelling(NoiseLevel::Medium),
         "0" => Self::NoiseCancelling(NoiseLevel::Low),
         _ => Self::Off,
      }
   }

   pub fn token(self) -> &'static str {
      match self {
         Self::NoiseCancelling(NoiseLevel::High) => "10",
         Self::NoiseCancelling(NoiseLevel::Medium) => "5",
         Self::NoiseCancelling(NoiseLevel::Low) => "0",
         Self::Off => "off",
      }
   }

   /// Every mode a profile has to provide a frame for.
   pub fn all() -> impl Iterator<Item = Self> {
      NoiseLevel::iter()
         .map(Self::NoiseCancelling)
         .chain([Self::Off])
   }
}

impl fmt::Display for Mode {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::NoiseCancelling(level) => write!(f, "nc{}", level.value()),
         Self::Off => f.write_str("off"),
      }
   }
}

/// Fixed binary command sent to a headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame(&'static [u8]);

impl CommandFrame {
   pub const fn as_bytes(&self) -> &'static [u8] {
      self.0
   }

   pub const fn len(&self) -> usize {
      self.0.len()
   }

   pub const fn is_empty(&self) -> bool {
      self.0.is_empty()
   }
}

impl fmt::Display for CommandFrame {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      for (i, b) in self.0.iter().enumerate() {
         if i > 0 {
            f.write_str(" ")?;
         }
         write!(f, "{b:02X}")?;
      }
      Ok(())
   }
}

// NC 700: 01 05 02 02 <10 - level> <enabled>
// Toggling `enabled` always starts the headset at level 10, hence the repeats.
pub const PKT_700_OFF: &[u8] = &[0x01, 0x05, 0x02, 0x02, 0x00, 0x00];
pub const PKT_700_NC_0: &[u8] = &[0x01, 0x05, 0x02, 0x02, 0x0A, 0x01];
pub const PKT_700_NC_5: &[u8] = &[0x01, 0x05, 0x02, 0x02, 0x05, 0x01];
pub const PKT_700_NC_10: &[u8] = &[0x01, 0x05, 0x02, 0x02, 0x00, 0x01];

// QC 35: 01 06 02 01 <level>, 0 = off, 1 = high, 2 = medium, 3 = low
pub const PKT_QC35_OFF: &[u8] = &[0x01, 0x06, 0x02, 0x01, 0x00];
pub const PKT_QC35_HIGH: &[u8] = &[0x01, 0x06, 0x02, 0x01, 0x01];
pub const PKT_QC35_MEDIUM: &[u8] = &[0x01, 0x06, 0x02, 0x01, 0x02];
pub const PKT_QC35_LOW: &[u8] = &[0x01, 0x06, 0x02, 0x01, 0x03];

pub type FrameTable = [(DeviceProfile, Mode, &'static [u8])];

/// Frame for every supported (profile, mode) pair.
pub static FRAME_TABLE: &FrameTable = &[
   (DeviceProfile::NC700, Mode::Off, PKT_700_OFF),
   (DeviceProfile::NC700, Mode::NoiseCancelling(NoiseLevel::Low), PKT_700_NC_0),
   (DeviceProfile::NC700, Mode::NoiseCancelling(NoiseLevel::Medium), PKT_700_NC_5),
   (DeviceProfile::NC700, Mode::NoiseCancelling(NoiseLevel::High), PKT_700_NC_10),
   (DeviceProfile::QC35, Mode::Off, PKT_QC35_OFF),
   (DeviceProfile::QC35, Mode::NoiseCancelling(NoiseLevel::High), PKT_QC35_HIGH),
   (DeviceProfile::QC35, Mode::NoiseCancelling(NoiseLevel::Medium), PKT_QC35_MEDIUM),
   (DeviceProfile::QC35, Mode::NoiseCancelling(NoiseLevel::Low), PKT_QC35_LOW),
];

/// Looks up the command frame for a profile and mode.
pub fn encode(profile: DeviceProfile, mode: Mode) -> Result<CommandFrame> {
   encode_with(FRAME_TABLE, profile, mode)
}

pub fn encode_with(table: &FrameTable, profile: DeviceProfile, mode: Mode) -> Result<CommandFrame> {
   table
      .iter()
      .find(|(p, m, _)| *p == profile && *m == mode)
      .map(|(_, _, frame)| CommandFrame(frame))
      .ok_or(NoiseCtlError::UnsupportedCommand { profile, mode })
}
