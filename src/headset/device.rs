//! Registered headset records and their persisted text form.
//!
//! A record is the tab separated triple `profile_code\taddress\tname`. The
//! name is the last field, so it may itself contain tabs.

use std::{fmt, str::FromStr};

use bluer::Address;
use serde_json::json;
use smol_str::SmolStr;

use crate::{
   error::{NoiseCtlError, Result},
   headset::profile::DeviceProfile,
};

const FIELD_SEPARATOR: char = '\t';

/// A headset the user has registered for noise control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
   pub profile: DeviceProfile,
   pub address: Address,
   pub name: SmolStr,
}

impl Device {
   /// Creates a device record.
   ///
   /// Line breaks in the name are replaced with spaces so the record always
   /// fits on a single line of the record store.
   pub fn new(profile: DeviceProfile, address: Address, name: &str) -> Self {
      let name = if name.contains(['\n', '\r']) {
         name.replace(['\n', '\r'], " ").into()
      } else {
         SmolStr::new(name)
      };
      Self {
         profile,
         address,
         name,
      }
   }

   /// Serializes the device into its record form.
   pub fn to_record(&self) -> String {
      self.to_string()
   }

   /// Parses a persisted record.
   ///
   /// Unknown profile codes map to the default profile instead of failing.
   pub fn parse_record(record: &str) -> Result<Self> {
      let malformed = |reason| NoiseCtlError::MalformedRecord {
         record: record.to_string(),
         reason,
      };

      let mut parts = record.splitn(3, FIELD_SEPARATOR);
      let (Some(code), Some(address), Some(name)) = (parts.next(), parts.next(), parts.next())
      else {
         return Err(malformed("expected 3 tab separated fields"));
      };

      let address = Address::from_str(address).map_err(|_| malformed("invalid address"))?;
      Ok(Self::new(DeviceProfile::from_code_lossy(code), address, name))
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
          "address": self.address.to_string(),
          "name": self.name.as_str(),
          "profile": self.profile.code(),
          "model": self.profile.display_name(),
      })
   }
}

impl fmt::Display for Device {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
         self.profile.code(),
         self.address,
         self.name
      )
   }
}

impl FromStr for Device {
   type Err = NoiseCtlError;

   fn from_str(s: &str) -> Result<Self> {
      Self::parse_record(s)
   }
}
