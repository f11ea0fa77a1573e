//! Registration of bonded headsets by vendor address prefix.

use bluer::Address;
use log::{debug, info};

use crate::{
   error::Result,
   headset::{profile::DeviceProfile, registry::DeviceRegistry},
};

/// Keeps the bonded devices whose address starts with a known vendor prefix.
pub fn vendor_filter<N>(
   bonded: impl IntoIterator<Item = (Address, N)>,
   prefixes: &[String],
) -> impl Iterator<Item = (Address, N)> {
   bonded.into_iter().filter(move |(address, _)| {
      let address = address.to_string();
      prefixes.iter().any(|pfx| {
         address
            .get(..pfx.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(pfx))
      })
   })
}

/// Registers bonded vendor devices that are not registered yet.
///
/// Existing records are left untouched. Returns how many were added.
pub fn offer_bonded<N: AsRef<str>>(
   registry: &DeviceRegistry,
   bonded: impl IntoIterator<Item = (Address, N)>,
   prefixes: &[String],
   profile: DeviceProfile,
) -> Result<usize> {
   let mut added = 0;
   for (address, name) in vendor_filter(bonded, prefixes) {
      if registry.contains(address) {
         debug!("{address} already registered");
         continue;
      }
      registry.add(profile, address, name.as_ref())?;
      added += 1;
   }
   if added > 0 {
      info!("Registered {added} bonded devices");
   }
   Ok(added)
}
