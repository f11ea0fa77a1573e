//! Detection of registered devices that are connected for audio.

use std::collections::HashSet;

use log::{debug, warn};

use crate::{
   bluetooth::AudioEndpoints,
   headset::{device::Device, registry::DeviceRegistry},
};

/// Point-in-time query of which registered devices are connected.
pub struct ConnectionProbe<'a, P> {
   platform: &'a P,
}

impl<'a, P: AudioEndpoints> ConnectionProbe<'a, P> {
   pub const fn new(platform: &'a P) -> Self {
      Self { platform }
   }

   /// Registered devices whose address is an active audio output.
   ///
   /// Returns an empty set when the radio is off or the platform query fails.
   pub async fn connected_devices(&self, registry: &DeviceRegistry) -> HashSet<Device> {
      if !self.platform.radio_enabled().await {
         debug!("Radio disabled, no devices connected");
         return HashSet::new();
      }

      let outputs = match self.platform.active_audio_outputs().await {
         Ok(outputs) => outputs,
         Err(e) => {
            warn!("Failed to query audio outputs: {e}");
            return HashSet::new();
         },
      };

      let registered = registry.snapshot();
      let connected: HashSet<_> = outputs
         .iter()
         .filter_map(|addr| registered.get(addr).cloned())
         .collect();
      debug!(
         "{} of {} registered devices connected ({} audio outputs)",
         connected.len(),
         registered.len(),
         outputs.len()
      );
      connected
   }
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;

   use bluer::Address;

   use super::*;
   use crate::{
      bluetooth::mock::MockPlatform,
      event::NullBus,
      headset::{profile::DeviceProfile, registry::MemoryStore},
   };

   const BOSE_700: Address = Address([0xC8, 0x7B, 0x23, 0x00, 0x00, 0x01]);
   const BOSE_QC35: Address = Address([0xC8, 0x7B, 0x23, 0x00, 0x00, 0x02]);
   const SPEAKER: Address = Address([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

   fn registry() -> DeviceRegistry {
      let store = MemoryStore::new([
         "700\tC8:7B:23:00:00:01\tBose 700",
         "qc35\tC8:7B:23:00:00:02\tQC35",
      ]);
      DeviceRegistry::load(store, Arc::new(NullBus)).unwrap().0
   }

   #[tokio::test]
   async fn test_intersects_registry_with_outputs() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700, SPEAKER]);

      let connected = ConnectionProbe::new(&platform)
         .connected_devices(&registry())
         .await;

      let expected: HashSet<_> = [Device::new(DeviceProfile::NC700, BOSE_700, "Bose 700")].into();
      assert_eq!(connected, expected);
   }

   #[tokio::test]
   async fn test_all_connected() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700, BOSE_QC35]);

      let connected = ConnectionProbe::new(&platform)
         .connected_devices(&registry())
         .await;
      assert_eq!(connected.len(), 2);
   }

   #[tokio::test]
   async fn test_radio_disabled_yields_nothing() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700, BOSE_QC35]);
      platform.set_radio(false);

      let connected = ConnectionProbe::new(&platform)
         .connected_devices(&registry())
         .await;
      assert!(connected.is_empty());
   }

   #[tokio::test]
   async fn test_no_outputs() {
      let platform = MockPlatform::new();
      let connected = ConnectionProbe::new(&platform)
         .connected_devices(&registry())
         .await;
      assert!(connected.is_empty());
   }
}
