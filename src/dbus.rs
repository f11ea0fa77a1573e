use std::{str::FromStr, sync::Arc};

use bluer::Address;
use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::{
   bluetooth::{bluez::BluezPlatform, probe::ConnectionProbe},
   config::Config,
   dispatch::Dispatcher,
   error::{self, NoiseCtlError},
   headset::{
      device::Device, discovery, profile::DeviceProfile, protocol::Mode, registry::DeviceRegistry,
   },
};

pub struct NoiseControlService {
   dispatcher: Dispatcher,
   registry: Arc<DeviceRegistry>,
   platform: Arc<BluezPlatform>,
   vendor_prefixes: Vec<String>,
   default_profile: DeviceProfile,
}

impl NoiseControlService {
   pub fn new(
      dispatcher: Dispatcher,
      registry: Arc<DeviceRegistry>,
      platform: Arc<BluezPlatform>,
      config: &Config,
   ) -> Self {
      Self {
         dispatcher,
         registry,
         platform,
         vendor_prefixes: config.vendor_prefixes.clone(),
         default_profile: config.default_profile,
      }
   }

   /// Registers bonded vendor devices not known yet.
   pub async fn import_bonded_devices(&self) -> error::Result<usize> {
      let bonded = self.platform.bonded_devices().await?;
      discovery::offer_bonded(
         &self.registry,
         bonded.into_iter().map(|b| (b.address, b.name)),
         &self.vendor_prefixes,
         self.default_profile,
      )
   }
}

fn parse_address(address: &str) -> error::Result<Address> {
   Address::from_str(address).map_err(|_| NoiseCtlError::InvalidAddress(address.to_string()))
}

fn saturating_u32(n: usize) -> u32 {
   u32::try_from(n).unwrap_or(u32::MAX)
}

fn devices_json<'a>(devices: impl IntoIterator<Item = &'a Device>) -> String {
   serde_json::Value::Array(devices.into_iter().map(Device::to_json).collect()).to_string()
}

#[interface(name = "org.noisectl.Manager")]
impl NoiseControlService {
   /// Queues a mode change for every connected device.
   async fn request_mode(&self, level: String) -> zbus::fdo::Result<bool> {
      let mode = Mode::from_token(&level);
      self.dispatcher.request_mode(mode).await?;
      info!("Queued {mode} (level {level:?})");
      Ok(true)
   }

   /// Changes the mode and returns the JSON dispatch report.
   async fn set_mode(&self, level: String) -> zbus::fdo::Result<String> {
      let report = self.dispatcher.dispatch_now(Mode::from_token(&level)).await?;
      Ok(report.to_json().to_string())
   }

   async fn get_devices(&self) -> zbus::fdo::Result<String> {
      Ok(devices_json(&self.registry.all_devices()))
   }

   async fn connected_devices(&self) -> zbus::fdo::Result<String> {
      let mut connected: Vec<_> = ConnectionProbe::new(&*self.platform)
         .connected_devices(&self.registry)
         .await
         .into_iter()
         .collect();
      connected.sort_by_key(|d| d.address.0);
      Ok(devices_json(&connected))
   }

   async fn add_device(
      &self,
      profile: String,
      address: String,
      name: String,
   ) -> zbus::fdo::Result<bool> {
      let profile = DeviceProfile::from_str(&profile).map_err(|_| {
         zbus::fdo::Error::InvalidArgs(format!("Unknown device profile: {profile}"))
      })?;
      let addr = parse_address(&address)?;

      self.registry.add(profile, addr, &name)?;
      Ok(true)
   }

   async fn remove_device(&self, address: String) -> zbus::fdo::Result<bool> {
      let addr = parse_address(&address)?;
      Ok(self.registry.remove(addr)?.is_some())
   }

   /// Re-reads the device records, returns how many were skipped.
   async fn reload_devices(&self) -> zbus::fdo::Result<u32> {
      let report = self.registry.reload()?;
      Ok(saturating_u32(report.skipped.len()))
   }

   /// Registers bonded vendor devices, returns how many were added.
   async fn import_bonded(&self) -> zbus::fdo::Result<u32> {
      Ok(saturating_u32(self.import_bonded_devices().await?))
   }

   // Signals
   #[zbus(signal)]
   pub async fn dispatch_completed(emitter: &SignalEmitter<'_>, report: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn no_devices_connected(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn registry_changed(emitter: &SignalEmitter<'_>, count: u32) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn record_skipped(
      emitter: &SignalEmitter<'_>,
      record: &str,
      reason: &str,
   ) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn devices(&self) -> String {
      devices_json(&self.registry.all_devices())
   }

   #[zbus(property)]
   async fn device_count(&self) -> u32 {
      saturating_u32(self.registry.len())
   }
}
