//! Durable registry of headsets the user has registered.
//!
//! The registry keeps an immutable address-keyed snapshot behind an
//! `RwLock<Arc<_>>`: readers clone the `Arc` and never observe a partially
//! applied mutation. Mutations are serialized by a separate writer lock and
//! rewrite the whole record set before the new snapshot is published.

use std::{
   collections::HashMap,
   fs,
   path::{Path, PathBuf},
   sync::Arc,
};

use bluer::Address;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
   error::Result,
   event::{EventSender, ServiceEvent},
   headset::{device::Device, profile::DeviceProfile},
};

pub type DeviceMap = HashMap<Address, Device>;

/// Backing storage for the serialized record set.
pub trait RecordStore: Send + Sync {
   /// Reads every persisted record.
   fn read_records(&self) -> Result<Vec<String>>;

   /// Replaces the persisted record set.
   fn write_records(&self, records: &[String]) -> Result<()>;
}

/// Record store keeping one record per line in a text file.
#[derive(Debug, Clone)]
pub struct FileStore {
   path: PathBuf,
}

impl FileStore {
   pub fn new(path: impl Into<PathBuf>) -> Self {
      Self { path: path.into() }
   }

   pub fn path(&self) -> &Path {
      &self.path
   }
}

impl RecordStore for FileStore {
   fn read_records(&self) -> Result<Vec<String>> {
      if !self.path.exists() {
         debug!("No device records at {}", self.path.display());
         return Ok(Vec::new());
      }
      let contents = fs::read_to_string(&self.path)?;
      Ok(contents
         .lines()
         .filter(|line| !line.trim().is_empty())
         .map(str::to_string)
         .collect())
   }

   fn write_records(&self, records: &[String]) -> Result<()> {
      if let Some(parent) = self.path.parent() {
         fs::create_dir_all(parent)?;
      }

      let mut contents = records.join("\n");
      contents.push('\n');

      // Rename over the old file so a crash never leaves a truncated set.
      let tmp = self.path.with_extension("tmp");
      fs::write(&tmp, contents)?;
      fs::rename(&tmp, &self.path)?;
      Ok(())
   }
}

/// In-process record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
   records: Mutex<Vec<String>>,
}

impl MemoryStore {
   pub fn new(records: impl IntoIterator<Item = impl Into<String>>) -> Self {
      Self {
         records: Mutex::new(records.into_iter().map(Into::into).collect()),
      }
   }

   pub fn records(&self) -> Vec<String> {
      self.records.lock().clone()
   }
}

impl RecordStore for MemoryStore {
   fn read_records(&self) -> Result<Vec<String>> {
      Ok(self.records())
   }

   fn write_records(&self, records: &[String]) -> Result<()> {
      *self.records.lock() = records.to_vec();
      Ok(())
   }
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
   fn read_records(&self) -> Result<Vec<String>> {
      (**self).read_records()
   }

   fn write_records(&self, records: &[String]) -> Result<()> {
      (**self).write_records(records)
   }
}

/// A persisted record ignored during load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
   pub record: String,
   pub reason: String,
}

/// Outcome of reading the record store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
   pub loaded: usize,
   pub skipped: Vec<SkippedRecord>,
}

/// Address-keyed set of registered devices.
pub struct DeviceRegistry {
   store: Box<dyn RecordStore>,
   events: EventSender,
   snapshot: RwLock<Arc<DeviceMap>>,
   writer: Mutex<()>,
}

impl DeviceRegistry {
   /// Loads the registry from a record store.
   ///
   /// Malformed records are skipped and reported, they never fail the load.
   pub fn load(
      store: impl RecordStore + 'static,
      events: EventSender,
   ) -> Result<(Self, LoadReport)> {
      let registry = Self {
         store: Box::new(store),
         events,
         snapshot: RwLock::new(Arc::default()),
         writer: Mutex::new(()),
      };
      let report = registry.reload()?;
      Ok((registry, report))
   }

   /// Re-reads the record store, replacing the in-memory set.
   pub fn reload(&self) -> Result<LoadReport> {
      let _guard = self.writer.lock();

      let records = self.store.read_records()?;
      let (devices, skipped) = parse_records(&records);
      let report = LoadReport {
         loaded: devices.len(),
         skipped,
      };
      info!(
         "Loaded {} registered devices ({} skipped)",
         report.loaded,
         report.skipped.len()
      );

      for skipped in &report.skipped {
         self.events.emit(ServiceEvent::RecordSkipped {
            record: skipped.record.clone(),
            reason: skipped.reason.clone(),
         });
      }
      self.publish(devices);
      Ok(report)
   }

   /// Registers a device, replacing any record with the same address.
   pub fn add(&self, profile: DeviceProfile, address: Address, name: &str) -> Result<Device> {
      let device = Device::new(profile, address, name);
      self.mutate(|devices| {
         devices.insert(address, device.clone());
      })?;
      info!("Registered {} {address} ({})", profile.display_name(), device.name);
      Ok(device)
   }

   /// Removes a device. Removing an unknown address is a no-op.
   pub fn remove(&self, address: Address) -> Result<Option<Device>> {
      let mut removed = None;
      self.mutate(|devices| {
         removed = devices.remove(&address);
      })?;
      if let Some(device) = &removed {
         info!("Unregistered {address} ({})", device.name);
      }
      Ok(removed)
   }

   /// Consistent snapshot of the registered devices.
   pub fn snapshot(&self) -> Arc<DeviceMap> {
      self.snapshot.read().clone()
   }

   /// All registered devices, ordered by address.
   pub fn all_devices(&self) -> Vec<Device> {
      let mut devices: Vec<_> = self.snapshot().values().cloned().collect();
      devices.sort_by_key(|d| d.address.0);
      devices
   }

   pub fn get(&self, address: Address) -> Option<Device> {
      self.snapshot().get(&address).cloned()
   }

   pub fn contains(&self, address: Address) -> bool {
      self.snapshot().contains_key(&address)
   }

   pub fn len(&self) -> usize {
      self.snapshot().len()
   }

   pub fn is_empty(&self) -> bool {
      self.snapshot().is_empty()
   }

   fn mutate(&self, f: impl FnOnce(&mut DeviceMap)) -> Result<()> {
      let _guard = self.writer.lock();

      let mut devices = DeviceMap::clone(&self.snapshot());
      f(&mut devices);

      self.store.write_records(&serialize(&devices))?;
      self.publish(devices);
      Ok(())
   }

   fn publish(&self, devices: DeviceMap) {
      let count = devices.len();
      *self.snapshot.write() = Arc::new(devices);
      self.events.emit(ServiceEvent::RegistryChanged { devices: count });
   }
}

fn parse_records(records: &[String]) -> (DeviceMap, Vec<SkippedRecord>) {
   let mut devices = DeviceMap::new();
   let mut skipped = Vec::new();
   for record in records {
      match Device::parse_record(record) {
         Ok(device) => {
            devices.insert(device.address, device);
         },
         Err(e) => {
            warn!("Skipping device record: {e}");
            skipped.push(SkippedRecord {
               record: record.clone(),
               reason: e.to_string(),
            });
         },
      }
   }
   (devices, skipped)
}

fn serialize(devices: &DeviceMap) -> Vec<String> {
   let mut devices: Vec<_> = devices.values().collect();
   devices.sort_by_key(|d| d.address.0);
   devices.into_iter().map(Device::to_record).collect()
}
