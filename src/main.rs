//! Noise control D-Bus service for Bose headsets
//!
//! This service exposes the device registry and noise cancellation
//! requests on the session bus, and forwards registry and dispatch events
//! as signals.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use noisectl::{
   bluetooth::bluez::BluezPlatform,
   config::Config,
   dbus::{NoiseControlService, NoiseControlServiceSignals},
   dispatch::{DispatchCoordinator, DispatchReport, Dispatcher},
   error::Result,
   event::{EventBus, ServiceEvent},
   headset::registry::{DeviceRegistry, FileStore},
};

const OBJECT_PATH: &str = "/org/noisectl/manager";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting noisectl D-Bus service...");

   // Load configuration
   let config = Config::load()?;

   // Create event channel
   let event_bus = EventProcessor::new();

   // Load the device registry
   let store = FileStore::new(Config::devices_path()?);
   info!("Reading devices from {}", store.path().display());
   let (registry, report) = DeviceRegistry::load(store, event_bus.clone())?;
   info!(
      "Loaded {} devices ({} records skipped)",
      report.loaded,
      report.skipped.len()
   );
   let registry = Arc::new(registry);

   let platform = Arc::new(BluezPlatform::new(&config).await?);

   // Spawn the dispatch worker
   let coordinator =
      DispatchCoordinator::new(platform.clone(), registry.clone(), config.send_options())
         .parallel(config.parallel_dispatch);
   let dispatcher = Dispatcher::spawn(coordinator, event_bus.clone(), config.coalesce_requests);

   // Create D-Bus service
   let service = NoiseControlService::new(dispatcher, registry, platform, &config);

   if config.import_bonded {
      match service.import_bonded_devices().await {
         Ok(0) => {},
         Ok(added) => info!("Imported {added} bonded devices"),
         Err(e) => warn!("Failed to import bonded devices: {e}"),
      }
   }

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.noisectl")?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("noisectl D-Bus service started at org.noisectl");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down noisectl service...");

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<ServiceEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<ServiceEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(
      &self,
      iface: &InterfaceRef<NoiseControlService>,
      event: ServiceEvent,
   ) -> Result<()> {
      match event {
         ServiceEvent::RegistryChanged { devices } => {
            iface
               .registry_changed(u32::try_from(devices).unwrap_or(u32::MAX))
               .await?;
            let service = iface.get().await;
            service.devices_changed(iface.signal_emitter()).await?;
            service.device_count_changed(iface.signal_emitter()).await?;
         },
         ServiceEvent::RecordSkipped { record, reason } => {
            iface.record_skipped(&record, &reason).await?;
         },
         ServiceEvent::DispatchCompleted(report) => {
            if let DispatchReport::NoDevicesConnected { .. } = report {
               iface.no_devices_connected().await?;
            }
            for message in report.messages() {
               info!("{message}");
            }
            iface
               .dispatch_completed(&report.to_json().to_string())
               .await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, NoiseControlService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: ServiceEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
