//! Delivery of mode requests to every connected headset.
//!
//! [`DispatchCoordinator`] resolves the connected devices, encodes the mode
//! for each one and runs a transport session per device, collecting every
//! outcome. [`Dispatcher`] runs a coordinator on its own task and feeds it
//! mode requests in FIFO order, so callers never block on the transport.

use std::{collections::VecDeque, sync::Arc};

use futures::future::join_all;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::{
   bluetooth::{
      AudioEndpoints, Connector,
      probe::ConnectionProbe,
      rfcomm::{SendOptions, TransportSession},
   },
   error::{DeliveryError, NoiseCtlError, Result},
   event::{EventSender, ServiceEvent},
   headset::{
      device::Device,
      protocol::{self, Mode},
      registry::DeviceRegistry,
   },
};

/// Queued requests before `request_mode` starts waiting
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Outcome of delivering a mode to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
   pub device: Device,
   pub outcome: std::result::Result<(), DeliveryError>,
}

impl DeviceReport {
   pub fn to_json(&self) -> serde_json::Value {
      let mut info = self.device.to_json();
      match &self.outcome {
         Ok(()) => info["ok"] = json!(true),
         Err(e) => {
            info["ok"] = json!(false);
            info["error"] = json!(e.kind());
            info["detail"] = json!(e.to_string());
         },
      }
      info
   }
}

/// Aggregate result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
   /// No registered device was connected; nothing was sent.
   NoDevicesConnected { mode: Mode },
   Completed { mode: Mode, devices: Vec<DeviceReport> },
}

impl DispatchReport {
   pub const fn mode(&self) -> Mode {
      match self {
         Self::NoDevicesConnected { mode } | Self::Completed { mode, .. } => *mode,
      }
   }

   pub fn devices(&self) -> &[DeviceReport] {
      match self {
         Self::NoDevicesConnected { .. } => &[],
         Self::Completed { devices, .. } => devices,
      }
   }

   pub fn failures(&self) -> impl Iterator<Item = (&Device, &DeliveryError)> {
      self
         .devices()
         .iter()
         .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.device, e)))
   }

   /// Whether every connected device received the frame.
   pub fn is_success(&self) -> bool {
      matches!(self, Self::Completed { .. }) && self.failures().next().is_none()
   }

   /// Human readable messages, one per problem.
   pub fn messages(&self) -> Vec<String> {
      match self {
         Self::NoDevicesConnected { .. } => vec!["No configured devices connected.".to_string()],
         Self::Completed { .. } => self
            .failures()
            .map(|(device, e)| format!("ERROR: {}: {e}", device.name))
            .collect(),
      }
   }

   pub fn to_json(&self) -> serde_json::Value {
      let status = match self {
         Self::NoDevicesConnected { .. } => "no_devices_connected",
         Self::Completed { .. } => "completed",
      };
      json!({
          "mode": self.mode().token(),
          "status": status,
          "devices": self.devices().iter().map(DeviceReport::to_json).collect::<Vec<_>>(),
      })
   }
}

/// Sends a mode to every registered device that is currently connected.
pub struct DispatchCoordinator<P> {
   platform: Arc<P>,
   registry: Arc<DeviceRegistry>,
   options: SendOptions,
   parallel: bool,
}

impl<P: AudioEndpoints + Connector> DispatchCoordinator<P> {
   pub fn new(platform: Arc<P>, registry: Arc<DeviceRegistry>, options: SendOptions) -> Self {
      Self {
         platform,
         registry,
         options,
         parallel: false,
      }
   }

   /// Runs the sessions of one dispatch concurrently instead of one after
   /// the other.
   pub fn parallel(mut self, parallel: bool) -> Self {
      self.parallel = parallel;
      self
   }

   pub async fn dispatch(&self, mode: Mode) -> DispatchReport {
      let connected = ConnectionProbe::new(&*self.platform)
         .connected_devices(&self.registry)
         .await;
      if connected.is_empty() {
         info!("No configured devices connected, dropping {mode}");
         return DispatchReport::NoDevicesConnected { mode };
      }

      info!("Dispatching {mode} to {} devices", connected.len());
      let mut devices = if self.parallel {
         join_all(connected.into_iter().map(|d| self.deliver(d, mode))).await
      } else {
         let mut reports = Vec::with_capacity(connected.len());
         for device in connected {
            reports.push(self.deliver(device, mode).await);
         }
         reports
      };
      devices.sort_by_key(|r| r.device.address.0);

      DispatchReport::Completed { mode, devices }
   }

   async fn deliver(&self, device: Device, mode: Mode) -> DeviceReport {
      let outcome = match protocol::encode(device.profile, mode) {
         Ok(frame) => TransportSession::new(&*self.platform, device.address)
            .send(&frame, &self.options)
            .await
            .map_err(DeliveryError::from),
         Err(e) => {
            debug!("{e}");
            Err(DeliveryError::Unsupported {
               profile: device.profile,
               mode,
            })
         },
      };
      if let Err(e) = &outcome {
         warn!("Failed to set {mode} on {} ({}): {e}", device.name, device.address);
      }
      DeviceReport { device, outcome }
   }
}

struct Request {
   mode: Mode,
   reply: Option<oneshot::Sender<DispatchReport>>,
}

/// Handle to the dispatch worker.
///
/// This type is cheaply cloneable.
#[derive(Clone)]
pub struct Dispatcher {
   inbox: mpsc::Sender<Request>,
}

impl Dispatcher {
   /// Spawns the worker task.
   ///
   /// With `coalesce`, a queued fire-and-forget request is dropped when a
   /// newer request is already waiting behind it.
   pub fn spawn<P>(coordinator: DispatchCoordinator<P>, events: EventSender, coalesce: bool) -> Self
   where
      P: AudioEndpoints + Connector + 'static,
   {
      let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(
         DispatchWorker {
            coordinator,
            events,
            coalesce,
            inbox: rx,
            backlog: VecDeque::new(),
         }
         .run(),
      );
      Self { inbox: tx }
   }

   /// Queues a mode request without waiting for it to be delivered.
   pub async fn request_mode(&self, mode: Mode) -> Result<()> {
      self
         .inbox
         .send(Request { mode, reply: None })
         .await
         .map_err(|_| NoiseCtlError::DispatcherShutdown)
   }

   /// Queues a mode request and waits for its report.
   pub async fn dispatch_now(&self, mode: Mode) -> Result<DispatchReport> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(Request {
            mode,
            reply: Some(tx),
         })
         .await
         .map_err(|_| NoiseCtlError::DispatcherShutdown)?;
      rx.await.map_err(|_| NoiseCtlError::DispatcherShutdown)
   }
}

struct DispatchWorker<P> {
   coordinator: DispatchCoordinator<P>,
   events: EventSender,
   coalesce: bool,
   inbox: mpsc::Receiver<Request>,
   backlog: VecDeque<Request>,
}

impl<P: AudioEndpoints + Connector> DispatchWorker<P> {
   async fn run(mut self) {
      debug!("Dispatch worker started");
      while let Some(request) = self.next_request().await {
         let report = self.coordinator.dispatch(request.mode).await;
         self.events.emit(ServiceEvent::DispatchCompleted(report.clone()));
         if let Some(reply) = request.reply {
            let _ = reply.send(report);
         }
      }
      debug!("Dispatch worker shutting down");
   }

   async fn next_request(&mut self) -> Option<Request> {
      loop {
         if self.backlog.is_empty() {
            let request = self.inbox.recv().await?;
            self.backlog.push_back(request);
         }
         if self.coalesce {
            while let Ok(request) = self.inbox.try_recv() {
               self.backlog.push_back(request);
            }
         }

         let request = self.backlog.pop_front()?;
         if self.coalesce && request.reply.is_none() && !self.backlog.is_empty() {
            debug!("Dropping superseded request for {}", request.mode);
            continue;
         }
         return Some(request);
      }
   }
}

#[cfg(test)]
mod tests {
   use std::time::Duration;

   use bluer::Address;

   use super::*;
   use crate::{
      bluetooth::mock::{Failure, MockPlatform},
      error::TransportError,
      event::{NullBus, testing::RecordingBus},
      headset::{
         profile::DeviceProfile,
         protocol::NoiseLevel,
         registry::MemoryStore,
      },
   };

   const BOSE_700: Address = Address([0xC8, 0x7B, 0x23, 0x00, 0x00, 0x01]);
   const BOSE_QC35: Address = Address([0xC8, 0x7B, 0x23, 0x00, 0x00, 0x02]);

   const NC_10: Mode = Mode::NoiseCancelling(NoiseLevel::High);

   fn registry(records: &[&str]) -> Arc<DeviceRegistry> {
      let store = MemoryStore::new(records.iter().copied());
      Arc::new(DeviceRegistry::load(store, Arc::new(NullBus)).unwrap().0)
   }

   fn two_devices() -> Arc<DeviceRegistry> {
      registry(&[
         "700\tC8:7B:23:00:00:01\tBose 700",
         "qc35\tC8:7B:23:00:00:02\tQC35",
      ])
   }

   fn coordinator(
      platform: &MockPlatform,
      registry: Arc<DeviceRegistry>,
   ) -> DispatchCoordinator<MockPlatform> {
      DispatchCoordinator::new(Arc::new(platform.clone()), registry, SendOptions::default())
   }

   #[tokio::test(start_paused = true)]
   async fn test_single_device_receives_paced_frames() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700]);
      let registry = registry(&["700\tC8:7B:23:00:00:01\tBose 700"]);

      let report = coordinator(&platform, registry).dispatch(NC_10).await;

      assert!(report.is_success());
      assert_eq!(report.devices().len(), 1);
      assert_eq!(platform.opened(), vec![BOSE_700]);
      let writes = platform.writes();
      assert_eq!(writes.len(), 3);
      assert!(writes.iter().all(|w| w.bytes == [0x01, 0x05, 0x02, 0x02, 0x00, 0x01]));
      for pair in writes.windows(2) {
         let gap = pair[1].at - pair[0].at;
         assert!(gap >= Duration::from_millis(333) && gap < Duration::from_millis(340), "{gap:?}");
      }
   }

   #[tokio::test]
   async fn test_no_devices_connected() {
      let platform = MockPlatform::new();
      platform.set_outputs([Address([0, 1, 2, 3, 4, 5])]);

      let report = coordinator(&platform, two_devices()).dispatch(NC_10).await;

      assert_eq!(report, DispatchReport::NoDevicesConnected { mode: NC_10 });
      assert_eq!(report.messages(), vec!["No configured devices connected.".to_string()]);
      assert!(platform.opened().is_empty());
   }

   #[tokio::test(start_paused = true)]
   async fn test_failure_does_not_stop_other_devices() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700, BOSE_QC35]);
      platform.fail(BOSE_700, Failure::Connect);

      let report = coordinator(&platform, two_devices()).dispatch(Mode::Off).await;

      let devices = report.devices();
      assert_eq!(devices.len(), 2);
      assert_eq!(devices[0].device.address, BOSE_700);
      assert!(matches!(
         devices[0].outcome,
         Err(DeliveryError::Transport(TransportError::ConnectFailed { .. }))
      ));
      assert_eq!(devices[1].device.address, BOSE_QC35);
      assert_eq!(devices[1].outcome, Ok(()));
      assert!(!report.is_success());
      assert_eq!(report.messages().len(), 1);

      let writes = platform.writes();
      assert_eq!(writes.len(), 3);
      assert!(writes.iter().all(|w| w.address == BOSE_QC35));
      assert!(writes.iter().all(|w| w.bytes == [0x01, 0x06, 0x02, 0x01, 0x00]));
   }

   #[tokio::test(start_paused = true)]
   async fn test_parallel_dispatch_reaches_every_device() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700, BOSE_QC35]);

      let report = coordinator(&platform, two_devices())
         .parallel(true)
         .dispatch(NC_10)
         .await;

      assert!(report.is_success());
      let writes = platform.writes();
      assert_eq!(writes.iter().filter(|w| w.address == BOSE_700).count(), 3);
      assert_eq!(writes.iter().filter(|w| w.address == BOSE_QC35).count(), 3);
      let mut closed = platform.closed();
      closed.sort_by_key(|a| a.0);
      assert_eq!(closed, vec![BOSE_700, BOSE_QC35]);
   }

   #[test]
   fn test_report_json() {
      let report = DispatchReport::Completed {
         mode: NC_10,
         devices: vec![DeviceReport {
            device: Device::new(DeviceProfile::NC700, BOSE_700, "Bose 700"),
            outcome: Err(DeliveryError::Transport(TransportError::RadioDisabled)),
         }],
      };
      let json = report.to_json();
      assert_eq!(json["mode"], "10");
      assert_eq!(json["status"], "completed");
      assert_eq!(json["devices"][0]["ok"], false);
      assert_eq!(json["devices"][0]["error"], "radio_disabled");
      assert_eq!(json["devices"][0]["address"], "C8:7B:23:00:00:01");
   }

   #[tokio::test(start_paused = true)]
   async fn test_dispatcher_processes_requests_in_order() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700]);
      let bus = RecordingBus::new();
      let dispatcher = Dispatcher::spawn(
         coordinator(&platform, registry(&["700\tC8:7B:23:00:00:01\tBose 700"])),
         bus.clone(),
         false,
      );

      dispatcher.request_mode(Mode::Off).await.unwrap();
      dispatcher
         .request_mode(Mode::NoiseCancelling(NoiseLevel::Medium))
         .await
         .unwrap();
      let report = dispatcher.dispatch_now(NC_10).await.unwrap();
      assert_eq!(report.mode(), NC_10);

      let modes: Vec<_> = bus
         .take()
         .into_iter()
         .filter_map(|e| match e {
            ServiceEvent::DispatchCompleted(r) => Some(r.mode()),
            _ => None,
         })
         .collect();
      assert_eq!(
         modes,
         vec![Mode::Off, Mode::NoiseCancelling(NoiseLevel::Medium), NC_10]
      );

      let frames: Vec<_> = platform.writes().into_iter().map(|w| w.bytes[4]).collect();
      assert_eq!(frames, vec![0x00, 0x00, 0x00, 0x05, 0x05, 0x05, 0x00, 0x00, 0x00]);
   }

   #[tokio::test(start_paused = true)]
   async fn test_dispatcher_coalesces_superseded_requests() {
      let platform = MockPlatform::new();
      platform.set_outputs([BOSE_700]);
      let bus = RecordingBus::new();
      let dispatcher = Dispatcher::spawn(
         coordinator(&platform, registry(&["700\tC8:7B:23:00:00:01\tBose 700"])),
         bus.clone(),
         true,
      );

      dispatcher.request_mode(Mode::Off).await.unwrap();
      dispatcher
         .request_mode(Mode::NoiseCancelling(NoiseLevel::Medium))
         .await
         .unwrap();
      let report = dispatcher
         .dispatch_now(Mode::NoiseCancelling(NoiseLevel::Low))
         .await
         .unwrap();
      assert!(report.is_success());

      let completed = bus
         .take()
         .into_iter()
         .filter(|e| matches!(e, ServiceEvent::DispatchCompleted(_)))
         .count();
      assert_eq!(completed, 1);
      let writes = platform.writes();
      assert_eq!(writes.len(), 3);
      assert!(writes.iter().all(|w| w.bytes == [0x01, 0x05, 0x02, 0x02, 0x0A, 0x01]));
   }

   #[tokio::test]
   async fn test_dispatcher_shutdown() {
      let (tx, rx) = mpsc::channel(1);
      drop(rx);
      let dispatcher = Dispatcher { inbox: tx };
      assert!(matches!(
         dispatcher.dispatch_now(Mode::Off).await,
         Err(NoiseCtlError::DispatcherShutdown)
      ));
   }
}
