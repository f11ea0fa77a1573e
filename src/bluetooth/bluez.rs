//! BlueZ backed platform.
//!
//! Talks to `bluetoothd` through `bluer`: adapter power state, connected
//! audio sinks, bonded devices, and serial port channels opened either
//! through the profile manager (SPP UUID resolved by SDP) or directly on a
//! configured RFCOMM channel.

use std::{collections::HashSet, io};

use bluer::{
   Adapter, Address, Session,
   rfcomm::{self, Profile, ProfileHandle, Role},
};
use futures::StreamExt;
use log::{debug, info, warn};
use smol_str::SmolStr;
use tokio::{io::AsyncWriteExt, select, sync::Mutex};
use uuid::Uuid;

use crate::{
   bluetooth::{AudioEndpoints, Connector, FrameChannel, Radio, SPP_UUID},
   config::Config,
   error::{NoiseCtlError, Result},
};

/// Audio service classes that mark a device as an audio output.
const AUDIO_OUTPUT_SERVICES: [Uuid; 3] = [
   Uuid::from_u128(0x0000110b_0000_1000_8000_00805f9b34fb), // A2DP sink
   Uuid::from_u128(0x0000111e_0000_1000_8000_00805f9b34fb), // Handsfree
   Uuid::from_u128(0x00001108_0000_1000_8000_00805f9b34fb), // Headset
];

/// Bonded device reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedDevice {
   pub address: Address,
   pub name: SmolStr,
}

pub struct BluezPlatform {
   session: Session,
   adapter: Adapter,
   rfcomm_channel: Option<u8>,
   // Registered lazily; connects are serialized because BlueZ hands the
   // resulting sockets back through this one handle.
   profile: Mutex<Option<ProfileHandle>>,
}

impl BluezPlatform {
   pub async fn new(config: &Config) -> Result<Self> {
      let session = Session::new().await?;
      let adapter = match &config.adapter {
         Some(name) => {
            if !session.adapter_names().await?.contains(name) {
               return Err(NoiseCtlError::AdapterNotFound(name.clone()));
            }
            session.adapter(name)?
         },
         None => session.default_adapter().await?,
      };
      info!("Using adapter {}", adapter.name());

      Ok(Self {
         session,
         adapter,
         rfcomm_channel: config.rfcomm_channel,
         profile: Mutex::new(None),
      })
   }

   /// Devices paired with the adapter at the platform level.
   pub async fn bonded_devices(&self) -> Result<Vec<BondedDevice>> {
      let mut bonded = Vec::new();
      for address in self.adapter.device_addresses().await? {
         let device = self.adapter.device(address)?;
         if !device.is_paired().await.unwrap_or(false) {
            continue;
         }
         let name = match device.name().await {
            Ok(Some(name)) => name,
            _ => device.alias().await.unwrap_or_default(),
         };
         bonded.push(BondedDevice {
            address,
            name: name.into(),
         });
      }
      Ok(bonded)
   }

   async fn open_direct(&self, address: Address, channel: u8) -> Result<rfcomm::Stream> {
      debug!("Connecting to {address} on RFCOMM channel {channel}");
      let addr = rfcomm::SocketAddr::new(address, channel);
      Ok(rfcomm::Stream::connect(addr).await?)
   }

   async fn register_spp(&self) -> Result<ProfileHandle> {
      let spp = Profile {
         uuid: SPP_UUID,
         role: Some(Role::Client),
         require_authentication: Some(false),
         require_authorization: Some(false),
         auto_connect: Some(false),
         ..Default::default()
      };
      let handle = self.session.register_profile(spp).await?;
      debug!("Registered serial port profile client");
      Ok(handle)
   }

   async fn open_profile(&self, address: Address) -> Result<rfcomm::Stream> {
      let mut profile = self.profile.lock().await;
      let handle = match &mut *profile {
         Some(handle) => handle,
         slot => slot.insert(self.register_spp().await?),
      };

      let device = self.adapter.device(address)?;
      debug!("Connecting serial port profile on {address}");

      // BlueZ delivers the socket through the profile handle while
      // `connect_profile` is still pending.
      let connect = device.connect_profile(&SPP_UUID);
      tokio::pin!(connect);
      let mut connected = false;
      loop {
         select! {
            res = &mut connect, if !connected => {
               res?;
               connected = true;
            }
            req = handle.next() => match req {
               Some(req) if req.device() == address => return Ok(req.accept()?),
               Some(req) => debug!("Ignoring profile connection from {}", req.device()),
               None => {
                  return Err(NoiseCtlError::Io(io::Error::new(
                     io::ErrorKind::ConnectionAborted,
                     "profile handle closed",
                  )));
               },
            },
         }
      }
   }
}

impl Radio for BluezPlatform {
   async fn radio_enabled(&self) -> bool {
      self.adapter.is_powered().await.unwrap_or(false)
   }
}

impl AudioEndpoints for BluezPlatform {
   async fn active_audio_outputs(&self) -> Result<HashSet<Address>> {
      let mut outputs = HashSet::new();
      for address in self.adapter.device_addresses().await? {
         let device = self.adapter.device(address)?;
         if !device.is_connected().await.unwrap_or(false) {
            continue;
         }
         match device.uuids().await {
            Ok(Some(uuids)) if AUDIO_OUTPUT_SERVICES.iter().any(|u| uuids.contains(u)) => {
               outputs.insert(address);
            },
            Ok(_) => debug!("{address} is connected but not an audio output"),
            Err(e) => warn!("Failed to read services of {address}: {e}"),
         }
      }
      Ok(outputs)
   }
}

impl Connector for BluezPlatform {
   type Channel = BluezChannel;

   async fn open(&self, address: Address) -> Result<BluezChannel> {
      let stream = match self.rfcomm_channel {
         Some(channel) => self.open_direct(address, channel).await?,
         None => self.open_profile(address).await?,
      };
      Ok(BluezChannel { address, stream })
   }
}

pub struct BluezChannel {
   address: Address,
   stream: rfcomm::Stream,
}

impl FrameChannel for BluezChannel {
   type Sink = rfcomm::Stream;

   fn sink(&mut self) -> io::Result<&mut rfcomm::Stream> {
      // A socket that lost its peer cannot be written to.
      let peer = self.stream.peer_addr()?;
      debug!("Output stream open to {} channel {}", peer.addr, peer.channel);
      Ok(&mut self.stream)
   }

   async fn close(mut self) -> io::Result<()> {
      debug!("Shutting down stream to {}", self.address);
      self.stream.shutdown().await
   }
}
