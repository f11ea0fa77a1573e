//! Bluetooth communication layer for noise control.
//!
//! This module defines the seams between the core and the platform: radio
//! state, the set of connected audio outputs, and serial port channels. The
//! BlueZ implementation lives in [`bluez`].

use std::{collections::HashSet, future::Future, io};

use bluer::Address;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use crate::error::Result;

pub mod bluez;
pub mod probe;
pub mod rfcomm;

#[cfg(test)]
pub(crate) mod mock;

/// Serial Port Profile service class.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Whether the local radio can be used at all.
pub trait Radio: Send + Sync {
   fn radio_enabled(&self) -> impl Future<Output = bool> + Send;
}

/// Source of the addresses currently playing audio.
pub trait AudioEndpoints: Radio {
   /// Addresses of every active audio output endpoint.
   fn active_audio_outputs(&self) -> impl Future<Output = Result<HashSet<Address>>> + Send;
}

/// Opens serial port channels to remote devices.
pub trait Connector: Radio {
   type Channel: FrameChannel;

   /// Resolves the remote device and opens a reliable byte stream to its
   /// serial port service.
   fn open(&self, address: Address) -> impl Future<Output = Result<Self::Channel>> + Send;
}

/// An open connection-oriented channel.
pub trait FrameChannel: Send {
   type Sink: AsyncWrite + Unpin + Send;

   /// Writable byte sink of the channel.
   fn sink(&mut self) -> io::Result<&mut Self::Sink>;

   /// Closes the channel. Called exactly once on every exit path.
   fn close(self) -> impl Future<Output = io::Result<()>> + Send;
}
