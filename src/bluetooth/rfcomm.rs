//! Serial port transport sessions.
//!
//! A session opens a channel to one device, writes a command frame a fixed
//! number of times with pacing between writes, and always closes the
//! channel before returning. Nothing is read back from the device.

use std::time::Duration;

use bluer::Address;
use log::{debug, info, warn};
use tokio::{io::AsyncWriteExt, time};

use crate::{
   bluetooth::{Connector, FrameChannel},
   error::TransportError,
   headset::protocol::CommandFrame,
};

/// Number of times each frame is written by default
pub const DEFAULT_REPEAT_COUNT: u32 = 3;
/// Delay between repeated writes
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(333);
/// Timeout for connection attempts
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single write and flush
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(25);

/// Pacing and timeout parameters of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
   pub repeat_count: u32,
   pub write_interval: Duration,
   pub connect_timeout: Duration,
   pub write_timeout: Duration,
}

impl Default for SendOptions {
   fn default() -> Self {
      Self {
         repeat_count: DEFAULT_REPEAT_COUNT,
         write_interval: DEFAULT_WRITE_INTERVAL,
         connect_timeout: CONNECT_TIMEOUT,
         write_timeout: WRITE_TIMEOUT,
      }
   }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
   Idle,
   Connecting,
   Connected,
   Writing { written: u32 },
   Closed,
   Failed,
}

/// One delivery attempt to a single device.
pub struct TransportSession<'a, C> {
   connector: &'a C,
   address: Address,
   state: SessionState,
}

impl<'a, C: Connector> TransportSession<'a, C> {
   pub const fn new(connector: &'a C, address: Address) -> Self {
      Self {
         connector,
         address,
         state: SessionState::Idle,
      }
   }

   pub const fn state(&self) -> SessionState {
      self.state
   }

   /// Delivers `frame` to the device, blocking the task until the channel
   /// is closed again.
   ///
   /// The attempt is abandoned on the first failure; there is no retry.
   pub async fn send(
      &mut self,
      frame: &CommandFrame,
      opts: &SendOptions,
   ) -> Result<(), TransportError> {
      let result = self.run(frame, opts).await;
      self.state = if result.is_ok() {
         SessionState::Closed
      } else {
         SessionState::Failed
      };
      result
   }

   async fn run(&mut self, frame: &CommandFrame, opts: &SendOptions) -> Result<(), TransportError> {
      let address = self.address;
      self.state = SessionState::Connecting;

      if !self.connector.radio_enabled().await {
         return Err(TransportError::RadioDisabled);
      }

      debug!("Opening serial port channel to {address}");
      let mut channel = match time::timeout(opts.connect_timeout, self.connector.open(address)).await
      {
         Ok(Ok(channel)) => channel,
         Ok(Err(e)) => {
            return Err(TransportError::ConnectFailed {
               address,
               detail: e.to_string(),
            });
         },
         Err(_) => {
            return Err(TransportError::ConnectFailed {
               address,
               detail: format!("timed out after {:?}", opts.connect_timeout),
            });
         },
      };
      self.state = SessionState::Connected;

      let result = self.write_repeated(&mut channel, frame, opts).await;

      // The channel is released whatever happened while writing.
      debug!("Closing channel to {address}");
      if let Err(e) = channel.close().await {
         warn!("Problem closing channel to {address}: {e}");
      }

      if result.is_ok() {
         info!(
            "Sent {frame} to {address} ({} times)",
            opts.repeat_count
         );
      }
      result
   }

   async fn write_repeated(
      &mut self,
      channel: &mut C::Channel,
      frame: &CommandFrame,
      opts: &SendOptions,
   ) -> Result<(), TransportError> {
      let address = self.address;
      let sink = channel
         .sink()
         .map_err(|e| TransportError::StreamFailed {
            address,
            detail: e.to_string(),
         })?;

      for repetition in 1..=opts.repeat_count {
         self.state = SessionState::Writing {
            written: repetition - 1,
         };
         debug!("→ {address}: {}", hex::encode(frame.as_bytes()));

         let write = async {
            sink.write_all(frame.as_bytes()).await?;
            sink.flush().await
         };
         let failed = |detail: String| TransportError::WriteFailed {
            address,
            repetition,
            detail,
         };
         match time::timeout(opts.write_timeout, write).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(failed(e.to_string())),
            Err(_) => return Err(failed(format!("timed out after {:?}", opts.write_timeout))),
         }

         self.state = SessionState::Writing {
            written: repetition,
         };
         if repetition < opts.repeat_count {
            time::sleep(opts.write_interval).await;
         }
      }
      Ok(())
   }
}
