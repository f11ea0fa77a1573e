//! In-memory platform used by the unit tests.

use std::{
   collections::{HashMap, HashSet},
   io,
   pin::Pin,
   sync::Arc,
   task::{Context, Poll},
};

use bluer::Address;
use parking_lot::Mutex;
use tokio::{io::AsyncWrite, time::Instant};

use crate::{
   bluetooth::{AudioEndpoints, Connector, FrameChannel, Radio},
   error::{NoiseCtlError, Result},
};

/// Failure injected for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
   Connect,
   ConnectHang,
   Stream,
   /// Fails every write after this many succeeded.
   WriteAfter(usize),
   /// Writes never complete.
   WriteHang,
   Close,
}

#[derive(Debug, Clone)]
pub struct Write {
   pub address: Address,
   pub bytes: Vec<u8>,
   pub at: Instant,
}

#[derive(Default)]
struct State {
   radio: bool,
   outputs: HashSet<Address>,
   failures: HashMap<Address, Failure>,
   opened: Vec<Address>,
   writes: Vec<Write>,
   closed: Vec<Address>,
}

#[derive(Clone)]
pub struct MockPlatform {
   state: Arc<Mutex<State>>,
}

impl MockPlatform {
   pub fn new() -> Self {
      Self {
         state: Arc::new(Mutex::new(State {
            radio: true,
            ..Default::default()
         })),
      }
   }

   pub fn set_radio(&self, enabled: bool) {
      self.state.lock().radio = enabled;
   }

   pub fn set_outputs(&self, outputs: impl IntoIterator<Item = Address>) {
      self.state.lock().outputs = outputs.into_iter().collect();
   }

   pub fn fail(&self, address: Address, failure: Failure) {
      self.state.lock().failures.insert(address, failure);
   }

   pub fn opened(&self) -> Vec<Address> {
      self.state.lock().opened.clone()
   }

   pub fn writes(&self) -> Vec<Write> {
      self.state.lock().writes.clone()
   }

   pub fn closed(&self) -> Vec<Address> {
      self.state.lock().closed.clone()
   }

   fn failure(&self, address: Address) -> Option<Failure> {
      self.state.lock().failures.get(&address).copied()
   }
}

impl Radio for MockPlatform {
   async fn radio_enabled(&self) -> bool {
      self.state.lock().radio
   }
}

impl AudioEndpoints for MockPlatform {
   async fn active_audio_outputs(&self) -> Result<HashSet<Address>> {
      Ok(self.state.lock().outputs.clone())
   }
}

impl Connector for MockPlatform {
   type Channel = MockChannel;

   async fn open(&self, address: Address) -> Result<MockChannel> {
      self.state.lock().opened.push(address);
      match self.failure(address) {
         Some(Failure::Connect) => Err(NoiseCtlError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "host is down",
         ))),
         Some(Failure::ConnectHang) => std::future::pending().await,
         failure => Ok(MockChannel {
            sink: MockSink {
               address,
               state: self.state.clone(),
               pending: Vec::new(),
               fail_after: match failure {
                  Some(Failure::WriteAfter(n)) => Some(n),
                  _ => None,
               },
               hang: failure == Some(Failure::WriteHang),
            },
            failure,
         }),
      }
   }
}

pub struct MockChannel {
   sink: MockSink,
   failure: Option<Failure>,
}

impl FrameChannel for MockChannel {
   type Sink = MockSink;

   fn sink(&mut self) -> io::Result<&mut MockSink> {
      if self.failure == Some(Failure::Stream) {
         return Err(io::Error::new(io::ErrorKind::NotConnected, "socket not connected"));
      }
      Ok(&mut self.sink)
   }

   async fn close(self) -> io::Result<()> {
      self.sink.state.lock().closed.push(self.sink.address);
      if self.failure == Some(Failure::Close) {
         return Err(io::Error::new(io::ErrorKind::BrokenPipe, "already closed"));
      }
      Ok(())
   }
}

/// Buffers written bytes and records them as one write per flush.
pub struct MockSink {
   address: Address,
   state: Arc<Mutex<State>>,
   pending: Vec<u8>,
   fail_after: Option<usize>,
   hang: bool,
}

impl AsyncWrite for MockSink {
   fn poll_write(
      mut self: Pin<&mut Self>,
      _cx: &mut Context<'_>,
      buf: &[u8],
   ) -> Poll<io::Result<usize>> {
      if self.hang {
         return Poll::Pending;
      }
      if let Some(limit) = self.fail_after {
         let written = self
            .state
            .lock()
            .writes
            .iter()
            .filter(|w| w.address == self.address)
            .count();
         if written >= limit {
            return Poll::Ready(Err(io::Error::new(
               io::ErrorKind::ConnectionReset,
               "connection reset by peer",
            )));
         }
      }
      self.pending.extend_from_slice(buf);
      Poll::Ready(Ok(buf.len()))
   }

   fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      if !self.pending.is_empty() {
         let bytes = std::mem::take(&mut self.pending);
         let address = self.address;
         self.state.lock().writes.push(Write {
            address,
            bytes,
            at: Instant::now(),
         });
      }
      Poll::Ready(Ok(()))
   }

   fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      self.poll_flush(cx)
   }
}
