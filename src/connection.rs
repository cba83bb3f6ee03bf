//! The per-invocation connection record: addressing, mode flags, the two
//! ring buffers and the two I/O streams wired crosswise over them.

#![allow(missing_docs)]

use crate::address::{Address, AddressFamily, Protocol, SockType};
use crate::buffer::{CircularBuffer, DEFAULT_BUFFER_SIZE};
use crate::flags::Flags;
use crate::stream::{BufferId, HoldTimeout, IoStream};
use std::time::Duration;

/// Everything the engine needs for one session. Immutable after setup
/// apart from the buffers and stream state the engine itself drives.
///
/// The record is the sole owner of the two rings; the streams address
/// them by [`BufferId`] so the crosswise sharing (each stream's fill
/// buffer is the other's drain buffer) involves no ownership cycle.
#[derive(Debug)]
pub struct Connection {
  pub family: AddressFamily,
  pub protocol: Protocol,
  pub remote_address: Address,
  pub local_address: Address,
  pub connect_timeout: Option<Duration>,
  pub flags: Flags,
  pub(crate) buffers: [CircularBuffer; 2],
  pub local: IoStream,
  pub remote: IoStream,
}

impl Connection {
  pub fn new() -> Connection {
    let mut remote = IoStream::new("remote", BufferId::Remote, BufferId::Local);

    // As soon as the remote read side closes the whole session comes
    // down, and no TCP half-closes are sent to the remote system, unless
    // the operator asks otherwise.
    remote.set_hold_timeout(HoldTimeout::Immediate);
    remote.suppress_half_close(true);

    Connection {
      family: AddressFamily::Unspecified,
      protocol: Protocol::Tcp,
      remote_address: Address::default(),
      local_address: Address::default(),
      connect_timeout: None,
      flags: Flags::NONE,
      buffers: [
        CircularBuffer::with_capacity(DEFAULT_BUFFER_SIZE),
        CircularBuffer::with_capacity(DEFAULT_BUFFER_SIZE),
      ],
      local: IoStream::new("local", BufferId::Local, BufferId::Remote),
      remote,
    }
  }

  pub fn buffer(&self, id: BufferId) -> &CircularBuffer {
    crate::util::unwrap_some(self.buffers.get(id.index()))
  }

  pub fn buffer_mut(&mut self, id: BufferId) -> &mut CircularBuffer {
    crate::util::unwrap_some(self.buffers.get_mut(id.index()))
  }

  /// Replace the capacity of the ring the remote stream receives into.
  pub fn resize_remote_buffer(&mut self, capacity: usize) {
    self.buffer_mut(BufferId::Remote).set_capacity(capacity);
  }

  /// Replace the capacity of the ring the local stream receives into.
  pub fn resize_local_buffer(&mut self, capacity: usize) {
    self.buffer_mut(BufferId::Local).set_capacity(capacity);
  }

  pub fn is_verbose(&self) -> bool {
    self.flags.contains(Flags::VERBOSE_MODE)
  }

  pub fn is_numeric(&self) -> bool {
    self.flags.contains(Flags::NUMERIC_MODE)
  }

  /// Report the negotiated transport details. Used at the highest
  /// verbosity once the connection is up.
  pub fn warn_details(&self) {
    match self.remote.socktype() {
      Some(SockType::Stream) => {
        crate::warn_log!("using stream socket");
      }
      Some(SockType::Datagram) => {
        crate::warn_log!("using datagram socket");
      }
      None => crate::util::unreachable(),
    }

    crate::warn_log!(
      "using remote receive buffer size of {}",
      self.buffer(BufferId::Remote).capacity()
    );

    if self.remote.nru() > 0 {
      crate::warn_log!("using remote receive nru of {}", self.remote.nru());
    }
    if self.remote.mtu() > 0 {
      crate::warn_log!("using remote send mtu of {}", self.remote.mtu());
    }
  }
}

impl Default for Connection {
  fn default() -> Self {
    Connection::new()
  }
}
