//! One direction of data movement: a read descriptor feeding a fill
//! buffer, and a drain buffer emptying into a write descriptor. A session
//! pairs two of these crosswise over the two ring buffers owned by the
//! connection record.

#![allow(missing_docs)]

use crate::address::SockType;
use crate::buffer::CircularBuffer;
use crate::sys;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Stream lifecycle. A stream never leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
  /// Both endpoints live.
  Open,
  /// Read side saw EOF or an unrecoverable error; the drain side may
  /// still be flushing.
  ReadClosed,
  /// Write side errored or was shut down after its drain emptied.
  WriteClosed,
  /// Both sides closed. Contributes no readiness interest.
  Closed,
}

/// How long a stream stays alive after its read side closes, giving its
/// drain buffer a chance to flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldTimeout {
  /// Tear the stream down as soon as the read side closes.
  Immediate,
  /// Keep flushing until the peer closes, however long that takes.
  Indefinite,
  /// Allow this long after read close, then tear down.
  After(Duration),
}

/// Index of one of the two rings owned by the connection record. Streams
/// reference buffers by index; the record is the single owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
  /// Filled by the local stream (bytes travelling local → remote).
  Local,
  /// Filled by the remote stream (bytes travelling remote → local).
  Remote,
}

impl BufferId {
  pub fn index(self) -> usize {
    match self {
      BufferId::Local => 0,
      BufferId::Remote => 1,
    }
  }
}

#[derive(Debug)]
pub struct IoStream {
  name: &'static str,
  read_fd: Option<Rc<OwnedFd>>,
  write_fd: Option<Rc<OwnedFd>>,
  fill_buf: BufferId,
  drain_buf: BufferId,
  socktype: Option<SockType>,
  is_stdio: bool,
  mtu: usize,
  nru: usize,
  half_close_suppressed: bool,
  hold_timeout: HoldTimeout,
  hold_armed: bool,
  hold_deadline: Option<Instant>,
  state: StreamState,
}

impl IoStream {
  pub fn new(name: &'static str, fill_buf: BufferId, drain_buf: BufferId) -> IoStream {
    IoStream {
      name,
      read_fd: None,
      write_fd: None,
      fill_buf,
      drain_buf,
      socktype: None,
      is_stdio: false,
      mtu: 0,
      nru: 0,
      half_close_suppressed: false,
      hold_timeout: HoldTimeout::Indefinite,
      hold_armed: false,
      hold_deadline: None,
      state: StreamState::Open,
    }
  }

  /// Bind the stream to the process stdio: read from standard input,
  /// write to standard output.
  pub fn assign_stdio(&mut self) -> io::Result<()> {
    let (stdin, stdout) = sys::stdio_fds()?;
    self.assign_fds(Some(stdin), Some(stdout), None);
    self.is_stdio = true;
    Ok(())
  }

  /// Bind both directions of the stream to one connected socket.
  pub fn assign_socket(&mut self, socket: OwnedFd, socktype: SockType) {
    let shared = Rc::new(socket);
    self.read_fd = Some(Rc::clone(&shared));
    self.write_fd = Some(shared);
    self.socktype = Some(socktype);
    self.is_stdio = false;
  }

  /// Bind the stream to independent read/write descriptors.
  pub fn assign_fds(
    &mut self,
    read_fd: Option<OwnedFd>,
    write_fd: Option<OwnedFd>,
    socktype: Option<SockType>,
  ) {
    self.is_stdio = false;
    self.read_fd = read_fd.map(Rc::new);
    self.write_fd = write_fd.map(Rc::new);
    self.socktype = socktype;
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn state(&self) -> StreamState {
    self.state
  }

  pub fn socktype(&self) -> Option<SockType> {
    self.socktype
  }

  /// True when the stream's descriptors are duplicates of the process
  /// stdio.
  pub fn is_stdio(&self) -> bool {
    self.is_stdio
  }

  pub fn is_datagram(&self) -> bool {
    self.socktype == Some(SockType::Datagram)
  }

  pub fn fill_buffer(&self) -> BufferId {
    self.fill_buf
  }

  pub fn drain_buffer(&self) -> BufferId {
    self.drain_buf
  }

  pub fn mtu(&self) -> usize {
    self.mtu
  }

  pub fn set_mtu(&mut self, mtu: usize) {
    self.mtu = mtu;
  }

  pub fn nru(&self) -> usize {
    self.nru
  }

  pub fn set_nru(&mut self, nru: usize) {
    self.nru = nru;
  }

  pub fn hold_timeout(&self) -> HoldTimeout {
    self.hold_timeout
  }

  pub fn set_hold_timeout(&mut self, hold: HoldTimeout) {
    self.hold_timeout = hold;
  }

  pub fn suppress_half_close(&mut self, suppress: bool) {
    self.half_close_suppressed = suppress;
  }

  pub fn is_half_close_suppressed(&self) -> bool {
    self.half_close_suppressed
  }

  /// Bound for a single receive: the NRU for datagram sockets, otherwise
  /// whatever free space the fill buffer has.
  pub fn read_limit(&self) -> usize {
    if self.is_datagram() {
      self.nru
    } else {
      0
    }
  }

  /// Bound for a single send: the MTU for datagram sockets, otherwise the
  /// whole buffered chunk.
  pub fn write_limit(&self) -> usize {
    if self.is_datagram() {
      self.mtu
    } else {
      0
    }
  }

  pub fn read_fd(&self) -> Option<BorrowedFd<'_>> {
    self.read_fd.as_deref().map(AsFd::as_fd)
  }

  pub fn write_fd(&self) -> Option<BorrowedFd<'_>> {
    self.write_fd.as_deref().map(AsFd::as_fd)
  }

  pub fn read_raw_fd(&self) -> Option<RawFd> {
    self.read_fd.as_deref().map(AsRawFd::as_raw_fd)
  }

  pub fn write_raw_fd(&self) -> Option<RawFd> {
    self.write_fd.as_deref().map(AsRawFd::as_raw_fd)
  }

  /// Readiness interest on the read side: an open descriptor and free
  /// space in the fill buffer.
  pub fn wants_read(&self, fill: &CircularBuffer) -> bool {
    self.read_fd.is_some() && fill.writable()
  }

  /// Readiness interest on the write side: an open descriptor and
  /// buffered bytes to drain.
  pub fn wants_write(&self, drain: &CircularBuffer) -> bool {
    self.write_fd.is_some() && drain.readable()
  }

  /// Start the hold timer. Called when the read side closes.
  pub fn arm_hold(&mut self, now: Instant) {
    if self.hold_armed {
      return;
    }
    self.hold_armed = true;
    self.hold_deadline = match self.hold_timeout {
      HoldTimeout::Immediate => Some(now),
      HoldTimeout::Indefinite => None,
      HoldTimeout::After(duration) => Some(now + duration),
    };
  }

  pub fn hold_expired(&self, now: Instant) -> bool {
    self.hold_armed && self.hold_deadline.is_some_and(|deadline| now >= deadline)
  }

  /// The nearest pending hold deadline, if a finite one is armed and the
  /// write side is still open to be torn down by it.
  pub fn hold_deadline(&self) -> Option<Instant> {
    if self.hold_armed && self.write_fd.is_some() {
      self.hold_deadline
    } else {
      None
    }
  }

  /// Drop the read endpoint. The engine marks the fill buffer
  /// producer-closed and arms the hold timer around this call.
  pub fn close_read(&mut self) {
    self.read_fd = None;
    self.state = match self.state {
      StreamState::Open | StreamState::ReadClosed => StreamState::ReadClosed,
      StreamState::WriteClosed | StreamState::Closed => StreamState::Closed,
    };
  }

  /// Drop the write endpoint without signalling the peer.
  pub fn close_write(&mut self) {
    self.write_fd = None;
    self.state = match self.state {
      StreamState::Open | StreamState::WriteClosed => StreamState::WriteClosed,
      StreamState::ReadClosed | StreamState::Closed => StreamState::Closed,
    };
  }

  /// Signal a graceful close-of-write to the peer, then retire the write
  /// endpoint. Only meaningful for socket streams.
  pub fn shutdown_write(&mut self) -> io::Result<()> {
    if let Some(fd) = self.write_fd.as_deref() {
      sys::shutdown_write(fd.as_raw_fd())?;
    }
    self.close_write();
    Ok(())
  }

  /// Close the stream entirely; both endpoints are dropped and the state
  /// is terminal.
  pub fn close(&mut self) {
    self.read_fd = None;
    self.write_fd = None;
    self.state = StreamState::Closed;
  }
}
