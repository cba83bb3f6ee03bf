//! Fixed-capacity byte ring shared between the producer and the consumer
//! of one transfer direction. The producing side reads from a descriptor
//! into the ring, the consuming side writes from the ring to the opposite
//! descriptor. A sticky producer-closed marker records EOF so the consumer
//! can observe end-of-stream once the ring drains.

#![allow(missing_docs)]

use crate::sys;
use crate::util::unwrap_some;
use std::io;
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, BorrowedFd};

/// Default ring capacity for stream sessions.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
/// Ring capacity for datagram and file-transfer sessions.
pub const LARGE_BUFFER_SIZE: usize = 65536;

pub struct CircularBuffer {
  data: Box<[u8]>,
  read_pos: usize,
  count: usize,
  producer_closed: bool,
}

impl std::fmt::Debug for CircularBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CircularBuffer")
      .field("capacity", &self.data.len())
      .field("count", &self.count)
      .field("producer_closed", &self.producer_closed)
      .finish()
  }
}

impl CircularBuffer {
  pub fn with_capacity(capacity: usize) -> CircularBuffer {
    debug_assert!(capacity > 0);
    CircularBuffer {
      data: vec![0u8; capacity].into_boxed_slice(),
      read_pos: 0,
      count: 0,
      producer_closed: false,
    }
  }

  pub fn capacity(&self) -> usize {
    self.data.len()
  }

  pub fn len(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  pub fn free_space(&self) -> usize {
    self.data.len() - self.count
  }

  /// True when the consumer has bytes to take out.
  pub fn readable(&self) -> bool {
    self.count > 0
  }

  /// True when the producer has room to put bytes in.
  pub fn writable(&self) -> bool {
    self.free_space() > 0
  }

  pub fn mark_producer_closed(&mut self) {
    self.producer_closed = true;
  }

  pub fn is_producer_closed(&self) -> bool {
    self.producer_closed
  }

  /// The consumer has observed everything it will ever get.
  pub fn is_drained(&self) -> bool {
    self.count == 0 && self.producer_closed
  }

  /// Swap the backing storage for one of a different capacity. Only
  /// permitted before any data has moved through the ring.
  pub fn set_capacity(&mut self, capacity: usize) {
    debug_assert!(self.count == 0 && capacity > 0);
    self.data = vec![0u8; capacity].into_boxed_slice();
    self.read_pos = 0;
  }

  /// Read up to `min(free_space, max)` bytes from `fd` into the ring
  /// (`max` of 0 means the whole free space). A wrapping free region is
  /// offered as two segments of one vectored read, so a datagram fills
  /// both without truncation. A zero-length read marks the producer
  /// closed. Returns the byte count from the descriptor.
  pub fn push_from(&mut self, fd: BorrowedFd<'_>, max: usize) -> io::Result<usize> {
    let free = self.free_space();
    let want = if max == 0 { free } else { free.min(max) };
    if want == 0 {
      return Ok(0);
    }

    let write_pos = (self.read_pos + self.count) % self.data.len();
    let first_len = want.min(self.data.len() - write_pos);
    let second_len = want - first_len;

    let (head, tail) = self.data.split_at_mut(write_pos);
    let mut segments: Vec<&mut [u8]> = Vec::with_capacity(2);
    segments.push(unwrap_some(tail.get_mut(..first_len)));
    if second_len > 0 {
      segments.push(unwrap_some(head.get_mut(..second_len)));
    }

    let read = sys::readv(fd.as_raw_fd(), &mut segments)?;
    if read == 0 {
      self.producer_closed = true;
      return Ok(0);
    }

    self.count += read;
    debug_assert!(self.count <= self.data.len());
    Ok(read)
  }

  /// Write up to `min(count, max)` bytes from the ring to `fd` (`max` of
  /// 0 means everything buffered). For a datagram descriptor the chunk is
  /// emitted as one message and a short write is an error; for streams
  /// partial writes are normal and the cursor advances by what was taken.
  pub fn drain_to(&mut self, fd: BorrowedFd<'_>, max: usize, datagram: bool) -> io::Result<usize> {
    let want = if max == 0 { self.count } else { self.count.min(max) };
    if want == 0 {
      return Ok(0);
    }

    let first_len = want.min(self.data.len() - self.read_pos);
    let second_len = want - first_len;

    let mut segments: Vec<&[u8]> = Vec::with_capacity(2);
    segments.push(unwrap_some(self.data.get(self.read_pos..self.read_pos + first_len)));
    if second_len > 0 {
      segments.push(unwrap_some(self.data.get(..second_len)));
    }

    let written = sys::writev(fd.as_raw_fd(), &segments)?;
    if datagram && written != want {
      return Err(io::Error::new(
        ErrorKind::WriteZero,
        format!("short datagram write ({written} of {want} bytes)"),
      ));
    }

    self.read_pos = (self.read_pos + written) % self.data.len();
    self.count -= written;
    Ok(written)
  }
}
