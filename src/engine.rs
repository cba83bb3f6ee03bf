//! The bidirectional I/O engine: a single readiness loop driving the two
//! coupled streams of an established session until both terminate.
//!
//! Each iteration computes the readiness interest of the four logical
//! endpoints (local in/out, remote in/out), waits with the nearest hold
//! deadline as the timeout, services every ready descriptor once, and then
//! reconciles stream state: hold-timer expiry, drain-empty half-close or
//! full close, and the cascade that stops feeding a direction whose sink
//! has gone away.

use crate::buffer::CircularBuffer;
use crate::connection::Connection;
use crate::flags::Flags;
use crate::stream::{BufferId, IoStream, StreamState};
use crate::sys;
use crate::tether_error::TetherResult;
use crate::util::check_invariant;
use defer_heavy::defer;
use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::time::Instant;

/// Force a stream's read side closed because its counterpart can no
/// longer deliver what it would produce (or because the operator disabled
/// this direction). The fill buffer is marked producer-closed so the peer
/// can drain out and finish.
fn force_read_closed(stream: &mut IoStream, fill: &mut CircularBuffer, now: Instant) {
  if stream.read_raw_fd().is_none() {
    return;
  }
  crate::debug_log!("{}: read side closed", stream.name());
  fill.mark_producer_closed();
  stream.close_read();
  stream.arm_hold(now);
}

/// Retire a stream's write side after its drain buffer has been fully
/// delivered, honoring the half-close policy: a suppressed socket stream
/// closes outright (tearing the whole connection down), an unsuppressed
/// one signals a graceful close-of-write and stays alive for reading, and
/// a stdio stream simply closes its descriptor.
fn finish_write(stream: &mut IoStream, fill: &mut CircularBuffer) {
  if stream.socktype().is_none() {
    crate::debug_log!("{}: closing write descriptor", stream.name());
    stream.close_write();
    return;
  }

  if stream.is_half_close_suppressed() {
    crate::debug_log!("{}: closing socket", stream.name());
    stream.close();
    // The socket is gone entirely, so this stream will never produce
    // another byte either.
    fill.mark_producer_closed();
    return;
  }

  crate::debug_log!("{}: shutting down write side", stream.name());
  if let Err(err) = stream.shutdown_write() {
    crate::warn_log!("{}: write shutdown failed: {}", stream.name(), err);
  }
}

/// Service one ready read endpoint: move bytes from the descriptor into
/// the fill buffer, bounded by the NRU for datagram sockets.
fn service_read(stream: &mut IoStream, fill: &mut CircularBuffer, now: Instant) {
  let Some(fd) = stream.read_fd() else {
    return;
  };

  match fill.push_from(fd, stream.read_limit()) {
    Ok(0) if fill.is_producer_closed() => {
      crate::debug_log!("{}: end of input", stream.name());
      stream.close_read();
      stream.arm_hold(now);
    }
    Ok(count) => {
      crate::trace_log!("{}: read {} bytes", stream.name(), count);
    }
    Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
    Err(err) => {
      crate::warn_log!("{}: read error: {}", stream.name(), err);
      fill.mark_producer_closed();
      stream.close_read();
      stream.arm_hold(now);
    }
  }
}

/// Service one ready write endpoint: move bytes from the drain buffer to
/// the descriptor, bounded by the MTU for datagram sockets. A hard error
/// retires the write side and stops the peer from feeding the drain.
fn service_write(
  stream: &mut IoStream,
  peer: &mut IoStream,
  drain: &mut CircularBuffer,
  now: Instant,
) {
  let Some(fd) = stream.write_fd() else {
    return;
  };

  match drain.drain_to(fd, stream.write_limit(), stream.is_datagram()) {
    Ok(count) => {
      crate::trace_log!("{}: wrote {} bytes", stream.name(), count);
    }
    Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
    Err(err) => {
      crate::warn_log!("{}: write error: {}", stream.name(), err);
      stream.close_write();
      // Nothing can be delivered to this sink anymore, so stop reading
      // the bytes destined for it.
      force_read_closed(peer, drain, now);
    }
  }
}

/// Post-service reconciliation for one stream.
fn reconcile(
  stream: &mut IoStream,
  peer: &mut IoStream,
  fill: &mut CircularBuffer,
  drain: &mut CircularBuffer,
  now: Instant,
) {
  // The hold window after read close has expired: stop flushing and tear
  // the write side down, dropping whatever is still buffered.
  if stream.hold_expired(now) && stream.write_raw_fd().is_some() {
    crate::debug_log!("{}: hold timeout expired", stream.name());
    finish_write(stream, fill);
    force_read_closed(peer, drain, now);
    return;
  }

  // Everything this stream will ever write has been delivered: retire the
  // write side per the half-close policy.
  if stream.write_raw_fd().is_some() && drain.is_drained() {
    finish_write(stream, fill);
    // A suppressed full close also ended our read side; the peer has no
    // consumer for new data either way once its source is gone.
    if stream.state() == StreamState::Closed {
      force_read_closed(peer, drain, now);
    }
  }
}

struct InterestSet {
  entries: Vec<sys::PollEntry>,
  local_read: Option<usize>,
  local_write: Option<usize>,
  remote_read: Option<usize>,
  remote_write: Option<usize>,
}

fn collect_interest(
  local: &IoStream,
  remote: &IoStream,
  local_buf: &CircularBuffer,
  remote_buf: &CircularBuffer,
) -> InterestSet {
  let mut set = InterestSet {
    entries: Vec::with_capacity(4),
    local_read: None,
    local_write: None,
    remote_read: None,
    remote_write: None,
  };

  let push = |fd: RawFd, events: i16, entries: &mut Vec<sys::PollEntry>| {
    entries.push(sys::PollEntry::new(fd, events));
    entries.len() - 1
  };

  if local.wants_read(local_buf) {
    if let Some(fd) = local.read_raw_fd() {
      set.local_read = Some(push(fd, sys::POLL_IN, &mut set.entries));
    }
  }
  if local.wants_write(remote_buf) {
    if let Some(fd) = local.write_raw_fd() {
      set.local_write = Some(push(fd, sys::POLL_OUT, &mut set.entries));
    }
  }
  if remote.wants_read(remote_buf) {
    if let Some(fd) = remote.read_raw_fd() {
      set.remote_read = Some(push(fd, sys::POLL_IN, &mut set.entries));
    }
  }
  if remote.wants_write(local_buf) {
    if let Some(fd) = remote.write_raw_fd() {
      set.remote_write = Some(push(fd, sys::POLL_OUT, &mut set.entries));
    }
  }

  set
}

/// Which endpoints are still open. Every reconciliation transition drops
/// at least one descriptor, so this doubles as the fixpoint test.
fn endpoints(local: &IoStream, remote: &IoStream) -> [bool; 4] {
  [
    local.read_raw_fd().is_some(),
    local.write_raw_fd().is_some(),
    remote.read_raw_fd().is_some(),
    remote.write_raw_fd().is_some(),
  ]
}

fn nearest_deadline(local: &IoStream, remote: &IoStream) -> Option<Instant> {
  match (local.hold_deadline(), remote.hold_deadline()) {
    (Some(a), Some(b)) => Some(a.min(b)),
    (Some(a), None) => Some(a),
    (None, Some(b)) => Some(b),
    (None, None) => None,
  }
}

/// Run an established session to completion. Returns once both streams
/// have fully closed.
pub fn run(conn: &mut Connection) -> TetherResult<()> {
  check_invariant(
    conn.local.fill_buffer() == BufferId::Local && conn.remote.fill_buffer() == BufferId::Remote,
    "streams are wired crosswise over the connection buffers",
  )?;

  let flags = conn.flags;
  let Connection { buffers, local, remote, .. } = conn;
  let [local_buf, remote_buf] = buffers;

  // Everything the loop touches must be non-blocking; the readiness wait
  // is the only place the engine is allowed to block.
  let mut restore_blocking: Vec<RawFd> = Vec::with_capacity(2);
  for stream in [&*local, &*remote] {
    for fd in [stream.read_raw_fd(), stream.write_raw_fd()].into_iter().flatten() {
      sys::set_nonblocking(fd, true)?;
    }
    if stream.is_stdio() {
      restore_blocking.push(sys::STDIN_FILENO);
      restore_blocking.push(sys::STDOUT_FILENO);
    }
  }

  // A stdio stream holds dup(2)s that share their file description with
  // the process stdio, so the non-blocking mode leaks onto the real
  // descriptors. The dups are closed during teardown; undo the mode
  // through the real stdio descriptors, which stay open past the
  // session.
  defer! {
    for fd in &restore_blocking {
      let _ = sys::set_nonblocking(*fd, false);
    }
  }

  let now = Instant::now();
  if flags.contains(Flags::RECV_DATA_ONLY) {
    force_read_closed(local, local_buf, now);
  }
  if flags.contains(Flags::SEND_DATA_ONLY) {
    force_read_closed(remote, remote_buf, now);
  }

  loop {
    let now = Instant::now();

    // Reconcile both streams to a fixpoint: a transition on one stream
    // can make the other terminable in the same iteration (a suppressed
    // full close marks the peer's drain producer-closed, for instance),
    // and the peer must observe that before the interest computation.
    loop {
      let before = endpoints(local, remote);
      reconcile(local, remote, local_buf, remote_buf, now);
      reconcile(remote, local, remote_buf, local_buf, now);
      if endpoints(local, remote) == before {
        break;
      }
    }

    if local.state() == StreamState::Closed && remote.state() == StreamState::Closed {
      crate::debug_log!("session complete");
      return Ok(());
    }

    let mut set = collect_interest(local, remote, local_buf, remote_buf);
    let deadline = nearest_deadline(local, remote);

    // A stalled loop with nothing to wait for would spin forever; that
    // can only happen through a state machine bug.
    check_invariant(
      !set.entries.is_empty() || deadline.is_some(),
      "engine has readiness interest or a pending deadline",
    )?;

    let timeout = deadline.map(|deadline| deadline.saturating_duration_since(now));
    match sys::poll(&mut set.entries, timeout) {
      Ok(_) => {}
      Err(err) if err.kind() == ErrorKind::Interrupted => continue,
      Err(err) => return Err(err.into()),
    }

    let now = Instant::now();
    let ready = |slot: Option<usize>, write: bool| {
      slot
        .and_then(|index| set.entries.get(index))
        .is_some_and(|entry| if write { entry.writable() } else { entry.readable() })
    };

    if ready(set.local_read, false) {
      service_read(local, local_buf, now);
    }
    if ready(set.remote_read, false) {
      service_read(remote, remote_buf, now);
    }
    if ready(set.local_write, true) {
      service_write(local, remote, remote_buf, now);
    }
    if ready(set.remote_write, true) {
      service_write(remote, local, local_buf, now);
    }
  }
}
