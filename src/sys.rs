//! Thin wrappers over the platform call surface the core depends on:
//! readiness polling, address resolution, vectored descriptor I/O,
//! non-blocking mode toggles, write-shutdown and descriptor duplication.
//!
//! # Safety
//!
//! This is the only module in the crate that uses unsafe code. Every
//! unsafe block wraps a single libc call with its arguments constructed
//! from checked Rust values, and errors are reported through
//! `io::Error::last_os_error`.

#![allow(unsafe_code)]

use socket2::SockAddr;
use std::ffi::{c_int, CStr, CString};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

pub(crate) use libc::{
  AF_INET, AF_INET6, AF_UNSPEC, AI_NUMERICHOST, AI_PASSIVE, IPPROTO_TCP, IPPROTO_UDP, SOCK_DGRAM,
  SOCK_STREAM, STDIN_FILENO, STDOUT_FILENO,
};

const NI_MAXHOST: usize = 1025;
const NI_MAXSERV: usize = 32;

/// One descriptor in a readiness set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollEntry {
  pub fd: RawFd,
  pub events: i16,
  pub revents: i16,
}

pub(crate) const POLL_IN: i16 = libc::POLLIN;
pub(crate) const POLL_OUT: i16 = libc::POLLOUT;
pub(crate) const POLL_ERR: i16 = libc::POLLERR;
pub(crate) const POLL_HUP: i16 = libc::POLLHUP;

impl PollEntry {
  pub fn new(fd: RawFd, events: i16) -> PollEntry {
    PollEntry { fd, events, revents: 0 }
  }

  pub fn readable(&self) -> bool {
    self.revents & (POLL_IN | POLL_ERR | POLL_HUP) != 0
  }

  pub fn writable(&self) -> bool {
    self.revents & (POLL_OUT | POLL_ERR) != 0
  }
}

/// Wait for readiness on the given descriptors. `None` blocks without a
/// deadline. Returns the number of ready descriptors; 0 means the timeout
/// expired. An interrupted wait surfaces as `ErrorKind::Interrupted` and
/// is restarted by the callers.
pub(crate) fn poll(entries: &mut [PollEntry], timeout: Option<Duration>) -> io::Result<usize> {
  let mut raw: Vec<libc::pollfd> = entries
    .iter()
    .map(|entry| libc::pollfd { fd: entry.fd, events: entry.events, revents: 0 })
    .collect();

  let timeout_ms: c_int = match timeout {
    None => -1,
    Some(dur) => c_int::try_from(dur.as_millis().max(1)).unwrap_or(c_int::MAX),
  };

  let ready = unsafe { libc::poll(raw.as_mut_ptr(), raw.len() as libc::nfds_t, timeout_ms) };
  if ready < 0 {
    return Err(io::Error::last_os_error());
  }

  for (entry, raw) in entries.iter_mut().zip(raw.iter()) {
    entry.revents = raw.revents;
  }

  Ok(ready as usize)
}

/// Vectored read into up to two ring segments. A datagram socket fills the
/// segments from a single message, so a wrapping ring slot does not
/// truncate the datagram.
pub(crate) fn readv(fd: RawFd, bufs: &mut [&mut [u8]]) -> io::Result<usize> {
  let mut iov: Vec<libc::iovec> = bufs
    .iter_mut()
    .map(|buf| libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() })
    .collect();

  let count = unsafe { libc::readv(fd, iov.as_mut_ptr(), iov.len() as c_int) };
  if count < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(count as usize)
}

/// Vectored write from up to two ring segments. On a datagram socket the
/// segments are emitted as one message.
pub(crate) fn writev(fd: RawFd, bufs: &[&[u8]]) -> io::Result<usize> {
  let iov: Vec<libc::iovec> = bufs
    .iter()
    .map(|buf| libc::iovec { iov_base: buf.as_ptr().cast_mut().cast(), iov_len: buf.len() })
    .collect();

  let count = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as c_int) };
  if count < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(count as usize)
}

pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
  let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
  if flags < 0 {
    return Err(io::Error::last_os_error());
  }

  let flags =
    if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };

  if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// Signal a graceful close-of-write on a connected socket.
pub(crate) fn shutdown_write(fd: RawFd) -> io::Result<()> {
  if unsafe { libc::shutdown(fd, libc::SHUT_WR) } < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

pub(crate) fn dup_fd(fd: RawFd) -> io::Result<OwnedFd> {
  let new_fd = unsafe { libc::dup(fd) };
  if new_fd < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
}

/// Duplicates of the process stdin/stdout descriptors, so the streams can
/// own (and eventually close) their endpoints without tearing the real
/// stdio out from under the rest of the process.
pub(crate) fn stdio_fds() -> io::Result<(OwnedFd, OwnedFd)> {
  Ok((dup_fd(libc::STDIN_FILENO)?, dup_fd(libc::STDOUT_FILENO)?))
}

/// Error codes that mean a resolved candidate's family/protocol is simply
/// not supported on this host. Such candidates are skipped; everything
/// else aborts socket setup.
pub(crate) fn is_unsupported_sock_error(err: &io::Error) -> bool {
  matches!(
    err.raw_os_error(),
    Some(libc::EPFNOSUPPORT)
      | Some(libc::EAFNOSUPPORT)
      | Some(libc::EPROTONOSUPPORT)
      | Some(libc::ESOCKTNOSUPPORT)
      | Some(libc::ENOPROTOOPT)
  )
}

/// Hints handed to the platform resolver.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AddrInfoHints {
  pub flags: c_int,
  pub family: c_int,
  pub socktype: c_int,
  pub protocol: c_int,
}

/// One entry of a getaddrinfo result list.
#[derive(Debug)]
pub(crate) struct RawCandidate {
  pub family: c_int,
  pub socktype: c_int,
  pub protocol: c_int,
  pub addr: SockAddr,
}

fn gai_error(err: c_int) -> String {
  if err == libc::EAI_SYSTEM {
    return io::Error::last_os_error().to_string();
  }
  unsafe { CStr::from_ptr(libc::gai_strerror(err)) }.to_string_lossy().into_owned()
}

/// Resolve a (host, service) pair into candidates. Host and service may
/// each be absent, but not both. Errors carry the resolver diagnostic.
pub(crate) fn getaddrinfo(
  host: Option<&str>,
  service: Option<&str>,
  hints: &AddrInfoHints,
) -> Result<Vec<RawCandidate>, String> {
  let host = match host {
    Some(h) => Some(CString::new(h).map_err(|_| "host contains a NUL byte".to_string())?),
    None => None,
  };
  let service = match service {
    Some(s) => Some(CString::new(s).map_err(|_| "service contains a NUL byte".to_string())?),
    None => None,
  };

  let raw_hints = libc::addrinfo {
    ai_flags: hints.flags,
    ai_family: hints.family,
    ai_socktype: hints.socktype,
    ai_protocol: hints.protocol,
    ai_addrlen: 0,
    ai_addr: std::ptr::null_mut(),
    ai_canonname: std::ptr::null_mut(),
    ai_next: std::ptr::null_mut(),
  };

  let mut res: *mut libc::addrinfo = std::ptr::null_mut();
  let err = unsafe {
    libc::getaddrinfo(
      host.as_ref().map_or(std::ptr::null(), |h| h.as_ptr()),
      service.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
      &raw_hints,
      &mut res,
    )
  };
  if err != 0 {
    return Err(gai_error(err));
  }

  let mut candidates = Vec::new();
  let mut cursor = res;
  while !cursor.is_null() {
    let entry = unsafe { &*cursor };
    if !entry.ai_addr.is_null() {
      let init = unsafe {
        SockAddr::try_init(|storage, len| {
          unsafe {
            std::ptr::copy_nonoverlapping(
              entry.ai_addr.cast::<u8>(),
              storage.cast::<u8>(),
              entry.ai_addrlen as usize,
            );
            *len = entry.ai_addrlen;
          }
          Ok(())
        })
      };
      if let Ok(((), addr)) = init {
        candidates.push(RawCandidate {
          family: entry.ai_family,
          socktype: entry.ai_socktype,
          protocol: entry.ai_protocol,
          addr,
        });
      }
    }
    cursor = entry.ai_next;
  }

  unsafe { libc::freeaddrinfo(res) };
  Ok(candidates)
}

/// Translate a socket address into printable (host, service) strings.
/// With `numeric` set no name resolution is attempted.
pub(crate) fn getnameinfo(addr: &SockAddr, numeric: bool) -> Result<(String, String), String> {
  let mut host = [0u8; NI_MAXHOST];
  let mut service = [0u8; NI_MAXSERV];
  let flags = if numeric { libc::NI_NUMERICHOST | libc::NI_NUMERICSERV } else { 0 };

  let err = unsafe {
    libc::getnameinfo(
      addr.as_ptr(),
      addr.len(),
      host.as_mut_ptr().cast(),
      host.len() as libc::socklen_t,
      service.as_mut_ptr().cast(),
      service.len() as libc::socklen_t,
      flags,
    )
  };
  if err != 0 {
    return Err(gai_error(err));
  }

  let host = CStr::from_bytes_until_nul(&host)
    .map_err(|_| "unterminated host name".to_string())?
    .to_string_lossy()
    .into_owned();
  let service = CStr::from_bytes_until_nul(&service)
    .map_err(|_| "unterminated service name".to_string())?
    .to_string_lossy()
    .into_owned();
  Ok((host, service))
}
