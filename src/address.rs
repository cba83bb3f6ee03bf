//! Endpoint addressing and candidate resolution.
//!
//! Turns a (host, service, family, protocol) tuple into an ordered list of
//! connect/bind candidates via the platform resolver, and provides the
//! IPv6-first reordering used when binding listen sockets on dual-stack
//! hosts.

#![allow(missing_docs)]

use crate::sys;
use crate::tether_error::{ResolveError, TetherResult};
use socket2::{Domain, SockAddr, Type};
use std::ffi::c_int;
use std::fmt::{Display, Formatter};

/// An optional host string plus an optional service string. Which parts
/// are required depends on the use site; every use site requires at least
/// one of them.
#[derive(Debug, Clone, Default)]
pub struct Address {
  pub host: Option<String>,
  pub service: Option<String>,
}

impl Address {
  pub fn new(host: Option<String>, service: Option<String>) -> Address {
    Address { host, service }
  }

  pub fn is_unset(&self) -> bool {
    self.host.is_none() && self.service.is_none()
  }
}

impl Display for Address {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let host = self.host.as_deref().unwrap_or("[unspecified]");
    let service = self.service.as_deref().unwrap_or("[unspecified]");
    write!(f, "{host} ({service})")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
  #[default]
  Unspecified,
  Ipv4,
  Ipv6,
}

impl AddressFamily {
  fn to_raw(self) -> c_int {
    match self {
      AddressFamily::Unspecified => sys::AF_UNSPEC,
      AddressFamily::Ipv4 => sys::AF_INET,
      AddressFamily::Ipv6 => sys::AF_INET6,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
  #[default]
  Tcp,
  Udp,
}

/// Socket type of a resolved candidate or an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
  Stream,
  Datagram,
}

impl Display for SockType {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      SockType::Stream => f.write_str("stream"),
      SockType::Datagram => f.write_str("datagram"),
    }
  }
}

/// One resolved endpoint, ready to be turned into a socket.
#[derive(Debug)]
pub struct Candidate {
  pub family: AddressFamily,
  pub socktype: SockType,
  pub protocol: c_int,
  pub addr: SockAddr,
}

impl Candidate {
  pub fn domain(&self) -> Domain {
    match self.family {
      AddressFamily::Ipv6 => Domain::IPV6,
      _ => Domain::IPV4,
    }
  }

  pub fn socket_type(&self) -> Type {
    match self.socktype {
      SockType::Stream => Type::STREAM,
      SockType::Datagram => Type::DGRAM,
    }
  }

  pub fn socket_protocol(&self) -> Option<socket2::Protocol> {
    match self.protocol {
      0 => None,
      raw => Some(socket2::Protocol::from(raw)),
    }
  }

  pub fn is_ipv6(&self) -> bool {
    self.family == AddressFamily::Ipv6
  }
}

fn hints_for(family: AddressFamily, protocol: Protocol, numeric: bool, passive: bool) -> sys::AddrInfoHints {
  let mut flags = 0;
  if numeric {
    flags |= sys::AI_NUMERICHOST;
  }
  if passive {
    flags |= sys::AI_PASSIVE;
  }

  // The socket type hint looks redundant next to the protocol, but some
  // resolvers fail when given a protocol without a matching socktype.
  let (socktype, raw_protocol) = match protocol {
    Protocol::Tcp => (sys::SOCK_STREAM, sys::IPPROTO_TCP),
    Protocol::Udp => (sys::SOCK_DGRAM, sys::IPPROTO_UDP),
  };

  sys::AddrInfoHints { flags, family: family.to_raw(), socktype, protocol: raw_protocol }
}

fn from_raw(raw: Vec<sys::RawCandidate>) -> Vec<Candidate> {
  raw
    .into_iter()
    .filter_map(|entry| {
      let family = match entry.family {
        f if f == sys::AF_INET => AddressFamily::Ipv4,
        f if f == sys::AF_INET6 => AddressFamily::Ipv6,
        _ => return None,
      };
      let socktype = match entry.socktype {
        t if t == sys::SOCK_STREAM => SockType::Stream,
        t if t == sys::SOCK_DGRAM => SockType::Datagram,
        _ => return None,
      };
      Some(Candidate { family, socktype, protocol: entry.protocol, addr: entry.addr })
    })
    .collect()
}

/// Resolve an address into its candidate list.
pub fn resolve(
  address: &Address,
  family: AddressFamily,
  protocol: Protocol,
  numeric: bool,
  passive: bool,
) -> TetherResult<Vec<Candidate>> {
  let hints = hints_for(family, protocol, numeric, passive);
  let raw = sys::getaddrinfo(address.host.as_deref(), address.service.as_deref(), &hints)
    .map_err(|detail| ResolveError::ForwardLookup { endpoint: address.to_string(), detail })?;
  Ok(from_raw(raw))
}

/// Resolve a local bind address constrained to the family, socket type and
/// protocol of an already chosen remote candidate.
pub fn resolve_source(
  address: &Address,
  like: &Candidate,
  numeric: bool,
) -> TetherResult<Vec<Candidate>> {
  let mut flags = sys::AI_PASSIVE;
  if numeric {
    flags |= sys::AI_NUMERICHOST;
  }
  let hints = sys::AddrInfoHints {
    flags,
    family: like.family.to_raw(),
    socktype: match like.socktype {
      SockType::Stream => sys::SOCK_STREAM,
      SockType::Datagram => sys::SOCK_DGRAM,
    },
    protocol: like.protocol,
  };
  let raw = sys::getaddrinfo(address.host.as_deref(), address.service.as_deref(), &hints)
    .map_err(|detail| ResolveError::ForwardLookup { endpoint: address.to_string(), detail })?;
  Ok(from_raw(raw))
}

/// Move every IPv6 candidate ahead of every other candidate, preserving
/// the relative order within each group.
///
/// Some systems bind both IPv6 and IPv4 when a wildcard IPv6 listen
/// address is bound. Binding the IPv6 candidates first makes the later
/// IPv4 bind a harmless failure on such hosts instead of the other way
/// around.
pub fn order_ipv6_first(candidates: Vec<Candidate>) -> Vec<Candidate> {
  let (mut v6, rest): (Vec<Candidate>, Vec<Candidate>) =
    candidates.into_iter().partition(Candidate::is_ipv6);
  v6.extend(rest);
  v6
}

/// Printable forms of one endpoint: always the numeric host/service, plus
/// the reverse-resolved forms when a lookup was requested and succeeded.
#[derive(Debug, Clone)]
pub struct NameInfo {
  pub host_numeric: String,
  pub service_numeric: String,
  pub host_reverse: String,
  pub service_reverse: String,
}

impl NameInfo {
  /// Name a socket address. The numeric form is mandatory; the reverse
  /// form is attempted only when `reverse` is set and falls back to the
  /// numeric strings when the lookup fails.
  pub fn lookup(addr: &SockAddr, reverse: bool) -> TetherResult<NameInfo> {
    let (host_numeric, service_numeric) =
      sys::getnameinfo(addr, true).map_err(ResolveError::NameInfo)?;

    let (host_reverse, service_reverse) = if reverse {
      match sys::getnameinfo(addr, false) {
        Ok(names) => names,
        Err(detail) => {
          crate::warn_log!("inverse lookup failed for {}: {}", host_numeric, detail);
          (host_numeric.clone(), service_numeric.clone())
        }
      }
    } else {
      (host_numeric.clone(), service_numeric.clone())
    };

    Ok(NameInfo { host_numeric, service_numeric, host_reverse, service_reverse })
  }
}

impl Display for NameInfo {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} [{}] {} ({})",
      self.host_reverse, self.host_numeric, self.service_numeric, self.service_reverse
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn candidate(family: AddressFamily, port: u16) -> Candidate {
    let addr: std::net::SocketAddr = match family {
      AddressFamily::Ipv6 => std::net::SocketAddr::new("::1".parse().ok().map(std::net::IpAddr::V6).expect("addr"), port),
      _ => std::net::SocketAddr::new("127.0.0.1".parse().ok().map(std::net::IpAddr::V4).expect("addr"), port),
    };
    Candidate {
      family,
      socktype: SockType::Stream,
      protocol: sys::IPPROTO_TCP,
      addr: SockAddr::from(addr),
    }
  }

  #[test]
  fn reorder_moves_v6_ahead_and_is_stable() {
    let list = vec![
      candidate(AddressFamily::Ipv4, 1),
      candidate(AddressFamily::Ipv6, 2),
      candidate(AddressFamily::Ipv4, 3),
      candidate(AddressFamily::Ipv6, 4),
    ];
    let ports: Vec<u16> = order_ipv6_first(list)
      .iter()
      .map(|c| c.addr.as_socket().map(|s| s.port()).unwrap_or_default())
      .collect();
    assert_eq!(ports, vec![2, 4, 1, 3]);
  }

  #[test]
  fn reorder_without_v6_is_identity() {
    let list = vec![candidate(AddressFamily::Ipv4, 1), candidate(AddressFamily::Ipv4, 2)];
    let ports: Vec<u16> = order_ipv6_first(list)
      .iter()
      .map(|c| c.addr.as_socket().map(|s| s.port()).unwrap_or_default())
      .collect();
    assert_eq!(ports, vec![1, 2]);
  }

  #[test]
  fn address_display_marks_unspecified_parts() {
    let addr = Address::new(None, Some("4242".to_string()));
    assert_eq!(addr.to_string(), "[unspecified] (4242)");
  }
}
