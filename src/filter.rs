//! The peer-allow predicate used by listen mode. A remote filter with
//! neither host nor service set accepts every peer (callers skip the
//! predicate entirely in that case).

use crate::address::{self, Address};
use crate::connection::Connection;
use socket2::SockAddr;
use std::net::{IpAddr, SocketAddr};

/// Collapse a v4-mapped IPv6 address to plain IPv4 so a dual-stack
/// listener can match a v4 filter against the mapped form it sees.
fn canonical_ip(addr: &SocketAddr) -> IpAddr {
  match addr.ip() {
    IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
    v4 => v4,
  }
}

/// Decide whether a peer matches the remote filter. The filter's host
/// and/or service are resolved with the connection's family/protocol
/// constraints; the peer is allowed when any resolved candidate agrees
/// with it on every part the filter specifies.
pub fn is_allowed(peer: &SockAddr, filter: &Address, conn: &Connection) -> bool {
  if filter.is_unset() {
    return true;
  }

  let Some(peer) = peer.as_socket() else {
    return false;
  };

  let candidates =
    match address::resolve(filter, conn.family, conn.protocol, conn.is_numeric(), false) {
      Ok(candidates) => candidates,
      Err(err) => {
        crate::warn_log!("could not resolve peer filter {}: {}", filter, err);
        return false;
      }
    };

  candidates
    .iter()
    .filter_map(|candidate| candidate.addr.as_socket())
    .any(|allowed| {
      let host_ok = filter.host.is_none() || canonical_ip(&allowed) == canonical_ip(&peer);
      let service_ok = filter.service.is_none() || allowed.port() == peer.port();
      host_ok && service_ok
    })
}
