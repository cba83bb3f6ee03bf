//! Connection establishment: walking resolved candidates for an outbound
//! connect, or binding every usable candidate and accepting exactly one
//! peer in listen mode.

use crate::address::{self, NameInfo, SockType};
use crate::connection::Connection;
use crate::filter;
use crate::flags::Flags;
use crate::sys;
use crate::tether_error::{SetupError, TetherError, TetherResult};
use crate::util::check_invariant;
use socket2::Socket;
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Instant;

/// Backlog for listening stream sockets. Kept small for backward
/// compatibility; some BSD-derived systems clamp it to this value anyway.
const LISTEN_BACKLOG: i32 = 5;

fn new_candidate_socket(candidate: &address::Candidate) -> TetherResult<Option<Socket>> {
  match Socket::new(candidate.domain(), candidate.socket_type(), candidate.socket_protocol()) {
    Ok(socket) => {
      if candidate.is_ipv6() {
        // In case of error we will go on anyway.
        if let Err(err) = socket.set_only_v6(true) {
          crate::warn_log!("error with sockopt IPV6_V6ONLY: {}", err);
        }
      }
      Ok(Some(socket))
    }
    // The candidate's family/protocol is not supported on this host.
    Err(err) if sys::is_unsupported_sock_error(&err) => Ok(None),
    Err(err) => Err(SetupError::SocketCreate(err).into()),
  }
}

fn apply_nodelay(socket: &Socket, socktype: SockType, flags: Flags) {
  if socktype == SockType::Stream && flags.contains(Flags::DISABLE_NAGLE) {
    if let Err(err) = socket.set_nodelay(true) {
      crate::warn_log!("error with sockopt TCP_NODELAY: {}", err);
    }
  }
}

/// Establish an outbound connection and assign the stdio and socket
/// streams. Requires both remote host and service; the local address may
/// be absent or partially set and is bound as the source when present.
pub fn connect(conn: &mut Connection) -> TetherResult<()> {
  check_invariant(
    conn.remote_address.host.is_some() && conn.remote_address.service.is_some(),
    "outbound connect requires a remote host and service",
  )?;

  let numeric = conn.is_numeric();
  let verbose = conn.is_verbose();

  let candidates =
    address::resolve(&conn.remote_address, conn.family, conn.protocol, numeric, false)?;

  let mut attempted = false;
  let mut chosen: Option<(Socket, SockType, NameInfo)> = None;

  for candidate in &candidates {
    // We are going to try to connect to this address.
    attempted = true;

    let names = NameInfo::lookup(&candidate.addr, verbose && !numeric)?;

    let Some(socket) = new_candidate_socket(candidate)? else {
      continue;
    };

    if !conn.local_address.is_unset() {
      let sources = address::resolve_source(&conn.local_address, candidate, numeric)?;
      let mut bind_error = None;
      for source in &sources {
        match socket.bind(&source.addr) {
          Ok(()) => {
            bind_error = None;
            break;
          }
          Err(err) => bind_error = Some(err),
        }
      }
      if sources.is_empty() || bind_error.is_some() {
        if verbose {
          crate::warn_log!(
            "bind to source addr/port failed when connecting {}: {}",
            names,
            bind_error.map(|e| e.to_string()).unwrap_or_else(|| "no source candidates".to_string())
          );
        }
        continue;
      }
    }

    let connected = match conn.connect_timeout {
      Some(timeout) => socket.connect_timeout(&candidate.addr, timeout),
      None => socket.connect(&candidate.addr),
    };
    match connected {
      Ok(()) => {
        chosen = Some((socket, candidate.socktype, names));
        break;
      }
      Err(err) => {
        if verbose {
          crate::warn_log!("{}: {}", names, err);
        }
        continue;
      }
    }
  }

  let Some((socket, socktype, names)) = chosen else {
    return Err(if attempted {
      SetupError::AllCandidatesFailed.into()
    } else {
      SetupError::NoUsableSocketTypes.into()
    });
  };

  if verbose {
    crate::warn_log!("{} open", names);
  }
  if conn.flags.contains(Flags::VERY_VERBOSE_MODE) {
    crate::warn_log!("using {} socket", socktype);
  }

  apply_nodelay(&socket, socktype, conn.flags);

  conn.local.assign_stdio()?;
  conn.remote.assign_socket(OwnedFd::from(socket), socktype);
  Ok(())
}

/// One bound listening descriptor awaiting the single session peer.
struct Listener {
  socket: Socket,
  socktype: SockType,
  names: NameInfo,
}

fn bind_all(conn: &Connection) -> TetherResult<Vec<Listener>> {
  let numeric = conn.is_numeric();
  let verbose = conn.is_verbose();

  let candidates =
    address::resolve(&conn.local_address, conn.family, conn.protocol, numeric, true)?;
  let candidates = address::order_ipv6_first(candidates);

  let mut listeners = Vec::with_capacity(candidates.len());
  for candidate in &candidates {
    let names = NameInfo::lookup(&candidate.addr, false)?;

    let Some(socket) = new_candidate_socket(candidate)? else {
      continue;
    };

    if !conn.flags.contains(Flags::DONT_REUSE_ADDR) {
      // In case of error we will go on anyway.
      if let Err(err) = socket.set_reuse_address(true) {
        crate::warn_log!("error with sockopt SO_REUSEADDR: {}", err);
      }
    }

    if let Err(err) = socket.bind(&candidate.addr) {
      crate::warn_log!(
        "bind to source {} ({}) failed: {}",
        names.host_numeric,
        names.service_numeric,
        err
      );
      continue;
    }

    if candidate.socktype == SockType::Stream {
      socket.listen(LISTEN_BACKLOG).map_err(SetupError::Listen)?;
    }

    if verbose {
      crate::warn_log!("listening on {} ({}) ...", names.host_numeric, names.service_numeric);
    }

    listeners.push(Listener { socket, socktype: candidate.socktype, names });
  }

  if listeners.is_empty() {
    return Err(SetupError::BindExhausted.into());
  }
  Ok(listeners)
}

/// Bind every usable local candidate, wait for the first peer across all
/// of them, accept it (streams) or lock the descriptor to it (datagrams),
/// apply the peer filter, then close the remaining listeners and assign
/// the stdio and socket streams.
pub fn listen(conn: &mut Connection) -> TetherResult<()> {
  check_invariant(
    conn.local_address.service.is_some(),
    "listen requires a local service to bind",
  )?;

  let numeric = conn.is_numeric();
  let verbose = conn.is_verbose();

  let listeners = bind_all(conn)?;
  let deadline = conn.connect_timeout.map(|timeout| Instant::now() + timeout);

  let (session, socktype) = loop {
    let mut entries: Vec<sys::PollEntry> = listeners
      .iter()
      .map(|listener| sys::PollEntry::new(listener.socket.as_raw_fd(), sys::POLL_IN))
      .collect();
    let timeout = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

    match sys::poll(&mut entries, timeout) {
      Ok(0) => return Err(TetherError::Timeout("an incoming connection")),
      Ok(_) => {}
      Err(err) if err.kind() == ErrorKind::Interrupted => continue,
      Err(err) => return Err(err.into()),
    }

    let ready = entries
      .iter()
      .position(sys::PollEntry::readable)
      .and_then(|index| listeners.get(index));
    let Some(listener) = ready else {
      continue;
    };

    // For stream sockets we can simply accept the new connection. For
    // datagram sockets we peek at the sender without consuming the
    // packet, then duplicate the bound descriptor for the session.
    let (session, peer) = match listener.socktype {
      SockType::Stream => listener.socket.accept().map_err(SetupError::Accept)?,
      SockType::Datagram => {
        let peer = listener.socket.peek_sender().map_err(SetupError::Accept)?;
        let dup = listener.socket.try_clone().map_err(SetupError::Accept)?;
        (dup, peer)
      }
    };

    let peer_names = if verbose { Some(NameInfo::lookup(&peer, !numeric)?) } else { None };

    if conn.remote_address.is_unset() || filter::is_allowed(&peer, &conn.remote_address, conn) {
      if listener.socktype == SockType::Datagram {
        // Lock the duplicated descriptor so we only talk to this client.
        session.connect(&peer).map_err(SetupError::DatagramConnect)?;
      }

      if let Some(peer_names) = peer_names {
        crate::warn_log!(
          "connect to {} ({}) from {} [{}] {}",
          listener.names.host_numeric,
          listener.names.service_numeric,
          peer_names.host_reverse,
          peer_names.host_numeric,
          peer_names.service_numeric
        );
      }
      if conn.flags.contains(Flags::VERY_VERBOSE_MODE) {
        crate::warn_log!("using {} socket", listener.socktype);
      }

      break (session, listener.socktype);
    }

    // The connection was not allowed. For datagram sockets the queued
    // packet must be removed so the next wait does not see it again.
    if listener.socktype == SockType::Datagram {
      let mut scratch: [MaybeUninit<u8>; 0] = [];
      let _ = session.recv(&mut scratch);
    }
    drop(session);

    if let Some(peer_names) = peer_names {
      crate::warn_log!(
        "refused connect to {} ({}) from {} [{}] {}",
        listener.names.host_numeric,
        listener.names.service_numeric,
        peer_names.host_reverse,
        peer_names.host_numeric,
        peer_names.service_numeric
      );
    }
  };

  // Close every listening descriptor the session did not come from.
  drop(listeners);

  apply_nodelay(&session, socktype, conn.flags);

  conn.local.assign_stdio()?;
  conn.remote.assign_socket(OwnedFd::from(session), socktype);
  Ok(())
}
