//! Argument parsing and dispatch. Produces a fully populated connection
//! record, the run mode and the flag set consumed by the core.
#![allow(missing_docs)]

use crate::address::{Address, AddressFamily, Protocol};
use crate::connection::Connection;
use crate::flags::Flags;
use crate::stream::HoldTimeout;
use std::time::Duration;

/// Default transmit MTU for datagram sessions.
const DEFAULT_UDP_MTU: usize = 8192;
/// Default receive NRU for datagram sessions (the largest possible datagram).
const DEFAULT_UDP_NRU: usize = 65536;
/// Default receive buffer capacity for datagram sessions.
const DEFAULT_UDP_BUFFER_SIZE: usize = 65536;
/// Default buffer capacity for file transfers.
const DEFAULT_FILE_TRANSFER_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Connect,
  Listen,
}

#[derive(Debug)]
pub struct ParsedArgs {
  pub connection: Connection,
  pub mode: Mode,
  /// 0 = quiet, 1 = verbose, 2+ = very verbose.
  pub verbosity: u8,
  /// `-h` was given; print usage and exit successfully.
  pub help: bool,
}

pub fn usage(program: &str) -> String {
  format!(
    "Usage:\n\
\t{program} [options...] hostname port\n\
\t{program} -l -p port [-s addr] [options...] [hostname] [port]\n\n\
Recognized options are:\n\
  -4                Use only IPv4\n\
  -6                Use only IPv6\n\
  -h, --help        Display help\n\
  -l, --listen      Listen mode, for inbound connects\n\
  -n                Numeric-only IP addresses, no DNS\n\
  -p, --port=PORT   Local source port\n\
  -q, --hold-timeout=SEC1[:SEC2]\n\
                    Set hold timeout(s)\n\
  -s, --address=ADDRESS\n\
                    Local source address\n\
  -u, --udp         Require use of UDP\n\
  -v                Increase program verbosity (call twice for max verbosity)\n\
  -w, --timeout=SECONDS\n\
                    Timeout for connects/accepts\n\
  -x, --transfer    File transfer mode\n\
      --recv-only   Only receive data, don't transmit\n\
      --send-only   Only transmit data, don't receive\n\
      --buffer-size=BYTES\n\
                    Set buffer size for network receives\n\
      --mtu=BYTES   Set MTU for network connection transmits\n\
      --nru=BYTES   Set NRU for network connection receives\n\
      --half-close  Handle network half-closes correctly\n\
      --disable-nagle\n\
                    Disable nagle algorithm for TCP connections\n\
      --no-reuseaddr\n\
                    Disable SO_REUSEADDR socket option (only in listen mode)\n"
  )
}

fn parse_number(option: &str, value: &str) -> Result<usize, String> {
  value.parse::<usize>().map_err(|_| format!("invalid numeric argument for {option}: {value}"))
}

fn parse_hold(value: &str) -> Result<HoldTimeout, String> {
  if value.starts_with('-') {
    return Ok(HoldTimeout::Indefinite);
  }
  match value.parse::<u64>() {
    Ok(0) => Ok(HoldTimeout::Immediate),
    Ok(seconds) => Ok(HoldTimeout::After(Duration::from_secs(seconds))),
    Err(_) => Err(format!("invalid hold timeout: {value}")),
  }
}

/// State accumulated while walking the option list, applied to the
/// connection record once everything has been seen.
#[derive(Default)]
struct PendingOptions {
  family: Option<AddressFamily>,
  protocol: Protocol,
  listen_mode: bool,
  file_transfer: bool,
  half_close: bool,
  verbosity: u8,
  help: bool,
  remote_mtu: usize,
  remote_nru: usize,
  remote_buffer_size: usize,
  local_buffer_size: usize,
  connect_timeout: Option<Duration>,
  hold_local: Option<HoldTimeout>,
  hold_remote: Option<HoldTimeout>,
  local_host: Option<String>,
  local_service: Option<String>,
  flags: Flags,
  positional: Vec<String>,
}

impl PendingOptions {
  fn set_family(&mut self, family: AddressFamily) -> Result<(), String> {
    if self.family.is_some() {
      return Err("cannot specify the address family twice".to_string());
    }
    self.family = Some(family);
    Ok(())
  }

  fn set_hold_timeouts(&mut self, value: &str) -> Result<(), String> {
    match value.split_once(':') {
      Some((local, remote)) => {
        self.hold_local = Some(parse_hold(local)?);
        self.hold_remote = Some(parse_hold(remote)?);
      }
      None => self.hold_local = Some(parse_hold(value)?),
    }
    Ok(())
  }

  fn set_udp(&mut self) {
    self.protocol = Protocol::Udp;
    // Datagram defaults apply only where the user has not chosen a value.
    if self.remote_mtu == 0 {
      self.remote_mtu = DEFAULT_UDP_MTU;
    }
    if self.remote_nru == 0 {
      self.remote_nru = DEFAULT_UDP_NRU;
    }
    if self.remote_buffer_size == 0 {
      self.remote_buffer_size = DEFAULT_UDP_BUFFER_SIZE;
    }
  }
}

/// Parse the program arguments (without the leading program name).
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
  let mut pending = PendingOptions::default();
  let args: Vec<String> = args.into_iter().collect();
  let mut index = 0;

  while index < args.len() {
    let arg = args.get(index).cloned().unwrap_or_default();
    index += 1;

    let mut next_value = |option: &str| -> Result<String, String> {
      let value = args.get(index).cloned();
      index += 1;
      value.ok_or_else(|| format!("option {option} requires an argument"))
    };

    if let Some(long) = arg.strip_prefix("--") {
      let (name, inline_value) = match long.split_once('=') {
        Some((name, value)) => (name, Some(value.to_string())),
        None => (long, None),
      };
      let mut value = |option: &str| -> Result<String, String> {
        match &inline_value {
          Some(value) => Ok(value.clone()),
          None => next_value(option),
        }
      };

      match name {
        "help" => pending.help = true,
        "listen" => pending.listen_mode = true,
        "port" => pending.local_service = Some(value("--port")?),
        "hold-timeout" => {
          let value = value("--hold-timeout")?;
          pending.set_hold_timeouts(&value)?;
        }
        "address" => pending.local_host = Some(value("--address")?),
        "udp" => pending.set_udp(),
        "timeout" => {
          let value = value("--timeout")?;
          pending.connect_timeout =
            Some(Duration::from_secs(parse_number("--timeout", &value)? as u64));
        }
        "transfer" => pending.file_transfer = true,
        "recv-only" => pending.flags.insert(Flags::RECV_DATA_ONLY),
        "send-only" => pending.flags.insert(Flags::SEND_DATA_ONLY),
        "buffer-size" => {
          let value = value("--buffer-size")?;
          pending.remote_buffer_size = parse_number("--buffer-size", &value)?;
        }
        "mtu" => {
          let value = value("--mtu")?;
          pending.remote_mtu = parse_number("--mtu", &value)?;
        }
        "nru" => {
          let value = value("--nru")?;
          pending.remote_nru = parse_number("--nru", &value)?;
        }
        "half-close" => pending.half_close = true,
        "disable-nagle" => pending.flags.insert(Flags::DISABLE_NAGLE),
        "no-reuseaddr" => pending.flags.insert(Flags::DONT_REUSE_ADDR),
        other => return Err(format!("unrecognized option --{other}")),
      }
      continue;
    }

    if let Some(cluster) = arg.strip_prefix('-') {
      if cluster.is_empty() {
        return Err("unrecognized option -".to_string());
      }
      let mut chars = cluster.char_indices();
      while let Some((offset, short)) = chars.next() {
        // Options that take a value consume the rest of the token, or the
        // next argument when nothing follows the option character.
        let mut value = |option: &str| -> Result<String, String> {
          let rest = cluster.get(offset + short.len_utf8()..).unwrap_or("");
          if rest.is_empty() {
            next_value(option)
          } else {
            Ok(rest.to_string())
          }
        };

        let takes_value = matches!(short, 'p' | 'q' | 's' | 'w');
        match short {
          '4' => pending.set_family(AddressFamily::Ipv4)?,
          '6' => {
            pending.set_family(AddressFamily::Ipv6)?;
            pending.flags.insert(Flags::STRICT_IPV6);
          }
          'h' => pending.help = true,
          'l' => pending.listen_mode = true,
          'n' => pending.flags.insert(Flags::NUMERIC_MODE),
          'p' => pending.local_service = Some(value("-p")?),
          'q' => {
            let value = value("-q")?;
            pending.set_hold_timeouts(&value)?;
          }
          's' => pending.local_host = Some(value("-s")?),
          'u' => pending.set_udp(),
          'v' => {
            pending.verbosity = pending.verbosity.saturating_add(1);
            if pending.verbosity > 1 {
              pending.flags.insert(Flags::VERY_VERBOSE_MODE);
            }
            pending.flags.insert(Flags::VERBOSE_MODE);
          }
          'w' => {
            let value = value("-w")?;
            pending.connect_timeout =
              Some(Duration::from_secs(parse_number("-w", &value)? as u64));
          }
          'x' => pending.file_transfer = true,
          other => return Err(format!("unrecognized option -{other}")),
        }
        if takes_value {
          break;
        }
      }
      continue;
    }

    pending.positional.push(arg);
  }

  build_connection(pending)
}

fn build_connection(mut pending: PendingOptions) -> Result<ParsedArgs, String> {
  if pending.help {
    let mut connection = Connection::new();
    connection.flags = pending.flags;
    return Ok(ParsedArgs { connection, mode: Mode::Connect, verbosity: pending.verbosity, help: true });
  }

  let mode = if pending.listen_mode { Mode::Listen } else { Mode::Connect };
  if pending.listen_mode {
    pending.flags.insert(Flags::LISTEN_MODE);
    pending.flags.remove(Flags::CONNECT_MODE);
  } else {
    pending.flags.insert(Flags::CONNECT_MODE);
    pending.flags.remove(Flags::LISTEN_MODE);
  }

  // File transfer is one-directional: the listener receives, the
  // connecting side transmits.
  if pending.file_transfer {
    if pending.remote_buffer_size == 0 {
      pending.remote_buffer_size = DEFAULT_FILE_TRANSFER_BUFFER_SIZE;
    }
    if pending.local_buffer_size == 0 {
      pending.local_buffer_size = DEFAULT_FILE_TRANSFER_BUFFER_SIZE;
    }
    if pending.listen_mode {
      pending.flags.insert(Flags::RECV_DATA_ONLY);
      pending.flags.remove(Flags::SEND_DATA_ONLY);
    } else {
      pending.flags.insert(Flags::SEND_DATA_ONLY);
      pending.flags.remove(Flags::RECV_DATA_ONLY);
    }
  }

  // An NRU larger than the receive buffer would mean data is never
  // received at all.
  let effective_buffer = if pending.remote_buffer_size > 0 {
    pending.remote_buffer_size
  } else {
    crate::buffer::DEFAULT_BUFFER_SIZE
  };
  if pending.remote_nru > effective_buffer {
    pending.remote_nru = effective_buffer;
  }

  if pending.flags.contains(Flags::RECV_DATA_ONLY) && pending.flags.contains(Flags::SEND_DATA_ONLY)
  {
    return Err("Cannot set both --recv-only and --send-only".to_string());
  }

  let remote_address = match pending.positional.len() {
    0 => Address::default(),
    1 => Address::new(pending.positional.first().cloned(), None),
    2 => Address::new(pending.positional.first().cloned(), pending.positional.get(1).cloned()),
    _ => return Err("too many arguments".to_string()),
  };

  let local_address = Address::new(pending.local_host.take(), pending.local_service.take());

  if pending.listen_mode {
    if local_address.service.is_none() {
      return Err("in listen mode you must specify a port with the -p switch".to_string());
    }
  } else {
    if pending.flags.contains(Flags::DONT_REUSE_ADDR) {
      return Err("--no-reuseaddr option can be used only in listen mode".to_string());
    }
    if remote_address.host.is_none() || remote_address.service.is_none() {
      return Err("you must specify the address/port couple of the remote endpoint".to_string());
    }
  }

  let mut connection = Connection::new();
  connection.family = pending.family.unwrap_or_default();
  connection.protocol = pending.protocol;
  connection.remote_address = remote_address;
  connection.local_address = local_address;
  connection.connect_timeout = pending.connect_timeout;
  connection.flags = pending.flags;

  if let Some(hold) = pending.hold_local {
    connection.local.set_hold_timeout(hold);
  }
  if let Some(hold) = pending.hold_remote {
    connection.remote.set_hold_timeout(hold);
  }

  // Keep the remote system's read side open after our data runs out.
  if pending.half_close {
    connection.remote.suppress_half_close(false);
  }

  if pending.remote_mtu > 0 {
    connection.remote.set_mtu(pending.remote_mtu);
  }
  if pending.remote_nru > 0 {
    connection.remote.set_nru(pending.remote_nru);
  }
  if pending.remote_buffer_size > 0 {
    connection.resize_remote_buffer(pending.remote_buffer_size);
  }
  if pending.local_buffer_size > 0 {
    connection.resize_local_buffer(pending.local_buffer_size);
  }

  Ok(ParsedArgs { connection, mode, verbosity: pending.verbosity, help: false })
}
