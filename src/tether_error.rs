//! Error types for connection setup and the I/O session.
#![allow(missing_docs)]

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::io::ErrorKind;

pub type TetherResult<T> = Result<T, TetherError>;

/// Name or service resolution failed. Always fatal at setup time,
/// never arises once the session is running.
#[derive(Debug)]
#[non_exhaustive]
pub enum ResolveError {
  /// Forward lookup of a host/service pair failed.
  ForwardLookup {
    /// Human readable form of the endpoint that failed to resolve.
    endpoint: String,
    /// Diagnostic from the platform resolver.
    detail: String,
  },
  /// Translating a socket address back into printable form failed.
  NameInfo(String),
}

impl Display for ResolveError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      ResolveError::ForwardLookup { endpoint, detail } => {
        write!(f, "forward host lookup failed for {endpoint}: {detail}")
      }
      ResolveError::NameInfo(detail) => write!(f, "getnameinfo failed: {detail}"),
    }
  }
}
impl Error for ResolveError {}

/// Failure to turn the candidate list into a usable descriptor.
#[derive(Debug)]
#[non_exhaustive]
pub enum SetupError {
  /// Socket creation failed for a reason other than an unsupported family.
  SocketCreate(io::Error),
  /// Resolution produced no candidate with a socket type we can handle.
  NoUsableSocketTypes,
  /// At least one candidate was attempted and every attempt failed.
  /// The individual failures have already been reported.
  AllCandidatesFailed,
  /// Listen mode could not bind any local candidate.
  BindExhausted,
  /// A bound stream socket refused to enter the listening state.
  Listen(io::Error),
  /// Accepting the incoming peer failed.
  Accept(io::Error),
  /// A one-shot datagram session could not be locked to its peer.
  DatagramConnect(io::Error),
}

impl Display for SetupError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      SetupError::SocketCreate(err) => write!(f, "cannot create the socket: {err}"),
      SetupError::NoUsableSocketTypes => write!(f, "forward lookup returned no usable socket types"),
      SetupError::AllCandidatesFailed => write!(f, "unable to establish the connection"),
      SetupError::BindExhausted => write!(f, "failed to bind to any local addr/port"),
      SetupError::Listen(err) => write!(f, "cannot listen: {err}"),
      SetupError::Accept(err) => write!(f, "cannot accept connection: {err}"),
      SetupError::DatagramConnect(err) => write!(f, "cannot connect datagram socket: {err}"),
    }
  }
}
impl Error for SetupError {}

#[derive(Debug)]
#[non_exhaustive]
pub enum TetherError {
  Resolve(ResolveError),
  Setup(SetupError),
  /// A connect or accept deadline expired before the connection came up.
  Timeout(&'static str),
  /// An internal invariant was violated. Always indicates a bug.
  Invariant(&'static str),
  IO(io::Error),
}

impl TetherError {
  pub fn new_io<E: Into<Box<dyn Error + Send + Sync>>>(kind: ErrorKind, message: E) -> TetherError {
    io::Error::new(kind, message).into()
  }

  pub fn from_io_kind(kind: ErrorKind) -> TetherError {
    io::Error::from(kind).into()
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      TetherError::IO(io) => io.kind(),
      TetherError::Timeout(_) => ErrorKind::TimedOut,
      _ => ErrorKind::Other,
    }
  }
}

impl Display for TetherError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      TetherError::Resolve(err) => Display::fmt(err, f),
      TetherError::Setup(err) => Display::fmt(err, f),
      TetherError::Timeout(what) => write!(f, "timeout expired while waiting for {what}"),
      TetherError::Invariant(what) => write!(f, "internal error: {what}"),
      TetherError::IO(err) => Display::fmt(err, f),
    }
  }
}

impl Error for TetherError {}

impl From<io::Error> for TetherError {
  fn from(value: io::Error) -> Self {
    TetherError::IO(value)
  }
}

impl From<ResolveError> for TetherError {
  fn from(value: ResolveError) -> Self {
    TetherError::Resolve(value)
  }
}

impl From<SetupError> for TetherError {
  fn from(value: SetupError) -> Self {
    TetherError::Setup(value)
  }
}

impl From<TetherError> for io::Error {
  fn from(value: TetherError) -> Self {
    match value {
      TetherError::IO(io) => io,
      other => io::Error::new(other.kind(), other),
    }
  }
}
