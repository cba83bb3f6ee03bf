//! Global mode flags, parsed once and then threaded through setup as an
//! immutable value captured in the connection record.

#![allow(missing_docs)]

use std::fmt::{Debug, Formatter};
use std::ops::{BitOr, BitOrAssign};

/// Immutable flag set. The named constants are the exhaustive list of
/// recognized bits.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
  pub const NONE: Flags = Flags(0);
  pub const LISTEN_MODE: Flags = Flags(1);
  pub const CONNECT_MODE: Flags = Flags(1 << 1);
  pub const NUMERIC_MODE: Flags = Flags(1 << 2);
  pub const VERBOSE_MODE: Flags = Flags(1 << 3);
  pub const VERY_VERBOSE_MODE: Flags = Flags(1 << 4);
  pub const RECV_DATA_ONLY: Flags = Flags(1 << 5);
  pub const SEND_DATA_ONLY: Flags = Flags(1 << 6);
  pub const STRICT_IPV6: Flags = Flags(1 << 7);
  pub const DISABLE_NAGLE: Flags = Flags(1 << 8);
  pub const DONT_REUSE_ADDR: Flags = Flags(1 << 9);

  pub fn contains(self, other: Flags) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn insert(&mut self, other: Flags) {
    self.0 |= other.0;
  }

  pub fn remove(&mut self, other: Flags) {
    self.0 &= !other.0;
  }
}

impl BitOr for Flags {
  type Output = Flags;

  fn bitor(self, rhs: Flags) -> Flags {
    Flags(self.0 | rhs.0)
  }
}

impl BitOrAssign for Flags {
  fn bitor_assign(&mut self, rhs: Flags) {
    self.0 |= rhs.0;
  }
}

impl Debug for Flags {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    const NAMES: [(Flags, &str); 10] = [
      (Flags::LISTEN_MODE, "LISTEN_MODE"),
      (Flags::CONNECT_MODE, "CONNECT_MODE"),
      (Flags::NUMERIC_MODE, "NUMERIC_MODE"),
      (Flags::VERBOSE_MODE, "VERBOSE_MODE"),
      (Flags::VERY_VERBOSE_MODE, "VERY_VERBOSE_MODE"),
      (Flags::RECV_DATA_ONLY, "RECV_DATA_ONLY"),
      (Flags::SEND_DATA_ONLY, "SEND_DATA_ONLY"),
      (Flags::STRICT_IPV6, "STRICT_IPV6"),
      (Flags::DISABLE_NAGLE, "DISABLE_NAGLE"),
      (Flags::DONT_REUSE_ADDR, "DONT_REUSE_ADDR"),
    ];

    let mut first = true;
    for (flag, name) in NAMES {
      if self.contains(flag) {
        if !first {
          f.write_str(" | ")?;
        }
        f.write_str(name)?;
        first = false;
      }
    }
    if first {
      f.write_str("NONE")?;
    }
    Ok(())
  }
}
