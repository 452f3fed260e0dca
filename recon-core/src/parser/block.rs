use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::ParseError;

/// Address space named by a registry object: either a prefix or an
/// inclusive start/end range that may not align to one prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
  Cidr(IpNetwork),
  Range { start: IpAddr, end: IpAddr },
}

impl Block {
  /// Accepts `a.b.c.d - e.f.g.h`, `addr/len` and LACNIC's shortened
  /// IPv4 prefixes such as `200.7.84/23`.
  pub fn parse(value: &str) -> Result<Self, ParseError> {
    let value = value.trim();
    let bad = || ParseError::BadBlock {
      value: value.to_string(),
    };

    if let Some((start, end)) = value.split_once('-') {
      let start: IpAddr = start.trim().parse().map_err(|_| bad())?;
      let end: IpAddr = end.trim().parse().map_err(|_| bad())?;
      return Self::from_range(start, end).ok_or_else(bad);
    }

    if value.contains('/') {
      let net = parse_prefix(value).ok_or_else(bad)?;
      return Ok(Self::Cidr(net));
    }

    let addr: IpAddr = value.parse().map_err(|_| bad())?;
    Ok(Self::Range {
      start: addr,
      end: addr,
    })
  }

  pub fn from_range(start: IpAddr, end: IpAddr) -> Option<Self> {
    match (start, end) {
      (IpAddr::V4(s), IpAddr::V4(e)) if s <= e => Some(Self::Range { start, end }),
      (IpAddr::V6(s), IpAddr::V6(e)) if s <= e => Some(Self::Range { start, end }),
      _ => None,
    }
  }

  /// Minimal list of prefixes covering the block exactly.
  pub fn cidrs(&self) -> Vec<IpNetwork> {
    match *self {
      Self::Cidr(net) => vec![net],
      Self::Range {
        start: IpAddr::V4(s),
        end: IpAddr::V4(e),
      } => summarize(u32::from(s) as u128, u32::from(e) as u128, 32)
        .into_iter()
        .filter_map(|(base, len)| Ipv4Network::new(Ipv4Addr::from(base as u32), len).ok())
        .map(IpNetwork::V4)
        .collect(),
      Self::Range {
        start: IpAddr::V6(s),
        end: IpAddr::V6(e),
      } => summarize(u128::from(s), u128::from(e), 128)
        .into_iter()
        .filter_map(|(base, len)| Ipv6Network::new(Ipv6Addr::from(base), len).ok())
        .map(IpNetwork::V6)
        .collect(),
      Self::Range { .. } => Vec::new(),
    }
  }
}

impl fmt::Display for Block {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Cidr(net) => write!(f, "{net}"),
      Self::Range { start, end } => write!(f, "{start} - {end}"),
    }
  }
}

fn parse_prefix(value: &str) -> Option<IpNetwork> {
  let (addr, len) = value.split_once('/')?;
  let len: u8 = len.trim().parse().ok()?;
  let addr = addr.trim();

  let ip: IpAddr = match addr.parse() {
    Ok(ip) => ip,
    Err(_) => expand_short_v4(addr)?,
  };
  let net = IpNetwork::new(ip, len).ok()?;
  IpNetwork::new(net.network(), len).ok()
}

fn expand_short_v4(addr: &str) -> Option<IpAddr> {
  let octets = addr.split('.').count();
  if octets == 0 || octets >= 4 || addr.contains(':') {
    return None;
  }
  let padded = format!("{addr}{}", ".0".repeat(4 - octets));
  padded.parse().ok()
}

fn summarize(mut start: u128, end: u128, bits: u32) -> Vec<(u128, u8)> {
  let mut out = Vec::new();
  loop {
    let mut size = start.trailing_zeros().min(bits);
    while size > 0 && last_of(start, size) > end {
      size -= 1;
    }
    out.push((start, (bits - size) as u8));

    let last = last_of(start, size);
    if last >= end {
      break;
    }
    start = last + 1;
  }
  out
}

fn last_of(start: u128, size: u32) -> u128 {
  if size >= 128 {
    u128::MAX
  } else {
    start | ((1u128 << size) - 1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cidr_strings(block: &Block) -> Vec<String> {
    block.cidrs().iter().map(|n| n.to_string()).collect()
  }

  #[test]
  fn aligned_range_is_one_prefix() {
    let b = Block::parse("193.0.0.0 - 193.0.7.255").unwrap();
    assert_eq!(cidr_strings(&b), vec!["193.0.0.0/21"]);
  }

  #[test]
  fn unaligned_range_splits_minimally() {
    let b = Block::parse("10.0.0.1 - 10.0.0.6").unwrap();
    assert_eq!(
      cidr_strings(&b),
      vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/31", "10.0.0.6/32"]
    );
  }

  #[test]
  fn full_spaces_do_not_overflow() {
    let v4 = Block::parse("0.0.0.0 - 255.255.255.255").unwrap();
    assert_eq!(cidr_strings(&v4), vec!["0.0.0.0/0"]);

    let v6 = Block::from_range(
      "::".parse().unwrap(),
      "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap(),
    )
    .unwrap();
    assert_eq!(cidr_strings(&v6), vec!["::/0"]);
  }

  #[test]
  fn prefixes_are_normalized_to_network_address() {
    let b = Block::parse("2001:db8::1/32").unwrap();
    assert_eq!(cidr_strings(&b), vec!["2001:db8::/32"]);
  }

  #[test]
  fn short_lacnic_prefix_is_expanded() {
    let b = Block::parse("200.7.84/23").unwrap();
    assert_eq!(cidr_strings(&b), vec!["200.7.84.0/23"]);
  }

  #[test]
  fn rejects_reversed_mixed_and_garbage_ranges() {
    assert!(Block::parse("10.0.0.9 - 10.0.0.1").is_err());
    assert!(Block::parse("10.0.0.0 - ::1").is_err());
    assert!(Block::parse("not an address").is_err());
    assert!(Block::parse("10.0.0.0/40").is_err());
  }
}
