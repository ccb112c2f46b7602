//! Address parsing and CIDR membership tests.
//!
//! Lists of CIDR blocks are best-effort filters: malformed input is treated
//! as "no match" rather than propagated as an error, since a typo in an
//! allow/deny list should never turn into a panic or a dropped request for
//! an unrelated client.

use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cidr {
    bytes: Vec<u8>,
    prefix: u8,
    family: Family,
}

/// Parses a bare address (no prefix), collapsing IPv4-mapped IPv6
/// (`::ffff:a.b.c.d`) down to its 4-byte IPv4 form.
pub fn parse_addr(s: &str) -> Option<(Vec<u8>, Family)> {
    let s = unbracket(s);
    if let Ok(v4) = s.parse::<Ipv4Addr>() {
        return Some((v4.octets().to_vec(), Family::V4));
    }
    if let Ok(v6) = s.parse::<Ipv6Addr>() {
        if let Some(v4) = v6.to_ipv4_mapped() {
            return Some((v4.octets().to_vec(), Family::V4));
        }
        return Some((v6.octets().to_vec(), Family::V6));
    }
    None
}

fn unbracket(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('[') && s.ends_with(']') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Strips a surrounding `[...]` bracket and collapses an IPv4-mapped IPv6
/// address to plain dotted-quad. Used when extracting a client address from
/// a header or socket peer before it is used as a rate-limit key.
pub fn strip_brackets_and_mapped(s: &str) -> String {
    let s = unbracket(s);
    if let Some(rest) = s.strip_prefix("::ffff:") {
        if rest.parse::<Ipv4Addr>().is_ok() {
            return rest.to_string();
        }
    }
    s.to_string()
}

pub fn parse_cidr(s: &str) -> Option<Cidr> {
    let s = s.trim();
    let (addr_part, prefix_part) = match s.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (s, None),
    };
    let (bytes, family) = parse_addr(addr_part)?;
    let max_prefix = match family {
        Family::V4 => 32u8,
        Family::V6 => 128u8,
    };
    let prefix = match prefix_part {
        Some(p) => {
            let n: u8 = p.parse().ok()?;
            if n > max_prefix {
                return None;
            }
            n
        }
        None => max_prefix,
    };
    Some(Cidr {
        bytes,
        prefix,
        family,
    })
}

/// Tests whether `ip` (already parsed with [`parse_addr`]) falls inside
/// `cidr`. Family mismatch is a non-match, not an error.
pub fn contains(ip: &(Vec<u8>, Family), cidr: &Cidr) -> bool {
    let (ip_bytes, ip_family) = ip;
    if *ip_family != cidr.family || ip_bytes.len() != cidr.bytes.len() {
        return false;
    }
    let full_bytes = (cidr.prefix / 8) as usize;
    let rem_bits = cidr.prefix % 8;

    if ip_bytes[..full_bytes] != cidr.bytes[..full_bytes] {
        return false;
    }
    if rem_bits == 0 {
        return true;
    }
    let mask: u8 = 0xffu8 << (8 - rem_bits);
    (ip_bytes[full_bytes] & mask) == (cidr.bytes[full_bytes] & mask)
}

/// Convenience wrapper over [`parse_addr`] + [`contains`] for a raw address
/// string, returning `false` (never an error) on malformed input.
pub fn contains_str(ip_str: &str, cidr: &Cidr) -> bool {
    match parse_addr(ip_str) {
        Some(ip) => contains(&ip, cidr),
        None => false,
    }
}

/// Normalizes an address down to its rate-limiting key: IPv6 addresses are
/// aggregated to their `/64`, IPv4 addresses pass through unchanged.
pub fn normalize_ipv6_to_64(ip_str: &str) -> String {
    let s = unbracket(ip_str);
    if s.parse::<Ipv4Addr>().is_ok() {
        return s.to_string();
    }
    let Ok(v6) = s.parse::<Ipv6Addr>() else {
        return s.to_string();
    };
    if let Some(v4) = v6.to_ipv4_mapped() {
        return v4.to_string();
    }
    let mut octets = v6.octets();
    for b in &mut octets[8..16] {
        *b = 0;
    }
    format!("{}/64", Ipv6Addr::from(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v4_and_v6() {
        assert_eq!(parse_addr("192.168.1.1").unwrap().1, Family::V4);
        assert_eq!(parse_addr("2001:db8::1").unwrap().1, Family::V6);
        assert_eq!(parse_addr("[2001:db8::1]").unwrap().1, Family::V6);
    }

    #[test]
    fn ipv4_mapped_collapses_to_v4() {
        let (bytes, family) = parse_addr("::ffff:192.0.2.5").unwrap();
        assert_eq!(family, Family::V4);
        assert_eq!(bytes, vec![192, 0, 2, 5]);
    }

    #[test]
    fn cidr_default_prefix() {
        let c = parse_cidr("10.0.0.1").unwrap();
        assert_eq!(c.prefix, 32);
        let c = parse_cidr("::1").unwrap();
        assert_eq!(c.prefix, 128);
    }

    #[test]
    fn cidr_contains_basic() {
        let c = parse_cidr("192.168.0.0/16").unwrap();
        assert!(contains_str("192.168.5.9", &c));
        assert!(!contains_str("192.169.5.9", &c));
    }

    #[test]
    fn cidr_contains_nonoctet_boundary() {
        let c = parse_cidr("192.168.0.0/20").unwrap();
        assert!(contains_str("192.168.15.255", &c));
        assert!(!contains_str("192.168.16.0", &c));
    }

    #[test]
    fn cidr_family_mismatch_is_no_match() {
        let c = parse_cidr("10.0.0.0/8").unwrap();
        assert!(!contains_str("::1", &c));
    }

    #[test]
    fn cidr_equivalent_representations_are_symmetric() {
        let a = parse_cidr("192.168.0.0/16").unwrap();
        let b = parse_cidr("192.168.0.0/16").unwrap();
        assert!(contains_str("192.168.1.1", &a) == contains_str("192.168.1.1", &b));
    }

    #[test]
    fn malformed_cidr_is_none() {
        assert!(parse_cidr("not-an-ip/16").is_none());
        assert!(parse_cidr("10.0.0.0/99").is_none());
    }

    #[test]
    fn malformed_contains_is_false() {
        let c = parse_cidr("10.0.0.0/8").unwrap();
        assert!(!contains_str("garbage", &c));
    }

    #[test]
    fn ipv6_slash64_normalization() {
        let a = normalize_ipv6_to_64("2001:db8::1");
        let b = normalize_ipv6_to_64("2001:db8::ffff");
        assert_eq!(a, b);
        let c = normalize_ipv6_to_64("2001:db8:1::1");
        assert_ne!(a, c);
    }

    #[test]
    fn ipv4_normalization_is_identity() {
        assert_eq!(normalize_ipv6_to_64("203.0.113.5"), "203.0.113.5");
    }

    #[test]
    fn strip_bracket_and_mapped() {
        assert_eq!(strip_brackets_and_mapped("[::1]"), "::1");
        assert_eq!(strip_brackets_and_mapped("::ffff:203.0.113.9"), "203.0.113.9");
        assert_eq!(strip_brackets_and_mapped("203.0.113.9"), "203.0.113.9");
    }
}
