//! IPv4 range arithmetic
//!
//! Pool ranges and traffic-class networks are written in one of three
//! forms: a single address, CIDR, or an inclusive `start-end` range. All
//! of them flatten to `[start, end]` spans over the u32 address space.

use crate::error::CoreError;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr};

/// Hard cap on `start-end` expansion; a fat-fingered range should fail
/// loudly instead of materializing millions of pool entries.
pub const MAX_RANGE_HOSTS: u64 = 65_536;

/// Inclusive `[start, end]` span over u32 address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpSpan {
    pub start: u32,
    pub end: u32,
}

impl IpSpan {
    pub fn host_count(&self) -> u64 {
        (self.end as u64) - (self.start as u64) + 1
    }

    /// Iterate every address in the span
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        (self.start..=self.end).map(Ipv4Addr::from)
    }
}

pub fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

pub fn u32_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value)
}

/// Parse an IPv4 address, rejecting IPv6 with a typed error
fn parse_v4(text: &str) -> Result<Ipv4Addr, CoreError> {
    match text.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ok(v4),
        Ok(IpAddr::V6(_)) => Err(CoreError::Input(format!("IPv6 not supported: {}", text))),
        Err(_) => Err(CoreError::Input(format!("invalid IP address: {}", text))),
    }
}

/// Parse a range expression into a span.
///
/// Accepted forms:
/// - `a.b.c.d`: a single host, `[ip, ip]`
/// - `a.b.c.d/n`: the whole CIDR block including network and broadcast
///   addresses (callers that want host ranges write them explicitly)
/// - `a.b.c.d-a.b.c.d`: inclusive on both ends; rejected when start > end
///   or the range spans more than [`MAX_RANGE_HOSTS`] hosts
pub fn parse_range(text: &str) -> Result<IpSpan, CoreError> {
    let text = text.trim();

    if text.contains('/') {
        let network: IpNetwork = text
            .parse()
            .map_err(|e| CoreError::Input(format!("invalid CIDR {}: {}", text, e)))?;
        let v4 = match network {
            IpNetwork::V4(v4) => v4,
            IpNetwork::V6(_) => {
                return Err(CoreError::Input(format!("IPv6 not supported: {}", text)))
            }
        };
        let mask = u32::from(v4.mask());
        let base = u32::from(v4.ip()) & mask;
        return Ok(IpSpan {
            start: base,
            end: base | !mask,
        });
    }

    if let Some((start_text, end_text)) = text.split_once('-') {
        let start = ip_to_u32(parse_v4(start_text)?);
        let end = ip_to_u32(parse_v4(end_text)?);
        if start > end {
            return Err(CoreError::Input(format!(
                "range start after end: {}",
                text
            )));
        }
        let span = IpSpan { start, end };
        if span.host_count() > MAX_RANGE_HOSTS {
            return Err(CoreError::Input(format!(
                "range too large ({} hosts): {}",
                span.host_count(),
                text
            )));
        }
        return Ok(span);
    }

    let ip = ip_to_u32(parse_v4(text)?);
    Ok(IpSpan { start: ip, end: ip })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_ip() {
        let span = parse_range("10.0.0.7").unwrap();
        assert_eq!(span.start, span.end);
        assert_eq!(u32_to_ip(span.start), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(span.host_count(), 1);
    }

    #[test]
    fn test_cidr_includes_network_and_broadcast() {
        let span = parse_range("192.168.1.0/24").unwrap();
        assert_eq!(u32_to_ip(span.start), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(u32_to_ip(span.end), Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(span.host_count(), 256);
    }

    #[test]
    fn test_cidr_unaligned_base_is_masked() {
        let span = parse_range("10.1.2.3/16").unwrap();
        assert_eq!(u32_to_ip(span.start), Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(u32_to_ip(span.end), Ipv4Addr::new(10, 1, 255, 255));
    }

    #[test]
    fn test_slash_32() {
        let span = parse_range("203.0.113.9/32").unwrap();
        assert_eq!(span.start, span.end);
    }

    #[test]
    fn test_dash_range_inclusive() {
        let span = parse_range("10.0.0.10-10.0.0.12").unwrap();
        assert_eq!(span.host_count(), 3);
        let hosts: Vec<Ipv4Addr> = span.hosts().collect();
        assert_eq!(
            hosts,
            vec![
                Ipv4Addr::new(10, 0, 0, 10),
                Ipv4Addr::new(10, 0, 0, 11),
                Ipv4Addr::new(10, 0, 0, 12),
            ]
        );
    }

    #[test]
    fn test_reversed_range_rejected() {
        assert!(parse_range("10.0.0.20-10.0.0.10").is_err());
    }

    #[test]
    fn test_oversized_range_rejected() {
        // /15 worth of hosts expressed as a dash range
        assert!(parse_range("10.0.0.0-10.1.255.255").is_err());
        // Exactly at the cap is fine
        assert!(parse_range("10.0.0.0-10.0.255.255").is_ok());
    }

    #[test]
    fn test_ipv6_rejected() {
        assert!(parse_range("::1").is_err());
        assert!(parse_range("2001:db8::/32").is_err());
        assert!(parse_range("::1-::2").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_range("not-an-ip").is_err());
        assert!(parse_range("10.0.0.300").is_err());
        assert!(parse_range("10.0.0.0/33").is_err());
    }

    #[test]
    fn test_address_space_edges() {
        let low = parse_range("0.0.0.0").unwrap();
        assert_eq!(low.start, 0);
        let high = parse_range("255.255.255.255").unwrap();
        assert_eq!(high.end, u32::MAX);
    }
}
