use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::ScanError;

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 CIDR network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed.
pub fn detect_local_cidrs() -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(ip));
        }
    }
    let mut cidrs: Vec<Ipv4Net> = set.into_iter().collect();
    // Sort for stable output
    cidrs.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    Ok(cidrs)
}

/// Parse a sweep range. Host bits are masked off (`10.0.0.7/24` is `10.0.0.0/24`)
/// and a bare address counts as a /32. Only IPv4 is swept.
pub fn parse_network(s: &str) -> Result<Ipv4Net, ScanError> {
    let s = s.trim();
    let ipv6 = || ScanError::InvalidNetworkSpec(format!("\"{s}\": IPv6 ranges are not swept"));
    match s.parse::<IpNet>() {
        Ok(IpNet::V4(n4)) => Ok(n4.trunc()),
        Ok(IpNet::V6(_)) => Err(ipv6()),
        Err(e) => match s.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => Ipv4Net::new(v4, 32)
                .map_err(|e| ScanError::InvalidNetworkSpec(e.to_string())),
            Ok(IpAddr::V6(_)) => Err(ipv6()),
            Err(_) => Err(ScanError::InvalidNetworkSpec(format!("\"{s}\": {e}"))),
        },
    }
}

/// Usable hosts of `net`, lazily: network and broadcast addresses are skipped,
/// so /31 and /32 yield nothing.
pub fn host_addresses(net: Ipv4Net) -> impl Iterator<Item = Ipv4Addr> + Send {
    // Use inclusive range of numeric IPs, then skip network and broadcast.
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    let range = if end <= start.saturating_add(1) {
        // Too small to have host addresses
        0..0
    } else {
        start + 1..end
    };
    range.map(Ipv4Addr::from)
}

/// Number of addresses [`host_addresses`] yields.
pub fn usable_host_count(net: Ipv4Net) -> u64 {
    let start = u64::from(u32::from(net.network()));
    let end = u64::from(u32::from(net.broadcast()));
    (end - start).saturating_sub(1)
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}
