//! Small helpers shared across the crate.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

/// Returns `name` as a lowercase FQDN with a trailing dot.
pub(crate) fn fqdn(name: &str) -> String {
    let name = name.to_lowercase();
    if name.ends_with('.') {
        name
    } else {
        name + "."
    }
}

/// Maps an address to its 16-byte canonical form.
///
/// IPv4 addresses and their IPv4-mapped IPv6 twins collapse to the same
/// value, so candidate deduplication treats them as one endpoint.
pub(crate) fn canonical_ip(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Rounds a duration to whole milliseconds for log output.
pub(crate) fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
