//! Pure network-classification helpers shared by the transports and
//! strategies: Tailscale-range detection, same-/24 comparison, and a local
//! VPN-looking-interface scan.

use std::net::{IpAddr, Ipv4Addr};

/// Whether `addr` falls in Tailscale's CGNAT allocation, `100.64.0.0/10`
/// (`100.64.0.0`–`100.127.255.255` inclusive).
///
/// IPv6 addresses are never in range.
#[must_use]
pub fn is_tailscale_range(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000
        }
        IpAddr::V6(_) => false,
    }
}

/// Whether `a` and `b` share the same IPv4 /24 (top three octets equal).
/// Always `false` if either address is IPv6 or they're of different
/// families.
#[must_use]
pub fn same_slash_24(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets()[..3] == b.octets()[..3],
        _ => false,
    }
}

/// Whether a local interface name looks like a VPN/tunnel adapter
/// (`tun*`, `tap*`, `tailscale*`, `vpn*`, `ipsec*`, `wg*`), matched
/// case-insensitively on the prefix.
#[must_use]
pub fn looks_like_vpn_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["tun", "tap", "tailscale", "vpn", "ipsec", "wg"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Scan the host's network interfaces for one that looks like an active
/// Tailscale adapter and return its first IPv4 address, if any.
///
/// This is a best-effort local heuristic; a `None` result means "no local
/// Tailscale interface found", not "Tailscale is definitely unreachable" —
/// the daemon might still be reachable via a cached endpoint.
#[must_use]
pub fn local_tailscale_address() -> Option<Ipv4Addr> {
    let interfaces = get_if_addrs::get_if_addrs().ok()?;
    interfaces.into_iter().find_map(|iface| {
        if !looks_like_vpn_interface(&iface.name) {
            return None;
        }
        match iface.ip() {
            IpAddr::V4(v4) if is_tailscale_range(IpAddr::V4(v4)) => Some(v4),
            _ => None,
        }
    })
}
