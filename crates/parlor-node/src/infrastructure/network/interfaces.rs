//! Local IPv4 interface enumeration for discovery.
//!
//! Discovery needs three things from the host: the /24 subnets to sweep, the
//! broadcast addresses to send SEARCH datagrams to, and our own addresses so
//! that probes never target ourselves.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, warn};

/// A non-loopback IPv4 interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Option<Ipv4Addr>,
}

impl LocalInterface {
    /// Directed broadcast address: the advertised one, else derived from the
    /// netmask.
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast
            .unwrap_or_else(|| Ipv4Addr::from(u32::from(self.ip) | !u32::from(self.netmask)))
    }

    /// Every host address of this interface's /24, excluding network and
    /// broadcast (`x.y.z.1` ..= `x.y.z.254`).
    pub fn subnet_hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let [a, b, c, _] = self.ip.octets();
        (1..=254u8).map(move |d| Ipv4Addr::new(a, b, c, d))
    }
}

/// Lists the host's non-loopback IPv4 interfaces.
///
/// If enumeration fails or finds nothing, falls back to the address the OS
/// would use for the default route, assumed to be a /24.
pub fn local_ipv4_interfaces() -> Vec<LocalInterface> {
    let mut found: Vec<LocalInterface> = match if_addrs::get_if_addrs() {
        Ok(list) => list
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| match iface.addr {
                if_addrs::IfAddr::V4(v4) => Some(LocalInterface {
                    name: iface.name,
                    ip: v4.ip,
                    netmask: v4.netmask,
                    broadcast: v4.broadcast,
                }),
                if_addrs::IfAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            warn!("interface enumeration failed: {e}");
            Vec::new()
        }
    };

    if found.is_empty() {
        if let Some(ip) = default_route_ipv4() {
            debug!("no interfaces enumerated; using default-route address {ip}");
            found.push(LocalInterface {
                name: "default".to_string(),
                ip,
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                broadcast: None,
            });
        }
    }
    found
}

/// Our own addresses, used to skip self-probes.
pub fn own_addresses(interfaces: &[LocalInterface]) -> Vec<IpAddr> {
    interfaces.iter().map(|i| IpAddr::V4(i.ip)).collect()
}

/// Asks the OS which local address would route to a public host.  No packet
/// is sent: connecting a UDP socket only selects a route.
fn default_route_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).ok()?;
    socket
        .connect(SocketAddr::from((Ipv4Addr::new(8, 8, 8, 8), 80)))
        .ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
