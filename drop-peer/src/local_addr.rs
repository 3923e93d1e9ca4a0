//! Best-effort guess of the address other hosts can reach us on.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Public resolver used only to pick the outbound interface; no packet is sent.
const PROBE_TARGET: &str = "8.8.8.8:80";

/// IP of the interface used for outbound traffic, or loopback if there is none.
pub fn local_advertised_ip() -> IpAddr {
    probe_outbound_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Address to show users for a sharer listening on `port`.
pub fn local_advertised_address(port: u16) -> SocketAddr {
    SocketAddr::new(local_advertised_ip(), port)
}

fn probe_outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(PROBE_TARGET).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_address_keeps_port_and_is_concrete() {
        let addr = local_advertised_address(8081);
        assert_eq!(addr.port(), 8081);
        assert!(!addr.ip().is_unspecified());
    }
}
