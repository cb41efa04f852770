//! Hostname resolution used once at process start

use std::net::{IpAddr, Ipv4Addr};

/// `192.168.x.y`, `10.x.y.z`, `169.254.x.y` are private; everything else
/// well-formed is public
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 10 || octets[0] == 192 && octets[1] == 168 || octets[0] == 169 && octets[1] == 254
}

fn candidate_score(ip: &IpAddr) -> (u8, u8) {
    // Higher is preferred: public over private, IPv6 over IPv4.
    let public_score = match ip {
        IpAddr::V4(v4) if is_private_ipv4(v4) => 0,
        _ => 1,
    };
    let family_score = match ip {
        IpAddr::V6(_) => 1,
        IpAddr::V4(_) => 0,
    };
    (public_score, family_score)
}

/// Picks the best of a set of candidate interface addresses by preferring
/// a public address over a private one and IPv6 over IPv4 (loopback
/// already excluded by the caller).
pub fn pick_best_address(candidates: &[IpAddr]) -> IpAddr {
    candidates
        .iter()
        .max_by_key(|ip| candidate_score(ip))
        .copied()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Resolves the hostname this node advertises to peers: `ROS_HOSTNAME`,
/// then `ROS_IP`, then the OS hostname, then a network interface scan,
/// then `127.0.0.1`
pub fn resolve_hostname() -> String {
    if let Ok(hostname) = std::env::var("ROS_HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    if let Ok(ip) = std::env::var("ROS_IP") {
        if !ip.is_empty() {
            return ip;
        }
    }
    if let Ok(hostname) = gethostname::gethostname().into_string() {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    match local_interface_addresses() {
        Ok(addrs) if !addrs.is_empty() => pick_best_address(&addrs).to_string(),
        _ => Ipv4Addr::LOCALHOST.to_string(),
    }
}

/// Enumerates non-loopback local interface addresses. Platform interface
/// enumeration is out of this crate's scope beyond this thin wrapper;
/// absent a portable crate in the dependency stack, we fall back to the
/// loopback-reachable address the OS would route outbound traffic
/// through, which is the conventional stdlib-only approximation.
fn local_interface_addresses() -> std::io::Result<Vec<IpAddr>> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    let addr = socket.local_addr()?.ip();
    if addr.is_loopback() {
        Ok(Vec::new())
    } else {
        Ok(vec![addr])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_private_ranges() {
        assert!(is_private_ipv4(&"192.168.1.5".parse().unwrap()));
        assert!(is_private_ipv4(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_ipv4(&"169.254.1.1".parse().unwrap()));
        assert!(!is_private_ipv4(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_ipv4(&"172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn prefers_public_over_private() {
        let candidates = vec![
            "192.168.1.5".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
        ];
        assert_eq!(pick_best_address(&candidates), "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn prefers_ipv6_over_ipv4_when_both_public() {
        let candidates = vec![
            "8.8.8.8".parse().unwrap(),
            "2001:4860:4860::8888".parse().unwrap(),
        ];
        assert_eq!(
            pick_best_address(&candidates),
            "2001:4860:4860::8888".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn falls_back_to_loopback_with_no_candidates() {
        assert_eq!(pick_best_address(&[]), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn ros_hostname_env_var_wins() {
        std::env::set_var("ROS_HOSTNAME", "override.example");
        assert_eq!(resolve_hostname(), "override.example");
        std::env::remove_var("ROS_HOSTNAME");
    }
}
