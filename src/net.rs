//! Picking the address a phone on the same network should use to reach us.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::NetError;

/// bonus for interfaces that look wireless; phones are usually on wi-fi
const WIRELESS_BONUS: u32 = 10;

const WIRELESS_HINTS: [&str; 4] = ["wi-fi", "wifi", "wlan", "wireless"];

/// rank of a private ipv4 range: 192.168/16 > 10/8 > 172.16/12, 0 for anything else
pub fn range_priority(ip: Ipv4Addr) -> u32 {
    match ip.octets() {
        [192, 168, _, _] => 3,
        [10, _, _, _] => 2,
        [172, second, _, _] if (16..=31).contains(&second) => 1,
        _ => 0,
    }
}

pub fn is_wireless(interface_name: &str) -> bool {
    let lower = interface_name.to_lowercase();
    WIRELESS_HINTS.iter().any(|hint| lower.contains(hint))
}

/// total score for an address on a named interface, 0 means not eligible
pub fn score(interface_name: &str, ip: Ipv4Addr) -> u32 {
    match range_priority(ip) {
        0 => 0,
        base if is_wireless(interface_name) => base + WIRELESS_BONUS,
        base => base,
    }
}

/// best candidate out of `(interface name, address)` pairs in enumeration order.
///
/// Ties go to the pair seen first.
pub fn select_lan_address<I, S>(candidates: I) -> Result<Ipv4Addr, NetError>
where
    I: IntoIterator<Item = (S, IpAddr)>,
    S: AsRef<str>,
{
    let mut best: Option<(u32, Ipv4Addr)> = None;

    for (name, ip) in candidates {
        let IpAddr::V4(v4) = ip else {
            continue;
        };
        if v4.is_loopback() {
            continue;
        }

        let priority = score(name.as_ref(), v4);
        tracing::trace!("Candidate {} on {:?} scored {}", v4, name.as_ref(), priority);
        if priority == 0 {
            continue;
        }
        if best.map_or(true, |(top, _)| priority > top) {
            best = Some((priority, v4));
        }
    }

    best.map(|(_, ip)| ip).ok_or(NetError::NoLanAddress)
}

/// enumerate the host's non-loopback interfaces and pick the best LAN address
pub fn discover_lan_address() -> Result<Ipv4Addr, NetError> {
    let interfaces = if_addrs::get_if_addrs().map_err(NetError::Interfaces)?;

    let candidates = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| {
            let ip = iface.ip();
            (iface.name, ip)
        });

    let ip = select_lan_address(candidates)?;
    tracing::debug!("Selected LAN address {}", ip);
    Ok(ip)
}
