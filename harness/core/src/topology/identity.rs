//! Deterministic identity derivation from node names.
//!
//! The topology generator's naming conventions carry the addressing plan:
//! hosts are `h<host#>-b<building#>` (major building, `10.131.b.h`) or
//! `h<host#>-m<building#>` (minor building, `10.200.b.h`); server and cloud
//! hosts are the owning node's name prefixed with `h` (`hs0`, `hx0`).
//! Switch DPIDs start with a nibble encoding the switch kind and end with
//! the switch index, which keeps them injective across a valid topology.

use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("host name '{0}' does not follow the h<idx>-[bm]<building> convention")]
    BadHostName(String),
    #[error("switch name '{0}' has no kind prefix letter")]
    EmptySwitchName(String),
    #[error("switch name '{name}' has unknown kind prefix '{prefix}'")]
    UnknownSwitchPrefix { name: String, prefix: char },
    #[error("switch name '{0}' has a non-numeric index")]
    BadSwitchIndex(String),
    #[error("edge switch for '{0}' must be exactly one of server or cloud")]
    AmbiguousEdgeKind(String),
}

/// Addressing derived for an emulated host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostIdentity {
    pub ip: Ipv4Addr,
    pub mac: String,
}

fn mac_from_ip(ip: Ipv4Addr) -> String {
    let o = ip.octets();
    format!("00:00:{}", hex_pairs(&o))
}

fn hex_pairs(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Derive IP and MAC for a host from its name.
pub fn host_identity(name: &str) -> Result<HostIdentity, IdentityError> {
    let bad = || IdentityError::BadHostName(name.to_owned());
    let rest = name.strip_prefix('h').ok_or_else(bad)?;

    // Server and cloud hosts are `h` + the owning node name.
    let special = |region: u8, tail: &str| -> Result<HostIdentity, IdentityError> {
        let idx: u8 = tail.parse().map_err(|_| bad())?;
        let ip = Ipv4Addr::new(10, region, idx, 1);
        Ok(HostIdentity {
            ip,
            mac: mac_from_ip(ip),
        })
    };
    if let Some(tail) = rest.strip_prefix('s') {
        return special(255, tail);
    }
    if let Some(tail) = rest.strip_prefix('x') {
        return special(254, tail);
    }

    let (host_part, building_part) = rest.split_once('-').ok_or_else(bad)?;
    let host_idx: u8 = host_part.parse().map_err(|_| bad())?;
    let mut chars = building_part.chars();
    let building_octet = match chars.next() {
        Some('b') => 131,
        Some('m') => 200,
        _ => return Err(bad()),
    };
    let building_idx: u8 = chars.as_str().parse().map_err(|_| bad())?;

    let ip = Ipv4Addr::new(10, building_octet, building_idx, host_idx);
    Ok(HostIdentity {
        ip,
        mac: mac_from_ip(ip),
    })
}

fn prefix_nibble(name: &str, prefix: char) -> Result<u64, IdentityError> {
    match prefix {
        'a' => Ok(0xa), // minor-building switch
        'b' => Ok(0xb), // major-building switch
        'c' => Ok(0xc), // core switch
        'g' => Ok(0xd), // cloud gateway ('g' is not a hex digit)
        'e' => Ok(0xe), // server edge switch
        'f' => Ok(0xf), // cloud edge switch
        other => Err(IdentityError::UnknownSwitchPrefix {
            name: name.to_owned(),
            prefix: other,
        }),
    }
}

/// Derive the 16-hex-digit DPID for a switch from its name.
pub fn switch_dpid(name: &str) -> Result<String, IdentityError> {
    let mut chars = name.chars();
    let prefix = chars
        .next()
        .ok_or_else(|| IdentityError::EmptySwitchName(name.to_owned()))?;
    let nibble = prefix_nibble(name, prefix)?;
    let index: u64 = chars
        .as_str()
        .parse()
        .map_err(|_| IdentityError::BadSwitchIndex(name.to_owned()))?;
    Ok(format!("{nibble:x}{index:015x}"))
}

/// DPID of the edge switch fronting a server or cloud host.
///
/// The emulation cannot express a multi-homed host, so each server/cloud is
/// realised as its own switch plus a single-homed host behind it. The edge
/// switch keeps the server/cloud *name* (so topology links attach) while its
/// DPID comes from the kind-rewritten name (`s0` -> `e0`, `x0` -> `f0`).
pub fn edge_switch_dpid(
    name: &str,
    is_server: bool,
    is_cloud: bool,
) -> Result<String, IdentityError> {
    let replacement = match (is_server, is_cloud) {
        (true, false) => 'e',
        (false, true) => 'f',
        _ => return Err(IdentityError::AmbiguousEdgeKind(name.to_owned())),
    };
    let mut chars = name.chars();
    let _ = chars
        .next()
        .ok_or_else(|| IdentityError::EmptySwitchName(name.to_owned()))?;
    let rewritten = format!("{replacement}{}", chars.as_str());
    switch_dpid(&rewritten)
}

/// Name of the emulated host that backs a server or cloud node.
#[must_use]
pub fn backing_host_name(name: &str) -> String {
    format!("h{name}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn major_and_minor_buildings_map_to_distinct_subnets() {
        let major = host_identity("h3-b2").expect("major host");
        assert_eq!(major.ip, Ipv4Addr::new(10, 131, 2, 3));
        assert_eq!(major.mac, "00:00:0a:83:02:03");

        let minor = host_identity("h3-m2").expect("minor host");
        assert_eq!(minor.ip, Ipv4Addr::new(10, 200, 2, 3));
    }

    #[test]
    fn server_and_cloud_hosts_have_reserved_regions() {
        assert_eq!(
            host_identity("hs0").expect("server host").ip,
            Ipv4Addr::new(10, 255, 0, 1)
        );
        assert_eq!(
            host_identity("hx0").expect("cloud host").ip,
            Ipv4Addr::new(10, 254, 0, 1)
        );
    }

    #[test]
    fn rejects_malformed_host_names() {
        for bad in ["s0", "h", "h1", "h1-z2", "h1-b", "hx", "h256-b0"] {
            assert!(host_identity(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn dpid_prefix_encodes_kind() {
        assert_eq!(switch_dpid("a3").expect("minor"), "a000000000000003");
        assert_eq!(switch_dpid("g1").expect("gateway"), "d000000000000001");
        assert_eq!(
            edge_switch_dpid("s0", true, false).expect("server edge"),
            "e000000000000000"
        );
        assert_eq!(
            edge_switch_dpid("x0", false, true).expect("cloud edge"),
            "f000000000000000"
        );
    }

    #[test]
    fn dpid_derivation_is_injective_over_a_topology() {
        let names = ["a0", "a1", "b0", "c0", "g0", "g1"];
        let mut seen = HashSet::new();
        for name in names {
            assert!(seen.insert(switch_dpid(name).expect("derives")));
        }
        seen.insert(edge_switch_dpid("s0", true, false).expect("server"));
        seen.insert(edge_switch_dpid("x0", false, true).expect("cloud"));
        assert_eq!(seen.len(), names.len() + 2);
    }

    #[test]
    fn derivation_is_stable() {
        assert_eq!(
            switch_dpid("g0").expect("first"),
            switch_dpid("g0").expect("second")
        );
        assert_eq!(
            host_identity("h1-b0").expect("first"),
            host_identity("h1-b0").expect("second")
        );
    }
}
