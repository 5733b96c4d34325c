//! Controller-agnostic forwarding rule types.

use std::net::Ipv4Addr;

use serde::Serialize;

const ETH_TYPE_IPV4: &str = "0x0800";
const IP_PROTO_UDP: u8 = 17;

/// Match predicates keyed the same way regardless of controller dialect.
///
/// The builder fills in the implied lower-layer predicates: any IPv4 field
/// sets `eth_type`, any UDP port additionally sets `ip_proto`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_src: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_dst: Option<u16>,
}

impl MatchSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ipv4_src(mut self, ip: Ipv4Addr) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4.to_owned());
        self.ipv4_src = Some(ip);
        self
    }

    #[must_use]
    pub fn ipv4_dst(mut self, ip: Ipv4Addr) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4.to_owned());
        self.ipv4_dst = Some(ip);
        self
    }

    #[must_use]
    pub fn udp_src(mut self, port: u16) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4.to_owned());
        self.ip_proto = Some(IP_PROTO_UDP);
        self.udp_src = Some(port);
        self
    }

    #[must_use]
    pub fn udp_dst(mut self, port: u16) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4.to_owned());
        self.ip_proto = Some(IP_PROTO_UDP);
        self.udp_dst = Some(port);
        self
    }

    /// The same match with UDP source and destination exchanged; reverse
    /// probe rules are exactly this transform of the forward ones.
    #[must_use]
    pub fn with_swapped_udp_ports(mut self) -> Self {
        std::mem::swap(&mut self.udp_src, &mut self.udp_dst);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Output { port: u32 },
    Group { group_id: u32 },
    SetField { field: String, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlowRule {
    pub dpid: String,
    pub priority: u16,
    #[serde(rename = "match")]
    pub matches: MatchSet,
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupBucket {
    pub actions: Vec<Action>,
}

/// Replication point for one multicast tree on one switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupRule {
    pub dpid: String,
    pub group_id: u32,
    pub buckets: Vec<GroupBucket>,
}

/// Monotonic group-id source; one per forwarding-programming pass so
/// concurrent trees never collide on ids.
#[derive(Debug, Default)]
pub struct GroupIdAllocator {
    next: u32,
}

impl GroupIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u32 {
        self.next += 1;
        self.next
    }
}

/// Concatenate two paths sharing an endpoint, dropping the duplicate.
#[must_use]
pub fn merge_paths(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged = first.to_vec();
    let skip_shared = usize::from(first.last().is_some() && first.last() == second.first());
    merged.extend(second.iter().skip(skip_shared).cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_matches_imply_lower_layers() {
        let m = MatchSet::new().udp_src(9900).udp_dst(9999);
        assert_eq!(m.eth_type.as_deref(), Some(ETH_TYPE_IPV4));
        assert_eq!(m.ip_proto, Some(IP_PROTO_UDP));
    }

    #[test]
    fn swapped_udp_ports_are_symmetric() {
        let forward = MatchSet::new().udp_src(9900).udp_dst(9999);
        let reverse = forward.clone().with_swapped_udp_ports();
        assert_eq!(reverse.udp_src, Some(9999));
        assert_eq!(reverse.udp_dst, Some(9900));
        assert_eq!(reverse.with_swapped_udp_ports(), forward);
    }

    #[test]
    fn merge_paths_deduplicates_the_shared_endpoint() {
        let a = vec!["s".to_owned(), "g".to_owned()];
        let b = vec!["g".to_owned(), "x".to_owned()];
        assert_eq!(merge_paths(&a, &b), vec!["s", "g", "x"]);

        let disjoint = vec!["y".to_owned()];
        assert_eq!(merge_paths(&a, &disjoint), vec!["s", "g", "y"]);
    }

    #[test]
    fn group_ids_are_unique_and_monotonic() {
        let mut alloc = GroupIdAllocator::new();
        let first = alloc.next_id();
        let second = alloc.next_id();
        assert!(second > first);
    }

    #[test]
    fn match_serialization_skips_unset_fields() {
        let m = MatchSet::new().ipv4_dst(Ipv4Addr::new(224, 0, 1, 100));
        let json = serde_json::to_value(&m).expect("serializes");
        assert!(json.get("udp_src").is_none());
        assert_eq!(json["eth_type"], "0x0800");
    }
}
