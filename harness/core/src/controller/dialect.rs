//! Controller-specific identifier formatting.
//!
//! The rest of the harness speaks in node names and bare 16-hex DPIDs;
//! whatever shape the controller wants them in is decided here and only
//! here.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::topology::{
    NodeKind,
    identity::{self, IdentityError},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DialectError {
    #[error("unrecognized controller dialect: {0}")]
    Unknown(String),
    #[error("the floodlight dialect has no switch DPID format")]
    FloodlightSwitchDpid,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControllerDialect {
    #[default]
    Onos,
    Floodlight,
}

impl FromStr for ControllerDialect {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onos" => Ok(Self::Onos),
            "floodlight" => Ok(Self::Floodlight),
            other => Err(DialectError::Unknown(other.to_owned())),
        }
    }
}

impl fmt::Display for ControllerDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onos => write!(f, "onos"),
            Self::Floodlight => write!(f, "floodlight"),
        }
    }
}

impl ControllerDialect {
    /// Controller-side identifier of a host.
    pub fn dpid_for_host(self, host_name: &str) -> Result<String, DialectError> {
        let identity = identity::host_identity(host_name)?;
        match self {
            Self::Onos => Ok(format!("{}/None", identity.mac.to_uppercase())),
            Self::Floodlight => Ok(identity.ip.to_string()),
        }
    }

    /// Controller-side identifier of a switch from its bare DPID.
    pub fn format_switch_dpid(self, bare: &str) -> Result<String, DialectError> {
        match self {
            Self::Onos => Ok(format!("of:{bare}")),
            Self::Floodlight => Err(DialectError::FloodlightSwitchDpid),
        }
    }

    pub fn dpid_for_switch(self, switch_name: &str) -> Result<String, DialectError> {
        self.format_switch_dpid(&identity::switch_dpid(switch_name)?)
    }

    /// Identifier for any topology node, dispatching on its kind.
    ///
    /// Servers and clouds resolve to their edge switch, matching how they
    /// are realised in the emulation.
    pub fn dpid_for_node(self, name: &str, kind: NodeKind) -> Result<String, DialectError> {
        match kind {
            NodeKind::Host => self.dpid_for_host(name),
            NodeKind::Switch | NodeKind::CloudGateway => self.dpid_for_switch(name),
            NodeKind::Server => {
                self.format_switch_dpid(&identity::edge_switch_dpid(name, true, false)?)
            }
            NodeKind::Cloud => {
                self.format_switch_dpid(&identity::edge_switch_dpid(name, false, true)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onos_formats() {
        let d = ControllerDialect::Onos;
        assert_eq!(
            d.dpid_for_host("h1-b0").expect("host dpid"),
            "00:00:0A:83:00:01/None"
        );
        assert_eq!(d.dpid_for_switch("a3").expect("switch dpid"), "of:a000000000000003");
        assert_eq!(
            d.dpid_for_node("s0", NodeKind::Server).expect("server dpid"),
            "of:e000000000000000"
        );
        assert_eq!(
            d.dpid_for_node("x0", NodeKind::Cloud).expect("cloud dpid"),
            "of:f000000000000000"
        );
    }

    #[test]
    fn floodlight_hosts_use_ip_and_switches_are_unsupported() {
        let d = ControllerDialect::Floodlight;
        assert_eq!(d.dpid_for_host("h1-b0").expect("host dpid"), "10.131.0.1");
        assert_eq!(
            d.dpid_for_switch("a3"),
            Err(DialectError::FloodlightSwitchDpid)
        );
    }

    #[test]
    fn host_dpid_is_stable_across_adapter_restarts() {
        let first = ControllerDialect::Onos.dpid_for_host("h2-m1").expect("dpid");
        let second = ControllerDialect::Onos.dpid_for_host("h2-m1").expect("dpid");
        assert_eq!(first, second);
    }
}
