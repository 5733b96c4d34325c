//! Emulated network driver.
//!
//! Switches are OVS bridges pointed at the remote controller, hosts are
//! network namespaces, links are shaped veth pairs. `add_*` calls only
//! stage a plan; [`EmulatedNetwork::start`] materialises it, mirroring the
//! deferred-build behavior the rest of the lifecycle depends on.

pub mod command;
pub mod link;

use std::{collections::HashMap, fmt, net::Ipv4Addr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, ShellRunner};
pub use link::LinkShape;

use crate::topology::view::{TopologyView, ViewCounts, ViewError};
use ride_harness_config::{adjust_timeout, timeouts};

#[derive(Debug, Error)]
pub enum EmulationError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("duplicate node in emulation plan: {0}")]
    DuplicateNode(String),
    #[error("unknown emulated node: {0}")]
    UnknownNode(String),
    #[error("no emulated link between {a} and {b}")]
    LinkNotFound { a: String, b: String },
    #[error("switch {0} never connected to the controller")]
    SwitchConnectTimeout(String),
}

/// Administrative state of an emulated link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Up,
    Down,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

#[derive(Clone, Debug)]
struct SwitchPlan {
    name: String,
    dpid: String,
    ifaces: Vec<String>,
}

#[derive(Clone, Debug)]
struct HostPlan {
    name: String,
    ip: Ipv4Addr,
    mac: String,
    ifaces: Vec<String>,
}

#[derive(Clone, Debug)]
struct LinkPlan {
    a: String,
    b: String,
    a_if: String,
    b_if: String,
    shape: LinkShape,
}

#[derive(Clone, Debug)]
struct NatPlan {
    host: String,
    host_if: String,
    root_if: String,
    gateway_ip: String,
    host_ip: String,
    subnet: String,
}

/// Argv ready to run a command inside a host's namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostCommand {
    pub host: String,
    pub argv: Vec<String>,
}

pub struct EmulatedNetwork {
    runner: Arc<dyn CommandRunner>,
    controller_ip: String,
    controller_openflow_port: u16,
    switches: Vec<SwitchPlan>,
    hosts: Vec<HostPlan>,
    links: Vec<LinkPlan>,
    nat: Option<NatPlan>,
    next_if_index: HashMap<String, u32>,
}

impl EmulatedNetwork {
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        controller_ip: impl Into<String>,
        controller_openflow_port: u16,
    ) -> Self {
        Self {
            runner,
            controller_ip: controller_ip.into(),
            controller_openflow_port,
            switches: Vec::new(),
            hosts: Vec::new(),
            links: Vec::new(),
            nat: None,
            next_if_index: HashMap::new(),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.switches.iter().any(|s| s.name == name)
            || self.hosts.iter().any(|h| h.name == name)
    }

    fn next_iface(&mut self, node: &str) -> String {
        let counter = self.next_if_index.entry(node.to_owned()).or_insert(0);
        let iface = format!("{node}-eth{counter}");
        *counter += 1;
        iface
    }

    pub fn add_switch(&mut self, name: &str, dpid: &str) -> Result<(), EmulationError> {
        if self.contains(name) {
            return Err(EmulationError::DuplicateNode(name.to_owned()));
        }
        debug!(switch = name, dpid, "staging switch");
        self.switches.push(SwitchPlan {
            name: name.to_owned(),
            dpid: dpid.to_owned(),
            ifaces: Vec::new(),
        });
        Ok(())
    }

    pub fn add_host(&mut self, name: &str, ip: Ipv4Addr, mac: &str) -> Result<(), EmulationError> {
        if self.contains(name) {
            return Err(EmulationError::DuplicateNode(name.to_owned()));
        }
        debug!(host = name, %ip, mac, "staging host");
        self.hosts.push(HostPlan {
            name: name.to_owned(),
            ip,
            mac: mac.to_owned(),
            ifaces: Vec::new(),
        });
        Ok(())
    }

    pub fn add_link(&mut self, a: &str, b: &str, shape: LinkShape) -> Result<(), EmulationError> {
        if !self.contains(a) {
            return Err(EmulationError::UnknownNode(a.to_owned()));
        }
        if !self.contains(b) {
            return Err(EmulationError::UnknownNode(b.to_owned()));
        }
        let a_if = self.next_iface(a);
        let b_if = self.next_iface(b);
        self.register_iface(a, &a_if);
        self.register_iface(b, &b_if);
        debug!(a, b, a_if, b_if, "staging link");
        self.links.push(LinkPlan {
            a: a.to_owned(),
            b: b.to_owned(),
            a_if,
            b_if,
            shape,
        });
        Ok(())
    }

    /// Stage the out-of-band NAT attachment that lets `host` (the server)
    /// reach the controller's REST API. Deliberately not part of the
    /// link plan: the controller never learns it and the fault schedule
    /// can never touch it.
    pub fn add_nat(
        &mut self,
        host: &str,
        gateway_ip: &str,
        host_ip: &str,
        subnet: &str,
    ) -> Result<(), EmulationError> {
        if !self.hosts.iter().any(|h| h.name == host) {
            return Err(EmulationError::UnknownNode(host.to_owned()));
        }
        let host_if = format!("{host}-nat");
        self.nat = Some(NatPlan {
            host: host.to_owned(),
            host_if,
            root_if: "nat0".to_owned(),
            gateway_ip: gateway_ip.to_owned(),
            host_ip: host_ip.to_owned(),
            subnet: subnet.to_owned(),
        });
        Ok(())
    }

    fn register_iface(&mut self, node: &str, iface: &str) {
        if let Some(sw) = self.switches.iter_mut().find(|s| s.name == node) {
            sw.ifaces.push(iface.to_owned());
        } else if let Some(host) = self.hosts.iter_mut().find(|h| h.name == node) {
            host.ifaces.push(iface.to_owned());
        }
    }

    fn host(&self, name: &str) -> Result<&HostPlan, EmulationError> {
        self.hosts
            .iter()
            .find(|h| h.name == name)
            .ok_or_else(|| EmulationError::UnknownNode(name.to_owned()))
    }

    #[must_use]
    pub fn is_host(&self, name: &str) -> bool {
        self.hosts.iter().any(|h| h.name == name)
    }

    pub fn host_ip(&self, name: &str) -> Result<Ipv4Addr, EmulationError> {
        Ok(self.host(name)?.ip)
    }

    pub fn host_mac(&self, name: &str) -> Result<String, EmulationError> {
        Ok(self.host(name)?.mac.clone())
    }

    /// First interface a host was given; routes and static ARP entries
    /// attach here.
    pub fn host_primary_iface(&self, name: &str) -> Result<String, EmulationError> {
        let host = self.host(name)?;
        host.ifaces
            .first()
            .cloned()
            .ok_or_else(|| EmulationError::UnknownNode(name.to_owned()))
    }

    #[must_use]
    pub fn host_names(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    /// `(gateway ip, host-side interface)` of the staged NAT, if any.
    #[must_use]
    pub fn nat_route(&self) -> Option<(String, String)> {
        self.nat
            .as_ref()
            .map(|nat| (nat.gateway_ip.clone(), nat.host_if.clone()))
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, EmulationError> {
        Ok(self.runner.run(&spec).await?)
    }

    /// Materialise the staged plan, wait for every switch to dial the
    /// controller, then give its topology discovery a settling window.
    pub async fn start(&self) -> Result<(), EmulationError> {
        info!(
            switches = self.switches.len(),
            hosts = self.hosts.len(),
            links = self.links.len(),
            "building emulated network"
        );

        let controller_target = format!(
            "tcp:{}:{}",
            self.controller_ip, self.controller_openflow_port
        );
        for sw in &self.switches {
            let dpid_arg = format!("other-config:datapath-id={}", sw.dpid);
            self.run(CommandSpec::new(
                "ovs-vsctl",
                ["--may-exist", "add-br", sw.name.as_str()],
            ))
            .await?;
            self.run(CommandSpec::new(
                "ovs-vsctl",
                ["set", "bridge", sw.name.as_str(), dpid_arg.as_str()],
            ))
            .await?;
            self.run(CommandSpec::new(
                "ovs-vsctl",
                ["set-fail-mode", sw.name.as_str(), "secure"],
            ))
            .await?;
            self.run(CommandSpec::new(
                "ovs-vsctl",
                ["set-controller", sw.name.as_str(), controller_target.as_str()],
            ))
            .await?;
        }

        for host in &self.hosts {
            self.run(CommandSpec::new("ip", ["netns", "add", host.name.as_str()]))
                .await?;
            self.run(CommandSpec::new(
                "ip",
                ["-n", host.name.as_str(), "link", "set", "lo", "up"],
            ))
            .await?;
        }

        for link in &self.links {
            self.create_link(link).await?;
        }

        if let Some(nat) = &self.nat {
            self.create_nat(nat).await?;
        }

        self.wait_switches_connected().await?;

        let settle = timeouts::topology_settle();
        debug!(secs = settle.as_secs(), "settling after network start");
        sleep(settle).await;
        Ok(())
    }

    async fn create_link(&self, link: &LinkPlan) -> Result<(), EmulationError> {
        self.run(CommandSpec::new(
            "ip",
            [
                "link",
                "add",
                link.a_if.as_str(),
                "type",
                "veth",
                "peer",
                "name",
                link.b_if.as_str(),
            ],
        ))
        .await?;
        self.attach_endpoint(&link.a, &link.a_if, &link.shape).await?;
        self.attach_endpoint(&link.b, &link.b_if, &link.shape).await?;
        Ok(())
    }

    async fn attach_endpoint(
        &self,
        node: &str,
        iface: &str,
        shape: &LinkShape,
    ) -> Result<(), EmulationError> {
        if let Ok(host) = self.host(node) {
            let ns = host.name.as_str();
            self.run(CommandSpec::new("ip", ["link", "set", iface, "netns", ns]))
                .await?;
            self.run(CommandSpec::new(
                "ip",
                ["-n", ns, "link", "set", iface, "address", host.mac.as_str()],
            ))
            .await?;
            // Addresses only on the first interface; extra interfaces (the
            // NAT leg aside) do not occur for hosts in practice.
            if host.ifaces.first().map(String::as_str) == Some(iface) {
                let addr = format!("{}/8", host.ip);
                self.run(CommandSpec::new(
                    "ip",
                    ["-n", ns, "addr", "add", addr.as_str(), "dev", iface],
                ))
                .await?;
            }
            self.run(CommandSpec::new("ip", ["-n", ns, "link", "set", iface, "up"]))
                .await?;
            for spec in shape.shaping_commands(iface) {
                self.run(wrap_in_netns(ns, spec)).await?;
            }
        } else {
            self.run(CommandSpec::new("ovs-vsctl", ["add-port", node, iface]))
                .await?;
            self.run(CommandSpec::new("ip", ["link", "set", iface, "up"]))
                .await?;
            for spec in shape.shaping_commands(iface) {
                self.run(spec).await?;
            }
        }
        Ok(())
    }

    async fn create_nat(&self, nat: &NatPlan) -> Result<(), EmulationError> {
        let host_if = nat.host_if.as_str();
        let root_if = nat.root_if.as_str();
        let ns = nat.host.as_str();
        let gateway_addr = format!("{}/24", nat.gateway_ip);
        let host_addr = format!("{}/24", nat.host_ip);

        self.run(CommandSpec::new(
            "ip",
            [
                "link", "add", host_if, "type", "veth", "peer", "name", root_if,
            ],
        ))
        .await?;
        self.run(CommandSpec::new(
            "ip",
            ["link", "set", host_if, "netns", ns],
        ))
        .await?;
        self.run(CommandSpec::new(
            "ip",
            ["addr", "add", gateway_addr.as_str(), "dev", root_if],
        ))
        .await?;
        self.run(CommandSpec::new("ip", ["link", "set", root_if, "up"]))
            .await?;
        self.run(CommandSpec::new(
            "ip",
            ["-n", ns, "addr", "add", host_addr.as_str(), "dev", host_if],
        ))
        .await?;
        self.run(CommandSpec::new(
            "ip",
            ["-n", ns, "link", "set", host_if, "up"],
        ))
        .await?;
        self.run(CommandSpec::new("sysctl", ["-w", "net.ipv4.ip_forward=1"]))
            .await?;
        self.run(CommandSpec::new(
            "iptables",
            [
                "-t",
                "nat",
                "-A",
                "POSTROUTING",
                "-s",
                nat.subnet.as_str(),
                "-j",
                "MASQUERADE",
            ],
        ))
        .await?;
        Ok(())
    }

    async fn wait_switches_connected(&self) -> Result<(), EmulationError> {
        let deadline = adjust_timeout(timeouts::switch_connect_timeout());
        for sw in &self.switches {
            let connected = timeout(deadline, async {
                loop {
                    let probe = CommandSpec::new(
                        "ovs-vsctl",
                        ["get", "controller", sw.name.as_str(), "is_connected"],
                    )
                    .tolerant();
                    if let Ok(output) = self.run(probe).await {
                        if output.stdout.trim() == "true" {
                            return;
                        }
                    }
                    sleep(Duration::from_millis(500)).await;
                }
            })
            .await;

            if connected.is_err() {
                return Err(EmulationError::SwitchConnectTimeout(sw.name.clone()));
            }
        }
        info!("all switches connected to the controller");
        Ok(())
    }

    /// Toggle a link's administrative state without destroying it; both
    /// interface ends flip so either neighbor observes the change.
    pub async fn config_link(
        &self,
        a: &str,
        b: &str,
        status: LinkStatus,
    ) -> Result<(), EmulationError> {
        let link = self
            .links
            .iter()
            .find(|l| (l.a == a && l.b == b) || (l.a == b && l.b == a))
            .ok_or_else(|| EmulationError::LinkNotFound {
                a: a.to_owned(),
                b: b.to_owned(),
            })?;

        let state = status.to_string();
        for (node, iface) in [(&link.a, &link.a_if), (&link.b, &link.b_if)] {
            let spec = if self.is_host(node) {
                CommandSpec::new(
                    "ip",
                    [
                        "-n",
                        node.as_str(),
                        "link",
                        "set",
                        iface.as_str(),
                        state.as_str(),
                    ],
                )
            } else {
                CommandSpec::new("ip", ["link", "set", iface.as_str(), state.as_str()])
            };
            self.run(spec).await?;
        }
        debug!(a, b, %status, "link state changed");
        Ok(())
    }

    /// Take a switch out of service. With `delete_interfaces` false its
    /// veth ends stay behind, so neighboring switches report port-down to
    /// the controller instead of the ports silently vanishing.
    pub async fn stop_node(
        &self,
        name: &str,
        delete_interfaces: bool,
    ) -> Result<(), EmulationError> {
        let sw = self
            .switches
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| EmulationError::UnknownNode(name.to_owned()))?;

        info!(switch = name, delete_interfaces, "stopping node");
        self.run(CommandSpec::new("ovs-vsctl", ["del-br", sw.name.as_str()]))
            .await?;

        if delete_interfaces {
            for iface in &sw.ifaces {
                self.run(CommandSpec::new("ip", ["link", "del", iface.as_str()]).tolerant())
                    .await?;
            }
        }
        Ok(())
    }

    /// Argv for running a shell command line inside a host's namespace.
    pub fn host_shell_command(
        &self,
        name: &str,
        cmdline: &str,
    ) -> Result<HostCommand, EmulationError> {
        let host = self.host(name)?;
        Ok(HostCommand {
            host: host.name.clone(),
            argv: vec![
                "ip".to_owned(),
                "netns".to_owned(),
                "exec".to_owned(),
                host.name.clone(),
                "sh".to_owned(),
                "-c".to_owned(),
                cmdline.to_owned(),
            ],
        })
    }

    /// One discovery ping; loss is tolerated and reported, not fatal.
    pub async fn ping(&self, from: &str, target: Ipv4Addr) -> Result<bool, EmulationError> {
        let host = self.host(from)?;
        let target = target.to_string();
        let spec = CommandSpec::new(
            "ip",
            [
                "netns",
                "exec",
                host.name.as_str(),
                "ping",
                "-c",
                "1",
                "-W",
                "2",
                target.as_str(),
            ],
        )
        .tolerant();
        Ok(self.run(spec).await?.success())
    }

    /// Static ARP entry on `host` for `ip` -> `mac`.
    pub async fn set_static_arp(
        &self,
        host: &str,
        ip: Ipv4Addr,
        mac: &str,
    ) -> Result<(), EmulationError> {
        let iface = self.host_primary_iface(host)?;
        let ip = ip.to_string();
        self.run(CommandSpec::new(
            "ip",
            [
                "-n",
                host,
                "neigh",
                "replace",
                ip.as_str(),
                "lladdr",
                mac,
                "dev",
                iface.as_str(),
            ],
        ))
        .await?;
        Ok(())
    }

    pub async fn set_default_route(
        &self,
        host: &str,
        via: &str,
        iface: &str,
    ) -> Result<(), EmulationError> {
        let _ = self.host(host)?;
        self.run(CommandSpec::new(
            "ip",
            [
                "-n", host, "route", "replace", "default", "via", via, "dev", iface,
            ],
        ))
        .await?;
        Ok(())
    }

    /// Pin a single destination (e.g. a multicast group address) to an
    /// interface.
    pub async fn add_host_route(
        &self,
        host: &str,
        ip: Ipv4Addr,
        iface: &str,
    ) -> Result<(), EmulationError> {
        let _ = self.host(host)?;
        let destination = format!("{ip}/32");
        self.run(CommandSpec::new(
            "ip",
            [
                "-n",
                host,
                "route",
                "replace",
                destination.as_str(),
                "dev",
                iface,
            ],
        ))
        .await?;
        Ok(())
    }

    /// Best-effort teardown in reverse build order.
    pub async fn stop(&self) -> Result<(), EmulationError> {
        info!("stopping emulated network");
        for link in &self.links {
            // Removing one veth end removes its peer too.
            let spec = if self.is_host(&link.a) {
                CommandSpec::new(
                    "ip",
                    ["-n", link.a.as_str(), "link", "del", link.a_if.as_str()],
                )
            } else {
                CommandSpec::new("ip", ["link", "del", link.a_if.as_str()])
            };
            self.run(spec.tolerant()).await?;
        }
        if let Some(nat) = &self.nat {
            self.run(CommandSpec::new("ip", ["link", "del", nat.root_if.as_str()]).tolerant())
                .await?;
            self.run(
                CommandSpec::new(
                    "iptables",
                    [
                        "-t",
                        "nat",
                        "-D",
                        "POSTROUTING",
                        "-s",
                        nat.subnet.as_str(),
                        "-j",
                        "MASQUERADE",
                    ],
                )
                .tolerant(),
            )
            .await?;
        }
        for sw in &self.switches {
            self.run(
                CommandSpec::new("ovs-vsctl", ["--if-exists", "del-br", sw.name.as_str()])
                    .tolerant(),
            )
            .await?;
        }
        for host in &self.hosts {
            self.run(CommandSpec::new("ip", ["netns", "del", host.name.as_str()]).tolerant())
                .await?;
        }
        Ok(())
    }

    /// Deep reset for leftovers a failed [`stop`](Self::stop) may leave:
    /// stale namespaces, orphaned bridges, dangling veth ends.
    pub async fn cleanup(&self) -> Result<(), EmulationError> {
        info!("deep-cleaning emulation leftovers");
        self.run(CommandSpec::new("ip", ["-all", "netns", "delete"]).tolerant())
            .await?;
        for sw in &self.switches {
            self.run(
                CommandSpec::new("ovs-vsctl", ["--if-exists", "del-br", sw.name.as_str()])
                    .tolerant(),
            )
            .await?;
        }
        for link in &self.links {
            for iface in [&link.a_if, &link.b_if] {
                self.run(CommandSpec::new("ip", ["link", "del", iface.as_str()]).tolerant())
                    .await?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn expected_counts(&self) -> ViewCounts {
        ViewCounts {
            hosts: self.hosts.len(),
            switches: self.switches.len(),
            links: self.links.len(),
        }
    }
}

fn wrap_in_netns(ns: &str, spec: CommandSpec) -> CommandSpec {
    let mut argv = vec![
        "netns".to_owned(),
        "exec".to_owned(),
        ns.to_owned(),
        spec.program.clone(),
    ];
    argv.extend(spec.args.iter().cloned());
    let mut wrapped = CommandSpec::new("ip", argv);
    wrapped.allow_failure = spec.allow_failure;
    wrapped
}

#[async_trait::async_trait]
impl TopologyView for EmulatedNetwork {
    async fn counts(&self) -> Result<ViewCounts, ViewError> {
        Ok(self.expected_counts())
    }
}

#[cfg(test)]
mod tests {
    use super::{command::testutil::RecordingRunner, *};

    fn two_switch_net(runner: Arc<RecordingRunner>) -> EmulatedNetwork {
        let mut net = EmulatedNetwork::new(runner, "127.0.0.1", 6653);
        net.add_switch("a0", "a000000000000000").expect("switch a0");
        net.add_switch("a1", "a000000000000001").expect("switch a1");
        net.add_host("h0-b0", "10.131.0.0".parse().expect("ip"), "00:00:0a:83:00:00")
            .expect("host");
        net.add_link("a0", "a1", LinkShape::from_attrs(&Default::default(), 0.0))
            .expect("link");
        net.add_link("a0", "h0-b0", LinkShape::from_attrs(&Default::default(), 0.0))
            .expect("host link");
        net
    }

    #[tokio::test]
    async fn link_toggle_flips_both_ends() {
        let runner = Arc::new(RecordingRunner::new());
        let net = two_switch_net(Arc::clone(&runner));

        net.config_link("a1", "a0", LinkStatus::Down)
            .await
            .expect("toggle works on the unordered pair");

        let lines = runner.command_lines();
        assert!(lines.iter().any(|l| l == "ip link set a0-eth0 down"));
        assert!(lines.iter().any(|l| l == "ip link set a1-eth0 down"));
    }

    #[tokio::test]
    async fn stop_node_preserves_interfaces_by_default() {
        let runner = Arc::new(RecordingRunner::new());
        let net = two_switch_net(Arc::clone(&runner));

        net.stop_node("a0", false).await.expect("stop works");

        let lines = runner.command_lines();
        assert!(lines.iter().any(|l| l == "ovs-vsctl del-br a0"));
        assert!(
            !lines.iter().any(|l| l.starts_with("ip link del")),
            "interfaces must survive a default stop"
        );
    }

    #[tokio::test]
    async fn stop_node_can_remove_interfaces_explicitly() {
        let runner = Arc::new(RecordingRunner::new());
        let net = two_switch_net(Arc::clone(&runner));

        net.stop_node("a0", true).await.expect("stop works");

        let lines = runner.command_lines();
        assert!(lines.iter().any(|l| l == "ip link del a0-eth0"));
        assert!(lines.iter().any(|l| l == "ip link del a0-eth1"));
    }

    #[tokio::test]
    async fn duplicate_and_unknown_nodes_are_rejected() {
        let runner = Arc::new(RecordingRunner::new());
        let mut net = two_switch_net(runner);
        assert!(matches!(
            net.add_switch("a0", "ffff"),
            Err(EmulationError::DuplicateNode(_))
        ));
        assert!(matches!(
            net.add_link("a0", "ghost", LinkShape::from_attrs(&Default::default(), 0.0)),
            Err(EmulationError::UnknownNode(_))
        ));
    }

    #[test]
    fn host_commands_run_inside_the_namespace() {
        let runner = Arc::new(RecordingRunner::new());
        let net = two_switch_net(runner);
        let cmd = net
            .host_shell_command("h0-b0", "scale-client -q 10")
            .expect("host exists");
        assert_eq!(cmd.argv[..4], ["ip", "netns", "exec", "h0-b0"]);
        assert_eq!(cmd.argv[5], "-c");
    }

    #[test]
    fn expected_counts_exclude_the_nat() {
        let runner = Arc::new(RecordingRunner::new());
        let mut net = two_switch_net(runner);
        net.add_nat("h0-b0", "11.0.0.2", "11.0.0.3", "11.0.0.0/24")
            .expect("nat host exists");
        let counts = net.expected_counts();
        assert_eq!(counts.hosts, 1);
        assert_eq!(counts.switches, 2);
        assert_eq!(counts.links, 2);
    }
}
