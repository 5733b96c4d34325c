//! Per-role client configurations.
//!
//! Every application process is the same opaque client binary configured
//! entirely through the module DSL; what differs between the server, the
//! cloud, publishers, and subscribers is which modules each carries.

use std::{net::Ipv4Addr, path::Path};

use serde_json::json;

use super::module_config::{ModuleSpec, ScaleConfig};
use ride_harness_config::constants;

/// Shared command-line prefix: quit time plus log level.
#[must_use]
pub fn base_args(quit_time_secs: u64, debug_level: &str) -> String {
    format!("-q {quit_time_secs} --log {debug_level}")
}

/// Full shell command line for a client with the given config.
#[must_use]
pub fn scale_client_command(base: &str, cfg: &ScaleConfig) -> String {
    format!("{} {}{}", constants::SCALE_CLIENT_COMMAND, base, cfg.render())
}

/// Controller coordinates handed to modules that talk to the SDN
/// controller themselves.
#[derive(Clone, Debug)]
pub struct SdnConfig {
    pub adapter_type: String,
    pub ip: String,
    pub port: u16,
}

impl SdnConfig {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "topology_adapter_type": self.adapter_type,
            "controller_ip": self.ip,
            "controller_port": self.port,
        })
    }
}

/// A data path registered with the monitoring application: gateway name,
/// gateway DPID, cloud DPID, and the probing source port.
#[derive(Clone, Debug)]
pub struct DataPathArg {
    pub gateway: String,
    pub gateway_dpid: String,
    pub cloud_dpid: String,
    pub src_port: u16,
}

pub struct ServerRole<'a> {
    pub with_ride_d: bool,
    pub with_ride_c: bool,
    pub use_multicast: bool,
    pub addresses: &'a [(Ipv4Addr, u16)],
    pub ntrees: usize,
    pub tree_construction_algorithm: &'a str,
    pub tree_choosing_heuristic: &'a str,
    pub max_alert_retries: Option<u32>,
    pub server_dpid: &'a str,
    pub cloud_dpid: Option<&'a str>,
    pub sdn: &'a SdnConfig,
    pub data_paths: &'a [DataPathArg],
    /// Publisher (address, CoAP source port) pairs the monitor reroutes.
    pub publishers: &'a [(Ipv4Addr, u16)],
    pub outputs_dir: &'a Path,
}

/// Edge server: multicast alert sink, alert aggregator, and (when enabled)
/// the data-path monitor.
#[must_use]
pub fn server_config(role: &ServerRole<'_>) -> ScaleConfig {
    let mut cfg = ScaleConfig::new();

    if role.with_ride_d {
        let addresses: Vec<_> = role
            .addresses
            .iter()
            .map(|(addr, port)| json!([addr.to_string(), port]))
            .collect();
        cfg = cfg.event_sink(
            ModuleSpec::new("RideD", "seismic_warning_test.ride_d_event_sink.RideDEventSink")
                .arg("multicast", json!(role.use_multicast))
                .arg("addresses", json!(addresses))
                .arg("ntrees", json!(role.ntrees))
                .arg(
                    "tree_construction_algorithm",
                    json!(role.tree_construction_algorithm),
                )
                .arg("tree_choosing_heuristic", json!(role.tree_choosing_heuristic))
                .arg("max_retries", json!(role.max_alert_retries))
                .arg("dpid", json!(role.server_dpid))
                .arg("topology_mgr", role.sdn.to_json()),
        );
        cfg = cfg.application(
            ModuleSpec::new(
                "EdgeSeismicServer",
                "seismic_warning_test.seismic_alert_server.SeismicAlertServer",
            )
            .arg(
                "output_events_file",
                json!(role.outputs_dir.join("srv").to_string_lossy()),
            ),
        );
        cfg = cfg.network(
            ModuleSpec::new("CoapServer", "coap_server.CoapServer").arg("events_root", json!("/events/")),
        );
    }

    if role.with_ride_c {
        let data_paths: Vec<_> = role
            .data_paths
            .iter()
            .map(|dp| json!([dp.gateway, dp.gateway_dpid, dp.cloud_dpid, dp.src_port]))
            .collect();
        let publishers: Vec<_> = role
            .publishers
            .iter()
            .map(|(ip, port)| json!([ip.to_string(), port]))
            .collect();
        cfg = cfg.application(
            ModuleSpec::new("RideC", "seismic_warning_test.ride_c_application.RideCApplication")
                .arg("topology_mgr", role.sdn.to_json())
                .arg("data_paths", json!(data_paths))
                .arg("edge_server", json!(role.server_dpid))
                .arg("cloud_server", json!(role.cloud_dpid))
                .arg("publishers", json!(publishers)),
        );
    }

    cfg
}

pub struct CloudRole<'a> {
    pub with_ride_d: bool,
    pub cloud_dpid: &'a str,
    pub outputs_dir: &'a Path,
}

/// Cloud server: unicast-only alert sink, its own aggregator output, and
/// the UDP echo responder for data-path probes. The cloud never runs the
/// data-path monitor.
#[must_use]
pub fn cloud_config(role: &CloudRole<'_>) -> ScaleConfig {
    let mut cfg = ScaleConfig::new().network(
        ModuleSpec::new("EchoServer", "udp_echo_server.UdpEchoServer")
            .arg("port", json!(constants::ECHO_SERVER_PORT)),
    );

    if role.with_ride_d {
        cfg = cfg
            .event_sink(
                ModuleSpec::new("RideD", "seismic_warning_test.ride_d_event_sink.RideDEventSink")
                    .arg("multicast", json!(false))
                    .arg("addresses", json!(null))
                    .arg("dpid", json!(role.cloud_dpid)),
            )
            .application(
                ModuleSpec::new(
                    "CloudSeismicServer",
                    "seismic_warning_test.seismic_alert_server.SeismicAlertServer",
                )
                .arg(
                    "output_events_file",
                    json!(role.outputs_dir.join("cloud").to_string_lossy()),
                ),
            )
            .network(
                ModuleSpec::new("CoapServer", "coap_server.CoapServer")
                    .arg("events_root", json!("/events/")),
            );
    }

    cfg
}

pub struct PublisherRole<'a> {
    pub client_id: &'a str,
    /// Where picks are sunk; the cloud broker when present, else the edge.
    pub sink_ip: Ipv4Addr,
    /// Absolute start so slow process startup cannot skew the first pick.
    pub seismic_start_time_unix: f64,
    pub seismic_sample_interval_secs: f64,
    /// Randomized 5-10 s so congestion sensors do not fire in lockstep.
    pub congestion_start_delay_secs: f64,
    pub outputs_dir: &'a Path,
}

#[must_use]
pub fn publisher_config(role: &PublisherRole<'_>) -> ScaleConfig {
    ScaleConfig::new()
        .sensor(
            ModuleSpec::new("SeismicSensor", "dummy.dummy_virtual_sensor.DummyVirtualSensor")
                .arg("event_type", json!(constants::SEISMIC_PICK_TOPIC))
                .arg("dynamic_event_data", json!({"seq": 0}))
                .arg(
                    "output_events_file",
                    json!(
                        role.outputs_dir
                            .join(format!("publisher_{}", role.client_id))
                            .to_string_lossy()
                    ),
                )
                .arg("start_time", json!(role.seismic_start_time_unix))
                .arg("sample_interval", json!(role.seismic_sample_interval_secs)),
        )
        .sensor(
            ModuleSpec::new("IoTSensor", "dummy.dummy_virtual_sensor.DummyVirtualSensor")
                .arg("event_type", json!(constants::IOT_GENERIC_TOPIC))
                .arg("dynamic_event_data", json!({"seq": 0}))
                .arg(
                    "output_events_file",
                    json!(
                        role.outputs_dir
                            .join(format!("congestor_{}", role.client_id))
                            .to_string_lossy()
                    ),
                )
                .arg("start_delay", json!(role.congestion_start_delay_secs))
                .arg(
                    "sample_interval",
                    json!(constants::IOT_CONGESTION_INTERVAL_SECS),
                ),
        )
        // Picks are confirmable; congestion traffic is best-effort. The
        // two clients sit on distinct source ports so they are
        // distinguishable on the wire.
        .event_sink(
            ModuleSpec::new(
                "SeismicCoapEventSink",
                "remote_coap_event_sink.RemoteCoapEventSink",
            )
            .arg("hostname", json!(role.sink_ip.to_string()))
            .arg("src_port", json!(constants::COAP_CLIENT_BASE_SRC_PORT))
            .arg("topics_to_sink", json!([constants::SEISMIC_PICK_TOPIC])),
        )
        .event_sink(
            ModuleSpec::new(
                "GenericCoapEventSink",
                "remote_coap_event_sink.RemoteCoapEventSink",
            )
            .arg("hostname", json!(role.sink_ip.to_string()))
            .arg("src_port", json!(constants::COAP_CLIENT_BASE_SRC_PORT + 1))
            .arg("topics_to_sink", json!([constants::IOT_GENERIC_TOPIC]))
            .arg("confirmable_messages", json!(false)),
        )
}

pub struct SubscriberRole<'a> {
    pub client_id: &'a str,
    /// Edge broker always, plus the cloud broker when a cloud runs.
    pub alerting_brokers: &'a [Ipv4Addr],
    pub outputs_dir: &'a Path,
}

#[must_use]
pub fn subscriber_config(role: &SubscriberRole<'_>) -> ScaleConfig {
    let brokers: Vec<_> = role
        .alerting_brokers
        .iter()
        .map(|ip| json!(ip.to_string()))
        .collect();
    ScaleConfig::new()
        .network(
            ModuleSpec::new("CoapServer", "coap_server.CoapServer")
                .arg("events_root", json!("/events/")),
        )
        .application(
            ModuleSpec::new(
                "SeismicSubscriber",
                "seismic_warning_test.seismic_alert_subscriber.SeismicAlertSubscriber",
            )
            .arg("remote_brokers", json!(brokers))
            .arg(
                "output_file",
                json!(
                    role.outputs_dir
                        .join(format!("subscriber_{}", role.client_id))
                        .to_string_lossy()
                ),
            ),
        )
}

/// UDP congestion stream toward the server; `-b` pins the bandwidth.
#[must_use]
pub fn iperf_client_command(port: u16, duration_secs: u64, bw_mbps: f64, server_ip: Ipv4Addr) -> String {
    format!("iperf -p {port} -t {duration_secs} -u -b {bw_mbps}M -c {server_ip}")
}

/// Matching server; terminated explicitly because older iperf versions do
/// not honor `-t` on the server side.
#[must_use]
pub fn iperf_server_command(port: u16, duration_secs: u64) -> String {
    format!("iperf -p {port} -t {duration_secs} -u -s")
}
