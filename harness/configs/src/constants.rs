use ride_harness_env as rh_env;

/// Address base handed to the emulation for auto-assigned host addressing.
pub const IP_SUBNET: &str = "10.0.0.0/8";

/// First multicast group address; tree `i` uses base + i.
pub const MULTICAST_ADDRESS_BASE: &str = "224.0.1.100";

/// First UDP source port used to disambiguate alert trees; tree `i` uses
/// base + i so responses follow the tree they arrived on.
pub const MULTICAST_ALERT_BASE_SRC_PORT: u16 = 5000;

/// First UDP source port assigned to data-path probes, one per gateway in
/// ascending gateway-name order.
pub const PROBE_BASE_SRC_PORT: u16 = 9900;

/// Port the cloud's UDP echo server answers probes on.
pub const ECHO_SERVER_PORT: u16 = 9999;

/// Source port of the confirmable (seismic) CoAP client; the generic
/// best-effort client uses base + 1.
pub const COAP_CLIENT_BASE_SRC_PORT: u16 = 7777;

/// First port for the iperf congestion streams; generator `i` uses base + i
/// so one server can serve every stream.
pub const IPERF_BASE_PORT: u16 = 5001;

/// Priority for statically installed path rules; high enough to shadow any
/// reactive rule the controller computes on its own.
pub const STATIC_PATH_FLOW_RULE_PRIORITY: u16 = 65_000;

/// Interval (seconds) of the background IoT congestion sensor.
pub const IOT_CONGESTION_INTERVAL_SECS: f64 = 0.5;

pub const SEISMIC_PICK_TOPIC: &str = "seismic_pick";
pub const IOT_GENERIC_TOPIC: &str = "generic_iot";

/// OpenFlow port switches dial the controller on.
pub const OPENFLOW_CONTROLLER_PORT: u16 = 6653;

pub const DEFAULT_CONTROLLER_IP: &str = "127.0.0.1";
pub const DEFAULT_CONTROLLER_REST_PORT: u16 = 8181;
pub const DEFAULT_CONTROLLER_USER: &str = "karaf";
pub const DEFAULT_CONTROLLER_PASSWORD: &str = "karaf";

/// Root-side and server-side addresses of the out-of-band NAT link that lets
/// the server reach the controller's REST API.
pub const NAT_GATEWAY_IP: &str = "11.0.0.2";
pub const NAT_SERVER_IP: &str = "11.0.0.3";
pub const NAT_SUBNET: &str = "11.0.0.0/24";

/// Application client driven as an opaque command line on each host.
pub const SCALE_CLIENT_COMMAND: &str = "scale-client";

/// Sweep command that finishes off clients which survived the per-process
/// kill pass.
pub const CLEANUP_SCALE_CLIENTS: &str = "pkill -f scale-client";

/// Controller reset commands for the ONOS dialect.
pub const CONTROLLER_RESET_CMD: &str = "onos localhost wipe-out please";
pub const CONTROLLER_SERVICE_RESTART_CMD: &str = "systemctl restart onos";
pub const STOP_OVS_CMD: &str = "systemctl stop openvswitch-switch";
pub const START_OVS_CMD: &str = "systemctl start openvswitch-switch";

/// Resolve the controller address, preferring `RIDE_CONTROLLER_IP`.
#[must_use]
pub fn controller_ip() -> String {
    rh_env::controller_ip().unwrap_or_else(|| DEFAULT_CONTROLLER_IP.to_owned())
}

/// Resolve the controller REST port, preferring `RIDE_CONTROLLER_PORT`.
#[must_use]
pub fn controller_rest_port() -> u16 {
    rh_env::controller_port().unwrap_or(DEFAULT_CONTROLLER_REST_PORT)
}

/// Whether host discovery pings all pairs or just host<->server.
#[must_use]
pub fn all_pairs_ping() -> bool {
    rh_env::all_pairs_ping()
}
