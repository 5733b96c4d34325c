//! Command-line module configuration for the application clients.
//!
//! Each child process receives its modules as JSON blobs on the command
//! line, grouped under four flags: `--applications`, `--sensors`,
//! `--event-sinks`, `--networks`. The shell convention is quirky: every
//! entry is wrapped in single quotes and embedded double quotes must be
//! backslash-escaped so they survive `sh -c` evaluation. That quirk lives
//! entirely in [`ModuleSpec::render`].

use serde_json::{Map, Value, json};

/// One module entry: a registry name, the class path to load, and kwargs.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleSpec {
    name: String,
    class_path: String,
    kwargs: Map<String, Value>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>, class_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_path: class_path.into(),
            kwargs: Map::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, key: &str, value: Value) -> Self {
        self.kwargs.insert(key.to_owned(), value);
        self
    }

    /// Shell-ready form: `'{"<name>": {..kwargs, "class": "<path>"}}' `.
    #[must_use]
    pub fn render(&self) -> String {
        let mut body = self.kwargs.clone();
        body.insert("class".to_owned(), json!(self.class_path));
        let entry = json!({ &self.name: body });
        format!("'{}' ", entry.to_string().replace('"', "\\\""))
    }
}

/// The four module categories a client accepts.
#[derive(Clone, Debug, Default)]
pub struct ScaleConfig {
    pub applications: Vec<ModuleSpec>,
    pub sensors: Vec<ModuleSpec>,
    pub event_sinks: Vec<ModuleSpec>,
    pub networks: Vec<ModuleSpec>,
}

impl ScaleConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn application(mut self, spec: ModuleSpec) -> Self {
        self.applications.push(spec);
        self
    }

    #[must_use]
    pub fn sensor(mut self, spec: ModuleSpec) -> Self {
        self.sensors.push(spec);
        self
    }

    #[must_use]
    pub fn event_sink(mut self, spec: ModuleSpec) -> Self {
        self.event_sinks.push(spec);
        self
    }

    #[must_use]
    pub fn network(mut self, spec: ModuleSpec) -> Self {
        self.networks.push(spec);
        self
    }

    /// Concatenate another config; a host that is both publisher and
    /// subscriber simply merges the two role configs.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.applications.extend(other.applications);
        self.sensors.extend(other.sensors);
        self.event_sinks.extend(other.event_sinks);
        self.networks.extend(other.networks);
        self
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (flag, entries) in [
            ("--applications", &self.applications),
            ("--sensors", &self.sensors),
            ("--networks", &self.networks),
            ("--event-sinks", &self.event_sinks),
        ] {
            if entries.is_empty() {
                continue;
            }
            out.push_str(&format!(" {flag} "));
            for entry in entries {
                out.push_str(&entry.render());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_wraps_in_single_quotes_and_escapes_double_quotes() {
        let spec = ModuleSpec::new("EchoServer", "udp_echo_server.UdpEchoServer")
            .arg("port", json!(9999));
        let rendered = spec.render();
        assert!(rendered.starts_with('\''));
        assert!(rendered.ends_with("' "));
        assert!(rendered.contains("\\\"class\\\""));
        // Every double quote must carry its escape; `sh -c` eats bare ones.
        assert!(!rendered.replace("\\\"", "").contains('"'));
    }

    #[test]
    fn rendered_entry_round_trips_through_unescaping() {
        let spec = ModuleSpec::new("RideD", "seismic_warning_test.ride_d_event_sink.RideDEventSink")
            .arg("ntrees", json!(2))
            .arg("addresses", json!([["224.0.1.100", 5000]]));
        let rendered = spec.render();

        let inner = rendered.trim_end().trim_matches('\'').replace("\\\"", "\"");
        let parsed: Value = serde_json::from_str(&inner).expect("unescaped JSON parses");
        assert_eq!(parsed["RideD"]["ntrees"], json!(2));
        assert_eq!(
            parsed["RideD"]["class"],
            json!("seismic_warning_test.ride_d_event_sink.RideDEventSink")
        );
    }

    #[test]
    fn empty_categories_are_omitted() {
        let cfg = ScaleConfig::new().network(ModuleSpec::new("CoapServer", "coap_server.CoapServer"));
        let rendered = cfg.render();
        assert!(rendered.contains("--networks"));
        assert!(!rendered.contains("--applications"));
        assert!(!rendered.contains("--sensors"));
    }

    #[test]
    fn merge_concatenates_role_configs() {
        let pubs = ScaleConfig::new().sensor(ModuleSpec::new("SeismicSensor", "dummy"));
        let subs = ScaleConfig::new().application(ModuleSpec::new("SeismicSubscriber", "subs"));
        let both = pubs.merge(subs);
        assert_eq!(both.sensors.len(), 1);
        assert_eq!(both.applications.len(), 1);
    }
}
