//! Traffic-control shaping for emulated links.

use super::command::CommandSpec;
use crate::topology::LinkAttrs;

/// Shaping applied to both interfaces of one emulated link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkShape {
    pub bw_mbps: f64,
    pub delay_ms: f64,
    pub jitter_ms: f64,
    pub loss_pct: f64,
}

impl LinkShape {
    /// Shape from topology attributes with the experiment-wide loss rate
    /// layered on top of whatever the link itself declares.
    #[must_use]
    pub fn from_attrs(attrs: &LinkAttrs, extra_loss_pct: f64) -> Self {
        Self {
            bw_mbps: attrs.bw_mbps,
            delay_ms: attrs.latency_ms,
            jitter_ms: attrs.jitter_ms,
            loss_pct: (attrs.loss_pct + extra_loss_pct).clamp(0.0, 100.0),
        }
    }

    /// Rate limiting via a token bucket, delay/jitter/loss via netem
    /// chained underneath it.
    #[must_use]
    pub(crate) fn shaping_commands(&self, iface: &str) -> Vec<CommandSpec> {
        let rate = format!("{}mbit", self.bw_mbps);
        let tbf = CommandSpec::new(
            "tc",
            [
                "qdisc",
                "add",
                "dev",
                iface,
                "root",
                "handle",
                "1:",
                "tbf",
                "rate",
                rate.as_str(),
                "burst",
                "15k",
                "latency",
                "50ms",
            ],
        );
        let mut netem_args: Vec<String> = [
            "qdisc", "add", "dev", iface, "parent", "1:1", "handle", "10:", "netem", "delay",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();
        netem_args.push(format!("{}ms", self.delay_ms));
        netem_args.push(format!("{}ms", self.jitter_ms));
        if self.loss_pct > 0.0 {
            netem_args.push("loss".to_owned());
            netem_args.push(format!("{}%", self.loss_pct));
        }
        vec![tbf, CommandSpec::new("tc", netem_args)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_combines_and_clamps() {
        let attrs = LinkAttrs {
            loss_pct: 1.0,
            ..LinkAttrs::default()
        };
        assert_eq!(LinkShape::from_attrs(&attrs, 2.0).loss_pct, 3.0);
        assert_eq!(LinkShape::from_attrs(&attrs, 200.0).loss_pct, 100.0);
    }

    #[test]
    fn zero_loss_omits_the_netem_loss_clause() {
        let shape = LinkShape::from_attrs(&LinkAttrs::default(), 0.0);
        let commands = shape.shaping_commands("a0-eth1");
        assert_eq!(commands.len(), 2);
        assert!(!commands[1].command_line().contains("loss"));

        let lossy = LinkShape {
            loss_pct: 2.5,
            ..shape
        };
        let lossy_cmds = lossy.shaping_commands("a0-eth1");
        assert!(lossy_cmds[1].command_line().contains("loss 2.5%"));
    }
}
