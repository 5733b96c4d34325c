//! Timed fault injection.
//!
//! The schedule fails every data path in ascending gateway order, then
//! recovers the first one: the monitor pins all publishers to the highest
//! priority (lowest-named) data path, so failing that one first is what
//! exercises fail-over. The "quake" — the configured batch of link and
//! node failures — fires immediately after the second data-path change,
//! with no await between the toggle and the batch so the controller sees
//! them as one event.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::emulation::{EmulatedNetwork, LinkStatus};

/// One scheduled data-path toggle, delay relative to the previous change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedChange {
    pub gateway: String,
    pub cloud_switch: String,
    pub status: LinkStatus,
    pub delay: Duration,
}

/// A change as it actually happened, wall-clock stamped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedChange {
    pub gateway: String,
    pub status: LinkStatus,
    pub at_unix: f64,
}

/// The batch applied at quake time.
#[derive(Clone, Debug, Default)]
pub struct QuakeSet {
    pub failed_links: Vec<(String, String)>,
    pub failed_nodes: Vec<String>,
}

impl QuakeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failed_links.is_empty() && self.failed_nodes.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScheduleOutcome {
    pub changes: Vec<RecordedChange>,
    pub quake_start_time: Option<f64>,
}

/// Fail every data path (first immediately, the rest one interval apart),
/// then recover the first after one more interval.
#[must_use]
pub fn build_schedule(
    data_path_links: &[(String, String)],
    interval: Duration,
) -> Vec<PlannedChange> {
    let mut sorted = data_path_links.to_vec();
    sorted.sort();

    let mut changes = Vec::with_capacity(sorted.len() + 1);
    for (i, (gateway, cloud_switch)) in sorted.iter().enumerate() {
        changes.push(PlannedChange {
            gateway: gateway.clone(),
            cloud_switch: cloud_switch.clone(),
            status: LinkStatus::Down,
            delay: if i == 0 { Duration::ZERO } else { interval },
        });
    }
    if let Some((gateway, cloud_switch)) = sorted.first() {
        changes.push(PlannedChange {
            gateway: gateway.clone(),
            cloud_switch: cloud_switch.clone(),
            status: LinkStatus::Up,
            delay: interval,
        });
    }
    changes
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Execute the schedule, recording the actual time of every change.
///
/// Per-change sleeps are shortened by however long the previous toggle
/// took, so a slow data plane cannot stretch the schedule past one
/// interval per change. Toggle failures are logged and the schedule
/// presses on; a missing change is itself an observable outcome.
pub async fn execute(
    net: &EmulatedNetwork,
    schedule: &[PlannedChange],
    quake: &QuakeSet,
) -> ScheduleOutcome {
    let mut outcome = ScheduleOutcome::default();
    let mut last_change = tokio::time::Instant::now();

    for (i, change) in schedule.iter().enumerate() {
        debug!(gateway = %change.gateway, "waiting for next data-path change");
        let elapsed = last_change.elapsed();
        sleep(change.delay.saturating_sub(elapsed)).await;

        let at_unix = unix_now();
        last_change = tokio::time::Instant::now();
        info!(
            gateway = %change.gateway,
            cloud_switch = %change.cloud_switch,
            status = %change.status,
            at_unix,
            "changing data-path link"
        );
        if let Err(err) = net
            .config_link(&change.gateway, &change.cloud_switch, change.status)
            .await
        {
            error!(gateway = %change.gateway, error = %err, "data-path toggle failed");
        }
        outcome.changes.push(RecordedChange {
            gateway: change.gateway.clone(),
            status: change.status,
            at_unix,
        });

        // The second data-path failure is the local earthquake; the batch
        // goes in back-to-back with the toggle so the controller cannot
        // react in between.
        if i == 1 && !quake.is_empty() {
            outcome.quake_start_time = Some(apply_quake(net, quake).await);
        }
    }

    if schedule.is_empty() && !quake.is_empty() {
        // No data paths to cycle (no cloud): the quake still happens.
        outcome.quake_start_time = Some(apply_quake(net, quake).await);
    }

    outcome
}

async fn apply_quake(net: &EmulatedNetwork, quake: &QuakeSet) -> f64 {
    let quake_time = unix_now();
    info!(
        links = quake.failed_links.len(),
        nodes = quake.failed_nodes.len(),
        at_unix = quake_time,
        "earthquake: applying failure model"
    );
    for (a, b) in &quake.failed_links {
        debug!(a = %a, b = %b, "failing link");
        if let Err(err) = net.config_link(a, b, LinkStatus::Down).await {
            error!(a = %a, b = %b, error = %err, "link failure failed");
        }
    }
    for node in &quake.failed_nodes {
        if let Err(err) = net.stop_node(node, false).await {
            error!(node = %node, error = %err, "node stop failed");
        }
    }
    debug!(done_at = unix_now(), "failure model applied");
    quake_time
}
