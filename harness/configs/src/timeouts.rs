use std::{env, time::Duration};

/// Seconds between launching the applications and the first scheduled
/// data-path change (sensors start picking at the same offset).
pub const SEISMIC_EVENT_DELAY_SECS: u64 = 30;

/// Spacing of scheduled data-path changes; also the seismic sample interval.
pub const TIME_BETWEEN_SEISMIC_EVENTS_SECS: u64 = 10;

/// Total wall-clock length of one trial's traffic phase.
pub const EXPERIMENT_DURATION_SECS: u64 = 120;

/// Pause between trials so OVS and the controller finish resetting.
pub const SLEEP_TIME_BETWEEN_RUNS_SECS: u64 = 15;

/// Settling window after the emulation starts and after discovery pings.
pub const TOPOLOGY_SETTLE_SECS: u64 = 5;

/// Natural drain window before processes are polled and killed.
pub const PROCESS_DRAIN_SECS: u64 = 20;

/// Per-process wait before a hard kill during drain.
pub const PROCESS_EXIT_WAIT_SECS: u64 = 2;

/// Sleep between controller-reset polls; polling is unbounded because stale
/// controller state would invalidate every following trial.
pub const CONTROLLER_RESET_POLL_SECS: u64 = 10;

/// Convergence loop backoff: after a matching view vs. after a mismatch.
pub const CONVERGENCE_OK_BACKOFF_SECS: u64 = 2;
pub const CONVERGENCE_MISMATCH_BACKOFF_SECS: u64 = 10;

/// How long to wait for every switch to dial the controller.
pub const SWITCH_CONNECT_TIMEOUT_SECS: u64 = 60;

fn env_duration(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

pub fn seismic_event_delay() -> Duration {
    env_duration("RIDE_SEISMIC_EVENT_DELAY_SECS", SEISMIC_EVENT_DELAY_SECS)
}

pub fn time_between_seismic_events() -> Duration {
    env_duration(
        "RIDE_TIME_BETWEEN_SEISMIC_EVENTS_SECS",
        TIME_BETWEEN_SEISMIC_EVENTS_SECS,
    )
}

pub fn experiment_duration() -> Duration {
    env_duration("RIDE_EXPERIMENT_DURATION_SECS", EXPERIMENT_DURATION_SECS)
}

pub fn sleep_between_runs() -> Duration {
    env_duration("RIDE_SLEEP_BETWEEN_RUNS_SECS", SLEEP_TIME_BETWEEN_RUNS_SECS)
}

pub fn topology_settle() -> Duration {
    env_duration("RIDE_TOPOLOGY_SETTLE_SECS", TOPOLOGY_SETTLE_SECS)
}

pub fn process_drain() -> Duration {
    env_duration("RIDE_PROCESS_DRAIN_SECS", PROCESS_DRAIN_SECS)
}

pub fn process_exit_wait() -> Duration {
    env_duration("RIDE_PROCESS_EXIT_WAIT_SECS", PROCESS_EXIT_WAIT_SECS)
}

pub fn controller_reset_poll() -> Duration {
    env_duration("RIDE_CONTROLLER_RESET_POLL_SECS", CONTROLLER_RESET_POLL_SECS)
}

pub fn switch_connect_timeout() -> Duration {
    env_duration("RIDE_SWITCH_CONNECT_TIMEOUT_SECS", SWITCH_CONNECT_TIMEOUT_SECS)
}
