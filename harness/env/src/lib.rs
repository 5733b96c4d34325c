use std::{env, path::PathBuf};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("RIDE_SLOW_ENV").is_ok_and(|s| s == "true")
}

/// Per-host stdout/stderr capture is on by default; this switches it off.
#[must_use]
pub fn disable_logs() -> bool {
    env::var("RIDE_DISABLE_LOGS").is_ok_and(|val| val.eq_ignore_ascii_case("true"))
}

#[must_use]
pub fn log_dir() -> Option<PathBuf> {
    env::var("RIDE_LOG_DIR").ok().map(PathBuf::from)
}

#[must_use]
pub fn log_level() -> Option<String> {
    env::var("RIDE_LOG_LEVEL").ok()
}

#[must_use]
pub fn controller_ip() -> Option<String> {
    env::var("RIDE_CONTROLLER_IP").ok()
}

#[must_use]
pub fn controller_port() -> Option<u16> {
    env::var("RIDE_CONTROLLER_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
}

#[must_use]
pub fn controller_user() -> Option<String> {
    env::var("RIDE_CONTROLLER_USER").ok()
}

#[must_use]
pub fn controller_password() -> Option<String> {
    env::var("RIDE_CONTROLLER_PASSWORD").ok()
}

/// When set, host discovery pings every host pair instead of the
/// star-to-server pattern.
#[must_use]
pub fn all_pairs_ping() -> bool {
    env::var("RIDE_ALL_PAIRS_PING").is_ok_and(|val| val.eq_ignore_ascii_case("true"))
}
