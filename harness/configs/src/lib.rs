use std::{ops::Mul as _, sync::LazyLock, time::Duration};

use ride_harness_env as rh_env;

pub mod constants;
pub mod params;
pub mod timeouts;

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(rh_env::slow_test_env);

pub static WITH_LOGS: LazyLock<bool> = LazyLock::new(|| !rh_env::disable_logs());

const SLOW_ENV_TIMEOUT_MULTIPLIER: u32 = 2;

/// In slow environments (CI, nested virtualisation) use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV {
        d.mul(SLOW_ENV_TIMEOUT_MULTIPLIER)
    } else {
        d
    }
}
