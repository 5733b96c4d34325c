//! Reconciliation between the emulation's topology and the controller's.
//!
//! Controllers discover hosts asynchronously from ARP traffic, so the
//! emulation elicits discovery (pings plus static ARP programming) and then
//! polls until both sides agree on host, switch, and link counts. No
//! forwarding state may be installed before that point: rules referencing
//! an undiscovered host would silently do nothing.

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    DynError,
    topology::view::{TopologyView, ViewCounts},
};
use ride_harness_config::timeouts;

/// Every how many unsuccessful polls discovery is re-elicited.
const REELICIT_EVERY: u32 = 5;

/// Triggers host discovery on demand: ping sweep plus static ARP entries.
#[async_trait]
pub trait DiscoveryElicitor: Send + Sync {
    /// Returns the observed ping loss fraction in `[0, 1]`.
    async fn elicit(&self) -> Result<f64, DynError>;
}

pub struct ConvergenceCoordinator<'a> {
    expected: &'a dyn TopologyView,
    observed: &'a dyn TopologyView,
    elicitor: &'a dyn DiscoveryElicitor,
}

impl<'a> ConvergenceCoordinator<'a> {
    #[must_use]
    pub fn new(
        expected: &'a dyn TopologyView,
        observed: &'a dyn TopologyView,
        elicitor: &'a dyn DiscoveryElicitor,
    ) -> Self {
        Self {
            expected,
            observed,
            elicitor,
        }
    }

    /// Block until the observed view matches the expected one.
    ///
    /// Retries are unbounded; the enclosing trial duration is the only
    /// budget. Ping loss is reported but never fatal, since a lossy link
    /// still carries the ARP exchange often enough to converge eventually.
    pub async fn wait(&self) -> Result<ViewCounts, DynError> {
        self.elicit_discovery().await?;
        sleep(timeouts::topology_settle()).await;

        let expected = self.expected.counts().await?;
        info!(
            hosts = expected.hosts,
            switches = expected.switches,
            links = expected.links,
            "waiting for controller view to converge"
        );

        let mut tries: u32 = 1;
        loop {
            let matched = match self.observed.counts().await {
                Ok(observed) => {
                    report_mismatches(&expected, &observed);
                    observed == expected
                }
                Err(err) => {
                    warn!(error = %err, "controller view query failed; retrying");
                    false
                }
            };

            if matched {
                sleep(std::time::Duration::from_secs(
                    timeouts::CONVERGENCE_OK_BACKOFF_SECS,
                ))
                .await;
                info!(tries, "topology views converged");
                return Ok(expected);
            }

            sleep(std::time::Duration::from_secs(
                timeouts::CONVERGENCE_MISMATCH_BACKOFF_SECS,
            ))
            .await;

            if tries % REELICIT_EVERY == 0 {
                warn!(tries, "still diverged; eliciting discovery again");
                self.elicit_discovery().await?;
            }
            tries += 1;
        }
    }

    async fn elicit_discovery(&self) -> Result<(), DynError> {
        let loss = self.elicitor.elicit().await?;
        if loss > 0.0 {
            warn!(loss, "discovery pings saw loss");
        }
        Ok(())
    }
}

fn report_mismatches(expected: &ViewCounts, observed: &ViewCounts) {
    if observed.hosts != expected.hosts {
        warn!(
            got = observed.hosts,
            want = expected.hosts,
            "controller is missing hosts; will retry"
        );
    }
    if observed.links != expected.links {
        warn!(
            got = observed.links,
            want = expected.links,
            "controller is missing links; will retry"
        );
    }
    if observed.switches != expected.switches {
        warn!(
            got = observed.switches,
            want = expected.switches,
            "controller is missing switches; will retry"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::topology::view::ViewError;

    struct FixedView(ViewCounts);

    #[async_trait]
    impl TopologyView for FixedView {
        async fn counts(&self) -> Result<ViewCounts, ViewError> {
            Ok(self.0)
        }
    }

    /// Short by `missing` hosts until `ready_after` polls have happened.
    struct LaggingView {
        target: ViewCounts,
        polls: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl TopologyView for LaggingView {
        async fn counts(&self) -> Result<ViewCounts, ViewError> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            if seen < self.ready_after {
                Ok(ViewCounts {
                    hosts: self.target.hosts - 1,
                    ..self.target
                })
            } else {
                Ok(self.target)
            }
        }
    }

    #[derive(Default)]
    struct CountingElicitor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DiscoveryElicitor for CountingElicitor {
        async fn elicit(&self) -> Result<f64, DynError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0.0)
        }
    }

    const TARGET: ViewCounts = ViewCounts {
        hosts: 6,
        switches: 5,
        links: 12,
    };

    #[tokio::test(start_paused = true)]
    async fn converges_immediately_when_views_agree() {
        let expected = FixedView(TARGET);
        let observed = FixedView(TARGET);
        let elicitor = CountingElicitor::default();

        let counts = ConvergenceCoordinator::new(&expected, &observed, &elicitor)
            .wait()
            .await
            .expect("converges");
        assert_eq!(counts, TARGET);
        assert_eq!(elicitor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_arp_means_retry_and_reelicitation() {
        let expected = FixedView(TARGET);
        let observed = LaggingView {
            target: TARGET,
            polls: AtomicU32::new(0),
            ready_after: 7,
        };
        let elicitor = CountingElicitor::default();

        let counts = ConvergenceCoordinator::new(&expected, &observed, &elicitor)
            .wait()
            .await
            .expect("eventually converges");
        assert_eq!(counts, TARGET);
        // Initial elicitation plus the every-5th-iteration retry.
        assert!(elicitor.calls.load(Ordering::SeqCst) >= 2);
        assert!(observed.polls.load(Ordering::SeqCst) >= 8);
    }
}
