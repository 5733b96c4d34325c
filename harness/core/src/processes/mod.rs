//! Child-process supervision.
//!
//! Every application process (server, cloud, pubs/subs, iperf streams) is
//! registered here at spawn time and drained on teardown in
//! reverse-dependency order: clients first, then the server so it can
//! finish writing, then the cloud, then the iperf pairs, then a sweep for
//! anything that survived.

pub mod module_config;
pub mod roles;

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub use module_config::{ModuleSpec, ScaleConfig};

use crate::emulation::{CommandRunner, CommandSpec, HostCommand};
use ride_harness_config::{constants, timeouts};

/// Exit code a client reports when its network was genuinely unreachable;
/// worth distinguishing because it is a measured outcome, not a bug.
const ENETUNREACH_CODE: i32 = 101;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Environment variable naming the module search path of the client
/// runtime; the component root is prepended so children find their
/// modules even though the harness runs from elsewhere.
pub const MODULE_PATH_ENV: &str = "PYTHONPATH";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {label}: {source}")]
    Spawn {
        label: String,
        #[source]
        source: io::Error,
    },
    #[error("process {label} has an empty command")]
    EmptyCommand { label: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessClass {
    Client,
    Server,
    Cloud,
    IperfClient,
    IperfServer,
}

/// Outcome of draining one supervised process.
#[derive(Clone, Debug)]
pub struct ProcessReport {
    pub label: String,
    pub class: ProcessClass,
    pub exit_code: Option<i32>,
    pub killed: bool,
}

struct ManagedProcess {
    label: String,
    class: ProcessClass,
    child: tokio::process::Child,
}

/// Inherit the caller's environment and prepend `component_root` to the
/// module search path.
#[must_use]
pub fn module_path_env(component_root: &Path) -> (String, String) {
    let root = component_root.to_string_lossy();
    let value = match env::var(MODULE_PATH_ENV) {
        Ok(existing) if !existing.is_empty() => format!("{root}:{existing}"),
        _ => format!("{root}:"),
    };
    (MODULE_PATH_ENV.to_owned(), value)
}

pub struct ProcessSupervisor {
    runner: Arc<dyn CommandRunner>,
    clients: Vec<ManagedProcess>,
    server: Option<ManagedProcess>,
    cloud: Option<ManagedProcess>,
    iperf_clients: Vec<ManagedProcess>,
    iperf_servers: Vec<ManagedProcess>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            clients: Vec::new(),
            server: None,
            cloud: None,
            iperf_clients: Vec::new(),
            iperf_servers: Vec::new(),
        }
    }

    /// Spawn a host command and register its handle under `class`.
    pub fn spawn(
        &mut self,
        class: ProcessClass,
        label: &str,
        command: &HostCommand,
        envs: &[(String, String)],
        log_file: Option<&Path>,
    ) -> Result<(), SupervisorError> {
        let (program, args) = command
            .argv
            .split_first()
            .ok_or_else(|| SupervisorError::EmptyCommand {
                label: label.to_owned(),
            })?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        for (key, value) in envs {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(path) = log_file {
            let open = |path: &Path| {
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| SupervisorError::LogFile {
                        path: path.to_owned(),
                        source,
                    })
            };
            cmd.stdout(Stdio::from(open(path)?));
            cmd.stderr(Stdio::from(open(path)?));
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        debug!(label, host = %command.host, "spawning process");
        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            label: label.to_owned(),
            source,
        })?;

        let managed = ManagedProcess {
            label: label.to_owned(),
            class,
            child,
        };
        match class {
            ProcessClass::Client => self.clients.push(managed),
            ProcessClass::Server => self.server = Some(managed),
            ProcessClass::Cloud => self.cloud = Some(managed),
            ProcessClass::IperfClient => self.iperf_clients.push(managed),
            ProcessClass::IperfServer => self.iperf_servers.push(managed),
        }
        Ok(())
    }

    /// Drain everything: a natural-exit window, then poll-and-kill per
    /// process, then the orphan sweep. Reports every exit code observed.
    pub async fn drain(&mut self) -> Vec<ProcessReport> {
        self.drain_with(timeouts::process_drain(), timeouts::process_exit_wait())
            .await
    }

    pub async fn drain_with(
        &mut self,
        settle: Duration,
        per_process_wait: Duration,
    ) -> Vec<ProcessReport> {
        info!(
            settle_secs = settle.as_secs(),
            "waiting for processes to drain naturally"
        );
        sleep(settle).await;

        let mut reports = Vec::new();

        // Clients first so the servers get extra time to flush output.
        for mut proc in std::mem::take(&mut self.clients) {
            reports.push(wait_then_kill(&mut proc, per_process_wait).await);
        }
        if let Some(mut proc) = self.server.take() {
            reports.push(wait_then_kill(&mut proc, per_process_wait).await);
        }
        if let Some(mut proc) = self.cloud.take() {
            reports.push(wait_then_kill(&mut proc, per_process_wait).await);
        }

        // iperf clients terminate on their own once `-t` elapses; the
        // servers do not and are killed outright.
        for mut proc in std::mem::take(&mut self.iperf_clients) {
            let code = proc.child.wait().await.ok().and_then(|s| s.code());
            reports.push(ProcessReport {
                label: proc.label,
                class: proc.class,
                exit_code: code,
                killed: false,
            });
        }
        for mut proc in std::mem::take(&mut self.iperf_servers) {
            reports.push(wait_then_kill(&mut proc, per_process_wait).await);
        }

        self.sweep_orphans().await;

        for report in &reports {
            match report.exit_code {
                Some(0) => {}
                Some(ENETUNREACH_CODE) => {
                    error!(label = %report.label, "process failed: network unreachable")
                }
                Some(code) => error!(label = %report.label, code, "process exited nonzero"),
                None => error!(label = %report.label, "process never reported an exit code"),
            }
        }
        reports
    }

    /// Some clients survive even a kill of their shell parent; one global
    /// sweep finishes them off.
    async fn sweep_orphans(&self) {
        let spec = CommandSpec::new("sh", ["-c", constants::CLEANUP_SCALE_CLIENTS]).tolerant();
        if let Err(err) = self.runner.run(&spec).await {
            error!(error = %err, "orphan sweep failed");
        }
    }

    #[must_use]
    pub fn supervised_count(&self) -> usize {
        self.clients.len()
            + usize::from(self.server.is_some())
            + usize::from(self.cloud.is_some())
            + self.iperf_clients.len()
            + self.iperf_servers.len()
    }
}

/// Poll for completion within `budget`; escalate to a kill if the process
/// refuses to exit, and record what happened either way.
async fn wait_then_kill(proc: &mut ManagedProcess, budget: Duration) -> ProcessReport {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        match proc.child.try_wait() {
            Ok(Some(status)) => {
                return ProcessReport {
                    label: proc.label.clone(),
                    class: proc.class,
                    exit_code: status.code(),
                    killed: false,
                };
            }
            Ok(None) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                sleep(EXIT_POLL_INTERVAL.min(budget)).await;
            }
            Err(err) => {
                error!(label = %proc.label, error = %err, "failed to poll process");
                break;
            }
        }
    }

    error!(label = %proc.label, "process never quit: killing it");
    let exit_code = match proc.child.kill().await {
        Ok(()) => proc.child.wait().await.ok().and_then(|s| s.code()),
        Err(err) => {
            error!(label = %proc.label, error = %err, "kill failed");
            None
        }
    };
    ProcessReport {
        label: proc.label.clone(),
        class: proc.class,
        exit_code,
        killed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::command::testutil::RecordingRunner;

    fn local_command(cmdline: &str) -> HostCommand {
        HostCommand {
            host: "local".to_owned(),
            argv: vec!["sh".to_owned(), "-c".to_owned(), cmdline.to_owned()],
        }
    }

    #[tokio::test]
    async fn drain_reports_exit_codes_in_dependency_order() {
        let runner = Arc::new(RecordingRunner::new());
        let mut supervisor = ProcessSupervisor::new(runner.clone());

        supervisor
            .spawn(ProcessClass::Server, "srv", &local_command("exit 0"), &[], None)
            .expect("server spawns");
        supervisor
            .spawn(ProcessClass::Client, "p_h0", &local_command("exit 7"), &[], None)
            .expect("client spawns");

        let reports = supervisor
            .drain_with(Duration::from_millis(50), Duration::from_secs(2))
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].label, "p_h0");
        assert_eq!(reports[0].exit_code, Some(7));
        assert_eq!(reports[1].label, "srv");
        assert_eq!(reports[1].exit_code, Some(0));
        assert_eq!(supervisor.supervised_count(), 0);

        // The orphan sweep always runs.
        assert!(
            runner
                .command_lines()
                .iter()
                .any(|l| l.contains("pkill"))
        );
    }

    #[tokio::test]
    async fn hung_processes_are_killed_and_marked() {
        let runner = Arc::new(RecordingRunner::new());
        let mut supervisor = ProcessSupervisor::new(runner);

        supervisor
            .spawn(
                ProcessClass::Client,
                "stuck",
                &local_command("sleep 600"),
                &[],
                None,
            )
            .expect("client spawns");

        let reports = supervisor
            .drain_with(Duration::ZERO, Duration::from_millis(200))
            .await;

        assert_eq!(reports.len(), 1);
        assert!(reports[0].killed);
    }

    #[test]
    fn module_path_is_prepended() {
        let (key, value) = module_path_env(Path::new("/opt/ride"));
        assert_eq!(key, MODULE_PATH_ENV);
        assert!(value.starts_with("/opt/ride:"));
    }
}
