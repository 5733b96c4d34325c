use std::{fs, path::PathBuf, process, sync::Arc, sync::atomic::Ordering};

use anyhow::{Context as _, Result};
use clap::Parser;
use ride_harness_config::params::{
    ComparisonMode, DEFAULT_TREE_CHOOSING_HEURISTIC, DEFAULT_TREE_CONSTRUCTION_ALGORITHM,
    ExperimentParams,
};
use ride_harness_core::{
    controller::ControllerDialect,
    emulation::ShellRunner,
    experiment::{Experiment, ExperimentError},
};
use tracing::{info, warn};

const EXIT_FAILURE: i32 = 1;
/// Dedicated code for "the emulated network could not be built".
const EXIT_EMULATION_FAILURE: i32 = 2;

/// Runs the seismic-alert delivery experiment on an emulated campus
/// network driven by a remote SDN controller.
#[derive(Debug, Parser)]
#[command(name = "ride-experiment")]
struct Cli {
    /// Topology description file (JSON, or YAML by extension).
    topology_file: PathBuf,

    /// Results file; derived from the parameters when omitted.
    #[arg(long, short = 'o')]
    output_file: Option<PathBuf>,

    /// Number of trials to run.
    #[arg(long, default_value_t = 1)]
    nruns: usize,

    #[arg(long, default_value_t = 5)]
    npublishers: usize,

    #[arg(long, default_value_t = 5)]
    nsubscribers: usize,

    /// Number of pre-installed multicast trees; 0 implies unicast.
    #[arg(long, default_value_t = 2)]
    ntrees: usize,

    #[arg(long = "tree-construction-algorithm", default_value = DEFAULT_TREE_CONSTRUCTION_ALGORITHM)]
    tree_construction_algorithm: String,

    #[arg(long = "tree-choosing-heuristic", default_value = DEFAULT_TREE_CHOOSING_HEURISTIC)]
    tree_choosing_heuristic: String,

    /// Replace the Ride arm with a control strategy: unicast or oracle.
    #[arg(long)]
    comparison: Option<String>,

    /// Probability that an eligible link or node fails in the quake.
    #[arg(long = "failure-rate", default_value_t = 0.1)]
    failure_rate: f64,

    /// Loss percentage applied to every emulated link.
    #[arg(long = "error-rate", default_value_t = 0.0)]
    error_rate: f64,

    /// Number of hosts that generate random traffic to cause congestion.
    #[arg(long = "ngenerators", short = 'g', default_value_t = 0)]
    n_traffic_generators: usize,

    /// Bandwidth (in Mbps) of the UDP congestion generators.
    #[arg(long = "generator-bandwidth", visible_alias = "bw", default_value_t = 10.0)]
    traffic_generator_bandwidth: f64,

    /// Drop to an interactive shell after each trial; keeps the network
    /// and controller state up for inspection.
    #[arg(long = "cli")]
    show_cli: bool,

    #[arg(long = "with-cloud")]
    with_cloud: bool,

    /// Run the data-path monitoring application on the edge server.
    #[arg(long = "with-ride-c")]
    with_ride_c: bool,

    /// Disable the resilient multicast sink (on by default).
    #[arg(long = "no-ride-d")]
    no_ride_d: bool,

    #[arg(long = "max-alert-retries")]
    max_alert_retries: Option<u32>,

    /// Controller dialect to speak: onos or floodlight.
    #[arg(long = "topology-adapter", default_value = "onos")]
    topology_adapter: String,

    #[arg(long = "choice-rand-seed", default_value_t = 1)]
    choice_rand_seed: u64,

    #[arg(long = "failure-rand-seed", default_value_t = 2)]
    failure_rand_seed: u64,

    /// Log level handed to the application clients.
    #[arg(long, default_value = "error")]
    debug: String,
}

impl Cli {
    fn into_params(self) -> Result<(ExperimentParams, ControllerDialect)> {
        let comparison = match self.comparison.as_deref() {
            None => ComparisonMode::None,
            Some(raw) => raw.parse().context("unrecognized --comparison value")?,
        };
        let dialect: ControllerDialect = self
            .topology_adapter
            .parse()
            .context("unrecognized --topology-adapter value")?;

        let mut params = ExperimentParams {
            topology_file: self.topology_file,
            output_file: PathBuf::new(),
            nruns: self.nruns,
            npublishers: self.npublishers,
            nsubscribers: self.nsubscribers,
            ntrees: self.ntrees,
            tree_construction_algorithm: self.tree_construction_algorithm,
            tree_choosing_heuristic: self.tree_choosing_heuristic,
            comparison,
            max_alert_retries: self.max_alert_retries,
            failure_rate: self.failure_rate,
            error_rate: self.error_rate,
            n_traffic_generators: self.n_traffic_generators,
            traffic_generator_bandwidth_mbps: self.traffic_generator_bandwidth,
            with_cloud: self.with_cloud,
            with_ride_c: self.with_ride_c,
            with_ride_d: !self.no_ride_d,
            show_cli: self.show_cli,
            choice_rand_seed: self.choice_rand_seed,
            failure_rand_seed: self.failure_rand_seed,
            debug_level: self.debug,
        };
        params.output_file = match self.output_file {
            Some(path) => path,
            None => params.default_results_file_name(std::path::Path::new("results")),
        };
        Ok((params, dialect))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => return,
        Err(err) => {
            warn!("experiment failed: {err:#}");
            err.downcast_ref::<ExperimentError>().map_or(EXIT_FAILURE, |err| {
                if err.is_emulation_failure() {
                    EXIT_EMULATION_FAILURE
                } else {
                    EXIT_FAILURE
                }
            })
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let (params, dialect) = cli.into_params()?;

    if let Some(parent) = params.output_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating results directory {}", parent.display()))?;
        }
    }

    let mut experiment = Experiment::new(params, dialect, Arc::new(ShellRunner))?;

    let cancel = experiment.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current phase before teardown");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let output = experiment.run_all().await?;
    info!(output = %output.display(), "results written");
    Ok(())
}
