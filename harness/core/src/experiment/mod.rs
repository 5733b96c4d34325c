//! The outer per-trial loop.
//!
//! One trial runs: stage topology -> start emulation -> converge the
//! controller's view -> program forwarding -> launch applications ->
//! execute the fault schedule -> drain processes -> tear down and reset
//! the controller. Most mid-trial failures are recorded rather than
//! raised; a reachability experiment is only useful if it survives the
//! failures it injects.

pub mod plan;
pub mod results;
pub mod schedule;

use std::{
    collections::BTreeSet,
    env, fs, io,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use rand::{Rng as _, thread_rng};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::{
    DynError,
    controller::{
        AdapterError, ControllerAdapter, ControllerConfig, ControllerDialect, DialectError,
    },
    convergence::{ConvergenceCoordinator, DiscoveryElicitor},
    emulation::{CommandRunner, EmulatedNetwork, EmulationError, LinkShape},
    forwarding::{ForwardingError, ForwardingProgrammer, ForwardingSpec, MulticastAddressPool},
    processes::{
        ProcessClass, ProcessSupervisor, SupervisorError, module_path_env,
        roles::{
            self, CloudRole, DataPathArg, PublisherRole, SdnConfig, ServerRole, SubscriberRole,
        },
    },
    topology::{
        LinkAttrs, Topology, TopologyError,
        identity::{self, IdentityError},
        trees::{TreeAlgorithm, TreeError},
    },
};
use plan::{RunPlan, RunPlanner};
use results::{ResultsError, ResultsFile, RunRecord, oracle_reachability, write_results};
use ride_harness_config::{
    WITH_LOGS, constants,
    params::{ComparisonMode, ExperimentParams, ParamsError},
    timeouts,
};
use ride_harness_env as rh_env;
use schedule::QuakeSet;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("the 'oracle' comparison mode is not implemented")]
    OracleUnsupported,
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Emulation(#[from] EmulationError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error(transparent)]
    Forwarding(#[from] ForwardingError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error("convergence failed: {0}")]
    Convergence(String),
    #[error("failed to create run directory {path}: {source}")]
    RunDir {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ExperimentError {
    /// True when the emulated network itself could not be built; the CLI
    /// maps this to its dedicated exit code.
    #[must_use]
    pub fn is_emulation_failure(&self) -> bool {
        matches!(self, Self::Emulation(_))
    }
}

pub struct Experiment {
    params: ExperimentParams,
    topo: Topology,
    runner: Arc<dyn CommandRunner>,
    controller: ControllerConfig,
    planner: RunPlanner,
    records: Vec<RunRecord>,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("params", &self.params)
            .field("topo", &self.topo)
            .field("controller", &self.controller)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl Experiment {
    pub fn new(
        params: ExperimentParams,
        dialect: ControllerDialect,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, ExperimentError> {
        params.validate()?;
        if params.comparison == ComparisonMode::Oracle {
            return Err(ExperimentError::OracleUnsupported);
        }

        let topo = Topology::from_file(&params.topology_file)?;
        let controller = ControllerConfig {
            ip: constants::controller_ip(),
            port: constants::controller_rest_port(),
            auth: Some((
                rh_env::controller_user()
                    .unwrap_or_else(|| constants::DEFAULT_CONTROLLER_USER.to_owned()),
                rh_env::controller_password()
                    .unwrap_or_else(|| constants::DEFAULT_CONTROLLER_PASSWORD.to_owned()),
            )),
            dialect,
        };

        let planner = RunPlanner::new(params.choice_rand_seed, params.failure_rand_seed);
        Ok(Self {
            params,
            topo,
            runner,
            controller,
            planner,
            records: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag a terminating signal sets; the driver finishes the current
    /// atomic phase and then tears down.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run every trial and return the results file path.
    pub async fn run_all(&mut self) -> Result<PathBuf, ExperimentError> {
        let output = self.params.output_file.clone();

        for run in 0..self.params.nruns {
            if self.cancelled() {
                warn!(run, "cancelled before trial start");
                break;
            }
            info!(run, total = self.params.nruns, "starting trial");

            let trial_plan = self.planner.plan(&self.topo, &self.params);
            let record = self.run_trial(run, &trial_plan).await?;
            self.records.push(record);

            // Rewrite after every trial so a crash loses at most one run.
            write_results(
                &output,
                &ResultsFile {
                    params: &self.params,
                    runs: &self.records,
                },
            )?;
        }

        info!(runs = self.records.len(), output = %output.display(), "experiment complete");
        Ok(output)
    }

    async fn run_trial(
        &self,
        run: usize,
        trial_plan: &RunPlan,
    ) -> Result<RunRecord, ExperimentError> {
        let net = self.build_network(trial_plan)?;
        if let Err(err) = net.start().await {
            error!(error = %err, "emulation failed to build");
            let _ = net.cleanup().await;
            return Err(err.into());
        }

        let outcome = match ControllerAdapter::connect(&self.controller).await {
            Ok(mut adapter) => {
                let result = self.drive_trial(&net, &mut adapter, run, trial_plan).await;

                if self.params.show_cli {
                    drop_to_shell().await;
                }
                if let Err(err) = net.stop().await {
                    error!(error = %err, "stopping emulation failed, continuing to cleanup");
                }
                if let Err(err) = net.cleanup().await {
                    error!(error = %err, "emulation cleanup failed");
                }
                self.reset_controller(&adapter).await;
                result
            }
            Err(err) => {
                let _ = net.stop().await;
                let _ = net.cleanup().await;
                Err(err.into())
            }
        };

        let pause = timeouts::sleep_between_runs();
        info!(secs = pause.as_secs(), "waiting for OVS and controller to settle");
        sleep(pause).await;
        outcome
    }

    /// Stage the emulated network for one trial.
    ///
    /// Servers and clouds become an edge switch plus a backing host: the
    /// emulation cannot express a multi-homed host, and the edge switch
    /// gives them somewhere to multi-home from. Without the cloud arm the
    /// cloud is a plain host under its own name so topology links still
    /// attach.
    pub(crate) fn build_network(
        &self,
        _trial_plan: &RunPlan,
    ) -> Result<EmulatedNetwork, ExperimentError> {
        let mut net = EmulatedNetwork::new(
            Arc::clone(&self.runner),
            self.controller.ip.clone(),
            constants::OPENFLOW_CONTROLLER_PORT,
        );

        for switch in self.topo.switches() {
            net.add_switch(&switch, &identity::switch_dpid(&switch)?)?;
        }
        for host in self.topo.hosts() {
            let id = identity::host_identity(&host)?;
            net.add_host(&host, id.ip, &id.mac)?;
        }

        let server = self.server_name();
        let server_host = identity::backing_host_name(&server);
        net.add_switch(&server, &identity::edge_switch_dpid(&server, true, false)?)?;
        let server_id = identity::host_identity(&server_host)?;
        net.add_host(&server_host, server_id.ip, &server_id.mac)?;
        net.add_link(
            &server,
            &server_host,
            LinkShape::from_attrs(&LinkAttrs::default(), 0.0),
        )?;

        if let Some(cloud) = self.cloud_name() {
            let cloud_identity = identity::host_identity(&identity::backing_host_name(&cloud))?;
            if self.params.with_cloud {
                net.add_switch(&cloud, &identity::edge_switch_dpid(&cloud, false, true)?)?;
                let cloud_host = identity::backing_host_name(&cloud);
                net.add_host(&cloud_host, cloud_identity.ip, &cloud_identity.mac)?;
                net.add_link(
                    &cloud,
                    &cloud_host,
                    LinkShape::from_attrs(&LinkAttrs::default(), 0.0),
                )?;
            } else {
                net.add_host(&cloud, cloud_identity.ip, &cloud_identity.mac)?;
            }
        }

        for (a, b, attrs) in self.topo.links() {
            net.add_link(&a, &b, LinkShape::from_attrs(&attrs, self.params.error_rate))?;
        }

        net.add_nat(
            &server_host,
            constants::NAT_GATEWAY_IP,
            constants::NAT_SERVER_IP,
            constants::NAT_SUBNET,
        )?;

        Ok(net)
    }

    fn server_name(&self) -> String {
        // Validated at load: exactly one server.
        self.topo.servers().remove(0)
    }

    fn cloud_name(&self) -> Option<String> {
        self.topo.clouds().first().cloned()
    }

    /// Name of the emulated host acting as the cloud broker, if any.
    fn cloud_host_name(&self) -> Option<String> {
        self.cloud_name().map(|cloud| {
            if self.params.with_cloud {
                identity::backing_host_name(&cloud)
            } else {
                cloud
            }
        })
    }

    async fn drive_trial(
        &self,
        net: &EmulatedNetwork,
        adapter: &mut ControllerAdapter,
        run: usize,
        trial_plan: &RunPlan,
    ) -> Result<RunRecord, ExperimentError> {
        let server = self.server_name();
        let server_host = identity::backing_host_name(&server);
        let cloud_host = self.cloud_host_name();

        // Controller access and multicast destinations need routes the
        // emulation can only apply once interfaces exist.
        if let Some((gateway_ip, iface)) = net.nat_route() {
            net.set_default_route(&server_host, &gateway_ip, &iface).await?;
        }
        let pool = MulticastAddressPool::for_trees(self.params.ntrees)?;
        let primary_iface = net.host_primary_iface(&server_host)?;
        for (addr, _) in pool.entries() {
            net.add_host_route(&server_host, *addr, &primary_iface).await?;
        }

        let elicitor = PingElicitor {
            net,
            server_host: &server_host,
            cloud_host: cloud_host.as_deref(),
            all_pairs: constants::all_pairs_ping(),
        };
        ConvergenceCoordinator::new(net, adapter, &elicitor)
            .wait()
            .await
            .map_err(|err| ExperimentError::Convergence(err.to_string()))?;
        adapter.refresh().await?;

        info!("network set up; programming forwarding state");
        let use_multicast = self.params.use_multicast();
        let algorithm = if use_multicast {
            self.params.tree_construction_algorithm.parse::<TreeAlgorithm>()?
        } else {
            TreeAlgorithm::SteinerApprox
        };
        let forwarding_spec = ForwardingSpec {
            server: server.clone(),
            cloud: self.cloud_name().filter(|_| self.params.with_cloud),
            gateways: self.topo.cloud_gateways(),
            subscribers: trial_plan.subscribers.clone(),
            use_unicast: self.params.use_unicast(),
            with_ride_c: self.params.with_ride_c,
            use_multicast,
            algorithm,
            pool: pool.clone(),
        };
        ForwardingProgrammer::new(&self.topo, adapter)
            .program(&forwarding_spec)
            .await?;

        if self.cancelled() {
            warn!("cancelled after forwarding; skipping traffic phase");
            return Ok(RunRecord::default());
        }

        let dirs = self.prepare_run_dirs(run)?;
        let mut supervisor = ProcessSupervisor::new(Arc::clone(&self.runner));
        self.launch_traffic_generators(net, trial_plan, &server_host, &mut supervisor)?;
        self.launch_applications(
            net,
            adapter,
            trial_plan,
            &pool,
            &server,
            &server_host,
            cloud_host.as_deref(),
            &dirs,
            &mut supervisor,
        )?;

        let launch_time = Instant::now();
        info!("applications launched; waiting for failure events");
        sleep(timeouts::seismic_event_delay()).await;

        let data_path_links: Vec<(String, String)> = match self.cloud_name() {
            Some(cloud) if self.params.with_cloud => self
                .topo
                .cloud_gateways()
                .into_iter()
                .map(|gw| (gw, cloud.clone()))
                .collect(),
            _ => Vec::new(),
        };
        let planned = schedule::build_schedule(
            &data_path_links,
            timeouts::time_between_seismic_events(),
        );
        let quake = QuakeSet {
            failed_links: trial_plan.failed_links.clone(),
            failed_nodes: trial_plan.failed_nodes.clone(),
        };
        let outcome = schedule::execute(net, &planned, &quake).await;

        let remaining = timeouts::experiment_duration().saturating_sub(launch_time.elapsed());
        info!(secs = remaining.as_secs(), "waiting for the experiment to complete");
        sleep(remaining).await;

        supervisor.drain().await;

        let mut record = RunRecord {
            outputs_dir: dirs.outputs_rel.clone(),
            logs_dir: dirs.logs_rel.clone(),
            quake_start_time: outcome.quake_start_time,
            data_path_changes: outcome.changes,
            publishers: self.hosts_by_ip(&trial_plan.publishers)?,
            subscribers: self.hosts_by_ip(&trial_plan.subscribers)?,
            failed_links: trial_plan.failed_links.clone(),
            failed_nodes: trial_plan.failed_nodes.clone(),
            ..RunRecord::default()
        };
        self.attach_oracle_figures(&mut record, trial_plan);
        Ok(record)
    }

    fn hosts_by_ip(
        &self,
        hosts: &[String],
    ) -> Result<std::collections::BTreeMap<String, String>, ExperimentError> {
        hosts
            .iter()
            .map(|name| {
                Ok((
                    identity::host_identity(name)?.ip.to_string(),
                    name.clone(),
                ))
            })
            .collect()
    }

    /// The oracle figures: which endpoints any scheme could still have
    /// reached on the failed topology. For the cloud the first (highest
    /// priority) gateway is also removed, since the schedule always fails
    /// it.
    fn attach_oracle_figures(&self, record: &mut RunRecord, trial_plan: &RunPlan) {
        let server = self.server_name();
        record.oracle_edge_subs = Some(oracle_reachability(
            &self.topo,
            &server,
            &trial_plan.subscribers,
            &trial_plan.failed_nodes,
            &trial_plan.failed_links,
            &[],
        ));
        record.oracle_edge_pubs = Some(oracle_reachability(
            &self.topo,
            &server,
            &trial_plan.publishers,
            &trial_plan.failed_nodes,
            &trial_plan.failed_links,
            &[],
        ));

        if !self.params.with_cloud {
            return;
        }
        let Some(cloud) = self.cloud_name() else {
            return;
        };
        let removed: Vec<String> = self.topo.cloud_gateways().into_iter().take(1).collect();
        record.oracle_cloud_subs = Some(oracle_reachability(
            &self.topo,
            &cloud,
            &trial_plan.subscribers,
            &trial_plan.failed_nodes,
            &trial_plan.failed_links,
            &removed,
        ));
        record.oracle_cloud_pubs = Some(oracle_reachability(
            &self.topo,
            &cloud,
            &trial_plan.publishers,
            &trial_plan.failed_nodes,
            &trial_plan.failed_links,
            &removed,
        ));
    }

    fn launch_traffic_generators(
        &self,
        net: &EmulatedNetwork,
        trial_plan: &RunPlan,
        server_host: &str,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<(), ExperimentError> {
        if trial_plan.generators.is_empty() {
            return Ok(());
        }
        info!(
            generators = trial_plan.generators.len(),
            "starting background traffic generators"
        );

        let server_ip = net.host_ip(server_host)?;
        let duration = timeouts::experiment_duration().as_secs();
        for (i, generator) in trial_plan.generators.iter().enumerate() {
            let port = constants::IPERF_BASE_PORT + i as u16;
            let client_cmd = roles::iperf_client_command(
                port,
                duration,
                self.params.traffic_generator_bandwidth_mbps,
                server_ip,
            );
            let server_cmd = roles::iperf_server_command(port, duration);

            supervisor.spawn(
                ProcessClass::IperfClient,
                &format!("iperf_{generator}"),
                &net.host_shell_command(generator, &client_cmd)?,
                &[],
                None,
            )?;
            supervisor.spawn(
                ProcessClass::IperfServer,
                &format!("iperf_srv_{port}"),
                &net.host_shell_command(server_host, &server_cmd)?,
                &[],
                None,
            )?;
        }
        Ok(())
    }

    fn launch_applications(
        &self,
        net: &EmulatedNetwork,
        adapter: &ControllerAdapter,
        trial_plan: &RunPlan,
        pool: &MulticastAddressPool,
        server: &str,
        server_host: &str,
        cloud_host: Option<&str>,
        dirs: &RunDirs,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<(), ExperimentError> {
        let dialect = adapter.dialect();
        let component_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let envs = vec![module_path_env(&component_root)];
        let quit_time = timeouts::experiment_duration().as_secs();
        let base = roles::base_args(quit_time, &self.params.debug_level);

        let sdn = SdnConfig {
            adapter_type: dialect.to_string(),
            ip: self.controller.ip.clone(),
            port: self.controller.port,
        };
        let server_dpid = dialect.dpid_for_host(server_host)?;
        let cloud_dpid = cloud_host
            .map(|host| dialect.dpid_for_host(host))
            .transpose()?;

        info!(server = server_host, "launching edge server");

        let publisher_ports: Vec<(Ipv4Addr, u16)> = trial_plan
            .publishers
            .iter()
            .map(|name| identity::host_identity(name).map(|id| id.ip))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flat_map(|ip| {
                [
                    (ip, constants::COAP_CLIENT_BASE_SRC_PORT),
                    (ip, constants::COAP_CLIENT_BASE_SRC_PORT + 1),
                ]
            })
            .collect();

        let data_paths: Vec<DataPathArg> = if self.params.with_ride_c && cloud_dpid.is_some() {
            self.topo
                .cloud_gateways()
                .iter()
                .enumerate()
                .map(|(i, gw)| {
                    Ok(DataPathArg {
                        gateway: gw.clone(),
                        gateway_dpid: dialect.dpid_for_switch(gw)?,
                        cloud_dpid: cloud_dpid.clone().unwrap_or_default(),
                        src_port: constants::PROBE_BASE_SRC_PORT + i as u16,
                    })
                })
                .collect::<Result<Vec<_>, ExperimentError>>()?
        } else {
            Vec::new()
        };

        let server_cfg = roles::server_config(&ServerRole {
            with_ride_d: self.params.with_ride_d,
            with_ride_c: self.params.with_ride_c && cloud_dpid.is_some(),
            use_multicast: self.params.use_multicast(),
            addresses: pool.entries(),
            ntrees: self.params.ntrees,
            tree_construction_algorithm: &self.params.tree_construction_algorithm,
            tree_choosing_heuristic: &self.params.tree_choosing_heuristic,
            max_alert_retries: self.params.max_alert_retries,
            server_dpid: &server_dpid,
            cloud_dpid: cloud_dpid.as_deref(),
            sdn: &sdn,
            data_paths: &data_paths,
            publishers: &publisher_ports,
            outputs_dir: &dirs.outputs,
        });
        supervisor.spawn(
            ProcessClass::Server,
            "srv",
            &net.host_shell_command(server_host, &roles::scale_client_command(&base, &server_cfg))?,
            &envs,
            dirs.log_file("srv").as_deref(),
        )?;

        if self.params.with_cloud {
            if let (Some(cloud_host), Some(cloud_dpid)) = (cloud_host, cloud_dpid.as_deref()) {
                let cloud_cfg = roles::cloud_config(&CloudRole {
                    with_ride_d: self.params.with_ride_d,
                    cloud_dpid,
                    outputs_dir: &dirs.outputs,
                });
                supervisor.spawn(
                    ProcessClass::Cloud,
                    "cloud",
                    &net.host_shell_command(
                        cloud_host,
                        &roles::scale_client_command(&base, &cloud_cfg),
                    )?,
                    &envs,
                    dirs.log_file("cloud").as_deref(),
                )?;
            }
        }

        // Without the cloud arm, publishers sink straight to the edge and
        // subscribers know a single broker.
        let server_ip = net.host_ip(server_host)?;
        let mut brokers = vec![server_ip];
        let mut sink_ip = server_ip;
        if self.params.with_cloud {
            if let Some(cloud_host) = cloud_host {
                let cloud_ip = net.host_ip(cloud_host)?;
                brokers.push(cloud_ip);
                sink_ip = cloud_ip;
            }
        }

        let publishers: BTreeSet<String> = trial_plan.publishers.iter().cloned().collect();
        let subscribers: BTreeSet<String> = trial_plan.subscribers.iter().cloned().collect();
        info!(
            publishers = publishers.len(),
            subscribers = subscribers.len(),
            "running seismic clients"
        );

        let seismic_start = unix_now() + timeouts::seismic_event_delay().as_secs_f64();
        for client in publishers.union(&subscribers) {
            let is_publisher = publishers.contains(client);
            let is_subscriber = subscribers.contains(client);

            let mut cfg = crate::processes::ScaleConfig::new();
            if is_publisher {
                cfg = cfg.merge(roles::publisher_config(&PublisherRole {
                    client_id: client,
                    sink_ip,
                    seismic_start_time_unix: seismic_start,
                    seismic_sample_interval_secs: timeouts::time_between_seismic_events()
                        .as_secs_f64(),
                    congestion_start_delay_secs: thread_rng().gen_range(5.0..10.0),
                    outputs_dir: &dirs.outputs,
                }));
            }
            if is_subscriber {
                cfg = cfg.merge(roles::subscriber_config(&SubscriberRole {
                    client_id: client,
                    alerting_brokers: &brokers,
                    outputs_dir: &dirs.outputs,
                }));
            }

            let prefix = match (is_publisher, is_subscriber) {
                (true, true) => "ps",
                (true, false) => "p",
                (false, true) => "s",
                (false, false) => continue,
            };
            let label = format!("{prefix}_{client}");
            supervisor.spawn(
                ProcessClass::Client,
                &label,
                &net.host_shell_command(client, &roles::scale_client_command(&base, &cfg))?,
                &envs,
                dirs.log_file(&label).as_deref(),
            )?;
        }

        Ok(())
    }

    /// Output and log directories for one run, nested beside the results
    /// file; recorded paths stay relative to it.
    fn prepare_run_dirs(&self, run: usize) -> Result<RunDirs, ExperimentError> {
        let root = self
            .params
            .output_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let stem = self
            .params
            .output_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "experiment".to_owned());
        let base = stem.strip_prefix("results_").unwrap_or(&stem).to_owned();

        let outputs_rel = format!("outputs_{base}/run{run}");
        let outputs = root.join(&outputs_rel);
        fs::create_dir_all(&outputs).map_err(|source| ExperimentError::RunDir {
            path: outputs.display().to_string(),
            source,
        })?;

        let (logs, logs_rel) = if *WITH_LOGS {
            let rel = format!("logs_{base}/run{run}");
            let dir = root.join(&rel);
            fs::create_dir_all(&dir).map_err(|source| ExperimentError::RunDir {
                path: dir.display().to_string(),
                source,
            })?;
            (Some(dir), Some(rel))
        } else {
            (None, None)
        };

        Ok(RunDirs {
            outputs,
            outputs_rel,
            logs,
            logs_rel,
        })
    }

    /// Purge controller state between trials. The ONOS dialect restarts
    /// the service and OVS, then polls the host listing until it comes
    /// back empty; a plain REST dialect bulk-deletes flows and loops on
    /// group removal. Either way this blocks until clean: continuing with
    /// stale state would poison every following trial.
    async fn reset_controller(&self, adapter: &ControllerAdapter) {
        match self.controller.dialect {
            ControllerDialect::Onos => {
                info!("resetting controller for the next run");
                for cmdline in [
                    constants::CONTROLLER_RESET_CMD,
                    constants::CONTROLLER_SERVICE_RESTART_CMD,
                    constants::STOP_OVS_CMD,
                    constants::START_OVS_CMD,
                ] {
                    let spec =
                        crate::emulation::CommandSpec::new("sh", ["-c", cmdline]).tolerant();
                    if let Err(err) = self.runner.run(&spec).await {
                        error!(command = cmdline, error = %err, "controller reset command failed");
                    }
                }

                loop {
                    sleep(timeouts::controller_reset_poll()).await;
                    match adapter.get_hosts_live().await {
                        Ok(hosts) if hosts.is_empty() => {
                            info!("controller fully rebooted");
                            match adapter.get_switches_live().await {
                                Ok(switches) if !switches.is_empty() => {
                                    error!(
                                        remaining = switches.len(),
                                        "switches survived the controller reset"
                                    );
                                }
                                _ => {}
                            }
                            break;
                        }
                        Ok(_) => info!("hosts not cleared out of the controller yet"),
                        Err(_) => info!("still waiting for the controller to restart"),
                    }
                }
            }
            ControllerDialect::Floodlight => {
                info!("removing groups and flows via REST; transactions may take a while");
                if let Err(err) = adapter.remove_all_flow_rules().await {
                    error!(error = %err, "bulk flow removal failed");
                }
                loop {
                    if let Err(err) = adapter.remove_all_groups().await {
                        error!(error = %err, "bulk group removal failed");
                    }
                    sleep(std::time::Duration::from_secs(1)).await;
                    match adapter.get_groups().await {
                        Ok(groups) if groups.is_empty() => break,
                        Ok(groups) => {
                            info!(remaining = groups.len(), "groups not fully removed yet");
                        }
                        Err(err) => warn!(error = %err, "group listing failed; retrying"),
                    }
                }
            }
        }
    }
}

struct RunDirs {
    outputs: PathBuf,
    outputs_rel: String,
    logs: Option<PathBuf>,
    logs_rel: Option<String>,
}

impl RunDirs {
    fn log_file(&self, name: &str) -> Option<PathBuf> {
        self.logs.as_ref().map(|dir| dir.join(name))
    }
}

/// Discovery elicitation: ping hosts so the controller sees traffic, then
/// program static ARP so it learns MAC<->IP bindings from the exchanges.
/// Controllers infer host addresses from ARP, not from the ICMP itself.
struct PingElicitor<'a> {
    net: &'a EmulatedNetwork,
    server_host: &'a str,
    cloud_host: Option<&'a str>,
    all_pairs: bool,
}

#[async_trait]
impl DiscoveryElicitor for PingElicitor<'_> {
    async fn elicit(&self) -> Result<f64, DynError> {
        let hosts = self.net.host_names();
        let server_ip = self.net.host_ip(self.server_host)?;

        let mut attempts = 0_u32;
        let mut lost = 0_u32;
        if self.all_pairs {
            for src in &hosts {
                for dst in &hosts {
                    if src == dst {
                        continue;
                    }
                    attempts += 1;
                    if !self.net.ping(src, self.net.host_ip(dst)?).await? {
                        lost += 1;
                    }
                }
            }
        } else {
            // Star pattern: reaching the server is all discovery needs.
            for host in hosts.iter().filter(|h| h.as_str() != self.server_host) {
                attempts += 2;
                if !self.net.ping(host, server_ip).await? {
                    lost += 1;
                }
                if !self.net.ping(self.server_host, self.net.host_ip(host)?).await? {
                    lost += 1;
                }
            }
        }

        self.program_static_arp(&hosts).await?;

        Ok(if attempts == 0 {
            0.0
        } else {
            f64::from(lost) / f64::from(attempts)
        })
    }
}

impl PingElicitor<'_> {
    async fn program_static_arp(&self, hosts: &[String]) -> Result<(), DynError> {
        let server_ip = self.net.host_ip(self.server_host)?;
        let server_mac = self.net.host_mac(self.server_host)?;
        let cloud = match self.cloud_host {
            Some(name) => Some((name, self.net.host_ip(name)?, self.net.host_mac(name)?)),
            None => None,
        };

        for src in hosts {
            if src == self.server_host || Some(src.as_str()) == self.cloud_host {
                continue;
            }
            let src_ip = self.net.host_ip(src)?;
            let src_mac = self.net.host_mac(src)?;

            self.net.set_static_arp(src, server_ip, &server_mac).await?;
            self.net
                .set_static_arp(self.server_host, src_ip, &src_mac)
                .await?;
            if let Some((cloud_host, cloud_ip, cloud_mac)) = &cloud {
                self.net.set_static_arp(src, *cloud_ip, cloud_mac).await?;
                self.net.set_static_arp(cloud_host, src_ip, &src_mac).await?;
            }
        }
        Ok(())
    }
}

async fn drop_to_shell() {
    info!("dropping to an interactive shell; exit it to continue teardown");
    let status = tokio::process::Command::new("sh")
        .arg("-i")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await;
    if let Err(err) = status {
        error!(error = %err, "interactive shell failed");
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::command::testutil::RecordingRunner;
    use tempfile::TempDir;

    fn write_campus_file(dir: &TempDir) -> PathBuf {
        let raw = serde_json::json!({
            "nodes": [
                {"name": "s0", "kind": "server"},
                {"name": "x0", "kind": "cloud"},
                {"name": "g0", "kind": "cloud_gateway"},
                {"name": "g1", "kind": "cloud_gateway"},
                {"name": "c0", "kind": "switch"},
                {"name": "a0", "kind": "switch"},
                {"name": "h0-b0", "kind": "host"},
                {"name": "h1-b0", "kind": "host"}
            ],
            "links": [
                {"a": "s0", "b": "c0"},
                {"a": "c0", "b": "a0"},
                {"a": "a0", "b": "h0-b0"},
                {"a": "a0", "b": "h1-b0"},
                {"a": "c0", "b": "g0"},
                {"a": "c0", "b": "g1"},
                {"a": "g0", "b": "x0"},
                {"a": "g1", "b": "x0"}
            ]
        });
        let path = dir.path().join("campus.json");
        fs::write(&path, raw.to_string()).expect("topology file writes");
        path
    }

    fn params(dir: &TempDir, with_cloud: bool) -> ExperimentParams {
        ExperimentParams {
            topology_file: write_campus_file(dir),
            output_file: dir.path().join("results_test.json"),
            nruns: 1,
            npublishers: 1,
            nsubscribers: 1,
            ntrees: 2,
            tree_construction_algorithm: "steiner".to_owned(),
            tree_choosing_heuristic: "importance".to_owned(),
            comparison: ComparisonMode::None,
            max_alert_retries: None,
            failure_rate: 0.0,
            error_rate: 0.0,
            n_traffic_generators: 0,
            traffic_generator_bandwidth_mbps: 10.0,
            with_cloud,
            with_ride_c: with_cloud,
            with_ride_d: true,
            show_cli: false,
            choice_rand_seed: 1,
            failure_rand_seed: 2,
            debug_level: "error".to_owned(),
        }
    }

    fn experiment(dir: &TempDir, with_cloud: bool) -> Experiment {
        Experiment::new(
            params(dir, with_cloud),
            ControllerDialect::Onos,
            Arc::new(RecordingRunner::new()),
        )
        .expect("experiment builds")
    }

    #[test]
    fn oracle_comparison_fails_at_setup() {
        let dir = TempDir::new().expect("tempdir");
        let mut p = params(&dir, true);
        p.comparison = ComparisonMode::Oracle;
        let err = Experiment::new(p, ControllerDialect::Onos, Arc::new(RecordingRunner::new()))
            .expect_err("oracle must be rejected");
        assert!(matches!(err, ExperimentError::OracleUnsupported));
    }

    #[test]
    fn staged_network_counts_match_the_topology_plus_edges() {
        let dir = TempDir::new().expect("tempdir");
        let exp = experiment(&dir, true);
        let trial_plan = RunPlanner::new(1, 2).plan(&exp.topo, &exp.params);
        let net = exp.build_network(&trial_plan).expect("network stages");

        let counts = net.expected_counts();
        // Edge links for the server and the cloud come on top of the
        // topology's own; the NAT stays out of all three counts.
        assert_eq!(counts.links, exp.topo.edge_count() + 2);
        assert_eq!(counts.switches, exp.topo.switches().len() + 2);
        assert_eq!(counts.hosts, exp.topo.hosts().len() + 2);
    }

    #[test]
    fn without_cloud_the_cloud_is_a_plain_host() {
        let dir = TempDir::new().expect("tempdir");
        let exp = experiment(&dir, false);
        let trial_plan = RunPlanner::new(1, 2).plan(&exp.topo, &exp.params);
        let net = exp.build_network(&trial_plan).expect("network stages");

        let counts = net.expected_counts();
        assert_eq!(counts.links, exp.topo.edge_count() + 1);
        assert_eq!(counts.switches, exp.topo.switches().len() + 1);
        assert_eq!(counts.hosts, exp.topo.hosts().len() + 2);
        assert!(net.is_host("x0"));
        assert_eq!(exp.cloud_host_name().as_deref(), Some("x0"));
    }

    #[test]
    fn run_dirs_are_relative_to_the_results_file() {
        let dir = TempDir::new().expect("tempdir");
        let exp = experiment(&dir, true);
        let dirs = exp.prepare_run_dirs(3).expect("dirs create");
        assert_eq!(dirs.outputs_rel, "outputs_test/run3");
        assert!(dirs.outputs.is_dir());
    }
}
