//! LRP operator - drives the StatefulSet desirer and the metrics loop

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lrp_common::telemetry::{init_logging, LogFormat, TelemetryConfig};
use lrp_common::{Lrp, LrpIdentifier, OperatorConfig};
use lrp_controller::{
    run_metrics_loop, Desirer, DesirerClients, KubeClients, MetricMessage, PodMetricsCollector,
    StatefulSetDesirer,
};
use lrp_workload::{
    LivenessProbeCreator, NameStrategy, ReadinessProbeCreator, StatefulSetTranslator,
    TranslatorConfig, TruncatedSha256Hasher,
};

/// Reconcile long-running processes onto Kubernetes StatefulSets
#[derive(Parser, Debug)]
#[command(name = "lrp-operator", version, about, long_about = None)]
struct Cli {
    /// Operator configuration file
    #[arg(
        long,
        short,
        env = "LRP_OPERATOR_CONFIG",
        default_value = "/etc/lrp-operator/config.yml"
    )]
    config: PathBuf,

    /// Log output format
    #[arg(long, env = "LRP_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Args, Debug)]
struct IdentityArgs {
    /// Process GUID
    #[arg(long)]
    guid: String,
    /// Process version
    #[arg(long)]
    version: String,
}

impl From<&IdentityArgs> for LrpIdentifier {
    fn from(args: &IdentityArgs) -> Self {
        LrpIdentifier::new(args.guid.clone(), args.version.clone())
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the workload for the LRP in a JSON file
    Desire {
        /// LRP JSON file
        file: PathBuf,
    },
    /// Apply instance count, routes and last-updated from a JSON file
    Update {
        /// LRP JSON file
        file: PathBuf,
    },
    /// Print one LRP
    Get(IdentityArgs),
    /// Print every LRP
    List,
    /// Remove an LRP
    Stop(IdentityArgs),
    /// Remove one instance of an LRP
    StopInstance {
        #[command(flatten)]
        id: IdentityArgs,
        /// Instance index
        #[arg(long)]
        index: u32,
    },
    /// Print the running instances of an LRP
    Instances(IdentityArgs),
    /// Collect metrics periodically and log every batch until interrupted
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(TelemetryConfig {
        format: cli.log_format.into(),
        ..Default::default()
    })?;

    let config = OperatorConfig::load(&cli.config)?;
    let client = kube_client(&config).await?;
    let clients = KubeClients::new(client, config.list_scope().map(str::to_string));

    match &cli.command {
        Commands::Metrics => run_metrics(&config, clients).await,
        command => run_desirer_command(command, &config, clients).await,
    }
}

async fn kube_client(config: &OperatorConfig) -> anyhow::Result<Client> {
    let Some(path) = config.kube_config_path.as_deref() else {
        return Client::try_default()
            .await
            .context("failed to create in-cluster kube client");
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig {}", path))?;
    let kube_config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("failed to load kubeconfig {}", path))?;
    Client::try_from(kube_config).context("failed to create kube client")
}

fn build_desirer(config: &OperatorConfig, clients: KubeClients) -> StatefulSetDesirer {
    let translator = StatefulSetTranslator::new(
        TranslatorConfig::from(config),
        Arc::new(LivenessProbeCreator),
        Arc::new(ReadinessProbeCreator),
    );
    StatefulSetDesirer::new(
        config.app_namespace.clone(),
        DesirerClients::from(clients),
        NameStrategy::new(Arc::new(TruncatedSha256Hasher)),
        translator,
    )
}

fn read_lrp(path: &Path) -> anyhow::Result<Lrp> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse LRP {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_desirer_command(
    command: &Commands,
    config: &OperatorConfig,
    clients: KubeClients,
) -> anyhow::Result<()> {
    let desirer = build_desirer(config, clients);

    match command {
        Commands::Desire { file } => {
            let lrp = read_lrp(file)?;
            desirer.desire(&lrp).await?;
            info!(lrp = %lrp.id(), "desired");
        }
        Commands::Update { file } => {
            let lrp = read_lrp(file)?;
            desirer.update(&lrp).await?;
            info!(lrp = %lrp.id(), "updated");
        }
        Commands::Get(id) => print_json(&desirer.get(&id.into()).await?)?,
        Commands::List => print_json(&desirer.list().await?)?,
        Commands::Stop(id) => {
            let id = LrpIdentifier::from(id);
            desirer.stop(&id).await?;
            info!(lrp = %id, "stopped");
        }
        Commands::StopInstance { id, index } => {
            let id = LrpIdentifier::from(id);
            desirer.stop_instance(&id, *index).await?;
            info!(lrp = %id, index = *index, "stopped instance");
        }
        Commands::Instances(id) => print_json(&desirer.get_instances(&id.into()).await?)?,
        Commands::Metrics => anyhow::bail!("metrics is not a desirer command"),
    }
    Ok(())
}

async fn run_metrics(config: &OperatorConfig, clients: KubeClients) -> anyhow::Result<()> {
    let collector = Arc::new(PodMetricsCollector::new(
        Arc::new(clients.clone()),
        Arc::new(clients),
    ));
    let (tx, mut rx) = mpsc::channel::<Vec<MetricMessage>>(config.metrics_channel_capacity);
    let cancel = CancellationToken::new();

    let forwarder = tokio::spawn(run_metrics_loop(
        collector,
        tx,
        config.metrics_interval(),
        cancel.clone(),
    ));
    info!(
        interval_secs = config.app_metrics_emission_interval_secs,
        "emitting metrics"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping metrics");
                cancel.cancel();
                break;
            }
            batch = rx.recv() => {
                let Some(batch) = batch else { break };
                for message in batch {
                    info!(
                        app_id = %message.app_id,
                        index = %message.index_id,
                        cpu = message.cpu,
                        memory = message.memory,
                        memory_quota = message.memory_quota,
                        disk = message.disk,
                        disk_quota = message.disk_quota,
                        "instance metrics"
                    );
                }
            }
        }
    }

    forwarder.await??;
    Ok(())
}
