//! tfp-forge CLI - synthesize and apply Terraform for Rancher-managed clusters

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tfp_forge::cleanup::CleanupController;
use tfp_forge::config::{RunConfig, CONFIG_ENV};
use tfp_forge::dispatch::Dispatcher;
use tfp_forge::document::{Document, SharedDocument};
use tfp_forge::pipeline::apply::TerraformCli;
use tfp_forge::pipeline::standalone::run_standalone;
use tfp_forge::pipeline::{Orchestrator, ScaleDirection};
use tfp_forge::template::{SynthSettings, TemplateCatalog};

/// tfp-forge - Terraform synthesis and phased apply for Rancher-managed clusters
#[derive(Parser, Debug)]
#[command(name = "tfp-forge", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Path to the run configuration YAML
    #[arg(short = 'c', long = "config", env = CONFIG_ENV, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the synthesized document for the configured clusters
    Render,

    /// Provision the configured clusters
    Provision,

    /// Install a standalone Rancher server (RKE2 + registries + Rancher)
    Standalone,

    /// Provision the configured clusters, then scale them up and back down
    Scale,

    /// Provision the configured clusters, then upgrade their Kubernetes version
    Upgrade(UpgradeArgs),

    /// Destroy everything in the working directory and remove generated files
    Destroy,
}

#[derive(Args, Debug)]
struct UpgradeArgs {
    /// Target version; defaults to each cluster's `snapshots.upgradeKubernetesVersion`
    #[arg(long)]
    version: Option<String>,
}

struct Runtime {
    config: RunConfig,
    settings: Arc<SynthSettings>,
    orchestrator: Orchestrator,
    cleanup: Arc<CleanupController>,
}

impl Runtime {
    fn new(config: RunConfig) -> Self {
        let tf = &config.terraform;
        let tool = Arc::new(TerraformCli::new(&tf.binary, &tf.work_dir, tf.command_timeout()));
        let cleanup = Arc::new(CleanupController::new(
            tool.clone(),
            &tf.work_dir,
            config.rancher.cleanup,
        ));
        let orchestrator = Orchestrator::new(
            tool,
            SharedDocument::new(Document::default(), &tf.work_dir),
            cleanup.clone(),
        );
        let settings = Arc::new(SynthSettings::from_config(&config));
        Self {
            config,
            settings,
            orchestrator,
            cleanup,
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::new(TemplateCatalog::standard()),
            self.config.batch_policy,
            self.settings.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let path = cli
        .global
        .config
        .ok_or_else(|| anyhow::anyhow!("no configuration file: pass --config or set {CONFIG_ENV}"))?;
    let config = RunConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let rt = Runtime::new(config);

    match cli.command {
        Commands::Render => {
            let outcome = rt
                .dispatcher()
                .dispatch(&rt.config.clusters, rt.config.multi_cluster)?;
            for failure in &outcome.failures {
                eprintln!("skipped cluster {} ({}): {}", failure.index, failure.module, failure.reason);
            }
            print!("{}", outcome.document.serialize()?);
        }
        Commands::Provision => {
            let report = rt
                .orchestrator
                .provision(&rt.dispatcher(), &rt.config.clusters, rt.config.multi_cluster)
                .await?;
            for (name, id) in &report.cluster_ids {
                println!("{name}\t{id}");
            }
        }
        Commands::Standalone => {
            let report = run_standalone(&rt.orchestrator, rt.settings.clone()).await?;
            println!("rancher server: {}", report.rancher_server);
            if let Some(bastion) = &report.bastion {
                println!("proxy bastion: {bastion}");
            }
            for (name, dns) in &report.registries {
                println!("{name}\t{dns}");
            }
        }
        Commands::Scale => {
            let dispatcher = rt.dispatcher();
            let report = rt
                .orchestrator
                .provision(&dispatcher, &rt.config.clusters, rt.config.multi_cluster)
                .await?;
            let up = rt
                .orchestrator
                .scale(&dispatcher, &report.clusters, ScaleDirection::Up)
                .await?;
            info!(clusters = up.len(), "scaled up");
            let down = rt
                .orchestrator
                .scale(&dispatcher, &up, ScaleDirection::Down)
                .await?;
            info!(clusters = down.len(), "scaled down");
        }
        Commands::Upgrade(args) => {
            let dispatcher = rt.dispatcher();
            let report = rt
                .orchestrator
                .provision(&dispatcher, &rt.config.clusters, rt.config.multi_cluster)
                .await?;
            let version = match args.version {
                Some(version) => version,
                None => report
                    .clusters
                    .iter()
                    .find_map(|c| c.spec.snapshots.as_ref())
                    .map(|s| s.upgrade_kubernetes_version.clone())
                    .filter(|v| !v.is_empty())
                    .context("no upgrade version: pass --version or set snapshots.upgradeKubernetesVersion")?,
            };
            let upgraded = rt
                .orchestrator
                .upgrade_kubernetes(&dispatcher, &report.clusters, &version)
                .await?;
            info!(clusters = upgraded.len(), version = %version, "upgraded");
        }
        Commands::Destroy => {
            let forced = CleanupController::new(
                Arc::new(TerraformCli::new(
                    &rt.config.terraform.binary,
                    &rt.config.terraform.work_dir,
                    rt.config.terraform.command_timeout(),
                )),
                &rt.config.terraform.work_dir,
                true,
            );
            let outcome = forced.cleanup().await?;
            info!(?outcome, cleanup_enabled = rt.cleanup.enabled(), "destroy finished");
        }
    }

    Ok(())
}
