//! Phased apply tests against a fake terraform
//!
//! The fake reads the `main.tf` each apply sees and answers `output` with a
//! value for every output block in it, minus any it was told to withhold.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tfp_forge::cleanup::{CleanupController, CleanupOutcome};
use tfp_forge::config::RunConfig;
use tfp_forge::dispatch::Dispatcher;
use tfp_forge::document::{Document, SharedDocument, MAIN_TF};
use tfp_forge::pipeline::apply::ApplyTool;
use tfp_forge::pipeline::standalone::run_standalone;
use tfp_forge::pipeline::{Orchestrator, Phase, ScaleDirection};
use tfp_forge::template::{SynthSettings, TemplateCatalog};
use tfp_forge::{Error, Result};

const SCRIPT: &str = "#!/bin/bash\nset -euo pipefail\necho \"installing ${1:-latest}\" > /tmp/log\n";

struct FakeTerraform {
    work_dir: PathBuf,
    withheld: BTreeSet<String>,
    fail_on_apply: Option<usize>,
    applied: Mutex<Vec<String>>,
    destroys: AtomicUsize,
}

impl FakeTerraform {
    fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            withheld: BTreeSet::new(),
            fail_on_apply: None,
            applied: Mutex::new(Vec::new()),
            destroys: AtomicUsize::new(0),
        }
    }

    fn withholding(mut self, key: &str) -> Self {
        self.withheld.insert(key.to_string());
        self
    }

    fn failing_on_apply(mut self, n: usize) -> Self {
        self.fail_on_apply = Some(n);
        self
    }

    fn applies(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

fn output_names(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("output \""))
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ApplyTool for FakeTerraform {
    async fn init_and_apply(&self) -> Result<()> {
        let text = std::fs::read_to_string(self.work_dir.join(MAIN_TF)).map_err(|e| Error::io(&self.work_dir, e))?;
        let mut applied = self.applied.lock().unwrap();
        applied.push(text);
        std::fs::write(self.work_dir.join("terraform.tfstate"), "{}").map_err(|e| Error::io(&self.work_dir, e))?;
        if self.fail_on_apply == Some(applied.len()) {
            return Err(Error::apply("exit status 1"));
        }
        Ok(())
    }

    async fn outputs(&self) -> Result<BTreeMap<String, String>> {
        let applied = self.applied.lock().unwrap();
        let last = applied.last().cloned().unwrap_or_default();
        Ok(output_names(&last)
            .into_iter()
            .filter(|name| !self.withheld.contains(name))
            .map(|name| {
                let value = match name.strip_suffix("_cluster_id") {
                    Some(cluster) => format!("c-{cluster}"),
                    None => format!("{name}.example.com"),
                };
                (name, value)
            })
            .collect())
    }

    async fn output(&self, key: &str) -> Result<Option<String>> {
        Ok(self.outputs().await?.remove(key))
    }

    async fn destroy(&self) -> Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn write_scripts(dir: &Path) {
    for name in [
        "auth-registry.sh",
        "non-auth-registry.sh",
        "ecr-registry.sh",
        "init-server.sh",
        "add-servers.sh",
        "setup.sh",
        "proxy-init-server.sh",
        "proxy-add-servers.sh",
    ] {
        std::fs::write(dir.join(name), SCRIPT).unwrap();
    }
}

fn config(dir: &Path, registries: bool) -> RunConfig {
    let yaml = format!(
        r#"
rancher:
  host: rancher.example.com
  adminToken: token-abc
terraform:
  workDir: {dir}
  privateKeyPath: /keys/id.pem
  scriptsDir: {dir}/scripts
  aws:
    region: us-east-2
    ami: ami-0123
    instanceType: t3.xlarge
  cloudCredentials:
    amazonec2:
      access_key: AK
      secret_key: SK
      default_region: us-east-2
  standalone:
    rancherHostname: rancher.example.com
    rancherChartRepository: https://releases.rancher.com/server-charts/
    repo: latest
    certManagerVersion: v1.15.3
    certType: self-signed
    rancherTagVersion: v2.9.2
    chartVersion: 2.9.2
    bootstrapPassword: admin
    rancherImage: rancher/rancher
    rke2Version: v1.30.4+rke2r1
    osUser: ubuntu
    osGroup: ubuntu
  standaloneRegistry:
    enabled: {registries}
    registryName: registry
    registryUsername: admin
    registryPassword: secret
    assetsPath: /home/ubuntu
    ecrUri: 123456789012.dkr.ecr.us-east-2.amazonaws.com
multiCluster: true
clusters:
  - module: ec2_rke2
    kubernetesVersion: v1.30.4+rke2r1
    nodePools:
      - {{ etcd: true, controlplane: true, worker: true, quantity: 1 }}
    scaling:
      scaledUpNodePools:
        - {{ etcd: true, controlplane: true, worker: true, quantity: 3 }}
      scaledDownNodePools:
        - {{ etcd: true, controlplane: true, worker: true, quantity: 1 }}
    providerConfig:
      region: us-east-2
      instanceType: t3.large
  - module: custom_ec2_k3s
    kubernetesVersion: v1.30.4+k3s1
    nodePools:
      - {{ etcd: true, controlplane: true, worker: true, quantity: 1 }}
  - module: mainframe_rke9
    kubernetesVersion: v1
    nodePools:
      - {{ etcd: true, controlplane: true, worker: true, quantity: 1 }}
"#,
        dir = dir.display()
    );
    RunConfig::from_yaml(&yaml).unwrap()
}

struct Harness {
    _dir: tempfile::TempDir,
    work_dir: PathBuf,
    tool: Arc<FakeTerraform>,
    cleanup: Arc<CleanupController>,
    orchestrator: Orchestrator,
    config: RunConfig,
}

fn harness(registries: bool, tool: impl FnOnce(FakeTerraform) -> FakeTerraform) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let work_dir = dir.path().to_path_buf();
    std::fs::create_dir(work_dir.join("scripts")).unwrap();
    write_scripts(&work_dir.join("scripts"));

    let tool = Arc::new(tool(FakeTerraform::new(&work_dir)));
    let cleanup = Arc::new(CleanupController::new(tool.clone(), &work_dir, true));
    let orchestrator = Orchestrator::new(
        tool.clone(),
        SharedDocument::new(Document::default(), &work_dir),
        cleanup.clone(),
    );
    Harness {
        config: config(&work_dir, registries),
        _dir: dir,
        work_dir,
        tool,
        cleanup,
        orchestrator,
    }
}

impl Harness {
    fn settings(&self) -> Arc<SynthSettings> {
        Arc::new(SynthSettings::from_config(&self.config))
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::new(TemplateCatalog::standard()),
            self.config.batch_policy,
            self.settings(),
        )
    }
}

// =============================================================================
// Standalone pipeline
// =============================================================================

#[tokio::test]
async fn standalone_runs_every_phase_in_order() {
    let h = harness(true, |t| t);
    let report = run_standalone(&h.orchestrator, h.settings()).await.unwrap();

    let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        vec![Phase::BaseInfra, Phase::Auxiliary, Phase::ClusterBootstrap, Phase::ControlPlane]
    );
    assert_eq!(report.rancher_server, "rke2_server1_public_dns.example.com");
    assert_eq!(report.registries.len(), 4);
    assert_eq!(
        report.registries["global_registry"],
        "global_registry_public_dns.example.com"
    );

    let applies = h.tool.applies();
    assert_eq!(applies.len(), 4);
    assert!(!applies[0].contains("null_resource"));
    assert!(applies[3].contains("resource \"null_resource\" \"install_rancher\""));
    assert_eq!(h.tool.destroys(), 0);
}

#[tokio::test]
async fn registries_all_land_before_the_second_apply() {
    let h = harness(true, |t| t);
    run_standalone(&h.orchestrator, h.settings()).await.unwrap();

    let second = &h.tool.applies()[1];
    for registry in ["auth_registry", "non_auth_registry", "global_registry", "ecr_registry"] {
        assert!(
            second.contains(&format!("resource \"null_resource\" \"{registry}\"")),
            "{registry} missing from the auxiliary apply"
        );
    }
    assert!(!second.contains("install_rancher"));
}

#[tokio::test]
async fn standalone_without_registries_skips_the_auxiliary_phase() {
    let h = harness(false, |t| t);
    let report = run_standalone(&h.orchestrator, h.settings()).await.unwrap();

    assert_eq!(report.phases.len(), 3);
    assert!(report.registries.is_empty());
    assert!(!h.tool.applies()[0].contains("auth_registry"));
}

#[tokio::test]
async fn proxied_standalone_provisions_the_bastion_first() {
    let mut h = harness(false, |t| t);
    h.config.terraform.standalone.proxy = true;
    let report = run_standalone(&h.orchestrator, h.settings()).await.unwrap();

    assert_eq!(report.phases.len(), 3);
    assert_eq!(report.bastion.as_deref(), Some("rke2_bastion_public_dns.example.com"));

    let applies = h.tool.applies();
    assert!(applies[0].contains("resource \"aws_instance\" \"rke2_bastion\""));
    assert!(applies[1].contains("/tmp/proxy-init-server.sh"));
    assert!(applies[1].contains(" rke2_bastion_public_dns.example.com'"));
    assert!(!applies[1].contains("/tmp/init-server.sh"));
    assert!(applies[2].contains("resource \"null_resource\" \"install_rancher\""));
}

#[tokio::test]
async fn proxy_and_registries_are_rejected_before_any_apply() {
    let mut h = harness(true, |t| t);
    h.config.terraform.standalone.proxy = true;
    let err = run_standalone(&h.orchestrator, h.settings()).await.unwrap_err();

    assert_eq!(err.phase, Phase::BaseInfra);
    assert!(matches!(err.source, Error::Configuration(_)));
    assert!(h.tool.applies().is_empty());
}

#[tokio::test]
async fn standalone_document_is_valid_hcl() {
    let h = harness(true, |t| t);
    run_standalone(&h.orchestrator, h.settings()).await.unwrap();

    let text = std::fs::read_to_string(h.work_dir.join(MAIN_TF)).unwrap();
    let body = hcl::parse(&text).unwrap_or_else(|e| panic!("main.tf does not parse: {e}\n{text}"));
    assert!(body.blocks().any(|b| b.identifier() == "terraform"));
    assert!(body.blocks().filter(|b| b.identifier() == "output").count() >= 8);
}

#[tokio::test]
async fn missing_output_stops_the_pipeline_and_cleans_up() {
    let h = harness(true, |t| t.withholding("rke2_server1_private_ip"));
    let err = run_standalone(&h.orchestrator, h.settings()).await.unwrap_err();

    assert_eq!(err.phase, Phase::BaseInfra);
    assert!(matches!(err.source, Error::MissingOutput { .. }));
    assert!(err.completed.is_empty());
    assert_eq!(h.tool.applies().len(), 1, "no later phase may apply");
    assert_eq!(h.tool.destroys(), 1);
    assert!(!h.work_dir.join(MAIN_TF).exists());
    assert!(!h.work_dir.join("terraform.tfstate").exists());
}

#[tokio::test]
async fn cleanup_after_cleanup_is_a_no_op() {
    let h = harness(false, |t| t.withholding("rke2_server2_public_dns"));
    run_standalone(&h.orchestrator, h.settings()).await.unwrap_err();
    assert_eq!(h.tool.destroys(), 1);

    assert_eq!(h.cleanup.cleanup().await.unwrap(), CleanupOutcome::AlreadyClean);
    assert_eq!(h.tool.destroys(), 1);
}

#[tokio::test]
async fn failed_apply_reports_the_phases_before_it() {
    let h = harness(true, |t| t.failing_on_apply(3));
    let err = run_standalone(&h.orchestrator, h.settings()).await.unwrap_err();

    assert_eq!(err.phase, Phase::ClusterBootstrap);
    assert!(matches!(err.source, Error::Apply(_)));
    let completed: Vec<Phase> = err.completed.iter().map(|p| p.phase).collect();
    assert_eq!(completed, vec![Phase::BaseInfra, Phase::Auxiliary]);
    assert_eq!(h.tool.applies().len(), 3);
    assert_eq!(h.tool.destroys(), 1);
}

// =============================================================================
// Downstream clusters
// =============================================================================

#[tokio::test]
async fn provision_reports_an_id_per_cluster() {
    let h = harness(false, |t| t);
    let report = h
        .orchestrator
        .provision(&h.dispatcher(), &h.config.clusters, h.config.multi_cluster)
        .await
        .unwrap();

    assert_eq!(report.clusters.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].module, "mainframe_rke9");
    for name in report.cluster_names() {
        assert_eq!(report.cluster_ids[&name], format!("c-{name}"));
    }
    assert_eq!(h.tool.applies().len(), 1);
}

#[tokio::test]
async fn scaling_keeps_cluster_names() {
    let h = harness(false, |t| t);
    let mut config = h.config.clone();
    config.clusters.truncate(1);
    let dispatcher = h.dispatcher();

    let report = h.orchestrator.provision(&dispatcher, &config.clusters, true).await.unwrap();
    let up = h
        .orchestrator
        .scale(&dispatcher, &report.clusters, ScaleDirection::Up)
        .await
        .unwrap();
    let down = h
        .orchestrator
        .scale(&dispatcher, &up, ScaleDirection::Down)
        .await
        .unwrap();

    assert_eq!(up[0].names, report.clusters[0].names);
    assert_eq!(up[0].spec.node_count(), 3);
    assert_eq!(down[0].spec.node_count(), 1);

    let applies = h.tool.applies();
    assert_eq!(applies.len(), 3);
    let cluster = &report.clusters[0].names.cluster;
    assert!(applies.iter().all(|text| text.contains(cluster.as_str())));
}

#[tokio::test]
async fn failed_provision_keeps_state_when_cleanup_is_disabled() {
    let h = harness(false, |t| t);
    let tool = Arc::new(FakeTerraform::new(&h.work_dir).failing_on_apply(1));
    let cleanup = Arc::new(CleanupController::new(tool.clone(), &h.work_dir, false));
    let orchestrator = Orchestrator::new(
        tool.clone(),
        SharedDocument::new(Document::default(), &h.work_dir),
        cleanup,
    );
    let err = orchestrator
        .provision(&h.dispatcher(), &h.config.clusters, true)
        .await
        .unwrap_err();

    assert_eq!(err.phase, Phase::Clusters);
    assert_eq!(err.cluster_names.len(), 2);
    assert_eq!(tool.destroys(), 0, "cleanup is disabled");
    assert!(h.work_dir.join(MAIN_TF).exists());
    assert!(h.work_dir.join("terraform.tfstate").exists());
}
