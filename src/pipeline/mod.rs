//! Phase orchestration
//!
//! A run is a sequence of phases. Each phase appends blocks to the shared
//! document, applies it and reads the outputs the next phase needs. A phase
//! whose apply fails, or whose apply omits an expected output, triggers
//! cleanup (when enabled) and stops the run; later phases never start.
//!
//! Phases are sequential except [`Orchestrator::run_concurrent_phase`], which
//! spawns one task per unit, joins all of them and only then applies.

pub mod apply;
pub mod standalone;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::cleanup::CleanupController;
use crate::cluster::ClusterSpec;
use crate::config::ClusterInput;
use crate::dispatch::{DispatchFailure, Dispatcher, ProvisionedCluster};
use crate::document::{ResourceBlock, SharedDocument};
use crate::retry::PollPolicy;
use crate::verify::{verify_all, ClusterVerifier};
use crate::{Error, Result};

use self::apply::ApplyTool;

/// Ordered phases of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Servers and registry hosts
    BaseInfra,
    /// Registries, synthesized concurrently
    Auxiliary,
    /// RKE2 servers
    ClusterBootstrap,
    /// Rancher install
    ControlPlane,
    /// Downstream clusters
    Clusters,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::BaseInfra => "base-infra",
            Phase::Auxiliary => "auxiliary",
            Phase::ClusterBootstrap => "cluster-bootstrap",
            Phase::ControlPlane => "control-plane",
            Phase::Clusters => "clusters",
        };
        f.write_str(name)
    }
}

/// Outputs captured after a phase's apply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseResult {
    /// Phase that produced the outputs
    pub phase: Phase,
    /// Output name → value
    pub outputs: BTreeMap<String, String>,
    /// Whether the apply succeeded
    pub success: bool,
}

impl PhaseResult {
    /// Value of `key`, or `MissingOutput`
    pub fn require(&self, key: &str) -> Result<&str> {
        self.outputs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::missing_output(self.phase.to_string(), key))
    }
}

/// A failed run with whatever it achieved before failing
#[derive(Debug, thiserror::Error)]
#[error("phase {phase} failed: {source}")]
pub struct PipelineError {
    /// Phase that failed
    pub phase: Phase,
    /// Underlying error
    #[source]
    pub source: Error,
    /// Phases that completed
    pub completed: Vec<PhaseResult>,
    /// Cluster names generated before the failure
    pub cluster_names: Vec<String>,
}

impl PipelineError {
    /// Failure of `phase` with no partial progress
    pub fn new(phase: Phase, source: Error) -> Self {
        Self {
            phase,
            source,
            completed: Vec::new(),
            cluster_names: Vec::new(),
        }
    }

    /// Attach completed phases
    pub fn with_completed(mut self, completed: Vec<PhaseResult>) -> Self {
        self.completed = completed;
        self
    }

    /// Attach generated cluster names
    pub fn with_cluster_names(mut self, names: Vec<String>) -> Self {
        self.cluster_names = names;
        self
    }
}

/// Synthesis work run as its own task in a concurrent phase
pub struct PhaseUnit {
    /// Name for logs
    pub name: String,
    build: Box<dyn FnOnce() -> Result<Vec<ResourceBlock>> + Send>,
}

impl PhaseUnit {
    /// Unit that produces its blocks with `build`
    pub fn new(
        name: impl Into<String>,
        build: impl FnOnce() -> Result<Vec<ResourceBlock>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }
}

/// Result of provisioning downstream clusters
#[derive(Clone, Debug)]
pub struct ProvisionReport {
    /// Dispatched clusters with their names
    pub clusters: Vec<ProvisionedCluster>,
    /// Records that were skipped
    pub failures: Vec<DispatchFailure>,
    /// Cluster name → management cluster id
    pub cluster_ids: BTreeMap<String, String>,
    /// Apply outputs
    pub result: PhaseResult,
}

impl ProvisionReport {
    /// Generated cluster names, in input order
    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.names.cluster.clone()).collect()
    }
}

/// Direction of a scale run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleDirection {
    /// Apply each cluster's scaled-up pools
    Up,
    /// Apply each cluster's scaled-down pools
    Down,
}

/// Runs phases against one working directory
pub struct Orchestrator {
    tool: Arc<dyn ApplyTool>,
    document: SharedDocument,
    cleanup: Arc<CleanupController>,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(tool: Arc<dyn ApplyTool>, document: SharedDocument, cleanup: Arc<CleanupController>) -> Self {
        Self {
            tool,
            document,
            cleanup,
        }
    }

    /// The shared document
    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// Append `blocks`, apply and require every key in `expected`
    pub async fn run_phase(
        &self,
        phase: Phase,
        blocks: Vec<ResourceBlock>,
        expected: &[String],
    ) -> Result<PhaseResult> {
        info!(phase = %phase, blocks = blocks.len(), "running phase");
        self.document.append_and_flush(blocks).await?;
        self.apply_and_collect(phase, expected).await
    }

    /// Run every unit as its own task, join them all, then apply
    ///
    /// Each unit appends its blocks under the document lock as soon as it has
    /// built them. The first unit error fails the phase, but only after every
    /// unit has finished.
    pub async fn run_concurrent_phase(
        &self,
        phase: Phase,
        units: Vec<PhaseUnit>,
        expected: &[String],
    ) -> Result<PhaseResult> {
        info!(phase = %phase, units = units.len(), "running concurrent phase");

        let handles: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let document = self.document.clone();
                let name = unit.name.clone();
                let task = tokio::spawn(async move {
                    let blocks = (unit.build)()?;
                    document.append_and_flush(blocks).await
                });
                (name, task)
            })
            .collect();

        let (names, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(tasks).await;

        let mut first_error = None;
        for (name, outcome) in names.into_iter().zip(joined) {
            let result = outcome.unwrap_or_else(|e| Err(Error::apply(format!("unit {name} did not finish: {e}"))));
            if let Err(e) = result {
                warn!(phase = %phase, unit = %name, error = %e, "unit failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.apply_and_collect(phase, expected).await
    }

    /// Dispatch `inputs`, rewrite the document with their blocks and apply
    pub async fn provision(
        &self,
        dispatcher: &Dispatcher,
        inputs: &[ClusterInput],
        multi_cluster: bool,
    ) -> std::result::Result<ProvisionReport, PipelineError> {
        let outcome = dispatcher
            .dispatch(inputs, multi_cluster)
            .map_err(|e| PipelineError::new(Phase::Clusters, e))?;
        let names = outcome.cluster_names();
        let expected = outcome.cluster_id_outputs();

        let result = async {
            self.document.replace_and_flush(outcome.document.clone()).await?;
            self.apply_and_collect(Phase::Clusters, &expected).await
        }
        .await
        .map_err(|e| PipelineError::new(Phase::Clusters, e).with_cluster_names(names.clone()))?;

        let cluster_ids = cluster_ids(&outcome.clusters, &result);
        info!(clusters = ?names, skipped = outcome.failures.len(), "clusters provisioned");
        Ok(ProvisionReport {
            clusters: outcome.clusters,
            failures: outcome.failures,
            cluster_ids,
            result,
        })
    }

    /// Provision, then verify every cluster through the management API
    pub async fn provision_and_verify(
        &self,
        dispatcher: &Dispatcher,
        inputs: &[ClusterInput],
        multi_cluster: bool,
        verifier: &dyn ClusterVerifier,
        poll: &PollPolicy,
    ) -> std::result::Result<ProvisionReport, PipelineError> {
        let report = self.provision(dispatcher, inputs, multi_cluster).await?;
        verify_all(verifier, &report.cluster_ids, poll).await.map_err(|e| {
            PipelineError::new(Phase::Clusters, e)
                .with_completed(vec![report.result.clone()])
                .with_cluster_names(report.cluster_names())
        })?;
        Ok(report)
    }

    /// Re-apply `clusters` with their scaled pools, keeping their names
    pub async fn scale(
        &self,
        dispatcher: &Dispatcher,
        clusters: &[ProvisionedCluster],
        direction: ScaleDirection,
    ) -> std::result::Result<Vec<ProvisionedCluster>, PipelineError> {
        self.resynthesize(dispatcher, clusters, |spec| match direction {
            ScaleDirection::Up => spec.scaled_up(),
            ScaleDirection::Down => spec.scaled_down(),
        })
        .await
    }

    /// Re-apply `clusters` at `version`, keeping their names
    pub async fn upgrade_kubernetes(
        &self,
        dispatcher: &Dispatcher,
        clusters: &[ProvisionedCluster],
        version: &str,
    ) -> std::result::Result<Vec<ProvisionedCluster>, PipelineError> {
        self.resynthesize(dispatcher, clusters, |spec| spec.with_kubernetes_version(version))
            .await
    }

    async fn resynthesize<F>(
        &self,
        dispatcher: &Dispatcher,
        clusters: &[ProvisionedCluster],
        derive: F,
    ) -> std::result::Result<Vec<ProvisionedCluster>, PipelineError>
    where
        F: Fn(&ClusterSpec) -> Result<ClusterSpec>,
    {
        let names: Vec<String> = clusters.iter().map(|c| c.names.cluster.clone()).collect();
        let fail = |e: Error| PipelineError::new(Phase::Clusters, e).with_cluster_names(names.clone());

        let derived = clusters
            .iter()
            .map(|c| {
                Ok(ProvisionedCluster {
                    names: c.names.clone(),
                    spec: derive(&c.spec)?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(fail)?;

        let expected: Vec<String> = derived.iter().map(|c| c.names.cluster_id_output()).collect();
        async {
            let document = dispatcher.synthesize(&derived)?;
            self.document.replace_and_flush(document).await?;
            self.apply_and_collect(Phase::Clusters, &expected).await
        }
        .await
        .map_err(fail)?;

        info!(clusters = ?names, "clusters updated");
        Ok(derived)
    }

    async fn apply_and_collect(&self, phase: Phase, expected: &[String]) -> Result<PhaseResult> {
        if let Err(e) = self.tool.init_and_apply().await {
            return Err(self.fail(phase, e).await);
        }
        let outputs = match self.tool.outputs().await {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(phase, e).await),
        };

        let result = PhaseResult {
            phase,
            outputs,
            success: true,
        };
        for key in expected {
            if let Err(e) = result.require(key) {
                return Err(self.fail(phase, e).await);
            }
        }
        info!(phase = %phase, outputs = result.outputs.len(), "phase complete");
        Ok(result)
    }

    /// Run cleanup, then hand back the original error
    ///
    /// Only called once `init_and_apply` has started, so any error here may
    /// leave resources behind: a timeout kills the tool mid-apply and
    /// unparsable outputs follow a successful apply.
    async fn fail(&self, phase: Phase, error: Error) -> Error {
        warn!(phase = %phase, error = %error, "phase failed, cleaning up");
        match self.cleanup.cleanup().await {
            Ok(outcome) => info!(phase = %phase, ?outcome, "cleanup finished"),
            Err(cleanup_error) => error!(phase = %phase, error = %cleanup_error, "cleanup failed"),
        }
        error
    }
}

fn cluster_ids(clusters: &[ProvisionedCluster], result: &PhaseResult) -> BTreeMap<String, String> {
    clusters
        .iter()
        .filter_map(|c| {
            result
                .outputs
                .get(&c.names.cluster_id_output())
                .map(|id| (c.names.cluster.clone(), id.clone()))
        })
        .collect()
}
