//! Topology dispatch
//!
//! Turns declarative cluster records into a single assembled [`Document`].
//! Each record is decoded into a [`ClusterSpec`], given freshly generated
//! names and routed to the builder chain registered for its topology.
//!
//! Blocks are appended in this order so that every reference points backwards:
//!
//! 1. provider blocks
//! 2. each cluster's cluster-stage blocks, in input order
//! 3. the locals block holding the node command of every custom RKE2/K3s cluster
//! 4. each cluster's registration-stage blocks
//!
//! Records whose module has no builder chain are handled according to the
//! [`BatchPolicy`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::ClusterSpec;
use crate::config::ClusterInput;
use crate::document::Document;
use crate::namegen::NameGenerator;
use crate::template::custom::node_command_locals;
use crate::template::providers::ProviderNeeds;
use crate::template::{BuildStage, ClusterNames, SynthContext, SynthSettings, TemplateCatalog};
use crate::{Error, Result};

/// What to do with a record whose module has no builder chain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    /// Record the failure and keep dispatching the rest
    #[default]
    SkipUnsupported,
    /// Fail the whole batch
    AbortOnUnsupported,
}

/// A record that was not dispatched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchFailure {
    /// Position in the input
    pub index: usize,
    /// Module string as declared
    pub module: String,
    /// Why the record was skipped
    pub reason: String,
}

/// A dispatched cluster: its spec and the names generated for it
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionedCluster {
    /// Generated names
    pub names: ClusterNames,
    /// Validated spec
    pub spec: ClusterSpec,
}

/// Result of dispatching a batch
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    /// Dispatched clusters, in input order
    pub clusters: Vec<ProvisionedCluster>,
    /// Names of the custom RKE2/K3s clusters wired through the locals block
    pub custom_cluster_names: Vec<String>,
    /// Skipped records
    pub failures: Vec<DispatchFailure>,
    /// Assembled document
    pub document: Document,
}

impl DispatchOutcome {
    /// Generated cluster names, in input order
    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.names.cluster.clone()).collect()
    }

    /// Output keys holding each cluster's id
    pub fn cluster_id_outputs(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.names.cluster_id_output()).collect()
    }
}

/// Routes cluster records to builder chains and assembles the document
pub struct Dispatcher {
    catalog: Arc<TemplateCatalog>,
    policy: BatchPolicy,
    settings: Arc<SynthSettings>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(catalog: Arc<TemplateCatalog>, policy: BatchPolicy, settings: Arc<SynthSettings>) -> Self {
        Self {
            catalog,
            policy,
            settings,
        }
    }

    /// Dispatch `inputs` and assemble their document
    ///
    /// Without `multi_cluster` exactly one record is accepted. No apply is
    /// triggered.
    pub fn dispatch(&self, inputs: &[ClusterInput], multi_cluster: bool) -> Result<DispatchOutcome> {
        if !multi_cluster && inputs.len() != 1 {
            return Err(Error::configuration(format!(
                "single-cluster mode expects exactly one cluster, found {}",
                inputs.len()
            )));
        }

        let mut generator = NameGenerator::new();
        let mut clusters = Vec::with_capacity(inputs.len());
        let mut failures = Vec::new();

        for (index, input) in inputs.iter().enumerate() {
            let spec = match self.resolve(input) {
                Ok(spec) => spec,
                Err(Error::UnsupportedTopology(reason)) if self.policy == BatchPolicy::SkipUnsupported => {
                    warn!(index, module = %input.module, reason = %reason, "skipping unsupported cluster");
                    failures.push(DispatchFailure {
                        index,
                        module: input.module.clone(),
                        reason,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let names = ClusterNames {
                cluster: generator.next_name(),
                pool: generator.next_name(),
                credential: generator.next_name(),
                machine_config: generator.next_name(),
            };
            info!(index, module = %input.module, cluster = %names.cluster, "dispatched cluster");
            clusters.push(ProvisionedCluster { names, spec });
        }

        let custom_cluster_names = clusters
            .iter()
            .filter(|c| c.spec.topology.registers_through_locals())
            .map(|c| c.names.cluster.clone())
            .collect();
        let document = self.synthesize(&clusters)?;

        Ok(DispatchOutcome {
            clusters,
            custom_cluster_names,
            failures,
            document,
        })
    }

    /// Assemble the document for already-named clusters
    ///
    /// Scale and upgrade runs call this with derived specs and the original
    /// names, so the apply tool updates resources in place.
    pub fn synthesize(&self, clusters: &[ProvisionedCluster]) -> Result<Document> {
        let needs = ProviderNeeds {
            rancher2: true,
            aws: clusters.iter().any(|c| c.spec.topology.needs_aws_instances()),
            linode: false,
            null: clusters.iter().any(|c| c.spec.topology.needs_aws_instances()),
        };
        let mut document = Document::new(needs.settings(&self.settings));
        document.append_all(needs.provider_blocks(&self.settings))?;

        for cluster in clusters {
            let blocks = self
                .catalog
                .chain(&cluster.spec.topology)?
                .build_stage(&self.context(cluster), BuildStage::Cluster)?;
            document.append_all(blocks)?;
        }

        let custom: Vec<&ClusterNames> = clusters
            .iter()
            .filter(|c| c.spec.topology.registers_through_locals())
            .map(|c| &c.names)
            .collect();
        if !custom.is_empty() {
            document.append(node_command_locals(&custom))?;
        }

        for cluster in clusters {
            let chain = self.catalog.chain(&cluster.spec.topology)?;
            if chain.has_registration_stage() {
                let blocks = chain.build_stage(&self.context(cluster), BuildStage::Registration)?;
                document.append_all(blocks)?;
            }
        }

        debug!(clusters = clusters.len(), blocks = document.len(), "synthesized document");
        Ok(document)
    }

    fn resolve(&self, input: &ClusterInput) -> Result<ClusterSpec> {
        let spec = ClusterSpec::try_from(input)?;
        if !self.catalog.supports(&spec.topology) {
            return Err(Error::unsupported_topology(format!(
                "no templates for module {}",
                input.module
            )));
        }
        Ok(spec)
    }

    fn context<'a>(&'a self, cluster: &'a ProvisionedCluster) -> SynthContext<'a> {
        SynthContext {
            spec: &cluster.spec,
            names: &cluster.names,
            settings: &self.settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodePool;
    use crate::template::test_support::settings;
    use std::collections::HashSet;

    fn record(module: &str) -> ClusterInput {
        ClusterInput {
            module: module.into(),
            kubernetes_version: "v1.30.4+rke2r1".into(),
            node_pools: vec![NodePool::all_roles(1)],
            provider_config: serde_json::json!({"region": "us-east-2"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    fn dispatcher(policy: BatchPolicy) -> Dispatcher {
        let mut settings = settings();
        settings.cloud_credentials.insert(
            "azure".into(),
            serde_json::json!({"client_id": "id", "client_secret": "secret"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        Dispatcher::new(Arc::new(TemplateCatalog::standard()), policy, Arc::new(settings))
    }

    #[test]
    fn three_records_get_three_names_and_one_custom() {
        let inputs = vec![record("aks"), record("ec2_rke2"), record("custom_ec2_rke2")];
        let outcome = dispatcher(BatchPolicy::default()).dispatch(&inputs, true).unwrap();

        let names: HashSet<_> = outcome.cluster_names().into_iter().collect();
        assert_eq!(names.len(), 3);
        assert_eq!(outcome.custom_cluster_names.len(), 1);
        assert_eq!(outcome.custom_cluster_names[0], outcome.clusters[2].names.cluster);
        assert!(outcome.failures.is_empty());

        let text = outcome.document.serialize().unwrap();
        let locals = text.find("locals {").unwrap();
        let register = text.find("-register\"").unwrap();
        assert!(locals < register);
    }

    #[test]
    fn unsupported_entry_is_skipped_by_default() {
        let inputs = vec![record("ec2_rke2"), record("mainframe_rke9"), record("ec2_k3s")];
        let outcome = dispatcher(BatchPolicy::SkipUnsupported).dispatch(&inputs, true).unwrap();

        assert_eq!(outcome.clusters.len(), 2);
        assert_eq!(outcome.clusters[0].spec.topology.module(), "ec2_rke2");
        assert_eq!(outcome.clusters[1].spec.topology.module(), "ec2_k3s");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.failures[0].module, "mainframe_rke9");
    }

    #[test]
    fn unsupported_entry_aborts_when_asked() {
        let inputs = vec![record("ec2_rke2"), record("mainframe_rke9"), record("ec2_k3s")];
        let err = dispatcher(BatchPolicy::AbortOnUnsupported)
            .dispatch(&inputs, true)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedTopology(_)));
    }

    #[test]
    fn single_cluster_mode_takes_exactly_one_record() {
        let d = dispatcher(BatchPolicy::default());
        assert!(d.dispatch(&[record("ec2_rke2"), record("ec2_k3s")], false).is_err());
        assert!(d.dispatch(&[], false).is_err());

        let outcome = d.dispatch(&[record("custom_ec2_k3s")], false).unwrap();
        assert_eq!(outcome.custom_cluster_names.len(), 1);
    }

    #[test]
    fn invalid_record_is_fatal_even_when_skipping() {
        let mut bad = record("ec2_rke2");
        bad.node_pools.clear();
        let err = dispatcher(BatchPolicy::SkipUnsupported)
            .dispatch(&[bad], true)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn resynthesis_keeps_names() {
        let d = dispatcher(BatchPolicy::default());
        let outcome = d.dispatch(&[record("ec2_rke2")], true).unwrap();
        let mut clusters = outcome.clusters.clone();
        clusters[0].spec = clusters[0].spec.with_kubernetes_version("v1.31.1+rke2r1").unwrap();

        let doc = d.synthesize(&clusters).unwrap();
        let text = doc.serialize().unwrap();
        assert!(text.contains(&outcome.clusters[0].names.cluster));
        assert!(text.contains("v1.31.1+rke2r1"));
    }
}
