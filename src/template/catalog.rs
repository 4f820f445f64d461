//! Topology → builder chain lookup

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::credential::CloudCredentialBuilder;
use super::custom::{CustomClusterBuilder, DirectRegistrationBuilder, Ec2NodesBuilder, LocalsRegistrationBuilder};
use super::hosted::HostedClusterBuilder;
use super::imported::{ImportRegistrationBuilder, ImportedClusterBuilder};
use super::outputs::ClusterIdOutputBuilder;
use super::rke1::{NodeTemplateBuilder, Rke1ClusterBuilder};
use super::rke2::{ClusterV2Builder, MachineConfigBuilder};
use super::{BlockBuilder, BuildStage, SynthContext};
use crate::cluster::{Distro, HostedKind, NodeProvider, Topology};
use crate::document::ResourceBlock;
use crate::{Error, Result};

/// Ordered builders that together produce one cluster's blocks
#[derive(Clone)]
pub struct BuilderChain {
    /// Chain name for logs
    pub name: String,
    /// Builders in emission order
    pub builders: Vec<Arc<dyn BlockBuilder>>,
}

impl BuilderChain {
    /// Create a chain
    pub fn new(name: impl Into<String>, builders: Vec<Arc<dyn BlockBuilder>>) -> Self {
        Self {
            name: name.into(),
            builders,
        }
    }

    /// Run every builder of `stage` in order and concatenate their blocks
    pub fn build_stage(&self, ctx: &SynthContext<'_>, stage: BuildStage) -> Result<Vec<ResourceBlock>> {
        let mut blocks = Vec::new();
        for builder in self.builders.iter().filter(|b| b.stage() == stage) {
            let built = builder.build(ctx)?;
            debug!(
                chain = %self.name,
                builder = builder.name(),
                cluster = %ctx.names.cluster,
                blocks = built.len(),
                "built blocks"
            );
            blocks.extend(built);
        }
        Ok(blocks)
    }

    /// True if any builder runs after the shared locals block
    pub fn has_registration_stage(&self) -> bool {
        self.builders
            .iter()
            .any(|b| b.stage() == BuildStage::Registration)
    }
}

impl std::fmt::Debug for BuilderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.builders.iter().map(|b| b.name()).collect();
        f.debug_struct("BuilderChain")
            .field("name", &self.name)
            .field("builders", &names)
            .finish()
    }
}

/// Registry of builder chains by topology
#[derive(Clone, Debug, Default)]
pub struct TemplateCatalog {
    chains: HashMap<Topology, BuilderChain>,
}

impl TemplateCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the chain for a topology
    pub fn register(&mut self, topology: Topology, chain: BuilderChain) {
        self.chains.insert(topology, chain);
    }

    /// Chain for `topology`, or `UnsupportedTopology`
    pub fn chain(&self, topology: &Topology) -> Result<&BuilderChain> {
        self.chains
            .get(topology)
            .ok_or_else(|| Error::unsupported_topology(format!("no templates for module {topology}")))
    }

    /// True if a chain is registered
    pub fn supports(&self, topology: &Topology) -> bool {
        self.chains.contains_key(topology)
    }

    /// Number of registered topologies
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Catalog covering every hosted, node-driver, custom, airgap and imported topology
    pub fn standard() -> Self {
        let credential: Arc<dyn BlockBuilder> = Arc::new(CloudCredentialBuilder);
        let output: Arc<dyn BlockBuilder> = Arc::new(ClusterIdOutputBuilder);
        let mut catalog = Self::new();

        for kind in [HostedKind::Aks, HostedKind::Eks, HostedKind::Gke] {
            let topology = Topology::Hosted(kind);
            catalog.register(
                topology,
                BuilderChain::new(
                    topology.module(),
                    vec![credential.clone(), Arc::new(HostedClusterBuilder), output.clone()],
                ),
            );
        }

        let providers = [
            NodeProvider::Ec2,
            NodeProvider::Azure,
            NodeProvider::Linode,
            NodeProvider::Vsphere,
            NodeProvider::Harvester,
        ];
        let distros = [Distro::Rke1, Distro::Rke2, Distro::K3s];

        for provider in providers {
            for distro in distros {
                let topology = Topology::NodeDriver { distro, provider };
                let builders: Vec<Arc<dyn BlockBuilder>> = if distro.is_v2() {
                    vec![
                        credential.clone(),
                        Arc::new(MachineConfigBuilder),
                        Arc::new(ClusterV2Builder),
                        output.clone(),
                    ]
                } else {
                    vec![
                        credential.clone(),
                        Arc::new(NodeTemplateBuilder),
                        Arc::new(Rke1ClusterBuilder),
                        output.clone(),
                    ]
                };
                catalog.register(topology, BuilderChain::new(topology.module(), builders));
            }
        }

        for distro in distros {
            let custom = Topology::Custom { distro };
            let registration: Arc<dyn BlockBuilder> = if distro.is_v2() {
                Arc::new(LocalsRegistrationBuilder)
            } else {
                Arc::new(DirectRegistrationBuilder::public())
            };
            catalog.register(
                custom,
                BuilderChain::new(
                    custom.module(),
                    vec![
                        Arc::new(Ec2NodesBuilder::public()),
                        Arc::new(CustomClusterBuilder::custom()),
                        output.clone(),
                        registration,
                    ],
                ),
            );

            let airgap = Topology::Airgap { distro };
            catalog.register(
                airgap,
                BuilderChain::new(
                    airgap.module(),
                    vec![
                        Arc::new(Ec2NodesBuilder::private()),
                        Arc::new(CustomClusterBuilder::airgap()),
                        Arc::new(DirectRegistrationBuilder::through_bastion()),
                        output.clone(),
                    ],
                ),
            );

            let imported = Topology::Imported { distro };
            catalog.register(
                imported,
                BuilderChain::new(
                    imported.module(),
                    vec![
                        Arc::new(ImportedClusterBuilder),
                        Arc::new(ImportRegistrationBuilder),
                        output.clone(),
                    ],
                ),
            );
        }

        catalog
    }
}
