//! Semantic cluster records
//!
//! A [`ClusterSpec`] is the validated, immutable description of one
//! downstream cluster. Builders receive it by reference; scale and upgrade
//! flows derive *new* specs from it rather than mutating it.

mod types;

pub use types::{Distro, HostedKind, NodeProvider, Psact, Topology};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One pool of nodes sharing roles and size
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    /// Nodes run etcd
    #[serde(default)]
    pub etcd: bool,
    /// Nodes run the control plane
    #[serde(default)]
    pub controlplane: bool,
    /// Nodes run workloads
    #[serde(default)]
    pub worker: bool,
    /// Number of nodes in the pool
    pub quantity: u32,
    /// Instance or VM size, when the provider needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

impl NodePool {
    /// Create a pool with the given roles and quantity
    pub fn new(etcd: bool, controlplane: bool, worker: bool, quantity: u32) -> Self {
        Self {
            etcd,
            controlplane,
            worker,
            quantity,
            instance_type: None,
        }
    }

    /// A pool running every role
    pub fn all_roles(quantity: u32) -> Self {
        Self::new(true, true, true, quantity)
    }

    /// Validate that the pool has a role and at least one node
    pub fn validate(&self) -> Result<()> {
        if !(self.etcd || self.controlplane || self.worker) {
            return Err(Error::configuration(
                "node pool must have at least one of etcd, controlplane or worker",
            ));
        }
        if self.quantity == 0 {
            return Err(Error::configuration("node pool quantity must be at least 1"));
        }
        Ok(())
    }

    /// Registration flags appended to a node command for this pool's roles
    pub fn role_flags(&self) -> String {
        let mut flags = Vec::new();
        if self.etcd {
            flags.push("--etcd");
        }
        if self.controlplane {
            flags.push("--controlplane");
        }
        if self.worker {
            flags.push("--worker");
        }
        flags.join(" ")
    }
}

/// Etcd snapshot create/restore parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshots {
    /// Trigger an etcd snapshot
    #[serde(default)]
    pub create_snapshot: bool,
    /// Restore from `snapshot_name`
    #[serde(default)]
    pub restore_snapshot: bool,
    /// Snapshot to restore
    #[serde(default)]
    pub snapshot_name: String,
    /// What the restore covers: `none`, `kubernetesVersion` or `all`
    #[serde(default)]
    pub snapshot_restore: String,
    /// Version to upgrade to after taking the snapshot
    #[serde(default)]
    pub upgrade_kubernetes_version: String,
    /// Upgrade strategy control plane concurrency
    #[serde(default)]
    pub control_plane_concurrency: String,
    /// Upgrade strategy worker concurrency
    #[serde(default)]
    pub worker_concurrency: String,
}

/// Node pools to switch to when scaling up or down
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scaling {
    /// Pools after scaling up
    #[serde(default)]
    pub scaled_up_node_pools: Vec<NodePool>,
    /// Pools after scaling down
    #[serde(default)]
    pub scaled_down_node_pools: Vec<NodePool>,
}

/// Private image registry the cluster pulls system images from
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRegistry {
    /// Registry hostname
    pub url: String,
    /// Registry user, empty for anonymous pulls
    #[serde(default)]
    pub username: String,
    /// Registry password
    #[serde(default)]
    pub password: String,
    /// Skip TLS verification
    #[serde(default)]
    pub insecure: bool,
    /// Secret holding registry credentials for RKE2/K3s
    #[serde(default)]
    pub auth_config_secret_name: String,
}

/// Opaque provider field set, passed through to templates verbatim
pub type ProviderConfig = serde_json::Map<String, serde_json::Value>;

/// Validated description of one cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSpec {
    /// How the cluster is created
    pub topology: Topology,
    /// Kubernetes version, e.g. `v1.30.4+rke2r1`
    pub kubernetes_version: String,
    /// Node pools
    pub node_pools: Vec<NodePool>,
    /// Pod security admission template
    pub psact: Option<Psact>,
    /// Snapshot parameters
    pub snapshots: Option<Snapshots>,
    /// Scale up/down pools
    pub scaling: Option<Scaling>,
    /// Private registry
    pub private_registry: Option<PrivateRegistry>,
    /// Provider-specific fields
    pub provider_config: ProviderConfig,
    /// Enable the authorized cluster endpoint
    pub local_auth_endpoint: bool,
    /// CNI plugin, distro default when unset
    pub network_plugin: Option<String>,
}

impl ClusterSpec {
    /// Create a spec with no pools and default options
    pub fn new(topology: Topology, kubernetes_version: impl Into<String>) -> Self {
        Self {
            topology,
            kubernetes_version: kubernetes_version.into(),
            node_pools: Vec::new(),
            psact: None,
            snapshots: None,
            scaling: None,
            private_registry: None,
            provider_config: ProviderConfig::new(),
            local_auth_endpoint: false,
            network_plugin: None,
        }
    }

    /// Set node pools
    pub fn with_node_pools(mut self, pools: Vec<NodePool>) -> Self {
        self.node_pools = pools;
        self
    }

    /// Set the PSACT template
    pub fn with_psact(mut self, psact: Psact) -> Self {
        self.psact = Some(psact);
        self
    }

    /// Set the private registry
    pub fn with_private_registry(mut self, registry: PrivateRegistry) -> Self {
        self.private_registry = Some(registry);
        self
    }

    /// Set the opaque provider config
    pub fn with_provider_config(mut self, config: ProviderConfig) -> Self {
        self.provider_config = config;
        self
    }

    /// Set snapshot parameters
    pub fn with_snapshots(mut self, snapshots: Snapshots) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Set scaling parameters
    pub fn with_scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = Some(scaling);
        self
    }

    /// Validate the version and every node pool
    pub fn validate(&self) -> Result<()> {
        if self.kubernetes_version.trim().is_empty() {
            return Err(Error::configuration(format!(
                "{}: kubernetes version is required",
                self.topology
            )));
        }
        if self.node_pools.is_empty() {
            return Err(Error::configuration(format!(
                "{}: at least one node pool is required",
                self.topology
            )));
        }
        for pool in &self.node_pools {
            pool.validate()?;
        }
        Ok(())
    }

    /// Total number of nodes across all pools
    pub fn node_count(&self) -> u32 {
        self.node_pools.iter().map(|p| p.quantity).sum()
    }

    /// A copy of this spec with the scaled-up pools
    pub fn scaled_up(&self) -> Result<Self> {
        let pools = self
            .scaling
            .as_ref()
            .map(|s| s.scaled_up_node_pools.clone())
            .unwrap_or_default();
        self.with_pools_checked(pools, "scaled up")
    }

    /// A copy of this spec with the scaled-down pools
    pub fn scaled_down(&self) -> Result<Self> {
        let pools = self
            .scaling
            .as_ref()
            .map(|s| s.scaled_down_node_pools.clone())
            .unwrap_or_default();
        self.with_pools_checked(pools, "scaled down")
    }

    /// A copy of this spec targeting another Kubernetes version
    pub fn with_kubernetes_version(&self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::configuration("upgrade kubernetes version is required"));
        }
        let mut next = self.clone();
        next.kubernetes_version = version;
        Ok(next)
    }

    fn with_pools_checked(&self, pools: Vec<NodePool>, what: &str) -> Result<Self> {
        if pools.is_empty() {
            return Err(Error::configuration(format!(
                "{}: no {} node pools configured",
                self.topology, what
            )));
        }
        let mut next = self.clone();
        next.node_pools = pools;
        next.validate()?;
        Ok(next)
    }
}
