//! Topology and provider enums decoded from declarative module strings

use serde::{Deserialize, Serialize};

use crate::Error;

/// Kubernetes distribution installed on cluster nodes
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Distro {
    /// Rancher Kubernetes Engine (docker based)
    Rke1,
    /// RKE2
    Rke2,
    /// K3s
    K3s,
}

impl Distro {
    /// Returns true for distributions provisioned through `rancher2_cluster_v2`
    pub fn is_v2(&self) -> bool {
        matches!(self, Self::Rke2 | Self::K3s)
    }
}

impl std::str::FromStr for Distro {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rke1" => Ok(Self::Rke1),
            "rke2" => Ok(Self::Rke2),
            "k3s" => Ok(Self::K3s),
            _ => Err(Error::unsupported_topology(format!(
                "invalid distro: {s}, expected one of: rke1, rke2, k3s"
            ))),
        }
    }
}

impl std::fmt::Display for Distro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rke1 => write!(f, "rke1"),
            Self::Rke2 => write!(f, "rke2"),
            Self::K3s => write!(f, "k3s"),
        }
    }
}

/// Node driver provider used by Rancher to create machines
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum NodeProvider {
    /// Amazon EC2
    Ec2,
    /// Microsoft Azure
    Azure,
    /// Linode
    Linode,
    /// VMware vSphere
    Vsphere,
    /// Harvester HCI
    Harvester,
}

impl NodeProvider {
    /// Name of the opaque `*_config` block inside node templates and machine configs
    pub fn machine_config_block(&self) -> &'static str {
        match self {
            Self::Ec2 => "amazonec2_config",
            Self::Azure => "azure_config",
            Self::Linode => "linode_config",
            Self::Vsphere => "vsphere_config",
            Self::Harvester => "harvester_config",
        }
    }

    /// Key of this provider's cloud credential in the run configuration
    pub fn credential_key(&self) -> &'static str {
        match self {
            Self::Ec2 => "amazonec2",
            Self::Azure => "azure",
            Self::Linode => "linode",
            Self::Vsphere => "vsphere",
            Self::Harvester => "harvester",
        }
    }
}

impl std::str::FromStr for NodeProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ec2" => Ok(Self::Ec2),
            "azure" => Ok(Self::Azure),
            "linode" => Ok(Self::Linode),
            "vsphere" => Ok(Self::Vsphere),
            "harvester" => Ok(Self::Harvester),
            _ => Err(Error::unsupported_topology(format!(
                "invalid node provider: {s}, expected one of: ec2, azure, linode, vsphere, harvester"
            ))),
        }
    }
}

impl std::fmt::Display for NodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ec2 => write!(f, "ec2"),
            Self::Azure => write!(f, "azure"),
            Self::Linode => write!(f, "linode"),
            Self::Vsphere => write!(f, "vsphere"),
            Self::Harvester => write!(f, "harvester"),
        }
    }
}

/// Hosted Kubernetes offering managed by a cloud vendor
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum HostedKind {
    /// Azure Kubernetes Service
    Aks,
    /// Amazon Elastic Kubernetes Service
    Eks,
    /// Google Kubernetes Engine
    Gke,
}

impl HostedKind {
    /// Key of the cloud credential this offering authenticates with
    pub fn credential_key(&self) -> &'static str {
        match self {
            Self::Aks => "azure",
            Self::Eks => "amazonec2",
            Self::Gke => "google",
        }
    }
}

impl std::fmt::Display for HostedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aks => write!(f, "aks"),
            Self::Eks => write!(f, "eks"),
            Self::Gke => write!(f, "gke"),
        }
    }
}

/// How a cluster comes into existence
///
/// Decoded once from the declarative `module` string. Each variant carries
/// exactly the fields its templates need, so downstream code never re-parses
/// the module name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Topology {
    /// Cluster run by a cloud vendor (`aks`, `eks`, `gke`)
    Hosted(HostedKind),
    /// Rancher creates machines through a node driver (`<provider>_<distro>`)
    NodeDriver {
        /// Kubernetes distribution
        distro: Distro,
        /// Node driver provider
        provider: NodeProvider,
    },
    /// EC2 instances registered into a custom cluster (`custom_ec2_<distro>`)
    Custom {
        /// Kubernetes distribution
        distro: Distro,
    },
    /// Custom cluster whose nodes pull from a private registry (`airgap_<distro>`)
    Airgap {
        /// Kubernetes distribution
        distro: Distro,
    },
    /// Existing cluster imported into Rancher (`import_<distro>`)
    Imported {
        /// Kubernetes distribution
        distro: Distro,
    },
}

impl Topology {
    /// The declarative module string for this topology
    pub fn module(&self) -> String {
        self.to_string()
    }

    /// Distribution, if the topology has one
    pub fn distro(&self) -> Option<Distro> {
        match self {
            Self::Hosted(_) => None,
            Self::NodeDriver { distro, .. }
            | Self::Custom { distro }
            | Self::Airgap { distro }
            | Self::Imported { distro } => Some(*distro),
        }
    }

    /// Custom RKE2/K3s clusters register nodes through a shared locals block
    pub fn registers_through_locals(&self) -> bool {
        matches!(self, Self::Custom { distro } if distro.is_v2())
    }

    /// Topologies whose nodes are EC2 instances created by this tool
    pub fn needs_aws_instances(&self) -> bool {
        matches!(
            self,
            Self::Custom { .. } | Self::Airgap { .. } | Self::Imported { .. }
        )
    }
}

impl std::str::FromStr for Topology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || Error::unsupported_topology(format!("unsupported module: {s}"));

        match s {
            "aks" => return Ok(Self::Hosted(HostedKind::Aks)),
            "eks" => return Ok(Self::Hosted(HostedKind::Eks)),
            "gke" => return Ok(Self::Hosted(HostedKind::Gke)),
            _ => {}
        }

        if let Some(distro) = s.strip_prefix("custom_ec2_") {
            return Ok(Self::Custom {
                distro: distro.parse().map_err(|_| unsupported())?,
            });
        }
        if let Some(distro) = s.strip_prefix("airgap_") {
            return Ok(Self::Airgap {
                distro: distro.parse().map_err(|_| unsupported())?,
            });
        }
        if let Some(distro) = s.strip_prefix("import_") {
            return Ok(Self::Imported {
                distro: distro.parse().map_err(|_| unsupported())?,
            });
        }

        let (provider, distro) = s.split_once('_').ok_or_else(unsupported)?;
        Ok(Self::NodeDriver {
            distro: distro.parse().map_err(|_| unsupported())?,
            provider: provider.parse().map_err(|_| unsupported())?,
        })
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hosted(kind) => write!(f, "{kind}"),
            Self::NodeDriver { distro, provider } => write!(f, "{provider}_{distro}"),
            Self::Custom { distro } => write!(f, "custom_ec2_{distro}"),
            Self::Airgap { distro } => write!(f, "airgap_{distro}"),
            Self::Imported { distro } => write!(f, "import_{distro}"),
        }
    }
}

/// Pod security admission configuration template applied to a cluster
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Psact {
    /// `rancher-privileged`
    RancherPrivileged,
    /// `rancher-restricted`
    RancherRestricted,
}

impl std::fmt::Display for Psact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RancherPrivileged => write!(f, "rancher-privileged"),
            Self::RancherRestricted => write!(f, "rancher-restricted"),
        }
    }
}
