//! Custom and airgapped clusters built from EC2 instances
//!
//! Nodes are `aws_instance`s created by this tool. The cluster resource is
//! created without machine pools and every node registers itself by running
//! the cluster's node command over SSH:
//!
//! - custom RKE2/K3s nodes read the command from the shared locals block
//!   (`local.<cluster>_node_command`), which is appended after all clusters
//! - custom RKE1 nodes and airgapped nodes reference the registration token
//!   directly; airgapped nodes are reached through the bastion host

use std::collections::BTreeMap;

use super::rke1::rke1_cluster;
use super::rke2::cluster_v2;
use super::{require_field, BlockBuilder, BuildStage, ClusterNames, SynthContext, SynthSettings};
use crate::cluster::{ClusterSpec, NodePool};
use crate::document::{Address, Body, NestedBlock, Reference, ResourceBlock, TemplatePart, Value};
use crate::{Error, Result};

/// One EC2 node and the pool it belongs to
pub struct NodeSlot<'a> {
    /// `aws_instance` name
    pub name: String,
    /// Pool the node belongs to
    pub pool: &'a NodePool,
}

impl NodeSlot<'_> {
    /// Address of the node's instance
    pub fn address(&self) -> Address {
        Address::resource("aws_instance", &self.name)
    }
}

/// Enumerate node names for every pool, in pool order
pub fn node_slots<'a>(spec: &'a ClusterSpec, names: &ClusterNames) -> Vec<NodeSlot<'a>> {
    spec.node_pools
        .iter()
        .enumerate()
        .flat_map(|(i, pool)| {
            (0..pool.quantity).map(move |j| NodeSlot {
                name: format!("{}-pool{}-node{}", names.cluster, i, j),
                pool,
            })
        })
        .collect()
}

/// An `aws_instance` from the run's AWS settings
pub fn aws_instance(
    name: &str,
    instance_type: Option<&str>,
    public_ip: bool,
    settings: &SynthSettings,
) -> ResourceBlock {
    let aws = &settings.aws;
    let mut tags = BTreeMap::new();
    let tag = if aws.hostname_prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}-{}", aws.hostname_prefix, name)
    };
    tags.insert("Name".to_string(), Value::from(tag));

    ResourceBlock::resource(
        "aws_instance",
        name,
        Body::new()
            .attr("ami", &aws.ami)
            .attr("instance_type", instance_type.unwrap_or(&aws.instance_type))
            .attr("subnet_id", &aws.subnet_id)
            .attr("vpc_security_group_ids", aws.security_groups.clone())
            .attr("key_name", &aws.key_name)
            .attr("associate_public_ip_address", public_ip)
            .block(NestedBlock::new(
                "root_block_device",
                Body::new().attr("volume_size", aws.volume_size),
            ))
            .attr("tags", Value::Map(tags)),
    )
}

// =============================================================================
// Nodes and clusters
// =============================================================================

/// One `aws_instance` per node of every pool
pub struct Ec2NodesBuilder {
    public_ip: bool,
}

impl Ec2NodesBuilder {
    /// Nodes reachable directly
    pub fn public() -> Self {
        Self { public_ip: true }
    }

    /// Nodes reachable only through the bastion
    pub fn private() -> Self {
        Self { public_ip: false }
    }
}

impl BlockBuilder for Ec2NodesBuilder {
    fn name(&self) -> &'static str {
        "ec2-nodes"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        require_field(&ctx.settings.aws.ami, "terraform.aws.ami")?;
        Ok(node_slots(ctx.spec, ctx.names)
            .iter()
            .map(|slot| {
                aws_instance(
                    &slot.name,
                    slot.pool.instance_type.as_deref(),
                    self.public_ip,
                    ctx.settings,
                )
            })
            .collect())
    }
}

/// Cluster resource without pools: `rancher2_cluster` for RKE1, v2 otherwise
pub struct CustomClusterBuilder {
    airgap: bool,
}

impl CustomClusterBuilder {
    /// Custom cluster
    pub fn custom() -> Self {
        Self { airgap: false }
    }

    /// Airgapped cluster; requires a private registry
    pub fn airgap() -> Self {
        Self { airgap: true }
    }
}

impl BlockBuilder for CustomClusterBuilder {
    fn name(&self) -> &'static str {
        "custom-cluster"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        if self.airgap {
            let registry = ctx.spec.private_registry.as_ref().ok_or_else(|| {
                Error::configuration(format!(
                    "{}: airgapped clusters require a private registry",
                    ctx.spec.topology
                ))
            })?;
            require_field(&registry.url, "private registry url")?;
        }

        let distro = ctx.spec.topology.distro().ok_or_else(|| {
            Error::configuration(format!("{} has no distro", ctx.spec.topology))
        })?;
        let block = if distro.is_v2() {
            cluster_v2(ctx.spec, ctx.names, false)
        } else {
            rke1_cluster(ctx.spec, &ctx.names.cluster)
        };
        Ok(vec![block])
    }
}

// =============================================================================
// Registration
// =============================================================================

fn register_command(command: Reference, pool: &NodePool) -> Value {
    Value::Template(vec![
        TemplatePart::Ref(command),
        TemplatePart::Literal(format!(" {}", pool.role_flags())),
    ])
}

fn registration_name(slot: &NodeSlot<'_>) -> String {
    format!("{}-register", slot.name)
}

/// Registration that references the cluster's token directly
pub struct DirectRegistrationBuilder {
    through_bastion: bool,
}

impl DirectRegistrationBuilder {
    /// SSH straight to each node's public IP
    pub fn public() -> Self {
        Self {
            through_bastion: false,
        }
    }

    /// SSH to each node's private IP through the bastion
    pub fn through_bastion() -> Self {
        Self {
            through_bastion: true,
        }
    }
}

impl BlockBuilder for DirectRegistrationBuilder {
    fn name(&self) -> &'static str {
        "direct-registration"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        if self.through_bastion {
            require_field(&ctx.settings.aws.bastion_host, "terraform.aws.bastionHost")?;
        }

        let topology = &ctx.spec.topology;
        let field = if topology.distro().is_some_and(|d| d.is_v2()) {
            "insecure_node_command"
        } else {
            "node_command"
        };
        let command = ctx.names.registration_token(topology, field);

        Ok(node_slots(ctx.spec, ctx.names)
            .iter()
            .map(|slot| {
                let host_attr = if self.through_bastion { "private_ip" } else { "public_ip" };
                let mut connection = super::ssh_connection(slot.address().attr(host_attr), ctx.settings);
                if self.through_bastion {
                    connection.body = connection
                        .body
                        .attr("bastion_host", &ctx.settings.aws.bastion_host)
                        .attr("bastion_user", &ctx.settings.aws.user)
                        .attr("bastion_private_key", ctx.settings.private_key());
                }
                ResourceBlock::resource(
                    "null_resource",
                    registration_name(slot),
                    Body::new().block(super::remote_exec(
                        connection,
                        vec![register_command(command.clone(), slot.pool)],
                    )),
                )
                .depends_on(slot.address())
            })
            .collect())
    }
}

/// Registration through `local.<cluster>_node_command`, appended after the locals block
pub struct LocalsRegistrationBuilder;

impl BlockBuilder for LocalsRegistrationBuilder {
    fn name(&self) -> &'static str {
        "locals-registration"
    }

    fn stage(&self) -> BuildStage {
        BuildStage::Registration
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        let command = Reference::new(Address::local(ctx.names.node_command_key()));

        Ok(node_slots(ctx.spec, ctx.names)
            .iter()
            .map(|slot| {
                super::remote_exec_resource(
                    registration_name(slot),
                    slot.address().attr("public_ip"),
                    vec![register_command(command.clone(), slot.pool)],
                    ctx.settings,
                )
                .depends_on(slot.address())
            })
            .collect())
    }
}

/// Locals block mapping each custom cluster to its node command
pub fn node_command_locals(clusters: &[&ClusterNames]) -> ResourceBlock {
    let mut body = Body::new();
    for names in clusters {
        let cluster = Address::resource("rancher2_cluster_v2", &names.cluster);
        body = body.attr(
            names.node_command_key(),
            Reference::new(cluster)
                .attr("cluster_registration_token")
                .index(0)
                .attr("insecure_node_command"),
        );
    }
    ResourceBlock::locals("custom_node_commands", body)
}
