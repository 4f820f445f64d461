//! Hosted clusters: AKS, EKS and GKE
//!
//! All three are `rancher2_cluster` resources with a `*_config_v2` block. The
//! cluster's opaque provider config (resource group, region, project id, ...)
//! is copied into that block verbatim, followed by one node pool (or node
//! group) per declared pool.

use super::{BlockBuilder, SynthContext};
use crate::cluster::{HostedKind, NodePool, Topology};
use crate::document::{Body, NestedBlock, ResourceBlock, Value};
use crate::{Error, Result};

/// `rancher2_cluster` with an AKS, EKS or GKE config block
pub struct HostedClusterBuilder;

impl BlockBuilder for HostedClusterBuilder {
    fn name(&self) -> &'static str {
        "hosted-cluster"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        let Topology::Hosted(kind) = ctx.spec.topology else {
            return Err(Error::configuration(format!(
                "{} is not a hosted topology",
                ctx.spec.topology
            )));
        };
        if ctx.spec.provider_config.is_empty() {
            return Err(Error::configuration(format!(
                "{kind}: provider config is required"
            )));
        }

        let credential_id = ctx.names.credential_address().attr("id");
        let version = &ctx.spec.kubernetes_version;
        let cluster = &ctx.names.cluster;

        let config = match kind {
            HostedKind::Aks => {
                let mut body = Body::new()
                    .attr("cloud_credential_id", credential_id)
                    .attr("name", cluster)
                    .attr("kubernetes_version", version)
                    .extend_json(&ctx.spec.provider_config);
                for (i, pool) in ctx.spec.node_pools.iter().enumerate() {
                    body = body.block(aks_node_pool(&ctx.names.pool, i, pool));
                }
                NestedBlock::new("aks_config_v2", body)
            }
            HostedKind::Eks => {
                let mut body = Body::new()
                    .attr("cloud_credential_id", credential_id)
                    .attr("name", cluster)
                    .attr("kubernetes_version", version)
                    .extend_json(&ctx.spec.provider_config);
                for (i, pool) in ctx.spec.node_pools.iter().enumerate() {
                    body = body.block(eks_node_group(&ctx.names.pool, i, pool));
                }
                NestedBlock::new("eks_config_v2", body)
            }
            HostedKind::Gke => {
                let mut body = Body::new()
                    .attr("google_credential_secret", credential_id)
                    .attr("name", cluster)
                    .attr("kubernetes_version", version)
                    .extend_json(&ctx.spec.provider_config);
                for (i, pool) in ctx.spec.node_pools.iter().enumerate() {
                    body = body.block(gke_node_pool(&ctx.names.pool, i, pool, version));
                }
                NestedBlock::new("gke_config_v2", body)
            }
        };

        Ok(vec![ResourceBlock::resource(
            "rancher2_cluster",
            cluster,
            Body::new().attr("name", cluster).block(config),
        )])
    }
}

fn pool_name(prefix: &str, index: usize) -> String {
    format!("{prefix}{index}")
}

fn aks_node_pool(prefix: &str, index: usize, pool: &NodePool) -> NestedBlock {
    // AKS needs exactly one system pool; the first one takes it
    let mode = if index == 0 { "System" } else { "User" };
    NestedBlock::new(
        "node_pools",
        Body::new()
            .attr("name", pool_name(&prefix.replace('-', ""), index))
            .attr("count", pool.quantity)
            .attr("mode", mode)
            .attr_opt("vm_size", pool.instance_type.clone()),
    )
}

fn eks_node_group(prefix: &str, index: usize, pool: &NodePool) -> NestedBlock {
    NestedBlock::new(
        "node_groups",
        Body::new()
            .attr("name", pool_name(prefix, index))
            .attr_opt("instance_type", pool.instance_type.clone())
            .attr("desired_size", pool.quantity)
            .attr("max_size", pool.quantity)
            .attr("min_size", pool.quantity),
    )
}

fn gke_node_pool(prefix: &str, index: usize, pool: &NodePool, version: &str) -> NestedBlock {
    let mut body = Body::new()
        .attr("name", pool_name(prefix, index))
        .attr("initial_node_count", pool.quantity)
        .attr("version", version)
        .attr("max_pods_constraint", Value::from(110u32));
    if let Some(machine_type) = &pool.instance_type {
        body = body.block(NestedBlock::new(
            "config",
            Body::new().attr("machine_type", machine_type),
        ));
    }
    NestedBlock::new("node_pools", body)
}
