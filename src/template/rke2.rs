//! RKE2 and K3s clusters (`rancher2_cluster_v2`)
//!
//! Node-driver clusters get a `rancher2_machine_config_v2` holding the opaque
//! provider block and one `machine_pools` entry per declared pool. Custom and
//! airgapped clusters reuse [`cluster_v2`] without pools; their nodes register
//! themselves afterwards.

use super::{BlockBuilder, ClusterNames, SynthContext};
use crate::cluster::{ClusterSpec, Distro, PrivateRegistry, Topology};
use crate::document::{Body, NestedBlock, ResourceBlock};
use crate::{Error, Result};

/// `rancher2_machine_config_v2` with the provider's config block
pub struct MachineConfigBuilder;

impl BlockBuilder for MachineConfigBuilder {
    fn name(&self) -> &'static str {
        "machine-config"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        let Topology::NodeDriver { provider, .. } = ctx.spec.topology else {
            return Err(Error::configuration(format!(
                "{} is not a node driver topology",
                ctx.spec.topology
            )));
        };
        if ctx.spec.provider_config.is_empty() {
            return Err(Error::configuration(format!(
                "{}: provider config is required",
                ctx.spec.topology
            )));
        }

        Ok(vec![ResourceBlock::resource(
            "rancher2_machine_config_v2",
            &ctx.names.machine_config,
            Body::new()
                .attr("generate_name", &ctx.names.machine_config)
                .block(NestedBlock::new(
                    provider.machine_config_block(),
                    Body::new().extend_json(&ctx.spec.provider_config),
                )),
        )])
    }
}

/// `rancher2_cluster_v2` with machine pools
pub struct ClusterV2Builder;

impl BlockBuilder for ClusterV2Builder {
    fn name(&self) -> &'static str {
        "cluster-v2"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        Ok(vec![cluster_v2(ctx.spec, ctx.names, true)])
    }
}

/// Build a `rancher2_cluster_v2`; `with_pools` adds node-driver machine pools
pub(crate) fn cluster_v2(spec: &ClusterSpec, names: &ClusterNames, with_pools: bool) -> ResourceBlock {
    let mut rke_config = Body::new();

    if let Some(global) = machine_global_config(spec) {
        rke_config = rke_config.attr("machine_global_config", global);
    }

    if with_pools {
        let mc = names.machine_config_address();
        for (i, pool) in spec.node_pools.iter().enumerate() {
            rke_config = rke_config.block(NestedBlock::new(
                "machine_pools",
                Body::new()
                    .attr("name", format!("{}{}", names.pool, i))
                    .attr("cloud_credential_secret_name", names.credential_address().attr("id"))
                    .attr("control_plane_role", pool.controlplane)
                    .attr("etcd_role", pool.etcd)
                    .attr("worker_role", pool.worker)
                    .attr("quantity", pool.quantity)
                    .block(NestedBlock::new(
                        "machine_config",
                        Body::new()
                            .attr("kind", mc.attr("kind"))
                            .attr("name", mc.attr("name")),
                    )),
            ));
        }
    }

    if let Some(registry) = &spec.private_registry {
        rke_config = rke_config.block(registries(registry));
    }

    if let Some(snapshots) = &spec.snapshots {
        if snapshots.create_snapshot {
            rke_config = rke_config.block(NestedBlock::new(
                "etcd_snapshot_create",
                Body::new().attr("generation", 1u32),
            ));
        }
        if snapshots.restore_snapshot {
            rke_config = rke_config.block(NestedBlock::new(
                "etcd_snapshot_restore",
                Body::new()
                    .attr("name", &snapshots.snapshot_name)
                    .attr("generation", 1u32)
                    .attr("restore_rke_config", restore_mode(&snapshots.snapshot_restore)),
            ));
        }
        if !snapshots.control_plane_concurrency.is_empty() || !snapshots.worker_concurrency.is_empty() {
            rke_config = rke_config.block(NestedBlock::new(
                "upgrade_strategy",
                Body::new()
                    .attr("control_plane_concurrency", non_empty_or(&snapshots.control_plane_concurrency, "1"))
                    .attr("worker_concurrency", non_empty_or(&snapshots.worker_concurrency, "1")),
            ));
        }
    }

    let body = Body::new()
        .attr("name", &names.cluster)
        .attr("kubernetes_version", &spec.kubernetes_version)
        .attr("enable_network_policy", false)
        .attr_opt(
            "default_pod_security_admission_configuration_template_name",
            spec.psact.map(|p| p.to_string()),
        )
        .block(NestedBlock::new(
            "local_auth_endpoint",
            Body::new().attr("enabled", spec.local_auth_endpoint),
        ))
        .block(NestedBlock::new("rke_config", rke_config));

    ResourceBlock::resource("rancher2_cluster_v2", &names.cluster, body)
}

/// YAML passed to every machine: CNI and the system default registry
fn machine_global_config(spec: &ClusterSpec) -> Option<String> {
    let mut lines = Vec::new();
    match (&spec.network_plugin, spec.topology.distro()) {
        (Some(cni), _) => lines.push(format!("cni: {cni}")),
        (None, Some(Distro::Rke2)) => lines.push("cni: calico".to_string()),
        _ => {}
    }
    if let Some(registry) = &spec.private_registry {
        lines.push(format!("system-default-registry: {}", registry.url));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn registries(registry: &PrivateRegistry) -> NestedBlock {
    let mut configs = Body::new()
        .attr("hostname", &registry.url)
        .attr("insecure", registry.insecure);
    if !registry.auth_config_secret_name.is_empty() {
        configs = configs.attr("auth_config_secret_name", &registry.auth_config_secret_name);
    }
    NestedBlock::new(
        "registries",
        Body::new()
            .block(NestedBlock::new("configs", configs))
            .block(NestedBlock::new(
                "mirrors",
                Body::new()
                    .attr("hostname", &registry.url)
                    .attr("endpoints", vec![format!("https://{}", registry.url)]),
            )),
    )
}

fn restore_mode(requested: &str) -> &str {
    match requested {
        "kubernetesVersion" | "all" => requested,
        _ => "none",
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}
