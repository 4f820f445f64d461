//! RKE1 node-driver clusters

use super::{BlockBuilder, SynthContext};
use crate::cluster::{ClusterSpec, Topology};
use crate::document::{Body, NestedBlock, ResourceBlock};
use crate::{Error, Result};

const DOCKER_INSTALL_URL: &str = "https://releases.rancher.com/install-docker/24.0.sh";

/// `rancher2_node_template` carrying the opaque provider config
pub struct NodeTemplateBuilder;

impl BlockBuilder for NodeTemplateBuilder {
    fn name(&self) -> &'static str {
        "node-template"
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

        let body = Body::new()
            .attr("name", &ctx.names.machine_config)
            .attr("cloud_credential_id", ctx.names.credential_address().attr("id"))
            .attr("engine_install_url", DOCKER_INSTALL_URL)
            .block(NestedBlock::new(
                provider.machine_config_block(),
                Body::new().extend_json(&ctx.spec.provider_config),
            ));

        Ok(vec![ResourceBlock::resource(
            "rancher2_node_template",
            &ctx.names.machine_config,
            body,
        )])
    }
}

/// `rancher2_cluster` plus one `rancher2_node_pool` per declared pool
pub struct Rke1ClusterBuilder;

impl BlockBuilder for Rke1ClusterBuilder {
    fn name(&self) -> &'static str {
        "rke1-cluster"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        let cluster = rke1_cluster(ctx.spec, &ctx.names.cluster);
        let cluster_id = cluster.attr("id");
        let template_id = ctx.names.node_template_address().attr("id");

        let mut blocks = vec![cluster];
        for (i, pool) in ctx.spec.node_pools.iter().enumerate() {
            let name = format!("{}-{}", ctx.names.pool, i);
            blocks.push(ResourceBlock::resource(
                "rancher2_node_pool",
                &name,
                Body::new()
                    .attr("cluster_id", cluster_id.clone())
                    .attr("name", &name)
                    .attr("hostname_prefix", format!("{}-pool{}-", ctx.names.cluster, i))
                    .attr("node_template_id", template_id.clone())
                    .attr("quantity", pool.quantity)
                    .attr("control_plane", pool.controlplane)
                    .attr("etcd", pool.etcd)
                    .attr("worker", pool.worker),
            ));
        }
        Ok(blocks)
    }
}

/// `rancher2_cluster` with an `rke_config`, shared with custom RKE1 clusters
pub(crate) fn rke1_cluster(spec: &ClusterSpec, name: &str) -> ResourceBlock {
    let mut rke_config = Body::new()
        .attr("kubernetes_version", &spec.kubernetes_version)
        .block(NestedBlock::new(
            "network",
            Body::new().attr(
                "plugin",
                spec.network_plugin.clone().unwrap_or_else(|| "canal".to_string()),
            ),
        ));

    if spec.snapshots.as_ref().is_some_and(|s| s.create_snapshot) {
        rke_config = rke_config.block(NestedBlock::new(
            "services",
            Body::new().block(NestedBlock::new(
                "etcd",
                Body::new().block(NestedBlock::new(
                    "backup_config",
                    Body::new()
                        .attr("enabled", true)
                        .attr("interval_hours", 12u32)
                        .attr("retention", 6u32),
                )),
            )),
        ));
    }

    if let Some(registry) = &spec.private_registry {
        rke_config = rke_config.block(NestedBlock::new(
            "private_registries",
            Body::new()
                .attr("url", &registry.url)
                .attr("user", &registry.username)
                .attr("password", &registry.password)
                .attr("is_default", true),
        ));
    }

    let body = Body::new()
        .attr("name", name)
        .attr_opt(
            "default_pod_security_admission_configuration_template_name",
            spec.psact.map(|p| p.to_string()),
        )
        .block(NestedBlock::new("rke_config", rke_config));

    ResourceBlock::resource("rancher2_cluster", name, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Psact, Snapshots};
    use crate::document::{Document, Value};
    use crate::template::credential::CloudCredentialBuilder;
    use crate::template::test_support::{build, settings, spec};

    #[test]
    fn node_template_uses_the_provider_block() {
        let blocks = build(&NodeTemplateBuilder, &spec("linode_rke1"), &settings()).unwrap();
        assert!(blocks[0].body.blocks("linode_config").next().is_some());
    }

    #[test]
    fn one_node_pool_per_declared_pool() {
        let spec = spec("ec2_rke1").with_psact(Psact::RancherRestricted);
        let blocks = build(&Rke1ClusterBuilder, &spec, &settings()).unwrap();

        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[0].body.get("default_pod_security_admission_configuration_template_name"),
            Some(&Value::from("rancher-restricted"))
        );
        assert_eq!(blocks[2].body.get("quantity"), Some(&Value::from(2u32)));
        assert_eq!(blocks[2].body.get("worker"), Some(&Value::Bool(true)));
        assert_eq!(blocks[2].body.get("etcd"), Some(&Value::Bool(false)));
    }

    #[test]
    fn snapshot_request_enables_etcd_backups() {
        let spec = spec("ec2_rke1").with_snapshots(Snapshots {
            create_snapshot: true,
            ..Default::default()
        });
        let cluster = rke1_cluster(&spec, "c");
        let text = crate::document::hcl::render_block(&cluster).unwrap();
        assert!(text.contains("backup_config {"));
    }

    #[test]
    fn full_chain_assembles_without_dangling_references() {
        let spec = spec("ec2_rke1");
        let settings = settings();
        let mut blocks = build(&CloudCredentialBuilder, &spec, &settings).unwrap();
        blocks.extend(build(&NodeTemplateBuilder, &spec, &settings).unwrap());
        blocks.extend(build(&Rke1ClusterBuilder, &spec, &settings).unwrap());

        let mut doc = Document::default();
        doc.append_all(blocks).unwrap();
        assert_eq!(doc.len(), 5);
    }
}
