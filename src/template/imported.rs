//! Imported clusters
//!
//! A single EC2 server runs the distro; Rancher learns about it through an
//! import-only `rancher2_cluster` whose registration manifest is applied on
//! that server once the distro is up.

use super::custom::aws_instance;
use super::{require_field, BlockBuilder, SynthContext};
use crate::cluster::Distro;
use crate::document::{Address, Body, ResourceBlock, TemplatePart, Value};
use crate::{Error, Result};

fn server_name(cluster: &str) -> String {
    format!("{cluster}-server")
}

/// Server instance plus the import-only `rancher2_cluster`
pub struct ImportedClusterBuilder;

impl BlockBuilder for ImportedClusterBuilder {
    fn name(&self) -> &'static str {
        "imported-cluster"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        require_field(&ctx.settings.aws.ami, "terraform.aws.ami")?;
        let distro = ctx.spec.topology.distro().ok_or_else(|| {
            Error::configuration(format!("{} has no distro", ctx.spec.topology))
        })?;

        let instance_type = ctx
            .spec
            .node_pools
            .first()
            .and_then(|p| p.instance_type.as_deref());
        let server = aws_instance(&server_name(&ctx.names.cluster), instance_type, true, ctx.settings);

        let cluster = ResourceBlock::resource(
            "rancher2_cluster",
            &ctx.names.cluster,
            Body::new()
                .attr("name", &ctx.names.cluster)
                .attr("description", format!("imported {distro} cluster")),
        );

        Ok(vec![server, cluster])
    }
}

/// Installs the distro on the server and applies the registration manifest
pub struct ImportRegistrationBuilder;

impl BlockBuilder for ImportRegistrationBuilder {
    fn name(&self) -> &'static str {
        "import-registration"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        let distro = ctx.spec.topology.distro().ok_or_else(|| {
            Error::configuration(format!("{} has no distro", ctx.spec.topology))
        })?;
        let server = Address::resource("aws_instance", server_name(&ctx.names.cluster));
        let import_command = ctx
            .names
            .registration_token(&ctx.spec.topology, "insecure_command");

        let mut inline = install_commands(distro, &ctx.spec.kubernetes_version, &ctx.settings.aws.user);
        inline.push(Value::Template(vec![
            TemplatePart::Literal(format!("export KUBECONFIG={} && ", kubeconfig_path(distro, &ctx.settings.aws.user))),
            TemplatePart::Ref(import_command),
        ]));

        Ok(vec![super::remote_exec_resource(
            format!("{}-import", ctx.names.cluster),
            server.attr("public_ip"),
            inline,
            ctx.settings,
        )
        .depends_on(server)])
    }
}

fn install_commands(distro: Distro, version: &str, user: &str) -> Vec<Value> {
    match distro {
        Distro::Rke2 => vec![
            Value::from(format!(
                "curl -sfL https://get.rke2.io | sudo INSTALL_RKE2_VERSION={version} sh -"
            )),
            Value::from("sudo systemctl enable --now rke2-server"),
            Value::from("sudo ln -sf /var/lib/rancher/rke2/bin/kubectl /usr/local/bin/kubectl"),
            Value::from(format!("sudo chown {user} /etc/rancher/rke2/rke2.yaml")),
        ],
        Distro::K3s => vec![
            Value::from(format!(
                "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION={version} sh -s - --write-kubeconfig-mode 644"
            )),
        ],
        Distro::Rke1 => vec![
            Value::from("curl -sfL https://releases.rancher.com/install-docker/24.0.sh | sh"),
            Value::from(format!("sudo usermod -aG docker {user}")),
        ],
    }
}

fn kubeconfig_path(distro: Distro, user: &str) -> String {
    match distro {
        Distro::Rke2 => "/etc/rancher/rke2/rke2.yaml".to_string(),
        Distro::K3s => "/etc/rancher/k3s/k3s.yaml".to_string(),
        Distro::Rke1 => format!("/home/{user}/kube_config_cluster.yml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{hcl, Document};
    use crate::template::test_support::{build, settings, spec};

    #[test]
    fn import_applies_the_registration_manifest() {
        let spec = spec("import_rke2");
        let settings = settings();
        let mut blocks = build(&ImportedClusterBuilder, &spec, &settings).unwrap();
        let registration = build(&ImportRegistrationBuilder, &spec, &settings).unwrap();

        let text = hcl::render_block(&registration[0]).unwrap();
        assert!(text.contains("INSTALL_RKE2_VERSION=v1.30.4+rke2r1"));
        assert!(text.contains(
            "\"export KUBECONFIG=/etc/rancher/rke2/rke2.yaml && ${rancher2_cluster.tfp-clstr.cluster_registration_token[0].insecure_command}\""
        ));

        blocks.extend(registration);
        let mut doc = Document::default();
        doc.append_all(blocks).unwrap();
        assert_eq!(doc.len(), 3);
    }

    #[test]
    fn k3s_import_uses_the_k3s_installer() {
        let blocks = build(&ImportRegistrationBuilder, &spec("import_k3s"), &settings()).unwrap();
        let text = hcl::render_block(&blocks[0]).unwrap();
        assert!(text.contains("get.k3s.io"));
        assert!(text.contains("/etc/rancher/k3s/k3s.yaml"));
    }
}
