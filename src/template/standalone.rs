//! Standalone Rancher server
//!
//! Blocks for the four phases of the standalone pipeline: server and registry
//! hosts, the registries themselves, the three-node RKE2 cluster and the
//! Rancher install. Every host is addressed by the literal DNS name or IP read
//! from the previous phase's outputs.

use super::custom::aws_instance;
use super::{remote_exec_resource, require_field, script_commands, SynthSettings};
use crate::document::{Address, Body, ResourceBlock, Value};
use crate::namegen::append_random_string;
use crate::{Error, Result};

/// Instance names of the RKE2 servers, bootstrap node first
pub const RKE2_SERVERS: [&str; 3] = ["rke2_server1", "rke2_server2", "rke2_server3"];

/// Instance name of the proxy bastion
pub const RKE2_BASTION: &str = "rke2_bastion";

/// `<instance>_public_dns`
pub fn public_dns_output(instance: &str) -> String {
    format!("{instance}_public_dns")
}

/// `<instance>_private_ip`
pub fn private_ip_output(instance: &str) -> String {
    format!("{instance}_private_ip")
}

/// One host per name, with its public DNS and private IP as outputs
pub fn server_instances(settings: &SynthSettings, names: &[&str]) -> Result<Vec<ResourceBlock>> {
    let mut blocks = Vec::with_capacity(names.len() * 3);
    match settings.provider.as_str() {
        "aws" => {
            require_field(&settings.aws.ami, "terraform.aws.ami")?;
            for name in names {
                let instance = aws_instance(name, None, true, settings);
                let dns = ResourceBlock::output(public_dns_output(name), instance.attr("public_dns"));
                let ip = ResourceBlock::output(private_ip_output(name), instance.attr("private_ip"));
                blocks.extend([instance, dns, ip]);
            }
        }
        "linode" => {
            require_field(&settings.linode.token, "terraform.linode.token")?;
            for name in names {
                let instance = linode_instance(name, settings);
                let dns = ResourceBlock::output(public_dns_output(name), instance.attr("ip_address"));
                let ip = ResourceBlock::output(private_ip_output(name), instance.attr("private_ip_address"));
                blocks.extend([instance, dns, ip]);
            }
        }
        other => {
            return Err(Error::configuration(format!(
                "unsupported standalone provider: {other}, expected aws or linode"
            )))
        }
    }
    Ok(blocks)
}

fn linode_instance(name: &str, settings: &SynthSettings) -> ResourceBlock {
    let linode = &settings.linode;
    ResourceBlock::resource(
        "linode_instance",
        name,
        Body::new()
            .attr("label", name)
            .attr("image", &linode.image)
            .attr("region", &linode.region)
            .attr("type", &linode.instance_type)
            .attr("root_pass", &linode.root_password)
            .attr("private_ip", true),
    )
}

// =============================================================================
// Registries
// =============================================================================

/// The registries created alongside a standalone server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    /// Registry requiring a username and password
    Authenticated,
    /// Anonymous registry
    NonAuthenticated,
    /// Anonymous registry used as the system default
    Global,
    /// Registry mirroring from ECR
    Ecr,
}

impl RegistryKind {
    /// Every registry, in creation order
    pub const ALL: [RegistryKind; 4] = [
        RegistryKind::Authenticated,
        RegistryKind::NonAuthenticated,
        RegistryKind::Global,
        RegistryKind::Ecr,
    ];

    /// Host instance name
    pub fn instance(&self) -> &'static str {
        match self {
            RegistryKind::Authenticated => "auth_registry",
            RegistryKind::NonAuthenticated => "non_auth_registry",
            RegistryKind::Global => "global_registry",
            RegistryKind::Ecr => "ecr_registry",
        }
    }

    /// Setup script run on the host
    pub fn script(&self) -> &'static str {
        match self {
            RegistryKind::Authenticated => "auth-registry.sh",
            RegistryKind::NonAuthenticated | RegistryKind::Global => "non-auth-registry.sh",
            RegistryKind::Ecr => "ecr-registry.sh",
        }
    }

    /// Output holding the host's public DNS name
    pub fn output_key(&self) -> String {
        public_dns_output(self.instance())
    }

    fn args(&self, settings: &SynthSettings, dns: &str) -> Result<Vec<String>> {
        let registry = &settings.standalone_registry;
        let standalone = &settings.standalone;
        let mut args = match self {
            RegistryKind::Authenticated => {
                require_field(&registry.registry_username, "standaloneRegistry.registryUsername")?;
                require_field(&registry.registry_password, "standaloneRegistry.registryPassword")?;
                vec![
                    registry.registry_username.clone(),
                    registry.registry_password.clone(),
                    registry.registry_name.clone(),
                ]
            }
            RegistryKind::NonAuthenticated | RegistryKind::Global => vec![registry.registry_name.clone()],
            RegistryKind::Ecr => {
                require_field(&registry.ecr_uri, "standaloneRegistry.ecrUri")?;
                vec![registry.ecr_uri.clone(), settings.aws.region.clone()]
            }
        };
        args.extend([
            dns.to_string(),
            standalone.rancher_tag_version.clone(),
            registry.assets_path.clone(),
            standalone.os_user.clone(),
        ]);
        Ok(args)
    }
}

/// `null_resource.<instance>` that sets up one registry on `dns`
pub fn registry_blocks(kind: RegistryKind, settings: &SynthSettings, dns: &str) -> Result<Vec<ResourceBlock>> {
    require_field(dns, &kind.output_key())?;
    let args = kind.args(settings, dns)?;
    let payload = settings.scripts.load(kind.script())?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    Ok(vec![remote_exec_resource(
        kind.instance(),
        dns,
        script_commands(kind.script(), &payload, &args),
        settings,
    )])
}

// =============================================================================
// RKE2 and Rancher
// =============================================================================

/// Literal addresses of the RKE2 servers from the base infrastructure outputs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rke2Hosts {
    /// Bootstrap server public DNS
    pub server1_dns: String,
    /// Bootstrap server private IP
    pub server1_private_ip: String,
    /// Second server public DNS
    pub server2_dns: String,
    /// Third server public DNS
    pub server3_dns: String,
}

/// Bootstrap server plus the two servers that join it
///
/// `registry` is the global registry host, when registries are enabled.
pub fn rke2_server_blocks(
    settings: &SynthSettings,
    hosts: &Rke2Hosts,
    registry: Option<&str>,
) -> Result<Vec<ResourceBlock>> {
    let standalone = &settings.standalone;
    require_field(&standalone.rke2_version, "standalone.rke2Version")?;
    let init = settings.scripts.load("init-server.sh")?;
    let join = settings.scripts.load("add-servers.sh")?;
    let token = append_random_string("token");
    let registry = registry.filter(|r| !r.is_empty());

    let mut init_args = vec![
        standalone.os_user.as_str(),
        standalone.os_group.as_str(),
        standalone.rke2_version.as_str(),
        hosts.server1_private_ip.as_str(),
        token.as_str(),
    ];
    init_args.extend(registry);

    Ok(server_chain(
        settings,
        hosts,
        script_commands("init-server.sh", &init, &init_args),
        |dns| {
            let mut args = vec![
                standalone.os_user.as_str(),
                standalone.os_group.as_str(),
                standalone.rke2_version.as_str(),
                hosts.server1_private_ip.as_str(),
                dns,
                token.as_str(),
            ];
            args.extend(registry);
            script_commands("add-servers.sh", &join, &args)
        },
    ))
}

/// Bootstrap and joining servers whose outbound traffic goes through the
/// proxy on `bastion_dns`
///
/// The proxy scripts configure RKE2 and containerd with the bastion as
/// HTTP(S) proxy. Every server gets the same arguments.
pub fn proxied_rke2_server_blocks(
    settings: &SynthSettings,
    hosts: &Rke2Hosts,
    bastion_dns: &str,
) -> Result<Vec<ResourceBlock>> {
    let standalone = &settings.standalone;
    require_field(&standalone.rke2_version, "standalone.rke2Version")?;
    require_field(bastion_dns, &public_dns_output(RKE2_BASTION))?;
    let init = settings.scripts.load("proxy-init-server.sh")?;
    let join = settings.scripts.load("proxy-add-servers.sh")?;
    let token = append_random_string("token");

    let args = [
        standalone.os_user.as_str(),
        standalone.os_group.as_str(),
        standalone.rke2_version.as_str(),
        hosts.server1_private_ip.as_str(),
        token.as_str(),
        bastion_dns,
    ];

    Ok(server_chain(
        settings,
        hosts,
        script_commands("proxy-init-server.sh", &init, &args),
        |_| script_commands("proxy-add-servers.sh", &join, &args),
    ))
}

// server1 runs `init`; servers 2 and 3 run `join(own_dns)` after it
fn server_chain(
    settings: &SynthSettings,
    hosts: &Rke2Hosts,
    init: Vec<Value>,
    join: impl Fn(&str) -> Vec<Value>,
) -> Vec<ResourceBlock> {
    let first = Address::resource("null_resource", RKE2_SERVERS[0]);
    let mut blocks = vec![remote_exec_resource(RKE2_SERVERS[0], hosts.server1_dns.as_str(), init, settings)];
    for (name, dns) in RKE2_SERVERS[1..].iter().zip([&hosts.server2_dns, &hosts.server3_dns]) {
        blocks.push(
            remote_exec_resource(*name, dns.as_str(), join(dns), settings).depends_on(first.clone()),
        );
    }
    blocks
}

/// `null_resource.install_rancher` running the chart install on the bootstrap server
///
/// Install failures are tolerated here; readiness is checked through the
/// management API afterwards.
pub fn rancher_install_blocks(
    settings: &SynthSettings,
    server1_dns: &str,
    registry: Option<&str>,
) -> Result<Vec<ResourceBlock>> {
    let s = &settings.standalone;
    require_field(&s.rancher_hostname, "standalone.rancherHostname")?;
    require_field(&s.bootstrap_password, "standalone.bootstrapPassword")?;
    let payload = settings.scripts.load("setup.sh")?;

    let mut args = vec![
        s.rancher_chart_repository.as_str(),
        s.repo.as_str(),
        s.cert_manager_version.as_str(),
        s.cert_type.as_str(),
        s.rancher_hostname.as_str(),
        s.rancher_tag_version.as_str(),
        s.chart_version.as_str(),
        s.bootstrap_password.as_str(),
        s.rancher_image.as_str(),
    ];
    if !s.rancher_agent_image.is_empty() {
        args.push(s.rancher_agent_image.as_str());
    }
    if let Some(registry) = registry.filter(|r| !r.is_empty()) {
        args.push(registry);
    }

    let mut inline = script_commands("setup.sh", &payload, &args);
    if let Some(Value::String(run)) = inline.last_mut() {
        run.push_str(" || true");
    }

    let block = RKE2_SERVERS
        .iter()
        .fold(
            remote_exec_resource("install_rancher", server1_dns, inline, settings),
            |block, server| block.depends_on(Address::resource("null_resource", *server)),
        );
    Ok(vec![block])
}
