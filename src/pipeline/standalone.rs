//! Standalone Rancher server pipeline
//!
//! 1. base infra: RKE2 server hosts and, when enabled, one host per registry
//!    or the proxy bastion
//! 2. registries, built concurrently (auth, non-auth, global, ECR)
//! 3. RKE2: bootstrap server, then two servers joining it, optionally
//!    proxied through the bastion
//! 4. Rancher install on the bootstrap server
//!
//! Host addresses read from one phase's outputs are passed to the next as
//! literals.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{Orchestrator, Phase, PhaseResult, PhaseUnit, PipelineError};
use crate::document::Document;
use crate::template::providers::ProviderNeeds;
use crate::template::standalone::{
    private_ip_output, proxied_rke2_server_blocks, public_dns_output, rancher_install_blocks,
    registry_blocks, rke2_server_blocks, server_instances, RegistryKind, Rke2Hosts, RKE2_BASTION,
    RKE2_SERVERS,
};
use crate::template::SynthSettings;
use crate::{Error, Result};

/// What a standalone run produced
#[derive(Clone, Debug)]
pub struct StandaloneReport {
    /// Public DNS of the bootstrap server
    pub rancher_server: String,
    /// Registry instance → public DNS
    pub registries: BTreeMap<String, String>,
    /// Public DNS of the proxy bastion, for proxied runs
    pub bastion: Option<String>,
    /// Every completed phase
    pub phases: Vec<PhaseResult>,
}

/// Run all four phases, starting from an empty document
pub async fn run_standalone(
    orchestrator: &Orchestrator,
    settings: Arc<SynthSettings>,
) -> std::result::Result<StandaloneReport, PipelineError> {
    let mut completed: Vec<PhaseResult> = Vec::new();

    let registries_enabled = settings.standalone_registry.enabled;
    let proxied = settings.standalone.proxy;
    if proxied && registries_enabled {
        return Err(PipelineError::new(
            Phase::BaseInfra,
            Error::configuration("standalone.proxy cannot be combined with standaloneRegistry.enabled"),
        ));
    }

    let base = base_infra(orchestrator, &settings, registries_enabled, proxied)
        .await
        .map_err(failed(Phase::BaseInfra, &completed))?;

    let hosts = rke2_hosts(&base).map_err(failed(Phase::BaseInfra, &completed))?;
    let bastion = if proxied {
        let dns = base
            .require(&public_dns_output(RKE2_BASTION))
            .map_err(failed(Phase::BaseInfra, &completed))?;
        Some(dns.to_string())
    } else {
        None
    };
    let mut registries = BTreeMap::new();
    if registries_enabled {
        for kind in RegistryKind::ALL {
            let dns = base
                .require(&kind.output_key())
                .map_err(failed(Phase::BaseInfra, &completed))?;
            registries.insert(kind.instance().to_string(), dns.to_string());
        }
    }
    completed.push(base);

    if registries_enabled {
        let units = RegistryKind::ALL
            .into_iter()
            .map(|kind| {
                let settings = settings.clone();
                let dns = registries.get(kind.instance()).cloned().unwrap_or_default();
                PhaseUnit::new(kind.instance(), move || registry_blocks(kind, &settings, &dns))
            })
            .collect();
        let result = orchestrator
            .run_concurrent_phase(Phase::Auxiliary, units, &[])
            .await
            .map_err(failed(Phase::Auxiliary, &completed))?;
        completed.push(result);
    }

    let global = registries
        .get(RegistryKind::Global.instance())
        .map(String::as_str);

    let result = async {
        let blocks = match &bastion {
            Some(bastion) => proxied_rke2_server_blocks(&settings, &hosts, bastion)?,
            None => rke2_server_blocks(&settings, &hosts, global)?,
        };
        orchestrator.run_phase(Phase::ClusterBootstrap, blocks, &[]).await
    }
    .await
    .map_err(failed(Phase::ClusterBootstrap, &completed))?;
    completed.push(result);

    let result = async {
        let blocks = rancher_install_blocks(&settings, &hosts.server1_dns, global)?;
        orchestrator.run_phase(Phase::ControlPlane, blocks, &[]).await
    }
    .await
    .map_err(failed(Phase::ControlPlane, &completed))?;
    completed.push(result);

    info!(rancher_server = %hosts.server1_dns, registries = registries.len(), proxied, "standalone server installed");
    Ok(StandaloneReport {
        rancher_server: hosts.server1_dns,
        registries,
        bastion,
        phases: completed,
    })
}

async fn base_infra(
    orchestrator: &Orchestrator,
    settings: &SynthSettings,
    registries_enabled: bool,
    proxied: bool,
) -> Result<PhaseResult> {
    let needs = ProviderNeeds::standalone(&settings.provider)?;

    let mut instances: Vec<&str> = RKE2_SERVERS.to_vec();
    if registries_enabled {
        instances.extend(RegistryKind::ALL.iter().map(|k| k.instance()));
    }
    if proxied {
        instances.push(RKE2_BASTION);
    }

    let mut blocks = needs.provider_blocks(settings);
    blocks.extend(server_instances(settings, &instances)?);

    let mut expected: Vec<String> = instances.iter().map(|i| public_dns_output(i)).collect();
    expected.push(private_ip_output(RKE2_SERVERS[0]));

    orchestrator
        .document()
        .replace_and_flush(Document::new(needs.settings(settings)))
        .await?;
    orchestrator.run_phase(Phase::BaseInfra, blocks, &expected).await
}

fn failed(phase: Phase, completed: &[PhaseResult]) -> impl FnOnce(Error) -> PipelineError {
    let completed = completed.to_vec();
    move |e| PipelineError::new(phase, e).with_completed(completed)
}

fn rke2_hosts(base: &PhaseResult) -> Result<Rke2Hosts> {
    Ok(Rke2Hosts {
        server1_dns: base.require(&public_dns_output(RKE2_SERVERS[0]))?.to_string(),
        server1_private_ip: base.require(&private_ip_output(RKE2_SERVERS[0]))?.to_string(),
        server2_dns: base.require(&public_dns_output(RKE2_SERVERS[1]))?.to_string(),
        server3_dns: base.require(&public_dns_output(RKE2_SERVERS[2]))?.to_string(),
    })
}
