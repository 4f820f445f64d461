//! Cloud credentials for node drivers and hosted clusters

use super::{BlockBuilder, SynthContext};
use crate::cluster::Topology;
use crate::document::{Body, NestedBlock, ResourceBlock};
use crate::{Error, Result};

/// `rancher2_cloud_credential` for the cluster's provider
pub struct CloudCredentialBuilder;

/// Credential kind a topology authenticates with, if any
pub fn credential_key(topology: &Topology) -> Option<&'static str> {
    match topology {
        Topology::Hosted(kind) => Some(kind.credential_key()),
        Topology::NodeDriver { provider, .. } => Some(provider.credential_key()),
        _ => None,
    }
}

impl BlockBuilder for CloudCredentialBuilder {
    fn name(&self) -> &'static str {
        "cloud-credential"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        let key = credential_key(&ctx.spec.topology).ok_or_else(|| {
            Error::configuration(format!(
                "{} does not use a cloud credential",
                ctx.spec.topology
            ))
        })?;

        let fields = ctx
            .settings
            .cloud_credentials
            .get(key)
            .filter(|fields| !fields.is_empty())
            .ok_or_else(|| {
                Error::configuration(format!("cloud credential '{key}' is not configured"))
            })?;

        let body = Body::new()
            .attr("name", &ctx.names.credential)
            .block(NestedBlock::new(
                format!("{key}_credential_config"),
                Body::new().extend_json(fields),
            ));

        Ok(vec![ResourceBlock::resource(
            "rancher2_cloud_credential",
            &ctx.names.credential,
            body,
        )])
    }
}
