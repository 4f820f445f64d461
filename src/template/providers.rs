//! Provider blocks and `required_providers`

use super::SynthSettings;
use crate::document::{Body, ResourceBlock, Settings};
use crate::{Error, Result};

const AWS_VERSION: &str = "~> 5.0";
const NULL_VERSION: &str = "~> 3.2";
const LINODE_VERSION: &str = "~> 2.0";

/// Which providers a document needs beyond `rancher2`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderNeeds {
    /// Management API resources
    pub rancher2: bool,
    /// EC2 instances
    pub aws: bool,
    /// Linode instances
    pub linode: bool,
    /// `null_resource` provisioners
    pub null: bool,
}

impl ProviderNeeds {
    /// `required_providers` for these needs
    pub fn settings(&self, settings: &SynthSettings) -> Settings {
        let mut out = Settings::default();
        if self.rancher2 {
            out = out.require("rancher2", "rancher/rancher2", &settings.provider_version);
        }
        if self.aws {
            out = out.require("aws", "hashicorp/aws", AWS_VERSION);
        }
        if self.linode {
            out = out.require("linode", "linode/linode", LINODE_VERSION);
        }
        if self.null {
            out = out.require("null", "hashicorp/null", NULL_VERSION);
        }
        out
    }

    /// Provider configuration blocks for these needs
    pub fn provider_blocks(&self, settings: &SynthSettings) -> Vec<ResourceBlock> {
        let mut blocks = Vec::new();
        if self.rancher2 {
            blocks.push(rancher2_provider(settings));
        }
        if self.aws {
            blocks.push(aws_provider(settings));
        }
        if self.linode {
            blocks.push(ResourceBlock::provider(
                "linode",
                Body::new().attr("token", &settings.linode.token),
            ));
        }
        blocks
    }

    /// Needs of the standalone server pipeline for the configured provider
    pub fn standalone(provider: &str) -> Result<Self> {
        match provider {
            "aws" => Ok(Self {
                aws: true,
                null: true,
                ..Default::default()
            }),
            "linode" => Ok(Self {
                linode: true,
                null: true,
                ..Default::default()
            }),
            other => Err(Error::configuration(format!(
                "unsupported standalone provider: {other}, expected aws or linode"
            ))),
        }
    }
}

/// `provider "rancher2"` pointing at the management server
pub fn rancher2_provider(settings: &SynthSettings) -> ResourceBlock {
    ResourceBlock::provider(
        "rancher2",
        Body::new()
            .attr("api_url", settings.rancher.api_url())
            .attr("token_key", &settings.rancher.admin_token)
            .attr("insecure", settings.rancher.insecure),
    )
}

/// `provider "aws"`
pub fn aws_provider(settings: &SynthSettings) -> ResourceBlock {
    ResourceBlock::provider(
        "aws",
        Body::new()
            .attr("region", &settings.aws.region)
            .attr("access_key", &settings.aws.access_key)
            .attr("secret_key", &settings.aws.secret_key),
    )
}
