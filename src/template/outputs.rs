//! Per-cluster outputs read back after apply

use super::{BlockBuilder, SynthContext};
use crate::document::ResourceBlock;
use crate::Result;

/// `output "<cluster>_cluster_id"` used to hand cluster ids to verification
pub struct ClusterIdOutputBuilder;

impl BlockBuilder for ClusterIdOutputBuilder {
    fn name(&self) -> &'static str {
        "cluster-id-output"
    }

    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>> {
        Ok(vec![ResourceBlock::output(
            ctx.names.cluster_id_output(),
            ctx.names.cluster_id(&ctx.spec.topology),
        )])
    }
}
