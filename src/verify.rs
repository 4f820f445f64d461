//! Management API verification boundary
//!
//! The management API client itself lives outside this crate. Provisioning
//! only needs to know when the client is usable and to hand it the id of each
//! cluster it created.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::retry::{poll_until, PollPolicy};
use crate::{Error, Result};

/// Checks provisioned clusters through the management API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterVerifier: Send + Sync {
    /// True once the client can talk to the management server
    async fn client_ready(&self) -> Result<bool>;

    /// Verify one cluster by its management id
    async fn verify_cluster(&self, cluster_id: &str) -> Result<()>;
}

/// Wait until the client is ready or the policy deadline passes
pub async fn wait_for_client(verifier: &dyn ClusterVerifier, policy: &PollPolicy) -> Result<()> {
    poll_until(policy, "management client", || async move {
        Ok::<_, Error>(verifier.client_ready().await?.then_some(()))
    })
    .await
}

/// Wait for the client, then verify every cluster in `cluster_ids` (name → id)
pub async fn verify_all(
    verifier: &dyn ClusterVerifier,
    cluster_ids: &BTreeMap<String, String>,
    policy: &PollPolicy,
) -> Result<()> {
    wait_for_client(verifier, policy).await?;
    for (name, id) in cluster_ids {
        verifier.verify_cluster(id).await?;
        info!(cluster = %name, cluster_id = %id, "cluster verified");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::time::Duration;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn waits_until_the_client_is_ready() {
        let mut verifier = MockClusterVerifier::new();
        let mut checks = 0;
        verifier.expect_client_ready().times(3).returning(move || {
            checks += 1;
            Ok(checks == 3)
        });

        wait_for_client(&verifier, &fast()).await.unwrap();
    }

    #[tokio::test]
    async fn unready_client_times_out() {
        let mut verifier = MockClusterVerifier::new();
        verifier.expect_client_ready().returning(|| Ok(false));

        let err = wait_for_client(&verifier, &fast()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn every_cluster_id_is_verified() {
        let mut verifier = MockClusterVerifier::new();
        verifier.expect_client_ready().returning(|| Ok(true));
        verifier
            .expect_verify_cluster()
            .with(eq("c-abc12"))
            .times(1)
            .returning(|_| Ok(()));
        verifier
            .expect_verify_cluster()
            .with(eq("c-def34"))
            .times(1)
            .returning(|_| Ok(()));

        let ids = BTreeMap::from([
            ("tfp-aaaaa".to_string(), "c-abc12".to_string()),
            ("tfp-bbbbb".to_string(), "c-def34".to_string()),
        ]);
        verify_all(&verifier, &ids, &fast()).await.unwrap();
    }
}
