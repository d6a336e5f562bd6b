//! Primary-Lease Gatekeeper (spec §4.1): every incoming request is checked
//! against the placement driver's current view of who holds the primary
//! lease for this replication group.

use std::sync::Arc;

use crate::error::{CoordinatorError, Result};
use crate::ids::{HybridTimestamp, ReplicationGroupId};
use crate::ports::{PlacementDriverClient, PrimaryLease};

pub struct PrimaryLeaseGatekeeper {
    group_id: ReplicationGroupId,
    local_name: String,
    placement_driver: Arc<dyn PlacementDriverClient>,
}

impl PrimaryLeaseGatekeeper {
    pub fn new(group_id: ReplicationGroupId, local_name: String, placement_driver: Arc<dyn PlacementDriverClient>) -> Self {
        Self {
            group_id,
            local_name,
            placement_driver,
        }
    }

    /// `PrimaryReplicaRequest` check (§4.1): the request's
    /// `enlistment_consistency_token` must equal the current lease's start
    /// time, and the lease must not have expired. The spec flags the
    /// source's use of `<` rather than strict `==` as likely a bug
    /// (§9 Open Questions); this implementation uses strict equality.
    pub async fn check_primary_request(&self, now: HybridTimestamp, enlistment_consistency_token: u64) -> Result<()> {
        let lease = self.placement_driver.current_lease(self.group_id, now).await?;

        if lease.leaseholder != self.local_name || !lease.covers(now) || lease.start_time != enlistment_consistency_token {
            return Err(CoordinatorError::PrimaryReplicaMiss {
                local_name: self.local_name.clone(),
                leaseholder: lease.leaseholder,
                expected_token: lease.start_time,
                actual_token: Some(enlistment_consistency_token),
            });
        }

        Ok(())
    }

    /// `ReadOnlyReplicaRequest`/`ReplicaSafeTimeSync` check (§4.1): only
    /// determines whether this replica is currently primary; never fails
    /// the request.
    pub async fn is_primary(&self, now: HybridTimestamp) -> Result<bool> {
        let lease = self.placement_driver.current_lease(self.group_id, now).await?;
        Ok(lease.leaseholder == self.local_name && lease.covers(now))
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fakes::FakePlacementDriver;

    fn group() -> ReplicationGroupId {
        ReplicationGroupId::new(1, 0)
    }

    #[async_std::test]
    async fn matching_token_passes() {
        let pd = Arc::new(FakePlacementDriver::leased_to("replica-a", 100, 1_000_000));
        let gate = PrimaryLeaseGatekeeper::new(group(), "replica-a".to_string(), pd);
        assert!(gate.check_primary_request(HybridTimestamp::new(200, 0), 100).await.is_ok());
    }

    #[async_std::test]
    async fn mismatched_token_is_rejected() {
        let pd = Arc::new(FakePlacementDriver::leased_to("replica-a", 100, 1_000_000));
        let gate = PrimaryLeaseGatekeeper::new(group(), "replica-a".to_string(), pd);
        let err = gate.check_primary_request(HybridTimestamp::new(200, 0), 99).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PrimaryReplicaMiss { .. }));
    }

    #[async_std::test]
    async fn not_leaseholder_is_rejected() {
        let pd = Arc::new(FakePlacementDriver::leased_to("replica-b", 100, 1_000_000));
        let gate = PrimaryLeaseGatekeeper::new(group(), "replica-a".to_string(), pd);
        let err = gate.check_primary_request(HybridTimestamp::new(200, 0), 100).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PrimaryReplicaMiss { .. }));
    }

    #[async_std::test]
    async fn expired_lease_is_rejected() {
        let pd = Arc::new(FakePlacementDriver::leased_to("replica-a", 100, 150));
        let gate = PrimaryLeaseGatekeeper::new(group(), "replica-a".to_string(), pd);
        let err = gate.check_primary_request(HybridTimestamp::new(200, 0), 100).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PrimaryReplicaMiss { .. }));
    }

    #[async_std::test]
    async fn is_primary_never_errors_on_mismatch() {
        let pd = Arc::new(FakePlacementDriver::leased_to("replica-b", 100, 1_000_000));
        let gate = PrimaryLeaseGatekeeper::new(group(), "replica-a".to_string(), pd);
        assert_eq!(gate.is_primary(HybridTimestamp::new(200, 0)).await.unwrap(), false);
    }
}
