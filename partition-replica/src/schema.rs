//! Schema Compatibility Validator (spec §2, §4.2, §4.3, §4.5 step 1).
//!
//! Every request flows through the §4.2 validation chain before it reaches
//! a handler; the write path additionally re-validates after taking locks
//! (§4.4 step 3), the RW read path validates each returned row against the
//! transaction's begin schema (§4.3), and the finish protocol runs forward
//! validation at commit time (§4.5 step 1).

use crate::error::{CoordinatorError, Result};
use crate::ids::{HybridTimestamp, ReplicationGroupId};
use crate::ports::CatalogService;
use std::sync::Arc;

pub struct SchemaValidator {
    group_id: ReplicationGroupId,
    catalog: Arc<dyn CatalogService>,
}

impl SchemaValidator {
    pub fn new(group_id: ReplicationGroupId, catalog: Arc<dyn CatalogService>) -> Self {
        Self { group_id, catalog }
    }

    /// §4.2: table existence at `timestamp`, schema match against
    /// `requested_schema_version` if the request declared one, and (for
    /// requests that read rows) a wait for local metadata completeness.
    /// Returns the table's schema version at `timestamp`.
    pub async fn validate_request(
        &self,
        timestamp: HybridTimestamp,
        requested_schema_version: Option<u64>,
        reads_rows: bool,
    ) -> Result<u64> {
        let version = self
            .catalog
            .schema_version_at(self.group_id, timestamp)
            .await?
            .ok_or(CoordinatorError::TableNotFound)?;

        if let Some(requested) = requested_schema_version {
            if requested != version {
                return Err(CoordinatorError::IncompatibleSchema);
            }
        }

        if reads_rows {
            self.catalog.wait_for_metadata_completeness(timestamp).await?;
        }

        Ok(version)
    }

    /// §4.4 step 3 `failIfSchemaChangedSinceTxStart`: re-checked after locks
    /// are held, at a fresh `now()`. Returns the reliable catalog version to
    /// stamp onto the replicated command.
    pub async fn fail_if_schema_changed_since_tx_start(&self, tx_begin_schema_version: u64, now: HybridTimestamp) -> Result<u64> {
        let current = self
            .catalog
            .schema_version_at(self.group_id, now)
            .await?
            .ok_or(CoordinatorError::TableNotFound)?;

        if current != tx_begin_schema_version {
            return Err(CoordinatorError::IncompatibleSchema);
        }

        self.catalog.wait_for_metadata_completeness(now).await?;
        self.catalog.reliable_catalog_version_at(now).await
    }

    /// §4.3 "validate backwards-compatibility of each row's schema vs. the
    /// tx's begin schema", run over a just-collected RW batch.
    pub async fn validate_backward_compatible(&self, tx_begin_schema_version: u64, row_schema_version: u64) -> Result<()> {
        if row_schema_version == tx_begin_schema_version {
            return Ok(());
        }
        if self
            .catalog
            .is_backward_compatible(self.group_id, row_schema_version, tx_begin_schema_version)
            .await?
        {
            Ok(())
        } else {
            Err(CoordinatorError::IncompatibleSchema)
        }
    }

    /// §4.5 step 1: forward schema validation for one enlisted table at
    /// commit time. A dropped table or a non-forward-compatible schema
    /// change both fail closed.
    pub async fn validate_forward_compatible_at_commit(&self, tx_begin_schema_version: u64, commit_timestamp: HybridTimestamp) -> Result<()> {
        let commit_version = self
            .catalog
            .schema_version_at(self.group_id, commit_timestamp)
            .await?
            .ok_or(CoordinatorError::IncompatibleSchema)?;

        if commit_version == tx_begin_schema_version {
            return Ok(());
        }

        if self
            .catalog
            .is_forward_compatible(self.group_id, tx_begin_schema_version, commit_version)
            .await?
        {
            Ok(())
        } else {
            Err(CoordinatorError::IncompatibleSchema)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fakes::FakeCatalogService;

    fn group() -> ReplicationGroupId {
        ReplicationGroupId::new(1, 0)
    }

    #[async_std::test]
    async fn missing_table_is_table_not_found() {
        let catalog = Arc::new(FakeCatalogService::new(1));
        catalog.set_exists(false).await;
        let validator = SchemaValidator::new(group(), catalog);
        let err = validator
            .validate_request(HybridTimestamp::new(1, 0), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::TableNotFound));
    }

    #[async_std::test]
    async fn mismatched_requested_version_is_incompatible() {
        let catalog = Arc::new(FakeCatalogService::new(3));
        let validator = SchemaValidator::new(group(), catalog);
        let err = validator
            .validate_request(HybridTimestamp::new(1, 0), Some(2), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::IncompatibleSchema));
    }

    #[async_std::test]
    async fn matching_version_passes() {
        let catalog = Arc::new(FakeCatalogService::new(3));
        let validator = SchemaValidator::new(group(), catalog);
        assert_eq!(validator.validate_request(HybridTimestamp::new(1, 0), Some(3), true).await.unwrap(), 3);
    }

    #[async_std::test]
    async fn backward_incompatible_row_is_rejected() {
        let catalog = Arc::new(FakeCatalogService::new(3));
        catalog.set_backward_compatible(false).await;
        let validator = SchemaValidator::new(group(), catalog);
        let err = validator.validate_backward_compatible(3, 2).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::IncompatibleSchema));
    }

    #[async_std::test]
    async fn dropped_table_fails_forward_validation_at_commit() {
        let catalog = Arc::new(FakeCatalogService::new(3));
        catalog.set_exists(false).await;
        let validator = SchemaValidator::new(group(), catalog);
        let err = validator
            .validate_forward_compatible_at_commit(3, HybridTimestamp::new(10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::IncompatibleSchema));
    }
}
