//! Zero-downtime reindex behind an alias
//!
//! ```text
//! Active(old) -> Creating(new) -> AliasSwapped -> Copying -> Verifying -> Active(new) + delete old
//!                                      \______________________/
//!                                    failure: alias back to old, delete candidate
//! ```
//!
//! The alias is moved with a single remove+add request, so readers always
//! resolve it to exactly one index. The previous generation is only deleted
//! once the alias is confirmed on the new one.

use crate::naming::IndexGeneration;
use crate::{MigrationError, MigratorConfig, Result};
use search_common::schema::{fields, transaction_index_schema};
use search_common::{
    Clause, RangeBounds, ReindexRequest, SearchError, SearchIndex, TaskHandle, TaskStatus,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Active,
    Creating,
    AliasSwapped,
    Copying,
    Verifying,
    Activated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// Alias on the new generation; `old_deleted` is false when deleting the
    /// previous generation failed and it needs manual cleanup
    Completed { old_deleted: bool },
    /// Someone repointed the alias during the migration; the previous
    /// generation is kept
    OldIndexRetained { alias_target: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub generation: IndexGeneration,
    pub phases: Vec<MigrationPhase>,
    pub copy: TaskStatus,
    /// Documents in the new generation at verification
    pub documents: u64,
    pub outcome: MigrationOutcome,
}

pub struct ReindexCoordinator {
    search: Arc<dyn SearchIndex>,
    schema: Value,
    lookback_days: u32,
    id_script: Option<String>,
    poll_interval: Duration,
    copy_timeout: Duration,
}

impl ReindexCoordinator {
    pub fn new(search: Arc<dyn SearchIndex>, config: &MigratorConfig) -> Self {
        Self {
            search,
            schema: transaction_index_schema(),
            lookback_days: config.lookback_days,
            id_script: Some(config.id_script.clone()).filter(|s| !s.trim().is_empty()),
            poll_interval: config.poll_interval(),
            copy_timeout: config.copy_timeout(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_copy_timeout(mut self, timeout: Duration) -> Self {
        self.copy_timeout = timeout;
        self
    }

    /// Rebuild the index behind `alias` as its next generation
    pub async fn migrate(&self, alias: &str) -> Result<MigrationReport> {
        let current = self.resolve(alias).await?;
        let generation = IndexGeneration::next(alias, &current)?;
        let mut phases = vec![MigrationPhase::Active];
        info!(
            "Migrating alias {}: {} -> {}",
            alias, generation.current, generation.candidate
        );

        phases.push(MigrationPhase::Creating);
        if self.search.index_exists(&generation.candidate).await? {
            return Err(MigrationError::CandidateExists(generation.candidate));
        }
        self.search
            .create_index(&generation.candidate, &self.schema)
            .await?;

        if let Err(e) = self
            .search
            .alias_swap(alias, &generation.current, &generation.candidate)
            .await
        {
            return Err(self.rollback(&generation, e.into()).await);
        }
        phases.push(MigrationPhase::AliasSwapped);
        info!("Alias {} now resolves to {}", alias, generation.candidate);

        let (copy, documents) = match self.copy_and_verify(&generation, &mut phases).await {
            Ok(verified) => verified,
            Err(e) => return Err(self.rollback(&generation, e).await),
        };

        let outcome = self.activate(&generation).await?;
        phases.push(MigrationPhase::Activated);

        Ok(MigrationReport {
            generation,
            phases,
            copy,
            documents,
            outcome,
        })
    }

    async fn resolve(&self, alias: &str) -> Result<String> {
        let mut indices = self.search.alias_lookup(alias).await?;
        if indices.len() != 1 {
            return Err(SearchError::AliasResolution {
                alias: alias.to_string(),
                count: indices.len(),
            }
            .into());
        }
        Ok(indices.remove(0))
    }

    fn lookback_filter(&self) -> Value {
        Clause::range(
            fields::TIMESTAMP,
            RangeBounds::new().gte(format!("now-{}d", self.lookback_days)),
        )
        .to_json()
    }

    async fn copy_and_verify(
        &self,
        generation: &IndexGeneration,
        phases: &mut Vec<MigrationPhase>,
    ) -> Result<(TaskStatus, u64)> {
        phases.push(MigrationPhase::Copying);
        let request = ReindexRequest {
            source: generation.current.clone(),
            dest: generation.candidate.clone(),
            filter: self.lookback_filter(),
            id_script: self.id_script.clone(),
        };
        let handle = self.search.reindex(&request).await?;
        let status = self.wait_for_copy(&handle).await?;

        phases.push(MigrationPhase::Verifying);
        if let Some(reason) = &status.error {
            return Err(MigrationError::CopyFailed {
                task: handle.to_string(),
                reason: reason.clone(),
            });
        }

        // Copied documents are not counted until the candidate is refreshed
        self.search.refresh(&generation.candidate).await?;
        let documents = self.search.count(&generation.candidate, None).await?;
        if documents < status.created {
            return Err(MigrationError::VerificationFailed {
                index: generation.candidate.clone(),
                expected: status.created,
                actual: documents,
            });
        }

        info!(
            "Copied {} -> {}: {} created, {} already present, {} documents",
            generation.current,
            generation.candidate,
            status.created,
            status.version_conflicts,
            documents
        );
        Ok((status, documents))
    }

    async fn wait_for_copy(&self, handle: &TaskHandle) -> Result<TaskStatus> {
        let started = Instant::now();
        loop {
            match self.search.task_status(handle).await {
                Ok(status) if status.completed || status.failed() => return Ok(status),
                Ok(status) => debug!(
                    "Copy task {}: {}/{} created",
                    handle, status.created, status.total
                ),
                Err(e) if e.is_retryable() => warn!("Polling copy task {} failed: {}", handle, e),
                Err(e) => return Err(e.into()),
            }

            let waited = started.elapsed();
            if waited >= self.copy_timeout {
                return Err(MigrationError::CopyTimedOut {
                    task: handle.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Delete the previous generation once the alias is confirmed on the new one
    async fn activate(&self, generation: &IndexGeneration) -> Result<MigrationOutcome> {
        let bound = self.search.alias_lookup(&generation.alias).await?;
        if bound.len() != 1 || bound[0] != generation.candidate {
            warn!(
                "Alias {} was repointed to {:?} during migration, keeping {}",
                generation.alias, bound, generation.current
            );
            return Ok(MigrationOutcome::OldIndexRetained {
                alias_target: bound,
            });
        }

        match self.search.delete_index(&generation.current).await {
            Ok(()) => {
                info!(
                    "Migration of {} complete, deleted {}",
                    generation.alias, generation.current
                );
                Ok(MigrationOutcome::Completed { old_deleted: true })
            }
            Err(e) => {
                error!(
                    "Migration of {} complete but deleting {} failed: {}",
                    generation.alias, generation.current, e
                );
                Ok(MigrationOutcome::Completed { old_deleted: false })
            }
        }
    }

    /// Put the alias back on the previous generation if it still points at
    /// the candidate, then drop the candidate unless the alias resolves to it
    async fn rollback(&self, generation: &IndexGeneration, cause: MigrationError) -> MigrationError {
        error!(
            "Migration of {} to {} failed, rolling back: {}",
            generation.alias, generation.candidate, cause
        );

        let mut alias_restored = false;
        let candidate_bound = match self.search.alias_lookup(&generation.alias).await {
            Ok(bound) if bound.len() == 1 && bound[0] == generation.candidate => {
                match self
                    .search
                    .alias_swap(&generation.alias, &generation.candidate, &generation.current)
                    .await
                {
                    Ok(()) => {
                        alias_restored = true;
                        info!("Alias {} restored to {}", generation.alias, generation.current);
                        false
                    }
                    Err(e) => {
                        error!(
                            "Failed to restore alias {} to {}: {}",
                            generation.alias, generation.current, e
                        );
                        true
                    }
                }
            }
            Ok(bound) => {
                if bound.len() != 1 || bound[0] != generation.current {
                    warn!(
                        "Alias {} resolves to {:?}, leaving it untouched",
                        generation.alias, bound
                    );
                }
                bound.iter().any(|index| *index == generation.candidate)
            }
            Err(e) => {
                error!(
                    "Cannot read alias {} during rollback: {}",
                    generation.alias, e
                );
                true
            }
        };

        let candidate_deleted = if candidate_bound {
            error!(
                "Keeping {}: alias {} may still resolve to it",
                generation.candidate, generation.alias
            );
            false
        } else {
            self.delete_candidate(&generation.candidate).await
        };

        MigrationError::RolledBack {
            cause: Box::new(cause),
            alias_restored,
            candidate_deleted,
        }
    }

    async fn delete_candidate(&self, candidate: &str) -> bool {
        match self.search.delete_index(candidate).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                error!("Failed to delete candidate {}: {}", candidate, e);
                false
            }
        }
    }
}
