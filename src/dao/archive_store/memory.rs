//! Archive backend kept in process memory, used when no database is configured
//! and by the test suite.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::{
    archive_store::ArchiveStore,
    models::{EncounterSummaryEntity, ProfileEntity, RewardCredit, SummaryListItemEntity},
    storage::{StorageError, StorageResult},
};

/// Failure injected through [`MemoryArchiveStore::set_failing`].
#[derive(Debug, Error)]
#[error("in-memory archive is switched off")]
pub struct MemoryStoreOffline;

/// Archive backend backed by concurrent maps.
#[derive(Clone, Default)]
pub struct MemoryArchiveStore {
    summaries: Arc<DashMap<Uuid, EncounterSummaryEntity>>,
    profiles: Arc<DashMap<Uuid, ProfileEntity>>,
    failing: Arc<AtomicBool>,
}

impl MemoryArchiveStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory archive offline".into(),
                MemoryStoreOffline,
            ));
        }
        Ok(())
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn save_summary(&self, summary: EncounterSummaryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            store.summaries.insert(summary.id, summary);
            Ok(())
        })
    }

    fn find_summary(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<EncounterSummaryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            Ok(store.summaries.get(&id).map(|entry| entry.value().clone()))
        })
    }

    fn list_summaries(&self) -> BoxFuture<'static, StorageResult<Vec<SummaryListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            let mut items: Vec<SummaryListItemEntity> = store
                .summaries
                .iter()
                .map(|entry| SummaryListItemEntity::from(entry.value()))
                .collect();
            items.sort_by_key(|item| item.ended_at);
            Ok(items)
        })
    }

    fn find_profile(
        &self,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            Ok(store
                .profiles
                .get(&participant_id)
                .map(|entry| entry.value().clone()))
        })
    }

    fn credit_reward(&self, credit: RewardCredit) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            // the entry guard holds the shard lock for the whole update
            let mut profile = store
                .profiles
                .entry(credit.participant_id)
                .or_insert_with(|| {
                    ProfileEntity::new(credit.participant_id, credit.display_name.clone())
                });
            Ok(profile.credit(&credit))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }
}
