#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    EncounterSummaryEntity, ProfileEntity, RewardCredit, SummaryListItemEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Conditional profile writes attempted before a backend gives up.
pub const CREDIT_ATTEMPTS: u32 = 16;

/// Abstraction over the persistence layer for encounter summaries and player
/// profiles.
pub trait ArchiveStore: Send + Sync {
    /// Create or replace the summary of a finished encounter.
    fn save_summary(&self, summary: EncounterSummaryEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load one summary.
    fn find_summary(&self, id: Uuid)
    -> BoxFuture<'static, StorageResult<Option<EncounterSummaryEntity>>>;
    /// List every archived encounter.
    fn list_summaries(&self) -> BoxFuture<'static, StorageResult<Vec<SummaryListItemEntity>>>;
    /// Load a player profile.
    fn find_profile(&self, participant_id: Uuid)
    -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>>;
    /// Credit an encounter reward to a profile, creating it when missing. The
    /// update is conditional on the profile read, so concurrent credits never
    /// overwrite each other. Resolves to `false` when the encounter was already
    /// credited.
    fn credit_reward(&self, credit: RewardCredit) -> BoxFuture<'static, StorageResult<bool>>;
    /// Check that the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
