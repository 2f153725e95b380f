use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoProfileDocument, MongoSummaryDocument, doc_id},
};
use crate::dao::{
    archive_store::{ArchiveStore, CREDIT_ATTEMPTS},
    models::{EncounterSummaryEntity, ProfileEntity, RewardCredit, SummaryListItemEntity},
    storage::StorageResult,
};

const SUMMARY_COLLECTION_NAME: &str = "encounter_summaries";
const PROFILE_COLLECTION_NAME: &str = "profiles";
const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

/// Archive backend storing summaries and profiles in MongoDB.
#[derive(Clone)]
pub struct MongoArchiveStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoArchiveStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState {
                client,
                database,
            }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.summaries().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"ended_at": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("summary_ended_at_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SUMMARY_COLLECTION_NAME,
                index: "ended_at",
                source,
            })?;

        Ok(())
    }

    async fn summaries(&self) -> Collection<MongoSummaryDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSummaryDocument>(SUMMARY_COLLECTION_NAME)
    }

    async fn profiles(&self) -> Collection<MongoProfileDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoProfileDocument>(PROFILE_COLLECTION_NAME)
    }

    async fn save_summary(&self, summary: EncounterSummaryEntity) -> MongoResult<()> {
        let id = summary.id;
        let document: MongoSummaryDocument = summary.into();
        self.summaries()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSummary { id, source })?;
        Ok(())
    }

    async fn find_summary(&self, id: Uuid) -> MongoResult<Option<EncounterSummaryEntity>> {
        let document = self
            .summaries()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSummary { id, source })?;
        document.map(MongoSummaryDocument::into_entity).transpose()
    }

    async fn list_summaries(&self) -> MongoResult<Vec<SummaryListItemEntity>> {
        let documents: Vec<MongoSummaryDocument> = self
            .summaries()
            .await
            .find(doc! {})
            .sort(doc! {"ended_at": 1})
            .await
            .map_err(|source| MongoDaoError::ListSummaries { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSummaries { source })?;

        documents.iter().map(MongoSummaryDocument::list_item).collect()
    }

    async fn find_profile(&self, id: Uuid) -> MongoResult<Option<ProfileEntity>> {
        let document = self
            .profiles()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadProfile { id, source })?;
        document.map(MongoProfileDocument::into_entity).transpose()
    }

    /// Read, credit and write back the profile, retrying whenever another
    /// writer changed it in between.
    async fn credit_reward(&self, credit: RewardCredit) -> MongoResult<bool> {
        let id = credit.participant_id;
        let profiles = self.profiles().await;

        for _ in 0..CREDIT_ATTEMPTS {
            let current = profiles
                .find_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::LoadProfile { id, source })?;

            let Some(document) = current else {
                let mut profile = ProfileEntity::new(id, credit.display_name.clone());
                profile.credit(&credit);
                match profiles.insert_one(MongoProfileDocument::from(profile)).await {
                    Ok(_) => return Ok(true),
                    // created concurrently; credit the stored one
                    Err(err) if is_duplicate_key(&err) => continue,
                    Err(source) => return Err(MongoDaoError::SaveProfile { id, source }),
                }
            };

            let revision = document.revision();
            let mut profile = document.into_entity()?;
            if !profile.credit(&credit) {
                return Ok(false);
            }
            let mut filter = doc_id(id);
            filter.insert("revision", revision);
            let next = MongoProfileDocument::from(profile).with_revision(revision + 1);
            let result = profiles
                .replace_one(filter, &next)
                .await
                .map_err(|source| MongoDaoError::SaveProfile { id, source })?;
            if result.matched_count == 1 {
                return Ok(true);
            }
        }

        Err(MongoDaoError::ProfileContention {
            id,
            attempts: CREDIT_ATTEMPTS,
        })
    }
}

impl ArchiveStore for MongoArchiveStore {
    fn save_summary(&self, summary: EncounterSummaryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_summary(summary).await.map_err(Into::into) })
    }

    fn find_summary(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<EncounterSummaryEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_summary(id).await.map_err(Into::into) })
    }

    fn list_summaries(&self) -> BoxFuture<'static, StorageResult<Vec<SummaryListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_summaries().await.map_err(Into::into) })
    }

    fn find_profile(
        &self,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_profile(participant_id).await.map_err(Into::into) })
    }

    fn credit_reward(&self, credit: RewardCredit) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.credit_reward(credit).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
