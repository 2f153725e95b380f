use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use uuid::Uuid;

use crate::dao::{
    archive_store::{ArchiveStore, CREDIT_ATTEMPTS},
    models::{EncounterSummaryEntity, ProfileEntity, RewardCredit, SummaryListItemEntity},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchProfileDocument, CouchRevision, CouchSummaryDocument, END_SUFFIX,
        SUMMARY_PREFIX, profile_doc_id, summary_doc_id,
    },
};

/// Archive backend storing summaries and profiles in a CouchDB database.
#[derive(Clone)]
pub struct CouchArchiveStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchArchiveStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.with_auth(self.client.request(method, url))
    }

    /// Send `builder`, keeping `path` around for error reporting.
    async fn send(&self, builder: reqwest::RequestBuilder, path: &str) -> CouchResult<Response> {
        builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })
    }

    fn expect_success(response: &Response, path: &str) -> CouchResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            })
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let status = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?
            .status();
        if status == StatusCode::OK {
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(CouchDaoError::DatabaseStatus { database, status });
        }

        let created = self
            .with_auth(self.client.put(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseCreate {
                database: database.clone(),
                source,
            })?
            .status();
        match created {
            status if status.is_success() => Ok(()),
            // Another instance created it first.
            StatusCode::PRECONDITION_FAILED => Ok(()),
            status => Err(CouchDaoError::DatabaseStatus { database, status }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self.send(self.request(Method::GET, doc_id), doc_id).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_success(&response, doc_id)?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: doc_id.to_string(),
                source,
            })
    }

    async fn current_revision(&self, doc_id: &str) -> CouchResult<Option<String>> {
        let doc = self.get_document::<CouchRevision>(doc_id).await?;
        Ok(doc.map(|doc| doc.rev))
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let builder = self.request(Method::PUT, doc_id).json(document);
        let response = self.send(builder, doc_id).await?;
        Self::expect_success(&response, doc_id)
    }

    /// Credit a profile with a PUT carrying the `_rev` that was read. CouchDB
    /// answers 409 when the document changed since, and the credit is replayed
    /// on the fresh revision.
    async fn credit_profile(&self, credit: &RewardCredit) -> CouchResult<bool> {
        let doc_id = profile_doc_id(credit.participant_id);
        for _ in 0..CREDIT_ATTEMPTS {
            let (mut profile, rev) = match self
                .get_document::<CouchProfileDocument>(&doc_id)
                .await?
            {
                Some(doc) => {
                    let rev = doc.rev.clone();
                    (ProfileEntity::try_from(doc)?, rev)
                }
                None => (
                    ProfileEntity::new(credit.participant_id, credit.display_name.clone()),
                    None,
                ),
            };
            if !profile.credit(credit) {
                return Ok(false);
            }

            let doc = CouchProfileDocument::from((profile, rev));
            let builder = self.request(Method::PUT, &doc_id).json(&doc);
            let response = self.send(builder, &doc_id).await?;
            if response.status() == StatusCode::CONFLICT {
                continue;
            }
            Self::expect_success(&response, &doc_id)?;
            return Ok(true);
        }

        Err(CouchDaoError::ProfileContention {
            doc_id,
            attempts: CREDIT_ATTEMPTS,
        })
    }

    /// All documents whose id starts with `prefix`, decoded as `T`.
    async fn documents_with_prefix<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let range = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let builder = self.request(Method::GET, ALL_DOCS).query(&range);
        let response = self.send(builder, ALL_DOCS).await?;
        Self::expect_success(&response, ALL_DOCS)?;
        let page = response
            .json::<AllDocsResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        let mut docs = Vec::with_capacity(page.rows.len());
        for doc in page.rows.into_iter().filter_map(|row| row.doc) {
            let doc = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                path: ALL_DOCS.to_string(),
                source,
            })?;
            docs.push(doc);
        }
        Ok(docs)
    }
}

impl ArchiveStore for CouchArchiveStore {
    fn save_summary(&self, summary: EncounterSummaryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = summary_doc_id(summary.id);
            let rev = store.current_revision(&doc_id).await?;
            let doc = CouchSummaryDocument::from((summary, rev));
            store.put_document(&doc_id, &doc).await.map_err(Into::into)
        })
    }

    fn find_summary(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<EncounterSummaryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchSummaryDocument>(&summary_doc_id(id))
                .await?;
            Ok(doc.map(|doc| doc.summary))
        })
    }

    fn list_summaries(&self) -> BoxFuture<'static, StorageResult<Vec<SummaryListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .documents_with_prefix::<CouchSummaryDocument>(SUMMARY_PREFIX)
                .await?;
            let mut items: Vec<SummaryListItemEntity> = docs
                .iter()
                .map(|doc| SummaryListItemEntity::from(&doc.summary))
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
            let doc = store
                .get_document::<CouchProfileDocument>(&profile_doc_id(participant_id))
                .await?;
            Ok(doc.map(ProfileEntity::try_from).transpose()?)
        })
    }

    fn credit_reward(&self, credit: RewardCredit) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.credit_profile(&credit).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store.send(store.with_auth(store.client.get(&url)), &url).await?;
            Self::expect_success(&response, &url).map_err(Into::into)
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
