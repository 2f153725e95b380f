use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB archive operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB archive backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save summary of encounter `{id}`")]
    SaveSummary {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load summary of encounter `{id}`")]
    LoadSummary {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list encounter summaries")]
    ListSummaries {
        #[source]
        source: MongoError,
    },
    #[error("failed to save profile `{id}`")]
    SaveProfile {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("profile `{id}` kept changing during {attempts} update attempt(s)")]
    ProfileContention { id: Uuid, attempts: u32 },
    #[error("failed to load profile `{id}`")]
    LoadProfile {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("stored document has a malformed `_id`")]
    InvalidId {
        #[source]
        source: uuid::Error,
    },
}
