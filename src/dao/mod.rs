/// Persistence of encounter summaries and player profiles.
pub mod archive_store;
/// Live multi-writer store holding every active encounter.
pub mod document_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
