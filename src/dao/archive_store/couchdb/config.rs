use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DATABASE: &str = "raid_sync";

/// Runtime configuration describing how to reach CouchDB.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server URL, e.g. `http://localhost:5984`.
    pub base_url: String,
    /// Database holding summaries and profiles.
    pub database: String,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
}

impl CouchConfig {
    /// Build a configuration from `COUCH_BASE_URL`, the optional `COUCH_DB`
    /// and the optional `COUCH_USERNAME`/`COUCH_PASSWORD` pair.
    pub fn from_env() -> CouchResult<Self> {
        let base_url =
            std::env::var("COUCH_BASE_URL").map_err(|_| CouchDaoError::MissingEnvVar {
                var: "COUCH_BASE_URL",
            })?;
        let database =
            std::env::var("COUCH_DB").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());

        let (username, password) = match (
            std::env::var("COUCH_USERNAME").ok(),
            std::env::var("COUCH_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => (Some(username), Some(password)),
            _ => (None, None),
        };

        Ok(Self {
            base_url,
            database,
            username,
            password,
        })
    }
}
