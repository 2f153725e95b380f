use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::CouchDaoError;
use crate::dao::models::{EncounterSummaryEntity, ProfileEntity};

pub const SUMMARY_PREFIX: &str = "summary::";
pub const PROFILE_PREFIX: &str = "profile::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Only the revision of a stored document, used before overwriting it.
#[derive(Debug, Deserialize)]
pub struct CouchRevision {
    #[serde(rename = "_rev")]
    pub rev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSummaryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub summary: EncounterSummaryEntity,
}

impl From<(EncounterSummaryEntity, Option<String>)> for CouchSummaryDocument {
    fn from((summary, rev): (EncounterSummaryEntity, Option<String>)) -> Self {
        Self {
            id: summary_doc_id(summary.id),
            rev,
            summary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchProfileDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub display_name: String,
    pub level: u32,
    pub xp: u32,
    pub gold: u32,
    #[serde(default)]
    pub rewarded_encounters: Vec<Uuid>,
}

impl From<(ProfileEntity, Option<String>)> for CouchProfileDocument {
    fn from((profile, rev): (ProfileEntity, Option<String>)) -> Self {
        Self {
            id: profile_doc_id(profile.participant_id),
            rev,
            display_name: profile.display_name,
            level: profile.level,
            xp: profile.xp,
            gold: profile.gold,
            rewarded_encounters: profile.rewarded_encounters,
        }
    }
}

impl TryFrom<CouchProfileDocument> for ProfileEntity {
    type Error = CouchDaoError;

    fn try_from(doc: CouchProfileDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            participant_id: extract_uuid(&doc.id)?,
            display_name: doc.display_name,
            level: doc.level,
            xp: doc.xp,
            gold: doc.gold,
            rewarded_encounters: doc.rewarded_encounters,
        })
    }
}

pub fn summary_doc_id(id: Uuid) -> String {
    format!("{SUMMARY_PREFIX}{id}")
}

pub fn profile_doc_id(id: Uuid) -> String {
    format!("{PROFILE_PREFIX}{id}")
}

pub fn extract_uuid(doc_id: &str) -> Result<Uuid, CouchDaoError> {
    let (_, id) = doc_id
        .split_once("::")
        .ok_or_else(|| CouchDaoError::InvalidDocId {
            doc_id: doc_id.to_string(),
            kind: "missing separator",
        })?;

    Uuid::parse_str(id).map_err(|_| CouchDaoError::InvalidDocId {
        doc_id: doc_id.to_string(),
        kind: "invalid UUID",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_ids_round_trip_through_doc_ids() {
        let id = Uuid::new_v4();
        assert_eq!(extract_uuid(&profile_doc_id(id)).unwrap(), id);
        assert!(extract_uuid("profile").is_err());
        assert!(extract_uuid("profile::nope").is_err());
    }
}
