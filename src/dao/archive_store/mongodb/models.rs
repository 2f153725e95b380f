use std::time::SystemTime;

use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    DamageEntity, EncounterSummaryEntity, LogLineEntity, ProfileEntity, RewardEntity,
    RoundSummaryEntity, SummaryListItemEntity,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSummaryDocument {
    #[serde(rename = "_id")]
    id: Binary,
    name: String,
    host_id: Uuid,
    boss_name: String,
    boss_max_hp: u32,
    defeated: bool,
    created_at: DateTime,
    ended_at: DateTime,
    rounds: Vec<RoundSummaryEntity>,
    log: Vec<LogLineEntity>,
    rewards: Vec<RewardEntity>,
    final_damage: DamageEntity,
}

impl From<EncounterSummaryEntity> for MongoSummaryDocument {
    fn from(value: EncounterSummaryEntity) -> Self {
        Self {
            id: uuid_as_binary(value.id),
            name: value.name,
            host_id: value.host_id,
            boss_name: value.boss_name,
            boss_max_hp: value.boss_max_hp,
            defeated: value.defeated,
            created_at: DateTime::from_system_time(value.created_at),
            ended_at: DateTime::from_system_time(value.ended_at),
            rounds: value.rounds,
            log: value.log,
            rewards: value.rewards,
            final_damage: value.final_damage,
        }
    }
}

impl MongoSummaryDocument {
    pub fn into_entity(self) -> MongoResult<EncounterSummaryEntity> {
        Ok(EncounterSummaryEntity {
            id: binary_as_uuid(&self.id)?,
            name: self.name,
            host_id: self.host_id,
            boss_name: self.boss_name,
            boss_max_hp: self.boss_max_hp,
            defeated: self.defeated,
            created_at: self.created_at.to_system_time(),
            ended_at: self.ended_at.to_system_time(),
            rounds: self.rounds,
            log: self.log,
            rewards: self.rewards,
            final_damage: self.final_damage,
        })
    }

    pub fn list_item(&self) -> MongoResult<SummaryListItemEntity> {
        Ok(SummaryListItemEntity {
            id: binary_as_uuid(&self.id)?,
            name: self.name.clone(),
            defeated: self.defeated,
            ended_at: self.ended_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoProfileDocument {
    #[serde(rename = "_id")]
    id: Binary,
    display_name: String,
    level: u32,
    xp: u32,
    gold: u32,
    #[serde(default)]
    rewarded_encounters: Vec<Uuid>,
    /// Bumped on every write; conditional updates compare it.
    #[serde(default)]
    revision: i64,
    updated_at: DateTime,
}

impl From<ProfileEntity> for MongoProfileDocument {
    fn from(value: ProfileEntity) -> Self {
        Self {
            id: uuid_as_binary(value.participant_id),
            display_name: value.display_name,
            level: value.level,
            xp: value.xp,
            gold: value.gold,
            rewarded_encounters: value.rewarded_encounters,
            revision: 0,
            updated_at: DateTime::from_system_time(SystemTime::now()),
        }
    }
}

impl MongoProfileDocument {
    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn with_revision(mut self, revision: i64) -> Self {
        self.revision = revision;
        self
    }

    pub fn into_entity(self) -> MongoResult<ProfileEntity> {
        Ok(ProfileEntity {
            participant_id: binary_as_uuid(&self.id)?,
            display_name: self.display_name,
            level: self.level,
            xp: self.xp,
            gold: self.gold,
            rewarded_encounters: self.rewarded_encounters,
        })
    }
}

fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

fn binary_as_uuid(binary: &Binary) -> MongoResult<Uuid> {
    Uuid::from_slice(&binary.bytes).map_err(|source| MongoDaoError::InvalidId { source })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}
