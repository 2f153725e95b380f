//! Application-level configuration loading: encounter rules, timers and the
//! ability catalog.

use std::{collections::BTreeMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::state::{
    abilities::{AbilityEffect, AbilityName, AbilityRules, AbilitySpec, Dice, ResourceKind},
    rewards::RewardRules,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "RAID_SYNC_CONFIG_PATH";

/// Starting HP/MP of a participant, scaled by level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResourceDefaults {
    /// HP at level 0.
    pub base_hp: u32,
    /// HP gained per level.
    pub hp_per_level: u32,
    /// MP at level 0.
    pub base_mp: u32,
    /// MP gained per level.
    pub mp_per_level: u32,
}

impl ResourceDefaults {
    /// `(max_hp, max_mp)` for a participant of `level`.
    pub fn for_level(&self, level: u32) -> (u32, u32) {
        (
            self.base_hp + self.hp_per_level * level,
            self.base_mp + self.mp_per_level * level,
        )
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// HP lost by a participant answering incorrectly (or not at all).
    pub round_damage_penalty: u32,
    /// Grace window between the host ending a round and its resolution.
    pub round_grace: Duration,
    /// Lifetime of a skip-the-round vote.
    pub vote_window: Duration,
    /// Fraction of the frozen electorate that votes for must strictly exceed.
    pub vote_pass_ratio: f64,
    /// How long notices stay visible before their clear-write.
    pub notice_display: Duration,
    /// Group-vote abilities allowed per encounter.
    pub group_ability_cap: u32,
    /// Commit attempts before a transaction reports contention.
    pub store_max_attempts: u32,
    /// Starting pools of new participants.
    pub resources: ResourceDefaults,
    /// XP and gold rates applied at finalize.
    pub rewards: RewardRules,
    /// Ability catalog.
    pub abilities: BTreeMap<AbilityName, AbilitySpec>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in
    /// defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        abilities = app_config.abilities.len(),
                        "loaded encounter rules from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document. Missing keys keep their default value and
    /// abilities listed in the document replace the built-in entry of the same
    /// name.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Catalog entry of `ability`.
    pub fn ability(&self, ability: AbilityName) -> Option<&AbilitySpec> {
        self.abilities.get(&ability)
    }

    /// Encounter limits handed to the ability engine.
    pub fn ability_rules(&self) -> AbilityRules {
        AbilityRules {
            group_ability_cap: self.group_ability_cap,
            vote_window: self.vote_window,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_damage_penalty: 3,
            round_grace: Duration::from_secs(10),
            vote_window: Duration::from_secs(10),
            vote_pass_ratio: 0.5,
            notice_display: Duration::from_secs(5),
            group_ability_cap: 2,
            store_max_attempts: 64,
            resources: ResourceDefaults {
                base_hp: 20,
                hp_per_level: 5,
                base_mp: 10,
                mp_per_level: 2,
            },
            rewards: RewardRules {
                xp_per_correct: 25,
                gold_per_correct: 10,
                participation_gold: 2,
            },
            abilities: default_abilities(),
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    round_damage_penalty: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    round_grace_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    vote_window_ms: Option<Duration>,
    vote_pass_ratio: Option<f64>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    notice_display_ms: Option<Duration>,
    group_ability_cap: Option<u32>,
    store_max_attempts: Option<u32>,
    resources: Option<ResourceDefaults>,
    rewards: Option<RewardRules>,
    abilities: BTreeMap<AbilityName, AbilitySpec>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        let mut abilities = defaults.abilities;
        abilities.extend(value.abilities);
        Self {
            round_damage_penalty: value
                .round_damage_penalty
                .unwrap_or(defaults.round_damage_penalty),
            round_grace: value.round_grace_ms.unwrap_or(defaults.round_grace),
            vote_window: value.vote_window_ms.unwrap_or(defaults.vote_window),
            vote_pass_ratio: value.vote_pass_ratio.unwrap_or(defaults.vote_pass_ratio),
            notice_display: value.notice_display_ms.unwrap_or(defaults.notice_display),
            group_ability_cap: value.group_ability_cap.unwrap_or(defaults.group_ability_cap),
            store_max_attempts: value
                .store_max_attempts
                .unwrap_or(defaults.store_max_attempts),
            resources: value.resources.unwrap_or(defaults.resources),
            rewards: value.rewards.unwrap_or(defaults.rewards),
            abilities,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in ability catalog shipped with the binary.
fn default_abilities() -> BTreeMap<AbilityName, AbilitySpec> {
    BTreeMap::from([
        (
            AbilityName::Heal,
            AbilitySpec {
                cost: 4,
                effect: AbilityEffect::Restore {
                    resource: ResourceKind::Hp,
                    dice: Dice { count: 2, sides: 6 },
                    max_targets: 3,
                },
            },
        ),
        (
            AbilityName::Replenish,
            AbilitySpec {
                cost: 2,
                effect: AbilityEffect::Restore {
                    resource: ResourceKind::Mp,
                    dice: Dice { count: 2, sides: 4 },
                    max_targets: 1,
                },
            },
        ),
        (
            AbilityName::Mend,
            AbilitySpec {
                cost: 6,
                effect: AbilityEffect::PartyHeal {
                    level_fraction: 1.0,
                },
            },
        ),
        (
            AbilityName::Smite,
            AbilitySpec {
                cost: 5,
                effect: AbilityEffect::DeferredDamage {
                    dice: Dice { count: 2, sides: 6 },
                },
            },
        ),
        (
            AbilityName::Insight,
            AbilitySpec {
                cost: 3,
                effect: AbilityEffect::RemoveChoice,
            },
        ),
        (
            AbilityName::Revive,
            AbilitySpec {
                cost: 8,
                effect: AbilityEffect::Revive { hp_fraction: 0.5 },
            },
        ),
        (
            AbilityName::Fortify,
            AbilitySpec {
                cost: 6,
                effect: AbilityEffect::Buff {
                    resource: ResourceKind::Hp,
                    dice: Dice { count: 3, sides: 4 },
                    required_targets: 2,
                    max_targets: 3,
                },
            },
        ),
        (
            AbilityName::Rally,
            AbilitySpec {
                cost: 10,
                effect: AbilityEffect::GroupVote { bonus_damage: 5 },
            },
        ),
    ])
}
