//! Persisted automod rows
//!
//! These mirror the storage layout one to one. Rule names and ruleset names are
//! denormalized into the triggered-rule log so it stays readable after deletion.

use chrono::{DateTime, Utc};
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use serde::{Deserialize, Serialize};

/// Discriminator for rule data rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum RulePartKind {
    #[display("trigger")]
    Trigger,
    #[display("condition")]
    Condition,
    #[display("effect")]
    Effect,
}

impl RulePartKind {
    /// Decode the persisted integer discriminator
    pub fn from_persisted(kind: i32) -> Option<Self> {
        match kind {
            0 => Some(Self::Trigger),
            1 => Some(Self::Condition),
            2 => Some(Self::Effect),
            _ => None,
        }
    }

    /// Integer discriminator used in storage
    pub fn persisted(self) -> i32 {
        match self {
            Self::Trigger => 0,
            Self::Condition => 1,
            Self::Effect => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetRow {
    pub id: i64,
    pub guild_id: GuildId,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: i64,
    pub guild_id: GuildId,
    pub ruleset_id: i64,
    pub name: String,
    #[serde(default)]
    pub trigger_counter: i64,
}

/// A trigger, condition or effect attached to a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDataRow {
    pub id: i64,
    pub guild_id: GuildId,
    pub rule_id: i64,
    pub kind: i32,
    pub type_id: i32,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// A condition shared by every rule of a ruleset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetConditionRow {
    pub id: i64,
    pub guild_id: GuildId,
    pub ruleset_id: i64,
    pub kind: i32,
    pub type_id: i32,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// A rule with its ordered data rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBundle {
    pub rule: RuleRow,
    #[serde(default)]
    pub data: Vec<RuleDataRow>,
}

/// Everything needed to parse one ruleset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetBundle {
    pub ruleset: RulesetRow,
    #[serde(default)]
    pub rules: Vec<RuleBundle>,
    #[serde(default)]
    pub conditions: Vec<RulesetConditionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: i64,
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub rule_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub name: String,
}

/// A violation before the store assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewViolation {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub rule_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub name: String,
}

/// Word or domain list referenced by list triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomodList {
    pub id: i64,
    pub guild_id: GuildId,
    pub name: String,
    pub kind: i32,
    #[serde(default)]
    pub content: Vec<String>,
}

/// One row of the triggered-rule audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredRuleLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub channel_id: Option<ChannelId>,
    pub channel_name: String,
    pub guild_id: GuildId,
    pub trigger_id: Option<i64>,
    pub trigger_type_id: i32,
    pub rule_id: Option<i64>,
    pub rule_name: String,
    pub ruleset_name: String,
    pub user_id: UserId,
    pub user_name: String,
    #[serde(default)]
    pub extradata: serde_json::Value,
}
