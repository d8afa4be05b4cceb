//! Collaborators the engine depends on
//!
//! Everything that talks to Discord, storage or third-party services sits behind one
//! of these traits so the engine can be exercised in isolation.

use crate::automod::context::MessageSnapshot;
use crate::automod::error::{AutomodResult, ModerationError};
use crate::automod::model::{AutomodList, NewViolation, RulesetBundle, TriggeredRuleLog, Violation};
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub type ModerationResult = Result<(), ModerationError>;

/// Read-only view of guild state
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait GuildState: Send + Sync {
    /// Most recent messages, newest first, optionally restricted to one channel
    async fn recent_messages(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        limit: usize,
    ) -> AutomodResult<Vec<MessageSnapshot>>;

    async fn member_joined_at(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> AutomodResult<Option<DateTime<Utc>>>;

    /// Invite codes that point at the guild itself
    async fn guild_invite_codes(&self, guild_id: GuildId) -> AutomodResult<Vec<String>>;
}

/// Moderation primitives
///
/// Implementations report "already in the desired state" as
/// [`ModerationError::AlreadyApplied`].
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Moderation: Send + Sync {
    async fn delete_messages(
        &self,
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    ) -> ModerationResult;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult;

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
        delete_message_days: u8,
    ) -> ModerationResult;

    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult;

    /// Timed mute, or permanent when `duration` is `None`
    async fn mute(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
        duration: Option<Duration>,
    ) -> ModerationResult;

    async fn warn(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult;

    /// Set the nickname, or clear it when `nickname` is `None`
    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        nickname: Option<String>,
    ) -> ModerationResult;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult;

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult;

    async fn set_channel_slowmode(&self, channel_id: ChannelId, seconds: u16) -> ModerationResult;
}

/// Work a scheduled event performs when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledPayload {
    RemoveRole { user_id: UserId, role_id: RoleId },
    AddRole { user_id: UserId, role_id: RoleId },
    Unban { user_id: UserId },
    ResetChannelSlowmode { channel_id: ChannelId },
}

impl ScheduledPayload {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RemoveRole { .. } => "amod2_remove_role",
            Self::AddRole { .. } => "amod2_add_role",
            Self::Unban { .. } => "amod2_unban",
            Self::ResetChannelSlowmode { .. } => "amod2_reset_channel_ratelimit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub guild_id: GuildId,
    pub fire_at: DateTime<Utc>,
    pub payload: ScheduledPayload,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule_event(
        &self,
        guild_id: GuildId,
        fire_at: DateTime<Utc>,
        payload: ScheduledPayload,
    ) -> AutomodResult<ScheduledEvent>;

    /// Drop pending events of a guild carrying an equal payload
    async fn cancel_matching(
        &self,
        guild_id: GuildId,
        payload: &ScheduledPayload,
    ) -> AutomodResult<usize>;
}

/// A safe-browsing style verdict for a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Threat {
    pub url: String,
    pub threat_type: String,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait LinkReputation: Send + Sync {
    /// First threat found among the links in `text`
    async fn check(&self, text: &str) -> AutomodResult<Option<Threat>>;
}

/// Persistent automod state
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait AutomodStore: Send + Sync {
    async fn rulesets(&self, guild_id: GuildId) -> AutomodResult<Vec<RulesetBundle>>;

    async fn list(&self, guild_id: GuildId, list_id: i64) -> AutomodResult<Option<AutomodList>>;

    async fn insert_violation(&self, violation: NewViolation) -> AutomodResult<Violation>;

    /// Violations of a user carrying `name`, oldest first
    async fn violations(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        name: &str,
    ) -> AutomodResult<Vec<Violation>>;

    /// Delete violations of a user, all of them when `name` is `None`
    async fn clear_violations(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        name: Option<String>,
    ) -> AutomodResult<usize>;

    /// Append to the triggered-rule log, keeping at most `retain` rows per guild
    async fn log_triggered(
        &self,
        entries: Vec<TriggeredRuleLog>,
        retain: usize,
    ) -> AutomodResult<()>;
}

/// The collaborators one engine instance talks to
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn AutomodStore>,
    pub state: Arc<dyn GuildState>,
    pub moderation: Arc<dyn Moderation>,
    pub scheduler: Arc<dyn Scheduler>,
    /// Safe browsing lookups are disabled without a reputation service
    pub reputation: Option<Arc<dyn LinkReputation>>,
}
