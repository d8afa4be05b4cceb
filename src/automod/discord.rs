//! Serenity-backed implementations of the engine's collaborators
//!
//! Also converts gateway objects into the snapshots the engine works with.

use crate::automod::context::{ChannelSnapshot, MemberSnapshot, MessageSnapshot};
use crate::automod::error::{AutomodResult, ModerationError};
use crate::automod::services::{GuildState, Moderation, ModerationResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{
    Cache, ChannelId, EditChannel, EditMember, GuildChannel, GuildId, Http, Member, Message,
    MessageId, PartialMember, RoleId, Timestamp, User, UserId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest timeout Discord accepts; used for permanent mutes
const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 60 * 60);

/// How long fetched invite codes are reused
const INVITE_CACHE_TTL: Duration = Duration::from_secs(300);

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    *timestamp
}

/// Timeout length for a mute; `None` means permanent
fn timeout_duration(duration: Option<Duration>) -> Duration {
    duration.map_or(MAX_TIMEOUT, |d| d.min(MAX_TIMEOUT))
}

pub fn member_snapshot(member: &Member) -> MemberSnapshot {
    MemberSnapshot {
        user_id: member.user.id,
        username: member.user.name.clone(),
        global_name: member.user.global_name.clone(),
        nick: member.nick.clone(),
        roles: member.roles.clone(),
        bot: member.user.bot,
        joined_at: member.joined_at.map(to_utc),
    }
}

/// Snapshot for a user whose guild member object is not at hand
pub fn user_snapshot(user: &User) -> MemberSnapshot {
    MemberSnapshot {
        global_name: user.global_name.clone(),
        bot: user.bot,
        ..MemberSnapshot::new(user.id, user.name.clone())
    }
}

/// Snapshot for a message author, from the partial member attached to the message
pub fn partial_member_snapshot(user: &User, partial: Option<&PartialMember>) -> MemberSnapshot {
    let mut snapshot = user_snapshot(user);
    if let Some(partial) = partial {
        snapshot.nick = partial.nick.clone();
        snapshot.roles = partial.roles.clone();
        snapshot.joined_at = partial.joined_at.map(to_utc);
    }
    snapshot
}

pub fn channel_snapshot(channel: &GuildChannel) -> ChannelSnapshot {
    ChannelSnapshot {
        id: channel.id,
        name: channel.name.clone(),
        parent_id: channel.parent_id,
    }
}

pub fn message_snapshot(message: &Message) -> MessageSnapshot {
    MessageSnapshot {
        id: message.id,
        channel_id: message.channel_id,
        author_id: message.author.id,
        content: message.content.clone(),
        mentions: message.mentions.iter().map(|u| u.id).collect(),
        attachments: message.attachments.len(),
        timestamp: to_utc(message.timestamp),
        edited: message.edited_timestamp.is_some(),
    }
}

/// Guild state read from the gateway cache, falling back to HTTP
pub struct SerenityState {
    cache: Arc<Cache>,
    http: Arc<Http>,
    invites: DashMap<GuildId, (Instant, Vec<String>)>,
}

impl SerenityState {
    pub fn new(cache: Arc<Cache>, http: Arc<Http>) -> Self {
        Self {
            cache,
            http,
            invites: DashMap::new(),
        }
    }

    fn cached_messages(&self, channel_id: ChannelId) -> Vec<MessageSnapshot> {
        self.cache
            .channel_messages(channel_id)
            .map(|messages| messages.values().map(message_snapshot).collect())
            .unwrap_or_default()
    }

    fn guild_channels(&self, guild_id: GuildId) -> Vec<ChannelId> {
        self.cache
            .guild(guild_id)
            .map(|guild| guild.channels.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl GuildState for SerenityState {
    async fn recent_messages(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        limit: usize,
    ) -> AutomodResult<Vec<MessageSnapshot>> {
        let mut messages = match channel_id {
            Some(channel_id) => self.cached_messages(channel_id),
            None => self
                .guild_channels(guild_id)
                .into_iter()
                .flat_map(|channel_id| self.cached_messages(channel_id))
                .collect(),
        };
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn member_joined_at(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> AutomodResult<Option<DateTime<Utc>>> {
        let cached = self
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.members.get(&user_id).map(|m| m.joined_at));
        if let Some(joined_at) = cached {
            return Ok(joined_at.map(to_utc));
        }

        let member = self
            .http
            .get_member(guild_id, user_id)
            .await
            .map_err(ModerationError::from)?;
        Ok(member.joined_at.map(to_utc))
    }

    async fn guild_invite_codes(&self, guild_id: GuildId) -> AutomodResult<Vec<String>> {
        if let Some(entry) = self.invites.get(&guild_id) {
            if entry.0.elapsed() < INVITE_CACHE_TTL {
                return Ok(entry.1.clone());
            }
        }

        let mut codes: Vec<String> = guild_id
            .invites(&*self.http)
            .await
            .map_err(ModerationError::from)?
            .into_iter()
            .map(|invite| invite.code)
            .collect();
        if let Some(vanity) = self
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.vanity_url_code.clone())
        {
            codes.push(vanity);
        }

        debug!(guild_id = %guild_id, count = codes.len(), "Fetched guild invites");
        self.invites.insert(guild_id, (Instant::now(), codes.clone()));
        Ok(codes)
    }
}

/// Moderation primitives over the Discord HTTP API
pub struct DiscordModeration {
    http: Arc<Http>,
}

impl DiscordModeration {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl Moderation for DiscordModeration {
    async fn delete_messages(
        &self,
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    ) -> ModerationResult {
        match message_ids.as_slice() {
            [] => Ok(()),
            [id] => Ok(self
                .http
                .delete_message(channel_id, *id, Some("Automoderator"))
                .await?),
            ids => {
                let body = serde_json::json!({ "messages": ids });
                Ok(self
                    .http
                    .delete_messages(channel_id, &body, Some("Automoderator"))
                    .await?)
            }
        }
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult {
        Ok(guild_id
            .kick_with_reason(&*self.http, user_id, reason)
            .await?)
    }

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
        delete_message_days: u8,
    ) -> ModerationResult {
        Ok(guild_id
            .ban_with_reason(&*self.http, user_id, delete_message_days.min(7), reason)
            .await?)
    }

    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult {
        Ok(guild_id.unban(&*self.http, user_id).await?)
    }

    async fn mute(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
        duration: Option<Duration>,
    ) -> ModerationResult {
        let duration = timeout_duration(duration);
        let until = Utc::now()
            + chrono::Duration::from_std(duration)
                .map_err(|e| ModerationError::Other(e.to_string()))?;
        guild_id
            .edit_member(
                &*self.http,
                user_id,
                EditMember::new()
                    .disable_communication_until_datetime(until.into())
                    .audit_log_reason(reason),
            )
            .await?;
        Ok(())
    }

    async fn warn(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult {
        let channel = user_id.create_dm_channel(&*self.http).await?;
        let guild_name = guild_id
            .to_partial_guild(&*self.http)
            .await
            .map_or_else(|_| guild_id.to_string(), |g| g.name);
        if let Err(e) = channel
            .id
            .say(&*self.http, format!("**{guild_name}**: You have been warned for: {reason}"))
            .await
        {
            // Closed DMs are common; the warning still counts
            warn!(user_id = %user_id, error = %e, "Failed to deliver warning DM");
        }
        Ok(())
    }

    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        nickname: Option<String>,
    ) -> ModerationResult {
        guild_id
            .edit_member(
                &*self.http,
                user_id,
                EditMember::new().nickname(nickname.unwrap_or_default()),
            )
            .await?;
        Ok(())
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult {
        Ok(self
            .http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await?)
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult {
        Ok(self
            .http
            .remove_member_role(guild_id, user_id, role_id, Some(reason))
            .await?)
    }

    async fn set_channel_slowmode(&self, channel_id: ChannelId, seconds: u16) -> ModerationResult {
        channel_id
            .edit(&*self.http, EditChannel::new().rate_limit_per_user(seconds))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion_keeps_millis() {
        let timestamp = Timestamp::from_millis(1_700_000_000_250).unwrap();
        let converted = to_utc(timestamp);
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn test_user_snapshot_defaults() {
        let mut user = User::default();
        user.id = UserId::new(42);
        user.name = "someone".into();
        user.global_name = Some("Some One".into());
        let snapshot = user_snapshot(&user);
        assert_eq!(snapshot.user_id, UserId::new(42));
        assert_eq!(snapshot.account_name(), "Some One");
        assert!(snapshot.roles.is_empty());
        assert!(snapshot.joined_at.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        assert_eq!(timeout_duration(None), MAX_TIMEOUT);
        assert_eq!(timeout_duration(Some(Duration::from_secs(40 * 24 * 3600))), MAX_TIMEOUT);
        assert_eq!(
            timeout_duration(Some(Duration::from_secs(600))),
            Duration::from_secs(600)
        );
    }
}
