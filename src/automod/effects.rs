//! Effect catalog

use crate::AUTOMOD_TARGET;
use crate::automod::context::TriggeredRuleData;
use crate::automod::engine::AutomodEngine;
use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::model::NewViolation;
use crate::automod::rulepart::{Effect, RulePart};
use crate::automod::services::ScheduledPayload;
use crate::automod::settings::{
    PartSettings, SettingDef, SettingType, SettingsType, expect_settings, reason_or,
};
use chrono::{Duration, Utc};
use poise::serenity_prelude::{ChannelId, MessageId, RoleId};
use tracing::{debug, error};

/// Discord caps channel slowmode at six hours
const MAX_RATELIMIT_SECS: i64 = 21_600;
const MAX_DELETE_MESSAGES: usize = 100;

fn reason_field() -> SettingDef {
    SettingDef::new("Custom message", "CustomReason", SettingType::String).range(0, 150)
}

/// Several instances of the same effect act once, with the first one's settings
fn first_settings(settings: &[&PartSettings]) -> Option<PartSettings> {
    settings.first().map(|s| (*s).clone())
}

fn target_channel(data: &TriggeredRuleData) -> Option<ChannelId> {
    data.channel
        .as_ref()
        .map(|c| c.id)
        .or_else(|| data.message.as_ref().map(|m| m.channel_id))
}

///////////////////////////////////////////////////////

pub struct DeleteMessageEffect;

impl RulePart for DeleteMessageEffect {
    fn name(&self) -> &'static str {
        "Delete message"
    }

    fn description(&self) -> &'static str {
        "Deletes the message"
    }
}

#[async_trait::async_trait]
impl Effect for DeleteMessageEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        _settings: &PartSettings,
    ) -> AutomodResult<()> {
        let Some(message) = &data.message else {
            return Ok(());
        };

        let delay = engine.config().delete_delay();
        let moderation = engine.services().moderation.clone();
        let (channel_id, message_id) = (message.channel_id, message.id);
        if delay.is_zero() {
            moderation.delete_messages(channel_id, vec![message_id]).await?;
            return Ok(());
        }

        // clients render a deleted message as ghost text if it goes too quickly
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match moderation.delete_messages(channel_id, vec![message_id]).await {
                Ok(()) => {}
                Err(e) if e.is_already_applied() => {
                    debug!(target: AUTOMOD_TARGET, message_id = %message_id, "Message already deleted");
                }
                Err(e) => error!(
                    target: AUTOMOD_TARGET,
                    channel_id = %channel_id,
                    message_id = %message_id,
                    error = %e,
                    "Deferred message delete failed"
                ),
            }
        });
        Ok(())
    }
}

///////////////////////////////////////////////////////

pub struct DeleteMessagesEffect;

impl RulePart for DeleteMessagesEffect {
    fn name(&self) -> &'static str {
        "Delete multiple messages"
    }

    fn description(&self) -> &'static str {
        "Deletes the last x messages of the user sent within y seconds"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::DeleteMessages
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Number of messages", "NumMessages", SettingType::Int)
                .range(1, 100)
                .default_value(3),
            SettingDef::new("Max age (seconds)", "TimeLimit", SettingType::Int)
                .range(1, 1_209_600)
                .default_value(15),
        ]
    }
}

#[async_trait::async_trait]
impl Effect for DeleteMessagesEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, DeleteMessages, self.name())?;
        let channel_id = target_channel(data).ok_or(AutomodError::MissingContext("channel"))?;

        let limit = settings.num_messages.clamp(1, MAX_DELETE_MESSAGES);
        let anchor = data.message.as_ref().map_or_else(Utc::now, |m| m.timestamp);
        let cutoff = anchor - Duration::seconds(settings.time_limit);

        let history = engine
            .services()
            .state
            .recent_messages(data.guild_id, Some(channel_id), engine.config().history_limit)
            .await?;

        let triggering = data.message.as_ref().map(|m| m.id);
        let mut targets: Vec<MessageId> = triggering.into_iter().collect();
        for message in history
            .iter()
            .filter(|m| m.author_id == data.member.user_id && Some(m.id) != triggering)
        {
            if targets.len() >= limit || message.timestamp < cutoff {
                break;
            }
            targets.push(message.id);
        }
        targets.truncate(limit);

        if targets.is_empty() {
            return Ok(());
        }
        engine
            .services()
            .moderation
            .delete_messages(channel_id, targets)
            .await?;
        Ok(())
    }
}

///////////////////////////////////////////////////////

pub struct AddViolationEffect;

impl RulePart for AddViolationEffect {
    fn name(&self) -> &'static str {
        "Add violation"
    }

    fn description(&self) -> &'static str {
        "Adds a violation with the specified name, which violation triggers can act on"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::ViolationName
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Name", "Name", SettingType::String)
                .range(1, 50)
                .default_value("name"),
        ]
    }
}

#[async_trait::async_trait]
impl Effect for AddViolationEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, ViolationName, self.name())?;
        engine
            .services()
            .store
            .insert_violation(NewViolation {
                guild_id: data.guild_id,
                user_id: data.member.user_id,
                rule_id: data.current_rule.as_ref().map(|r| r.model.id),
                created_at: Utc::now(),
                name: settings.name.clone(),
            })
            .await?;

        engine.spawn_violation_check(data.recursed(), settings.name.clone());
        Ok(())
    }
}

pub struct ResetViolationsEffect;

impl RulePart for ResetViolationsEffect {
    fn name(&self) -> &'static str {
        "Reset violations"
    }

    fn description(&self) -> &'static str {
        "Resets the violations of the specified name, all of them when empty"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::ViolationName
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![SettingDef::new("Name", "Name", SettingType::String).range(0, 50)]
    }
}

#[async_trait::async_trait]
impl Effect for ResetViolationsEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, ViolationName, self.name())?;
        let name = (!settings.name.trim().is_empty()).then(|| settings.name.clone());
        let removed = engine
            .services()
            .store
            .clear_violations(data.guild_id, data.member.user_id, name)
            .await?;
        debug!(
            target: AUTOMOD_TARGET,
            guild_id = %data.guild_id,
            user_id = %data.member.user_id,
            removed,
            "Reset violations"
        );
        Ok(())
    }
}

///////////////////////////////////////////////////////

pub struct KickUserEffect;

impl RulePart for KickUserEffect {
    fn name(&self) -> &'static str {
        "Kick user"
    }

    fn description(&self) -> &'static str {
        "Kicks the user"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Reason
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![reason_field()]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        first_settings(settings)
    }
}

#[async_trait::async_trait]
impl Effect for KickUserEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Reason, self.name())?;
        let reason = reason_or(&settings.custom_reason, || data.construct_reason(true));
        engine
            .services()
            .moderation
            .kick(data.guild_id, data.member.user_id, &reason)
            .await?;
        Ok(())
    }
}

pub struct BanUserEffect;

impl RulePart for BanUserEffect {
    fn name(&self) -> &'static str {
        "Ban user"
    }

    fn description(&self) -> &'static str {
        "Bans the user, optionally for a limited time"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Ban
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Duration (minutes, 0 for permanent)", "Duration", SettingType::Int),
            reason_field(),
            SettingDef::new("Number of days of messages to delete", "MessageDeleteDays", SettingType::Int)
                .range(0, 7)
                .default_value(1),
        ]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        first_settings(settings)
    }
}

#[async_trait::async_trait]
impl Effect for BanUserEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Ban, self.name())?;
        let reason = reason_or(&settings.custom_reason, || data.construct_reason(true));
        let services = engine.services();
        services
            .moderation
            .ban(
                data.guild_id,
                data.member.user_id,
                &reason,
                settings.message_delete_days.min(7),
            )
            .await?;

        if settings.duration > 0 {
            // A repeated ban moves the unban instead of queueing another
            let payload = ScheduledPayload::Unban {
                user_id: data.member.user_id,
            };
            services.scheduler.cancel_matching(data.guild_id, &payload).await?;
            services
                .scheduler
                .schedule_event(
                    data.guild_id,
                    Utc::now() + Duration::minutes(settings.duration),
                    payload,
                )
                .await?;
        }
        Ok(())
    }
}

pub struct MuteUserEffect;

impl RulePart for MuteUserEffect {
    fn name(&self) -> &'static str {
        "Mute user"
    }

    fn description(&self) -> &'static str {
        "Mutes the user for the specified duration"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Mute
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Duration (minutes, 0 for permanent)", "Duration", SettingType::Int)
                .default_value(10),
            reason_field(),
        ]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        first_settings(settings)
    }
}

#[async_trait::async_trait]
impl Effect for MuteUserEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Mute, self.name())?;
        let reason = reason_or(&settings.custom_reason, || data.construct_reason(true));
        let duration = u64::try_from(settings.duration)
            .ok()
            .filter(|&minutes| minutes > 0)
            .map(|minutes| std::time::Duration::from_secs(minutes * 60));
        engine
            .services()
            .moderation
            .mute(data.guild_id, data.member.user_id, &reason, duration)
            .await?;
        Ok(())
    }
}

pub struct WarnUserEffect;

impl RulePart for WarnUserEffect {
    fn name(&self) -> &'static str {
        "Warn user"
    }

    fn description(&self) -> &'static str {
        "Sends the user a warning"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Reason
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![reason_field()]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        first_settings(settings)
    }
}

#[async_trait::async_trait]
impl Effect for WarnUserEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Reason, self.name())?;
        let reason = reason_or(&settings.custom_reason, || data.construct_reason(true));
        engine
            .services()
            .moderation
            .warn(data.guild_id, data.member.user_id, &reason)
            .await?;
        Ok(())
    }
}

///////////////////////////////////////////////////////

pub struct SetNicknameEffect;

impl RulePart for SetNicknameEffect {
    fn name(&self) -> &'static str {
        "Set nickname"
    }

    fn description(&self) -> &'static str {
        "Sets the nickname of the user, or removes it when left empty"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Nickname
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![SettingDef::new("New nickname", "NewName", SettingType::String).range(0, 32)]
    }
}

#[async_trait::async_trait]
impl Effect for SetNicknameEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Nickname, self.name())?;
        let target = Some(settings.new_name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let current = data.member.nick.as_deref().filter(|n| !n.is_empty());
        if current == target.as_deref() {
            return Ok(());
        }

        engine
            .services()
            .moderation
            .set_nickname(data.guild_id, data.member.user_id, target)
            .await?;
        Ok(())
    }
}

fn role_fields() -> Vec<SettingDef> {
    vec![
        SettingDef::new("Role", "Role", SettingType::Role),
        SettingDef::new("Duration (seconds, 0 for permanent)", "Duration", SettingType::Int),
    ]
}

pub struct GiveRoleEffect;

impl RulePart for GiveRoleEffect {
    fn name(&self) -> &'static str {
        "Give role"
    }

    fn description(&self) -> &'static str {
        "Gives the user a role, optionally removing it again after a while"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Role
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        role_fields()
    }
}

#[async_trait::async_trait]
impl Effect for GiveRoleEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Role, self.name())?;
        if settings.role == 0 {
            return Err(AutomodError::MissingContext("role"));
        }
        if data.member.has_role(settings.role) {
            return Ok(());
        }

        let role_id = RoleId::new(settings.role);
        let reason = data.construct_reason(true);
        let services = engine.services();
        services
            .moderation
            .add_role(data.guild_id, data.member.user_id, role_id, &reason)
            .await?;

        if settings.duration > 0 {
            services
                .scheduler
                .schedule_event(
                    data.guild_id,
                    Utc::now() + Duration::seconds(settings.duration),
                    ScheduledPayload::RemoveRole {
                        user_id: data.member.user_id,
                        role_id,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

pub struct RemoveRoleEffect;

impl RulePart for RemoveRoleEffect {
    fn name(&self) -> &'static str {
        "Remove role"
    }

    fn description(&self) -> &'static str {
        "Removes a role from the user, optionally giving it back after a while"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Role
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        role_fields()
    }
}

#[async_trait::async_trait]
impl Effect for RemoveRoleEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, Role, self.name())?;
        if !data.member.has_role(settings.role) {
            return Ok(());
        }

        let role_id = RoleId::new(settings.role);
        let reason = data.construct_reason(true);
        let services = engine.services();
        services
            .moderation
            .remove_role(data.guild_id, data.member.user_id, role_id, &reason)
            .await?;

        if settings.duration > 0 {
            services
                .scheduler
                .schedule_event(
                    data.guild_id,
                    Utc::now() + Duration::seconds(settings.duration),
                    ScheduledPayload::AddRole {
                        user_id: data.member.user_id,
                        role_id,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

///////////////////////////////////////////////////////

pub struct EnableChannelSlowmodeEffect;

impl RulePart for EnableChannelSlowmodeEffect {
    fn name(&self) -> &'static str {
        "Enable channel slowmode"
    }

    fn description(&self) -> &'static str {
        "Enables slowmode in the channel for the specified duration"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::ChannelSlowmode
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Seconds between messages", "Ratelimit", SettingType::Int)
                .range(1, MAX_RATELIMIT_SECS)
                .default_value(5),
            SettingDef::new("Duration (seconds, 0 to keep it)", "Duration", SettingType::Int)
                .default_value(300),
        ]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        first_settings(settings)
    }
}

#[async_trait::async_trait]
impl Effect for EnableChannelSlowmodeEffect {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()> {
        let settings = expect_settings!(settings, ChannelSlowmode, self.name())?;
        let channel_id = target_channel(data).ok_or(AutomodError::MissingContext("channel"))?;

        if !engine.cooldowns().try_claim(channel_id) {
            debug!(
                target: AUTOMOD_TARGET,
                channel_id = %channel_id,
                "Channel slowmode recently applied, skipping"
            );
            return Ok(());
        }

        let seconds = u16::try_from(settings.ratelimit.clamp(0, MAX_RATELIMIT_SECS)).unwrap_or(u16::MAX);
        let services = engine.services();
        services
            .moderation
            .set_channel_slowmode(channel_id, seconds)
            .await?;

        if settings.duration > 0 {
            let payload = ScheduledPayload::ResetChannelSlowmode { channel_id };
            services.scheduler.cancel_matching(data.guild_id, &payload).await?;
            services
                .scheduler
                .schedule_event(
                    data.guild_id,
                    Utc::now() + Duration::seconds(settings.duration),
                    payload,
                )
                .await?;
        }
        Ok(())
    }
}
