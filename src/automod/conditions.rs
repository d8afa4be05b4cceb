//! Condition catalog
//!
//! Blacklist instances are met when the monitored attribute is absent, whitelist
//! instances when it is present.

use crate::automod::context::TriggeredRuleData;
use crate::automod::engine::AutomodEngine;
use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::rulepart::{Condition, RulePart};
use crate::automod::settings::{
    CategoriesSettings, ChannelsSettings, PartSettings, RolesSettings, SettingDef, SettingType,
    SettingsType, expect_settings,
};
use chrono::{DateTime, Duration, Utc};

/// Sorted union of the id lists carried by several instances
fn union_ids<'a>(lists: impl Iterator<Item = &'a Vec<u64>>) -> Vec<u64> {
    let mut ids: Vec<u64> = lists.flatten().copied().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

pub struct RolesCondition {
    pub blacklist: bool,
}

impl RulePart for RolesCondition {
    fn name(&self) -> &'static str {
        if self.blacklist {
            "Ignore roles"
        } else {
            "Require roles"
        }
    }

    fn description(&self) -> &'static str {
        if self.blacklist {
            "Ignore users with at least one of the selected roles"
        } else {
            "Require at least one of the selected roles"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Roles
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![SettingDef::new("Roles", "Roles", SettingType::MultiRole)]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        let roles = union_ids(settings.iter().filter_map(|s| match s {
            PartSettings::Roles(r) => Some(&r.roles),
            _ => None,
        }));
        Some(PartSettings::Roles(RolesSettings { roles }))
    }
}

#[async_trait::async_trait]
impl Condition for RolesCondition {
    async fn is_met(
        &self,
        _engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(settings, Roles, self.name())?;
        let has_any = settings.roles.iter().any(|&r| data.member.has_role(r));
        Ok(has_any != self.blacklist)
    }
}

pub struct ChannelsCondition {
    pub blacklist: bool,
}

impl RulePart for ChannelsCondition {
    fn name(&self) -> &'static str {
        if self.blacklist {
            "Ignore channels"
        } else {
            "Active in channels"
        }
    }

    fn description(&self) -> &'static str {
        if self.blacklist {
            "Ignore the selected channels"
        } else {
            "Only run in the selected channels"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Channels
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![SettingDef::new("Channels", "Channels", SettingType::MultiChannel)]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        let channels = union_ids(settings.iter().filter_map(|s| match s {
            PartSettings::Channels(c) => Some(&c.channels),
            _ => None,
        }));
        Some(PartSettings::Channels(ChannelsSettings { channels }))
    }
}

#[async_trait::async_trait]
impl Condition for ChannelsCondition {
    async fn is_met(
        &self,
        _engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(settings, Channels, self.name())?;
        let Some(channel) = &data.channel else {
            return Ok(true);
        };
        let listed = settings.channels.contains(&channel.id.get());
        Ok(listed != self.blacklist)
    }
}

pub struct ChannelCategoriesCondition {
    pub blacklist: bool,
}

impl RulePart for ChannelCategoriesCondition {
    fn name(&self) -> &'static str {
        if self.blacklist {
            "Ignore categories"
        } else {
            "Active in categories"
        }
    }

    fn description(&self) -> &'static str {
        if self.blacklist {
            "Ignore channels within the selected categories"
        } else {
            "Only run in channels within the selected categories"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Categories
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![SettingDef::new("Categories", "Categories", SettingType::MultiChannelCategory)]
    }

    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        let categories = union_ids(settings.iter().filter_map(|s| match s {
            PartSettings::Categories(c) => Some(&c.categories),
            _ => None,
        }));
        Some(PartSettings::Categories(CategoriesSettings { categories }))
    }
}

#[async_trait::async_trait]
impl Condition for ChannelCategoriesCondition {
    async fn is_met(
        &self,
        _engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(settings, Categories, self.name())?;
        let Some(channel) = &data.channel else {
            return Ok(true);
        };
        let listed = channel
            .parent_id
            .is_some_and(|parent| settings.categories.contains(&parent.get()));
        Ok(listed != self.blacklist)
    }
}

fn age_fields() -> Vec<SettingDef> {
    vec![SettingDef::new("Age (minutes)", "Treshold", SettingType::Int).default_value(1440)]
}

fn age_met(since: DateTime<Utc>, threshold_minutes: i64, below: bool) -> bool {
    let age = Utc::now() - since;
    let threshold = Duration::minutes(threshold_minutes);
    if below { age < threshold } else { age > threshold }
}

pub struct AccountAgeCondition {
    pub below: bool,
}

impl RulePart for AccountAgeCondition {
    fn name(&self) -> &'static str {
        if self.below {
            "Account age below"
        } else {
            "Account age above"
        }
    }

    fn description(&self) -> &'static str {
        if self.below {
            "Only run when the account is younger than x minutes"
        } else {
            "Only run when the account is older than x minutes"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Age
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        age_fields()
    }
}

#[async_trait::async_trait]
impl Condition for AccountAgeCondition {
    async fn is_met(
        &self,
        _engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(settings, Age, self.name())?;
        Ok(age_met(data.member.account_created_at(), settings.threshold, self.below))
    }
}

pub struct MemberAgeCondition {
    pub below: bool,
}

impl RulePart for MemberAgeCondition {
    fn name(&self) -> &'static str {
        if self.below {
            "Member age below"
        } else {
            "Member age above"
        }
    }

    fn description(&self) -> &'static str {
        if self.below {
            "Only run when the member joined less than x minutes ago"
        } else {
            "Only run when the member joined more than x minutes ago"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Age
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        age_fields()
    }
}

#[async_trait::async_trait]
impl Condition for MemberAgeCondition {
    async fn is_met(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(settings, Age, self.name())?;
        let joined_at = match data.member.joined_at {
            Some(joined_at) => Some(joined_at),
            None => {
                engine
                    .services()
                    .state
                    .member_joined_at(data.guild_id, data.member.user_id)
                    .await?
            }
        };
        let joined_at = joined_at.ok_or(AutomodError::MissingContext("member join time"))?;
        Ok(age_met(joined_at, settings.threshold, self.below))
    }
}

pub struct BotCondition {
    pub ignore: bool,
}

impl RulePart for BotCondition {
    fn name(&self) -> &'static str {
        if self.ignore {
            "Ignore bots"
        } else {
            "Only bots"
        }
    }

    fn description(&self) -> &'static str {
        if self.ignore {
            "Ignore all bot accounts"
        } else {
            "Only run for bot accounts"
        }
    }
}

#[async_trait::async_trait]
impl Condition for BotCondition {
    async fn is_met(
        &self,
        _engine: &AutomodEngine,
        data: &TriggeredRuleData,
        _settings: &PartSettings,
    ) -> AutomodResult<bool> {
        Ok(data.member.bot != self.ignore)
    }
}

pub struct MessageEditedCondition {
    pub new_message: bool,
}

impl RulePart for MessageEditedCondition {
    fn name(&self) -> &'static str {
        if self.new_message {
            "New message"
        } else {
            "Edited message"
        }
    }

    fn description(&self) -> &'static str {
        if self.new_message {
            "Only run on newly sent messages"
        } else {
            "Only run on edited messages"
        }
    }
}

#[async_trait::async_trait]
impl Condition for MessageEditedCondition {
    async fn is_met(
        &self,
        _engine: &AutomodEngine,
        data: &TriggeredRuleData,
        _settings: &PartSettings,
    ) -> AutomodResult<bool> {
        Ok(data
            .message
            .as_ref()
            .is_none_or(|m| m.edited != self.new_message))
    }
}
