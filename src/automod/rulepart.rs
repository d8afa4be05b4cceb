//! Rule part capabilities
//!
//! A rule part is a stateless strategy object. Every part implements [`RulePart`] plus
//! exactly one capability trait, and the registry stores it behind the matching
//! [`RulePartHandle`] variant so dispatch is a match on a closed set of tags.

use crate::automod::context::{ChannelSnapshot, MemberSnapshot, MessageSnapshot, TriggeredRuleData};
use crate::automod::engine::AutomodEngine;
use crate::automod::error::AutomodResult;
use crate::automod::model::{RulePartKind, Violation};
use crate::automod::settings::{PartSettings, SettingDef, SettingsType};
use derive_more::Display;
use poise::serenity_prelude::GuildId;
use std::fmt;
use std::sync::Arc;

/// Capabilities shared by every trigger, condition and effect
pub trait RulePart: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn settings_type(&self) -> SettingsType {
        SettingsType::None
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        Vec::new()
    }

    /// Combine the settings of several instances of this part, if the part supports it
    fn merge_duplicates(&self, _settings: &[&PartSettings]) -> Option<PartSettings> {
        None
    }
}

/// Inputs available to a trigger predicate
pub struct TriggerContext<'a> {
    pub engine: &'a AutomodEngine,
    pub guild_id: GuildId,
    pub member: &'a MemberSnapshot,
    pub channel: Option<&'a ChannelSnapshot>,
    pub settings: &'a PartSettings,
}

#[async_trait::async_trait]
pub trait MessageTrigger: RulePart {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool>;
}

/// Trigger fed by freshly added violations
pub trait ViolationListener: RulePart {
    fn check_user(
        &self,
        data: &TriggeredRuleData,
        violations: &[Violation],
        settings: &PartSettings,
        triggered_on_higher: bool,
    ) -> AutomodResult<bool>;
}

#[async_trait::async_trait]
pub trait NicknameListener: RulePart {
    async fn check_nickname(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool>;
}

#[async_trait::async_trait]
pub trait UsernameListener: RulePart {
    async fn check_username(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool>;
}

#[async_trait::async_trait]
pub trait JoinListener: RulePart {
    async fn check_join(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool>;
}

#[async_trait::async_trait]
pub trait Condition: RulePart {
    async fn is_met(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<bool>;
}

#[async_trait::async_trait]
pub trait Effect: RulePart {
    async fn apply(
        &self,
        engine: &AutomodEngine,
        data: &TriggeredRuleData,
        settings: &PartSettings,
    ) -> AutomodResult<()>;
}

/// Event family a trigger listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TriggerFamily {
    #[display("message")]
    Message,
    #[display("violation")]
    Violation,
    #[display("nickname")]
    Nickname,
    #[display("username")]
    Username,
    #[display("join")]
    Join,
}

#[derive(Clone)]
pub enum TriggerHandle {
    Message(Arc<dyn MessageTrigger>),
    Violation(Arc<dyn ViolationListener>),
    Nickname(Arc<dyn NicknameListener>),
    Username(Arc<dyn UsernameListener>),
    Join(Arc<dyn JoinListener>),
}

impl TriggerHandle {
    pub fn family(&self) -> TriggerFamily {
        match self {
            Self::Message(_) => TriggerFamily::Message,
            Self::Violation(_) => TriggerFamily::Violation,
            Self::Nickname(_) => TriggerFamily::Nickname,
            Self::Username(_) => TriggerFamily::Username,
            Self::Join(_) => TriggerFamily::Join,
        }
    }
}

/// A registered rule part, tagged by capability
#[derive(Clone)]
pub enum RulePartHandle {
    Trigger(TriggerHandle),
    Condition(Arc<dyn Condition>),
    Effect(Arc<dyn Effect>),
}

macro_rules! with_part {
    ($handle:expr, $part:ident => $body:expr) => {
        match $handle {
            RulePartHandle::Trigger(TriggerHandle::Message($part)) => $body,
            RulePartHandle::Trigger(TriggerHandle::Violation($part)) => $body,
            RulePartHandle::Trigger(TriggerHandle::Nickname($part)) => $body,
            RulePartHandle::Trigger(TriggerHandle::Username($part)) => $body,
            RulePartHandle::Trigger(TriggerHandle::Join($part)) => $body,
            RulePartHandle::Condition($part) => $body,
            RulePartHandle::Effect($part) => $body,
        }
    };
}

impl RulePartHandle {
    pub fn message(part: impl MessageTrigger + 'static) -> Self {
        Self::Trigger(TriggerHandle::Message(Arc::new(part)))
    }

    pub fn violation(part: impl ViolationListener + 'static) -> Self {
        Self::Trigger(TriggerHandle::Violation(Arc::new(part)))
    }

    pub fn nickname(part: impl NicknameListener + 'static) -> Self {
        Self::Trigger(TriggerHandle::Nickname(Arc::new(part)))
    }

    pub fn username(part: impl UsernameListener + 'static) -> Self {
        Self::Trigger(TriggerHandle::Username(Arc::new(part)))
    }

    pub fn join(part: impl JoinListener + 'static) -> Self {
        Self::Trigger(TriggerHandle::Join(Arc::new(part)))
    }

    pub fn condition(part: impl Condition + 'static) -> Self {
        Self::Condition(Arc::new(part))
    }

    pub fn effect(part: impl Effect + 'static) -> Self {
        Self::Effect(Arc::new(part))
    }

    pub fn kind(&self) -> RulePartKind {
        match self {
            Self::Trigger(_) => RulePartKind::Trigger,
            Self::Condition(_) => RulePartKind::Condition,
            Self::Effect(_) => RulePartKind::Effect,
        }
    }

    pub fn trigger_family(&self) -> Option<TriggerFamily> {
        match self {
            Self::Trigger(trigger) => Some(trigger.family()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        with_part!(self, p => p.name())
    }

    pub fn description(&self) -> &'static str {
        with_part!(self, p => p.description())
    }

    pub fn settings_type(&self) -> SettingsType {
        with_part!(self, p => p.settings_type())
    }

    pub fn user_settings(&self) -> Vec<SettingDef> {
        with_part!(self, p => p.user_settings())
    }

    pub fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        with_part!(self, p => p.merge_duplicates(settings))
    }
}

impl fmt::Debug for RulePartHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}
