//! Event snapshots and per-evaluation context
//!
//! The ingestion layer converts gateway objects into these plain snapshots so that the
//! engine never touches serenity types it would have to fetch or lock.

use crate::automod::parser::{ParsedPart, ParsedRule, ParsedRuleset};
use chrono::{DateTime, TimeZone, Utc};
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serde::Serialize;
use std::sync::Arc;

/// Milliseconds between the unix epoch and the first Discord snowflake
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub username: String,
    pub global_name: Option<String>,
    pub nick: Option<String>,
    pub roles: Vec<RoleId>,
    pub bot: bool,
    pub joined_at: Option<DateTime<Utc>>,
}

impl MemberSnapshot {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            global_name: None,
            nick: None,
            roles: Vec::new(),
            bot: false,
            joined_at: None,
        }
    }

    /// Account creation time encoded in the user id
    pub fn account_created_at(&self) -> DateTime<Utc> {
        let millis = (self.user_id.get() >> 22) + DISCORD_EPOCH_MS;
        Utc.timestamp_millis_opt(i64::try_from(millis).unwrap_or(i64::MAX))
            .single()
            .unwrap_or_default()
    }

    /// Name checked by username triggers: the global display name, else the username
    pub fn account_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }

    /// Name shown in logs and reasons
    pub fn display_name(&self) -> &str {
        self.nick.as_deref().unwrap_or_else(|| self.account_name())
    }

    pub fn has_role(&self, role: u64) -> bool {
        self.roles.iter().any(|r| r.get() == role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub name: String,
    /// Category the channel sits in
    pub parent_id: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub mentions: Vec<UserId>,
    pub attachments: usize,
    pub timestamp: DateTime<Utc>,
    pub edited: bool,
}

impl MessageSnapshot {
    pub fn new(
        id: MessageId,
        channel_id: ChannelId,
        author_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            channel_id,
            author_id,
            content: content.into(),
            mentions: Vec::new(),
            attachments: 0,
            timestamp,
            edited: false,
        }
    }
}

/// Context handed to conditions and effects
///
/// Cloned, never shared, whenever evaluation fans out or recurses.
#[derive(Debug, Clone)]
pub struct TriggeredRuleData {
    pub guild_id: GuildId,
    pub member: MemberSnapshot,
    pub channel: Option<ChannelSnapshot>,
    pub message: Option<MessageSnapshot>,

    pub ruleset: Option<Arc<ParsedRuleset>>,
    /// Set while a rule's own conditions and effects run
    pub current_rule: Option<Arc<ParsedRule>>,
    pub triggered_rules: Vec<Arc<ParsedRule>>,
    pub activated_triggers: Vec<Arc<ParsedPart>>,

    pub recursion_counter: u32,
    pub previous_reasons: Vec<String>,
}

impl TriggeredRuleData {
    pub fn new(guild_id: GuildId, member: MemberSnapshot) -> Self {
        Self {
            guild_id,
            member,
            channel: None,
            message: None,
            ruleset: None,
            current_rule: None,
            triggered_rules: Vec::new(),
            activated_triggers: Vec::new(),
            recursion_counter: 0,
            previous_reasons: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: Option<ChannelSnapshot>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_message(mut self, message: Option<MessageSnapshot>) -> Self {
        self.message = message;
        self
    }

    /// Triggers of the current rule that fired, in activation order
    pub fn current_rule_triggers(&self) -> impl Iterator<Item = &Arc<ParsedPart>> {
        let rule_id = self.current_rule.as_ref().map(|r| r.model.id);
        self.activated_triggers
            .iter()
            .filter(move |p| rule_id.is_some() && p.rule_id() == rule_id)
    }

    /// Human readable explanation of why the current rule fired
    pub fn construct_reason(&self, include_previous: bool) -> String {
        let mut reason = String::new();
        if include_previous {
            for previous in &self.previous_reasons {
                reason.push_str(previous);
                reason.push('\n');
            }
        }

        reason.push_str("Triggered rule: ");
        match &self.current_rule {
            None => reason.push_str("unknown rule"),
            Some(rule) => {
                reason.push_str(&rule.model.name);
                if let Some(part) = self.current_rule_triggers().next() {
                    reason.push_str(&format!(" (`{}`)", part.handle.name()));
                }
            }
        }
        reason
    }

    /// Copy used when an effect re-enters the engine
    pub fn recursed(&self) -> Self {
        let mut next = self.clone();
        next.previous_reasons.push(self.construct_reason(false));
        next.recursion_counter += 1;
        next.ruleset = None;
        next.current_rule = None;
        next.triggered_rules.clear();
        next.activated_triggers.clear();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::testing::{member, parsed_rule_with_trigger};

    #[test]
    fn test_account_created_at_from_snowflake() {
        // 2016-04-30 11:18:25.796 UTC
        let snapshot = member(175_928_847_299_117_063);
        assert_eq!(snapshot.account_created_at().timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn test_names() {
        let mut snapshot = member(5);
        assert_eq!(snapshot.account_name(), "user5");
        snapshot.global_name = Some("Global".into());
        assert_eq!(snapshot.account_name(), "Global");
        assert_eq!(snapshot.display_name(), "Global");
        snapshot.nick = Some("Nick".into());
        assert_eq!(snapshot.display_name(), "Nick");
    }

    #[test]
    fn test_construct_reason() {
        let (rule, trigger) = parsed_rule_with_trigger(1, 10, "No links");
        let mut data = TriggeredRuleData::new(GuildId::new(1), member(5));
        assert_eq!(data.construct_reason(true), "Triggered rule: unknown rule");

        data.current_rule = Some(rule);
        data.activated_triggers.push(trigger);
        data.previous_reasons.push("Triggered rule: earlier".into());

        assert_eq!(data.construct_reason(false), "Triggered rule: No links (`Any link`)");
        assert_eq!(
            data.construct_reason(true),
            "Triggered rule: earlier\nTriggered rule: No links (`Any link`)"
        );
    }

    #[test]
    fn test_recursed_copy_is_independent() {
        let (rule, trigger) = parsed_rule_with_trigger(1, 10, "No links");
        let mut data = TriggeredRuleData::new(GuildId::new(1), member(5));
        data.current_rule = Some(rule);
        data.activated_triggers.push(trigger);

        let next = data.recursed();
        assert_eq!(next.recursion_counter, 1);
        assert_eq!(next.previous_reasons, vec!["Triggered rule: No links (`Any link`)"]);
        assert!(next.current_rule.is_none());
        assert!(data.previous_reasons.is_empty());
        assert_eq!(data.recursion_counter, 0);
    }
}
