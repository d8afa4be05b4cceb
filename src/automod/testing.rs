//! Fakes and builders shared by the automod tests

use crate::automod::context::{ChannelSnapshot, MemberSnapshot, MessageSnapshot};
use crate::automod::engine::{AutomodEngine, MessageEvent};
use crate::automod::error::{AutomodResult, ModerationError};
use crate::automod::model::{
    AutomodList, NewViolation, RuleBundle, RuleDataRow, RulePartKind, RuleRow, RulesetBundle,
    RulesetConditionRow, RulesetRow, Violation,
};
use crate::automod::parser::{ParsedPart, ParsedRule, PartOwner};
use crate::automod::registry::{RulePartRegistry, ids};
use crate::automod::rulepart::{RulePartHandle, TriggerContext};
use crate::automod::scheduler::EventScheduler;
use crate::automod::services::{GuildState, Moderation, ModerationResult, Services};
use crate::automod::settings::PartSettings;
use crate::automod::store::MemoryStore;
use crate::automod::triggers::AnyLinkTrigger;
use crate::config::AutomodConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn guild() -> GuildId {
    GuildId::new(10)
}

pub fn member(id: u64) -> MemberSnapshot {
    MemberSnapshot::new(UserId::new(id), format!("user{id}"))
}

pub fn message(id: u64, channel: u64, author: u64, content: &str, timestamp: DateTime<Utc>) -> MessageSnapshot {
    MessageSnapshot::new(
        MessageId::new(id),
        ChannelId::new(channel),
        UserId::new(author),
        content,
        timestamp,
    )
}

pub fn violation(id: i64, name: &str, created_at: DateTime<Utc>) -> Violation {
    Violation {
        id,
        guild_id: guild(),
        user_id: UserId::new(5),
        rule_id: None,
        created_at,
        name: name.to_string(),
    }
}

pub fn word_list(id: i64, words: &[&str]) -> AutomodList {
    AutomodList {
        id,
        guild_id: guild(),
        name: format!("list {id}"),
        kind: 0,
        content: words.iter().map(|w| (*w).to_string()).collect(),
    }
}

pub fn ruleset_bundle(
    id: i64,
    name: &str,
    rules: Vec<RuleBundle>,
    conditions: Vec<RulesetConditionRow>,
) -> RulesetBundle {
    RulesetBundle {
        ruleset: RulesetRow {
            id,
            guild_id: guild(),
            name: name.to_string(),
            enabled: true,
        },
        rules,
        conditions,
    }
}

pub fn rule_bundle(ruleset_id: i64, rule_id: i64, name: &str, data: Vec<RuleDataRow>) -> RuleBundle {
    RuleBundle {
        rule: RuleRow {
            id: rule_id,
            guild_id: guild(),
            ruleset_id,
            name: name.to_string(),
            trigger_counter: 0,
        },
        data,
    }
}

pub fn rule_data(
    id: i64,
    rule_id: i64,
    kind: RulePartKind,
    type_id: i32,
    settings: serde_json::Value,
) -> RuleDataRow {
    RuleDataRow {
        id,
        guild_id: guild(),
        rule_id,
        kind: kind.persisted(),
        type_id,
        settings,
    }
}

pub fn condition_row(id: i64, ruleset_id: i64, type_id: i32, settings: serde_json::Value) -> RulesetConditionRow {
    RulesetConditionRow {
        id,
        guild_id: guild(),
        ruleset_id,
        kind: RulePartKind::Condition.persisted(),
        type_id,
        settings,
    }
}

/// A rule holding a single "Any link" trigger, plus that trigger
pub fn parsed_rule_with_trigger(ruleset_id: i64, rule_id: i64, name: &str) -> (Arc<ParsedRule>, Arc<ParsedPart>) {
    let trigger = Arc::new(ParsedPart {
        id: rule_id * 10,
        type_id: ids::ANY_LINK,
        owner: PartOwner::Rule { ruleset_id, rule_id },
        handle: RulePartHandle::message(AnyLinkTrigger),
        settings: PartSettings::None,
    });
    let rule = Arc::new(ParsedRule {
        model: rule_bundle(ruleset_id, rule_id, name, vec![]).rule,
        triggers: vec![Arc::clone(&trigger)],
        conditions: vec![],
        effects: vec![],
    });
    (rule, trigger)
}

/// Poll `done` until it holds, for at most about two seconds
pub async fn wait_until(done: impl Fn() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done(), "condition not reached in time");
}

/// Give spawned tasks a moment to finish
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Guild state served from memory
#[derive(Default)]
pub struct FakeGuildState {
    history: Mutex<Vec<MessageSnapshot>>,
    invites: Mutex<Vec<String>>,
    joined_at: DashMap<UserId, DateTime<Utc>>,
}

impl FakeGuildState {
    /// Messages are served in the given order, which should be newest first
    pub fn set_history(&self, history: Vec<MessageSnapshot>) {
        *self.history.lock().unwrap() = history;
    }

    pub fn set_invites(&self, codes: &[&str]) {
        *self.invites.lock().unwrap() = codes.iter().map(|c| (*c).to_string()).collect();
    }

    pub fn set_joined_at(&self, user_id: UserId, joined_at: DateTime<Utc>) {
        self.joined_at.insert(user_id, joined_at);
    }
}

#[async_trait::async_trait]
impl GuildState for FakeGuildState {
    async fn recent_messages(
        &self,
        _guild_id: GuildId,
        channel_id: Option<ChannelId>,
        limit: usize,
    ) -> AutomodResult<Vec<MessageSnapshot>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| channel_id.is_none_or(|c| m.channel_id == c))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn member_joined_at(
        &self,
        _guild_id: GuildId,
        user_id: UserId,
    ) -> AutomodResult<Option<DateTime<Utc>>> {
        Ok(self.joined_at.get(&user_id).map(|j| *j))
    }

    async fn guild_invite_codes(&self, _guild_id: GuildId) -> AutomodResult<Vec<String>> {
        Ok(self.invites.lock().unwrap().clone())
    }
}

type Failure = Box<dyn Fn() -> ModerationError + Send + Sync>;

/// Moderation fake that records every call
#[derive(Default)]
pub struct RecordingModeration {
    calls: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<MessageId>>,
    mutes: Mutex<Vec<Option<Duration>>>,
    failures: Mutex<HashMap<String, Failure>>,
}

impl RecordingModeration {
    /// Make every call of `method` fail with the produced error
    pub fn fail_with(&self, method: &str, failure: impl Fn() -> ModerationError + Send + Sync + 'static) {
        self.failures
            .lock()
            .unwrap()
            .insert(method.to_string(), Box::new(failure));
    }

    /// Method names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn calls_named(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }

    pub fn reasons(&self, method: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn mute_durations(&self) -> Vec<Option<Duration>> {
        self.mutes.lock().unwrap().clone()
    }

    fn record(&self, method: &str, reason: &str) -> ModerationResult {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), reason.to_string()));
        match self.failures.lock().unwrap().get(method) {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Moderation for RecordingModeration {
    async fn delete_messages(&self, _channel_id: ChannelId, message_ids: Vec<MessageId>) -> ModerationResult {
        self.record("delete_messages", "")?;
        self.deleted.lock().unwrap().extend(message_ids);
        Ok(())
    }

    async fn kick(&self, _guild_id: GuildId, _user_id: UserId, reason: &str) -> ModerationResult {
        self.record("kick", reason)
    }

    async fn ban(
        &self,
        _guild_id: GuildId,
        _user_id: UserId,
        reason: &str,
        _delete_message_days: u8,
    ) -> ModerationResult {
        self.record("ban", reason)
    }

    async fn unban(&self, _guild_id: GuildId, _user_id: UserId) -> ModerationResult {
        self.record("unban", "")
    }

    async fn mute(
        &self,
        _guild_id: GuildId,
        _user_id: UserId,
        reason: &str,
        duration: Option<Duration>,
    ) -> ModerationResult {
        self.record("mute", reason)?;
        self.mutes.lock().unwrap().push(duration);
        Ok(())
    }

    async fn warn(&self, _guild_id: GuildId, _user_id: UserId, reason: &str) -> ModerationResult {
        self.record("warn", reason)
    }

    async fn set_nickname(&self, _guild_id: GuildId, _user_id: UserId, nickname: Option<String>) -> ModerationResult {
        self.record("set_nickname", nickname.as_deref().unwrap_or_default())
    }

    async fn add_role(&self, _guild_id: GuildId, _user_id: UserId, _role_id: RoleId, reason: &str) -> ModerationResult {
        self.record("add_role", reason)
    }

    async fn remove_role(
        &self,
        _guild_id: GuildId,
        _user_id: UserId,
        _role_id: RoleId,
        reason: &str,
    ) -> ModerationResult {
        self.record("remove_role", reason)
    }

    async fn set_channel_slowmode(&self, _channel_id: ChannelId, _seconds: u16) -> ModerationResult {
        self.record("set_channel_slowmode", "")
    }
}

/// An engine wired to in-memory collaborators
pub struct Harness {
    pub engine: AutomodEngine,
    pub store: Arc<MemoryStore>,
    pub state: Arc<FakeGuildState>,
    pub moderation: Arc<RecordingModeration>,
    pub scheduler: Arc<EventScheduler>,
}

impl Harness {
    pub fn new(store: MemoryStore) -> Self {
        Self::with_registry(store, RulePartRegistry::new())
    }

    pub fn with_registry(store: MemoryStore, registry: RulePartRegistry) -> Self {
        let store = Arc::new(store);
        let state = Arc::new(FakeGuildState::default());
        let moderation = Arc::new(RecordingModeration::default());
        let scheduler = Arc::new(EventScheduler::new());

        let services = Services {
            store: store.clone(),
            state: state.clone(),
            moderation: moderation.clone(),
            scheduler: scheduler.clone(),
            reputation: None,
        };
        let config = AutomodConfig {
            delete_delay_ms: 0,
            ..AutomodConfig::default()
        };

        Self {
            engine: AutomodEngine::new(Arc::new(registry), services, config),
            store,
            state,
            moderation,
            scheduler,
        }
    }

    pub fn channel(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            id: ChannelId::new(50),
            name: "general".to_string(),
            parent_id: None,
        }
    }

    /// Event for `message`, posted by member 5 in #general
    pub fn message_event(&self, message: MessageSnapshot) -> MessageEvent {
        MessageEvent {
            guild_id: guild(),
            member: member(5),
            channel: Some(self.channel()),
            message,
        }
    }

    pub fn trigger_context<'a>(&'a self, member: &'a MemberSnapshot, settings: &'a PartSettings) -> TriggerContext<'a> {
        TriggerContext {
            engine: &self.engine,
            guild_id: guild(),
            member,
            channel: None,
            settings,
        }
    }

    /// Record a violation for member 5 without running any triggers
    pub fn add_violation(&self, name: &str) {
        let violation = NewViolation {
            guild_id: guild(),
            user_id: UserId::new(5),
            rule_id: None,
            created_at: Utc::now(),
            name: name.to_string(),
        };
        self.store.add_violation(violation).expect("violation insert");
    }
}
