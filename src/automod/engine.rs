//! Trigger matching and the condition/effect pipeline
//!
//! An evaluation pass matches one event against every enabled ruleset of a guild,
//! deduplicates the fired rules, then hands each ruleset to its own task which checks
//! ruleset conditions, rule conditions and finally applies effects in order.

use crate::automod::context::{ChannelSnapshot, MemberSnapshot, MessageSnapshot, TriggeredRuleData};
use crate::automod::cooldown::ChannelCooldowns;
use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::model::{TriggeredRuleLog, Violation};
use crate::automod::parser::{ParsedPart, ParsedRule, ParsedRuleset, parse_ruleset};
use crate::automod::registry::RulePartRegistry;
use crate::automod::rulepart::{RulePartHandle, TriggerContext, TriggerFamily, TriggerHandle};
use crate::automod::services::Services;
use crate::automod::settings::PartSettings;
use crate::config::AutomodConfig;
use crate::{AUTOMOD_TARGET, logging};
use chrono::Utc;
use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Compiled patterns kept before the regex cache is flushed
const REGEX_CACHE_LIMIT: usize = 512;

/// Future returned by violation re-entry
pub type EvaluationFuture = Pin<Box<dyn Future<Output = AutomodResult<EvaluationOutcome>> + Send>>;

/// A posted or edited message, as seen by the engine
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub guild_id: GuildId,
    pub member: MemberSnapshot,
    pub channel: Option<ChannelSnapshot>,
    pub message: MessageSnapshot,
}

/// What one evaluation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationOutcome {
    /// Rules whose triggers fired, deduplicated, in match order
    pub triggered_rules: Vec<i64>,
    /// Every trigger part that fired
    pub activated_triggers: Vec<i64>,
    /// Rules that passed their conditions and had effects applied
    pub applied_rules: Vec<i64>,
}

#[derive(Default)]
struct TriggerMatches {
    rules: Vec<Arc<ParsedRule>>,
    activated: Vec<Arc<ParsedPart>>,
}

impl TriggerMatches {
    fn record(&mut self, rule: &Arc<ParsedRule>, part: &Arc<ParsedPart>) {
        if !self.rules.iter().any(|r| r.model.id == rule.model.id) {
            self.rules.push(Arc::clone(rule));
        }
        self.activated.push(Arc::clone(part));
    }
}

pub struct EngineInner {
    registry: Arc<RulePartRegistry>,
    services: Services,
    config: AutomodConfig,
    rulesets: DashMap<GuildId, Arc<Vec<Arc<ParsedRuleset>>>>,
    regexes: DashMap<String, Arc<Regex>>,
    cooldowns: ChannelCooldowns,
}

/// The automod engine; cheap to clone
#[derive(Clone)]
pub struct AutomodEngine {
    inner: Arc<EngineInner>,
}

impl AutomodEngine {
    pub fn new(registry: Arc<RulePartRegistry>, services: Services, config: AutomodConfig) -> Self {
        let cooldowns = ChannelCooldowns::new(config.slowmode_cooldown());
        Self {
            inner: Arc::new(EngineInner {
                registry,
                services,
                config,
                rulesets: DashMap::new(),
                regexes: DashMap::new(),
                cooldowns,
            }),
        }
    }

    pub fn registry(&self) -> &RulePartRegistry {
        &self.inner.registry
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    pub fn config(&self) -> &AutomodConfig {
        &self.inner.config
    }

    pub fn cooldowns(&self) -> &ChannelCooldowns {
        &self.inner.cooldowns
    }

    /// Compile `pattern`, reusing earlier compilations
    pub fn regex(&self, pattern: &str) -> AutomodResult<Arc<Regex>> {
        if let Some(re) = self.inner.regexes.get(pattern) {
            return Ok(Arc::clone(&re));
        }

        let re = Arc::new(Regex::new(pattern)?);
        if self.inner.regexes.len() >= REGEX_CACHE_LIMIT {
            self.inner.regexes.clear();
        }
        self.inner
            .regexes
            .insert(pattern.to_string(), Arc::clone(&re));
        Ok(re)
    }

    /// Drop the cached rulesets of a guild so the next pass reloads them
    pub fn invalidate(&self, guild_id: GuildId) {
        self.inner.rulesets.remove(&guild_id);
    }

    /// Parsed rulesets of a guild; rulesets that fail to parse are left out
    pub async fn rulesets(&self, guild_id: GuildId) -> AutomodResult<Arc<Vec<Arc<ParsedRuleset>>>> {
        if let Some(cached) = self.inner.rulesets.get(&guild_id) {
            return Ok(Arc::clone(&cached));
        }

        let bundles = self.services().store.rulesets(guild_id).await?;
        let mut parsed = Vec::with_capacity(bundles.len());
        for bundle in &bundles {
            match parse_ruleset(self.registry(), bundle) {
                Ok(ruleset) => parsed.push(Arc::new(ruleset)),
                Err(e) => error!(
                    target: AUTOMOD_TARGET,
                    guild_id = %guild_id,
                    ruleset_id = bundle.ruleset.id,
                    ruleset = %bundle.ruleset.name,
                    error = %e,
                    "Skipping ruleset that failed to parse"
                ),
            }
        }

        let parsed = Arc::new(parsed);
        self.inner.rulesets.insert(guild_id, Arc::clone(&parsed));
        Ok(parsed)
    }

    pub async fn check_message(&self, event: MessageEvent) -> AutomodResult<EvaluationOutcome> {
        let data = TriggeredRuleData::new(event.guild_id, event.member)
            .with_channel(event.channel)
            .with_message(Some(event.message));
        self.evaluate(TriggerFamily::Message, data).await
    }

    pub async fn check_nickname(
        &self,
        guild_id: GuildId,
        member: MemberSnapshot,
    ) -> AutomodResult<EvaluationOutcome> {
        self.evaluate(TriggerFamily::Nickname, TriggeredRuleData::new(guild_id, member))
            .await
    }

    pub async fn check_username(
        &self,
        guild_id: GuildId,
        member: MemberSnapshot,
    ) -> AutomodResult<EvaluationOutcome> {
        self.evaluate(TriggerFamily::Username, TriggeredRuleData::new(guild_id, member))
            .await
    }

    pub async fn check_join(
        &self,
        guild_id: GuildId,
        member: MemberSnapshot,
    ) -> AutomodResult<EvaluationOutcome> {
        self.evaluate(TriggerFamily::Join, TriggeredRuleData::new(guild_id, member))
            .await
    }

    /// Evaluate violation listeners after a violation named `name` was added
    pub fn check_violation_triggers(&self, data: TriggeredRuleData, name: String) -> EvaluationFuture {
        let engine = self.clone();
        Box::pin(async move { engine.evaluate_violation(data, &name).await })
    }

    /// Run [`Self::check_violation_triggers`] on its own task
    pub fn spawn_violation_check(&self, data: TriggeredRuleData, name: String) -> JoinHandle<()> {
        let guild_id = data.guild_id;
        let user_id = data.member.user_id;
        let fut = self.check_violation_triggers(data, name);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                error!(
                    target: AUTOMOD_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    error = %e,
                    "Violation evaluation failed"
                );
            }
        })
    }

    async fn evaluate(
        &self,
        family: TriggerFamily,
        base: TriggeredRuleData,
    ) -> AutomodResult<EvaluationOutcome> {
        let rulesets = self.rulesets(base.guild_id).await?;

        let mut matches = TriggerMatches::default();
        for ruleset in rulesets.iter().filter(|r| r.model.enabled) {
            for rule in &ruleset.rules {
                for part in rule.triggers_of(family) {
                    let ctx = TriggerContext {
                        engine: self,
                        guild_id: base.guild_id,
                        member: &base.member,
                        channel: base.channel.as_ref(),
                        settings: &part.settings,
                    };
                    if self.run_trigger(part, &ctx, base.message.as_ref()).await {
                        matches.record(rule, part);
                    }
                }
            }
        }

        self.dispatch(&rulesets, matches, base).await
    }

    async fn evaluate_violation(
        &self,
        base: TriggeredRuleData,
        name: &str,
    ) -> AutomodResult<EvaluationOutcome> {
        if base.recursion_counter > self.config().recursion_limit {
            warn!(
                target: AUTOMOD_TARGET,
                guild_id = %base.guild_id,
                user_id = %base.member.user_id,
                violation = name,
                depth = base.recursion_counter,
                "Violation cascade reached the recursion limit, stopping"
            );
            return Ok(EvaluationOutcome::default());
        }

        let violations = self
            .services()
            .store
            .violations(base.guild_id, base.member.user_id, name)
            .await?;
        let rulesets = self.rulesets(base.guild_id).await?;

        let mut matches = TriggerMatches::default();
        for ruleset in rulesets.iter().filter(|r| r.model.enabled) {
            let mut candidates = Vec::new();
            for rule in &ruleset.rules {
                for part in rule.triggers_of(TriggerFamily::Violation) {
                    if let PartSettings::Violations(settings) = &part.settings {
                        if settings.name == name {
                            candidates.push((rule, part, settings.threshold));
                        }
                    }
                }
            }

            let mut fired: Vec<_> = candidates
                .into_iter()
                .filter(|(_, part, _)| self.run_listener(part, &base, &violations, false))
                .collect();
            fired.sort_by(|a, b| b.2.cmp(&a.2));

            let mut triggered_higher = false;
            for (rule, part, _) in fired {
                if self.run_listener(part, &base, &violations, triggered_higher) {
                    matches.record(rule, part);
                    triggered_higher = true;
                }
            }
        }

        if !matches.rules.is_empty() {
            info!(
                target: AUTOMOD_TARGET,
                guild_id = %base.guild_id,
                user_id = %base.member.user_id,
                violation = name,
                rules = matches.rules.len(),
                "Violation rules triggered"
            );
        }
        self.dispatch(&rulesets, matches, base).await
    }

    /// Evaluate a trigger predicate; errors and timeouts count as no match
    async fn run_trigger(
        &self,
        part: &ParsedPart,
        ctx: &TriggerContext<'_>,
        message: Option<&MessageSnapshot>,
    ) -> bool {
        let check = async {
            match &part.handle {
                RulePartHandle::Trigger(TriggerHandle::Message(trigger)) => match message {
                    Some(message) => trigger.check_message(ctx, message).await,
                    None => Ok(false),
                },
                RulePartHandle::Trigger(TriggerHandle::Nickname(trigger)) => {
                    trigger.check_nickname(ctx).await
                }
                RulePartHandle::Trigger(TriggerHandle::Username(trigger)) => {
                    trigger.check_username(ctx).await
                }
                RulePartHandle::Trigger(TriggerHandle::Join(trigger)) => {
                    trigger.check_join(ctx).await
                }
                _ => Ok(false),
            }
        };

        match tokio::time::timeout(self.config().trigger_timeout(), check).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                warn!(
                    target: AUTOMOD_TARGET,
                    guild_id = %ctx.guild_id,
                    rule_id = ?part.rule_id(),
                    part_id = part.id,
                    part = part.handle.name(),
                    error = %e,
                    "Trigger failed, treating as no match"
                );
                false
            }
            Err(_) => {
                warn!(
                    target: AUTOMOD_TARGET,
                    guild_id = %ctx.guild_id,
                    rule_id = ?part.rule_id(),
                    part_id = part.id,
                    part = part.handle.name(),
                    "Trigger timed out, treating as no match"
                );
                false
            }
        }
    }

    fn run_listener(
        &self,
        part: &ParsedPart,
        data: &TriggeredRuleData,
        violations: &[Violation],
        triggered_higher: bool,
    ) -> bool {
        let RulePartHandle::Trigger(TriggerHandle::Violation(listener)) = &part.handle else {
            return false;
        };
        match listener.check_user(data, violations, &part.settings, triggered_higher) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    target: AUTOMOD_TARGET,
                    guild_id = %data.guild_id,
                    rule_id = ?part.rule_id(),
                    part_id = part.id,
                    error = %e,
                    "Violation trigger failed, treating as no match"
                );
                false
            }
        }
    }

    /// Fan the matched rules out to one task per ruleset and wait for all of them
    async fn dispatch(
        &self,
        rulesets: &[Arc<ParsedRuleset>],
        matches: TriggerMatches,
        base: TriggeredRuleData,
    ) -> AutomodResult<EvaluationOutcome> {
        let mut outcome = EvaluationOutcome {
            triggered_rules: matches.rules.iter().map(|r| r.model.id).collect(),
            activated_triggers: matches.activated.iter().map(|p| p.id).collect(),
            applied_rules: Vec::new(),
        };
        if matches.rules.is_empty() {
            return Ok(outcome);
        }

        let mut tasks = JoinSet::new();
        for ruleset in rulesets {
            let rules: Vec<_> = matches
                .rules
                .iter()
                .filter(|r| r.model.ruleset_id == ruleset.model.id)
                .cloned()
                .collect();
            if rules.is_empty() {
                continue;
            }

            let mut data = base.clone();
            data.ruleset = Some(Arc::clone(ruleset));
            data.triggered_rules = rules;
            data.activated_triggers = matches.activated.clone();
            tasks.spawn(self.clone().process_ruleset(data));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(applied) => outcome.applied_rules.extend(applied),
                Err(e) => error!(target: AUTOMOD_TARGET, error = %e, "Ruleset task failed"),
            }
        }
        Ok(outcome)
    }

    async fn process_ruleset(self, mut data: TriggeredRuleData) -> Vec<i64> {
        let Some(ruleset) = data.ruleset.clone() else {
            return Vec::new();
        };

        if !self.conditions_met(&ruleset.conditions, &data).await {
            debug!(
                target: AUTOMOD_TARGET,
                guild_id = %data.guild_id,
                ruleset = %ruleset.model.name,
                "Ruleset conditions not met"
            );
            return Vec::new();
        }

        let mut passed = Vec::new();
        for rule in data.triggered_rules.clone() {
            data.current_rule = Some(Arc::clone(&rule));
            if self.conditions_met(&rule.conditions, &data).await {
                passed.push(rule);
            }
        }

        let mut log_entries = Vec::with_capacity(passed.len());
        for rule in &passed {
            data.current_rule = Some(Arc::clone(rule));
            logging::log_rule_triggered(&data);
            for effect in &rule.effects {
                self.apply_effect(effect, &data).await;
            }
            log_entries.push(self.log_entry(&data));
        }

        if !log_entries.is_empty() {
            if let Err(e) = self
                .services()
                .store
                .log_triggered(log_entries, self.config().triggered_log_limit)
                .await
            {
                error!(
                    target: AUTOMOD_TARGET,
                    guild_id = %data.guild_id,
                    error = %e,
                    "Failed to write triggered rule log"
                );
            }
        }

        passed.iter().map(|r| r.model.id).collect()
    }

    /// Conditions in order; the first unmet, failing or timed out one stops the check
    async fn conditions_met(&self, conditions: &[Arc<ParsedPart>], data: &TriggeredRuleData) -> bool {
        for part in conditions {
            let RulePartHandle::Condition(condition) = &part.handle else {
                continue;
            };

            let check = condition.is_met(self, data, &part.settings);
            match tokio::time::timeout(self.config().trigger_timeout(), check).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return false,
                Ok(Err(e)) => {
                    warn!(
                        target: AUTOMOD_TARGET,
                        guild_id = %data.guild_id,
                        rule_id = ?part.rule_id(),
                        part_id = part.id,
                        part = part.handle.name(),
                        error = %e,
                        "Condition failed, treating as not met"
                    );
                    return false;
                }
                Err(_) => {
                    warn!(
                        target: AUTOMOD_TARGET,
                        guild_id = %data.guild_id,
                        rule_id = ?part.rule_id(),
                        part_id = part.id,
                        part = part.handle.name(),
                        "Condition timed out, treating as not met"
                    );
                    return false;
                }
            }
        }
        true
    }

    async fn apply_effect(&self, part: &ParsedPart, data: &TriggeredRuleData) {
        let RulePartHandle::Effect(effect) = &part.handle else {
            return;
        };

        let result = tokio::time::timeout(
            self.config().effect_timeout(),
            effect.apply(self, data, &part.settings),
        )
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_already_applied() => {
                debug!(
                    target: AUTOMOD_TARGET,
                    guild_id = %data.guild_id,
                    part_id = part.id,
                    "Effect target already in desired state: {e}"
                );
            }
            Ok(Err(e)) => log_effect_failure(part, data, &e),
            Err(_) => error!(
                target: AUTOMOD_TARGET,
                guild_id = %data.guild_id,
                rule_id = ?part.rule_id(),
                part_id = part.id,
                effect = part.handle.name(),
                "Effect timed out"
            ),
        }
    }

    fn log_entry(&self, data: &TriggeredRuleData) -> TriggeredRuleLog {
        let rule = data.current_rule.as_ref();
        let trigger = data.current_rule_triggers().next();

        TriggeredRuleLog {
            id: 0,
            created_at: Utc::now(),
            channel_id: data.channel.as_ref().map(|c| c.id),
            channel_name: data
                .channel
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            guild_id: data.guild_id,
            trigger_id: trigger.map(|t| t.id),
            trigger_type_id: trigger.map(|t| t.type_id).unwrap_or_default(),
            rule_id: rule.map(|r| r.model.id),
            rule_name: rule.map(|r| r.model.name.clone()).unwrap_or_default(),
            ruleset_name: data
                .ruleset
                .as_ref()
                .map(|r| r.model.name.clone())
                .unwrap_or_default(),
            user_id: data.member.user_id,
            user_name: data.member.username.clone(),
            extradata: serde_json::json!({
                "message": data.message,
                "triggers": summarize_triggers(&data.activated_triggers),
            }),
        }
    }
}

fn log_effect_failure(part: &ParsedPart, data: &TriggeredRuleData, e: &AutomodError) {
    error!(
        target: AUTOMOD_TARGET,
        guild_id = %data.guild_id,
        user_id = %data.member.user_id,
        rule_id = ?part.rule_id(),
        part_id = part.id,
        effect = part.handle.name(),
        error = %e,
        "Effect failed"
    );
}

/// Activated triggers grouped by type, merging duplicates where the part supports it
fn summarize_triggers(parts: &[Arc<ParsedPart>]) -> Vec<serde_json::Value> {
    let mut by_type: Vec<(i32, Vec<&Arc<ParsedPart>>)> = Vec::new();
    let mut index: HashMap<i32, usize> = HashMap::new();
    for part in parts {
        match index.get(&part.type_id) {
            Some(&i) => by_type[i].1.push(part),
            None => {
                index.insert(part.type_id, by_type.len());
                by_type.push((part.type_id, vec![part]));
            }
        }
    }

    let describe = |part: &ParsedPart, settings: &PartSettings| {
        serde_json::json!({
            "type_id": part.type_id,
            "name": part.handle.name(),
            "settings": settings.to_value(),
        })
    };

    let mut summary = Vec::new();
    for (_, group) in by_type {
        let first = group[0];
        let settings: Vec<&PartSettings> = group.iter().map(|p| &p.settings).collect();
        match (group.len() > 1)
            .then(|| first.handle.merge_duplicates(&settings))
            .flatten()
        {
            Some(merged) => summary.push(describe(first, &merged)),
            None => summary.extend(group.iter().map(|p| describe(p, &p.settings))),
        }
    }
    summary
}
