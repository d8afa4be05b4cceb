//! Ruleset parsing
//!
//! Turns persisted rows into the in-memory tree the engine evaluates. Rows that point
//! at retired or mismatched rule parts are skipped; a malformed settings payload fails
//! the whole ruleset so it is never partially applied.

use crate::AUTOMOD_TARGET;
use crate::automod::error::AutomodResult;
use crate::automod::model::{RuleBundle, RulePartKind, RuleRow, RulesetBundle, RulesetRow};
use crate::automod::registry::RulePartRegistry;
use crate::automod::rulepart::{RulePartHandle, TriggerFamily};
use crate::automod::settings::{PartSettings, parse_for_row};
use std::sync::Arc;
use tracing::warn;

/// What a parsed part belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOwner {
    Rule { ruleset_id: i64, rule_id: i64 },
    Ruleset { ruleset_id: i64 },
}

/// A row bound to its rule part and typed settings
#[derive(Debug, Clone)]
pub struct ParsedPart {
    pub id: i64,
    pub type_id: i32,
    pub owner: PartOwner,
    pub handle: RulePartHandle,
    pub settings: PartSettings,
}

impl ParsedPart {
    pub fn rule_id(&self) -> Option<i64> {
        match self.owner {
            PartOwner::Rule { rule_id, .. } => Some(rule_id),
            PartOwner::Ruleset { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn ruleset_id(&self) -> i64 {
        match self.owner {
            PartOwner::Rule { ruleset_id, .. } | PartOwner::Ruleset { ruleset_id } => ruleset_id,
        }
    }

    pub fn kind(&self) -> RulePartKind {
        self.handle.kind()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub model: RuleRow,
    pub triggers: Vec<Arc<ParsedPart>>,
    pub conditions: Vec<Arc<ParsedPart>>,
    pub effects: Vec<Arc<ParsedPart>>,
}

impl ParsedRule {
    /// Triggers of one event family, in declaration order
    pub fn triggers_of(&self, family: TriggerFamily) -> impl Iterator<Item = &Arc<ParsedPart>> {
        self.triggers
            .iter()
            .filter(move |t| t.handle.trigger_family() == Some(family))
    }
}

#[derive(Debug, Clone)]
pub struct ParsedRuleset {
    pub model: RulesetRow,
    pub conditions: Vec<Arc<ParsedPart>>,
    pub rules: Vec<Arc<ParsedRule>>,
}

/// Resolve a row's rule part, or `None` if the row must be skipped
fn resolve(
    registry: &RulePartRegistry,
    guild_id: u64,
    row_id: i64,
    type_id: i32,
    kind: i32,
) -> Option<RulePartHandle> {
    let Some(handle) = registry.lookup(type_id) else {
        warn!(
            target: AUTOMOD_TARGET,
            guild_id,
            part_id = row_id,
            type_id,
            "Skipping rule data with unknown type id"
        );
        return None;
    };

    if RulePartKind::from_persisted(kind) != Some(handle.kind()) {
        warn!(
            target: AUTOMOD_TARGET,
            guild_id,
            part_id = row_id,
            type_id,
            kind,
            expected = %handle.kind(),
            "Skipping rule data whose kind does not match its rule part"
        );
        return None;
    }

    Some(handle.clone())
}

fn parse_rule(
    registry: &RulePartRegistry,
    bundle: &RuleBundle,
    ruleset_id: i64,
) -> AutomodResult<ParsedRule> {
    let mut rule = ParsedRule {
        model: bundle.rule.clone(),
        triggers: Vec::new(),
        conditions: Vec::new(),
        effects: Vec::new(),
    };

    for row in &bundle.data {
        let Some(handle) = resolve(registry, row.guild_id.get(), row.id, row.type_id, row.kind)
        else {
            continue;
        };

        let settings = parse_for_row(handle.settings_type(), &row.settings, row.id, row.type_id)?;
        let part = Arc::new(ParsedPart {
            id: row.id,
            type_id: row.type_id,
            owner: PartOwner::Rule {
                ruleset_id,
                rule_id: bundle.rule.id,
            },
            settings,
            handle,
        });

        match part.kind() {
            RulePartKind::Trigger => rule.triggers.push(part),
            RulePartKind::Condition => rule.conditions.push(part),
            RulePartKind::Effect => rule.effects.push(part),
        }
    }

    Ok(rule)
}

/// Build the parsed tree of one ruleset
pub fn parse_ruleset(
    registry: &RulePartRegistry,
    bundle: &RulesetBundle,
) -> AutomodResult<ParsedRuleset> {
    let ruleset_id = bundle.ruleset.id;

    let mut conditions = Vec::with_capacity(bundle.conditions.len());
    for row in &bundle.conditions {
        let Some(handle) = resolve(registry, row.guild_id.get(), row.id, row.type_id, row.kind)
        else {
            continue;
        };
        if handle.kind() != RulePartKind::Condition {
            warn!(
                target: AUTOMOD_TARGET,
                ruleset_id,
                part_id = row.id,
                type_id = row.type_id,
                "Skipping ruleset-level part that is not a condition"
            );
            continue;
        }

        let settings = parse_for_row(handle.settings_type(), &row.settings, row.id, row.type_id)?;
        conditions.push(Arc::new(ParsedPart {
            id: row.id,
            type_id: row.type_id,
            owner: PartOwner::Ruleset { ruleset_id },
            settings,
            handle,
        }));
    }

    let rules = bundle
        .rules
        .iter()
        .map(|rule| parse_rule(registry, rule, ruleset_id).map(Arc::new))
        .collect::<AutomodResult<Vec<_>>>()?;

    Ok(ParsedRuleset {
        model: bundle.ruleset.clone(),
        conditions,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::error::AutomodError;
    use crate::automod::registry::ids;
    use crate::automod::testing::{condition_row, rule_bundle, rule_data, ruleset_bundle};
    use serde_json::json;

    #[test]
    fn test_rows_split_by_kind_in_order() {
        let registry = RulePartRegistry::new();
        let bundle = ruleset_bundle(
            1,
            "Links",
            vec![rule_bundle(
                1,
                10,
                "No links",
                vec![
                    rule_data(100, 10, RulePartKind::Effect, ids::WARN, json!({"CustomReason": "a"})),
                    rule_data(101, 10, RulePartKind::Trigger, ids::ANY_LINK, json!(null)),
                    rule_data(102, 10, RulePartKind::Condition, ids::ROLES_WHITELIST, json!({"Roles": [1]})),
                    rule_data(103, 10, RulePartKind::Effect, ids::DELETE_MESSAGE, json!(null)),
                ],
            )],
            vec![condition_row(200, 1, ids::IGNORE_BOTS, json!(null))],
        );

        let parsed = parse_ruleset(&registry, &bundle).expect("ruleset should parse");
        assert_eq!(parsed.conditions.len(), 1);
        assert_eq!(parsed.conditions[0].owner, PartOwner::Ruleset { ruleset_id: 1 });

        let rule = &parsed.rules[0];
        assert_eq!(rule.triggers.len(), 1);
        assert_eq!(rule.conditions.len(), 1);
        let effect_ids: Vec<i64> = rule.effects.iter().map(|e| e.id).collect();
        assert_eq!(effect_ids, vec![100, 103]);
        assert_eq!(rule.triggers[0].rule_id(), Some(10));
        assert_eq!(rule.triggers[0].ruleset_id(), 1);
    }

    #[test]
    fn test_unknown_and_mismatched_rows_are_skipped() {
        let registry = RulePartRegistry::new();
        let bundle = ruleset_bundle(
            1,
            "Links",
            vec![rule_bundle(
                1,
                10,
                "No links",
                vec![
                    rule_data(100, 10, RulePartKind::Trigger, 9_999, json!(null)),
                    rule_data(101, 10, RulePartKind::Effect, ids::ANY_LINK, json!(null)),
                    rule_data(102, 10, RulePartKind::Trigger, ids::ANY_LINK, json!(null)),
                ],
            )],
            vec![condition_row(200, 1, ids::WARN, json!(null))],
        );

        let parsed = parse_ruleset(&registry, &bundle).expect("ruleset should parse");
        assert!(parsed.conditions.is_empty());
        assert_eq!(parsed.rules[0].triggers.len(), 1);
        assert_eq!(parsed.rules[0].triggers[0].id, 102);
        assert!(parsed.rules[0].effects.is_empty());
    }

    #[test]
    fn test_malformed_settings_fail_the_ruleset() {
        let registry = RulePartRegistry::new();
        let bundle = ruleset_bundle(
            1,
            "Mentions",
            vec![rule_bundle(
                1,
                10,
                "Mass mention",
                vec![rule_data(
                    100,
                    10,
                    RulePartKind::Trigger,
                    ids::MENTIONS,
                    json!({"Treshold": "lots"}),
                )],
            )],
            vec![],
        );

        let err = parse_ruleset(&registry, &bundle).unwrap_err();
        assert!(matches!(
            err,
            AutomodError::InvalidSettings {
                part_id: 100,
                type_id: ids::MENTIONS,
                ..
            }
        ));
    }

    #[test]
    fn test_settings_type_matches_part() {
        let registry = RulePartRegistry::new();
        let bundle = ruleset_bundle(
            1,
            "Words",
            vec![rule_bundle(
                1,
                10,
                "Bad words",
                vec![rule_data(100, 10, RulePartKind::Trigger, ids::WORDS_BLACKLIST, json!({"ListID": 4}))],
            )],
            vec![],
        );
        let parsed = parse_ruleset(&registry, &bundle).unwrap();
        let part = &parsed.rules[0].triggers[0];
        assert_eq!(part.settings.settings_type(), part.handle.settings_type());
    }
}
