//! In-memory automod store with YAML snapshots

use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::model::{
    AutomodList, NewViolation, RuleRow, RulesetBundle, TriggeredRuleLog, Violation,
};
use crate::automod::services::AutomodStore;
use dashmap::DashMap;
use poise::serenity_prelude::{GuildId, UserId};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

const RULESETS_FILE: &str = "automod_rulesets.yaml";
const LISTS_FILE: &str = "automod_lists.yaml";
const VIOLATIONS_FILE: &str = "automod_violations.yaml";
const TRIGGERED_LOG_FILE: &str = "automod_triggered_log.yaml";

/// Store backed by `DashMap`s
#[derive(Debug)]
pub struct MemoryStore {
    // ruleset id -> ruleset with its rules and conditions
    rulesets: DashMap<i64, RulesetBundle>,
    // list id -> list
    lists: DashMap<i64, AutomodList>,
    // violation id -> violation
    violations: DashMap<i64, Violation>,
    // guild -> log rows, oldest first
    triggered_log: DashMap<GuildId, Vec<TriggeredRuleLog>>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one snapshot table; only a missing file counts as empty
pub(crate) async fn read_yaml<T: DeserializeOwned>(path: &Path) -> AutomodResult<Vec<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(AutomodError::Store(format!("Failed to read {}: {e}", path.display())));
        }
    };
    serde_yaml::from_str(&content)
        .map_err(|e| AutomodError::Store(format!("Failed to parse {}: {e}", path.display())))
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rulesets: DashMap::new(),
            lists: DashMap::new(),
            violations: DashMap::new(),
            triggered_log: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Load the snapshots in `dir`; missing files leave their table empty
    ///
    /// # Errors
    ///
    /// Fails when a snapshot exists but cannot be read or parsed, so a later save
    /// never overwrites data that was not loaded.
    pub async fn load(dir: impl AsRef<Path>) -> AutomodResult<Self> {
        let dir = dir.as_ref();
        let store = Self::new();

        for bundle in read_yaml::<RulesetBundle>(&dir.join(RULESETS_FILE)).await? {
            store.insert_ruleset(bundle);
        }
        for list in read_yaml::<AutomodList>(&dir.join(LISTS_FILE)).await? {
            store.insert_list(list);
        }

        let mut max_id = 0;
        for violation in read_yaml::<Violation>(&dir.join(VIOLATIONS_FILE)).await? {
            max_id = max_id.max(violation.id);
            store.violations.insert(violation.id, violation);
        }
        for entry in read_yaml::<TriggeredRuleLog>(&dir.join(TRIGGERED_LOG_FILE)).await? {
            max_id = max_id.max(entry.id);
            store.triggered_log.entry(entry.guild_id).or_default().push(entry);
        }
        store.next_id.store(max_id + 1, Ordering::SeqCst);

        info!(
            "Loaded {} rulesets, {} lists and {} violations from {}",
            store.rulesets.len(),
            store.lists.len(),
            store.violations.len(),
            dir.display()
        );
        Ok(store)
    }

    /// Write every table to `dir`
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created, a table cannot be serialized or a
    /// file cannot be written.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir: PathBuf = dir.as_ref().to_path_buf();
        if !dir.exists() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let mut rulesets: Vec<RulesetBundle> = self.rulesets.iter().map(|e| e.value().clone()).collect();
        rulesets.sort_by_key(|b| b.ruleset.id);
        tokio::fs::write(dir.join(RULESETS_FILE), serde_yaml::to_string(&rulesets)?).await?;

        let mut lists: Vec<AutomodList> = self.lists.iter().map(|e| e.value().clone()).collect();
        lists.sort_by_key(|l| l.id);
        tokio::fs::write(dir.join(LISTS_FILE), serde_yaml::to_string(&lists)?).await?;

        let mut violations: Vec<Violation> = self.violations.iter().map(|e| e.value().clone()).collect();
        violations.sort_by_key(|v| v.id);
        tokio::fs::write(dir.join(VIOLATIONS_FILE), serde_yaml::to_string(&violations)?).await?;

        let log: Vec<TriggeredRuleLog> = self
            .triggered_log
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        tokio::fs::write(dir.join(TRIGGERED_LOG_FILE), serde_yaml::to_string(&log)?).await?;

        Ok(())
    }

    pub fn insert_ruleset(&self, bundle: RulesetBundle) {
        self.rulesets.insert(bundle.ruleset.id, bundle);
    }

    pub fn insert_list(&self, list: AutomodList) {
        self.lists.insert(list.id, list);
    }

    /// Flip the enabled flag of the guild's ruleset called `name` (case-insensitive)
    ///
    /// Returns the new state, or `None` if there is no such ruleset.
    pub fn toggle_ruleset(&self, guild_id: GuildId, name: &str) -> Option<bool> {
        let mut entry = self.rulesets.iter_mut().find(|e| {
            e.ruleset.guild_id == guild_id && e.ruleset.name.eq_ignore_ascii_case(name)
        })?;
        entry.ruleset.enabled = !entry.ruleset.enabled;
        Some(entry.ruleset.enabled)
    }

    #[must_use]
    pub fn rule(&self, rule_id: i64) -> Option<RuleRow> {
        self.rulesets.iter().find_map(|e| {
            e.rules
                .iter()
                .find(|r| r.rule.id == rule_id)
                .map(|r| r.rule.clone())
        })
    }

    /// Log rows of a guild, newest first
    #[must_use]
    pub fn triggered_log(
        &self,
        guild_id: GuildId,
        user_id: Option<UserId>,
        limit: usize,
        offset: usize,
    ) -> Vec<TriggeredRuleLog> {
        self.triggered_log
            .get(&guild_id)
            .map(|rows| {
                rows.iter()
                    .rev()
                    .filter(|r| user_id.is_none_or(|u| r.user_id == u))
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every violation of a guild, oldest first
    #[must_use]
    pub fn all_violations(&self, guild_id: GuildId) -> Vec<Violation> {
        let mut violations: Vec<Violation> = self
            .violations
            .iter()
            .filter(|e| e.guild_id == guild_id)
            .map(|e| e.value().clone())
            .collect();
        violations.sort_by_key(|v| (v.created_at, v.id));
        violations
    }

    pub fn add_violation(&self, violation: NewViolation) -> AutomodResult<Violation> {
        if violation.name.is_empty() {
            return Err(AutomodError::Store("violation name must not be empty".to_string()));
        }
        let row = Violation {
            id: self.next_id(),
            guild_id: violation.guild_id,
            user_id: violation.user_id,
            rule_id: violation.rule_id,
            created_at: violation.created_at,
            name: violation.name,
        };
        self.violations.insert(row.id, row.clone());
        Ok(row)
    }

    #[must_use]
    pub fn violation_count(&self, guild_id: GuildId) -> usize {
        self.violations.iter().filter(|e| e.guild_id == guild_id).count()
    }

    fn bump_trigger_counter(&self, rule_id: i64) {
        for mut bundle in self.rulesets.iter_mut() {
            if let Some(rule) = bundle.rules.iter_mut().find(|r| r.rule.id == rule_id) {
                rule.rule.trigger_counter += 1;
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl AutomodStore for MemoryStore {
    async fn rulesets(&self, guild_id: GuildId) -> AutomodResult<Vec<RulesetBundle>> {
        let mut bundles: Vec<RulesetBundle> = self
            .rulesets
            .iter()
            .filter(|e| e.ruleset.guild_id == guild_id)
            .map(|e| e.value().clone())
            .collect();
        bundles.sort_by_key(|b| b.ruleset.id);
        Ok(bundles)
    }

    async fn list(&self, guild_id: GuildId, list_id: i64) -> AutomodResult<Option<AutomodList>> {
        Ok(self
            .lists
            .get(&list_id)
            .filter(|l| l.guild_id == guild_id)
            .map(|l| l.value().clone()))
    }

    async fn insert_violation(&self, violation: NewViolation) -> AutomodResult<Violation> {
        self.add_violation(violation)
    }

    async fn violations(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        name: &str,
    ) -> AutomodResult<Vec<Violation>> {
        Ok(self
            .all_violations(guild_id)
            .into_iter()
            .filter(|v| v.user_id == user_id && v.name == name)
            .collect())
    }

    async fn clear_violations(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        name: Option<String>,
    ) -> AutomodResult<usize> {
        let before = self.violations.len();
        self.violations.retain(|_, v| {
            !(v.guild_id == guild_id
                && v.user_id == user_id
                && name.as_deref().is_none_or(|n| v.name == n))
        });
        Ok(before - self.violations.len())
    }

    async fn log_triggered(&self, entries: Vec<TriggeredRuleLog>, retain: usize) -> AutomodResult<()> {
        for mut entry in entries {
            entry.id = self.next_id();
            if let Some(rule_id) = entry.rule_id {
                self.bump_trigger_counter(rule_id);
            }

            let mut rows = self.triggered_log.entry(entry.guild_id).or_default();
            rows.push(entry);
            if rows.len() > retain {
                let excess = rows.len() - retain;
                rows.drain(..excess);
            }
        }
        Ok(())
    }
}
