//! Trigger catalog

use crate::automod::context::{MemberSnapshot, MessageSnapshot, TriggeredRuleData};
use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::model::Violation;
use crate::automod::rulepart::{
    JoinListener, MessageTrigger, NicknameListener, RulePart, TriggerContext, UsernameListener,
    ViolationListener,
};
use crate::automod::settings::{
    MentionsSettings, PartSettings, SettingDef, SettingType, SettingsType, expect_settings,
};
use crate::automod::text;
use chrono::{Duration, Utc};
use poise::serenity_prelude::GuildId;
use std::collections::HashSet;

/// Lowercased entries of a guild list
async fn load_list(
    ctx: &TriggerContext<'_>,
    guild_id: GuildId,
    list_id: i64,
) -> AutomodResult<HashSet<String>> {
    let list = ctx
        .engine
        .services()
        .store
        .list(guild_id, list_id)
        .await?
        .ok_or_else(|| AutomodError::Store(format!("list {list_id} not found")))?;
    Ok(list
        .content
        .iter()
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect())
}

/// Messages from the current one backwards, staying inside `window`
///
/// History arrives newest first; entries newer than `message` are skipped.
fn within_window<'a>(
    message: &'a MessageSnapshot,
    history: &'a [MessageSnapshot],
    window: Duration,
) -> impl Iterator<Item = &'a MessageSnapshot> {
    std::iter::once(message).chain(
        history
            .iter()
            .filter(move |m| m.id != message.id && m.timestamp <= message.timestamp)
            .take_while(move |m| message.timestamp - m.timestamp <= window),
    )
}

async fn channel_history(
    ctx: &TriggerContext<'_>,
    message: &MessageSnapshot,
    cross_channel: bool,
) -> AutomodResult<Vec<MessageSnapshot>> {
    let channel = (!cross_channel).then_some(message.channel_id);
    ctx.engine
        .services()
        .state
        .recent_messages(ctx.guild_id, channel, ctx.engine.config().history_limit)
        .await
}

fn list_fields() -> Vec<SettingDef> {
    vec![SettingDef::new("List", "ListID", SettingType::List)]
}

fn regex_fields() -> Vec<SettingDef> {
    vec![SettingDef::new("Regex", "Regex", SettingType::String).range(1, 250)]
}

///////////////////////////////////////////////////////

pub struct MentionsTrigger;

impl RulePart for MentionsTrigger {
    fn name(&self) -> &'static str {
        "Message mentions"
    }

    fn description(&self) -> &'static str {
        "Triggers when a message includes x or more unique mentions"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Mentions
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Threshold", "Treshold", SettingType::Int)
                .range(0, 500)
                .default_value(4),
        ]
    }

    /// The strictest instance wins
    fn merge_duplicates(&self, settings: &[&PartSettings]) -> Option<PartSettings> {
        settings
            .iter()
            .filter_map(|s| match s {
                PartSettings::Mentions(m) => Some(m.threshold),
                _ => None,
            })
            .min()
            .map(|threshold| PartSettings::Mentions(MentionsSettings { threshold }))
    }
}

#[async_trait::async_trait]
impl MessageTrigger for MentionsTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, Mentions, self.name())?;
        let unique: HashSet<_> = message.mentions.iter().collect();
        Ok(unique.len() >= settings.threshold)
    }
}

///////////////////////////////////////////////////////

pub struct AnyLinkTrigger;

impl RulePart for AnyLinkTrigger {
    fn name(&self) -> &'static str {
        "Any link"
    }

    fn description(&self) -> &'static str {
        "Triggers when a message contains any valid link"
    }
}

#[async_trait::async_trait]
impl MessageTrigger for AnyLinkTrigger {
    async fn check_message(
        &self,
        _ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        Ok(text::contains_link(&message.content))
    }
}

///////////////////////////////////////////////////////

pub struct WordListTrigger {
    pub blacklist: bool,
}

impl RulePart for WordListTrigger {
    fn name(&self) -> &'static str {
        if self.blacklist {
            "Word blacklist"
        } else {
            "Word whitelist"
        }
    }

    fn description(&self) -> &'static str {
        if self.blacklist {
            "Triggers on messages containing words in the specified list"
        } else {
            "Triggers on messages containing words not in the specified list"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::List
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        list_fields()
    }
}

/// Shared by message and name word lists
fn words_hit(content: &str, list: &HashSet<String>, blacklist: bool) -> bool {
    text::words(content).any(|word| list.contains(&word) == blacklist)
}

#[async_trait::async_trait]
impl MessageTrigger for WordListTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, List, self.name())?;
        let list = load_list(ctx, ctx.guild_id, settings.list_id).await?;
        Ok(words_hit(&message.content, &list, self.blacklist))
    }
}

///////////////////////////////////////////////////////

pub struct DomainTrigger {
    pub blacklist: bool,
}

impl RulePart for DomainTrigger {
    fn name(&self) -> &'static str {
        if self.blacklist {
            "Website blacklist"
        } else {
            "Website whitelist"
        }
    }

    fn description(&self) -> &'static str {
        if self.blacklist {
            "Triggers on messages containing links to websites in the specified list"
        } else {
            "Triggers on messages containing links to websites not in the specified list"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::List
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        list_fields()
    }
}

#[async_trait::async_trait]
impl MessageTrigger for DomainTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, List, self.name())?;
        let hosts: Vec<String> = text::find_links(&message.content)
            .into_iter()
            .filter_map(text::link_host)
            .collect();
        if hosts.is_empty() {
            return Ok(false);
        }

        let list = load_list(ctx, ctx.guild_id, settings.list_id).await?;
        let listed = |host: &String| list.iter().any(|domain| text::host_matches(host, domain));
        Ok(hosts.iter().any(|host| listed(host) == self.blacklist))
    }
}

///////////////////////////////////////////////////////

pub struct AllCapsTrigger;

impl RulePart for AllCapsTrigger {
    fn name(&self) -> &'static str {
        "All caps"
    }

    fn description(&self) -> &'static str {
        "Triggers when a message contains x% of capitalized letters"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::AllCaps
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Min number of all caps", "MinLength", SettingType::Int).default_value(3),
            SettingDef::new("Percentage of all caps", "Percentage", SettingType::Int)
                .range(1, 100)
                .default_value(100),
        ]
    }
}

#[async_trait::async_trait]
impl MessageTrigger for AllCapsTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, AllCaps, self.name())?;

        let (caps, cased) = message.content.chars().fold((0usize, 0usize), |(caps, cased), c| {
            if c.is_uppercase() {
                (caps + 1, cased + 1)
            } else if c.is_lowercase() {
                (caps, cased + 1)
            } else {
                (caps, cased)
            }
        });
        if cased == 0 || caps < settings.min_length {
            return Ok(false);
        }
        Ok(caps * 100 / cased >= settings.percentage)
    }
}

///////////////////////////////////////////////////////

pub struct ServerInviteTrigger;

impl RulePart for ServerInviteTrigger {
    fn name(&self) -> &'static str {
        "Server invites"
    }

    fn description(&self) -> &'static str {
        "Triggers on messages containing invites to other servers"
    }
}

#[async_trait::async_trait]
impl MessageTrigger for ServerInviteTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        if text::contains_third_party_invite(&message.content) {
            return Ok(true);
        }

        let codes = text::invite_codes(&message.content);
        if codes.is_empty() {
            return Ok(false);
        }

        let own = ctx
            .engine
            .services()
            .state
            .guild_invite_codes(ctx.guild_id)
            .await?;
        Ok(codes.iter().any(|code| !own.contains(code)))
    }
}

///////////////////////////////////////////////////////

pub struct SafeBrowsingTrigger;

impl RulePart for SafeBrowsingTrigger {
    fn name(&self) -> &'static str {
        "Google flagged bad links"
    }

    fn description(&self) -> &'static str {
        "Triggers on messages containing links that are flagged by Google Safebrowsing as unsafe"
    }
}

#[async_trait::async_trait]
impl MessageTrigger for SafeBrowsingTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let Some(reputation) = &ctx.engine.services().reputation else {
            return Ok(false);
        };
        if !text::contains_link(&message.content) {
            return Ok(false);
        }
        Ok(reputation.check(&message.content).await?.is_some())
    }
}

///////////////////////////////////////////////////////

/// "x messages in y seconds", per user or for the whole channel
pub struct SlowmodeTrigger {
    pub per_channel: bool,
    pub attachments: bool,
}

impl RulePart for SlowmodeTrigger {
    fn name(&self) -> &'static str {
        match (self.per_channel, self.attachments) {
            (false, false) => "x user messages in y seconds",
            (true, false) => "x channel messages in y seconds",
            (false, true) => "x user attachments in y seconds",
            (true, true) => "x channel attachments in y seconds",
        }
    }

    fn description(&self) -> &'static str {
        if self.per_channel {
            "Triggers once more than x messages were sent in the channel within y seconds"
        } else {
            "Triggers once a user sent more than x messages in the channel within y seconds"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Slowmode
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Messages", "Treshold", SettingType::Int).default_value(5),
            SettingDef::new("Within (seconds)", "Interval", SettingType::Int).default_value(5),
        ]
    }
}

#[async_trait::async_trait]
impl MessageTrigger for SlowmodeTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, Slowmode, self.name())?;
        if self.attachments && message.attachments == 0 {
            return Ok(false);
        }

        let history = channel_history(ctx, message, false).await?;
        let amount = within_window(message, &history, Duration::seconds(settings.interval))
            .filter(|m| self.per_channel || m.author_id == message.author_id)
            .filter(|m| !self.attachments || m.attachments > 0)
            .count();

        Ok(amount > settings.threshold)
    }
}

///////////////////////////////////////////////////////

pub struct MentionBurstTrigger {
    pub per_channel: bool,
}

impl RulePart for MentionBurstTrigger {
    fn name(&self) -> &'static str {
        if self.per_channel {
            "x channel mentions within y seconds"
        } else {
            "x user mentions within y seconds"
        }
    }

    fn description(&self) -> &'static str {
        "Triggers when x mentions were sent within y seconds"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::MentionBurst
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Mentions", "Treshold", SettingType::Int).default_value(20),
            SettingDef::new("Within (seconds)", "Interval", SettingType::Int).default_value(10),
            SettingDef::new("Count multiple mentions to the same user", "CountDuplicates", SettingType::Bool)
                .default_value(true),
        ]
    }
}

#[async_trait::async_trait]
impl MessageTrigger for MentionBurstTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, MentionBurst, self.name())?;
        if message.mentions.is_empty() {
            return Ok(false);
        }

        let history = channel_history(ctx, message, false).await?;
        let mentions = within_window(message, &history, Duration::seconds(settings.interval))
            .filter(|m| self.per_channel || m.author_id == message.author_id)
            .flat_map(|m| m.mentions.iter());

        let amount = if settings.count_duplicates {
            mentions.count()
        } else {
            mentions.collect::<HashSet<_>>().len()
        };
        Ok(amount >= settings.threshold)
    }
}

///////////////////////////////////////////////////////

pub struct RegexTrigger {
    pub inverse: bool,
}

impl RulePart for RegexTrigger {
    fn name(&self) -> &'static str {
        if self.inverse {
            "Message not matching regex"
        } else {
            "Message matches regex"
        }
    }

    fn description(&self) -> &'static str {
        if self.inverse {
            "Triggers when a message does not match the provided regex"
        } else {
            "Triggers when a message matches the provided regex"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Regex
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        regex_fields()
    }
}

#[async_trait::async_trait]
impl MessageTrigger for RegexTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, Regex, self.name())?;
        let re = ctx.engine.regex(&settings.regex)?;
        Ok(re.is_match(&message.content) != self.inverse)
    }
}

///////////////////////////////////////////////////////

pub struct SpamTrigger;

impl RulePart for SpamTrigger {
    fn name(&self) -> &'static str {
        "x consecutive identical messages"
    }

    fn description(&self) -> &'static str {
        "Triggers when a user sends x identical messages after each other"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Spam
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Threshold", "Treshold", SettingType::Int)
                .range(1, 250)
                .default_value(4),
            SettingDef::new("Within seconds (0 = infinity)", "TimeLimit", SettingType::Int)
                .range(0, 3600)
                .default_value(30),
            SettingDef::new("Also match in other channels", "CrossChannelMatch", SettingType::Bool),
        ]
    }
}

fn spam_key(content: &str) -> String {
    content.trim().to_lowercase()
}

#[async_trait::async_trait]
impl MessageTrigger for SpamTrigger {
    async fn check_message(
        &self,
        ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, Spam, self.name())?;
        let key = spam_key(&message.content);
        if message.attachments > 0 || key.is_empty() {
            return Ok(false);
        }

        let history = channel_history(ctx, message, settings.cross_channel_match).await?;
        let mut count = 1;
        for previous in history
            .iter()
            .filter(|m| m.id != message.id && m.author_id == message.author_id)
        {
            if settings.time_limit > 0
                && message.timestamp - previous.timestamp > Duration::seconds(settings.time_limit)
            {
                break;
            }
            if previous.attachments > 0 || spam_key(&previous.content) != key {
                break;
            }
            count += 1;
        }

        Ok(count >= settings.threshold)
    }
}

///////////////////////////////////////////////////////

/// Which member name a name trigger inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    Nickname,
    Username,
}

impl NameSource {
    fn of<'a>(self, member: &'a MemberSnapshot) -> Option<&'a str> {
        match self {
            Self::Nickname => member.nick.as_deref().filter(|n| !n.is_empty()),
            Self::Username => Some(member.account_name()),
        }
    }
}

pub struct NameRegexTrigger {
    pub source: NameSource,
    pub inverse: bool,
}

impl NameRegexTrigger {
    async fn check(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, Regex, self.name())?;
        let Some(name) = self.source.of(ctx.member) else {
            return Ok(false);
        };
        let re = ctx.engine.regex(&settings.regex)?;
        Ok(re.is_match(name) != self.inverse)
    }
}

impl RulePart for NameRegexTrigger {
    fn name(&self) -> &'static str {
        match (self.source, self.inverse) {
            (NameSource::Nickname, false) => "Nickname matches regex",
            (NameSource::Nickname, true) => "Nickname not matching regex",
            (NameSource::Username, false) => "Username matches regex",
            (NameSource::Username, true) => "Username not matching regex",
        }
    }

    fn description(&self) -> &'static str {
        match self.source {
            NameSource::Nickname => "Triggers when a member's nickname is checked against the provided regex",
            NameSource::Username => "Triggers when a member's username is checked against the provided regex",
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Regex
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        regex_fields()
    }
}

#[async_trait::async_trait]
impl NicknameListener for NameRegexTrigger {
    async fn check_nickname(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        self.check(ctx).await
    }
}

#[async_trait::async_trait]
impl UsernameListener for NameRegexTrigger {
    async fn check_username(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        self.check(ctx).await
    }
}

pub struct NameWordListTrigger {
    pub source: NameSource,
    pub blacklist: bool,
}

impl NameWordListTrigger {
    async fn check(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        let settings = expect_settings!(ctx.settings, List, self.name())?;
        let Some(name) = self.source.of(ctx.member) else {
            return Ok(false);
        };
        let list = load_list(ctx, ctx.guild_id, settings.list_id).await?;
        Ok(words_hit(name, &list, self.blacklist))
    }
}

impl RulePart for NameWordListTrigger {
    fn name(&self) -> &'static str {
        match (self.source, self.blacklist) {
            (NameSource::Nickname, true) => "Nickname word blacklist",
            (NameSource::Nickname, false) => "Nickname word whitelist",
            (NameSource::Username, true) => "Username word blacklist",
            (NameSource::Username, false) => "Username word whitelist",
        }
    }

    fn description(&self) -> &'static str {
        if self.blacklist {
            "Triggers when a member's name contains a word in the specified list"
        } else {
            "Triggers when a member's name contains a word not in the specified list"
        }
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::List
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        list_fields()
    }
}

#[async_trait::async_trait]
impl NicknameListener for NameWordListTrigger {
    async fn check_nickname(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        self.check(ctx).await
    }
}

#[async_trait::async_trait]
impl UsernameListener for NameWordListTrigger {
    async fn check_username(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        self.check(ctx).await
    }
}

pub struct NameInviteTrigger {
    pub source: NameSource,
}

impl NameInviteTrigger {
    fn check(&self, ctx: &TriggerContext<'_>) -> bool {
        self.source.of(ctx.member).is_some_and(text::contains_invite)
    }
}

impl RulePart for NameInviteTrigger {
    fn name(&self) -> &'static str {
        match self.source {
            NameSource::Nickname => "Nickname invite",
            NameSource::Username => "Username invite",
        }
    }

    fn description(&self) -> &'static str {
        "Triggers when a member's name contains a server invite"
    }
}

#[async_trait::async_trait]
impl NicknameListener for NameInviteTrigger {
    async fn check_nickname(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        Ok(self.check(ctx))
    }
}

#[async_trait::async_trait]
impl UsernameListener for NameInviteTrigger {
    async fn check_username(&self, ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        Ok(self.check(ctx))
    }
}

///////////////////////////////////////////////////////

pub struct MemberJoinTrigger;

impl RulePart for MemberJoinTrigger {
    fn name(&self) -> &'static str {
        "New member joined"
    }

    fn description(&self) -> &'static str {
        "Triggers when a new member joins the server"
    }
}

#[async_trait::async_trait]
impl JoinListener for MemberJoinTrigger {
    async fn check_join(&self, _ctx: &TriggerContext<'_>) -> AutomodResult<bool> {
        Ok(true)
    }
}

///////////////////////////////////////////////////////

pub struct AttachmentTrigger {
    pub required: bool,
}

impl RulePart for AttachmentTrigger {
    fn name(&self) -> &'static str {
        if self.required {
            "Message with attachments"
        } else {
            "Message without attachments"
        }
    }

    fn description(&self) -> &'static str {
        if self.required {
            "Triggers when a message has one or more attachments"
        } else {
            "Triggers when a message has no attachments"
        }
    }
}

#[async_trait::async_trait]
impl MessageTrigger for AttachmentTrigger {
    async fn check_message(
        &self,
        _ctx: &TriggerContext<'_>,
        message: &MessageSnapshot,
    ) -> AutomodResult<bool> {
        Ok((message.attachments > 0) == self.required)
    }
}

///////////////////////////////////////////////////////

pub struct ViolationsTrigger;

impl RulePart for ViolationsTrigger {
    fn name(&self) -> &'static str {
        "Violations"
    }

    fn description(&self) -> &'static str {
        "Triggers once a user reached x violations of a name within y minutes"
    }

    fn settings_type(&self) -> SettingsType {
        SettingsType::Violations
    }

    fn user_settings(&self) -> Vec<SettingDef> {
        vec![
            SettingDef::new("Name", "Name", SettingType::String)
                .range(1, 50)
                .default_value("name"),
            SettingDef::new("Number of violations", "Treshold", SettingType::Int).default_value(4),
            SettingDef::new("Within (minutes)", "Interval", SettingType::Int).default_value(60),
            SettingDef::new(
                "Ignore if a higher violation trigger of this name was activated",
                "IgnoreIfLesser",
                SettingType::Bool,
            )
            .default_value(true),
        ]
    }
}

impl ViolationListener for ViolationsTrigger {
    fn check_user(
        &self,
        _data: &TriggeredRuleData,
        violations: &[Violation],
        settings: &PartSettings,
        triggered_on_higher: bool,
    ) -> AutomodResult<bool> {
        let settings = expect_settings!(settings, Violations, self.name())?;
        if triggered_on_higher && settings.ignore_if_lesser {
            return Ok(false);
        }

        let cutoff = Utc::now() - Duration::minutes(settings.interval);
        let count = violations
            .iter()
            .filter(|v| v.name == settings.name && v.created_at > cutoff)
            .count();
        Ok(count >= settings.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::settings::{
        AllCapsSettings, ListSettings, MentionBurstSettings, RegexSettings, SlowmodeSettings,
        SpamSettings, ViolationsSettings,
    };
    use crate::automod::store::MemoryStore;
    use crate::automod::testing::*;
    use chrono::DateTime;
    use poise::serenity_prelude::UserId;

    async fn fire(harness: &Harness, trigger: &dyn MessageTrigger, settings: PartSettings, msg: &MessageSnapshot) -> bool {
        let member = member(msg.author_id.get());
        let ctx = harness.trigger_context(&member, &settings);
        trigger.check_message(&ctx, msg).await.unwrap()
    }

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_word_blacklist_matches_case_insensitive_tokens() {
        let store = MemoryStore::default();
        store.insert_list(word_list(1, &["spam", "scam"]));
        let harness = Harness::new(store);
        let trigger = WordListTrigger { blacklist: true };
        let settings = PartSettings::List(ListSettings { list_id: 1 });

        let hit = message(1, 50, 5, "this is not SPAM", Utc::now());
        let miss = message(2, 50, 5, "this is fine", Utc::now());
        assert!(fire(&harness, &trigger, settings.clone(), &hit).await);
        assert!(!fire(&harness, &trigger, settings, &miss).await);
    }

    #[tokio::test]
    async fn test_word_whitelist_fires_on_unknown_word() {
        let store = MemoryStore::default();
        store.insert_list(word_list(1, &["hello", "world"]));
        let harness = Harness::new(store);
        let trigger = WordListTrigger { blacklist: false };
        let settings = PartSettings::List(ListSettings { list_id: 1 });

        let ok = message(1, 50, 5, "Hello, world!", Utc::now());
        let bad = message(2, 50, 5, "hello there", Utc::now());
        assert!(!fire(&harness, &trigger, settings.clone(), &ok).await);
        assert!(fire(&harness, &trigger, settings, &bad).await);
    }

    #[tokio::test]
    async fn test_missing_list_is_an_error() {
        let harness = Harness::new(MemoryStore::default());
        let trigger = WordListTrigger { blacklist: true };
        let settings = PartSettings::List(ListSettings { list_id: 9 });
        let member = member(5);
        let ctx = harness.trigger_context(&member, &settings);
        let msg = message(1, 50, 5, "anything", Utc::now());
        assert!(trigger.check_message(&ctx, &msg).await.is_err());
    }

    #[tokio::test]
    async fn test_domain_lists() {
        let store = MemoryStore::default();
        store.insert_list(word_list(1, &["bad.com"]));
        let harness = Harness::new(store);
        let settings = PartSettings::List(ListSettings { list_id: 1 });

        let sub = message(1, 50, 5, "visit https://cdn.bad.com/x", Utc::now());
        let other = message(2, 50, 5, "visit https://good.org", Utc::now());
        let plain = message(3, 50, 5, "no links here", Utc::now());

        let black = DomainTrigger { blacklist: true };
        assert!(fire(&harness, &black, settings.clone(), &sub).await);
        assert!(!fire(&harness, &black, settings.clone(), &other).await);

        let white = DomainTrigger { blacklist: false };
        assert!(!fire(&harness, &white, settings.clone(), &sub).await);
        assert!(fire(&harness, &white, settings.clone(), &other).await);
        assert!(!fire(&harness, &white, settings, &plain).await);
    }

    #[tokio::test]
    async fn test_all_caps() {
        let harness = Harness::new(MemoryStore::default());
        let settings = PartSettings::AllCaps(AllCapsSettings {
            min_length: 5,
            percentage: 80,
        });

        let shouting = message(1, 50, 5, "STOP SHOUTING ok", Utc::now());
        let short = message(2, 50, 5, "OK", Utc::now());
        let calm = message(3, 50, 5, "Hello There Friends", Utc::now());
        assert!(fire(&harness, &AllCapsTrigger, settings.clone(), &shouting).await);
        assert!(!fire(&harness, &AllCapsTrigger, settings.clone(), &short).await);
        assert!(!fire(&harness, &AllCapsTrigger, settings, &calm).await);
    }

    #[tokio::test]
    async fn test_server_invite_ignores_own_guild() {
        let harness = Harness::new(MemoryStore::default());
        harness.state.set_invites(&["home"]);

        let own = message(1, 50, 5, "join discord.gg/home", Utc::now());
        let foreign = message(2, 50, 5, "join discord.gg/elsewhere", Utc::now());
        assert!(!fire(&harness, &ServerInviteTrigger, PartSettings::None, &own).await);
        assert!(fire(&harness, &ServerInviteTrigger, PartSettings::None, &foreign).await);
    }

    #[tokio::test]
    async fn test_channel_slowmode_window() {
        let harness = Harness::new(MemoryStore::default());
        let trigger = SlowmodeTrigger {
            per_channel: true,
            attachments: false,
        };
        let settings = PartSettings::Slowmode(SlowmodeSettings {
            threshold: 5,
            interval: 10,
        });
        let start = Utc::now();

        // five messages from distinct users at 0, 2, 4, 6 and 8 seconds, newest first
        let history: Vec<_> = (0..5)
            .rev()
            .map(|i| message(10 + i, 50, 100 + i, "hi", at(start, i as i64 * 2)))
            .collect();
        harness.state.set_history(history);

        // six messages inside the window is one over the threshold
        let sixth = message(20, 50, 200, "hi", at(start, 9));
        assert!(fire(&harness, &trigger, settings.clone(), &sixth).await);
        let edge = message(21, 50, 200, "hi", at(start, 10));
        assert!(fire(&harness, &trigger, settings.clone(), &edge).await);

        // the first message falls out of the window, leaving exactly the threshold
        let late = message(22, 50, 200, "hi", at(start, 11));
        assert!(!fire(&harness, &trigger, settings, &late).await);
    }

    #[tokio::test]
    async fn test_user_slowmode_counts_only_author() {
        let harness = Harness::new(MemoryStore::default());
        let trigger = SlowmodeTrigger {
            per_channel: false,
            attachments: false,
        };
        let settings = PartSettings::Slowmode(SlowmodeSettings {
            threshold: 2,
            interval: 10,
        });
        let start = Utc::now();
        harness.state.set_history(vec![
            message(3, 50, 5, "c", at(start, 2)),
            message(2, 50, 6, "b", at(start, 1)),
            message(1, 50, 5, "a", at(start, 0)),
        ]);

        let third_by_author = message(4, 50, 5, "d", at(start, 3));
        assert!(fire(&harness, &trigger, settings.clone(), &third_by_author).await);

        let other_user = message(5, 50, 6, "e", at(start, 3));
        assert!(!fire(&harness, &trigger, settings, &other_user).await);
    }

    #[tokio::test]
    async fn test_attachment_slowmode_requires_attachment() {
        let harness = Harness::new(MemoryStore::default());
        let trigger = SlowmodeTrigger {
            per_channel: true,
            attachments: true,
        };
        let settings = PartSettings::Slowmode(SlowmodeSettings {
            threshold: 0,
            interval: 10,
        });
        let plain = message(1, 50, 5, "text", Utc::now());
        assert!(!fire(&harness, &trigger, settings.clone(), &plain).await);

        let mut upload = message(2, 50, 5, "", Utc::now());
        upload.attachments = 1;
        assert!(fire(&harness, &trigger, settings, &upload).await);
    }

    #[tokio::test]
    async fn test_mention_burst() {
        let harness = Harness::new(MemoryStore::default());
        let start = Utc::now();
        let mut earlier = message(1, 50, 5, "<@7> <@8>", at(start, 0));
        earlier.mentions = vec![UserId::new(7), UserId::new(8)];
        harness.state.set_history(vec![earlier]);

        let mut current = message(2, 50, 5, "<@7>", at(start, 5));
        current.mentions = vec![UserId::new(7)];

        let trigger = MentionBurstTrigger { per_channel: false };
        let counting = PartSettings::MentionBurst(MentionBurstSettings {
            threshold: 3,
            interval: 10,
            count_duplicates: true,
        });
        let unique = PartSettings::MentionBurst(MentionBurstSettings {
            threshold: 3,
            interval: 10,
            count_duplicates: false,
        });
        assert!(fire(&harness, &trigger, counting, &current).await);
        assert!(!fire(&harness, &trigger, unique, &current).await);
    }

    #[tokio::test]
    async fn test_regex_and_inverse() {
        let harness = Harness::new(MemoryStore::default());
        let settings = PartSettings::Regex(RegexSettings {
            regex: r"(?i)free\s+nitro".into(),
        });
        let msg = message(1, 50, 5, "FREE   nitro here", Utc::now());
        assert!(fire(&harness, &RegexTrigger { inverse: false }, settings.clone(), &msg).await);
        assert!(!fire(&harness, &RegexTrigger { inverse: true }, settings, &msg).await);
    }

    #[tokio::test]
    async fn test_invalid_regex_is_an_error() {
        let harness = Harness::new(MemoryStore::default());
        let settings = PartSettings::Regex(RegexSettings { regex: "(".into() });
        let member = member(5);
        let ctx = harness.trigger_context(&member, &settings);
        let msg = message(1, 50, 5, "x", Utc::now());
        assert!(RegexTrigger { inverse: false }.check_message(&ctx, &msg).await.is_err());
    }

    #[tokio::test]
    async fn test_spam_counts_consecutive_repeats() {
        let harness = Harness::new(MemoryStore::default());
        let start = Utc::now();
        // newest first
        harness.state.set_history(vec![
            message(3, 50, 5, "buy now ", at(start, 2)),
            message(2, 50, 6, "unrelated", at(start, 1)),
            message(1, 50, 5, "BUY NOW", at(start, 0)),
        ]);
        let settings = PartSettings::Spam(SpamSettings {
            threshold: 3,
            time_limit: 30,
            cross_channel_match: false,
        });
        let msg = message(4, 50, 5, "Buy now", at(start, 3));
        assert!(fire(&harness, &SpamTrigger, settings, &msg).await);

        let strict = PartSettings::Spam(SpamSettings {
            threshold: 4,
            time_limit: 30,
            cross_channel_match: false,
        });
        assert!(!fire(&harness, &SpamTrigger, strict, &msg).await);
    }

    #[tokio::test]
    async fn test_attachment_presence() {
        let harness = Harness::new(MemoryStore::default());
        let mut upload = message(1, 50, 5, "", Utc::now());
        upload.attachments = 2;
        let plain = message(2, 50, 5, "x", Utc::now());

        let with = AttachmentTrigger { required: true };
        let without = AttachmentTrigger { required: false };
        assert!(fire(&harness, &with, PartSettings::None, &upload).await);
        assert!(!fire(&harness, &with, PartSettings::None, &plain).await);
        assert!(fire(&harness, &without, PartSettings::None, &plain).await);
    }

    #[tokio::test]
    async fn test_name_triggers() {
        let store = MemoryStore::default();
        store.insert_list(word_list(1, &["admin"]));
        let harness = Harness::new(store);

        let mut target = member(5);
        target.nick = Some("Real Admin".into());
        target.global_name = Some("discord.gg/join".into());

        let list = PartSettings::List(ListSettings { list_id: 1 });
        let ctx = harness.trigger_context(&target, &list);
        let nick_words = NameWordListTrigger {
            source: NameSource::Nickname,
            blacklist: true,
        };
        assert!(nick_words.check_nickname(&ctx).await.unwrap());

        let username_words = NameWordListTrigger {
            source: NameSource::Username,
            blacklist: true,
        };
        assert!(!username_words.check_username(&ctx).await.unwrap());

        let invite = NameInviteTrigger {
            source: NameSource::Username,
        };
        assert!(invite.check_username(&ctx).await.unwrap());

        let regex = PartSettings::Regex(RegexSettings { regex: "^Real".into() });
        let ctx = harness.trigger_context(&target, &regex);
        let nick_regex = NameRegexTrigger {
            source: NameSource::Nickname,
            inverse: false,
        };
        assert!(nick_regex.check_nickname(&ctx).await.unwrap());

        let no_nick = member(6);
        let ctx = harness.trigger_context(&no_nick, &regex);
        assert!(!nick_regex.check_nickname(&ctx).await.unwrap());
    }

    #[test]
    fn test_violations_threshold_and_window() {
        let settings = PartSettings::Violations(ViolationsSettings {
            name: "flagged".into(),
            threshold: 3,
            interval: 60,
            ignore_if_lesser: false,
        });
        let data = TriggeredRuleData::new(guild(), member(5));
        let now = Utc::now();

        let mut violations = vec![violation(1, "flagged", now), violation(2, "flagged", now)];
        assert!(!ViolationsTrigger.check_user(&data, &violations, &settings, false).unwrap());

        violations.push(violation(3, "other", now));
        violations.push(violation(4, "flagged", now - Duration::minutes(61)));
        assert!(!ViolationsTrigger.check_user(&data, &violations, &settings, false).unwrap());

        violations.push(violation(5, "flagged", now));
        assert!(ViolationsTrigger.check_user(&data, &violations, &settings, false).unwrap());
    }

    #[test]
    fn test_violations_ignore_if_lesser() {
        let settings = PartSettings::Violations(ViolationsSettings {
            name: "flagged".into(),
            threshold: 1,
            interval: 60,
            ignore_if_lesser: true,
        });
        let data = TriggeredRuleData::new(guild(), member(5));
        let violations = vec![violation(1, "flagged", Utc::now())];
        assert!(ViolationsTrigger.check_user(&data, &violations, &settings, false).unwrap());
        assert!(!ViolationsTrigger.check_user(&data, &violations, &settings, true).unwrap());
    }

    #[test]
    fn test_wrong_settings_type_is_reported() {
        let data = TriggeredRuleData::new(guild(), member(5));
        let err = ViolationsTrigger
            .check_user(&data, &[], &PartSettings::None, false)
            .unwrap_err();
        assert!(matches!(err, AutomodError::SettingsMismatch("Violations")));
    }
}
