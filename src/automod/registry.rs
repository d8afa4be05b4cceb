//! The rule part catalog
//!
//! Type ids are persisted in rule data rows. They are append-only: never renumber or
//! reuse an id, add new parts at the end instead.

use crate::automod::conditions::{
    AccountAgeCondition, BotCondition, ChannelCategoriesCondition, ChannelsCondition,
    MemberAgeCondition, MessageEditedCondition, RolesCondition,
};
use crate::automod::effects::{
    AddViolationEffect, BanUserEffect, DeleteMessageEffect, DeleteMessagesEffect,
    EnableChannelSlowmodeEffect, GiveRoleEffect, KickUserEffect, MuteUserEffect,
    RemoveRoleEffect, ResetViolationsEffect, SetNicknameEffect, WarnUserEffect,
};
use crate::automod::rulepart::RulePartHandle;
use crate::automod::triggers::{
    AllCapsTrigger, AnyLinkTrigger, AttachmentTrigger, DomainTrigger, MemberJoinTrigger,
    MentionBurstTrigger, MentionsTrigger, NameInviteTrigger, NameRegexTrigger,
    NameSource, NameWordListTrigger, RegexTrigger, SafeBrowsingTrigger, ServerInviteTrigger,
    SlowmodeTrigger, SpamTrigger, ViolationsTrigger, WordListTrigger,
};
use std::collections::HashMap;
use tracing::warn;

/// Persisted type ids
pub mod ids {
    pub const ROLES_BLACKLIST: i32 = 1;
    pub const ROLES_WHITELIST: i32 = 2;
    pub const MENTIONS: i32 = 3;
    pub const ANY_LINK: i32 = 4;
    pub const DELETE_MESSAGE: i32 = 5;
    pub const ADD_VIOLATION: i32 = 6;
    pub const CHANNELS_BLACKLIST: i32 = 7;
    pub const CHANNELS_WHITELIST: i32 = 8;
    pub const KICK: i32 = 9;
    pub const BAN: i32 = 10;
    pub const MUTE: i32 = 11;
    pub const VIOLATIONS: i32 = 12;
    pub const WORDS_BLACKLIST: i32 = 13;
    pub const WORDS_WHITELIST: i32 = 14;
    pub const DOMAINS_BLACKLIST: i32 = 15;
    pub const DOMAINS_WHITELIST: i32 = 16;
    pub const ALL_CAPS: i32 = 17;
    pub const CATEGORIES_BLACKLIST: i32 = 18;
    pub const CATEGORIES_WHITELIST: i32 = 19;
    pub const SERVER_INVITE: i32 = 20;
    pub const ACCOUNT_AGE_ABOVE: i32 = 21;
    pub const ACCOUNT_AGE_BELOW: i32 = 22;
    pub const MEMBER_AGE_ABOVE: i32 = 23;
    pub const MEMBER_AGE_BELOW: i32 = 24;
    pub const WARN: i32 = 25;
    pub const SAFE_BROWSING: i32 = 26;
    pub const IGNORE_BOTS: i32 = 27;
    pub const SET_NICKNAME: i32 = 28;
    pub const SLOWMODE_USER: i32 = 29;
    pub const SLOWMODE_CHANNEL: i32 = 30;
    pub const MENTION_BURST_USER: i32 = 31;
    pub const MENTION_BURST_CHANNEL: i32 = 32;
    pub const MESSAGE_REGEX: i32 = 33;
    pub const MESSAGE_REGEX_INVERSE: i32 = 34;
    pub const SPAM: i32 = 35;
    pub const NICKNAME_REGEX: i32 = 36;
    pub const NICKNAME_REGEX_INVERSE: i32 = 37;
    pub const NICKNAME_WORDS_BLACKLIST: i32 = 38;
    pub const NICKNAME_WORDS_WHITELIST: i32 = 39;
    pub const NICKNAME_INVITE: i32 = 40;
    pub const USERNAME_REGEX: i32 = 41;
    pub const USERNAME_REGEX_INVERSE: i32 = 42;
    pub const USERNAME_WORDS_BLACKLIST: i32 = 43;
    pub const USERNAME_WORDS_WHITELIST: i32 = 44;
    pub const USERNAME_INVITE: i32 = 45;
    pub const MEMBER_JOIN: i32 = 46;
    pub const HAS_ATTACHMENTS: i32 = 47;
    pub const NO_ATTACHMENTS: i32 = 48;
    pub const ATTACHMENT_SLOWMODE_USER: i32 = 49;
    pub const ATTACHMENT_SLOWMODE_CHANNEL: i32 = 50;
    pub const ONLY_BOTS: i32 = 51;
    pub const EDITED_MESSAGE: i32 = 52;
    pub const NEW_MESSAGE: i32 = 53;
    pub const DELETE_MESSAGES: i32 = 54;
    pub const RESET_VIOLATIONS: i32 = 55;
    pub const GIVE_ROLE: i32 = 56;
    pub const CHANNEL_SLOWMODE: i32 = 57;
    pub const REMOVE_ROLE: i32 = 58;
}

/// Immutable lookup table from type id to rule part
pub struct RulePartRegistry {
    parts: HashMap<i32, RulePartHandle>,
}

impl Default for RulePartRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RulePartRegistry {
    /// Registry holding the full catalog
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry
            .register(ids::ROLES_BLACKLIST, RulePartHandle::condition(RolesCondition { blacklist: true }))
            .register(ids::ROLES_WHITELIST, RulePartHandle::condition(RolesCondition { blacklist: false }))
            .register(ids::MENTIONS, RulePartHandle::message(MentionsTrigger))
            .register(ids::ANY_LINK, RulePartHandle::message(AnyLinkTrigger))
            .register(ids::DELETE_MESSAGE, RulePartHandle::effect(DeleteMessageEffect))
            .register(ids::ADD_VIOLATION, RulePartHandle::effect(AddViolationEffect))
            .register(ids::CHANNELS_BLACKLIST, RulePartHandle::condition(ChannelsCondition { blacklist: true }))
            .register(ids::CHANNELS_WHITELIST, RulePartHandle::condition(ChannelsCondition { blacklist: false }))
            .register(ids::KICK, RulePartHandle::effect(KickUserEffect))
            .register(ids::BAN, RulePartHandle::effect(BanUserEffect))
            .register(ids::MUTE, RulePartHandle::effect(MuteUserEffect))
            .register(ids::VIOLATIONS, RulePartHandle::violation(ViolationsTrigger))
            .register(ids::WORDS_BLACKLIST, RulePartHandle::message(WordListTrigger { blacklist: true }))
            .register(ids::WORDS_WHITELIST, RulePartHandle::message(WordListTrigger { blacklist: false }))
            .register(ids::DOMAINS_BLACKLIST, RulePartHandle::message(DomainTrigger { blacklist: true }))
            .register(ids::DOMAINS_WHITELIST, RulePartHandle::message(DomainTrigger { blacklist: false }))
            .register(ids::ALL_CAPS, RulePartHandle::message(AllCapsTrigger))
            .register(
                ids::CATEGORIES_BLACKLIST,
                RulePartHandle::condition(ChannelCategoriesCondition { blacklist: true }),
            )
            .register(
                ids::CATEGORIES_WHITELIST,
                RulePartHandle::condition(ChannelCategoriesCondition { blacklist: false }),
            )
            .register(ids::SERVER_INVITE, RulePartHandle::message(ServerInviteTrigger))
            .register(ids::ACCOUNT_AGE_ABOVE, RulePartHandle::condition(AccountAgeCondition { below: false }))
            .register(ids::ACCOUNT_AGE_BELOW, RulePartHandle::condition(AccountAgeCondition { below: true }))
            .register(ids::MEMBER_AGE_ABOVE, RulePartHandle::condition(MemberAgeCondition { below: false }))
            .register(ids::MEMBER_AGE_BELOW, RulePartHandle::condition(MemberAgeCondition { below: true }))
            .register(ids::WARN, RulePartHandle::effect(WarnUserEffect))
            .register(ids::SAFE_BROWSING, RulePartHandle::message(SafeBrowsingTrigger))
            .register(ids::IGNORE_BOTS, RulePartHandle::condition(BotCondition { ignore: true }))
            .register(ids::SET_NICKNAME, RulePartHandle::effect(SetNicknameEffect))
            .register(
                ids::SLOWMODE_USER,
                RulePartHandle::message(SlowmodeTrigger { per_channel: false, attachments: false }),
            )
            .register(
                ids::SLOWMODE_CHANNEL,
                RulePartHandle::message(SlowmodeTrigger { per_channel: true, attachments: false }),
            )
            .register(
                ids::MENTION_BURST_USER,
                RulePartHandle::message(MentionBurstTrigger { per_channel: false }),
            )
            .register(
                ids::MENTION_BURST_CHANNEL,
                RulePartHandle::message(MentionBurstTrigger { per_channel: true }),
            )
            .register(ids::MESSAGE_REGEX, RulePartHandle::message(RegexTrigger { inverse: false }))
            .register(ids::MESSAGE_REGEX_INVERSE, RulePartHandle::message(RegexTrigger { inverse: true }))
            .register(ids::SPAM, RulePartHandle::message(SpamTrigger))
            .register(
                ids::NICKNAME_REGEX,
                RulePartHandle::nickname(NameRegexTrigger { source: NameSource::Nickname, inverse: false }),
            )
            .register(
                ids::NICKNAME_REGEX_INVERSE,
                RulePartHandle::nickname(NameRegexTrigger { source: NameSource::Nickname, inverse: true }),
            )
            .register(
                ids::NICKNAME_WORDS_BLACKLIST,
                RulePartHandle::nickname(NameWordListTrigger { source: NameSource::Nickname, blacklist: true }),
            )
            .register(
                ids::NICKNAME_WORDS_WHITELIST,
                RulePartHandle::nickname(NameWordListTrigger { source: NameSource::Nickname, blacklist: false }),
            )
            .register(
                ids::NICKNAME_INVITE,
                RulePartHandle::nickname(NameInviteTrigger { source: NameSource::Nickname }),
            )
            .register(
                ids::USERNAME_REGEX,
                RulePartHandle::username(NameRegexTrigger { source: NameSource::Username, inverse: false }),
            )
            .register(
                ids::USERNAME_REGEX_INVERSE,
                RulePartHandle::username(NameRegexTrigger { source: NameSource::Username, inverse: true }),
            )
            .register(
                ids::USERNAME_WORDS_BLACKLIST,
                RulePartHandle::username(NameWordListTrigger { source: NameSource::Username, blacklist: true }),
            )
            .register(
                ids::USERNAME_WORDS_WHITELIST,
                RulePartHandle::username(NameWordListTrigger { source: NameSource::Username, blacklist: false }),
            )
            .register(
                ids::USERNAME_INVITE,
                RulePartHandle::username(NameInviteTrigger { source: NameSource::Username }),
            )
            .register(ids::MEMBER_JOIN, RulePartHandle::join(MemberJoinTrigger))
            .register(ids::HAS_ATTACHMENTS, RulePartHandle::message(AttachmentTrigger { required: true }))
            .register(ids::NO_ATTACHMENTS, RulePartHandle::message(AttachmentTrigger { required: false }))
            .register(
                ids::ATTACHMENT_SLOWMODE_USER,
                RulePartHandle::message(SlowmodeTrigger { per_channel: false, attachments: true }),
            )
            .register(
                ids::ATTACHMENT_SLOWMODE_CHANNEL,
                RulePartHandle::message(SlowmodeTrigger { per_channel: true, attachments: true }),
            )
            .register(ids::ONLY_BOTS, RulePartHandle::condition(BotCondition { ignore: false }))
            .register(ids::EDITED_MESSAGE, RulePartHandle::condition(MessageEditedCondition { new_message: false }))
            .register(ids::NEW_MESSAGE, RulePartHandle::condition(MessageEditedCondition { new_message: true }))
            .register(ids::DELETE_MESSAGES, RulePartHandle::effect(DeleteMessagesEffect))
            .register(ids::RESET_VIOLATIONS, RulePartHandle::effect(ResetViolationsEffect))
            .register(ids::GIVE_ROLE, RulePartHandle::effect(GiveRoleEffect))
            .register(ids::CHANNEL_SLOWMODE, RulePartHandle::effect(EnableChannelSlowmodeEffect))
            .register(ids::REMOVE_ROLE, RulePartHandle::effect(RemoveRoleEffect));

        registry
    }

    /// Registry without any parts
    pub fn empty() -> Self {
        Self {
            parts: HashMap::new(),
        }
    }

    /// Register a part under `id`, replacing any previous entry
    pub fn register(&mut self, id: i32, part: RulePartHandle) -> &mut Self {
        if let Some(previous) = self.parts.insert(id, part) {
            warn!("Rule part id {id} registered twice, replacing {}", previous.name());
        }
        self
    }

    pub fn lookup(&self, id: i32) -> Option<&RulePartHandle> {
        self.parts.get(&id)
    }

    /// Ids of every trigger listening to `family`, ascending
    #[cfg(test)]
    pub fn ids_in_family(&self, family: crate::automod::rulepart::TriggerFamily) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .parts
            .iter()
            .filter(|(_, part)| part.trigger_family() == Some(family))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// All registered entries, ascending by id
    #[cfg(test)]
    pub fn entries(&self) -> Vec<(i32, &RulePartHandle)> {
        let mut entries: Vec<_> = self.parts.iter().map(|(id, part)| (*id, part)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::model::RulePartKind;
    use crate::automod::rulepart::TriggerFamily;
    use crate::automod::settings::SettingsType;

    #[test]
    fn test_catalog_is_dense() {
        let registry = RulePartRegistry::new();
        assert_eq!(registry.len(), 58);
        for id in 1..=58 {
            assert!(registry.lookup(id).is_some(), "missing rule part {id}");
        }
        assert!(registry.lookup(0).is_none());
        assert!(registry.lookup(59).is_none());
    }

    #[test]
    fn test_parameterized_entries_share_implementation() {
        let registry = RulePartRegistry::new();
        let black = registry.lookup(ids::WORDS_BLACKLIST).unwrap();
        let white = registry.lookup(ids::WORDS_WHITELIST).unwrap();
        assert_eq!(black.settings_type(), SettingsType::List);
        assert_eq!(white.settings_type(), SettingsType::List);
        assert_ne!(black.name(), white.name());
    }

    #[test]
    fn test_kinds() {
        let registry = RulePartRegistry::new();
        assert_eq!(registry.lookup(ids::ROLES_BLACKLIST).unwrap().kind(), RulePartKind::Condition);
        assert_eq!(registry.lookup(ids::ANY_LINK).unwrap().kind(), RulePartKind::Trigger);
        assert_eq!(registry.lookup(ids::BAN).unwrap().kind(), RulePartKind::Effect);
    }

    #[test]
    fn test_families() {
        let registry = RulePartRegistry::new();
        assert_eq!(registry.ids_in_family(TriggerFamily::Violation), vec![ids::VIOLATIONS]);
        assert_eq!(registry.ids_in_family(TriggerFamily::Join), vec![ids::MEMBER_JOIN]);
        assert_eq!(
            registry.ids_in_family(TriggerFamily::Nickname),
            vec![36, 37, 38, 39, 40]
        );
        assert!(registry.ids_in_family(TriggerFamily::Message).contains(&ids::SLOWMODE_CHANNEL));
    }

    #[test]
    fn test_every_part_describes_itself() {
        let registry = RulePartRegistry::new();
        for (id, part) in registry.entries() {
            assert!(!part.name().is_empty(), "part {id} has no name");
            assert!(!part.description().is_empty(), "part {id} has no description");
            let has_fields = !part.user_settings().is_empty();
            assert_eq!(
                has_fields,
                part.settings_type() != SettingsType::None,
                "part {id} settings/fields disagree"
            );
        }
    }
}
