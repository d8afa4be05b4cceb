use crate::automod::discord::{
    channel_snapshot, member_snapshot, message_snapshot, partial_member_snapshot, user_snapshot,
};
use crate::automod::{AutomodResult, EvaluationOutcome, MemberSnapshot, MessageEvent};
use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, GuildMemberUpdateEvent, Member, Message,
    MessageUpdateEvent, Ready,
};
use tracing::{debug, error, info, warn};

pub struct Handler;

/// Which name-based listeners a member update should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NameChanges {
    pub nickname: bool,
    pub username: bool,
}

impl NameChanges {
    /// Without the previous member only a set nickname is worth checking
    pub fn between(old: Option<&MemberSnapshot>, new: &MemberSnapshot) -> Self {
        match old {
            Some(old) => Self {
                nickname: new.nick.is_some() && old.nick != new.nick,
                username: old.username != new.username || old.global_name != new.global_name,
            },
            None => Self {
                nickname: new.nick.is_some(),
                username: false,
            },
        }
    }
}

async fn shared_data(ctx: &Context) -> Option<Data> {
    ctx.data.read().await.get::<Data>().cloned()
}

/// Build the engine event for a guild message; cache lookups stay out of async state
fn message_event(ctx: &Context, guild_id: GuildId, msg: &Message, edited: bool) -> MessageEvent {
    let member = ctx
        .cache
        .member(guild_id, msg.author.id)
        .map(|m| member_snapshot(&m))
        .unwrap_or_else(|| partial_member_snapshot(&msg.author, msg.member.as_deref()));
    let channel = ctx.cache.channel(msg.channel_id).map(|c| channel_snapshot(&c));

    let mut message = message_snapshot(msg);
    message.edited |= edited;
    MessageEvent {
        guild_id,
        member,
        channel,
        message,
    }
}

fn report(kind: &str, guild_id: GuildId, result: AutomodResult<EvaluationOutcome>) {
    match result {
        Ok(outcome) if !outcome.applied_rules.is_empty() => {
            debug!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                kind,
                applied = ?outcome.applied_rules,
                "Automod rules applied"
            );
        }
        Ok(_) => {}
        Err(e) => {
            error!(target: EVENT_TARGET, guild_id = %guild_id, kind, error = %e, "Automod check failed");
        }
    }
}

impl Handler {
    async fn check_message(ctx: &Context, msg: &Message, edited: bool) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }
        let Some(data) = shared_data(ctx).await else {
            return;
        };
        let Some(engine) = data.engine() else {
            return;
        };

        let event = message_event(ctx, guild_id, msg, edited);
        report("message", guild_id, engine.check_message(event).await);
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn message(&self, ctx: Context, new_message: Message) {
        Self::check_message(&ctx, &new_message, false).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        // Embed-only updates carry no content change
        if event.content.is_none() {
            return;
        }
        let message = match new {
            Some(message) => message,
            None => match event.channel_id.message(&ctx, event.id).await {
                Ok(message) => message,
                Err(e) => {
                    debug!(target: EVENT_TARGET, message_id = %event.id, error = %e, "Edited message unavailable");
                    return;
                }
            },
        };
        Self::check_message(&ctx, &message, true).await;
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        let Some(engine) = data.engine() else {
            return;
        };

        let guild_id = new_member.guild_id;
        let member = member_snapshot(&new_member);
        report("join", guild_id, engine.check_join(guild_id, member.clone()).await);
        report("username", guild_id, engine.check_username(guild_id, member).await);
    }

    async fn guild_member_update(
        &self,
        ctx: Context,
        old_if_available: Option<Member>,
        new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        let Some(engine) = data.engine() else {
            return;
        };

        let guild_id = event.guild_id;
        let member = new.as_ref().map_or_else(
            || MemberSnapshot {
                nick: event.nick.clone(),
                roles: event.roles.clone(),
                ..user_snapshot(&event.user)
            },
            member_snapshot,
        );
        let old = old_if_available.as_ref().map(member_snapshot);

        let changes = NameChanges::between(old.as_ref(), &member);
        if changes.nickname {
            report("nickname", guild_id, engine.check_nickname(guild_id, member.clone()).await);
        }
        if changes.username {
            report("username", guild_id, engine.check_username(guild_id, member).await);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::testing::member;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_nickname_change_detected() {
        let old = member(5);
        let mut new = member(5);
        new.nick = Some("fresh".into());
        assert_eq!(
            NameChanges::between(Some(&old), &new),
            NameChanges {
                nickname: true,
                username: false
            }
        );

        // Clearing a nickname has nothing left to check
        assert_eq!(NameChanges::between(Some(&new), &old), NameChanges::default());
    }

    #[test]
    fn test_username_change_detected() {
        let old = member(5);
        let mut new = member(5);
        new.global_name = Some("Display".into());
        assert!(NameChanges::between(Some(&old), &new).username);
    }

    #[test]
    fn test_unknown_previous_member() {
        let mut new = member(5);
        assert_eq!(NameChanges::between(None, &new), NameChanges::default());
        new.nick = Some("nick".into());
        assert!(NameChanges::between(None, &new).nickname);
    }
}
