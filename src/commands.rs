use crate::automod::model::{RulesetBundle, TriggeredRuleLog, Violation};
use crate::automod::services::AutomodStore;
use crate::{Data, Error};
use poise::serenity_prelude::{self as serenity, CreateEmbed, GuildId, Mentionable};
use poise::{Context, CreateReply, command};
use std::fmt::Write;

/// Triggered-rule log rows per page
pub const LOG_PAGE_SIZE: usize = 15;

/// Violations shown by the violations command
const VIOLATION_LIST_LIMIT: usize = 25;

fn guild_of(ctx: &Context<'_, Data, Error>) -> Result<GuildId, Error> {
    ctx.guild_id().ok_or_else(|| "This command only works in a server".into())
}

/// Inspect and manage automod rulesets
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("rulesets", "toggle", "logs", "violations", "clearviolations")
)]
pub async fn automod(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say("Use one of: rulesets, toggle, logs, violations, clearviolations")
        .await?;
    Ok(())
}

/// List the rulesets of this server
#[command(prefix_command, slash_command, guild_only)]
pub async fn rulesets(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let bundles = ctx.data().store.rulesets(guild_id).await?;
    ctx.say(format_rulesets(&bundles)).await?;
    Ok(())
}

/// Enable or disable a ruleset
#[command(prefix_command, slash_command, guild_only)]
pub async fn toggle(
    ctx: Context<'_, Data, Error>,
    #[description = "Ruleset name"]
    #[rest]
    name: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let data = ctx.data();
    let Some(enabled) = data.store.toggle_ruleset(guild_id, &name) else {
        ctx.say(format!("No ruleset named `{name}`")).await?;
        return Ok(());
    };
    if let Some(engine) = data.engine() {
        engine.invalidate(guild_id);
    }

    let state = if enabled { "enabled" } else { "disabled" };
    ctx.say(format!("Ruleset `{name}` is now {state}")).await?;
    Ok(())
}

/// Show recently triggered rules
#[command(prefix_command, slash_command, guild_only)]
pub async fn logs(
    ctx: Context<'_, Data, Error>,
    #[description = "Only show entries for this user"] user: Option<serenity::User>,
    #[description = "Page, starting at 1"] page: Option<usize>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let page = page.unwrap_or(1).max(1);
    let entries = ctx.data().store.triggered_log(
        guild_id,
        user.as_ref().map(|u| u.id),
        LOG_PAGE_SIZE,
        (page - 1) * LOG_PAGE_SIZE,
    );

    let embed = CreateEmbed::new()
        .title(format!("Triggered rules, page {page}"))
        .description(format_log_page(&entries))
        .timestamp(serenity::Timestamp::now());
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List a user's violations
#[command(prefix_command, slash_command, guild_only)]
pub async fn violations(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let mut found: Vec<Violation> = ctx
        .data()
        .store
        .all_violations(guild_id)
        .into_iter()
        .filter(|v| v.user_id == user.id)
        .collect();
    found.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    ctx.say(format!(
        "Violations of {}:\n{}",
        user.mention(),
        format_violations(&found)
    ))
    .await?;
    Ok(())
}

/// Clear a user's violations, optionally only those with one name
#[command(prefix_command, slash_command, guild_only)]
pub async fn clearviolations(
    ctx: Context<'_, Data, Error>,
    #[description = "Member whose violations are cleared"] user: serenity::User,
    #[description = "Only clear violations with this name"] name: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let cleared = ctx
        .data()
        .store
        .clear_violations(guild_id, user.id, name)
        .await?;
    ctx.say(format!("Cleared {cleared} violation(s) of {}", user.mention()))
        .await?;
    Ok(())
}

pub fn format_rulesets(bundles: &[RulesetBundle]) -> String {
    if bundles.is_empty() {
        return "No rulesets configured".to_string();
    }
    let mut out = String::new();
    for bundle in bundles {
        let state = if bundle.ruleset.enabled { "Enabled" } else { "Disabled" };
        let _ = writeln!(
            out,
            "`{}` {state}, {} rule(s), {} condition(s)",
            bundle.ruleset.name,
            bundle.rules.len(),
            bundle.conditions.len()
        );
    }
    out
}

pub fn format_log_page(entries: &[TriggeredRuleLog]) -> String {
    if entries.is_empty() {
        return "Nothing here".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let channel = if entry.channel_name.is_empty() {
            String::new()
        } else {
            format!(" in #{}", entry.channel_name)
        };
        let _ = writeln!(
            out,
            "#{} {} **{}** triggered `{}` ({}){channel}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.user_name,
            entry.rule_name,
            entry.ruleset_name,
        );
    }
    out
}

pub fn format_violations(violations: &[Violation]) -> String {
    if violations.is_empty() {
        return "None".to_string();
    }
    let mut out = String::new();
    for violation in violations.iter().take(VIOLATION_LIST_LIMIT) {
        let _ = writeln!(
            out,
            "`{}` {}",
            violation.name,
            violation.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    if violations.len() > VIOLATION_LIST_LIMIT {
        let _ = writeln!(out, "...and {} more", violations.len() - VIOLATION_LIST_LIMIT);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::testing::{guild, rule_bundle, ruleset_bundle, violation};
    use chrono::{TimeZone, Utc};
    use poise::serenity_prelude::UserId;

    #[test]
    fn test_automod_command_definition() {
        let cmd = automod();
        assert_eq!(cmd.name, "automod");
        assert!(cmd.guild_only);
        assert!(cmd.required_permissions.manage_guild());
        let names: Vec<&str> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["rulesets", "toggle", "logs", "violations", "clearviolations"]
        );
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_format_rulesets() {
        assert_eq!(format_rulesets(&[]), "No rulesets configured");

        let mut off = ruleset_bundle(2, "Raids", Vec::new(), Vec::new());
        off.ruleset.enabled = false;
        let bundles = vec![
            ruleset_bundle(1, "Spam", vec![rule_bundle(1, 10, "Links", Vec::new())], Vec::new()),
            off,
        ];
        let text = format_rulesets(&bundles);
        assert!(text.contains("`Spam` Enabled, 1 rule(s), 0 condition(s)"));
        assert!(text.contains("`Raids` Disabled, 0 rule(s)"));
    }

    #[test]
    fn test_format_log_page() {
        let entry = TriggeredRuleLog {
            id: 7,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            channel_id: None,
            channel_name: "general".into(),
            guild_id: guild(),
            trigger_id: Some(100),
            trigger_type_id: 4,
            rule_id: Some(10),
            rule_name: "Links".into(),
            ruleset_name: "Spam".into(),
            user_id: UserId::new(5),
            user_name: "user5".into(),
            extradata: serde_json::Value::Null,
        };
        assert_eq!(
            format_log_page(&[entry]),
            "#7 2024-05-01 12:30 **user5** triggered `Links` (Spam) in #general\n"
        );
        assert_eq!(format_log_page(&[]), "Nothing here");
    }

    #[test]
    fn test_format_violations_truncates() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let many: Vec<Violation> = (0..30).map(|i| violation(i, "spam", at)).collect();
        let text = format_violations(&many);
        assert_eq!(text.lines().count(), VIOLATION_LIST_LIMIT + 1);
        assert!(text.ends_with("...and 5 more\n"));
        assert_eq!(format_violations(&[]), "None");
    }
}
