use crate::automod::TriggeredRuleData;
use crate::{AUTOMOD_TARGET, COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error};
use chrono::Utc;
use poise::{Context, FrameworkError};
use std::path::Path;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Automod decisions log file name
pub const AUTOMOD_LOG_FILE: &str = "automod";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Create log directory if it doesn't exist
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let automod_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, AUTOMOD_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Create a layer for command logs (JSON format)
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(filter_fn(|meta| !meta.target().starts_with(AUTOMOD_TARGET)));

    // Rule evaluation and effect logs only
    let automod_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(automod_file)
        .with_filter(filter_fn(|meta| meta.target().starts_with(AUTOMOD_TARGET)));

    // Set up the subscriber with all layers
    // Use env filter to allow runtime configuration of log levels
    // Default to INFO level if not specified, but filter out serenity heartbeat logs
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        // Filter out serenity logs
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(automod_layer)
        .init();

    info!("Logging system initialized");
    Ok(())
}

/// Command name, guild and user of an invocation
fn command_fields(ctx: Context<'_, Data, Error>) -> (String, String, String) {
    let command_name = ctx.command().qualified_name.clone();
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();
    (command_name, guild_id, user_id)
}

/// Milliseconds since the invocation was created on Discord's side
fn elapsed_ms(ctx: Context<'_, Data, Error>) -> i64 {
    let created = ctx.created_at().unix_timestamp() * 1000;
    (Utc::now().timestamp_millis() - created).max(0)
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    let (command_name, guild_id, user_id) = command_fields(ctx);
    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let (command_name, guild_id, user_id) = command_fields(ctx);
    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        duration_ms = elapsed_ms(ctx),
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            let (command_name, guild_id, user_id) = command_fields(*ctx);
            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let (command_name, guild_id, user_id) = command_fields(*ctx);
            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);
            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error_msg,
                "Command check failed"
            );
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            let (command_name, guild_id, user_id) = command_fields(*ctx);
            info!(
                target: COMMAND_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                missing = ?missing_permissions,
                "Command refused, missing permissions"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Other framework error"
            );
        }
    }
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

/// Log a rule that passed its conditions, before its effects run
pub fn log_rule_triggered(data: &TriggeredRuleData) {
    let ruleset = data
        .ruleset
        .as_ref()
        .map_or("", |r| r.model.name.as_str());
    let rule = data
        .current_rule
        .as_ref()
        .map_or("", |r| r.model.name.as_str());
    let triggers: Vec<i32> = data.current_rule_triggers().map(|t| t.type_id).collect();
    let channel_id = data
        .channel
        .as_ref()
        .map_or_else(String::new, |c| c.id.to_string());

    info!(
        target: AUTOMOD_TARGET,
        guild_id = %data.guild_id,
        user_id = %data.member.user_id,
        user_name = %data.member.display_name(),
        channel_id = %channel_id,
        ruleset = %ruleset,
        rule = %rule,
        triggers = ?triggers,
        recursion = data.recursion_counter,
        event = "rule_triggered",
        "Automod rule triggered"
    );
}
