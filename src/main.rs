use std::env;
use std::sync::Arc;

use dastardly_automod::config::{AutomodConfig, CONFIG_PATH};
use dastardly_automod::{Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Save the store snapshots periodically
fn spawn_autosave(data: Data) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(data.config.save_interval());
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = data.save().await {
                error!("Failed to save automod data: {e}");
            }
        }
    });
}

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;
    let config_path = env::var("AUTOMOD_CONFIG").unwrap_or_else(|_| CONFIG_PATH.to_string());
    let config = AutomodConfig::load(&config_path).await;
    let history_limit = config.history_limit;

    let data = Data::load(config).await?;
    spawn_autosave(data.clone());

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![commands::automod()],
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands and starting the automod engine".to_string());
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                framework_data.start(Arc::clone(&ctx.cache), Arc::clone(&ctx.http));
                Ok(framework_data)
            })
        })
        .build();

    let mut cache_settings = ::serenity::cache::Settings::default();
    cache_settings.max_messages = history_limit;

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .cache_settings(cache_settings)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    // Event handlers reach the shared data through the type map
    client.data.write().await.insert::<Data>(data.clone());

    let shard_manager = Arc::clone(&client.shard_manager);
    let shutdown_data = data.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            return;
        }
        info!("Shutting down...");
        shutdown_data.scheduler.shutdown().await;
        if let Err(e) = shutdown_data.save().await {
            error!("Failed to save automod data: {e}");
        }
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
    }
}
