use std::{ops::Deref, sync::Arc, sync::OnceLock};

use crate::automod::discord::{DiscordModeration, SerenityState};
use crate::automod::reputation::SafeBrowsingClient;
use crate::automod::{
    AutomodEngine, AutomodResult, EventScheduler, LinkReputation, MemoryStore, RulePartRegistry, Services,
};
use crate::config::AutomodConfig;
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;
use tracing::info;

/// Shared bot state
///
/// Cloned into poise's user data and the serenity type map; both clones share one
/// [`DataInner`].
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl Default for Data {
    fn default() -> Self {
        Self::new(AutomodConfig::default(), MemoryStore::new())
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("pending_events", &self.scheduler.len())
            .field("engine_ready", &self.engine.get().is_some())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(config: AutomodConfig, store: MemoryStore) -> Self {
        Self::with_scheduler(config, store, EventScheduler::new())
    }

    fn with_scheduler(config: AutomodConfig, store: MemoryStore, scheduler: EventScheduler) -> Self {
        Self(Arc::new(DataInner {
            config,
            store: Arc::new(store),
            scheduler,
            engine: OnceLock::new(),
        }))
    }

    /// Load the store and scheduler snapshots from the configured data directory
    /// # Errors
    /// Returns an error if a snapshot exists but cannot be read or parsed.
    pub async fn load(config: AutomodConfig) -> AutomodResult<Self> {
        let store = MemoryStore::load(&config.data_dir).await?;
        let scheduler = EventScheduler::load(&config.data_dir).await?;
        Ok(Self::with_scheduler(config, store, scheduler))
    }

    /// Save the store and scheduler snapshots to the configured data directory
    /// # Errors
    /// Returns an error if the directory cannot be created or a snapshot cannot be
    /// serialized or written.
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.store.save(&self.config.data_dir).await?;
        self.scheduler.save(&self.config.data_dir).await
    }

    /// The engine, once the gateway connection is up
    #[must_use]
    pub fn engine(&self) -> Option<&AutomodEngine> {
        self.engine.get()
    }

    /// Build the engine over `services`; only the first call has any effect
    pub fn install_engine(&self, services: Services) -> &AutomodEngine {
        self.engine.get_or_init(|| {
            AutomodEngine::new(
                Arc::new(RulePartRegistry::new()),
                services,
                self.config.clone(),
            )
        })
    }

    /// Wire the engine to Discord and start the scheduler
    pub fn start(&self, cache: Arc<serenity::Cache>, http: Arc<serenity::Http>) -> &AutomodEngine {
        let moderation = Arc::new(DiscordModeration::new(Arc::clone(&http)));
        let reputation = self.config.safe_browsing_api_key.as_ref().map(|key| {
            Arc::new(SafeBrowsingClient::new(key.clone())) as Arc<dyn LinkReputation>
        });
        if reputation.is_none() {
            info!("No safe browsing API key configured, safe browsing trigger disabled");
        }

        let services = Services {
            store: self.store.clone(),
            state: Arc::new(SerenityState::new(cache, http)),
            moderation: moderation.clone(),
            scheduler: Arc::new(self.scheduler.clone()),
            reputation,
        };
        self.scheduler
            .start(moderation, self.config.scheduler_interval());
        self.install_engine(services)
    }
}

pub struct DataInner {
    pub config: AutomodConfig,
    pub store: Arc<MemoryStore>,
    // Shares its queue with the clone handed to the engine
    pub scheduler: EventScheduler,
    engine: OnceLock<AutomodEngine>,
}
