//! Delayed moderation actions
//!
//! Timed bans, temporary roles and channel slowmode resets are queued here and
//! executed by a background task once they are due.

use crate::AUTOMOD_TARGET;
use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::services::{Moderation, ScheduledEvent, ScheduledPayload, Scheduler};
use crate::automod::store::read_yaml;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info};

const SCHEDULED_EVENTS_FILE: &str = "automod_scheduled_events.yaml";

/// Requests accepted by the scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerRequest {
    /// Run every event that is due now
    RunDue,
    Shutdown,
}

/// In-memory scheduler for [`ScheduledPayload`]s
#[derive(Clone, Default)]
pub struct EventScheduler {
    // event id -> event
    events: Arc<DashMap<String, ScheduledEvent>>,
    tx: Arc<OnceLock<Sender<SchedulerRequest>>>,
}

impl EventScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the pending events saved in `dir`
    ///
    /// Events that came due while the bot was down run on the first tick after
    /// [`EventScheduler::start`].
    ///
    /// # Errors
    ///
    /// Fails when the snapshot exists but cannot be read or parsed.
    pub async fn load(dir: impl AsRef<Path>) -> AutomodResult<Self> {
        let scheduler = Self::new();
        for event in read_yaml::<ScheduledEvent>(&dir.as_ref().join(SCHEDULED_EVENTS_FILE)).await? {
            scheduler.events.insert(event.id.clone(), event);
        }
        if !scheduler.is_empty() {
            info!("Restored {} scheduled automod events", scheduler.len());
        }
        Ok(scheduler)
    }

    /// Write the pending events to `dir`
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or the snapshot cannot be written.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut events: Vec<ScheduledEvent> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        tokio::fs::write(dir.join(SCHEDULED_EVENTS_FILE), serde_yaml::to_string(&events)?).await?;
        Ok(())
    }

    /// Pending events of a guild, soonest first
    #[must_use]
    pub fn pending(&self, guild_id: GuildId) -> Vec<ScheduledEvent> {
        let mut events: Vec<ScheduledEvent> = self
            .events
            .iter()
            .filter(|e| e.guild_id == guild_id)
            .map(|e| e.value().clone())
            .collect();
        events.sort_by_key(|e| e.fire_at);
        events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove and return the events due at `now`
    fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledEvent> {
        let due: Vec<String> = self
            .events
            .iter()
            .filter(|e| e.fire_at <= now)
            .map(|e| e.id.clone())
            .collect();
        let mut events: Vec<ScheduledEvent> = due
            .iter()
            .filter_map(|id| self.events.remove(id).map(|(_, event)| event))
            .collect();
        events.sort_by_key(|e| e.fire_at);
        events
    }

    /// Execute every due event; failed events are logged and dropped
    pub async fn run_due(&self, moderation: &dyn Moderation) -> usize {
        let events = self.take_due(Utc::now());
        let count = events.len();
        for event in events {
            if let Err(e) = execute(moderation, &event).await {
                if e.is_already_applied() {
                    debug!(target: AUTOMOD_TARGET, event_id = %event.id, "Scheduled event already applied: {e}");
                } else {
                    error!(
                        target: AUTOMOD_TARGET,
                        event_id = %event.id,
                        guild_id = %event.guild_id,
                        event = event.payload.event_name(),
                        error = %e,
                        "Scheduled event failed"
                    );
                }
            }
        }
        count
    }

    /// Start the background task
    pub fn start(&self, moderation: Arc<dyn Moderation>, interval: Duration) {
        let (tx, rx) = mpsc::channel(100);
        if self.tx.set(tx).is_err() {
            error!(target: AUTOMOD_TARGET, "Scheduler task already running");
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.scheduler_task(moderation, rx, interval).await;
        });
    }

    /// Ask the background task to stop
    pub async fn shutdown(&self) {
        if let Some(tx) = self.tx.get() {
            if let Err(e) = tx.send(SchedulerRequest::Shutdown).await {
                error!("Failed to send scheduler shutdown request: {e}");
            }
        }
    }

    async fn scheduler_task(
        &self,
        moderation: Arc<dyn Moderation>,
        mut rx: Receiver<SchedulerRequest>,
        interval: Duration,
    ) {
        info!("Starting automod scheduler with {}s interval", interval.as_secs());
        let mut interval = tokio::time::interval(interval);

        loop {
            tokio::select! {
                Some(request) = rx.recv() => match request {
                    SchedulerRequest::RunDue => {
                        self.run_due(moderation.as_ref()).await;
                    }
                    SchedulerRequest::Shutdown => {
                        info!("Received shutdown request for automod scheduler");
                        break;
                    }
                },
                _ = interval.tick() => {
                    let ran = self.run_due(moderation.as_ref()).await;
                    if ran > 0 {
                        debug!(target: AUTOMOD_TARGET, ran, "Ran scheduled events");
                    }
                }
            }
        }

        info!("Automod scheduler shut down");
    }
}

async fn execute(moderation: &dyn Moderation, event: &ScheduledEvent) -> AutomodResult<()> {
    let reason = format!("Automoderator: scheduled {}", event.payload.event_name());
    match &event.payload {
        ScheduledPayload::RemoveRole { user_id, role_id } => {
            moderation
                .remove_role(event.guild_id, *user_id, *role_id, &reason)
                .await?;
        }
        ScheduledPayload::AddRole { user_id, role_id } => {
            moderation
                .add_role(event.guild_id, *user_id, *role_id, &reason)
                .await?;
        }
        ScheduledPayload::Unban { user_id } => {
            moderation.unban(event.guild_id, *user_id).await?;
        }
        ScheduledPayload::ResetChannelSlowmode { channel_id } => {
            moderation.set_channel_slowmode(*channel_id, 0).await?;
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl Scheduler for EventScheduler {
    async fn schedule_event(
        &self,
        guild_id: GuildId,
        fire_at: DateTime<Utc>,
        payload: ScheduledPayload,
    ) -> AutomodResult<ScheduledEvent> {
        let event = ScheduledEvent {
            id: uuid::Uuid::new_v4().to_string(),
            guild_id,
            fire_at,
            payload,
        };
        self.events.insert(event.id.clone(), event.clone());

        if fire_at <= Utc::now() {
            if let Some(tx) = self.tx.get() {
                tx.send(SchedulerRequest::RunDue)
                    .await
                    .map_err(|e| AutomodError::Scheduler(e.to_string()))?;
            }
        }
        Ok(event)
    }

    async fn cancel_matching(
        &self,
        guild_id: GuildId,
        payload: &ScheduledPayload,
    ) -> AutomodResult<usize> {
        let before = self.events.len();
        self.events
            .retain(|_, e| !(e.guild_id == guild_id && &e.payload == payload));
        Ok(before - self.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::error::ModerationError;
    use crate::automod::services::MockModeration;
    use crate::automod::testing::guild;
    use poise::serenity_prelude::{ChannelId, RoleId, UserId};

    #[tokio::test]
    async fn test_only_due_events_run() {
        let scheduler = EventScheduler::new();
        let user_id = UserId::new(5);
        scheduler
            .schedule_event(guild(), Utc::now() - chrono::Duration::seconds(1), ScheduledPayload::Unban { user_id })
            .await
            .unwrap();
        scheduler
            .schedule_event(
                guild(),
                Utc::now() + chrono::Duration::hours(1),
                ScheduledPayload::RemoveRole {
                    user_id,
                    role_id: RoleId::new(7),
                },
            )
            .await
            .unwrap();

        let mut moderation = MockModeration::new();
        moderation
            .expect_unban()
            .withf(move |_, u| *u == user_id)
            .times(1)
            .returning(|_, _| Ok(()));
        moderation.expect_remove_role().times(0);

        assert_eq!(scheduler.run_due(&moderation).await, 1);
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_events_are_dropped() {
        let scheduler = EventScheduler::new();
        let channel_id = ChannelId::new(50);
        scheduler
            .schedule_event(guild(), Utc::now(), ScheduledPayload::ResetChannelSlowmode { channel_id })
            .await
            .unwrap();

        let mut moderation = MockModeration::new();
        moderation
            .expect_set_channel_slowmode()
            .withf(move |c, s| *c == channel_id && *s == 0)
            .times(1)
            .returning(|_, _| Err(ModerationError::Other("boom".into())));

        assert_eq!(scheduler.run_due(&moderation).await, 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_matching_is_guild_scoped() {
        let scheduler = EventScheduler::new();
        let payload = ScheduledPayload::ResetChannelSlowmode {
            channel_id: ChannelId::new(50),
        };
        let later = Utc::now() + chrono::Duration::minutes(5);
        scheduler.schedule_event(guild(), later, payload.clone()).await.unwrap();
        scheduler.schedule_event(guild(), later, payload.clone()).await.unwrap();
        scheduler
            .schedule_event(GuildId::new(999), later, payload.clone())
            .await
            .unwrap();

        assert_eq!(scheduler.cancel_matching(guild(), &payload).await.unwrap(), 2);
        assert!(scheduler.pending(guild()).is_empty());
        assert_eq!(scheduler.pending(GuildId::new(999)).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_runs_due_events() {
        let scheduler = EventScheduler::new();
        let user_id = UserId::new(5);

        let mut moderation = MockModeration::new();
        moderation.expect_unban().times(1).returning(|_, _| Ok(()));
        scheduler.start(Arc::new(moderation), Duration::from_secs(15));

        scheduler
            .schedule_event(guild(), Utc::now(), ScheduledPayload::Unban { user_id })
            .await
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_secs(16)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(scheduler.is_empty());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_events_survive_restart() {
        let dir = std::env::temp_dir().join(format!("automod-scheduler-{}", uuid::Uuid::new_v4()));
        let user_id = UserId::new(5);
        let scheduler = EventScheduler::new();
        scheduler
            .schedule_event(guild(), Utc::now() - chrono::Duration::seconds(1), ScheduledPayload::Unban { user_id })
            .await
            .unwrap();
        scheduler
            .schedule_event(
                guild(),
                Utc::now() + chrono::Duration::hours(1),
                ScheduledPayload::ResetChannelSlowmode {
                    channel_id: ChannelId::new(50),
                },
            )
            .await
            .unwrap();
        scheduler.save(&dir).await.expect("Failed to save");

        let restored = EventScheduler::load(&dir).await.expect("Failed to load");
        assert_eq!(restored.pending(guild()), scheduler.pending(guild()));

        // the unban that came due while offline still runs
        let mut moderation = MockModeration::new();
        moderation
            .expect_unban()
            .withf(move |_, u| *u == user_id)
            .times(1)
            .returning(|_, _| Ok(()));
        assert_eq!(restored.run_due(&moderation).await, 1);
        assert_eq!(restored.len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_malformed_event_snapshot_fails_load() {
        let dir = std::env::temp_dir().join(format!("automod-scheduler-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(SCHEDULED_EVENTS_FILE), "- id: [broken\n").await.unwrap();
        assert!(EventScheduler::load(&dir).await.is_err());
        assert!(EventScheduler::load(dir.join("missing")).await.unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
