//! Per-channel cooldown for the slowmode effect

use poise::serenity_prelude::ChannelId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Channels that recently had slowmode enabled; entries expire after `ttl`
#[derive(Debug)]
pub struct ChannelCooldowns {
    entries: Mutex<HashMap<ChannelId, Instant>>,
    ttl: Duration,
}

impl ChannelCooldowns {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Claim the channel. Returns `false` while a previous claim is still active.
    pub fn try_claim(&self, channel_id: ChannelId) -> bool {
        self.try_claim_at(channel_id, Instant::now())
    }

    fn try_claim_at(&self, channel_id: ChannelId, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, claimed| now.duration_since(*claimed) < self.ttl);

        if entries.contains_key(&channel_id) {
            return false;
        }
        entries.insert(channel_id, now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
