//! Rule-based automatic moderation
//!
//! Guild moderators assemble rulesets out of triggers, conditions and effects. The
//! [`AutomodEngine`] parses them into runnable form, matches gateway events against
//! them and applies the effects of every rule that passes its conditions.

pub mod conditions;
pub mod context;
pub mod cooldown;
pub mod discord;
pub mod effects;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod registry;
pub mod reputation;
pub mod rulepart;
pub mod scheduler;
pub mod services;
pub mod settings;
pub mod store;
pub mod text;
pub mod triggers;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ChannelSnapshot, MemberSnapshot, MessageSnapshot, TriggeredRuleData};
pub use engine::{AutomodEngine, EvaluationOutcome, MessageEvent};
pub use error::{AutomodError, AutomodResult, ModerationError};
pub use registry::RulePartRegistry;
pub use scheduler::EventScheduler;
pub use services::{AutomodStore, GuildState, LinkReputation, Moderation, Scheduler, Services};
pub use store::MemoryStore;
