pub mod automod;
pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;

pub const BOT_NAME: &str = "dastardly_automod";
pub const COMMAND_TARGET: &str = "dastardly_automod::command";
pub const ERROR_TARGET: &str = "dastardly_automod::error";
pub const EVENT_TARGET: &str = "dastardly_automod::handlers";
pub const CONSOLE_TARGET: &str = "dastardly_automod";
/// Rule evaluation and effect logs; written to their own file
pub const AUTOMOD_TARGET: &str = "dastardly_automod::automod";

pub use config::AutomodConfig;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
