//! Typed rule part settings
//!
//! Every registry entry names a [`SettingsType`]. The parser uses that tag to turn a
//! row's opaque JSON payload into the matching [`PartSettings`] variant, so a parsed
//! part's settings always agree with what its rule part declares.
//!
//! Keys are PascalCase to match what the configuration surface persists, including the
//! historical `Treshold` spelling.

use crate::automod::error::{AutomodError, AutomodResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Kind of value a user-configurable setting holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    Role,
    MultiRole,
    Channel,
    MultiChannel,
    MultiChannelCategory,
    Int,
    String,
    Bool,
    List,
}

/// Description of one configurable field, used by configuration surfaces
#[derive(Debug, Clone, PartialEq)]
pub struct SettingDef {
    pub name: &'static str,
    pub key: &'static str,
    pub kind: SettingType,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub default: Option<serde_json::Value>,
}

impl SettingDef {
    pub fn new(name: &'static str, key: &'static str, kind: SettingType) -> Self {
        Self {
            name,
            key,
            kind,
            min: None,
            max: None,
            default: None,
        }
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn default_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentionsSettings {
    #[serde(rename = "Treshold")]
    pub threshold: usize,
}

/// Reference to a guild word or domain list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSettings {
    #[serde(rename = "ListID")]
    pub list_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ViolationsSettings {
    pub name: String,
    #[serde(rename = "Treshold")]
    pub threshold: usize,
    /// Window in minutes
    pub interval: i64,
    pub ignore_if_lesser: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AllCapsSettings {
    pub min_length: usize,
    pub percentage: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SlowmodeSettings {
    #[serde(rename = "Treshold")]
    pub threshold: usize,
    /// Window in seconds
    pub interval: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct MentionBurstSettings {
    #[serde(rename = "Treshold")]
    pub threshold: usize,
    /// Window in seconds
    pub interval: i64,
    pub count_duplicates: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RegexSettings {
    pub regex: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SpamSettings {
    #[serde(rename = "Treshold")]
    pub threshold: usize,
    /// Window in seconds
    pub time_limit: i64,
    pub cross_channel_match: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RolesSettings {
    pub roles: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ChannelsSettings {
    pub channels: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CategoriesSettings {
    pub categories: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeSettings {
    /// Minutes
    #[serde(rename = "Treshold")]
    pub threshold: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ReasonSettings {
    pub custom_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BanSettings {
    /// Minutes, 0 for permanent
    pub duration: i64,
    pub custom_reason: String,
    pub message_delete_days: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct MuteSettings {
    /// Minutes, 0 for permanent
    pub duration: i64,
    pub custom_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NicknameSettings {
    pub new_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ViolationNameSettings {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DeleteMessagesSettings {
    pub num_messages: usize,
    /// Seconds
    pub time_limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RoleSettings {
    pub role: u64,
    /// Seconds, 0 for permanent
    pub duration: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ChannelSlowmodeSettings {
    /// Seconds between messages
    pub ratelimit: i64,
    /// Seconds before the slowmode is lifted, 0 to keep it
    pub duration: i64,
}

/// Explicit settings tag declared by each rule part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsType {
    None,
    Mentions,
    List,
    Violations,
    AllCaps,
    Slowmode,
    MentionBurst,
    Regex,
    Spam,
    Roles,
    Channels,
    Categories,
    Age,
    Reason,
    Ban,
    Mute,
    Nickname,
    ViolationName,
    DeleteMessages,
    Role,
    ChannelSlowmode,
}

/// Deserialized settings of one parsed part
#[derive(Debug, Clone, PartialEq)]
pub enum PartSettings {
    None,
    Mentions(MentionsSettings),
    List(ListSettings),
    Violations(ViolationsSettings),
    AllCaps(AllCapsSettings),
    Slowmode(SlowmodeSettings),
    MentionBurst(MentionBurstSettings),
    Regex(RegexSettings),
    Spam(SpamSettings),
    Roles(RolesSettings),
    Channels(ChannelsSettings),
    Categories(CategoriesSettings),
    Age(AgeSettings),
    Reason(ReasonSettings),
    Ban(BanSettings),
    Mute(MuteSettings),
    Nickname(NicknameSettings),
    ViolationName(ViolationNameSettings),
    DeleteMessages(DeleteMessagesSettings),
    Role(RoleSettings),
    ChannelSlowmode(ChannelSlowmodeSettings),
}

fn from_value<T: DeserializeOwned + Default>(raw: &serde_json::Value) -> serde_json::Result<T> {
    if raw.is_null() {
        return Ok(T::default());
    }
    T::deserialize(raw)
}

impl SettingsType {
    /// Deserialize a raw payload into the variant this tag names
    ///
    /// A null payload yields the default settings, matching rows saved before a
    /// part gained configurable fields.
    pub fn parse(self, raw: &serde_json::Value) -> serde_json::Result<PartSettings> {
        Ok(match self {
            Self::None => PartSettings::None,
            Self::Mentions => PartSettings::Mentions(from_value(raw)?),
            Self::List => PartSettings::List(from_value(raw)?),
            Self::Violations => PartSettings::Violations(from_value(raw)?),
            Self::AllCaps => PartSettings::AllCaps(from_value(raw)?),
            Self::Slowmode => PartSettings::Slowmode(from_value(raw)?),
            Self::MentionBurst => PartSettings::MentionBurst(from_value(raw)?),
            Self::Regex => PartSettings::Regex(from_value(raw)?),
            Self::Spam => PartSettings::Spam(from_value(raw)?),
            Self::Roles => PartSettings::Roles(from_value(raw)?),
            Self::Channels => PartSettings::Channels(from_value(raw)?),
            Self::Categories => PartSettings::Categories(from_value(raw)?),
            Self::Age => PartSettings::Age(from_value(raw)?),
            Self::Reason => PartSettings::Reason(from_value(raw)?),
            Self::Ban => PartSettings::Ban(from_value(raw)?),
            Self::Mute => PartSettings::Mute(from_value(raw)?),
            Self::Nickname => PartSettings::Nickname(from_value(raw)?),
            Self::ViolationName => PartSettings::ViolationName(from_value(raw)?),
            Self::DeleteMessages => PartSettings::DeleteMessages(from_value(raw)?),
            Self::Role => PartSettings::Role(from_value(raw)?),
            Self::ChannelSlowmode => PartSettings::ChannelSlowmode(from_value(raw)?),
        })
    }
}

impl PartSettings {
    /// The tag this value was parsed with
    pub fn settings_type(&self) -> SettingsType {
        match self {
            Self::None => SettingsType::None,
            Self::Mentions(_) => SettingsType::Mentions,
            Self::List(_) => SettingsType::List,
            Self::Violations(_) => SettingsType::Violations,
            Self::AllCaps(_) => SettingsType::AllCaps,
            Self::Slowmode(_) => SettingsType::Slowmode,
            Self::MentionBurst(_) => SettingsType::MentionBurst,
            Self::Regex(_) => SettingsType::Regex,
            Self::Spam(_) => SettingsType::Spam,
            Self::Roles(_) => SettingsType::Roles,
            Self::Channels(_) => SettingsType::Channels,
            Self::Categories(_) => SettingsType::Categories,
            Self::Age(_) => SettingsType::Age,
            Self::Reason(_) => SettingsType::Reason,
            Self::Ban(_) => SettingsType::Ban,
            Self::Mute(_) => SettingsType::Mute,
            Self::Nickname(_) => SettingsType::Nickname,
            Self::ViolationName(_) => SettingsType::ViolationName,
            Self::DeleteMessages(_) => SettingsType::DeleteMessages,
            Self::Role(_) => SettingsType::Role,
            Self::ChannelSlowmode(_) => SettingsType::ChannelSlowmode,
        }
    }

    /// Serialize back into the persisted JSON shape
    pub fn to_value(&self) -> serde_json::Value {
        let value = match self {
            Self::None => Ok(serde_json::Value::Null),
            Self::Mentions(s) => serde_json::to_value(s),
            Self::List(s) => serde_json::to_value(s),
            Self::Violations(s) => serde_json::to_value(s),
            Self::AllCaps(s) => serde_json::to_value(s),
            Self::Slowmode(s) => serde_json::to_value(s),
            Self::MentionBurst(s) => serde_json::to_value(s),
            Self::Regex(s) => serde_json::to_value(s),
            Self::Spam(s) => serde_json::to_value(s),
            Self::Roles(s) => serde_json::to_value(s),
            Self::Channels(s) => serde_json::to_value(s),
            Self::Categories(s) => serde_json::to_value(s),
            Self::Age(s) => serde_json::to_value(s),
            Self::Reason(s) => serde_json::to_value(s),
            Self::Ban(s) => serde_json::to_value(s),
            Self::Mute(s) => serde_json::to_value(s),
            Self::Nickname(s) => serde_json::to_value(s),
            Self::ViolationName(s) => serde_json::to_value(s),
            Self::DeleteMessages(s) => serde_json::to_value(s),
            Self::Role(s) => serde_json::to_value(s),
            Self::ChannelSlowmode(s) => serde_json::to_value(s),
        };
        // plain structs of numbers, strings and vectors always serialize
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Pull a concrete settings struct out of [`PartSettings`] or fail with the part's name
macro_rules! expect_settings {
    ($settings:expr, $variant:ident, $part:expr) => {
        match $settings {
            $crate::automod::settings::PartSettings::$variant(s) => Ok(s),
            _ => Err($crate::automod::error::AutomodError::SettingsMismatch($part)),
        }
    };
}
pub(crate) use expect_settings;

/// Convenience used by rule parts with a reason field
pub fn reason_or(custom: &str, fallback: impl FnOnce() -> String) -> String {
    let body = if custom.trim().is_empty() {
        fallback()
    } else {
        custom.to_string()
    };
    format!("Automoderator:\n{body}")
}

/// Parse helper that attaches the row context to a failure
pub fn parse_for_row(
    settings_type: SettingsType,
    raw: &serde_json::Value,
    part_id: i64,
    type_id: i32,
) -> AutomodResult<PartSettings> {
    settings_type
        .parse(raw)
        .map_err(|source| AutomodError::InvalidSettings {
            part_id,
            type_id,
            source,
        })
}
