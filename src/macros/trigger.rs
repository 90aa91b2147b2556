use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of external occurrences a macro can subscribe to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    None,
    OnLogin,
    OnLogout,
    OnCombatStart,
    OnCombatEnd,
    OnTerritoryChange,
    OnConditionChange,
    OnChatMessage,
    OnAddonEvent,
    OnUpdate,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 10] = [
        Self::None,
        Self::OnLogin,
        Self::OnLogout,
        Self::OnCombatStart,
        Self::OnCombatEnd,
        Self::OnTerritoryChange,
        Self::OnConditionChange,
        Self::OnChatMessage,
        Self::OnAddonEvent,
        Self::OnUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OnLogin => "on_login",
            Self::OnLogout => "on_logout",
            Self::OnCombatStart => "on_combat_start",
            Self::OnCombatEnd => "on_combat_end",
            Self::OnTerritoryChange => "on_territory_change",
            Self::OnConditionChange => "on_condition_change",
            Self::OnChatMessage => "on_chat_message",
            Self::OnAddonEvent => "on_addon_event",
            Self::OnUpdate => "on_update",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trigger `{0}`")]
pub struct UnknownTrigger(pub String);

impl FromStr for TriggerKind {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| UnknownTrigger(s.to_string()))
    }
}

/// One firing of a trigger, with whatever arguments the feed attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    #[serde(default)]
    pub args: Value,
}

impl TriggerEvent {
    pub fn new(kind: TriggerKind, args: Value) -> Self {
        Self { kind, args }
    }
}
