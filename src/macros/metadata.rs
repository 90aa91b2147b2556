//! Optional metadata block at the top of a macro.
//!
//! The block sits between two `[[meta]]` sentinel comment lines and holds YAML:
//!
//! ```text
//! // [[meta]]
//! // author: someone
//! // triggers: [on_login]
//! // configs:
//! //   food: { default: "Tsai tou Vounou", description: "meal to eat" }
//! // [[meta]]
//! /item "{{food}}"
//! ```
//!
//! Comment prefixes `//`, `--` and `#` are accepted so the same block works in
//! DSL and Lua macros. The block is removed from the executable body.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MacroError, Result};
use crate::macros::TriggerKind;

const SENTINEL: &str = "[[meta]]";
const COMMENT_PREFIXES: [&str; 3] = ["//", "--", "#"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroMetadata {
    pub author: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Triggers the macro is subscribed to when registered.
    pub triggers: Vec<TriggerKind>,
    pub dependencies: Vec<Dependency>,
    /// Author-supplied configuration fields, by key.
    pub configs: BTreeMap<String, ConfigField>,
    /// Append a gate (when `craft_loop_count > 0`) and a `/loop` to the macro.
    pub craft_loop: bool,
    pub craft_loop_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl MacroMetadata {
    /// Config defaults rendered as strings, for `{{key}}` interpolation.
    pub fn config_values(&self) -> HashMap<String, String> {
        self.configs
            .iter()
            .map(|(k, field)| {
                let v = match &field.default {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()
    }

    /// Config defaults as a JSON object, for script globals.
    pub fn config_object(&self) -> Value {
        Value::Object(
            self.configs
                .iter()
                .map(|(k, field)| (k.clone(), field.default.clone()))
                .collect(),
        )
    }
}

/// Split `source` into its metadata and executable body.
///
/// Sources without a block get default metadata and are returned unchanged.
pub fn split(source: &str) -> Result<(MacroMetadata, String)> {
    let lines: Vec<&str> = source.lines().collect();
    let Some(open) = lines.iter().position(|l| is_sentinel(l)) else {
        return Ok((MacroMetadata::default(), source.to_string()));
    };
    let close = lines[open + 1..]
        .iter()
        .position(|l| is_sentinel(l))
        .map(|p| p + open + 1)
        .ok_or_else(|| {
            MacroError::syntax(lines[open].trim(), "metadata block is missing its closing [[meta]] line")
        })?;

    let yaml = lines[open + 1..close]
        .iter()
        .map(|l| strip_comment(l))
        .collect::<Vec<_>>()
        .join("\n");

    let metadata = if yaml.trim().is_empty() {
        MacroMetadata::default()
    } else {
        serde_yaml::from_str(&yaml).map_err(|e| MacroError::Syntax {
            text: SENTINEL.to_string(),
            guidance: Some(format!("invalid metadata: {e}")),
        })?
    };

    let body = lines[..open]
        .iter()
        .chain(lines[close + 1..].iter())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");

    Ok((metadata, body))
}

fn is_sentinel(line: &str) -> bool {
    strip_comment(line).trim().eq_ignore_ascii_case(SENTINEL)
}

/// Remove a leading comment marker and the single space that follows it.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    for prefix in COMMENT_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.strip_prefix(' ').unwrap_or(rest);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_block_keeps_source() {
        let (meta, body) = split("/echo hi\n/wait 1").unwrap();
        assert_eq!(meta, MacroMetadata::default());
        assert_eq!(body, "/echo hi\n/wait 1");
    }

    #[test]
    fn parses_block_and_strips_it() {
        let src = "\
// [[meta]]
// author: Someone
// triggers: [on_login, on_combat_end]
// craft_loop: true
// craft_loop_count: 3
// configs:
//   food:
//     default: Tsai tou Vounou
//   count:
//     default: 4
// [[meta]]
/item \"{{food}}\"";
        let (meta, body) = split(src).unwrap();
        assert_eq!(meta.author.as_deref(), Some("Someone"));
        assert_eq!(
            meta.triggers,
            vec![TriggerKind::OnLogin, TriggerKind::OnCombatEnd]
        );
        assert!(meta.craft_loop);
        assert_eq!(meta.craft_loop_count, 3);
        let values = meta.config_values();
        assert_eq!(values["food"], "Tsai tou Vounou");
        assert_eq!(values["count"], "4");
        assert_eq!(body, "/item \"{{food}}\"");
    }

    #[test]
    fn lua_comment_prefix_is_accepted() {
        let src = "-- [[meta]]\n-- description: gather\n-- [[meta]]\nyield(\"/echo x\")";
        let (meta, body) = split(src).unwrap();
        assert_eq!(meta.description.as_deref(), Some("gather"));
        assert_eq!(body, "yield(\"/echo x\")");
    }

    #[test]
    fn unterminated_block_is_a_syntax_error() {
        let err = split("// [[meta]]\n// author: x\n/echo hi").unwrap_err();
        assert!(matches!(err, MacroError::Syntax { .. }));
    }
}
