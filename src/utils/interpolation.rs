use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::macros::{Macro, TriggerEvent};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(@?)([^{}]*?)\s*\}\}").unwrap());

/// Replace template tokens in macro text before it is parsed.
///
/// Supported token formats:
/// - `{{key}}` -> the macro's config value `vars["key"]`
/// - `{{@path.to.value}}` -> a dotted path into `globals` (e.g. `{{@trigger.zone}}`)
///
/// Unknown tokens are left intact so the parser reports them in context.
/// Non-string globals render as compact JSON. Substituted values are flattened
/// to one line, so a value can never start a command of its own.
pub fn interpolate_string<'a>(
    template: &'a str,
    vars: &HashMap<String, String>,
    globals: &BTreeMap<String, Value>,
) -> Cow<'a, str> {
    TOKEN.replace_all(template, |caps: &Captures<'_>| {
        let key = caps.get(2).map_or("", |m| m.as_str());
        let global = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let found = if key.is_empty() {
            None
        } else if global {
            lookup_global(globals, key)
        } else {
            vars.get(key).cloned()
        };
        found.map_or_else(|| caps[0].to_string(), |v| single_line(&v))
    })
}

fn single_line(value: &str) -> String {
    if !value.contains(['\r', '\n']) {
        return value.to_string();
    }
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a macro body with its config defaults and, for trigger-started
/// runs, the trigger's arguments under `@trigger`.
pub fn render_macro<'a>(definition: &'a Macro, trigger: Option<&TriggerEvent>) -> Cow<'a, str> {
    let vars = definition.metadata().config_values();
    interpolate_string(definition.body(), &vars, &macro_globals(definition, trigger))
}

/// Globals visible to templates: `@macro.name`, `@macro.id` and `@trigger.*`.
pub fn macro_globals(
    definition: &Macro,
    trigger: Option<&TriggerEvent>,
) -> BTreeMap<String, Value> {
    let mut globals = BTreeMap::new();
    globals.insert(
        "macro".to_string(),
        serde_json::json!({ "name": definition.name(), "id": definition.id().get() }),
    );
    if let Some(event) = trigger {
        let mut args = match &event.args {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other.clone());
                map
            }
        };
        args.insert("kind".into(), Value::String(event.kind.to_string()));
        globals.insert("trigger".to_string(), Value::Object(args));
    }
    globals
}

fn lookup_global(globals: &BTreeMap<String, Value>, path: &str) -> Option<String> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let mut current = globals.get(head.trim())?;
    for seg in rest.into_iter().flat_map(|r| r.split('.')) {
        current = current.as_object()?.get(seg.trim())?;
    }
    Some(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::{MacroId, MacroLanguage, TriggerKind};
    use serde_json::json;

    #[test]
    fn replaces_vars_and_globals() {
        let mut vars = HashMap::new();
        vars.insert("food".into(), "Tsai tou Vounou".into());
        let mut globals = BTreeMap::new();
        globals.insert("trigger".into(), json!({ "zone": "Limsa", "count": 3 }));

        assert_eq!(
            interpolate_string("/item \"{{ food }}\" in {{@trigger.zone}} x{{@trigger.count}}", &vars, &globals),
            "/item \"Tsai tou Vounou\" in Limsa x3"
        );
    }

    #[test]
    fn line_breaks_in_values_are_flattened() {
        let mut vars = HashMap::new();
        vars.insert("note".into(), "a\r\nb".into());
        let mut globals = BTreeMap::new();
        globals.insert("trigger".into(), json!({ "message": "hi\n/send ALT+F4" }));

        let out = interpolate_string("/echo {{note}}\n/echo {{@trigger.message}}", &vars, &globals);
        assert_eq!(out, "/echo a b\n/echo hi /send ALT+F4");
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn unknown_tokens_are_preserved() {
        let vars = HashMap::new();
        let globals = BTreeMap::new();
        let t = "Hello {{name}} from {{@trigger.zone}} {{}}";
        assert_eq!(interpolate_string(t, &vars, &globals), t);
    }

    #[test]
    fn renders_macro_configs_and_trigger_args() {
        let source = "# [[meta]]\n# configs:\n#   potion:\n#     default: Cordial\n# [[meta]]\n/item {{potion}}\n/echo {{@trigger.kind}} {{@trigger.message}} in {{@macro.name}}";
        let def = Macro::new(MacroId::new(4), "buff", MacroLanguage::Dsl, source).unwrap();
        let event = TriggerEvent::new(TriggerKind::OnChatMessage, json!({ "message": "go" }));
        let body = render_macro(&def, Some(&event));
        assert_eq!(body.trim(), "/item Cordial\n/echo on_chat_message go in buff");
    }
}
