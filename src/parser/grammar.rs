//! Argument grammars for the built-in commands.
//!
//! Each builder takes the argument text after the command word (modifiers
//! already stripped) and returns the typed [`CommandKind`], or a message that
//! the parser turns into a syntax error.

use crate::commands::{CommandKind, GateCounter, LoopCounter};
use crate::executor::CallbackValue;
use crate::parser::{KeyCombo, WaitSpec};

type Built = Result<CommandKind, String>;

pub(crate) fn action(args: &str) -> Built {
    name(args, "action name").map(|name| CommandKind::Action { name })
}

pub(crate) fn item(args: &str) -> Built {
    name(args, "item name").map(|name| CommandKind::Item { name })
}

pub(crate) fn target(args: &str) -> Built {
    name(args, "target name").map(|name| CommandKind::Target { name })
}

pub(crate) fn callback(args: &str) -> Built {
    let mut tokens = tokenize(args)?.into_iter();
    let addon = tokens.next().ok_or("missing addon name")?;
    let update = match tokens.next().as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("true") => true,
        Some("false") => false,
        Some(other) => return Err(format!("expected true or false for update, got `{other}`")),
        None => return Err("missing update flag (true or false)".into()),
    };
    let values: Vec<CallbackValue> = tokens.map(|t| callback_value(&t)).collect();
    if values.is_empty() {
        return Err("callback needs at least one value".into());
    }
    Ok(CommandKind::Callback {
        addon,
        update,
        values,
    })
}

pub(crate) fn click(args: &str) -> Built {
    name(args, "click target").map(|target| CommandKind::Click { target })
}

pub(crate) fn send(args: &str) -> Built {
    keys(args).map(|keys| CommandKind::Send { keys })
}

pub(crate) fn hold(args: &str) -> Built {
    keys(args).map(|keys| CommandKind::Hold { keys })
}

pub(crate) fn release(args: &str) -> Built {
    keys(args).map(|keys| CommandKind::Release { keys })
}

pub(crate) fn echo(args: &str) -> Built {
    let message = args.trim();
    if message.is_empty() {
        return Err("missing message".into());
    }
    Ok(CommandKind::Echo {
        message: message.to_string(),
    })
}

pub(crate) fn wait(args: &str) -> Built {
    let raw = args.trim();
    if raw.is_empty() {
        return Err("missing wait duration".into());
    }
    WaitSpec::parse(raw).map(|wait| CommandKind::Wait { wait })
}

pub(crate) fn wait_addon(args: &str) -> Built {
    name(args, "addon name").map(|addon| CommandKind::WaitAddon { addon })
}

pub(crate) fn require(args: &str) -> Built {
    name(args, "condition name").map(|c| CommandKind::Require {
        condition: c.to_ascii_lowercase(),
    })
}

pub(crate) fn repeat(args: &str) -> Built {
    let raw = args.trim();
    if raw.is_empty() {
        return Ok(CommandKind::Loop(LoopCounter::new(None)));
    }
    raw.parse::<u32>()
        .map(|n| CommandKind::Loop(LoopCounter::new(Some(n))))
        .map_err(|_| format!("expected a loop count, got `{raw}`"))
}

pub(crate) fn gate(args: &str) -> Built {
    let raw = args.trim();
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(CommandKind::Gate(GateCounter::new(n))),
        _ => Err(format!("expected a positive pass count, got `{raw}`")),
    }
}

pub(crate) fn run(args: &str) -> Built {
    name(args, "macro name").map(|name| CommandKind::Run { name })
}

/// A single name, optionally double-quoted. Unquoted names may contain spaces.
fn name(args: &str, what: &str) -> Result<String, String> {
    let raw = args.trim();
    if raw.is_empty() {
        return Err(format!("missing {what}"));
    }
    match raw.strip_prefix('"') {
        Some(rest) => match rest.strip_suffix('"') {
            Some(inner) if !inner.is_empty() && !inner.contains('"') => Ok(inner.to_string()),
            _ => Err(format!("unterminated or malformed quotes in {what}")),
        },
        None => Ok(raw.to_string()),
    }
}

fn keys(args: &str) -> Result<KeyCombo, String> {
    args.trim().parse()
}

/// Whitespace-separated tokens; double quotes group a token and are dropped.
fn tokenize(args: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_token = false;
    for c in args.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quoted {
        return Err("unterminated quote".into());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn callback_value(token: &str) -> CallbackValue {
    if let Ok(n) = token.parse::<i64>() {
        return CallbackValue::Int(n);
    }
    match token.to_ascii_lowercase().as_str() {
        "true" => CallbackValue::Bool(true),
        "false" => CallbackValue::Bool(false),
        _ => CallbackValue::Str(token.to_string()),
    }
}
