//! DSL parser: macro text in, ordered [`Command`] list out.
//!
//! One non-blank, non-comment line is one command. Parsing a line:
//! - pulls every `<modifier>` out of it, in registry order;
//! - matches `/word args` and looks the word up in the command registry;
//! - builds the typed command, or forwards unknown `/word` lines as native
//!   client commands.
//!
//! Any error fails the whole macro, reporting the offending line.

pub mod grammar;
pub mod keys;
pub mod modifiers;
pub mod registry;

use std::sync::LazyLock;

use regex::Regex;

use crate::commands::{Command, CommandKind};
use crate::error::{MacroError, Result};

pub use keys::{Key, KeyCombo};
pub use modifiers::{ErrorCondition, Modifier, ModifierKind, ModifierSet, Quality, WaitSpec};

static COMMAND_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(\w+)(?:\s+(.*))?$").unwrap());

static LEFTOVER_MODIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z]\w*)(?:\.[^>]*)?>").unwrap());

const COMMENT_PREFIXES: [&str; 3] = ["//", "--", "#"];

/// Parse a whole macro body.
pub fn parse(text: &str) -> Result<Vec<Command>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_comment(line))
        .map(parse_line)
        .collect()
}

pub fn is_comment(line: &str) -> bool {
    COMMENT_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Parse a single line into a command.
pub fn parse_line(line: &str) -> Result<Command> {
    let line = line.trim();
    let (modifiers, stripped) = extract_modifiers(line)?;

    let Some(caps) = COMMAND_LINE.captures(&stripped) else {
        if stripped.starts_with('/') {
            return Err(MacroError::syntax(line, "expected `/command arguments`"));
        }
        return Ok(native(line, stripped, modifiers));
    };
    let word = caps.get(1).map_or("", |m| m.as_str());
    let args = caps.get(2).map_or("", |m| m.as_str());

    let Some(def) = registry::command(word) else {
        return Ok(native(line, stripped, modifiers));
    };
    if let Some(unknown) = LEFTOVER_MODIFIER.captures(args) {
        let name = unknown.get(1).map_or("", |m| m.as_str());
        return Err(MacroError::syntax(line, format!("unknown modifier <{name}>")));
    }
    let kind = def
        .build(args)
        .map_err(|msg| MacroError::syntax(line, format!("{msg}; usage: {}", def.usage)))?;
    Ok(Command::new(line, kind, modifiers))
}

fn native(line: &str, stripped: String, modifiers: ModifierSet) -> Command {
    Command::new(line, CommandKind::Native { text: stripped }, modifiers)
}

/// Pull every known modifier out of `line`, returning the set and the
/// remaining text with whitespace collapsed.
fn extract_modifiers(line: &str) -> Result<(ModifierSet, String)> {
    let mut set = ModifierSet::new();
    let mut rest = line.to_string();
    for (def, pattern) in registry::modifier_patterns() {
        for caps in pattern.captures_iter(&rest) {
            let param = caps.get(1).map(|m| m.as_str());
            let modifier = def
                .build(param)
                .map_err(|msg| MacroError::syntax(line, msg))?;
            set.insert(modifier).map_err(|dup| {
                MacroError::syntax(line, format!("duplicate {:?} modifier {dup}", dup.kind()))
            })?;
        }
        rest = pattern.replace_all(&rest, "").into_owned();
    }
    let collapsed = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok((set, collapsed))
}
