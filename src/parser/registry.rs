//! Compile-time tables of modifiers and commands.
//!
//! Adding a modifier or a command means adding one row here; the parser walks
//! these tables and never matches on names itself.

use std::sync::LazyLock;

use regex::Regex;

use super::grammar;
use super::modifiers::{self, Modifier};
use crate::commands::CommandKind;

pub struct ModifierDef {
    pub name: &'static str,
    rule: fn(Option<&str>) -> Result<Modifier, String>,
}

impl ModifierDef {
    pub fn build(&self, param: Option<&str>) -> Result<Modifier, String> {
        (self.rule)(param)
    }
}

pub struct CommandDef {
    /// Primary name first, then aliases.
    pub names: &'static [&'static str],
    pub usage: &'static str,
    build: fn(&str) -> Result<CommandKind, String>,
}

impl CommandDef {
    pub fn name(&self) -> &'static str {
        self.names[0]
    }

    pub fn build(&self, args: &str) -> Result<CommandKind, String> {
        (self.build)(args)
    }
}

/// Extraction order; a line's modifiers are pulled out in this order.
pub static MODIFIERS: &[ModifierDef] = &[
    ModifierDef { name: "wait", rule: modifiers::wait_rule },
    ModifierDef { name: "echo", rule: modifiers::echo_rule },
    ModifierDef { name: "unsafe", rule: modifiers::unsafe_rule },
    ModifierDef { name: "condition", rule: modifiers::condition_rule },
    ModifierDef { name: "maxwait", rule: modifiers::max_wait_rule },
    ModifierDef { name: "index", rule: modifiers::index_rule },
    ModifierDef { name: "list", rule: modifiers::list_rule },
    ModifierDef { name: "party", rule: modifiers::party_rule },
    ModifierDef { name: "distance", rule: modifiers::distance_rule },
    ModifierDef { name: "quality", rule: modifiers::quality_rule },
    ModifierDef { name: "hq", rule: modifiers::hq_rule },
    ModifierDef { name: "errorif", rule: modifiers::error_if_rule },
];

pub static COMMANDS: &[CommandDef] = &[
    CommandDef { names: &["action", "ac"], usage: "/action \"Name\" <wait.N>", build: grammar::action },
    CommandDef { names: &["item"], usage: "/item \"Name\" <hq>", build: grammar::item },
    CommandDef { names: &["target"], usage: "/target \"Name\" <index.N>", build: grammar::target },
    CommandDef { names: &["callback"], usage: "/callback Addon true|false value...", build: grammar::callback },
    CommandDef { names: &["click"], usage: "/click target", build: grammar::click },
    CommandDef { names: &["send"], usage: "/send CONTROL+F1", build: grammar::send },
    CommandDef { names: &["hold"], usage: "/hold SHIFT", build: grammar::hold },
    CommandDef { names: &["release"], usage: "/release SHIFT", build: grammar::release },
    CommandDef { names: &["echo"], usage: "/echo message", build: grammar::echo },
    CommandDef { names: &["wait"], usage: "/wait 1.5 or /wait 1-3", build: grammar::wait },
    CommandDef { names: &["waitaddon"], usage: "/waitaddon Addon <maxwait.N>", build: grammar::wait_addon },
    CommandDef { names: &["require"], usage: "/require condition <maxwait.N>", build: grammar::require },
    CommandDef { names: &["loop"], usage: "/loop [count]", build: grammar::repeat },
    CommandDef { names: &["gate", "craft"], usage: "/gate count", build: grammar::gate },
    CommandDef { names: &["run", "runmacro"], usage: "/run \"Macro name\"", build: grammar::run },
];

static MODIFIER_PATTERNS: LazyLock<Vec<(&'static ModifierDef, Regex)>> = LazyLock::new(|| {
    MODIFIERS
        .iter()
        .map(|def| {
            let pattern = format!(r"(?i)<{}(?:\.([^>]*))?>", regex::escape(def.name));
            (def, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Modifier definitions paired with the pattern that finds them in a line.
pub fn modifier_patterns() -> &'static [(&'static ModifierDef, Regex)] {
    &MODIFIER_PATTERNS
}

/// Case-insensitive lookup by name or alias.
pub fn command(word: &str) -> Option<&'static CommandDef> {
    COMMANDS
        .iter()
        .find(|def| def.names.iter().any(|n| n.eq_ignore_ascii_case(word)))
}
