//! Modifier values and the per-command modifier set.
//!
//! Modifiers are resolved once, at parse time, into typed values. A command
//! keeps them in a [`ModifierSet`] keyed by [`ModifierKind`], so adding a
//! modifier never changes the shape of a command.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use rand::random_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModifierKind {
    Wait,
    Echo,
    Unsafe,
    Condition,
    MaxWait,
    Index,
    List,
    Party,
    Distance,
    Quality,
    ErrorIf,
}

/// Post-command delay, fixed or ranged (`<wait.1.5-3>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitSpec {
    pub wait_ms: u64,
    pub until_ms: Option<u64>,
}

impl WaitSpec {
    pub const ZERO: WaitSpec = WaitSpec {
        wait_ms: 0,
        until_ms: None,
    };

    pub fn fixed(wait_ms: u64) -> Self {
        Self {
            wait_ms,
            until_ms: None,
        }
    }

    /// Parse `S` or `S-S` where `S` is seconds, fractional allowed.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (lo, hi) = match raw.split_once('-') {
            Some((lo, hi)) => (lo, Some(hi)),
            None => (raw, None),
        };
        Ok(Self {
            wait_ms: seconds_to_ms(lo)?,
            until_ms: hi.map(seconds_to_ms).transpose()?,
        })
    }

    /// Pick the delay for one execution; ranged waits are sampled uniformly.
    pub fn resolve(&self) -> Duration {
        let ms = match self.until_ms {
            None => self.wait_ms,
            Some(until) => {
                let (lo, hi) = if self.wait_ms <= until {
                    (self.wait_ms, until)
                } else {
                    (until, self.wait_ms)
                };
                if lo == hi { lo } else { random_range(lo..=hi) }
            }
        };
        Duration::from_millis(ms)
    }

    pub fn is_zero(&self) -> bool {
        self.wait_ms == 0 && self.until_ms.is_none_or(|u| u == 0)
    }
}

impl fmt::Display for WaitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ms_to_seconds(self.wait_ms))?;
        if let Some(until) = self.until_ms {
            write!(f, "-{}", ms_to_seconds(until))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    High,
    Normal,
}

/// Failure classes an `<errorif.…>` modifier can promote to a macro abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCondition {
    ActionTimeout,
    ItemNotFound,
    CantUse,
    TargetNotFound,
    AddonNotFound,
    AddonTimeout,
}

impl ErrorCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActionTimeout => "actiontimeout",
            Self::ItemNotFound => "itemnotfound",
            Self::CantUse => "cantuse",
            Self::TargetNotFound => "targetnotfound",
            Self::AddonNotFound => "addonnotfound",
            Self::AddonTimeout => "addontimeout",
        }
    }

    fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "actiontimeout" => Ok(Self::ActionTimeout),
            "itemnotfound" => Ok(Self::ItemNotFound),
            "cantuse" => Ok(Self::CantUse),
            "targetnotfound" => Ok(Self::TargetNotFound),
            "addonnotfound" => Ok(Self::AddonNotFound),
            "addontimeout" => Ok(Self::AddonTimeout),
            other => Err(format!(
                "unknown error condition `{other}` (expected actiontimeout, itemnotfound, cantuse, targetnotfound, addonnotfound or addontimeout)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Wait(WaitSpec),
    Echo,
    Unsafe,
    /// Skip the command when any of these named conditions already holds.
    Condition(Vec<String>),
    MaxWait(Duration),
    Index(u32),
    List(u32),
    Party(u8),
    Distance(f32),
    Quality(Quality),
    ErrorIf(BTreeSet<ErrorCondition>),
}

impl Modifier {
    pub fn kind(&self) -> ModifierKind {
        match self {
            Self::Wait(_) => ModifierKind::Wait,
            Self::Echo => ModifierKind::Echo,
            Self::Unsafe => ModifierKind::Unsafe,
            Self::Condition(_) => ModifierKind::Condition,
            Self::MaxWait(_) => ModifierKind::MaxWait,
            Self::Index(_) => ModifierKind::Index,
            Self::List(_) => ModifierKind::List,
            Self::Party(_) => ModifierKind::Party,
            Self::Distance(_) => ModifierKind::Distance,
            Self::Quality(_) => ModifierKind::Quality,
            Self::ErrorIf(_) => ModifierKind::ErrorIf,
        }
    }
}

impl fmt::Display for Modifier {
    /// Canonical `<name.param>` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait(w) => write!(f, "<wait.{w}>"),
            Self::Echo => f.write_str("<echo>"),
            Self::Unsafe => f.write_str("<unsafe>"),
            Self::Condition(names) => write!(f, "<condition.{}>", names.join(",")),
            Self::MaxWait(d) => write!(f, "<maxwait.{}>", ms_to_seconds(d.as_millis() as u64)),
            Self::Index(n) => write!(f, "<index.{n}>"),
            Self::List(n) => write!(f, "<list.{n}>"),
            Self::Party(n) => write!(f, "<party.{n}>"),
            Self::Distance(d) => write!(f, "<distance.{d}>"),
            Self::Quality(Quality::High) => f.write_str("<quality.hq>"),
            Self::Quality(Quality::Normal) => f.write_str("<quality.nq>"),
            Self::ErrorIf(conds) => {
                let names: Vec<&str> = conds.iter().map(|c| c.as_str()).collect();
                write!(f, "<errorif.{}>", names.join(","))
            }
        }
    }
}

/// Modifiers attached to one command, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifierSet {
    slots: BTreeMap<ModifierKind, Modifier>,
}

impl ModifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a modifier; a second modifier of the same kind is handed back.
    pub fn insert(&mut self, modifier: Modifier) -> Result<(), Modifier> {
        let kind = modifier.kind();
        if self.slots.contains_key(&kind) {
            return Err(modifier);
        }
        self.slots.insert(kind, modifier);
        Ok(())
    }

    pub fn get(&self, kind: ModifierKind) -> Option<&Modifier> {
        self.slots.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modifier> {
        self.slots.values()
    }

    pub fn wait(&self) -> WaitSpec {
        match self.get(ModifierKind::Wait) {
            Some(Modifier::Wait(w)) => *w,
            _ => WaitSpec::ZERO,
        }
    }

    pub fn echo(&self) -> bool {
        self.slots.contains_key(&ModifierKind::Echo)
    }

    pub fn is_unsafe(&self) -> bool {
        self.slots.contains_key(&ModifierKind::Unsafe)
    }

    pub fn conditions(&self) -> &[String] {
        match self.get(ModifierKind::Condition) {
            Some(Modifier::Condition(names)) => names,
            _ => &[],
        }
    }

    pub fn max_wait(&self) -> Option<Duration> {
        match self.get(ModifierKind::MaxWait) {
            Some(Modifier::MaxWait(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self.get(ModifierKind::Index) {
            Some(Modifier::Index(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn list_index(&self) -> Option<u32> {
        match self.get(ModifierKind::List) {
            Some(Modifier::List(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn party_index(&self) -> Option<u8> {
        match self.get(ModifierKind::Party) {
            Some(Modifier::Party(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self.get(ModifierKind::Distance) {
            Some(Modifier::Distance(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn quality(&self) -> Option<Quality> {
        match self.get(ModifierKind::Quality) {
            Some(Modifier::Quality(q)) => Some(*q),
            _ => None,
        }
    }

    pub fn error_if(&self, condition: ErrorCondition) -> bool {
        matches!(self.get(ModifierKind::ErrorIf), Some(Modifier::ErrorIf(c)) if c.contains(&condition))
    }
}

// Constructor rules referenced by the registry. `None` means the bare `<name>` form.

pub(crate) fn wait_rule(param: Option<&str>) -> Result<Modifier, String> {
    WaitSpec::parse(required(param, "wait")?).map(Modifier::Wait)
}

pub(crate) fn echo_rule(param: Option<&str>) -> Result<Modifier, String> {
    bare(param, "echo").map(|()| Modifier::Echo)
}

pub(crate) fn unsafe_rule(param: Option<&str>) -> Result<Modifier, String> {
    bare(param, "unsafe").map(|()| Modifier::Unsafe)
}

pub(crate) fn condition_rule(param: Option<&str>) -> Result<Modifier, String> {
    let names: Vec<String> = required(param, "condition")?
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        return Err("<condition> needs at least one condition name".into());
    }
    Ok(Modifier::Condition(names))
}

pub(crate) fn max_wait_rule(param: Option<&str>) -> Result<Modifier, String> {
    let ms = seconds_to_ms(required(param, "maxwait")?)?;
    Ok(Modifier::MaxWait(Duration::from_millis(ms)))
}

pub(crate) fn index_rule(param: Option<&str>) -> Result<Modifier, String> {
    positive(required(param, "index")?).map(Modifier::Index)
}

pub(crate) fn list_rule(param: Option<&str>) -> Result<Modifier, String> {
    positive(required(param, "list")?).map(Modifier::List)
}

pub(crate) fn party_rule(param: Option<&str>) -> Result<Modifier, String> {
    let n = positive(required(param, "party")?)?;
    if n > 8 {
        return Err(format!("party index {n} is out of range (1-8)"));
    }
    Ok(Modifier::Party(n as u8))
}

pub(crate) fn distance_rule(param: Option<&str>) -> Result<Modifier, String> {
    let raw = required(param, "distance")?;
    match raw.trim().parse::<f32>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Ok(Modifier::Distance(d)),
        _ => Err(format!("invalid distance `{raw}`")),
    }
}

pub(crate) fn quality_rule(param: Option<&str>) -> Result<Modifier, String> {
    match required(param, "quality")?.trim().to_ascii_lowercase().as_str() {
        "hq" | "high" => Ok(Modifier::Quality(Quality::High)),
        "nq" | "normal" => Ok(Modifier::Quality(Quality::Normal)),
        other => Err(format!("unknown quality `{other}` (expected hq or nq)")),
    }
}

pub(crate) fn hq_rule(param: Option<&str>) -> Result<Modifier, String> {
    bare(param, "hq").map(|()| Modifier::Quality(Quality::High))
}

pub(crate) fn error_if_rule(param: Option<&str>) -> Result<Modifier, String> {
    let conds = required(param, "errorif")?
        .split(',')
        .map(ErrorCondition::parse)
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(Modifier::ErrorIf(conds))
}

fn required<'a>(param: Option<&'a str>, name: &str) -> Result<&'a str, String> {
    match param {
        Some(p) if !p.trim().is_empty() => Ok(p),
        _ => Err(format!("<{name}> needs a parameter, e.g. <{name}.1>")),
    }
}

fn bare(param: Option<&str>, name: &str) -> Result<(), String> {
    match param {
        None => Ok(()),
        Some(p) => Err(format!("<{name}> takes no parameter, got `{p}`")),
    }
}

fn positive(raw: &str) -> Result<u32, String> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a positive whole number, got `{raw}`")),
    }
}

pub(crate) fn seconds_to_ms(raw: &str) -> Result<u64, String> {
    match raw.trim().parse::<f64>() {
        Ok(s) if s.is_finite() && s >= 0.0 => Ok((s * 1000.0).round() as u64),
        _ => Err(format!("invalid seconds value `{}`", raw.trim())),
    }
}

fn ms_to_seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        let s = format!("{:.3}", ms as f64 / 1000.0);
        s.trim_end_matches('0').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_spec_parses_fixed_and_ranged() {
        assert_eq!(WaitSpec::parse("1").unwrap(), WaitSpec::fixed(1000));
        assert_eq!(
            WaitSpec::parse("1.5-3").unwrap(),
            WaitSpec {
                wait_ms: 1500,
                until_ms: Some(3000)
            }
        );
        assert!(WaitSpec::parse("soon").is_err());
        assert!(WaitSpec::parse("1-").is_err());
    }

    #[test]
    fn ranged_wait_resolves_inside_range() {
        let spec = WaitSpec::parse("0.2-0.4").unwrap();
        for _ in 0..50 {
            let d = spec.resolve().as_millis();
            assert!((200..=400).contains(&d), "{d} out of range");
        }
        let reversed = WaitSpec {
            wait_ms: 400,
            until_ms: Some(200),
        };
        let d = reversed.resolve().as_millis();
        assert!((200..=400).contains(&d));
    }

    #[test]
    fn wait_spec_display_is_seconds() {
        assert_eq!(WaitSpec::parse("1.5-3").unwrap().to_string(), "1.5-3");
        assert_eq!(WaitSpec::fixed(250).to_string(), "0.25");
    }

    #[test]
    fn set_rejects_second_modifier_of_a_kind() {
        let mut set = ModifierSet::new();
        set.insert(Modifier::Echo).unwrap();
        set.insert(Modifier::Index(2)).unwrap();
        assert_eq!(set.insert(Modifier::Echo), Err(Modifier::Echo));
        assert!(set.echo());
        assert_eq!(set.index(), Some(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn error_if_accepts_lists() {
        let m = error_if_rule(Some("itemnotfound,cantuse")).unwrap();
        let mut set = ModifierSet::new();
        set.insert(m).unwrap();
        assert!(set.error_if(ErrorCondition::ItemNotFound));
        assert!(set.error_if(ErrorCondition::CantUse));
        assert!(!set.error_if(ErrorCondition::ActionTimeout));
        assert!(error_if_rule(Some("sometimes")).is_err());
    }

    #[test]
    fn party_index_is_bounded() {
        assert_eq!(party_rule(Some("8")).unwrap(), Modifier::Party(8));
        assert!(party_rule(Some("9")).is_err());
        assert!(party_rule(Some("0")).is_err());
    }
}
