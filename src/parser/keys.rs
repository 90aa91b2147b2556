use std::fmt;
use std::str::FromStr;

/// A single key as written in `/send`, `/hold` and `/release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Tab,
    Space,
    Backspace,
    Shift,
    Control,
    Alt,
    Up,
    Down,
    Left,
    Right,
    F(u8),
}

impl Key {
    pub fn is_modifier(self) -> bool {
        matches!(self, Self::Shift | Self::Control | Self::Alt)
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let mut chars = token.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_alphanumeric() || c.is_ascii_punctuation() {
                return Ok(Self::Char(c.to_ascii_lowercase()));
            }
        }
        let upper = token.to_ascii_uppercase();
        let key = match upper.as_str() {
            "ENTER" | "RETURN" => Self::Enter,
            "ESC" | "ESCAPE" => Self::Escape,
            "TAB" => Self::Tab,
            "SPACE" => Self::Space,
            "BACK" | "BACKSPACE" => Self::Backspace,
            "SHIFT" => Self::Shift,
            "CTRL" | "CONTROL" => Self::Control,
            "ALT" => Self::Alt,
            "UP" => Self::Up,
            "DOWN" => Self::Down,
            "LEFT" => Self::Left,
            "RIGHT" => Self::Right,
            f if f.starts_with('F') => match f[1..].parse::<u8>() {
                Ok(n @ 1..=12) => Self::F(n),
                _ => return Err(format!("unknown key `{token}`")),
            },
            _ => return Err(format!("unknown key `{token}`")),
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            Self::Enter => f.write_str("ENTER"),
            Self::Escape => f.write_str("ESCAPE"),
            Self::Tab => f.write_str("TAB"),
            Self::Space => f.write_str("SPACE"),
            Self::Backspace => f.write_str("BACKSPACE"),
            Self::Shift => f.write_str("SHIFT"),
            Self::Control => f.write_str("CONTROL"),
            Self::Alt => f.write_str("ALT"),
            Self::Up => f.write_str("UP"),
            Self::Down => f.write_str("DOWN"),
            Self::Left => f.write_str("LEFT"),
            Self::Right => f.write_str("RIGHT"),
            Self::F(n) => write!(f, "F{n}"),
        }
    }
}

/// Keys joined with `+`, e.g. `CONTROL+SHIFT+F1`. Modifier keys go first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo(Vec<Key>);

impl KeyCombo {
    pub fn keys(&self) -> &[Key] {
        &self.0
    }
}

impl FromStr for KeyCombo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err("expected a key or key combination, e.g. CONTROL+F1".into());
        }
        // A lone "+" is the plus key, not an empty combination.
        if s.trim() == "+" {
            return Ok(Self(vec![Key::Char('+')]));
        }
        let keys = s
            .split('+')
            .map(|tok| {
                if tok.trim().is_empty() {
                    Err(format!("malformed key combination `{}`", s.trim()))
                } else {
                    tok.parse::<Key>()
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(keys))
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}
