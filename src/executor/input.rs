use anyhow::Context as _;
use enigo::Keyboard as _;
use enigo::{Direction, Enigo, InputResult, Key as EKey, Settings};
use tracing::{info, trace, warn};

use crate::executor::{
    Condition, EnvCall, Environment, EnvironmentError, KeyMode, TargetSelector,
};
use crate::parser::{Key, KeyCombo, Quality};

/// Drives a game client through simulated keyboard input.
///
/// Slash commands are typed into the client's chat box (open with ENTER, type,
/// submit with ENTER); key commands press, hold or release real keys. In dry-run
/// mode every call is only logged.
///
/// Simulated input gives no feedback channel, so conditions other than
/// [`Condition::ActionSettled`] can not be observed and report `false`.
pub struct InputEnvironment {
    dry_run: bool,
    enigo: Option<Enigo>,
}

impl InputEnvironment {
    /// - dry_run: when true, only logs instead of simulating real input.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            enigo: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Type one chat line into the client.
    fn chat_line(&mut self, line: &str) -> Result<(), EnvironmentError> {
        if self.dry_run {
            info!(target: "macrobot::env", %line, "DRY-RUN chat_line");
            return Ok(());
        }
        trace!(target: "macrobot::env", %line, "chat_line");
        let enigo = self.ensure_enigo()?;
        let mut typed = || -> InputResult<()> {
            enigo.key(EKey::Return, Direction::Click)?;
            enigo.text(line)?;
            enigo.key(EKey::Return, Direction::Click)
        };
        typed().map_err(|e| EnvironmentError::Failed(format!("input simulation failed: {e}")))
    }

    fn keys(&mut self, combo: &KeyCombo, mode: KeyMode) -> Result<(), EnvironmentError> {
        if self.dry_run {
            info!(target: "macrobot::env", keys = %combo, ?mode, "DRY-RUN keys");
            return Ok(());
        }
        trace!(target: "macrobot::env", keys = %combo, ?mode, "keys");
        let enigo = self.ensure_enigo()?;
        let keys: Vec<EKey> = combo.keys().iter().copied().map(map_key).collect();
        let mut send = || -> InputResult<()> {
            match mode {
                KeyMode::Hold => {
                    for k in &keys {
                        enigo.key(*k, Direction::Press)?;
                    }
                }
                KeyMode::Release => {
                    for k in keys.iter().rev() {
                        enigo.key(*k, Direction::Release)?;
                    }
                }
                KeyMode::Press => {
                    if let Some((last, held)) = keys.split_last() {
                        for k in held {
                            enigo.key(*k, Direction::Press)?;
                        }
                        enigo.key(*last, Direction::Click)?;
                        for k in held.iter().rev() {
                            enigo.key(*k, Direction::Release)?;
                        }
                    }
                }
            }
            Ok(())
        };
        send().map_err(|e| EnvironmentError::Failed(format!("input simulation failed: {e}")))
    }

    fn ensure_enigo(&mut self) -> Result<&mut Enigo, EnvironmentError> {
        if self.enigo.is_none() {
            trace!(target: "macrobot::env", "Initializing Enigo");
            let enigo = Enigo::new(&Settings::default())
                .context("Failed to initialize Enigo")
                .map_err(|e| EnvironmentError::Failed(format!("{e:#}")))?;
            self.enigo = Some(enigo);
        }
        self.enigo
            .as_mut()
            .ok_or_else(|| EnvironmentError::Failed("Enigo unavailable".into()))
    }
}

impl Environment for InputEnvironment {
    fn perform(&mut self, call: &EnvCall) -> Result<(), EnvironmentError> {
        match call {
            EnvCall::Key { keys, mode } => self.keys(keys, *mode),
            other => {
                let line = chat_command(other);
                self.chat_line(&line)
            }
        }
    }

    fn check(&mut self, condition: &Condition) -> bool {
        match condition {
            Condition::ActionSettled => true,
            other => {
                warn!(
                    target: "macrobot::env",
                    condition = %other,
                    "condition can not be observed through simulated input; reporting false"
                );
                false
            }
        }
    }

    fn echo(&mut self, message: &str) {
        info!(target: "macrobot::echo", "{message}");
    }
}

/// Render a call as the slash command the client understands.
fn chat_command(call: &EnvCall) -> String {
    match call {
        EnvCall::Action { name } => format!("/ac \"{name}\""),
        EnvCall::Item { name, quality } => match quality {
            Some(Quality::High) => format!("/item \"{name}\" hq"),
            _ => format!("/item \"{name}\""),
        },
        EnvCall::Target { name, selector } => target_command(name, selector),
        EnvCall::Callback {
            addon,
            update,
            values,
        } => {
            let mut line = format!("/callback {addon} {update}");
            for v in values {
                line.push(' ');
                line.push_str(&v.to_string());
            }
            line
        }
        EnvCall::Click { target } => format!("/click {target}"),
        EnvCall::Native { text } => text.clone(),
        EnvCall::Key { keys, .. } => format!("/send {keys}"),
    }
}

fn target_command(name: &str, selector: &TargetSelector) -> String {
    if let Some(party) = selector.party_index {
        return format!("/target <{party}>");
    }
    format!("/target \"{name}\"")
}

fn map_key(key: Key) -> EKey {
    match key {
        Key::Char(c) => EKey::Unicode(c),
        Key::Enter => EKey::Return,
        Key::Escape => EKey::Escape,
        Key::Tab => EKey::Tab,
        Key::Space => EKey::Space,
        Key::Backspace => EKey::Backspace,
        Key::Shift => EKey::Shift,
        Key::Control => EKey::Control,
        Key::Alt => EKey::Alt,
        Key::Up => EKey::UpArrow,
        Key::Down => EKey::DownArrow,
        Key::Left => EKey::LeftArrow,
        Key::Right => EKey::RightArrow,
        Key::F(n) => match n {
            1 => EKey::F1,
            2 => EKey::F2,
            3 => EKey::F3,
            4 => EKey::F4,
            5 => EKey::F5,
            6 => EKey::F6,
            7 => EKey::F7,
            8 => EKey::F8,
            9 => EKey::F9,
            10 => EKey::F10,
            11 => EKey::F11,
            _ => EKey::F12,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CallbackValue;

    #[test]
    fn renders_chat_commands() {
        assert_eq!(
            chat_command(&EnvCall::Action {
                name: "Basic Synthesis".into()
            }),
            "/ac \"Basic Synthesis\""
        );
        assert_eq!(
            chat_command(&EnvCall::Item {
                name: "Cordial".into(),
                quality: Some(Quality::High)
            }),
            "/item \"Cordial\" hq"
        );
        assert_eq!(
            chat_command(&EnvCall::Callback {
                addon: "RecipeNote".into(),
                update: true,
                values: vec![CallbackValue::Int(8), CallbackValue::Str("x".into())],
            }),
            "/callback RecipeNote true 8 \"x\""
        );
        assert_eq!(
            chat_command(&EnvCall::Target {
                name: "ignored".into(),
                selector: TargetSelector {
                    party_index: Some(2),
                    ..Default::default()
                },
            }),
            "/target <2>"
        );
    }

    #[test]
    fn dry_run_never_touches_enigo() {
        let mut env = InputEnvironment::new(true);
        assert!(env.is_dry_run());
        env.perform(&EnvCall::Native {
            text: "/gs change 2".into(),
        })
        .unwrap();
        env.perform(&EnvCall::Key {
            keys: "CONTROL+F1".parse().unwrap(),
            mode: KeyMode::Press,
        })
        .unwrap();
        assert!(env.enigo.is_none());
        assert!(env.check(&Condition::ActionSettled));
        assert!(!env.check(&Condition::AddonReady("Synthesis".into())));
    }
}
