use mlua::{
    Function, HookTriggers, Lua, LuaSerdeExt, Table, Thread, ThreadStatus, Value as LuaValue,
    VmState,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::MacroContext;
use crate::error::{MacroError, Result};
use crate::macros::{Macro, MacroId};
use crate::scheduler::MacroEvent;

use super::{RunOptions, bridge};

/// Instructions between cancellation checks inside the interpreter.
const INTERRUPT_INTERVAL: u32 = 1_000;

/// Runs a Lua macro as a coroutine.
///
/// The script sees these globals:
/// - `yield(instruction)`: hand one DSL line to the engine and wait for it
/// - `log(message)`: write to the engine log
/// - `Config`: the metadata config defaults
/// - `Trigger`: trigger arguments, or nil for manual runs
/// - `MacroName`
///
/// Every resumption either finishes the script or yields one single-line
/// string, which runs as a transient DSL macro before the script is resumed.
/// A stopped run interrupts the interpreter even inside a loop that never
/// yields.
#[derive(Debug)]
pub struct ScriptEngine {
    name: String,
    source: String,
    config: Value,
    trigger: Option<Value>,
}

impl ScriptEngine {
    /// Compile-check the script so a broken one never starts.
    pub fn load(definition: &Macro, options: &RunOptions) -> Result<Self> {
        let engine = Self {
            name: definition.name().to_string(),
            source: definition.body().to_string(),
            config: definition.metadata().config_object(),
            trigger: options.trigger.as_ref().map(|event| {
                serde_json::json!({ "kind": event.kind.as_str(), "args": event.args })
            }),
        };
        engine.compile(&Lua::new())?;
        Ok(engine)
    }

    fn compile(&self, lua: &Lua) -> Result<Function> {
        lua.load(self.source.as_str())
            .set_name(self.name.as_str())
            .into_function()
            .map_err(|e| MacroError::Syntax {
                text: self.name.clone(),
                guidance: Some(e.to_string()),
            })
    }

    /// Fresh interpreter with the macro globals and the script as a coroutine.
    fn instantiate(&self, id: MacroId, cancel: &CancellationToken) -> Result<(Lua, Thread)> {
        let lua = Lua::new();
        let cancel = cancel.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(INTERRUPT_INTERVAL),
            move |_, _| {
                if cancel.is_cancelled() {
                    Err(mlua::Error::runtime("macro run cancelled"))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
        let globals = lua.globals();

        let coroutine: Table = globals.get("coroutine")?;
        let yield_fn: Function = coroutine.get("yield")?;
        globals.set("yield", yield_fn)?;

        let log = lua.create_function(move |_, message: String| {
            info!(target: "macrobot::script", macro_id = %id, "{message}");
            Ok(())
        })?;
        globals.set("log", log)?;
        globals.set("Config", lua.to_value(&self.config)?)?;
        match &self.trigger {
            Some(trigger) => globals.set("Trigger", lua.to_value(trigger)?)?,
            None => globals.set("Trigger", LuaValue::Nil)?,
        }
        globals.set("MacroName", self.name.as_str())?;

        let thread = lua.create_thread(self.compile(&lua)?)?;
        Ok((lua, thread))
    }

    pub async fn run(self, ctx: &mut MacroContext) -> Result<()> {
        let id = ctx.macro_id();
        // `_lua` must outlive the coroutine.
        let (_lua, thread) = self.instantiate(id, ctx.instance().cancel_token())?;
        let mut step = 0;
        loop {
            ctx.instance().checkpoint().await?;
            let yielded: LuaValue = match thread.resume(()) {
                Ok(value) => value,
                Err(_) if ctx.instance().is_cancelled() => return Err(MacroError::Cancelled),
                Err(err) => return Err(err.into()),
            };
            if thread.status() != ThreadStatus::Resumable {
                debug!(target: "macrobot::engine", macro_id = %id, steps = step, "Script finished");
                return Ok(());
            }
            let instruction = match yielded {
                LuaValue::String(s) => String::from(&*s.to_str()?),
                other => {
                    return Err(MacroError::Script(format!(
                        "yielded a {} where an instruction string was expected",
                        other.type_name()
                    )));
                }
            };
            if instruction.contains(['\r', '\n']) {
                return Err(MacroError::Script(format!(
                    "yielded instruction spans several lines: {instruction:?}"
                )));
            }
            bridge::delegate(ctx, &instruction).await?;
            step += 1;
            ctx.instance().set_step(step);
            ctx.scheduler().publish(MacroEvent::StepCompleted {
                id,
                step,
                total: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::MacroLanguage;

    #[test]
    fn load_rejects_scripts_that_do_not_compile() {
        let def = Macro::new(MacroId::new(1), "broken", MacroLanguage::Lua, "yield(\"/echo\"").unwrap();
        let err = ScriptEngine::load(&def, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, MacroError::Syntax { .. }));
    }

    #[test]
    fn coroutine_yields_instruction_strings() {
        let def = Macro::new(
            MacroId::new(2),
            "two",
            MacroLanguage::Lua,
            "yield(\"/echo \" .. MacroName)\nyield(\"/wait 0.1\")",
        )
        .unwrap();
        let engine = ScriptEngine::load(&def, &RunOptions::default()).unwrap();
        let (_lua, thread) = engine.instantiate(def.id(), &CancellationToken::new()).unwrap();

        let first: String = thread.resume(()).unwrap();
        assert_eq!(first, "/echo two");
        let second: String = thread.resume(()).unwrap();
        assert_eq!(second, "/wait 0.1");
        let _: () = thread.resume(()).unwrap();
        assert_eq!(thread.status(), ThreadStatus::Finished);
    }

    #[test]
    fn config_and_trigger_globals_are_visible() {
        let source = "-- [[meta]]\n-- configs:\n--   food:\n--     default: Stew\n-- [[meta]]\nyield(Config.food .. \" \" .. tostring(Trigger))";
        let def = Macro::new(MacroId::new(3), "cfg", MacroLanguage::Lua, source).unwrap();
        let engine = ScriptEngine::load(&def, &RunOptions::default()).unwrap();
        let (_lua, thread) = engine.instantiate(def.id(), &CancellationToken::new()).unwrap();
        let yielded: String = thread.resume(()).unwrap();
        assert_eq!(yielded, "Stew nil");
    }

    #[test]
    fn cancellation_interrupts_a_script_that_never_yields() {
        let def = Macro::new(
            MacroId::new(4),
            "spin",
            MacroLanguage::Lua,
            "local n = 0\nwhile true do n = n + 1 end",
        )
        .unwrap();
        let engine = ScriptEngine::load(&def, &RunOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_lua, thread) = engine.instantiate(def.id(), &cancel).unwrap();

        let err = thread.resume::<LuaValue>(()).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
