use tracing::trace;

use crate::commands::{Command, CommandKind, MacroContext};
use crate::error::Result;
use crate::macros::Macro;
use crate::parser;
use crate::scheduler::MacroEvent;
use crate::utils::interpolation;

use super::RunOptions;

/// Runs a parsed command list.
#[derive(Debug)]
pub struct DslEngine {
    commands: Vec<Command>,
}

impl DslEngine {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// Render templates, parse, then apply craft-loop metadata and the run's
    /// loop count.
    pub fn load(definition: &Macro, options: &RunOptions) -> Result<Self> {
        let body = interpolation::render_macro(definition, options.trigger.as_ref());
        let mut commands = parser::parse(&body)?;

        let metadata = definition.metadata();
        if metadata.craft_loop {
            if metadata.craft_loop_count > 0 {
                commands.push(parser::parse_line(&format!(
                    "/gate {}",
                    metadata.craft_loop_count
                ))?);
            }
            commands.push(parser::parse_line("/loop")?);
        }

        if let Some(count) = options.loop_count {
            let mut bounded = false;
            for command in &mut commands {
                if let CommandKind::Loop(counter) = command.kind_mut() {
                    counter.bound(count);
                    bounded = true;
                }
            }
            if !bounded {
                commands.push(parser::parse_line(&format!("/loop {count}"))?);
            }
        }
        Ok(Self { commands })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub async fn run(mut self, ctx: &mut MacroContext) -> Result<()> {
        let id = ctx.macro_id();
        let total = self.commands.len();
        let mut index = 0;
        while let Some(command) = self.commands.get_mut(index) {
            ctx.instance().checkpoint().await?;
            ctx.instance().set_step(index);
            trace!(target: "macrobot::engine", macro_id = %id, step = index, command = %command.text(), "Executing command");
            command.execute(ctx).await?;
            ctx.scheduler().publish(MacroEvent::StepCompleted {
                id,
                step: index + 1,
                total: Some(total),
            });
            index = ctx.take_jump().unwrap_or(index + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::{MacroId, MacroLanguage};

    fn load(source: &str, options: RunOptions) -> DslEngine {
        let def = Macro::new(MacroId::new(1), "m", MacroLanguage::Dsl, source).unwrap();
        DslEngine::load(&def, &options).unwrap()
    }

    fn loop_counts(engine: &DslEngine) -> Vec<Option<u32>> {
        engine
            .commands()
            .iter()
            .filter_map(|c| match c.kind() {
                CommandKind::Loop(counter) => Some(counter.remaining()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn loop_count_bounds_an_unbounded_loop() {
        let engine = load("/echo a\n/loop", RunOptions::with_loops(3));
        assert_eq!(engine.len(), 2);
        assert_eq!(loop_counts(&engine), vec![Some(3)]);
    }

    #[test]
    fn loop_count_appends_a_loop_when_missing() {
        let engine = load("/echo a", RunOptions::with_loops(2));
        assert_eq!(engine.len(), 2);
        assert_eq!(loop_counts(&engine), vec![Some(2)]);
        assert_eq!(load("/echo a", RunOptions::default()).len(), 1);
    }

    #[test]
    fn craft_loop_metadata_appends_gate_and_loop() {
        let engine = load(
            "// [[meta]]\n// craft_loop: true\n// craft_loop_count: 5\n// [[meta]]\n/ac Synthesis",
            RunOptions::default(),
        );
        let kinds: Vec<&str> = engine.commands().iter().map(Command::text).collect();
        assert_eq!(kinds, vec!["/ac Synthesis", "/gate 5", "/loop"]);
    }
}
