use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, error, info, trace, warn};

use macrobot::config::{self as cfg, Config};
use macrobot::control::Controller;
use macrobot::engine::RunOptions;
use macrobot::executor::{InputEnvironment, PrivilegedExecutor};
use macrobot::macros::MacroState;
use macrobot::scheduler::{MacroEvent, Scheduler};
use macrobot::sources::{self, SourceEvent};

/// Macrobot CLI
#[derive(Debug, Parser)]
#[command(
    name = macrobot::PKG_NAME,
    version = macrobot::PKG_VERSION,
    about = "Macro execution and scheduling engine"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long = "config", default_value = "config/macrobot.json")]
    config: PathBuf,

    /// Log environment calls instead of simulating input
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for the configuration and exit
    #[arg(long = "print-schema")]
    print_schema: bool,

    /// Start this macro (name or #id) right after loading
    #[arg(long = "run")]
    run: Option<String>,

    /// Loop count for the macro given with --run
    #[arg(long = "loops", requires = "run")]
    loops: Option<u32>,
}

/// Register every configured macro, reading file-backed ones from disk.
async fn register_macros(scheduler: &Scheduler, config: &Config) -> anyhow::Result<()> {
    for def in &config.macros {
        let source = match (&def.text, &def.path) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read macro `{}` from {path}", def.name))?,
            (None, None) => anyhow::bail!("macro `{}` has neither text nor path", def.name),
        };
        scheduler
            .register(def.name.clone(), def.language, source)
            .with_context(|| format!("Failed to register macro `{}`", def.name))?;
    }
    Ok(())
}

/// Log every scheduler event until the bus closes.
fn spawn_event_logger(scheduler: &Scheduler) -> tokio::task::JoinHandle<()> {
    let mut events = scheduler.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MacroEvent::StateChanged { id, new, old }) => {
                    info!(target: "macrobot::events", macro_id = %id, %old, %new, "MacroStateChanged");
                }
                Ok(MacroEvent::StepCompleted { id, step, total }) => {
                    trace!(target: "macrobot::events", macro_id = %id, step, ?total, "Step completed");
                }
                Ok(MacroEvent::Error { id, message }) => {
                    error!(target: "macrobot::events", macro_id = %id, %message, "Macro error");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "macrobot::events", skipped, "Event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Resolve when macro `target` leaves the active states.
async fn wait_until_settled(scheduler: &Scheduler, target: macrobot::macros::MacroId) {
    let mut events = scheduler.subscribe();
    if !scheduler.state(target).is_some_and(MacroState::is_active) {
        return;
    }
    loop {
        match events.recv().await {
            Ok(MacroEvent::StateChanged { id, new, .. }) if id == target && !new.is_active() => return,
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {
                if !scheduler.state(target).is_some_and(MacroState::is_active) {
                    return;
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    macrobot::init_tracing(args.log_level.as_deref());

    if args.print_schema {
        let schema = cfg::generate_schema();
        let json = serde_json::to_string_pretty(&schema)?;
        println!("{json}");
        return Ok(());
    }

    info!(
        version = macrobot::PKG_VERSION,
        config = %args.config.display(),
        dry_run = args.dry_run,
        "Starting Macrobot"
    );

    let config = cfg::load_from_path_async(&args.config).await?;
    debug!(target: "macrobot", "Configuration loaded successfully");

    let dry_run = args.dry_run;
    let executor = PrivilegedExecutor::spawn(move || Box::new(InputEnvironment::new(dry_run)))
        .context("Failed to start the privileged executor")?;
    let scheduler = Scheduler::new(config.settings.clone(), executor);
    register_macros(&scheduler, &config).await?;
    info!(target: "macrobot", macros = config.macros.len(), "Macros registered");

    let _logger = spawn_event_logger(&scheduler);
    let controller = Controller::new(scheduler.clone());

    let run_target = match &args.run {
        Some(name) => {
            let id = scheduler.resolve(name)?;
            let options = RunOptions {
                loop_count: args.loops,
                ..RunOptions::default()
            };
            scheduler.start_macro(id, options)?;
            Some(id)
        }
        None => None,
    };

    let sources = sources::build_sources_from_config(&config);
    if sources.is_empty() && run_target.is_none() {
        warn!("No sources configured and nothing to run. Waiting for Ctrl+C.");
    }

    let (tx, mut rx) = mpsc::channel::<SourceEvent>(256);
    let _handles = sources::spawn_all_sources(&sources, tx);

    let control_loop = async {
        while let Some(event) = rx.recv().await {
            let outcome = controller.handle(&event.payload);
            if !outcome.is_applied() {
                warn!(target: "macrobot", payload = %event.payload, %outcome, "Control request rejected");
            }
            event.respond(outcome);
        }
        // Every source has ended; keep running until interrupted.
        std::future::pending::<()>().await;
    };

    // With --run and no sources, exit once that macro is done.
    let run_finished = async {
        match run_target {
            Some(id) if sources.is_empty() => wait_until_settled(&scheduler, id).await,
            _ => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = control_loop => {}
        _ = run_finished => {
            info!("Macro finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            let stopped = scheduler.stop_all_macros();
            info!(stopped, "Stopped running macros");
        }
    }

    info!("Macrobot exited");
    Ok(())
}
