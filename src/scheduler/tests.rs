use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use super::*;
use crate::executor::EnvironmentError;
use crate::executor::testing::RecordingEnvironment;

fn settings() -> EngineSettings {
    EngineSettings {
        max_wait_ms: 200,
        poll_interval_ms: 5,
        ..EngineSettings::default()
    }
}

fn setup_with(settings: EngineSettings) -> (Scheduler, RecordingEnvironment) {
    let env = RecordingEnvironment::new();
    let handle = env.clone();
    let executor = PrivilegedExecutor::spawn(move || Box::new(handle)).unwrap();
    (Scheduler::new(settings, executor), env)
}

fn setup() -> (Scheduler, RecordingEnvironment) {
    setup_with(settings())
}

async fn wait_for_state(s: &Scheduler, id: MacroId, state: MacroState) {
    timeout(Duration::from_secs(3), async {
        while s.state(id) != Some(state) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never reached {state}; now {:?}", s.state(id)));
}

async fn wait_for_entry(env: &RecordingEnvironment, entry: &str) {
    timeout(Duration::from_secs(3), async {
        while !env.entries().iter().any(|e| e == entry) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("`{entry}` never recorded; log: {:?}", env.entries()));
}

/// Collect events until `id` reaches `state`.
async fn events_until(
    rx: &mut broadcast::Receiver<MacroEvent>,
    id: MacroId,
    state: MacroState,
) -> Vec<MacroEvent> {
    let mut seen = Vec::new();
    timeout(Duration::from_secs(3), async {
        loop {
            let event = rx.recv().await.unwrap();
            let done = matches!(event, MacroEvent::StateChanged { id: from, new, .. } if from == id && new == state);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();
    seen
}

#[tokio::test]
async fn runs_commands_in_order_and_reports_steps() {
    let (s, env) = setup();
    let id = s
        .register("basic", MacroLanguage::Dsl, "/echo a\n/ac \"Basic Synthesis\"\n/echo b")
        .unwrap();
    let mut rx = s.subscribe();

    s.start_macro(id, RunOptions::default()).unwrap();
    let events = events_until(&mut rx, id, MacroState::Completed).await;

    assert_eq!(env.entries(), vec!["echo:a", "action:Basic Synthesis", "echo:b"]);
    let steps: Vec<(usize, Option<usize>)> = events
        .iter()
        .filter_map(|e| match e {
            MacroEvent::StepCompleted { step, total, .. } => Some((*step, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![(1, Some(3)), (2, Some(3)), (3, Some(3))]);
    assert_eq!(
        events.first(),
        Some(&MacroEvent::StateChanged {
            id,
            new: MacroState::Running,
            old: MacroState::Ready
        })
    );
}

#[tokio::test]
async fn rejects_illegal_transitions() {
    let (s, _env) = setup();
    let id = s.register("slow", MacroLanguage::Dsl, "/wait 5").unwrap();

    assert!(matches!(
        s.pause_macro(id),
        Err(MacroError::InvalidTransition { action: "pause", .. })
    ));
    assert!(s.stop_macro(id).is_err());

    s.start_macro(id, RunOptions::default()).unwrap();
    assert_eq!(s.state(id), Some(MacroState::Running));
    assert!(matches!(
        s.resume_macro(id),
        Err(MacroError::InvalidTransition { action: "resume", .. })
    ));
    assert!(matches!(
        s.start_macro(id, RunOptions::default()),
        Err(MacroError::InvalidTransition { action: "start", .. })
    ));
    assert!(s.remove(id).is_err());

    s.pause_macro(id).unwrap();
    assert_eq!(s.state(id), Some(MacroState::Paused));
    assert!(s.pause_macro(id).is_err());
    s.resume_macro(id).unwrap();
    s.stop_macro(id).unwrap();
    assert_eq!(s.state(id), Some(MacroState::Ready));
    s.remove(id).unwrap();
    assert!(s.state(id).is_none());
}

#[tokio::test]
async fn loop_echo_counts_down() {
    let (s, env) = setup();
    let id = s
        .register("looper", MacroLanguage::Dsl, "/echo hi\n/loop 2 <echo>")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Completed).await;

    assert_eq!(
        env.entries(),
        vec![
            "echo:hi",
            "echo:2 loops remaining",
            "echo:hi",
            "echo:1 loop remaining",
            "echo:hi",
            "echo:No loops remaining",
        ]
    );
}

#[tokio::test]
async fn exhausted_gate_completes_the_macro() {
    let (s, env) = setup();
    let id = s
        .register("gated", MacroLanguage::Dsl, "/echo x\n/gate 2 <echo>\n/loop")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Completed).await;

    assert_eq!(
        env.entries(),
        vec![
            "echo:x",
            "echo:1 pass remaining",
            "echo:x",
            "echo:No passes remaining",
            "echo:x",
            "echo:Gate complete",
        ]
    );
}

#[tokio::test]
async fn run_loop_count_bounds_the_macro() {
    let (s, env) = setup();
    let id = s.register("again", MacroLanguage::Dsl, "/echo go").unwrap();
    s.start_macro(id, RunOptions::with_loops(2)).unwrap();
    wait_for_state(&s, id, MacroState::Completed).await;
    assert_eq!(env.entries(), vec!["echo:go", "echo:go", "echo:go"]);

    // A completed macro can be started again.
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Completed).await;
    assert_eq!(env.entries().len(), 4);
}

#[tokio::test]
async fn stopping_a_paused_macro_runs_nothing_further() {
    let (s, env) = setup();
    let id = s
        .register("forever", MacroLanguage::Dsl, "/echo tick\n/wait 0.02\n/loop")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_entry(&env, "echo:tick").await;

    s.pause_macro(id).unwrap();
    s.stop_macro(id).unwrap();
    assert_eq!(s.state(id), Some(MacroState::Ready));

    sleep(Duration::from_millis(30)).await;
    let settled = env.entries().len();
    sleep(Duration::from_millis(120)).await;
    assert_eq!(env.entries().len(), settled);
    assert_eq!(s.state(id), Some(MacroState::Ready));
}

#[tokio::test]
async fn stop_at_next_loop_returns_to_ready() {
    let (s, env) = setup();
    let id = s
        .register("farm", MacroLanguage::Dsl, "/echo pass\n/wait 0.02\n/loop")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_entry(&env, "echo:pass").await;

    s.stop_at_next_loop(id).unwrap();
    wait_for_state(&s, id, MacroState::Ready).await;
    let passes = env.entries().len();
    assert!((1..=2).contains(&passes), "log: {:?}", env.entries());

    sleep(Duration::from_millis(80)).await;
    assert_eq!(env.entries().len(), passes);
}

#[tokio::test]
async fn pause_at_next_loop_then_resume() {
    let (s, env) = setup();
    let id = s
        .register("farm", MacroLanguage::Dsl, "/echo pass\n/wait 0.02\n/loop")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_entry(&env, "echo:pass").await;

    s.pause_at_next_loop(id).unwrap();
    wait_for_state(&s, id, MacroState::Paused).await;
    let paused_at = env.entries().len();
    sleep(Duration::from_millis(80)).await;
    assert_eq!(env.entries().len(), paused_at);

    s.resume_macro(id).unwrap();
    assert_eq!(s.state(id), Some(MacroState::Running));
    timeout(Duration::from_secs(2), async {
        while env.entries().len() == paused_at {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    s.stop_macro(id).unwrap();
}

#[tokio::test]
async fn trigger_starts_subscribers_with_arguments() {
    let (s, env) = setup();
    let source = "// [[meta]]\n// triggers: [on_territory_change]\n// [[meta]]\n/echo arrived in {{@trigger.zone}}";
    let id = s.register("arrival", MacroLanguage::Dsl, source).unwrap();
    let other = s.register("manual", MacroLanguage::Dsl, "/echo no").unwrap();
    assert_eq!(s.trigger_subscribers(TriggerKind::OnTerritoryChange), vec![id]);

    let started = s.fire_trigger(TriggerKind::OnTerritoryChange, json!({ "zone": "Limsa" }));
    assert_eq!(started, vec![id]);
    wait_for_state(&s, id, MacroState::Completed).await;
    assert_eq!(env.entries(), vec!["echo:arrived in Limsa"]);
    assert_eq!(s.state(other), Some(MacroState::Ready));

    assert!(s.unsubscribe_from_trigger(id, TriggerKind::OnTerritoryChange));
    assert!(!s.unsubscribe_from_trigger(id, TriggerKind::OnTerritoryChange));
    assert!(s.fire_trigger(TriggerKind::OnTerritoryChange, json!({})).is_empty());
}

#[tokio::test]
async fn trigger_skips_macros_that_are_already_running() {
    let (s, _env) = setup();
    let id = s.register("busy", MacroLanguage::Dsl, "/wait 5").unwrap();
    s.subscribe_to_trigger(id, TriggerKind::OnLogin).unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();

    assert!(s.fire_trigger(TriggerKind::OnLogin, json!(null)).is_empty());
    assert!(s.subscribe_to_trigger(MacroId::new(999), TriggerKind::OnLogin).is_err());
    s.stop_macro(id).unwrap();
}

#[tokio::test]
async fn run_command_waits_for_the_named_macro() {
    let (s, env) = setup();
    let child = s.register("child", MacroLanguage::Dsl, "/echo child").unwrap();
    let parent = s
        .register("parent", MacroLanguage::Dsl, "/echo parent\n/run child\n/echo back")
        .unwrap();
    s.start_macro(parent, RunOptions::default()).unwrap();
    wait_for_state(&s, parent, MacroState::Completed).await;

    assert_eq!(env.entries(), vec!["echo:parent", "echo:child", "echo:back"]);
    assert_eq!(s.state(child), Some(MacroState::Completed));
}

#[tokio::test]
async fn run_command_with_unknown_macro_fails_the_run() {
    let (s, env) = setup();
    let id = s
        .register("parent", MacroLanguage::Dsl, "/run nobody\n/echo unreachable")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Error).await;
    assert!(env.entries().is_empty());
}

#[tokio::test]
async fn script_instructions_run_as_transient_macros() {
    let (s, env) = setup();
    let id = s
        .register("script", MacroLanguage::Lua, "yield(\"/echo one\")\nyield(\"/echo two\")")
        .unwrap();
    let mut rx = s.subscribe();
    s.start_macro(id, RunOptions::default()).unwrap();
    let events = events_until(&mut rx, id, MacroState::Completed).await;

    assert_eq!(env.entries(), vec!["echo:one", "echo:two"]);

    let mut transient: HashMap<MacroId, Vec<MacroState>> = HashMap::new();
    for event in &events {
        if let MacroEvent::StateChanged { id: from, new, .. } = event {
            if *from != id {
                transient.entry(*from).or_default().push(*new);
            }
        }
    }
    assert_eq!(transient.len(), 2);
    for states in transient.values() {
        assert_eq!(states, &vec![MacroState::Running, MacroState::Completed]);
    }
    let script_steps = events
        .iter()
        .filter(|e| matches!(e, MacroEvent::StepCompleted { id: from, total: None, .. } if *from == id))
        .count();
    assert_eq!(script_steps, 2);

    // Transient macros are gone once finished.
    let listed: Vec<MacroId> = s.list().into_iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![id]);
    assert!(transient.keys().all(|t| s.state(*t).is_none()));
}

#[tokio::test]
async fn failed_instruction_ends_the_script_in_error() {
    let (s, env) = setup();
    env.fail("Cordial", EnvironmentError::ItemNotFound("Cordial".into()));
    let id = s
        .register(
            "script",
            MacroLanguage::Lua,
            "yield(\"/item Cordial <errorif.itemnotfound>\")\nyield(\"/echo after\")",
        )
        .unwrap();
    let mut rx = s.subscribe();
    s.start_macro(id, RunOptions::default()).unwrap();
    let events = events_until(&mut rx, id, MacroState::Error).await;

    assert_eq!(env.entries(), vec!["failed item:Cordial:None"]);
    let message = events.iter().find_map(|e| match e {
        MacroEvent::Error { id: from, message } if *from == id => Some(message.clone()),
        _ => None,
    });
    assert!(message.is_some_and(|m| m.contains("Cordial")));
}

#[tokio::test]
async fn script_yielding_a_non_string_fails() {
    let (s, env) = setup();
    let id = s.register("bad", MacroLanguage::Lua, "yield(42)").unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Error).await;
    assert!(env.entries().is_empty());
}

#[tokio::test]
async fn syntax_error_leaves_state_unchanged() {
    let (s, _env) = setup();
    let dsl = s.register("broken", MacroLanguage::Dsl, "/echo ok\n/wait").unwrap();
    let lua = s.register("broken.lua", MacroLanguage::Lua, "yield(").unwrap();
    let mut rx = s.subscribe();

    assert!(matches!(
        s.start_macro(dsl, RunOptions::default()),
        Err(MacroError::Syntax { .. })
    ));
    assert!(matches!(
        s.start_macro(lua, RunOptions::default()),
        Err(MacroError::Syntax { .. })
    ));
    assert_eq!(s.state(dsl), Some(MacroState::Ready));
    assert_eq!(s.state(lua), Some(MacroState::Ready));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn environment_failures_continue_unless_escalated() {
    let (s, env) = setup();
    env.fail("Dummy", EnvironmentError::TargetNotFound("Dummy".into()));
    let lenient = s
        .register("lenient", MacroLanguage::Dsl, "/target Dummy\n/echo after")
        .unwrap();
    let strict = s
        .register(
            "strict",
            MacroLanguage::Dsl,
            "/target Dummy <errorif.targetnotfound>\n/echo never",
        )
        .unwrap();

    s.start_macro(lenient, RunOptions::default()).unwrap();
    wait_for_state(&s, lenient, MacroState::Completed).await;
    s.start_macro(strict, RunOptions::default()).unwrap();
    wait_for_state(&s, strict, MacroState::Error).await;

    assert_eq!(
        env.entries(),
        vec!["failed target:Dummy:None", "echo:after", "failed target:Dummy:None"]
    );
}

#[tokio::test]
async fn stop_on_error_aborts_any_failure() {
    let (s, env) = setup_with(EngineSettings {
        stop_on_error: true,
        ..settings()
    });
    env.fail("Dummy", EnvironmentError::TargetNotFound("Dummy".into()));
    let id = s
        .register("strict", MacroLanguage::Dsl, "/target Dummy\n/echo never")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Error).await;
    assert_eq!(env.entries(), vec!["failed target:Dummy:None"]);
}

#[tokio::test]
async fn wait_addon_times_out_into_error_when_escalated() {
    let (s, env) = setup();
    let id = s
        .register(
            "addon",
            MacroLanguage::Dsl,
            "/waitaddon Synthesis <maxwait.0.05> <errorif.addontimeout>\n/echo never",
        )
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Error).await;
    assert!(env.entries().is_empty());

    env.set_condition("addon:Synthesis", true);
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Completed).await;
}

#[tokio::test]
async fn stop_all_stops_every_active_macro() {
    let (s, _env) = setup();
    let a = s.register("a", MacroLanguage::Dsl, "/wait 0.02\n/loop").unwrap();
    let b = s.register("b", MacroLanguage::Dsl, "/wait 0.02\n/loop").unwrap();
    let idle = s.register("idle", MacroLanguage::Dsl, "/echo idle").unwrap();
    s.start_macro(a, RunOptions::default()).unwrap();
    s.start_macro(b, RunOptions::default()).unwrap();
    s.pause_macro(b).unwrap();

    assert_eq!(s.stop_all_macros(), 2);
    assert_eq!(s.state(a), Some(MacroState::Ready));
    assert_eq!(s.state(b), Some(MacroState::Ready));
    assert_eq!(s.state(idle), Some(MacroState::Ready));
    assert_eq!(s.stop_all_macros(), 0);
}

#[test]
fn registration_and_lookup() {
    let executor = PrivilegedExecutor::spawn(|| Box::new(RecordingEnvironment::new())).unwrap();
    let s = Scheduler::new(EngineSettings::default(), executor);
    let id = s.register("craft", MacroLanguage::Dsl, "/echo hi").unwrap();

    assert!(matches!(
        s.register("craft", MacroLanguage::Lua, "yield('/echo')"),
        Err(MacroError::DuplicateMacro(_))
    ));
    assert_eq!(s.find("craft"), Some(id));
    assert_eq!(s.find(&id.to_string()), Some(id));
    assert!(s.find("nothing").is_none());
    assert!(matches!(s.resolve("nothing"), Err(MacroError::UnknownMacro(_))));
    assert_eq!(
        s.list(),
        vec![MacroSummary {
            id,
            name: "craft".into(),
            language: MacroLanguage::Dsl,
            state: MacroState::Ready,
        }]
    );
}

/// Wait for the first transient macro started on behalf of `parent`.
async fn next_delegated_run(rx: &mut broadcast::Receiver<MacroEvent>, parent: MacroId) -> MacroId {
    timeout(Duration::from_secs(3), async {
        loop {
            if let MacroEvent::StateChanged {
                id,
                new: MacroState::Running,
                ..
            } = rx.recv().await.unwrap()
            {
                if id != parent {
                    return id;
                }
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn multi_line_trigger_argument_stays_in_one_command() {
    let (s, env) = setup();
    let source = "// [[meta]]\n// triggers: [on_chat_message]\n// [[meta]]\n/echo heard {{@trigger.message}}";
    let id = s.register("listener", MacroLanguage::Dsl, source).unwrap();

    s.fire_trigger(TriggerKind::OnChatMessage, json!({ "message": "hi\n/send ALT+F4" }));
    wait_for_state(&s, id, MacroState::Completed).await;
    assert_eq!(env.entries(), vec!["echo:heard hi /send ALT+F4"]);
}

#[tokio::test]
async fn multi_line_yield_is_rejected() {
    let (s, env) = setup();
    let id = s
        .register("sneaky", MacroLanguage::Lua, "yield(\"/echo a\\n/echo b\")")
        .unwrap();
    s.start_macro(id, RunOptions::default()).unwrap();
    wait_for_state(&s, id, MacroState::Error).await;
    assert!(env.entries().is_empty());
}

#[tokio::test]
async fn stopping_a_script_stops_its_delegated_run() {
    let (s, env) = setup();
    let id = s
        .register("script", MacroLanguage::Lua, "yield(\"/wait 5\")\nyield(\"/echo never\")")
        .unwrap();
    let mut rx = s.subscribe();
    s.start_macro(id, RunOptions::default()).unwrap();
    let child = next_delegated_run(&mut rx, id).await;

    s.stop_macro(id).unwrap();
    timeout(Duration::from_secs(2), async {
        while s.state(child).is_some() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(s.state(id), Some(MacroState::Ready));
    assert!(env.entries().is_empty());
    let library: Vec<(MacroId, MacroState)> = s.list().into_iter().map(|r| (r.id, r.state)).collect();
    assert_eq!(library, vec![(id, MacroState::Ready)]);
}

#[tokio::test]
async fn pausing_a_script_lets_its_delegated_run_finish() {
    let (s, env) = setup();
    let id = s
        .register("script", MacroLanguage::Lua, "yield(\"/wait 0.1\")\nyield(\"/echo after\")")
        .unwrap();
    let mut rx = s.subscribe();
    s.start_macro(id, RunOptions::default()).unwrap();
    let child = next_delegated_run(&mut rx, id).await;

    s.pause_macro(id).unwrap();
    let events = events_until(&mut rx, child, MacroState::Completed).await;
    assert!(events.iter().all(|e| !matches!(e, MacroEvent::Error { .. })));

    // The script does not resume while paused.
    sleep(Duration::from_millis(60)).await;
    assert_eq!(s.state(id), Some(MacroState::Paused));
    assert!(env.entries().is_empty());

    s.resume_macro(id).unwrap();
    wait_for_state(&s, id, MacroState::Completed).await;
    assert_eq!(env.entries(), vec!["echo:after"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_a_script_that_never_yields_ends_its_run() {
    let (s, _env) = setup();
    let id = s
        .register("spin", MacroLanguage::Lua, "local n = 0\nwhile true do n = n + 1 end")
        .unwrap();
    let mut rx = s.subscribe();
    s.start_macro(id, RunOptions::default()).unwrap();
    sleep(Duration::from_millis(30)).await;
    s.stop_macro(id).unwrap();

    // A cancelled run ends quietly: no error event, the macro stays Ready.
    sleep(Duration::from_millis(100)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, MacroEvent::Error { .. }), "{event:?}");
    }
    assert_eq!(s.state(id), Some(MacroState::Ready));
}
