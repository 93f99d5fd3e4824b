use crate::common::{
    free_port, response_xml, stack_xml, wait_until, EngineStub, Event, RecordingPresenter,
    SCRIPT_URI,
};
use dbgp_client::config::DbgpConfig;
use dbgp_client::dbgp::command::CommandLine;
use dbgp_client::dbgp::{
    BreakpointError, BreakpointHandle, ControllerError, DebugController, Progress, SessionStatus,
    Toggle,
};
use serial_test::serial;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

fn controller(config: DbgpConfig) -> (DebugController, RecordingPresenter) {
    let presenter = RecordingPresenter::default();
    let controller = DebugController::new(config, Arc::new(presenter.clone()));
    (controller, presenter)
}

fn entry_config() -> DbgpConfig {
    DbgpConfig {
        port: free_port(),
        break_at_entry: true,
        ..Default::default()
    }
}

/// Engine stopped at line 3 of the script that finishes on `run`.
fn script_reply(cmd: &CommandLine) -> Option<String> {
    let xml = match cmd.name.as_str() {
        "step_into" | "step_over" => response_xml(cmd, r#"status="break" reason="ok""#, ""),
        "stack_get" => response_xml(cmd, "", &stack_xml(&[(SCRIPT_URI, 3, "{main}")])),
        "run" => response_xml(cmd, r#"status="stopping" reason="ok""#, ""),
        "stop" => response_xml(cmd, r#"status="stopped" reason="ok""#, ""),
        "breakpoint_set" => response_xml(cmd, r#"state="enabled" id="5""#, ""),
        "property_get" => response_xml(
            cmd,
            "",
            r#"<property name="$argv" fullname="$argv" type="array" children="1" numchildren="2"/>"#,
        ),
        "detach" => return None,
        _ => response_xml(cmd, r#"success="1""#, ""),
    };
    Some(xml)
}

fn connect_engine(
    controller: &DebugController,
    reply: fn(&CommandLine) -> Option<String>,
) -> JoinHandle<Vec<CommandLine>> {
    let addr = controller.local_addr().unwrap();
    let mut engine = EngineStub::connect(addr);
    engine.send_init("php");
    engine.spawn(reply)
}

#[test]
fn test_no_session() {
    let (mut controller, _) = controller(DbgpConfig::default());

    assert!(matches!(
        controller.step_into(),
        Err(ControllerError::NoSession)
    ));
    assert!(matches!(
        controller.eval("1 + 1"),
        Err(ControllerError::NoSession)
    ));
    assert!(matches!(
        controller.frame_up(),
        Err(ControllerError::NoSession)
    ));
    assert!(controller.stack().is_empty());
}

#[test]
fn test_breakpoints_without_session() {
    let (mut controller, _) = controller(DbgpConfig::default());

    let toggle = controller
        .toggle_breakpoint("/var/www/index.php", 3, None)
        .unwrap();
    assert_eq!(toggle, Toggle::Added(BreakpointHandle(10001)));
    let toggle = controller
        .toggle_breakpoint("/var/www/index.php", 3, None)
        .unwrap();
    assert_eq!(toggle, Toggle::Removed(BreakpointHandle(10001)));

    let handle = controller.add_breakpoint("/var/www/lib.php", 8, Some("$x".to_string()));
    assert_eq!(handle, BreakpointHandle(10002));
    controller.remove_breakpoint(handle).unwrap();
    assert!(matches!(
        controller.remove_breakpoint(handle),
        Err(ControllerError::Breakpoint(BreakpointError::NotFound(h))) if h == handle
    ));
}

#[test]
fn test_clear_and_restore_breakpoints() {
    let (mut controller, _) = controller(DbgpConfig::default());
    controller.add_breakpoint("/var/www/index.php", 3, None);
    controller.add_breakpoint("/var/www/index.php", 9, Some("$i == 2".to_string()));

    assert_eq!(controller.clear_breakpoints(), 2);
    assert!(controller.breakpoints().is_empty());

    // a breakpoint set after clear is not duplicated by restore
    let handle = controller.add_breakpoint("/var/www/index.php", 9, None);
    assert_eq!(handle, BreakpointHandle(10003));
    assert_eq!(controller.restore_breakpoints(), 1);

    let breakpoints = controller.breakpoints();
    assert_eq!(breakpoints.len(), 2);
    assert!(breakpoints
        .iter()
        .any(|bp| bp.line == 3 && bp.expression.is_none() && bp.handle == BreakpointHandle(10004)));
    assert_eq!(controller.restore_breakpoints(), 0);
}

#[test]
fn test_watch_lists() {
    let (mut controller, _) = controller(DbgpConfig::default());

    assert!(controller.toggle_watch("$user"));
    assert!(controller.toggle_auto_eval("count($items)"));
    assert_eq!(controller.watches(), ["$user".to_string()]);
    assert!(!controller.toggle_watch("$user"));
    assert!(controller.watches().is_empty());
    assert_eq!(controller.auto_evals(), ["count($items)".to_string()]);

    assert!(controller.toggle_context());
    assert!(!controller.toggle_context());
}

#[test]
#[serial]
fn test_run_starts_listener() {
    let (mut controller, _) = controller(entry_config());

    let progress = controller.run().unwrap();
    assert!(matches!(progress, Progress::Listening(_)));
    assert_eq!(controller.run().unwrap(), Progress::Waiting);

    controller.stop_listening(true);
}

#[test]
#[serial]
fn test_session_from_entry_to_end() {
    let (mut controller, presenter) = controller(entry_config());
    controller.start_listening().unwrap();
    assert!(controller.toggle_watch("argv"));

    let engine = connect_engine(&controller, script_reply);
    assert!(wait_until(Duration::from_secs(5), || controller.pending() == 1));

    let progress = controller.run().unwrap();
    assert!(matches!(progress, Progress::Promoted(_)));
    assert!(controller.active_session().is_some());
    assert_eq!(controller.stack().len(), 1);
    assert!(presenter
        .events()
        .contains(&Event::Source("/var/www/index.php".to_string(), 3)));

    let progress = controller.step_over().unwrap();
    assert_eq!(progress, Progress::Continued(SessionStatus::Break));

    // breakpoint set while debugging goes to the engine at once
    let handle = controller.add_breakpoint("/var/www/index.php", 7, None);
    assert_eq!(
        controller.active_session().unwrap().remote_id(handle),
        Some("5")
    );
    controller.remove_breakpoint(handle).unwrap();

    let progress = controller.run().unwrap();
    assert_eq!(progress, Progress::Ended);
    assert!(controller.active_session().is_none());
    assert!(presenter.errors().is_empty());

    let received = engine.join().unwrap();
    let names: Vec<_> = received.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "feature_set",
            "feature_set",
            "feature_set",
            "step_into",
            "stack_get",
            "property_get",
            "property_get",
            // watched variable
            "property_get",
            "step_over",
            "stack_get",
            "property_get",
            "breakpoint_set",
            "breakpoint_remove",
            "run",
            "stop",
        ]
    );
    assert_eq!(received[7].arg("n"), Some("$argv"));
    assert_eq!(received[12].arg("d"), Some("5"));
}

/// Engine stopped two calls deep: `{main}` calls `load`, which calls `helper`.
fn nested_reply(cmd: &CommandLine) -> Option<String> {
    match cmd.name.as_str() {
        "stack_get" => {
            let frames = stack_xml(&[
                ("file:///var/www/lib.php", 12, "helper"),
                ("file:///var/www/lib.php", 30, "load"),
                (SCRIPT_URI, 3, "{main}"),
            ]);
            Some(response_xml(cmd, "", &frames))
        }
        _ => script_reply(cmd),
    }
}

#[test]
#[serial]
fn test_frame_navigation() {
    let (mut controller, presenter) = controller(entry_config());
    controller.start_listening().unwrap();

    let engine = connect_engine(&controller, nested_reply);
    assert!(wait_until(Duration::from_secs(5), || controller.pending() == 1));
    assert!(matches!(controller.run().unwrap(), Progress::Promoted(_)));
    assert_eq!(controller.stack().len(), 3);

    let sources = |presenter: &RecordingPresenter| -> Vec<Event> {
        presenter
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Source(..)))
            .collect()
    };
    let source = |file: &str, line| Event::Source(file.to_string(), line);
    let seen = sources(&presenter).len();

    assert!(controller.frame_down().unwrap());
    assert!(controller.frame_down().unwrap());
    assert!(!controller.frame_down().unwrap());
    assert!(controller.frame_up().unwrap());
    assert!(controller.frame_up().unwrap());
    assert!(!controller.frame_up().unwrap());
    assert!(!controller.go_frame(5).unwrap());
    assert!(controller.go_frame(2).unwrap());

    assert_eq!(
        sources(&presenter)[seen..],
        [
            source("/var/www/lib.php", 30),
            source("/var/www/index.php", 3),
            source("/var/www/lib.php", 30),
            source("/var/www/lib.php", 12),
            source("/var/www/index.php", 3),
        ]
    );
    let current = |controller: &DebugController| {
        controller
            .active_session()
            .and_then(|session| session.interactive())
            .map(|state| state.current())
    };
    assert_eq!(current(&controller), Some(2));

    // a new stack puts the focus back on the innermost frame
    let progress = controller.step_over().unwrap();
    assert_eq!(progress, Progress::Continued(SessionStatus::Break));
    assert_eq!(current(&controller), Some(0));
    assert_eq!(
        sources(&presenter).last(),
        Some(&source("/var/www/lib.php", 12))
    );

    assert_eq!(controller.run().unwrap(), Progress::Ended);
    assert!(presenter.errors().is_empty());
    engine.join().unwrap();
}

#[test]
#[serial]
fn test_timeout_switches_to_next_session() {
    let config = DbgpConfig {
        interactive_timeout_secs: 1,
        ack_retry_budget: 0,
        silent_timeout_ms: 50,
        silent_retry_budget: 5,
        ..entry_config()
    };
    let (mut controller, presenter) = controller(config);
    controller.start_listening().unwrap();

    fn mute_on_step_over(cmd: &CommandLine) -> Option<String> {
        match cmd.name.as_str() {
            "step_over" => None,
            _ => script_reply(cmd),
        }
    }
    let first = connect_engine(&controller, mute_on_step_over);
    assert!(wait_until(Duration::from_secs(5), || controller.pending() == 1));
    let second = connect_engine(&controller, script_reply);
    assert!(wait_until(Duration::from_secs(5), || controller.pending() == 2));

    assert!(matches!(controller.run().unwrap(), Progress::Promoted(_)));
    assert_eq!(controller.pending(), 1);

    // first engine does not answer, the second one is handed over
    let progress = controller.step_over().unwrap();
    assert!(matches!(progress, Progress::Promoted(_)));
    assert_eq!(controller.pending(), 0);
    assert!(presenter
        .errors()
        .iter()
        .any(|e| e.contains("switching to another session")));

    // demoted session never reaches a breakpoint and is detached
    let received = first.join().unwrap();
    let names: Vec<_> = received.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names[names.len() - 2..], ["step_over", "detach"]);

    controller.close_session();
    let received = second.join().unwrap();
    assert_eq!(received.last().map(|c| c.name.as_str()), Some("detach"));
}

#[test]
#[serial]
fn test_timeout_without_pending_sessions() {
    let config = DbgpConfig {
        interactive_timeout_secs: 1,
        ack_retry_budget: 0,
        ..entry_config()
    };
    let (mut controller, presenter) = controller(config);
    controller.start_listening().unwrap();

    fn mute_on_step_over(cmd: &CommandLine) -> Option<String> {
        match cmd.name.as_str() {
            "step_over" => None,
            _ => script_reply(cmd),
        }
    }
    let engine = connect_engine(&controller, mute_on_step_over);
    assert!(wait_until(Duration::from_secs(5), || controller.pending() == 1));
    assert!(matches!(controller.run().unwrap(), Progress::Promoted(_)));

    assert_eq!(controller.step_over().unwrap(), Progress::TimedOut);
    assert!(controller.active_session().is_some());
    assert!(presenter
        .errors()
        .iter()
        .any(|e| e.contains("Socket timeout")));

    controller.shutdown();
    let received = engine.join().unwrap();
    assert_eq!(received.last().map(|c| c.name.as_str()), Some("detach"));
}
