use crate::common::{loopback_pair, response_xml, stack_xml, RecordingPresenter, SCRIPT_URI};
use dbgp_client::config::{DbgpConfig, PathMap};
use dbgp_client::dbgp::{
    BreakpointRegistry, Command, Message, ProtocolSession, SessionError, SessionStatus,
};
use std::thread;
use std::time::Duration;

fn session_pair() -> (ProtocolSession, crate::common::EngineStub) {
    let (client, engine) = loopback_pair();
    let session = ProtocolSession::new(client).unwrap();
    session.set_timeout(Some(Duration::from_secs(5))).unwrap();
    (session, engine)
}

#[test]
fn test_handshake_installs_breakpoints() {
    let (mut session, mut engine) = session_pair();

    let mut registry = BreakpointRegistry::new();
    let plain = registry.add("/home/dev/site/index.php", 3, None);
    let conditional = registry.add("/home/dev/site/lib.php", 10, Some("$i > 2".to_string()));
    let path_map = PathMap::new(vec![(
        "/home/dev/site".to_string(),
        "/var/www".to_string(),
    )]);

    let engine = thread::spawn(move || {
        engine.send_init("PHP");
        // both commands are sent before any acknowledgement
        let first = engine.read_command().unwrap();
        let second = engine.read_command().unwrap();
        engine.respond(&first, r#"state="enabled" id="7""#, "");
        engine.respond(&second, r#"state="enabled" id="8""#, "");
        (first, second, engine)
    });

    session
        .init_handshake(&registry.snapshot(), &path_map)
        .unwrap();
    let (first, second, _engine) = engine.join().unwrap();

    assert_eq!(first.command(), Command::BreakpointSet);
    assert_eq!(first.arg("t"), Some("line"));
    assert_eq!(first.arg("f"), Some("file:///var/www/index.php"));
    assert_eq!(first.arg("n"), Some("3"));
    assert_eq!(first.data, None);

    assert_eq!(second.arg("f"), Some("file:///var/www/lib.php"));
    assert_eq!(second.arg("n"), Some("10"));
    assert_eq!(second.data_str().as_deref(), Some("$i > 2"));
    assert!(second.transaction_id > first.transaction_id);

    assert_eq!(session.remote_id(plain), Some("7"));
    assert_eq!(session.remote_id(conditional), Some("8"));
    assert_eq!(session.language(), "php");
    assert_eq!(session.init_packet().unwrap().fileuri, SCRIPT_URI);
}

#[test]
fn test_handshake_rejects_response_first() {
    let (mut session, mut engine) = session_pair();
    engine.send_xml(r#"<response command="run" transaction_id="1" status="break"/>"#);

    let err = session
        .init_handshake(&[], &PathMap::default())
        .unwrap_err();
    assert!(matches!(err, SessionError::Handshake(_)));
    assert!(session.is_closed());
}

#[test]
fn test_await_ack_skips_foreign_messages() {
    let (mut session, mut engine) = session_pair();

    let engine = thread::spawn(move || {
        let cmd = engine.read_command().unwrap();
        engine.send_xml(r#"<response command="run" transaction_id="99" status="running"/>"#);
        engine.send_frame("definitely not xml");
        engine.send_xml(r#"<stream type="stdout" encoding="base64">aGVsbG8=</stream>"#);
        engine.respond(
            &cmd,
            r#"status="break""#,
            &stack_xml(&[(SCRIPT_URI, 12, "{main}")]),
        );
        engine
    });

    let response = session.command(Command::StackGet, "", None).unwrap();
    let _engine = engine.join().unwrap();

    assert_eq!(response.command, Command::StackGet);
    assert_eq!(response.transaction_id, Some(1));
    assert_eq!(response.stack.len(), 1);
    assert_eq!(response.stack[0].lineno, 12);
    assert_eq!(session.status(), SessionStatus::Break);
    assert_eq!(session.outstanding(), None);
}

#[test]
fn test_timeout_keeps_session_open() {
    let (mut session, mut engine) = session_pair();
    session
        .set_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    session.set_ack_budget(2);

    let transaction_id = session.send_command(Command::Run, "", None).unwrap();
    let cmd = engine.read_command().unwrap();
    assert_eq!(cmd.transaction_id, transaction_id);

    let err = session.await_ack_retrying(transaction_id).unwrap_err();
    assert!(err.is_timeout());
    assert!(!session.is_closed());
    assert_eq!(session.retries(), 3);
    assert_eq!(session.outstanding(), Some(transaction_id));

    // the answer still arrives later
    engine.respond(&cmd, r#"status="break" reason="ok""#, "");
    let response = session.await_ack(transaction_id).unwrap();
    assert_eq!(response.status.map(|s| s.to_string()).as_deref(), Some("break"));
}

#[test]
fn test_stop_closes_session() {
    let (mut session, mut engine) = session_pair();

    let engine = thread::spawn(move || {
        let cmd = engine.read_command().unwrap();
        engine.respond(&cmd, r#"status="stopped" reason="ok""#, "");
        // client closes the connection after stop
        engine.read_command()
    });

    session.command(Command::Stop, "", None).unwrap();
    assert!(session.is_closed());
    assert_eq!(session.status(), SessionStatus::Stopped);
    assert!(engine.join().unwrap().is_none());

    assert!(matches!(
        session.send_command(Command::Run, "", None),
        Err(SessionError::Closed)
    ));
}

#[test]
fn test_peer_close_is_terminal() {
    let (mut session, engine) = session_pair();
    drop(engine);

    let err = session.receive().unwrap_err();
    assert!(err.is_terminal());
    assert!(session.is_closed());
}

#[test]
fn test_second_init_is_accepted() {
    let (mut session, mut engine) = session_pair();
    engine.send_init("php");
    engine.send_init("python");

    assert!(matches!(session.receive().unwrap(), Message::Init(_)));
    assert!(matches!(session.receive().unwrap(), Message::Init(_)));
    assert_eq!(session.language(), "python");
}

/// Answer the commands a session sends while it is promoted.
fn promotion_reply(cmd: &dbgp_client::dbgp::command::CommandLine) -> Option<String> {
    let xml = match cmd.name.as_str() {
        "step_into" => response_xml(cmd, r#"status="break" reason="ok""#, ""),
        "stack_get" => response_xml(
            cmd,
            "",
            &stack_xml(&[(SCRIPT_URI, 5, "foo"), (SCRIPT_URI, 20, "{main}")]),
        ),
        "property_get" => response_xml(
            cmd,
            "",
            r#"<error code="300"><message>can not get property</message></error>"#,
        ),
        _ => response_xml(cmd, r#"success="1""#, ""),
    };
    Some(xml)
}

#[test]
fn test_promote_from_entry() {
    let (mut session, mut engine) = session_pair();
    let presenter = RecordingPresenter::default();
    let config = DbgpConfig {
        max_depth: "3".to_string(),
        ..Default::default()
    };

    engine.send_init("php");
    session.init_handshake(&[], &PathMap::default()).unwrap();

    let engine = engine.spawn(promotion_reply);
    session.promote(&config, &presenter).unwrap();
    assert!(session.is_interactive());

    let state = session.interactive().unwrap();
    assert_eq!(state.stack().len(), 2);
    assert_eq!(state.current(), 0);
    assert_eq!(state.current_frame().unwrap().file, "/var/www/index.php");
    assert_eq!(state.current_frame().unwrap().line, 5);

    // errors of silent request queries are not shown
    assert!(presenter.errors().is_empty());

    session.close();
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
            "property_get"
        ]
    );
    assert_eq!(received[2].arg("n"), Some("max_depth"));
    assert_eq!(received[2].arg("v"), Some("3"));
    // request variables are read at the outermost frame
    assert_eq!(received[5].arg("d"), Some("1"));
    assert_eq!(received[5].arg("n"), Some("$_SERVER['REQUEST_URI']"));
}

#[test]
fn test_rerun_when_engine_is_running() {
    let (mut session, mut engine) = session_pair();
    let presenter = RecordingPresenter::default();

    engine.send_init("python");
    session.init_handshake(&[], &PathMap::default()).unwrap();

    let mut runs = 0;
    let engine = engine.spawn(move |cmd| {
        let xml = match cmd.name.as_str() {
            "run" => {
                runs += 1;
                let status = if runs == 1 { "running" } else { "break" };
                response_xml(cmd, &format!(r#"status="{status}" reason="ok""#), "")
            }
            "eval" => response_xml(
                cmd,
                "",
                r#"<error code="5"><message>command is not available</message></error>"#,
            ),
            _ => return promotion_reply(cmd),
        };
        Some(xml)
    });

    session
        .promote(&DbgpConfig::default(), &presenter)
        .unwrap();
    session
        .interactive_command(Command::Run, "", None, &presenter)
        .unwrap();
    assert_eq!(session.status(), SessionStatus::Running);

    session.eval("x + 1", &presenter).unwrap();
    assert_eq!(session.status(), SessionStatus::Break);
    assert!(presenter.errors().is_empty());

    session.close();
    let received = engine.join().unwrap();
    let names: Vec<_> = received
        .iter()
        .skip_while(|c| c.name != "run")
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["run", "eval", "run"]);

    let eval = received.iter().find(|c| c.name == "eval").unwrap();
    assert_eq!(eval.data_str().as_deref(), Some("evalResult=(x + 1)"));
}

#[test]
fn test_error_reported_when_engine_is_in_break() {
    let (mut session, mut engine) = session_pair();
    let presenter = RecordingPresenter::default();

    engine.send_init("php");
    session.init_handshake(&[], &PathMap::default()).unwrap();

    let engine = engine.spawn(|cmd| {
        if cmd.name == "eval" {
            return Some(response_xml(
                cmd,
                "",
                r#"<error code="5"><message>command is not available</message></error>"#,
            ));
        }
        promotion_reply(cmd)
    });

    session
        .promote(&DbgpConfig::default(), &presenter)
        .unwrap();
    session.eval("$a", &presenter).unwrap();

    let errors = presenter.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Error when eval"));
    assert!(errors[0].ends_with("command is not available"));

    session.close();
    let received = engine.join().unwrap();
    let eval = received.iter().find(|c| c.name == "eval").unwrap();
    assert_eq!(eval.data_str().as_deref(), Some("$evalResult=($a)"));
    assert_eq!(received.iter().filter(|c| c.name == "run").count(), 0);
}
