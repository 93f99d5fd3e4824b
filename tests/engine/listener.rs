use crate::common::{free_port, response_xml, wait_until, EngineStub, Event, RecordingPresenter};
use dbgp_client::config::DbgpConfig;
use dbgp_client::dbgp::session::ParkedAt;
use dbgp_client::dbgp::{
    BreakpointRegistry, ConnectionListener, ConnectionState, ListenerError, ListenerState,
    SessionQueue,
};
use serial_test::serial;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn listener(once: bool) -> (ConnectionListener, RecordingPresenter) {
    let presenter = RecordingPresenter::default();
    let queue = Arc::new(SessionQueue::new(Arc::new(presenter.clone()), once));
    (ConnectionListener::new(queue), presenter)
}

#[test]
#[serial]
fn test_bind_error() {
    let occupied = TcpListener::bind("0.0.0.0:0").unwrap();
    let config = DbgpConfig {
        port: occupied.local_addr().unwrap().port(),
        ..Default::default()
    };
    let (mut listener, _) = listener(false);

    let err = listener
        .start(Arc::new(config), BreakpointRegistry::shared())
        .unwrap_err();
    assert!(matches!(err, ListenerError::Bind { .. }));
    assert_eq!(listener.state(), ListenerState::Closed);
}

#[test]
#[serial]
fn test_start_twice() {
    let config = Arc::new(DbgpConfig {
        port: free_port(),
        ..Default::default()
    });
    let (mut listener, presenter) = listener(false);

    listener
        .start(config.clone(), BreakpointRegistry::shared())
        .unwrap();
    assert_eq!(listener.state(), ListenerState::Listening);
    assert!(matches!(
        listener.start(config, BreakpointRegistry::shared()),
        Err(ListenerError::AlreadyListening)
    ));

    listener.stop(true);
    assert_eq!(listener.state(), ListenerState::Closed);
    assert!(wait_until(Duration::from_secs(5), || !listener.is_accepting()));
    assert_eq!(
        presenter.events().last(),
        Some(&Event::Status(0, ConnectionState::Idle))
    );
}

#[test]
#[serial]
fn test_break_at_entry_queues_after_handshake() {
    let config = Arc::new(DbgpConfig {
        port: free_port(),
        break_at_entry: true,
        ..Default::default()
    });
    let (mut listener, presenter) = listener(false);
    let addr = listener
        .start(config, BreakpointRegistry::shared())
        .unwrap();

    let mut engine = EngineStub::connect(addr);
    engine.send_init("php");
    let engine = engine.spawn(|_| None);

    let queue = listener.queue().clone();
    assert!(wait_until(Duration::from_secs(5), || queue.pending() == 1));
    assert!(presenter
        .events()
        .contains(&Event::Status(1, ConnectionState::Listening)));

    let session = queue.dequeue().unwrap();
    assert_eq!(session.parked(), ParkedAt::Entry);
    assert!(session.is_initialized());
    drop(session);

    listener.stop(true);
    assert!(engine.join().unwrap().is_empty());
}

#[test]
#[serial]
fn test_silent_break_is_queued_and_detached_on_stop() {
    let config = Arc::new(DbgpConfig {
        port: free_port(),
        silent_timeout_ms: 50,
        ..Default::default()
    });
    let (mut listener, _) = listener(false);
    let addr = listener
        .start(config, BreakpointRegistry::shared())
        .unwrap();

    let mut engine = EngineStub::connect(addr);
    engine.send_init("php");
    let engine = engine.spawn(|cmd| match cmd.name.as_str() {
        "run" => Some(response_xml(cmd, r#"status="break" reason="ok""#, "")),
        _ => None,
    });

    let queue = listener.queue().clone();
    assert!(wait_until(Duration::from_secs(5), || queue.pending() == 1));

    listener.stop(true);
    assert_eq!(queue.pending(), 0);

    let names: Vec<_> = engine
        .join()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["run", "detach"]);
}

#[test]
#[serial]
fn test_once_mode_stops_accepting() {
    let config = Arc::new(DbgpConfig {
        port: free_port(),
        break_at_entry: true,
        once: true,
        ..Default::default()
    });
    let (mut listener, _) = listener(true);
    let addr = listener
        .start(config, BreakpointRegistry::shared())
        .unwrap();

    let mut engine = EngineStub::connect(addr);
    engine.send_init("php");

    let queue = listener.queue().clone();
    assert!(wait_until(Duration::from_secs(5), || queue.pending() == 1));
    assert!(wait_until(Duration::from_secs(5), || {
        listener.state() == ListenerState::Closed
    }));
    assert!(wait_until(Duration::from_secs(5), || !listener.is_accepting()));

    // queued session stays available
    assert_eq!(queue.pending(), 1);
    assert!(queue.dequeue().is_some());
}
