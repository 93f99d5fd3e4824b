use crate::config::DbgpConfig;
use crate::dbgp::breakpoint::SharedRegistry;
use crate::dbgp::lock;
use crate::dbgp::presenter::{ConnectionState, Presenter};
use crate::dbgp::runner::SilentRunner;
use crate::dbgp::session::{ParkedAt, ProtocolSession};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("bind to port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("already listening")]
    AlreadyListening,
    #[error("spawn listener thread: {0}")]
    Spawn(io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Closed,
}

/// FIFO of sessions waiting for the user, shared by the accept loop
/// and silent runners.
pub struct SessionQueue {
    sessions: Mutex<VecDeque<ProtocolSession>>,
    state: Mutex<ListenerState>,
    /// Address used to wake up a blocked accept.
    wake_addr: Mutex<Option<SocketAddr>>,
    once: bool,
    presenter: Arc<dyn Presenter>,
}

impl SessionQueue {
    /// Create a queue. If `once` is set, listening stops after the first enqueued session.
    pub fn new(presenter: Arc<dyn Presenter>, once: bool) -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            state: Mutex::new(ListenerState::Closed),
            wake_addr: Mutex::new(None),
            once,
            presenter,
        }
    }

    pub fn enqueue(&self, session: ProtocolSession) {
        let address = session.address().to_string();
        let pending = {
            let mut sessions = lock(&self.sessions);
            sessions.push_back(session);
            sessions.len()
        };
        info!(
            target: "dbgp",
            "session {address} is waiting, {pending} pending connection(s) to be debugged"
        );
        self.presenter.update_status(pending, self.connection_state());

        if self.once {
            self.stop_accepting();
        }
    }

    pub fn dequeue(&self) -> Option<ProtocolSession> {
        lock(&self.sessions).pop_front()
    }

    pub fn pending(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn state(&self) -> ListenerState {
        *lock(&self.state)
    }

    /// Connection state to report when no session is debugged.
    pub fn connection_state(&self) -> ConnectionState {
        match self.state() {
            ListenerState::Listening => ConnectionState::Listening,
            ListenerState::Closed => ConnectionState::Idle,
        }
    }

    fn open(&self, local_addr: SocketAddr) {
        *lock(&self.wake_addr) = Some(SocketAddr::from((Ipv4Addr::LOCALHOST, local_addr.port())));
        *lock(&self.state) = ListenerState::Listening;
    }

    /// Switch to closed state and wake up the accept loop.
    fn stop_accepting(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ListenerState::Closed {
                return;
            }
            *state = ListenerState::Closed;
        }

        if let Some(addr) = lock(&self.wake_addr).take() {
            if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
                debug!(target: "dbgp", "wake up listener at {addr}: {e}");
            }
        }
    }

    fn drain(&self) -> Vec<ProtocolSession> {
        lock(&self.sessions).drain(..).collect()
    }
}

/// Accepts engine connections in a background thread.
pub struct ConnectionListener {
    queue: Arc<SessionQueue>,
    cancel: CancellationToken,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ConnectionListener {
    pub fn new(queue: Arc<SessionQueue>) -> Self {
        Self {
            queue,
            cancel: CancellationToken::new(),
            accept_thread: None,
            local_addr: None,
        }
    }

    pub fn queue(&self) -> &Arc<SessionQueue> {
        &self.queue
    }

    pub fn state(&self) -> ListenerState {
        self.queue.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Token cancelled when the listener stops with `close_all`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Return true while the accept thread is alive.
    pub fn is_accepting(&self) -> bool {
        self.accept_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Bind to the configured port and start accepting. Bind errors are returned
    /// to the caller, the accept loop runs in a background thread.
    pub fn start(
        &mut self,
        config: Arc<DbgpConfig>,
        registry: SharedRegistry,
    ) -> Result<SocketAddr, ListenerError> {
        if self.queue.state() == ListenerState::Listening {
            return Err(ListenerError::AlreadyListening);
        }

        let port = config.port;
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| ListenerError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { port, source })?;

        self.queue.open(local_addr);
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name("dbgp-listener".to_string())
            .spawn(move || accept_loop(listener, queue, cancel, config, registry));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.queue.stop_accepting();
                return Err(ListenerError::Spawn(e));
            }
        };

        self.accept_thread = Some(handle);
        self.local_addr = Some(local_addr);
        info!(target: "dbgp", "listening on {local_addr}");
        self.queue
            .presenter
            .update_status(self.queue.pending(), ConnectionState::Listening);
        Ok(local_addr)
    }

    /// Stop accepting new connections. If `close_all` is set silent runners are
    /// cancelled and all queued sessions are detached.
    pub fn stop(&mut self, close_all: bool) {
        self.queue.stop_accepting();

        if close_all {
            self.cancel.cancel();
            for mut session in self.queue.drain() {
                session.detach();
            }
        }

        info!(target: "dbgp", "listener stopped");
        self.queue
            .presenter
            .update_status(self.queue.pending(), ConnectionState::Idle);
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        if self.queue.state() == ListenerState::Listening {
            self.stop(true);
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    queue: Arc<SessionQueue>,
    cancel: CancellationToken,
    config: Arc<DbgpConfig>,
    registry: SharedRegistry,
) {
    for incoming in listener.incoming() {
        if queue.state() == ListenerState::Closed {
            break;
        }

        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!(target: "dbgp", "accept connection: {e}");
                continue;
            }
        };
        let mut session = match ProtocolSession::new(stream) {
            Ok(session) => session,
            Err(e) => {
                warn!(target: "dbgp", "setup connection: {e}");
                continue;
            }
        };
        info!(target: "dbgp", "connection from {}", session.address());

        if config.break_at_entry {
            let breakpoints = lock(&registry).snapshot();
            session.set_ack_budget(config.ack_retry_budget);
            let handshake = session
                .set_timeout(Some(config.interactive_timeout()))
                .and_then(|_| session.init_handshake(&breakpoints, &config.path_map));
            match handshake {
                Ok(()) => {
                    session.park(ParkedAt::Entry);
                    queue.enqueue(session);
                }
                Err(e) => warn!(target: "dbgp", "{}: {e}", session.address()),
            }
        } else {
            let runner = SilentRunner::new(
                session,
                queue.clone(),
                cancel.clone(),
                config.clone(),
                registry.clone(),
            );
            if let Err(e) = runner.spawn() {
                warn!(target: "dbgp", "start silent run: {e}");
            }
        }
    }

    debug!(target: "dbgp", "accept loop finished");
}
