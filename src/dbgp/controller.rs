use crate::config::DbgpConfig;
use crate::dbgp::breakpoint::{
    Breakpoint, BreakpointError, BreakpointHandle, BreakpointRegistry, SharedRegistry,
};
use crate::dbgp::command::Command;
use crate::dbgp::listener::{ConnectionListener, ListenerError, ListenerState, SessionQueue};
use crate::dbgp::lock;
use crate::dbgp::presenter::{ConnectionState, Presenter, StackFrame};
use crate::dbgp::runner::SilentRunner;
use crate::dbgp::session::{ProtocolSession, SessionError, SessionStatus};
use crate::weak_error;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("No debug session started")]
    NoSession,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// What happened after a run or step request.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Listener started, engines may connect.
    Listening(SocketAddr),
    /// A queued session is handed over to the user.
    Promoted(String),
    /// The session executed and now has this status.
    Continued(SessionStatus),
    /// The session is finished and no session is waiting.
    Ended,
    /// Listener is running but no engine is waiting yet.
    Waiting,
    /// The engine does not answer, the session is kept.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added(BreakpointHandle),
    Removed(BreakpointHandle),
}

/// Feature names kept in configuration.
const MAX_CHILDREN: &str = "max_children";
const MAX_DATA: &str = "max_data";
const MAX_DEPTH: &str = "max_depth";

/// Entry point of a front end: owns breakpoints, the listener and the session
/// in front of the user.
pub struct DebugController {
    config: Arc<DbgpConfig>,
    registry: SharedRegistry,
    /// Breakpoints removed by the last clear.
    backup: BreakpointRegistry,
    queue: Arc<SessionQueue>,
    listener: ConnectionListener,
    active: Option<ProtocolSession>,
    presenter: Arc<dyn Presenter>,
    watches: Vec<String>,
    auto_evals: Vec<String>,
    show_context: bool,
}

impl DebugController {
    pub fn new(config: DbgpConfig, presenter: Arc<dyn Presenter>) -> Self {
        let queue = Arc::new(SessionQueue::new(presenter.clone(), config.once));
        Self {
            show_context: config.show_context,
            config: Arc::new(config),
            registry: BreakpointRegistry::shared(),
            backup: BreakpointRegistry::new(),
            listener: ConnectionListener::new(queue.clone()),
            queue,
            active: None,
            presenter,
            watches: vec![],
            auto_evals: vec![],
        }
    }

    pub fn config(&self) -> &DbgpConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn active_session(&self) -> Option<&ProtocolSession> {
        self.active.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn start_listening(&mut self) -> Result<SocketAddr, ControllerError> {
        Ok(self
            .listener
            .start(self.config.clone(), self.registry.clone())?)
    }

    pub fn stop_listening(&mut self, close_all: bool) {
        self.listener.stop(close_all);
    }

    /// Continue the active session. Without an active session, take the next
    /// queued one or start listening.
    pub fn run(&mut self) -> Result<Progress, ControllerError> {
        if self.active.is_some() {
            return self.continue_with(Command::Run);
        }
        if let Some(session) = self.queue.dequeue() {
            return Ok(self.promote(session));
        }
        if self.listener.state() == ListenerState::Closed {
            return Ok(Progress::Listening(self.start_listening()?));
        }
        Ok(Progress::Waiting)
    }

    pub fn step_into(&mut self) -> Result<Progress, ControllerError> {
        self.continue_with(Command::StepInto)
    }

    pub fn step_over(&mut self) -> Result<Progress, ControllerError> {
        self.continue_with(Command::StepOver)
    }

    pub fn step_out(&mut self) -> Result<Progress, ControllerError> {
        self.continue_with(Command::StepOut)
    }

    fn continue_with(&mut self, command: Command) -> Result<Progress, ControllerError> {
        let session = self.active.as_mut().ok_or(ControllerError::NoSession)?;
        match session.interactive_command(command, "", None, self.presenter.as_ref()) {
            Ok(_) => Ok(self.after_continuation()),
            Err(e) => Ok(self.recover(&e)),
        }
    }

    fn after_continuation(&mut self) -> Progress {
        let Some(session) = self.active.as_mut() else {
            return Progress::Ended;
        };

        match session.status() {
            SessionStatus::Stopping | SessionStatus::Stopped => {
                session.finish_if_stopping();
                self.active = None;
                self.offer_next()
            }
            status => match self.refresh(true) {
                Ok(()) => Progress::Continued(status),
                Err(e) => self.recover(&e),
            },
        }
    }

    /// Update views after the engine moved: call stack, context, watches and auto evaluated expressions.
    fn refresh(&mut self, with_stack: bool) -> Result<(), SessionError> {
        let presenter = self.presenter.as_ref();
        let Some(session) = self.active.as_mut() else {
            return Ok(());
        };

        if with_stack {
            session.refresh_stack(presenter)?;
        }
        if self.show_context {
            session.context_get(presenter)?;
        }
        for name in &self.watches {
            session.property_get(name, None, presenter)?;
        }
        for expression in &self.auto_evals {
            session.eval(expression, presenter)?;
        }
        Ok(())
    }

    fn promote(&mut self, mut session: ProtocolSession) -> Progress {
        let address = session.address().to_string();
        info!(target: "dbgp", "hand over session {address}");

        if let Err(e) = session.promote(&self.config, self.presenter.as_ref()) {
            warn!(target: "dbgp", "session {address}: {e}");
            self.presenter
                .report_error(&format!("Debug session {address} lost: {e}"));
            session.close();
            return self.offer_next();
        }
        if session.finish_if_stopping() {
            return self.offer_next();
        }

        self.active = Some(session);
        self.presenter
            .update_status(self.queue.pending(), ConnectionState::Connected);
        match self.refresh(false) {
            Ok(()) => Progress::Promoted(address),
            Err(e) => self.recover(&e),
        }
    }

    /// Hand over the next queued session, if any.
    fn offer_next(&mut self) -> Progress {
        if let Some(session) = self.queue.dequeue() {
            return self.promote(session);
        }
        self.presenter
            .update_status(0, self.queue.connection_state());
        Progress::Ended
    }

    /// Deal with a failed exchange with the active session.
    fn recover(&mut self, err: &SessionError) -> Progress {
        let Some(mut session) = self.active.take() else {
            return Progress::Ended;
        };
        let address = session.address().to_string();

        if err.is_timeout() && !session.is_closed() {
            if self.queue.pending() == 0 {
                self.presenter
                    .report_error("Socket timeout, try again or quit to stop debugging.");
                self.active = Some(session);
                return Progress::TimedOut;
            }

            info!(target: "dbgp", "session {address} does not answer, run it silently");
            self.presenter
                .report_error("Socket timeout, switching to another session.");
            session.demote();
            let runner = SilentRunner::new(
                session,
                self.queue.clone(),
                self.listener.cancel_token(),
                self.config.clone(),
                self.registry.clone(),
            );
            weak_error!(runner.spawn(), "run session silently:");
            return self.offer_next();
        }

        warn!(target: "dbgp", "session {address}: {err}");
        self.presenter
            .report_error(&format!("Debug session {address} ended: {err}"));
        session.close();
        self.offer_next()
    }

    fn with_session<T>(
        &mut self,
        f: impl FnOnce(&mut ProtocolSession, &dyn Presenter) -> Result<T, SessionError>,
    ) -> Result<T, ControllerError> {
        let session = self.active.as_mut().ok_or(ControllerError::NoSession)?;
        match f(session, self.presenter.as_ref()) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.recover(&e);
                Err(e.into())
            }
        }
    }

    /// Add a breakpoint, or remove it if there is already one at this location.
    pub fn toggle_breakpoint(
        &mut self,
        file: &str,
        line: u32,
        expression: Option<String>,
    ) -> Result<Toggle, ControllerError> {
        let existing = lock(&self.registry).find_by_location(file, line);
        match existing {
            Some(handle) => {
                self.remove_breakpoint(handle)?;
                Ok(Toggle::Removed(handle))
            }
            None => Ok(Toggle::Added(self.add_breakpoint(file, line, expression))),
        }
    }

    /// Add a breakpoint and install it into the active session.
    pub fn add_breakpoint(
        &mut self,
        file: &str,
        line: u32,
        expression: Option<String>,
    ) -> BreakpointHandle {
        let (handle, breakpoint) = {
            let mut registry = lock(&self.registry);
            let handle = registry.add(file, line, expression);
            (handle, registry.get(handle).cloned())
        };

        let Some(bp) = breakpoint else {
            return handle;
        };
        if let Some(session) = self.active.as_mut() {
            if let Err(e) = session.install_breakpoint(&bp, &self.config.path_map) {
                self.recover(&e);
            }
        }
        handle
    }

    pub fn remove_breakpoint(
        &mut self,
        handle: BreakpointHandle,
    ) -> Result<Breakpoint, ControllerError> {
        let breakpoint = lock(&self.registry).remove(handle)?;
        if let Some(session) = self.active.as_mut() {
            if let Err(e) = session.remove_breakpoint(handle) {
                self.recover(&e);
            }
        }
        Ok(breakpoint)
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.registry).snapshot()
    }

    /// Remove all breakpoints, they can be brought back with [`DebugController::restore_breakpoints`].
    /// Handles of removed breakpoints are not reused. Return count of removed breakpoints.
    pub fn clear_breakpoints(&mut self) -> usize {
        let breakpoints = lock(&self.registry).snapshot();
        self.backup.clear();
        for bp in &breakpoints {
            self.backup
                .add(bp.file.clone(), bp.line, bp.expression.clone());
            weak_error!(self.remove_breakpoint(bp.handle), "clear breakpoint:");
        }
        breakpoints.len()
    }

    /// Add back breakpoints removed by the last clear. Return count of added breakpoints.
    pub fn restore_breakpoints(&mut self) -> usize {
        let saved = self.backup.snapshot();
        self.backup.clear();

        let mut restored = 0;
        for bp in saved {
            let exists = lock(&self.registry)
                .find_by_location(&bp.file, bp.line)
                .is_some();
            if !exists {
                self.add_breakpoint(&bp.file, bp.line, bp.expression);
                restored += 1;
            }
        }
        restored
    }

    pub fn eval(&mut self, expression: &str) -> Result<(), ControllerError> {
        self.with_session(|session, presenter| session.eval(expression, presenter).map(|_| ()))
    }

    pub fn property_get(&mut self, name: &str) -> Result<(), ControllerError> {
        self.with_session(|session, presenter| {
            session.property_get(name, None, presenter).map(|_| ())
        })
    }

    /// Expand a variable in place of a line of the variables view.
    pub fn expand_property(&mut self, name: &str, at_line: u32) -> Result<(), ControllerError> {
        self.with_session(|session, presenter| {
            session
                .property_get(name, Some(at_line), presenter)
                .map(|_| ())
        })
    }

    pub fn context_get(&mut self) -> Result<(), ControllerError> {
        self.with_session(|session, presenter| session.context_get(presenter).map(|_| ()))
    }

    pub fn frame_up(&mut self) -> Result<bool, ControllerError> {
        self.with_session(|session, presenter| Ok(session.frame_up(presenter)))
    }

    pub fn frame_down(&mut self) -> Result<bool, ControllerError> {
        self.with_session(|session, presenter| Ok(session.frame_down(presenter)))
    }

    pub fn go_frame(&mut self, level: usize) -> Result<bool, ControllerError> {
        self.with_session(|session, presenter| Ok(session.go_frame(level, presenter)))
    }

    pub fn stack(&self) -> &[StackFrame] {
        self.active
            .as_ref()
            .and_then(ProtocolSession::interactive)
            .map(|state| state.stack())
            .unwrap_or_default()
    }

    /// Set a feature of engines. Known limits are stored in settings and used for next sessions too.
    pub fn set_feature(&mut self, name: &str, value: &str) -> Result<(), ControllerError> {
        let config = Arc::make_mut(&mut self.config);
        match name {
            MAX_CHILDREN => config.max_children = value.to_string(),
            MAX_DATA => config.max_data = value.to_string(),
            MAX_DEPTH => config.max_depth = value.to_string(),
            _ => {}
        }

        if self.active.is_none() {
            return Ok(());
        }
        self.with_session(|session, presenter| {
            session.feature_set(name, value, presenter).map(|_| ())
        })
    }

    /// Add a variable to the watch list or remove it. Return true if variable is watched now.
    pub fn toggle_watch(&mut self, name: &str) -> bool {
        toggle(&mut self.watches, name)
    }

    /// Add an expression evaluated after each step or remove it. Return true if expression is added.
    pub fn toggle_auto_eval(&mut self, expression: &str) -> bool {
        toggle(&mut self.auto_evals, expression)
    }

    pub fn toggle_context(&mut self) -> bool {
        self.show_context = !self.show_context;
        self.show_context
    }

    pub fn watches(&self) -> &[String] {
        &self.watches
    }

    pub fn auto_evals(&self) -> &[String] {
        &self.auto_evals
    }

    pub fn show_context(&self) -> bool {
        self.show_context
    }

    /// Detach the active session, script continues without debugger.
    pub fn close_session(&mut self) {
        if let Some(mut session) = self.active.take() {
            info!(target: "dbgp", "detach session {}", session.address());
            session.detach();
        }
        self.presenter
            .update_status(self.queue.pending(), self.queue.connection_state());
    }

    /// Close the active session or, if there is none, stop listening.
    pub fn quit(&mut self) {
        if self.active.is_some() {
            self.close_session();
        } else {
            self.stop_listening(true);
        }
    }

    /// Detach from every engine and stop listening.
    pub fn shutdown(&mut self) {
        self.close_session();
        if self.listener.state() == ListenerState::Listening || self.queue.pending() > 0 {
            self.stop_listening(true);
        }
    }
}

impl Drop for DebugController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn toggle(list: &mut Vec<String>, item: &str) -> bool {
    match list.iter().position(|i| i == item) {
        Some(pos) => {
            list.remove(pos);
            false
        }
        None => {
            list.push(item.to_string());
            true
        }
    }
}
