//! Interactive extension of a session: a session handed over to the user gets
//! a call stack view, response rendering and frame navigation.

use crate::config::{DbgpConfig, PathMap};
use crate::dbgp::command::Command;
use crate::dbgp::message::{Response, ERROR_COMMAND_NOT_AVAILABLE};
use crate::dbgp::presenter::{Presenter, StackFrame};
use crate::dbgp::session::{ParkedAt, ProtocolSession, SessionError, SessionStatus};
use log::{debug, info, warn};

/// Variables php engines are asked about right after a session is handed over.
const PHP_REQUEST_VARIABLES: [&str; 2] = ["$_SERVER['REQUEST_URI']", "$argv"];

#[derive(Debug, Default)]
pub struct InteractiveState {
    stack: Vec<StackFrame>,
    current: usize,
    path_map: PathMap,
    /// Set while a `run` is re-sent after "command is not available" error.
    rerunning: bool,
}

impl InteractiveState {
    fn new(path_map: PathMap) -> Self {
        Self {
            path_map,
            ..Default::default()
        }
    }

    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    /// Index of the frame in focus, 0 is the innermost frame.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.stack.get(self.current)
    }

    fn deepest(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }
}

impl ProtocolSession {
    pub fn is_interactive(&self) -> bool {
        self.interactive.is_some()
    }

    pub fn interactive(&self) -> Option<&InteractiveState> {
        self.interactive.as_ref()
    }

    /// Hand the session over to the user: apply feature limits, move to the first
    /// stop position and show the call stack.
    pub fn promote(
        &mut self,
        config: &DbgpConfig,
        presenter: &dyn Presenter,
    ) -> Result<(), SessionError> {
        let stopped_by = self.latest_response().cloned();
        self.interactive = Some(InteractiveState::new(config.path_map.clone()));
        self.set_timeout(Some(config.interactive_timeout()))?;
        self.set_ack_budget(config.ack_retry_budget);

        if let Some(init) = self.init_packet() {
            let file = config.path_map.local_of(&init.fileuri);
            presenter.set_source_position(&file, 1);
        }

        for (name, value) in [
            ("max_children", &config.max_children),
            ("max_data", &config.max_data),
            ("max_depth", &config.max_depth),
        ] {
            self.feature_set(name, value, presenter)?;
        }

        match (self.parked(), stopped_by) {
            (ParkedAt::Break, Some(response)) => self.dispatch(&response, presenter)?,
            _ => {
                self.exchange(Command::StepInto, "", None, None, false, presenter)?;
            }
        }
        if matches!(
            self.status(),
            SessionStatus::Stopping | SessionStatus::Stopped
        ) {
            return Ok(());
        }

        self.refresh_stack(presenter)?;

        if self.language() == "php" {
            let depth = self
                .interactive
                .as_ref()
                .map(InteractiveState::deepest)
                .unwrap_or_default();
            for name in PHP_REQUEST_VARIABLES {
                self.exchange(
                    Command::PropertyGet,
                    &format!("-d {depth} -n {name}"),
                    None,
                    None,
                    true,
                    presenter,
                )?;
            }
        }

        info!(target: "dbgp", "session {} is interactive", self.address());
        Ok(())
    }

    /// Drop the interactive extension, session may be run silently again.
    pub fn demote(&mut self) {
        self.interactive = None;
    }

    fn exchange(
        &mut self,
        command: Command,
        args: &str,
        data: Option<&str>,
        render_at: Option<u32>,
        silent: bool,
        presenter: &dyn Presenter,
    ) -> Result<Response, SessionError> {
        let transaction_id = self.send_command(command, args, data)?;
        if silent {
            self.mark_silent(transaction_id);
        }
        self.set_render_at(render_at);
        let response = self.await_ack_retrying(transaction_id)?;
        self.dispatch(&response, presenter)?;
        self.take_silent(transaction_id);
        Ok(response)
    }

    /// Send a command, wait for its response and hand the response to its handler.
    pub fn interactive_command(
        &mut self,
        command: Command,
        args: &str,
        data: Option<&str>,
        presenter: &dyn Presenter,
    ) -> Result<Response, SessionError> {
        self.exchange(command, args, data, None, false, presenter)
    }

    /// Same as [`ProtocolSession::interactive_command`] but errors are not reported.
    pub fn silent_command(
        &mut self,
        command: Command,
        args: &str,
        data: Option<&str>,
        presenter: &dyn Presenter,
    ) -> Result<Response, SessionError> {
        self.exchange(command, args, data, None, true, presenter)
    }

    /// Route a response to its handler.
    pub fn dispatch(
        &mut self,
        response: &Response,
        presenter: &dyn Presenter,
    ) -> Result<(), SessionError> {
        if response.is_error() {
            return self.handle_error(response, presenter);
        }

        match &response.command {
            Command::StackGet => self.handle_stack(response, presenter)?,
            Command::StepInto | Command::StepOver | Command::StepOut | Command::Run => {
                if response.reason.as_deref().is_some_and(|r| r != "ok") {
                    warn!(
                        target: "dbgp",
                        "{}: {} finished with reason {:?}, status {:?}",
                        self.address(),
                        response.command,
                        response.reason,
                        response.status
                    );
                }
            }
            Command::Eval | Command::PropertyGet | Command::ContextGet => {
                let at_line = self
                    .last_command()
                    .filter(|last| Some(last.transaction_id) == response.transaction_id)
                    .and_then(|last| last.render_at);
                presenter.render_variables(response, at_line);
            }
            Command::FeatureSet
            | Command::BreakpointSet
            | Command::BreakpointRemove
            | Command::Stop
            | Command::Detach => {}
            Command::Unknown(name) => {
                warn!(target: "dbgp", "{}: no handler for `{name}` response", self.address());
            }
        }
        Ok(())
    }

    fn handle_error(
        &mut self,
        response: &Response,
        presenter: &dyn Presenter,
    ) -> Result<(), SessionError> {
        let transaction_id = response.transaction_id.unwrap_or_default();
        if self.take_silent(transaction_id) {
            debug!(target: "dbgp", "{}: ignore error of silent transaction {transaction_id}", self.address());
            return Ok(());
        }

        let not_available = response
            .errors
            .iter()
            .any(|e| e.code == ERROR_COMMAND_NOT_AVAILABLE);
        let rerunning = self.interactive.as_ref().is_some_and(|s| s.rerunning);
        if not_available && self.status() == SessionStatus::Running && !rerunning {
            info!(target: "dbgp", "{}: engine is running, resume it", self.address());
            self.set_rerunning(true);
            let result = self.exchange(Command::Run, "", None, None, false, presenter);
            self.set_rerunning(false);
            return result.map(|_| ());
        }

        for err in &response.errors {
            presenter.report_error(&format!(
                "Error when {} ({transaction_id}): {}",
                response.command,
                err.text()
            ));
        }
        Ok(())
    }

    fn set_rerunning(&mut self, rerunning: bool) {
        if let Some(state) = self.interactive.as_mut() {
            state.rerunning = rerunning;
        }
    }

    fn handle_stack(
        &mut self,
        response: &Response,
        presenter: &dyn Presenter,
    ) -> Result<(), SessionError> {
        let Some(state) = self.interactive.as_mut() else {
            return Ok(());
        };
        if response.stack.is_empty() {
            return Ok(());
        }

        state.stack = response
            .stack
            .iter()
            .map(|entry| StackFrame {
                level: entry.level,
                file: state.path_map.local_of(&entry.filename),
                line: entry.lineno,
                scope: entry.scope.clone(),
            })
            .collect();
        state.current = 0;

        presenter.render_stack(&state.stack, state.current);
        if let Some(frame) = state.current_frame() {
            presenter.set_source_position(&frame.file, frame.line);
        }
        Ok(())
    }

    /// Focus on a stack frame. Return false if there is no such frame.
    pub fn go_frame(&mut self, level: usize, presenter: &dyn Presenter) -> bool {
        let Some(state) = self.interactive.as_mut() else {
            return false;
        };
        if state.stack.is_empty() || level > state.deepest() {
            return false;
        }

        state.current = level;
        presenter.render_stack(&state.stack, state.current);
        if let Some(frame) = state.current_frame() {
            presenter.set_source_position(&frame.file, frame.line);
        }
        true
    }

    /// Move focus one frame towards the innermost frame.
    pub fn frame_up(&mut self, presenter: &dyn Presenter) -> bool {
        match self.current_level() {
            Some(level) if level > 0 => self.go_frame(level - 1, presenter),
            _ => false,
        }
    }

    /// Move focus one frame towards the outermost frame.
    pub fn frame_down(&mut self, presenter: &dyn Presenter) -> bool {
        match self.current_level() {
            Some(level) => self.go_frame(level + 1, presenter),
            None => false,
        }
    }

    fn current_level(&self) -> Option<usize> {
        self.interactive.as_ref().map(InteractiveState::current)
    }

    pub fn refresh_stack(&mut self, presenter: &dyn Presenter) -> Result<Response, SessionError> {
        self.exchange(Command::StackGet, "", None, None, false, presenter)
    }

    pub fn feature_set(
        &mut self,
        name: &str,
        value: &str,
        presenter: &dyn Presenter,
    ) -> Result<Response, SessionError> {
        self.exchange(
            Command::FeatureSet,
            &format!("-n {name} -v {value}"),
            None,
            None,
            false,
            presenter,
        )
    }

    /// Evaluate an expression, result is stored into `evalResult` variable of the script.
    pub fn eval(
        &mut self,
        expression: &str,
        presenter: &dyn Presenter,
    ) -> Result<Response, SessionError> {
        let wrapped = if self.language() == "php" {
            format!("$evalResult=({expression})")
        } else {
            format!("evalResult=({expression})")
        };
        self.exchange(Command::Eval, "", Some(&wrapped), None, false, presenter)
    }

    /// Get a variable of the frame in focus. If `at_line` is set, result is rendered
    /// in place of this line.
    pub fn property_get(
        &mut self,
        name: &str,
        at_line: Option<u32>,
        presenter: &dyn Presenter,
    ) -> Result<Response, SessionError> {
        let name = property_name(name, self.language());
        let depth = self.current_level().unwrap_or_default();
        self.exchange(
            Command::PropertyGet,
            &format!("-d {depth} -n {name}"),
            None,
            at_line,
            false,
            presenter,
        )
    }

    pub fn context_get(&mut self, presenter: &dyn Presenter) -> Result<Response, SessionError> {
        let depth = self.current_level().unwrap_or_default();
        self.exchange(
            Command::ContextGet,
            &format!("-d {depth}"),
            None,
            None,
            false,
            presenter,
        )
    }
}

/// Prepare variable name for `property_get`.
fn property_name(name: &str, language: &str) -> String {
    let mut name = name.trim().replace('"', "'");
    if language == "php" && !name.starts_with('$') {
        name.insert(0, '$');
    }
    if name.contains(' ') {
        name = format!("\"{name}\"");
    }
    name
}
