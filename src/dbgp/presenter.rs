use crate::dbgp::message::Response;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// Waiting for engines.
    Listening,
    /// A session is handed over to the user.
    Connected,
    /// Neither listening nor debugging.
    Idle,
}

/// Frame of a call stack, file is a local path.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub level: u32,
    pub file: String,
    pub line: u32,
    pub scope: String,
}

/// Front end callbacks. Called from the controller and from background
/// listener threads, so implementations must be thread safe.
pub trait Presenter: Send + Sync {
    fn render_stack(&self, frames: &[StackFrame], current: usize);

    /// Render `eval`, `property_get` or `context_get` response. If `at_line` is set
    /// the result replaces this line of a variables view.
    fn render_variables(&self, response: &Response, at_line: Option<u32>);

    fn set_source_position(&self, file: &str, line: u32);

    fn report_error(&self, text: &str);

    fn update_status(&self, pending: usize, state: ConnectionState);
}
