use crate::dbgp::lock;
use crate::dbgp::message::Property;
use crate::dbgp::{ConnectionState, Presenter, Response, StackFrame};
use crate::ui::console::command::{DETACH_COMMAND, RUN_COMMAND};
use crate::ui::console::editor::CommandCompleter;
use crate::ui::console::file::FileView;
use crate::ui::console::print::style::{ErrorView, FilePathView, KeywordView, StatusView};
use crate::ui::console::print::{render_properties, render_stack, ExternalPrinter};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Count of source lines shown before and after the current line.
const SOURCE_BOUNDS: u32 = 3;

/// Presents debugger events as text lines printed above the prompt.
pub struct ConsolePresenter {
    printer: ExternalPrinter,
    file_view: FileView,
    completer: Option<Arc<Mutex<CommandCompleter>>>,
    /// Last printed status, repeated states are not printed.
    status: Mutex<Option<(usize, ConnectionState)>>,
}

impl ConsolePresenter {
    pub fn new(printer: ExternalPrinter, completer: Option<Arc<Mutex<CommandCompleter>>>) -> Self {
        Self {
            printer,
            file_view: FileView::new(),
            completer,
            status: Mutex::new(None),
        }
    }

    pub fn print(&self, msg: impl std::fmt::Display) {
        self.printer.print(msg)
    }

    /// Drop cached sources, scripts may be edited between two requests.
    pub fn forget_sources(&self) {
        self.file_view.invalidate();
    }

    fn update_var_hints(&self, properties: &[Property]) {
        let Some(completer) = self.completer.as_ref() else {
            return;
        };
        let names = properties
            .iter()
            .filter_map(|p| p.fullname.clone().or_else(|| p.name.clone()));
        lock(completer).replace_var_hints(names);
    }
}

impl Presenter for ConsolePresenter {
    fn render_stack(&self, frames: &[StackFrame], current: usize) {
        if let Some(completer) = self.completer.as_ref() {
            lock(completer).replace_file_hints(frames.iter().map(|f| f.file.clone()));
        }
        self.printer.print(render_stack(frames, current));
    }

    fn render_variables(&self, response: &Response, at_line: Option<u32>) {
        let properties = response.properties();
        let level = match at_line {
            Some(line) => {
                self.printer.print(format!(
                    "// line {line} expanded by {}",
                    KeywordView::from(&response.command)
                ));
                2
            }
            None => {
                self.printer
                    .print(format!("// by {}", KeywordView::from(&response.command)));
                0
            }
        };

        if properties.is_empty() {
            self.printer.print("(no variables)");
            return;
        }
        self.printer
            .print(render_properties(&properties, &response.command, level));
        if at_line.is_none() {
            self.update_var_hints(&properties);
        }
    }

    fn set_source_position(&self, file: &str, line: u32) {
        self.printer
            .print(format!("{}:{line}", FilePathView::from(file)));
        match self
            .file_view
            .render_source(Path::new(file), line, SOURCE_BOUNDS)
        {
            Ok(source) => self.printer.print(source.trim_end()),
            Err(e) => log::debug!(target: "dbgp", "read source {file}: {e}"),
        }
    }

    fn report_error(&self, text: &str) {
        self.printer.print(ErrorView::from(text));
    }

    fn update_status(&self, pending: usize, state: ConnectionState) {
        {
            let mut last = lock(&self.status);
            if *last == Some((pending, state)) {
                return;
            }
            *last = Some((pending, state));
        }

        self.printer.print(StatusView::from(status_line(pending, state)));
    }
}

fn status_line(pending: usize, state: ConnectionState) -> String {
    match (pending, state) {
        (0, state) => format!("[{state}]"),
        (n, ConnectionState::Connected) => format!(
            "[{state}] {n} pending connection(s), `{DETACH_COMMAND}` then `{RUN_COMMAND}` to debug the next one"
        ),
        (n, state) => format!(
            "[{state}] {n} pending connection(s), type `{RUN_COMMAND}` to debug the next one"
        ),
    }
}
