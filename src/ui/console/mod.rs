use crate::config::DbgpConfig;
use crate::dbgp::{ControllerError, DebugController, Progress, SessionStatus, Toggle};
use crate::ui::console::command::{CommandError, ConsoleCommand};
use crate::ui::console::editor::{create_editor, RLHelper};
use crate::ui::console::help::HELP;
use crate::ui::console::presenter::ConsolePresenter;
use crate::ui::console::print::style::{ErrorView, FilePathView, KeywordView};
use crate::ui::console::print::ExternalPrinter;
use rustyline::error::ReadlineError;
use rustyline::history::MemHistory;
use rustyline::Editor;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc};
use std::thread;

pub mod command;
mod editor;
mod file;
mod help;
pub mod presenter;
pub mod print;

const WELCOME_TEXT: &str = r#"
DBGp client is ready, type `help` to see available commands
"#;
const PROMT: &str = "(dbgp) ";

type DbgpEditor = Editor<RLHelper, MemHistory>;

pub struct AppBuilder {
    config: DbgpConfig,
}

impl AppBuilder {
    pub fn new(config: DbgpConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> anyhow::Result<ConsoleApplication> {
        let (control_tx, control_rx) = mpsc::sync_channel::<Control>(0);
        let mut editor = create_editor(PROMT)?;

        let completer = editor.helper_mut().map(|h| Arc::clone(&h.completer));
        let presenter = Arc::new(ConsolePresenter::new(
            ExternalPrinter::new(&mut editor)?,
            completer,
        ));
        let controller = DebugController::new(self.config, presenter.clone());

        Ok(ConsoleApplication {
            controller,
            presenter,
            editor,
            control_tx,
            control_rx,
        })
    }
}

enum Control {
    /// New command from user received
    Cmd(String),
    /// Terminate application
    Terminate,
}

pub struct ConsoleApplication {
    controller: DebugController,
    presenter: Arc<ConsolePresenter>,
    editor: DbgpEditor,
    control_tx: SyncSender<Control>,
    control_rx: Receiver<Control>,
}

impl ConsoleApplication {
    pub fn run(self) -> anyhow::Result<()> {
        let mut app_loop = AppLoop {
            controller: self.controller,
            presenter: self.presenter,
            control_rx: self.control_rx,
        };

        let mut editor = self.editor;
        let control_tx = self.control_tx;
        thread::Builder::new()
            .name("dbgp-readline".to_string())
            .spawn(move || {
                println!("{WELCOME_TEXT}");

                loop {
                    match editor.readline(PROMT) {
                        Ok(input) => {
                            _ = editor.add_history_entry(&input);
                            if control_tx.send(Control::Cmd(input)).is_err() {
                                break;
                            }
                        }
                        Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                            _ = control_tx.send(Control::Terminate);
                            break;
                        }
                        Err(err) => {
                            println!("error: {:#}", err);
                            _ = control_tx.send(Control::Terminate);
                            break;
                        }
                    }
                }
            })?;

        app_loop.start();
        app_loop.run();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum HandlingError {
    #[error(transparent)]
    Parser(#[from] CommandError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Whether the application keeps reading commands.
enum Flow {
    Continue,
    Exit,
}

struct AppLoop {
    controller: DebugController,
    presenter: Arc<ConsolePresenter>,
    control_rx: Receiver<Control>,
}

impl AppLoop {
    fn start(&mut self) {
        match self.controller.start_listening() {
            Ok(addr) => self
                .presenter
                .print(format!("Listening for engines on {addr}")),
            Err(e) => self.presenter.print(ErrorView::from(format!("{e:#}"))),
        }
    }

    fn print_progress(&self, progress: Progress) {
        match progress {
            Progress::Listening(addr) => self
                .presenter
                .print(format!("Listening for engines on {addr}")),
            Progress::Promoted(address) => {
                self.presenter.forget_sources();
                self.presenter
                    .print(format!("Debugging session from {address}"))
            }
            Progress::Continued(SessionStatus::Break) | Progress::TimedOut => {}
            Progress::Continued(status) => {
                self.presenter.print(format!("Engine status: {status:?}"))
            }
            Progress::Ended => self.presenter.print("Debug session ended"),
            Progress::Waiting => self.presenter.print("Waiting for engine connection..."),
        }
    }

    fn print_toggle(&self, added: bool, subject: &str) {
        let action = if added { "Added" } else { "Removed" };
        self.presenter.print(format!("{action} {subject}"));
    }

    fn print_frame_result(&self, moved: bool) {
        if !moved {
            self.presenter.print(ErrorView::from("No such stack frame"));
        }
    }

    fn handle_command(&mut self, cmd: &str) -> Result<Flow, HandlingError> {
        match ConsoleCommand::parse(cmd)? {
            ConsoleCommand::Run => {
                let progress = self.controller.run()?;
                self.print_progress(progress);
            }
            ConsoleCommand::StepInto => {
                let progress = self.controller.step_into()?;
                self.print_progress(progress);
            }
            ConsoleCommand::StepOver => {
                let progress = self.controller.step_over()?;
                self.print_progress(progress);
            }
            ConsoleCommand::StepOut => {
                let progress = self.controller.step_out()?;
                self.print_progress(progress);
            }
            ConsoleCommand::Up => {
                let moved = self.controller.frame_up()?;
                self.print_frame_result(moved);
            }
            ConsoleCommand::Down => {
                let moved = self.controller.frame_down()?;
                self.print_frame_result(moved);
            }
            ConsoleCommand::Frame(level) => {
                let moved = self.controller.go_frame(level)?;
                self.print_frame_result(moved);
            }
            ConsoleCommand::Break {
                file,
                line,
                expression,
            } => {
                let location = FilePathView::from(format!("{file}:{line}"));
                match self.controller.toggle_breakpoint(&file, line, expression)? {
                    Toggle::Added(handle) => self
                        .presenter
                        .print(format!("New breakpoint {handle} at {location}")),
                    Toggle::Removed(handle) => self
                        .presenter
                        .print(format!("Remove breakpoint {handle} at {location}")),
                }
            }
            ConsoleCommand::Delete(handle) => {
                let bp = self
                    .controller
                    .remove_breakpoint(crate::dbgp::BreakpointHandle(handle))?;
                self.presenter.print(format!(
                    "Remove breakpoint {} at {}",
                    bp.handle,
                    FilePathView::from(format!("{}:{}", bp.file, bp.line))
                ));
            }
            ConsoleCommand::Breakpoints => {
                let breakpoints = self.controller.breakpoints();
                if breakpoints.is_empty() {
                    self.presenter.print("No breakpoints");
                }
                for bp in breakpoints {
                    let condition = bp
                        .expression
                        .map(|e| format!(" if {}", KeywordView::from(e)))
                        .unwrap_or_default();
                    self.presenter.print(format!(
                        "- Breakpoint {} at {}{condition}",
                        bp.handle,
                        FilePathView::from(format!("{}:{}", bp.file, bp.line))
                    ));
                }
            }
            ConsoleCommand::Clear => {
                let count = self.controller.clear_breakpoints();
                self.presenter.print(format!("Removed {count} breakpoint(s)"));
            }
            ConsoleCommand::Restore => {
                let count = self.controller.restore_breakpoints();
                self.presenter.print(format!("Restored {count} breakpoint(s)"));
            }
            ConsoleCommand::Eval(expression) => self.controller.eval(&expression)?,
            ConsoleCommand::Print(name) => self.controller.property_get(&name)?,
            ConsoleCommand::Expand { name, line } => {
                self.controller.expand_property(&name, line)?
            }
            ConsoleCommand::Context => self.controller.context_get()?,
            ConsoleCommand::Watch(None) => {
                let shown = self.controller.toggle_context();
                self.print_toggle(shown, "context view");
            }
            ConsoleCommand::Watch(Some(name)) => {
                let added = self.controller.toggle_watch(&name);
                self.print_toggle(added, &format!("watch {name}"));
                if added && self.controller.active_session().is_some() {
                    self.controller.property_get(&name)?;
                }
            }
            ConsoleCommand::AutoEval(expression) => {
                let added = self.controller.toggle_auto_eval(&expression);
                self.print_toggle(added, &format!("auto evaluated `{expression}`"));
                if added && self.controller.active_session().is_some() {
                    self.controller.eval(&expression)?;
                }
            }
            ConsoleCommand::Watches => {
                let context = if self.controller.show_context() {
                    "on"
                } else {
                    "off"
                };
                self.presenter.print(format!("context view: {context}"));
                for name in self.controller.watches() {
                    self.presenter.print(format!("watch: {name}"));
                }
                for expression in self.controller.auto_evals() {
                    self.presenter.print(format!("auto eval: {expression}"));
                }
            }
            ConsoleCommand::Feature { name, value } => {
                self.controller.set_feature(&name, &value)?;
                self.presenter.print(format!("{name} = {value}"));
            }
            ConsoleCommand::Listen => {
                let addr = self.controller.start_listening()?;
                self.print_progress(Progress::Listening(addr));
            }
            ConsoleCommand::StopListening => {
                self.controller.stop_listening(true);
                self.presenter.print("Listener stopped");
            }
            ConsoleCommand::Detach => {
                self.controller.close_session();
                self.presenter.print("Session detached");
            }
            ConsoleCommand::Trace(enable) => {
                if enable {
                    crate::log::enable_wire_trace();
                } else {
                    crate::log::disable_wire_trace();
                }
                self.print_toggle(enable, "protocol trace");
            }
            ConsoleCommand::Help => self.presenter.print(HELP),
            ConsoleCommand::Quit => {
                if self.controller.active_session().is_some() {
                    self.controller.quit();
                    self.presenter.print("Session detached");
                } else {
                    return Ok(Flow::Exit);
                }
            }
            ConsoleCommand::Empty => {}
        }

        Ok(Flow::Continue)
    }

    fn run(mut self) {
        loop {
            let Ok(action) = self.control_rx.recv() else {
                break;
            };

            match action {
                Control::Cmd(command) => match self.handle_command(&command) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit) => break,
                    Err(HandlingError::Parser(e)) => {
                        self.presenter.print(ErrorView::from(e));
                    }
                    Err(HandlingError::Controller(e)) => {
                        self.presenter
                            .print(ErrorView::from(format!("debugger error: {e:#}")));
                    }
                },
                Control::Terminate => {
                    break;
                }
            }
        }

        self.controller.shutdown();
    }
}
