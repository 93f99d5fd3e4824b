use crate::dbgp::message::Property;
use crate::dbgp::presenter::StackFrame;
use crate::dbgp::Command;
use itertools::Itertools;
use rustyline::history::History;
use rustyline::{Editor, ExternalPrinter as RLExternalPrinter, Helper};
use std::fmt::Display;
use std::sync::Mutex;

/// [`ExternalPrinter`] safe print messages to stdout while the prompt is shown.
/// Disabled in test environment, messages go to stdout directly.
pub struct ExternalPrinter {
    printer: Option<Mutex<Box<dyn RLExternalPrinter>>>,
}

unsafe impl Send for ExternalPrinter {}
unsafe impl Sync for ExternalPrinter {}

impl ExternalPrinter {
    #[cfg(not(feature = "int_test"))]
    pub fn new<H: Helper, I: History>(editor: &mut Editor<H, I>) -> rustyline::Result<Self> {
        let external_p = editor.create_external_printer()?;
        Ok(Self {
            printer: Some(Mutex::new(Box::new(external_p))),
        })
    }

    #[cfg(feature = "int_test")]
    pub fn new<H: Helper, I: History>(_editor: &mut Editor<H, I>) -> rustyline::Result<Self> {
        Ok(Self { printer: None })
    }

    pub fn print(&self, msg: impl Display) {
        let msg = msg.to_string();
        match &self.printer {
            None => {
                println!("{msg}")
            }
            Some(printer) => {
                let mut printer = crate::dbgp::lock(printer);
                if printer.print(msg.clone()).is_err() {
                    println!("{msg}");
                }
            }
        }
    }
}

pub mod style {
    use crossterm::style::{Color, Stylize};
    use std::fmt::{Display, Formatter};

    const UNKNOWN_PLACEHOLDER: &str = "???";

    struct View<T: Display> {
        inner: Option<T>,
        color: Color,
    }

    impl<T: Display> Display for View<T> {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            let text = self
                .inner
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| UNKNOWN_PLACEHOLDER.to_string());

            if cfg!(feature = "int_test") {
                f.write_str(&text)
            } else {
                f.write_fmt(format_args!("{}", text.with(self.color)))
            }
        }
    }

    /// Construct structure declaration to display data of the same type (file paths, scopes, etc.).
    /// A display style will reset if program compile with `int_test` feature.
    macro_rules! view_struct {
        ($name: ident, $color: expr) => {
            pub struct $name<T: Display>(View<T>);

            impl<T: Display> From<T> for $name<T> {
                fn from(value: T) -> Self {
                    Self(View {
                        inner: Some(value),
                        color: $color,
                    })
                }
            }

            impl<T: Display> From<Option<T>> for $name<T> {
                fn from(value: Option<T>) -> Self {
                    Self(View {
                        inner: value,
                        color: $color,
                    })
                }
            }

            impl<T: Display> Display for $name<T> {
                fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                    self.0.fmt(f)
                }
            }
        };
    }

    view_struct!(FilePathView, Color::Green);
    view_struct!(ScopeView, Color::Yellow);
    view_struct!(KeywordView, Color::Magenta);
    view_struct!(StatusView, Color::Blue);
    view_struct!(ErrorView, Color::Red);
}

const NAME_WIDTH: usize = 32;

pub fn render_stack(frames: &[StackFrame], current: usize) -> String {
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let marker = if i == current { "->" } else { "  " };
            let scope = if frame.scope == "{main}" {
                frame.scope.clone()
            } else {
                format!("{}()", frame.scope)
            };
            format!(
                "{marker} {:<2} {} {}:{}",
                frame.level,
                style::ScopeView::from(format!("{scope:<15}")),
                style::FilePathView::from(&frame.file),
                frame.line
            )
        })
        .join("\n")
}

/// Render a variable tree, one variable per line.
pub fn render_properties(properties: &[Property], command: &Command, level: usize) -> String {
    let mut out = vec![];
    for p in properties {
        render_property(&mut out, p, command, level);
    }
    out.join("\n")
}

fn render_property(out: &mut Vec<String>, p: &Property, command: &Command, level: usize) {
    let name = p.fullname.as_ref().or(p.name.as_ref());
    let name = match (command, name) {
        (Command::Eval, None) => "evalResult".to_string(),
        (Command::Eval, Some(name)) => format!("evalResult->{name}"),
        (_, name) => name.cloned().unwrap_or_default(),
    };

    let size = p
        .size
        .as_ref()
        .map(|s| format!("[{s}]"))
        .unwrap_or_default();
    let value = match (&p.value, p.kind.as_str()) {
        (Some(value), kind) => format!("({kind}{size}) '{value}'"),
        (None, "null") => "(null)".to_string(),
        (None, kind) => {
            let kind = match (kind, &p.classname) {
                ("object", Some(class)) => format!("{kind}|{class}"),
                _ => kind.to_string(),
            };
            if p.has_children && p.children.is_empty() {
                format!("({kind}{size})+")
            } else {
                format!("({kind}{size})")
            }
        }
    };

    let width = NAME_WIDTH.saturating_sub(level);
    out.push(format!("{}{name:<width$} = {value};", " ".repeat(level)));
    for child in &p.children {
        render_property(out, child, command, level + 2);
    }
}
