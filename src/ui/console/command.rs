pub const RUN_COMMAND: &str = "run";
pub const RUN_COMMAND_SHORT: &str = "r";
pub const STEP_INTO_COMMAND: &str = "step";
pub const STEP_INTO_COMMAND_SHORT: &str = "s";
pub const STEP_OVER_COMMAND: &str = "next";
pub const STEP_OVER_COMMAND_SHORT: &str = "n";
pub const STEP_OUT_COMMAND: &str = "finish";
pub const UP_COMMAND: &str = "up";
pub const DOWN_COMMAND: &str = "down";
pub const FRAME_COMMAND: &str = "frame";
pub const FRAME_COMMAND_SHORT: &str = "f";
pub const BREAK_COMMAND: &str = "break";
pub const BREAK_COMMAND_SHORT: &str = "b";
pub const DELETE_COMMAND: &str = "delete";
pub const BREAKPOINTS_COMMAND: &str = "breakpoints";
pub const CLEAR_COMMAND: &str = "clear";
pub const RESTORE_COMMAND: &str = "restore";
pub const EVAL_COMMAND: &str = "eval";
pub const EVAL_COMMAND_SHORT: &str = "e";
pub const PRINT_COMMAND: &str = "print";
pub const PRINT_COMMAND_SHORT: &str = "p";
pub const EXPAND_COMMAND: &str = "expand";
pub const CONTEXT_COMMAND: &str = "context";
pub const WATCH_COMMAND: &str = "watch";
pub const AUTO_EVAL_COMMAND: &str = "autoeval";
pub const WATCHES_COMMAND: &str = "watches";
pub const FEATURE_COMMAND: &str = "feature";
pub const LISTEN_COMMAND: &str = "listen";
pub const STOP_LISTEN_COMMAND: &str = "stop";
pub const DETACH_COMMAND: &str = "detach";
pub const TRACE_COMMAND: &str = "trace";
pub const HELP_COMMAND: &str = "help";
pub const HELP_COMMAND_SHORT: &str = "h";
pub const QUIT_COMMAND: &str = "quit";
pub const QUIT_COMMAND_SHORT: &str = "q";

use chumsky::error::Rich;
use chumsky::prelude::{any, choice, end, just};
use chumsky::{extra, text, Boxed, Parser};
use std::fmt::Display;
use std::str::FromStr;

type Err<'a> = extra::Err<Rich<'a, char>>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Parsing(String),
}

/// User command typed into console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Run,
    StepInto,
    StepOver,
    StepOut,
    Up,
    Down,
    Frame(usize),
    /// Toggle a breakpoint.
    Break {
        file: String,
        line: u32,
        expression: Option<String>,
    },
    Delete(u32),
    Breakpoints,
    Clear,
    Restore,
    Eval(String),
    Print(String),
    Expand {
        name: String,
        line: u32,
    },
    Context,
    /// Toggle a watched variable, without a name toggle the context view.
    Watch(Option<String>),
    AutoEval(String),
    Watches,
    Feature {
        name: String,
        value: String,
    },
    Listen,
    StopListening,
    Detach,
    Trace(bool),
    Help,
    Quit,
    Empty,
}

/// Argument separator: at least one whitespace or the end of input.
fn boundary<'a>() -> impl Parser<'a, &'a str, (), Err<'a>> + Clone {
    text::whitespace().at_least(1).or(end())
}

fn number<'a, T>(what: &'static str) -> impl Parser<'a, &'a str, T, Err<'a>> + Clone
where
    T: FromStr,
    T::Err: Display,
{
    text::int(10)
        .try_map(move |digits: &str, span| {
            digits
                .parse()
                .map_err(|e: T::Err| Rich::custom(span, format!("{what}: {e}")))
        })
        .padded()
        .labelled(what)
}

fn token<'a>() -> impl Parser<'a, &'a str, &'a str, Err<'a>> + Clone {
    any()
        .filter(|c: &char| !c.is_whitespace())
        .repeated()
        .at_least(1)
        .to_slice()
        .padded()
}

fn rest<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    any()
        .repeated()
        .to_slice()
        .map(|s: &str| s.trim().to_string())
}

fn required_rest<'a>(what: &'static str) -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    rest().filter(|s: &String| !s.is_empty()).labelled(what)
}

/// `FILE:LINE`, the file part may itself contain colons (`C:/site/index.php:12`).
fn location<'a>() -> impl Parser<'a, &'a str, (String, u32), Err<'a>> + Clone {
    let line_suffix = just(':')
        .then(text::digits(10).at_least(1))
        .then(boundary());

    any()
        .filter(|c: &char| !c.is_whitespace())
        .and_is(line_suffix.not())
        .repeated()
        .at_least(1)
        .to_slice()
        .then_ignore(just(':'))
        .then(number("line number"))
        .map(|(file, line): (&str, u32)| (file.to_string(), line))
        .padded()
        .labelled("FILE:LINE")
}

fn command<'a, I>(ctx: &'static str, inner: I) -> Boxed<'a, 'a, &'a str, ConsoleCommand, Err<'a>>
where
    I: Parser<'a, &'a str, ConsoleCommand, Err<'a>> + 'a,
{
    inner.then_ignore(end()).labelled(ctx).boxed()
}

impl ConsoleCommand {
    /// Parse input string into command.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let line = input.trim_start();
        // errors before the end of the first word mean the command itself is unknown
        let word_end =
            input.len() - line.len() + line.find(char::is_whitespace).unwrap_or(line.len());
        Self::parser()
            .parse(input)
            .into_result()
            .map_err(|errors| {
                let reason = match errors.first() {
                    Some(e) if e.span().start >= word_end => e.to_string(),
                    _ => "unknown command, type `help` for list of commands".to_string(),
                };
                CommandError::Parsing(reason)
            })
    }

    fn parser<'a>() -> impl Parser<'a, &'a str, ConsoleCommand, Err<'a>> {
        let op = |sym| just(sym).then_ignore(boundary()).padded();
        let op2 = |full, short| op(full).or(op(short));

        let empty = text::whitespace().to(ConsoleCommand::Empty);
        let run = op2(RUN_COMMAND, RUN_COMMAND_SHORT).to(ConsoleCommand::Run);
        let step_into =
            op2(STEP_INTO_COMMAND, STEP_INTO_COMMAND_SHORT).to(ConsoleCommand::StepInto);
        let step_over =
            op2(STEP_OVER_COMMAND, STEP_OVER_COMMAND_SHORT).to(ConsoleCommand::StepOver);
        let step_out = op(STEP_OUT_COMMAND).to(ConsoleCommand::StepOut);
        let up = op(UP_COMMAND).to(ConsoleCommand::Up);
        let down = op(DOWN_COMMAND).to(ConsoleCommand::Down);
        let frame = op2(FRAME_COMMAND, FRAME_COMMAND_SHORT)
            .ignore_then(number("frame number"))
            .map(ConsoleCommand::Frame)
            .boxed();

        let r#break = op2(BREAK_COMMAND, BREAK_COMMAND_SHORT)
            .ignore_then(location())
            .then(rest())
            .map(|((file, line), expression)| ConsoleCommand::Break {
                file,
                line,
                expression: Some(expression).filter(|e| !e.is_empty()),
            })
            .boxed();
        let delete = op(DELETE_COMMAND)
            .ignore_then(number("breakpoint number"))
            .map(ConsoleCommand::Delete)
            .boxed();
        let breakpoints = op(BREAKPOINTS_COMMAND).to(ConsoleCommand::Breakpoints);
        let clear = op(CLEAR_COMMAND).to(ConsoleCommand::Clear);
        let restore = op(RESTORE_COMMAND).to(ConsoleCommand::Restore);

        let eval = op2(EVAL_COMMAND, EVAL_COMMAND_SHORT)
            .ignore_then(required_rest("expression"))
            .map(ConsoleCommand::Eval)
            .boxed();
        let print = op2(PRINT_COMMAND, PRINT_COMMAND_SHORT)
            .ignore_then(required_rest("variable name"))
            .map(ConsoleCommand::Print)
            .boxed();
        let expand = op(EXPAND_COMMAND)
            .ignore_then(token())
            .then(number("line number"))
            .map(|(name, line)| ConsoleCommand::Expand {
                name: name.to_string(),
                line,
            })
            .boxed();
        let context = op(CONTEXT_COMMAND).to(ConsoleCommand::Context);
        let watch = op(WATCH_COMMAND)
            .ignore_then(rest())
            .map(|name| ConsoleCommand::Watch(Some(name).filter(|n| !n.is_empty())))
            .boxed();
        let auto_eval = op(AUTO_EVAL_COMMAND)
            .ignore_then(required_rest("expression"))
            .map(ConsoleCommand::AutoEval)
            .boxed();
        let watches = op(WATCHES_COMMAND).to(ConsoleCommand::Watches);
        let feature = op(FEATURE_COMMAND)
            .ignore_then(text::ident().padded())
            .then(required_rest("feature value"))
            .map(|(name, value): (&str, String)| ConsoleCommand::Feature {
                name: name.to_string(),
                value,
            })
            .boxed();

        let listen = op(LISTEN_COMMAND).to(ConsoleCommand::Listen);
        let stop_listen = op(STOP_LISTEN_COMMAND).to(ConsoleCommand::StopListening);
        let detach = op(DETACH_COMMAND).to(ConsoleCommand::Detach);
        let trace = op(TRACE_COMMAND)
            .ignore_then(choice((op("on").to(true), op("off").to(false))).labelled("on or off"))
            .map(ConsoleCommand::Trace)
            .boxed();
        let help = op2(HELP_COMMAND, HELP_COMMAND_SHORT).to(ConsoleCommand::Help);
        let quit = op2(QUIT_COMMAND, QUIT_COMMAND_SHORT).to(ConsoleCommand::Quit);

        let execution = choice((
            command(RUN_COMMAND, run),
            command(STEP_INTO_COMMAND, step_into),
            command(STEP_OVER_COMMAND, step_over),
            command(STEP_OUT_COMMAND, step_out),
            command(UP_COMMAND, up),
            command(DOWN_COMMAND, down),
            command(FRAME_COMMAND, frame),
        ));
        let breakpoint = choice((
            command(BREAKPOINTS_COMMAND, breakpoints),
            command(BREAK_COMMAND, r#break),
            command(DELETE_COMMAND, delete),
            command(CLEAR_COMMAND, clear),
            command(RESTORE_COMMAND, restore),
        ));
        let inspection = choice((
            command(EVAL_COMMAND, eval),
            command(PRINT_COMMAND, print),
            command(EXPAND_COMMAND, expand),
            command(CONTEXT_COMMAND, context),
            command(WATCHES_COMMAND, watches),
            command(WATCH_COMMAND, watch),
            command(AUTO_EVAL_COMMAND, auto_eval),
            command(FEATURE_COMMAND, feature),
        ));
        let control = choice((
            command(LISTEN_COMMAND, listen),
            command(STOP_LISTEN_COMMAND, stop_listen),
            command(DETACH_COMMAND, detach),
            command(TRACE_COMMAND, trace),
            command(HELP_COMMAND, help),
            command(QUIT_COMMAND, quit),
            command("empty line", empty),
        ));

        choice((execution, breakpoint, inspection, control))
    }
}
