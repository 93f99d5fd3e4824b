use crate::ui::console::command::{
    AUTO_EVAL_COMMAND, BREAKPOINTS_COMMAND, BREAK_COMMAND, BREAK_COMMAND_SHORT, CLEAR_COMMAND,
    CONTEXT_COMMAND, DELETE_COMMAND, DETACH_COMMAND, DOWN_COMMAND, EVAL_COMMAND,
    EVAL_COMMAND_SHORT, EXPAND_COMMAND, FEATURE_COMMAND, FRAME_COMMAND, FRAME_COMMAND_SHORT,
    HELP_COMMAND, HELP_COMMAND_SHORT, LISTEN_COMMAND, PRINT_COMMAND, PRINT_COMMAND_SHORT,
    QUIT_COMMAND, QUIT_COMMAND_SHORT, RESTORE_COMMAND, RUN_COMMAND, RUN_COMMAND_SHORT,
    STEP_INTO_COMMAND, STEP_INTO_COMMAND_SHORT, STEP_OUT_COMMAND, STEP_OVER_COMMAND,
    STEP_OVER_COMMAND_SHORT, STOP_LISTEN_COMMAND, TRACE_COMMAND, UP_COMMAND, WATCHES_COMMAND,
    WATCH_COMMAND,
};
use chumsky::prelude::{any, choice, just};
use chumsky::text::whitespace;
use chumsky::{extra, text, Parser};
use crossterm::style::{Color, Stylize};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::HistoryHinter;
use rustyline::history::MemHistory;
use rustyline::line_buffer::LineBuffer;
use rustyline::{Changeset, CompletionType, Config, Context, Editor};
use rustyline_derive::{Helper, Hinter, Validator};
use std::borrow::Cow;
use std::borrow::Cow::{Borrowed, Owned};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use trie_rs::{Trie, TrieBuilder};

/// Features accepted by the `feature` command.
const FEATURES: &[&str] = &[
    "max_children",
    "max_data",
    "max_depth",
    "show_hidden",
    "multiple_sessions",
];

struct CommandHint {
    short: Option<String>,
    long: String,
    subcommands: Vec<String>,
}

impl CommandHint {
    fn display_with_short(&self) -> String {
        match self.short {
            Some(ref short) if self.long.starts_with(short.as_str()) => format!(
                "{}{}",
                short.clone().bold().underlined(),
                &self.long[short.len()..]
            ),
            Some(ref short) => format!("{}|{}", &self.long, short.clone().bold().underlined()),
            None => self.long.clone(),
        }
    }
}

impl From<&str> for CommandHint {
    fn from(value: &str) -> Self {
        CommandHint {
            short: None,
            long: value.to_string(),
            subcommands: vec![],
        }
    }
}

impl From<(&str, &str)> for CommandHint {
    fn from((short, long): (&str, &str)) -> Self {
        CommandHint {
            short: Some(short.to_string()),
            long: long.to_string(),
            subcommands: vec![],
        }
    }
}

pub struct CommandCompleter {
    commands: Vec<CommandHint>,
    subcommand_hints: HashMap<String, Vec<String>>,
    file_hints: Trie<u8>,
    var_hints: Trie<u8>,
}

impl CommandCompleter {
    fn new(commands: impl IntoIterator<Item = CommandHint>) -> Self {
        let commands: Vec<CommandHint> = commands.into_iter().collect();
        let subcommand_hints = commands
            .iter()
            .filter(|cmd| !cmd.subcommands.is_empty())
            .flat_map(|cmd| {
                let mut hints = vec![(cmd.long.clone(), cmd.subcommands.clone())];
                if let Some(ref short) = cmd.short {
                    hints.push((short.clone(), cmd.subcommands.clone()));
                }
                hints
            })
            .collect::<HashMap<String, Vec<String>>>();

        Self {
            commands,
            subcommand_hints,
            file_hints: TrieBuilder::new().build(),
            var_hints: TrieBuilder::new().build(),
        }
    }

    /// Replace files suggested for the `break` command.
    pub fn replace_file_hints(&mut self, files: impl IntoIterator<Item = String>) {
        let mut builder = TrieBuilder::new();
        files.into_iter().for_each(|file| builder.push(file));
        self.file_hints = builder.build();
    }

    /// Replace variable names suggested for `print` and `watch`.
    pub fn replace_var_hints(&mut self, variables: impl IntoIterator<Item = String>) {
        let mut builder = TrieBuilder::new();
        variables.into_iter().for_each(|var| builder.push(var));
        self.var_hints = builder.build();
    }
}

#[derive(Debug, PartialEq)]
enum CompletableCommand<'a> {
    Breakpoint(&'a str),
    Variable(&'a str),
    Unrecognized(&'a str, &'a str),
}

impl<'a> CompletableCommand<'a> {
    fn recognize(line: &'a str) -> Option<CompletableCommand<'a>> {
        let op = just::<_, _, extra::Default>;

        let bp = op(BREAK_COMMAND)
            .or(op(BREAK_COMMAND_SHORT))
            .then(whitespace().at_least(1))
            .ignore_then(any().repeated().to_slice())
            .map(CompletableCommand::Breakpoint);

        let var = choice((
            op(PRINT_COMMAND),
            op(PRINT_COMMAND_SHORT),
            op(WATCH_COMMAND),
            op(EXPAND_COMMAND),
        ))
        .then(whitespace().at_least(1))
        .ignore_then(any().repeated().to_slice())
        .map(CompletableCommand::Variable);

        let other = text::ident()
            .then_ignore(whitespace().at_least(1))
            .then(any().repeated().to_slice())
            .map(|(cmd, rest): (&str, &str)| CompletableCommand::Unrecognized(cmd, rest));

        let r = whitespace()
            .ignore_then(choice((bp, var, other)))
            .parse(line);
        r.into_result().ok()
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        fn pairs_from_variants(
            variants: impl Iterator<Item = impl ToString>,
            line: &str,
            tpl: &str,
            replacement_suffix: &str,
        ) -> (usize, Vec<Pair>) {
            let pos = line.len() - tpl.len();
            let pairs = variants.map(|v| Pair {
                display: v.to_string(),
                replacement: v.to_string() + replacement_suffix,
            });
            (pos, pairs.collect())
        }

        fn search(hints: &Trie<u8>, tpl: &str) -> Vec<String> {
            if tpl.is_empty() {
                return vec![];
            }
            hints
                .predictive_search(tpl)
                .into_iter()
                .filter_map(|v| String::from_utf8(v).ok())
                .collect()
        }

        match CompletableCommand::recognize(line) {
            Some(CompletableCommand::Breakpoint(maybe_file)) => {
                if maybe_file.contains(':') {
                    return Ok((0, vec![]));
                }
                let variants = search(&self.file_hints, maybe_file);
                return Ok(pairs_from_variants(
                    variants.into_iter(),
                    line,
                    maybe_file,
                    ":",
                ));
            }
            Some(CompletableCommand::Variable(maybe_var)) => {
                let variants = search(&self.var_hints, maybe_var);
                return Ok(pairs_from_variants(variants.into_iter(), line, maybe_var, ""));
            }
            Some(CompletableCommand::Unrecognized(cmd, subcmd_part)) => {
                if let Some(subcommands) = self.subcommand_hints.get(cmd) {
                    let variants = subcommands
                        .iter()
                        .filter(|subcmd| subcmd.starts_with(subcmd_part));
                    return Ok(pairs_from_variants(variants, line, subcmd_part, ""));
                }
            }
            None => {}
        }

        let pairs = self
            .commands
            .iter()
            .filter(|&cmd| cmd.long.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.display_with_short(),
                replacement: cmd.long.clone(),
            })
            .collect();
        Ok((0, pairs))
    }
}

#[derive(Helper, Hinter, Validator)]
pub struct RLHelper {
    pub completer: Arc<Mutex<CommandCompleter>>,
    #[rustyline(Hinter)]
    hinter: HistoryHinter,
    pub colored_prompt: String,
}

impl Completer for RLHelper {
    type Candidate = <CommandCompleter as Completer>::Candidate;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        crate::dbgp::lock(&self.completer).complete(line, pos, ctx)
    }

    fn update(&self, line: &mut LineBuffer, start: usize, elected: &str, cl: &mut Changeset) {
        crate::dbgp::lock(&self.completer).update(line, start, elected, cl)
    }
}

impl Highlighter for RLHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        default: bool,
    ) -> Cow<'b, str> {
        if default {
            Borrowed(&self.colored_prompt)
        } else {
            Borrowed(prompt)
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned(format!("{}", hint.with(Color::Grey)))
    }
}

fn command_hints() -> Vec<CommandHint> {
    vec![
        (RUN_COMMAND_SHORT, RUN_COMMAND).into(),
        (STEP_INTO_COMMAND_SHORT, STEP_INTO_COMMAND).into(),
        (STEP_OVER_COMMAND_SHORT, STEP_OVER_COMMAND).into(),
        STEP_OUT_COMMAND.into(),
        UP_COMMAND.into(),
        DOWN_COMMAND.into(),
        (FRAME_COMMAND_SHORT, FRAME_COMMAND).into(),
        (BREAK_COMMAND_SHORT, BREAK_COMMAND).into(),
        DELETE_COMMAND.into(),
        BREAKPOINTS_COMMAND.into(),
        CLEAR_COMMAND.into(),
        RESTORE_COMMAND.into(),
        (EVAL_COMMAND_SHORT, EVAL_COMMAND).into(),
        (PRINT_COMMAND_SHORT, PRINT_COMMAND).into(),
        EXPAND_COMMAND.into(),
        CONTEXT_COMMAND.into(),
        WATCH_COMMAND.into(),
        AUTO_EVAL_COMMAND.into(),
        WATCHES_COMMAND.into(),
        CommandHint {
            short: None,
            long: FEATURE_COMMAND.to_string(),
            subcommands: FEATURES.iter().map(ToString::to_string).collect(),
        },
        LISTEN_COMMAND.into(),
        STOP_LISTEN_COMMAND.into(),
        DETACH_COMMAND.into(),
        CommandHint {
            short: None,
            long: TRACE_COMMAND.to_string(),
            subcommands: vec!["on".to_string(), "off".to_string()],
        },
        (HELP_COMMAND_SHORT, HELP_COMMAND).into(),
        (QUIT_COMMAND_SHORT, QUIT_COMMAND).into(),
    ]
}

pub fn create_editor(promt: &str) -> anyhow::Result<Editor<RLHelper, MemHistory>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .build();

    let h = RLHelper {
        completer: Arc::new(Mutex::new(CommandCompleter::new(command_hints()))),
        hinter: HistoryHinter {},
        colored_prompt: format!("{}", promt.with(Color::DarkGreen)),
    };

    let mut editor = Editor::with_history(config, MemHistory::new())?;
    editor.set_helper(Some(h));
    Ok(editor)
}
