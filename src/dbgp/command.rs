use base64::prelude::*;
use std::fmt::{Display, Formatter};
use strum_macros::EnumString;

/// Protocol commands the client issues. Responses are dispatched by this value,
/// anything else an engine may answer with lands in [`Command::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    BreakpointSet,
    BreakpointRemove,
    FeatureSet,
    StepInto,
    StepOver,
    StepOut,
    Run,
    Stop,
    StackGet,
    ContextGet,
    PropertyGet,
    Eval,
    Detach,
    #[strum(default)]
    Unknown(String),
}

impl Command {
    pub fn from_name(name: &str) -> Self {
        name.parse()
            .unwrap_or_else(|_| Command::Unknown(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::BreakpointSet => "breakpoint_set",
            Command::BreakpointRemove => "breakpoint_remove",
            Command::FeatureSet => "feature_set",
            Command::StepInto => "step_into",
            Command::StepOver => "step_over",
            Command::StepOut => "step_out",
            Command::Run => "run",
            Command::Stop => "stop",
            Command::StackGet => "stack_get",
            Command::ContextGet => "context_get",
            Command::PropertyGet => "property_get",
            Command::Eval => "eval",
            Command::Detach => "detach",
            Command::Unknown(name) => name,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a command line: `<name> -i <id> [args] [-- base64(data)]`.
/// Empty `data` is not sent.
pub fn encode_command(
    command: &Command,
    transaction_id: u32,
    args: &str,
    data: Option<&str>,
) -> String {
    let mut line = format!("{command} -i {transaction_id}");
    if !args.is_empty() {
        line.push(' ');
        line.push_str(args);
    }
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        line.push_str(" -- ");
        line.push_str(&BASE64_STANDARD.encode(data));
    }
    line
}

/// Quote an argument value if it contains whitespace.
pub fn quote_arg(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// A command line as seen on the engine side of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub name: String,
    pub transaction_id: u32,
    pub args: Vec<(String, String)>,
    pub data: Option<Vec<u8>>,
}

impl CommandLine {
    /// Parse a command line without its trailing NUL. Return `None` if the line
    /// is not a well formed command.
    pub fn parse(line: &str) -> Option<Self> {
        let (head, data) = match line.split_once(" -- ") {
            Some((head, data)) => (head, Some(BASE64_STANDARD.decode(data.trim()).ok()?)),
            None => (line, None),
        };

        let mut tokens = tokenize(head).into_iter();
        let name = tokens.next()?;
        let mut args = vec![];
        let mut transaction_id = None;
        while let Some(flag) = tokens.next() {
            let flag = flag.strip_prefix('-')?.to_string();
            let value = tokens.next()?;
            if flag == "i" {
                transaction_id = Some(value.parse().ok()?);
            } else {
                args.push((flag, value));
            }
        }

        Some(Self {
            name,
            transaction_id: transaction_id?,
            args,
            data,
        })
    }

    pub fn command(&self) -> Command {
        Command::from_name(&self.name)
    }

    pub fn arg(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(f, _)| f == flag)
            .map(|(_, v)| v.as_str())
    }

    pub fn data_str(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = vec![];
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}
