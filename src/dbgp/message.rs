use crate::dbgp::command::Command;
use base64::prelude::*;
use roxmltree::{Document, Node};
use std::borrow::Cow;
use strum_macros::{Display, EnumString};

/// Error code an engine answers with when a command is not available in the current state.
pub const ERROR_COMMAND_NOT_AVAILABLE: u32 = 5;

const MAIN_SCOPE: &str = "{main}";

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid xml: {0}")]
    Xml(#[from] roxmltree::Error),
}

/// Engine state as reported in the `status` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EngineStatus {
    Starting,
    Stopping,
    Stopped,
    Running,
    Break,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitPacket {
    pub fileuri: String,
    /// Language name in lower case.
    pub language: String,
    pub appid: Option<String>,
    pub idekey: Option<String>,
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    pub code: u32,
    pub message: Option<String>,
}

impl ErrorDetail {
    /// Message sent by engine or a generic description of the error code.
    pub fn text(&self) -> Cow<'_, str> {
        match self.message.as_deref() {
            Some(msg) if !msg.is_empty() => Cow::Borrowed(msg),
            _ => Cow::Borrowed(error_description(self.code)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackEntry {
    pub level: u32,
    /// File uri as engine sees it.
    pub filename: String,
    pub lineno: u32,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub command: Command,
    pub transaction_id: Option<u32>,
    pub status: Option<EngineStatus>,
    pub reason: Option<String>,
    /// `id` attribute, engine breakpoint id for `breakpoint_set`.
    pub id: Option<String>,
    pub errors: Vec<ErrorDetail>,
    pub stack: Vec<StackEntry>,
    /// Response document as received, used for rendering.
    pub raw: String,
}

impl Response {
    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Parse properties of `eval`, `property_get` and `context_get` responses.
    pub fn properties(&self) -> Vec<Property> {
        parse_properties(&self.raw).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamPacket {
    pub kind: String,
    pub data: String,
}

/// Any packet an engine may send.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Init(InitPacket),
    Response(Response),
    Stream(StreamPacket),
    Other { tag: String },
}

impl Message {
    pub fn parse(payload: &[u8]) -> Result<Message, MessageError> {
        let text = normalize_document(payload);
        let doc = Document::parse(&text)?;
        let root = doc.root_element();

        let msg = match root.tag_name().name() {
            "init" => Message::Init(InitPacket {
                fileuri: root.attribute("fileuri").unwrap_or_default().to_string(),
                language: root
                    .attribute("language")
                    .unwrap_or_default()
                    .to_lowercase(),
                appid: root.attribute("appid").map(ToString::to_string),
                idekey: root.attribute("idekey").map(ToString::to_string),
                protocol_version: root.attribute("protocol_version").map(ToString::to_string),
            }),
            "response" => Message::Response(parse_response(root, &text)),
            "stream" => Message::Stream(StreamPacket {
                kind: root.attribute("type").unwrap_or("stdout").to_string(),
                data: decode_text(
                    root.text().unwrap_or_default(),
                    root.attribute("encoding"),
                ),
            }),
            tag => Message::Other {
                tag: tag.to_string(),
            },
        };
        Ok(msg)
    }

    pub fn kind(&self) -> &str {
        match self {
            Message::Init(_) => "init",
            Message::Response(_) => "response",
            Message::Stream(_) => "stream",
            Message::Other { tag } => tag,
        }
    }
}

fn normalize_document(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    text.replacen(
        r#"encoding="iso-8859-1""#,
        r#"encoding="utf-8""#,
        1,
    )
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.has_tag_name(name))
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &'a str) -> Option<Node<'a, 'input>> {
    children(node, name).next()
}

fn parse_response(root: Node, raw: &str) -> Response {
    let errors = children(root, "error")
        .map(|e| ErrorDetail {
            code: e
                .attribute("code")
                .and_then(|c| c.trim().parse().ok())
                .unwrap_or_default(),
            message: child_element(e, "message")
                .and_then(|m| m.text())
                .map(|m| m.trim().to_string()),
        })
        .collect();

    let stack = children(root, "stack")
        .map(|s| StackEntry {
            level: attr_num(s, "level").unwrap_or_default(),
            filename: s.attribute("filename").unwrap_or_default().to_string(),
            lineno: attr_num(s, "lineno").unwrap_or_default(),
            scope: s.attribute("where").unwrap_or(MAIN_SCOPE).to_string(),
        })
        .collect();

    Response {
        command: Command::from_name(root.attribute("command").unwrap_or_default()),
        transaction_id: attr_num(root, "transaction_id"),
        status: root.attribute("status").and_then(|s| s.parse().ok()),
        reason: root.attribute("reason").map(ToString::to_string),
        id: root.attribute("id").map(ToString::to_string),
        errors,
        stack,
        raw: raw.to_string(),
    }
}

fn attr_num(node: Node, name: &str) -> Option<u32> {
    node.attribute(name).and_then(|v| v.trim().parse().ok())
}

/// Decode text of a property or stream node.
pub fn decode_text(text: &str, encoding: Option<&str>) -> String {
    match encoding {
        Some("base64") => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            match BASE64_STANDARD.decode(compact) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => text.to_string(),
            }
        }
        None | Some("") | Some("none") => text.to_string(),
        Some(enc) => format!("(e:{enc}) {text}"),
    }
}

/// Node of a variable tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Property {
    pub name: Option<String>,
    pub fullname: Option<String>,
    pub kind: String,
    pub classname: Option<String>,
    pub has_children: bool,
    /// `size` or `numchildren` attribute.
    pub size: Option<String>,
    pub value: Option<String>,
    pub children: Vec<Property>,
}

pub fn parse_properties(xml: &str) -> Result<Vec<Property>, MessageError> {
    let doc = Document::parse(xml)?;
    Ok(children(doc.root_element(), "property")
        .map(parse_property)
        .collect())
}

fn parse_property(node: Node) -> Property {
    // newer engines put names and value into child elements
    let element_text = |name: &str| {
        child_element(node, name).map(|n| {
            decode_text(n.text().unwrap_or_default(), n.attribute("encoding"))
        })
    };

    let (name, fullname, value) = if child_element(node, "fullname").is_some() {
        (element_text("name"), element_text("fullname"), element_text("value"))
    } else {
        let text: String = node
            .children()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        let value = if text.trim().is_empty() && node.attribute("encoding").is_none() {
            None
        } else {
            Some(decode_text(&text, node.attribute("encoding")))
        };
        (
            node.attribute("name").map(ToString::to_string),
            node.attribute("fullname").map(ToString::to_string),
            value,
        )
    };

    Property {
        name,
        fullname,
        kind: node.attribute("type").unwrap_or_default().to_string(),
        classname: node.attribute("classname").map(ToString::to_string),
        has_children: node.attribute("children") == Some("1"),
        size: node
            .attribute("size")
            .or_else(|| node.attribute("numchildren"))
            .map(ToString::to_string),
        value,
        children: children(node, "property").map(parse_property).collect(),
    }
}

/// Generic description of a protocol error code.
pub fn error_description(code: u32) -> &'static str {
    match code {
        0 => "no error",
        1 => "parse error in command",
        2 => "duplicate arguments in command",
        3 => "invalid options (ie, missing a required option)",
        4 => "unimplemented command",
        5 => "command is not available",
        100 => "can not open file",
        101 => "stream redirect failed",
        200 => "breakpoint could not be set",
        201 => "breakpoint type not supported",
        202 => "invalid breakpoint",
        203 => "no code on breakpoint line",
        204 => "invalid breakpoint state",
        205 => "no such breakpoint",
        206 => "error evaluating code",
        207 => "invalid expression",
        300 => "can not get property",
        301 => "stack depth invalid",
        302 => "context invalid",
        900 => "encoding not supported",
        998 => "an internal exception in the debugger occurred",
        999 => "unknown error",
        _ => "unknown error code",
    }
}
