use dbgp_client::dbgp::command::CommandLine;
use dbgp_client::dbgp::{Command, ConnectionState, Presenter, Response, StackFrame};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const SCRIPT_URI: &str = "file:///var/www/index.php";

/// Scripted engine side of a connection.
pub struct EngineStub {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl EngineStub {
    /// Connect to a listening client, retrying while the listener starts.
    pub fn connect(addr: SocketAddr) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], addr.port()));
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => return Self::from_stream(stream),
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Err(e) => panic!("connect to {addr}: {e}"),
            }
        }
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self { stream, reader }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    /// Send a length prefixed frame as is.
    pub fn send_frame(&mut self, payload: &str) {
        let mut frame = format!("{}", payload.len()).into_bytes();
        frame.push(0);
        frame.extend_from_slice(payload.as_bytes());
        frame.push(0);
        self.stream.write_all(&frame).unwrap();
    }

    pub fn send_xml(&mut self, xml: &str) {
        self.send_frame(&format!(
            r#"<?xml version="1.0" encoding="iso-8859-1"?>{xml}"#
        ));
    }

    pub fn send_init(&mut self, language: &str) {
        self.send_xml(&format!(
            r#"<init xmlns="urn:debugger_protocol_v1" fileuri="{SCRIPT_URI}" language="{language}" protocol_version="1.0" appid="42" idekey="test"/>"#
        ));
    }

    /// Read next NUL terminated command, `None` if the client closed the connection.
    pub fn read_command(&mut self) -> Option<CommandLine> {
        let mut buf = vec![];
        let n = self.reader.read_until(0, &mut buf).ok()?;
        if n == 0 || buf.last() != Some(&0) {
            return None;
        }
        buf.pop();
        let line = String::from_utf8(buf).unwrap();
        Some(CommandLine::parse(&line).unwrap_or_else(|| panic!("malformed command `{line}`")))
    }

    /// Answer a command with a response carrying `attrs` and `body`.
    pub fn respond(&mut self, cmd: &CommandLine, attrs: &str, body: &str) {
        self.send_xml(&response_xml(cmd, attrs, body));
    }

    /// Answer commands with `reply` until the connection is closed. `reply` returns
    /// the response document or `None` to leave the command unanswered.
    /// Return all received commands.
    pub fn serve(
        mut self,
        mut reply: impl FnMut(&CommandLine) -> Option<String>,
    ) -> Vec<CommandLine> {
        let mut received = vec![];
        while let Some(cmd) = self.read_command() {
            if let Some(xml) = reply(&cmd) {
                self.send_xml(&xml);
            }
            received.push(cmd);
        }
        received
    }

    pub fn spawn(
        self,
        reply: impl FnMut(&CommandLine) -> Option<String> + Send + 'static,
    ) -> thread::JoinHandle<Vec<CommandLine>> {
        thread::spawn(move || self.serve(reply))
    }
}

pub fn response_xml(cmd: &CommandLine, attrs: &str, body: &str) -> String {
    format!(
        r#"<response xmlns="urn:debugger_protocol_v1" command="{}" transaction_id="{}" {attrs}>{body}</response>"#,
        cmd.name, cmd.transaction_id
    )
}

pub fn stack_xml(frames: &[(&str, u32, &str)]) -> String {
    frames
        .iter()
        .enumerate()
        .map(|(level, (file, line, scope))| {
            format!(
                r#"<stack level="{level}" type="file" filename="{file}" lineno="{line}" where="{scope}"/>"#
            )
        })
        .collect()
}

/// Accept a single connection on a fresh loopback port.
pub fn loopback_pair() -> (TcpStream, EngineStub) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let engine = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (client, _) = listener.accept().unwrap();
    (client, EngineStub::from_stream(engine))
}

/// Find a port nobody listens on.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Stack(Vec<StackFrame>, usize),
    Variables(Command, Option<u32>),
    Source(String, u32),
    Error(String),
    Status(usize, ConnectionState),
}

/// Presenter that records everything it is asked to show.
#[derive(Default, Clone)]
pub struct RecordingPresenter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Presenter for RecordingPresenter {
    fn render_stack(&self, frames: &[StackFrame], current: usize) {
        self.push(Event::Stack(frames.to_vec(), current));
    }

    fn render_variables(&self, response: &Response, at_line: Option<u32>) {
        self.push(Event::Variables(response.command.clone(), at_line));
    }

    fn set_source_position(&self, file: &str, line: u32) {
        self.push(Event::Source(file.to_string(), line));
    }

    fn report_error(&self, text: &str) {
        self.push(Event::Error(text.to_string()));
    }

    fn update_status(&self, pending: usize, state: ConnectionState) {
        self.push(Event::Status(pending, state));
    }
}
