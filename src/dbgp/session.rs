use crate::config::PathMap;
use crate::dbgp::breakpoint::{Breakpoint, BreakpointHandle};
use crate::dbgp::channel::{ChannelError, MessageChannel};
use crate::dbgp::command::{encode_command, quote_arg, Command};
use crate::dbgp::interactive::InteractiveState;
use crate::dbgp::message::{EngineStatus, InitPacket, Message, Response};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::net::TcpStream;
use std::time::Duration;

const DEFAULT_ACK_BUDGET: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("session is closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Channel(ChannelError::ConnectionTimeout))
    }

    /// Return true if session can not be used after this error.
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionError::Channel(e) => e.is_terminal(),
            SessionError::Closed | SessionError::Handshake(_) => true,
        }
    }
}

/// Engine state as last reported in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Unset,
    Starting,
    Running,
    Break,
    Stopping,
    Stopped,
}

impl From<EngineStatus> for SessionStatus {
    fn from(status: EngineStatus) -> Self {
        match status {
            EngineStatus::Starting => SessionStatus::Starting,
            EngineStatus::Running => SessionStatus::Running,
            EngineStatus::Break => SessionStatus::Break,
            EngineStatus::Stopping => SessionStatus::Stopping,
            EngineStatus::Stopped => SessionStatus::Stopped,
        }
    }
}

/// Where a queued session is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParkedAt {
    /// Right after the handshake, no code executed yet.
    #[default]
    Entry,
    /// At a breakpoint, reached while running silently.
    Break,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastCommand {
    pub command: Command,
    pub args: String,
    pub data: Option<String>,
    pub transaction_id: u32,
    /// Line of the variables view a response must be rendered at.
    pub render_at: Option<u32>,
}

/// One engine connection: sends commands, correlates responses with
/// transaction ids and tracks engine status and installed breakpoints.
pub struct ProtocolSession {
    channel: MessageChannel,
    last_transaction: u32,
    /// Id of the last sent command whose response is not received yet.
    outstanding: Option<u32>,
    /// `breakpoint_set` transactions in flight.
    pending_sets: HashMap<u32, BreakpointHandle>,
    /// Engine side ids of installed breakpoints.
    remote_ids: HashMap<BreakpointHandle, String>,
    /// Transactions whose errors are not reported.
    silent: HashSet<u32>,
    status: SessionStatus,
    last_command: Option<LastCommand>,
    retries: u32,
    ack_budget: u32,
    closed: bool,
    init: Option<InitPacket>,
    latest: Option<Response>,
    parked: ParkedAt,
    pub(super) interactive: Option<InteractiveState>,
}

impl ProtocolSession {
    pub fn new(stream: TcpStream) -> Result<Self, SessionError> {
        let channel = MessageChannel::new(stream).map_err(ChannelError::from_io)?;
        Ok(Self {
            channel,
            last_transaction: 0,
            outstanding: None,
            pending_sets: HashMap::new(),
            remote_ids: HashMap::new(),
            silent: HashSet::new(),
            status: SessionStatus::Unset,
            last_command: None,
            retries: 0,
            ack_budget: DEFAULT_ACK_BUDGET,
            closed: false,
            init: None,
            latest: None,
            parked: ParkedAt::Entry,
            interactive: None,
        })
    }

    pub fn address(&self) -> &str {
        self.channel.peer()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_initialized(&self) -> bool {
        self.init.is_some()
    }

    pub fn init_packet(&self) -> Option<&InitPacket> {
        self.init.as_ref()
    }

    /// Engine language in lower case, empty before the handshake.
    pub fn language(&self) -> &str {
        self.init
            .as_ref()
            .map(|init| init.language.as_str())
            .unwrap_or_default()
    }

    pub fn last_command(&self) -> Option<&LastCommand> {
        self.last_command.as_ref()
    }

    /// Last response received for a command this session waited for.
    pub fn latest_response(&self) -> Option<&Response> {
        self.latest.as_ref()
    }

    /// Count of read timeouts since the last sent command.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn outstanding(&self) -> Option<u32> {
        self.outstanding
    }

    pub fn remote_id(&self, handle: BreakpointHandle) -> Option<&str> {
        self.remote_ids.get(&handle).map(String::as_str)
    }

    pub fn parked(&self) -> ParkedAt {
        self.parked
    }

    pub fn park(&mut self, at: ParkedAt) {
        self.parked = at;
    }

    pub fn set_ack_budget(&mut self, budget: u32) {
        self.ack_budget = budget;
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), SessionError> {
        Ok(self.channel.set_timeout(timeout)?)
    }

    /// Do not report errors of this transaction.
    pub fn mark_silent(&mut self, transaction_id: u32) {
        self.silent.insert(transaction_id);
    }

    pub(super) fn take_silent(&mut self, transaction_id: u32) -> bool {
        self.silent.remove(&transaction_id)
    }

    pub(super) fn set_render_at(&mut self, line: Option<u32>) {
        if let Some(last) = self.last_command.as_mut() {
            last.render_at = line;
        }
    }

    fn fail(&mut self, err: ChannelError) -> SessionError {
        if err.is_terminal() {
            debug!(target: "dbgp", "session {} failed: {err}", self.address());
            self.close();
        } else {
            self.retries += 1;
        }
        SessionError::Channel(err)
    }

    /// Send a command and return its transaction id.
    pub fn send_command(
        &mut self,
        command: Command,
        args: &str,
        data: Option<&str>,
    ) -> Result<u32, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        self.last_transaction += 1;
        let transaction_id = self.last_transaction;
        let line = encode_command(&command, transaction_id, args, data);
        crate::wire_trace!("{} >> {line}", self.address());

        self.retries = 0;
        self.outstanding = Some(transaction_id);
        self.last_command = Some(LastCommand {
            command,
            args: args.to_string(),
            data: data.map(ToString::to_string),
            transaction_id,
            render_at: None,
        });

        match self.channel.send_command(&line) {
            Ok(()) => Ok(transaction_id),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Receive next well formed message. Malformed documents are logged and skipped.
    pub fn receive(&mut self) -> Result<Message, SessionError> {
        loop {
            if self.closed {
                return Err(SessionError::Closed);
            }

            let payload = match self.channel.receive_message() {
                Ok(payload) => payload,
                Err(e) => return Err(self.fail(e)),
            };
            crate::wire_trace!(
                "{} << {}",
                self.address(),
                String::from_utf8_lossy(&payload)
            );

            match Message::parse(&payload) {
                Ok(msg) => {
                    self.observe(&msg);
                    return Ok(msg);
                }
                Err(e) => {
                    warn!(target: "dbgp", "{}: discard malformed message: {e}", self.address());
                }
            }
        }
    }

    fn observe(&mut self, msg: &Message) {
        match msg {
            Message::Init(init) => {
                if self.init.is_some() {
                    warn!(target: "dbgp", "{}: unexpected init packet, engine restarted?", self.address());
                }
                self.init = Some(init.clone());
            }
            Message::Response(resp) => {
                if let Some(status) = resp.status {
                    self.status = status.into();
                }

                if resp.command == Command::BreakpointSet {
                    let handle = resp
                        .transaction_id
                        .and_then(|id| self.pending_sets.remove(&id));
                    if let (Some(handle), Some(remote_id)) = (handle, resp.id.as_ref()) {
                        self.remote_ids.insert(handle, remote_id.clone());
                    }
                }

                if resp.command == Command::Stop && !resp.is_error() {
                    self.status = SessionStatus::Stopped;
                    self.close();
                }
            }
            Message::Stream(stream) => {
                info!(target: "dbgp", "{} {}: {}", self.address(), stream.kind, stream.data);
            }
            Message::Other { tag } => {
                debug!(target: "dbgp", "{}: ignore <{tag}> packet", self.address());
            }
        }
    }

    /// Read messages until the response to `transaction_id` arrives. Responses to other
    /// transactions are consumed and skipped.
    pub fn await_ack(&mut self, transaction_id: u32) -> Result<Response, SessionError> {
        loop {
            match self.receive()? {
                Message::Response(resp) if resp.transaction_id == Some(transaction_id) => {
                    if self.outstanding == Some(transaction_id) {
                        self.outstanding = None;
                    }
                    self.latest = Some(resp.clone());
                    return Ok(resp);
                }
                Message::Response(resp) => {
                    debug!(
                        target: "dbgp",
                        "{}: skip response to {:?} while waiting for {transaction_id}",
                        self.address(),
                        resp.transaction_id
                    );
                }
                _ => {}
            }
        }
    }

    /// Same as [`ProtocolSession::await_ack`] but tolerates up to ack budget read timeouts.
    pub fn await_ack_retrying(&mut self, transaction_id: u32) -> Result<Response, SessionError> {
        loop {
            match self.await_ack(transaction_id) {
                Err(e) if e.is_timeout() && self.retries <= self.ack_budget => {
                    debug!(
                        target: "dbgp",
                        "{}: no answer to {transaction_id} yet, retry {}",
                        self.address(),
                        self.retries
                    );
                }
                result => return result,
            }
        }
    }

    /// Send a command and wait for its response.
    pub fn command(
        &mut self,
        command: Command,
        args: &str,
        data: Option<&str>,
    ) -> Result<Response, SessionError> {
        let transaction_id = self.send_command(command, args, data)?;
        self.await_ack_retrying(transaction_id)
    }

    /// Wait for the `init` packet and install all breakpoints. Breakpoint commands
    /// are pipelined, acknowledgements are awaited in send order.
    pub fn init_handshake(
        &mut self,
        breakpoints: &[Breakpoint],
        path_map: &PathMap,
    ) -> Result<(), SessionError> {
        loop {
            match self.receive_init() {
                Err(e) if e.is_timeout() && self.retries <= self.ack_budget => continue,
                result => break result?,
            }
        }
        self.install_breakpoints(breakpoints, path_map)
    }

    /// Read the first engine message, which must be the `init` packet.
    /// A read timeout leaves the session open, so the call may be repeated.
    pub fn receive_init(&mut self) -> Result<(), SessionError> {
        let first = self.receive()?;
        if !matches!(first, Message::Init(_)) {
            self.close();
            return Err(SessionError::Handshake(format!(
                "expect init packet, got <{}>",
                first.kind()
            )));
        }
        Ok(())
    }

    /// Pipeline `breakpoint_set` for every breakpoint, then collect the answers.
    pub fn install_breakpoints(
        &mut self,
        breakpoints: &[Breakpoint],
        path_map: &PathMap,
    ) -> Result<(), SessionError> {
        let mut transactions = Vec::with_capacity(breakpoints.len());
        for bp in breakpoints {
            transactions.push(self.send_breakpoint_set(bp, path_map)?);
        }
        for transaction_id in transactions {
            let resp = self.await_ack_retrying(transaction_id)?;
            if let Some(err) = resp.errors.first() {
                warn!(target: "dbgp", "{}: breakpoint is not set: {}", self.address(), err.text());
            }
        }

        info!(
            target: "dbgp",
            "{}: session initialized, {} breakpoint(s) installed",
            self.address(),
            self.remote_ids.len()
        );
        Ok(())
    }

    fn send_breakpoint_set(
        &mut self,
        bp: &Breakpoint,
        path_map: &PathMap,
    ) -> Result<u32, SessionError> {
        let args = format!(
            "-t line -f {} -n {} -s enabled",
            quote_arg(&path_map.remote_of(&bp.file)),
            bp.line
        );
        let transaction_id =
            self.send_command(Command::BreakpointSet, &args, bp.expression.as_deref())?;
        self.pending_sets.insert(transaction_id, bp.handle);
        Ok(transaction_id)
    }

    /// Install a breakpoint into a running session, return engine breakpoint id.
    pub fn install_breakpoint(
        &mut self,
        bp: &Breakpoint,
        path_map: &PathMap,
    ) -> Result<Option<String>, SessionError> {
        let transaction_id = self.send_breakpoint_set(bp, path_map)?;
        self.await_ack_retrying(transaction_id)?;
        Ok(self.remote_ids.get(&bp.handle).cloned())
    }

    /// Remove a breakpoint from engine. Return false if it is not installed in this session.
    pub fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<bool, SessionError> {
        let Some(remote_id) = self.remote_ids.remove(&handle) else {
            return Ok(false);
        };
        self.command(Command::BreakpointRemove, &format!("-d {remote_id}"), None)?;
        Ok(true)
    }

    /// If engine reports `stopping`, finish the script with `stop` and close session.
    /// Return true if the session is finished.
    pub fn finish_if_stopping(&mut self) -> bool {
        match self.status {
            SessionStatus::Stopping => {
                if let Err(e) = self.command(Command::Stop, "", None) {
                    debug!(target: "dbgp", "{}: stop: {e}", self.address());
                }
                self.status = SessionStatus::Stopped;
                self.close();
                true
            }
            SessionStatus::Stopped => {
                self.close();
                true
            }
            _ => false,
        }
    }

    /// Let the script run to its end without the debugger and close the connection.
    pub fn detach(&mut self) {
        if !self.closed {
            if let Err(e) = self.send_command(Command::Detach, "", None) {
                debug!(target: "dbgp", "{}: detach: {e}", self.address());
            }
        }
        self.close();
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.channel.shutdown();
            self.remote_ids.clear();
            self.pending_sets.clear();
            info!(target: "dbgp", "session {} closed", self.address());
        }
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.close();
    }
}
