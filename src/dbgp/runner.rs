use crate::config::DbgpConfig;
use crate::dbgp::breakpoint::SharedRegistry;
use crate::dbgp::command::Command;
use crate::dbgp::listener::SessionQueue;
use crate::dbgp::lock;
use crate::dbgp::session::{ParkedAt, ProtocolSession, SessionStatus};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Script stopped at a breakpoint, session is queued for the user.
    Queued,
    /// Script finished.
    Stopped,
    /// Connection lost.
    Closed,
    /// No breakpoint reached in time, engine is detached.
    Abandoned,
    /// Client is shutting down.
    Cancelled,
    HandshakeFailed,
}

/// Drives a session without user interaction until it stops at a breakpoint,
/// then passes the session to the queue.
pub struct SilentRunner {
    session: ProtocolSession,
    queue: Arc<SessionQueue>,
    cancel: CancellationToken,
    config: Arc<DbgpConfig>,
    registry: SharedRegistry,
}

impl SilentRunner {
    pub fn new(
        session: ProtocolSession,
        queue: Arc<SessionQueue>,
        cancel: CancellationToken,
        config: Arc<DbgpConfig>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            session,
            queue,
            cancel,
            config,
            registry,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<RunOutcome>> {
        thread::Builder::new()
            .name(format!("dbgp-silent {}", self.session.address()))
            .spawn(move || self.run())
    }

    pub fn run(self) -> RunOutcome {
        let SilentRunner {
            mut session,
            queue,
            cancel,
            config,
            registry,
        } = self;
        let address = session.address().to_string();
        debug!(target: "dbgp", "silent run of {address} started");

        let outcome = match drive(&mut session, &cancel, &config, &registry) {
            RunOutcome::Queued if cancel.is_cancelled() => {
                debug!(target: "dbgp", "{address}: break after shutdown, detach");
                session.detach();
                RunOutcome::Cancelled
            }
            RunOutcome::Queued => {
                session.park(ParkedAt::Break);
                queue.enqueue(session);
                RunOutcome::Queued
            }
            RunOutcome::Abandoned => {
                session.detach();
                RunOutcome::Abandoned
            }
            outcome => {
                session.close();
                outcome
            }
        };

        info!(target: "dbgp", "silent run of {address} finished: {outcome:?}");
        outcome
    }
}

/// Wait for the `init` packet in silent poll intervals.
/// Return an outcome if the session can't go on.
fn await_init(
    session: &mut ProtocolSession,
    cancel: &CancellationToken,
    config: &DbgpConfig,
) -> Option<RunOutcome> {
    let mut budget = config.silent_retry_budget;
    loop {
        if cancel.is_cancelled() {
            return Some(RunOutcome::Cancelled);
        }

        match session.receive_init() {
            Ok(()) => return None,
            Err(e) if e.is_timeout() && budget > 1 => budget -= 1,
            Err(e) if e.is_timeout() => {
                warn!(
                    target: "dbgp",
                    "{}: no init packet after {} polls, detach",
                    session.address(),
                    config.silent_retry_budget
                );
                return Some(RunOutcome::Abandoned);
            }
            Err(e) => {
                warn!(target: "dbgp", "{}: {e}", session.address());
                return Some(RunOutcome::HandshakeFailed);
            }
        }
    }
}

fn drive(
    session: &mut ProtocolSession,
    cancel: &CancellationToken,
    config: &DbgpConfig,
    registry: &SharedRegistry,
) -> RunOutcome {
    session.set_ack_budget(config.ack_retry_budget);

    if let Err(e) = session.set_timeout(Some(config.silent_timeout())) {
        warn!(target: "dbgp", "{}: {e}", session.address());
        return RunOutcome::Closed;
    }

    if !session.is_initialized() {
        if let Some(outcome) = await_init(session, cancel, config) {
            return outcome;
        }

        let breakpoints = lock(registry).snapshot();
        let installed = session
            .set_timeout(Some(config.interactive_timeout()))
            .and_then(|_| session.install_breakpoints(&breakpoints, &config.path_map))
            .and_then(|_| session.set_timeout(Some(config.silent_timeout())));
        if let Err(e) = installed {
            warn!(target: "dbgp", "{}: {e}", session.address());
            return RunOutcome::HandshakeFailed;
        }
    }

    if cancel.is_cancelled() {
        return RunOutcome::Cancelled;
    }

    // a session taken from the user may still wait for an answer
    let first = match session.outstanding() {
        Some(transaction_id) => Ok(transaction_id),
        None => session.send_command(Command::Run, "", None),
    };
    let mut waiting_for = match first {
        Ok(transaction_id) => transaction_id,
        Err(e) => {
            warn!(target: "dbgp", "{}: {e}", session.address());
            return RunOutcome::Closed;
        }
    };

    let mut budget = config.silent_retry_budget;
    while budget > 0 {
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let response = match session.await_ack(waiting_for) {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                budget -= 1;
                continue;
            }
            Err(e) => {
                warn!(target: "dbgp", "{}: {e}", session.address());
                return RunOutcome::Closed;
            }
        };

        match session.status() {
            SessionStatus::Stopping => {
                session.finish_if_stopping();
                return RunOutcome::Stopped;
            }
            SessionStatus::Stopped => return RunOutcome::Stopped,
            SessionStatus::Break if response.command == Command::Run => {
                return RunOutcome::Queued
            }
            _ if response.command != Command::Run => {
                match session.send_command(Command::Run, "", None) {
                    Ok(transaction_id) => waiting_for = transaction_id,
                    Err(e) => {
                        warn!(target: "dbgp", "{}: {e}", session.address());
                        return RunOutcome::Closed;
                    }
                }
            }
            status => {
                warn!(target: "dbgp", "{}: unexpected status {status:?} after run", session.address());
                return RunOutcome::Abandoned;
            }
        }
    }

    warn!(
        target: "dbgp",
        "{}: no breakpoint reached after {} polls, detach",
        session.address(),
        config.silent_retry_budget
    );
    RunOutcome::Abandoned
}
