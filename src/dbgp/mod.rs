//! Client side of the DBGp debugging protocol.
//!
//! Engines connect to the [`listener::ConnectionListener`]. Every new connection either
//! runs silently in its own thread until it stops at a breakpoint ([`runner::SilentRunner`])
//! or is queued right after the handshake. The [`controller::DebugController`] takes
//! queued sessions one by one and hands them over to the user.

pub mod breakpoint;
pub mod channel;
pub mod command;
pub mod controller;
pub mod interactive;
pub mod listener;
pub mod message;
pub mod presenter;
pub mod runner;
pub mod session;

pub use breakpoint::{Breakpoint, BreakpointError, BreakpointHandle, BreakpointRegistry};
pub use channel::{ChannelError, MessageChannel};
pub use command::Command;
pub use controller::{ControllerError, DebugController, Progress, Toggle};
pub use listener::{ConnectionListener, ListenerError, ListenerState, SessionQueue};
pub use message::{EngineStatus, Message, Response};
pub use presenter::{ConnectionState, Presenter, StackFrame};
pub use runner::{RunOutcome, SilentRunner};
pub use session::{ProtocolSession, SessionError, SessionStatus};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, a poisoned mutex is used as is.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
