use anyhow::Context;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

static WIRE_TRACE: AtomicBool = AtomicBool::new(false);

#[inline(always)]
pub fn wire_trace_enabled() -> bool {
    WIRE_TRACE.load(Ordering::SeqCst)
}

pub fn enable_wire_trace() {
    WIRE_TRACE.store(true, Ordering::SeqCst)
}

pub fn disable_wire_trace() {
    WIRE_TRACE.store(false, Ordering::SeqCst)
}

/// Install `env_logger` as a global logger.
///
/// Filtering is taken from `RUST_LOG`. If `log_file` is set all records go into this file
/// (opened in append mode) instead of stderr, so the console stays clean.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("install logger")?;
    Ok(())
}

/// Trace raw protocol traffic, only when wire tracing is switched on.
#[macro_export]
macro_rules! wire_trace {
    ($($arg:tt)+) => {
        if $crate::log::wire_trace_enabled() {
            ::log::trace!(target: "dbgp::wire", $($arg)+)
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                ::log::warn!(target: "dbgp", "{:#}", e);
                None
            }
        }
    };
    ($res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                ::log::warn!(target: "dbgp", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}
