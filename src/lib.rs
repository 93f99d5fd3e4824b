pub mod config;
pub mod dbgp;
pub mod log;
pub mod ui;
