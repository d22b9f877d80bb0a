//! linkwatchd: watches a single host and runs a recovery action (typically a
//! shutdown) once it has been unreachable for long enough, unless the link
//! comes back before the countdown runs out.

pub mod action;
pub mod alarm;
pub mod config;
pub mod console;
pub mod event_log;
pub mod presenter;
pub mod probe;
pub mod watchdog;
