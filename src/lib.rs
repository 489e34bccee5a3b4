//! Warmplate - heated-plate controller host
//!
//! PID temperature control with hardware safety interlocks, plus a
//! countdown/appointment scheduler that decides when heating runs. Both run as
//! independent periodic tokio tasks; display and remote callers read and write
//! through thread-safe handles.

pub mod clock;
pub mod config;
pub mod control;
pub mod hardware;
pub mod scheduler;
pub mod web;
