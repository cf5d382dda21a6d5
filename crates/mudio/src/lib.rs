//! `mudio`: connection-level input handling for telnet-style clients.
//!
//! Nothing in here knows about accounts or commands:
//! - telnet IAC negotiation and NAWS (`telnet`),
//! - ANSI escape sequences in and out (`ansi`),
//! - a resumable decoder producing lines and control events (`decoder`),
//! - an async reader driving the decoder (`line`),
//! - echo negotiation, input history and line sanitizing.

pub mod ansi;
pub mod decoder;
pub mod echo;
pub mod history;
pub mod line;
pub mod sanitize;
pub mod telnet;
