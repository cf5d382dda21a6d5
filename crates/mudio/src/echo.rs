//! Server-side echo negotiation.
//!
//! Telnet clients echo locally by default. Offering `WILL ECHO` makes the client
//! stop, which is how masked input (passwords) is typed without showing it;
//! `WONT ECHO` hands echo back to the client.

use crate::telnet::{OPT_ECHO, Verb, command};

#[derive(Debug)]
pub struct EchoController {
    enabled: bool,
}

impl Default for EchoController {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl EchoController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the desired echo state; returns the bytes to send only when the state changed.
    pub fn set_echo(&mut self, enabled: bool) -> Option<[u8; 3]> {
        if self.enabled == enabled {
            return None;
        }
        self.enabled = enabled;
        let verb = if enabled { Verb::Wont } else { Verb::Will };
        Some(command(verb, OPT_ECHO))
    }

    pub fn restore(&mut self) -> Option<[u8; 3]> {
        self.set_echo(true)
    }
}
