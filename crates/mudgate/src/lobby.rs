//! Minimal in-process command set for logged-in players.

use std::sync::Arc;

use crate::conn::{Flow, Scope};
use crate::registry::{Notifier, SessionRegistry};

/// Receives sanitized lines nothing else consumed.
pub trait CommandDispatcher: Send + Sync {
    fn dispatch(&self, line: &str, scope: &mut Scope) -> Flow;
}

#[derive(Debug)]
pub struct Lobby {
    registry: Arc<SessionRegistry>,
}

impl Lobby {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

impl CommandDispatcher for Lobby {
    fn dispatch(&self, line: &str, scope: &mut Scope) -> Flow {
        let (cmd, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };
        match cmd.to_ascii_lowercase().as_str() {
            "" => {}
            "who" => {
                let names = self.registry.bound_accounts();
                scope.write_str(&format!("online ({}): {}\r\n", names.len(), names.join(", ")));
            }
            "say" if rest.is_empty() => scope.write_str("say what?\r\n"),
            "say" => {
                let msg = format!("{} says: {}\r\n", scope.who(), rest);
                self.registry.broadcast(&msg);
            }
            "history" => {
                let lines = scope
                    .history
                    .iter()
                    .enumerate()
                    .map(|(i, l)| format!("{:>3}  {l}\r\n", i + 1))
                    .collect::<String>();
                scope.write_str(&lines);
            }
            "quit" | "exit" => {
                scope.write_str("bye\r\n");
                return Flow::Disconnect;
            }
            _ => scope.write_str("huh?\r\n"),
        }
        Flow::Continue
    }
}
