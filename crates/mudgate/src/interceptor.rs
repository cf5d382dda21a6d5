//! Reserved-prefix system commands: `@quit`, `@reload`, `@shutdown [seconds|cancel]`.
//!
//! Anything but `@quit` needs the admin capability. A denied attempt gets the
//! same reply as an unknown command, so the verb set isn't revealed.

use std::time::Duration;

use tracing::warn;

use crate::conn::Scope;
use crate::control::Control;

pub const SYSTEM_PREFIX: char = '@';

const DENIED: &str = "huh?\r\n";
const SHUTDOWN_USAGE: &str = "usage: @shutdown [seconds|cancel]\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intercept {
    /// Not a system command; dispatch normally.
    NotMine,
    Handled,
    /// Player asked to disconnect.
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Quit,
    Reload,
    Shutdown,
}

impl Verb {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quit" => Some(Verb::Quit),
            "reload" => Some(Verb::Reload),
            "shutdown" => Some(Verb::Shutdown),
            _ => None,
        }
    }

    fn privileged(self) -> bool {
        !matches!(self, Verb::Quit)
    }
}

pub fn try_intercept(line: &str, scope: &mut Scope, control: &Control) -> Intercept {
    let Some(rest) = line.strip_prefix(SYSTEM_PREFIX) else {
        return Intercept::NotMine;
    };
    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((v, a)) => (v, a.trim()),
        None => (rest, ""),
    };
    let Some(verb) = Verb::parse(verb) else {
        return Intercept::NotMine;
    };

    let admin = scope.identity.as_ref().is_some_and(|i| i.is_admin());
    if verb.privileged() && !admin {
        warn!(
            session = %scope.session,
            peer = %scope.peer_ip,
            account = %scope.who(),
            verb = ?verb,
            "system command denied"
        );
        scope.write_str(DENIED);
        return Intercept::Handled;
    }

    let by = scope.who().to_string();
    match verb {
        Verb::Quit => return Intercept::Quit,
        Verb::Reload => {
            let generation = control.request_reload(&by);
            scope.write_str(&format!("reload requested (#{generation})\r\n"));
        }
        Verb::Shutdown => match args.to_ascii_lowercase().as_str() {
            "cancel" => {
                if !control.cancel_shutdown(&by) {
                    scope.write_str("no shutdown pending\r\n");
                }
            }
            args => {
                let after = match args {
                    "" => Some(control.default_shutdown()),
                    n => n.parse::<u64>().ok().map(Duration::from_secs),
                };
                if !after.is_some_and(|d| control.schedule_shutdown(d, &by)) {
                    scope.write_str(SHUTDOWN_USAGE);
                }
            }
        },
    }
    Intercept::Handled
}
