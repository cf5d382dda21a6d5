//! Per-connection pipeline.
//!
//! A [`Conn`] is owned by exactly one connection task. It takes decoded input,
//! routes lines through the sanitizer to the active workflow, the system
//! command interceptor or the dispatcher, and queues output in its [`Scope`]
//! for the task to flush.

use std::net::IpAddr;
use std::sync::Arc;

use mudio::ansi::{AnsiEvent, Key};
use mudio::decoder::{ControlEvent, Decoder, Input};
use mudio::echo::EchoController;
use mudio::history::History;
use mudio::sanitize::sanitize_line;
use mudio::telnet::{self, TelnetEvent};
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::accounts::CAP_ADMIN;
use crate::auth::{self, AuthFinalizer};
use crate::config::Config;
use crate::control::Control;
use crate::interceptor::{self, Intercept};
use crate::lobby::CommandDispatcher;
use crate::registry::SessionRegistry;
use crate::session::SessionId;
use crate::template::TemplateRenderer;
use crate::workflow::{self, Completion, Step, Submit, Terminal, Workflow};

const BANNER: &[u8] = b"mudgate\r\n";
const PROMPT: &[u8] = b"> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account: String,
    pub caps: Vec<String>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.caps.iter().any(|c| c == CAP_ADMIN)
    }
}

/// Connection-scoped state shared with workflows and command handlers.
#[derive(Debug)]
pub struct Scope {
    pub session: SessionId,
    pub peer_ip: IpAddr,
    pub identity: Option<Identity>,
    pub echo: EchoController,
    pub history: History,
    pub term_size: Option<(u16, u16)>,
    out: Vec<u8>,
}

impl Scope {
    pub fn new(session: SessionId, peer_ip: IpAddr, history_lines: usize) -> Self {
        Self {
            session,
            peer_ip,
            identity: None,
            echo: EchoController::new(),
            history: History::new(history_lines),
            term_size: None,
            out: Vec::with_capacity(256),
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.out.extend_from_slice(s.as_bytes());
    }

    /// Account name for logs.
    pub fn who(&self) -> &str {
        self.identity.as_ref().map_or("-", |i| i.account.as_str())
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

impl Terminal for Scope {
    fn echo(&mut self) -> &mut EchoController {
        &mut self.echo
    }

    fn write(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }
}

/// Process-wide handles every connection uses.
pub struct Services {
    pub cfg: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<AuthFinalizer>,
    pub prompts: Arc<dyn TemplateRenderer>,
    pub control: Arc<Control>,
    pub dispatcher: Arc<dyn CommandDispatcher>,
}

pub struct Conn {
    scope: Scope,
    workflow: Option<Workflow<Scope>>,
    svc: Arc<Services>,
}

impl Conn {
    pub fn new(session: SessionId, peer_ip: IpAddr, svc: Arc<Services>) -> Self {
        Self {
            scope: Scope::new(session, peer_ip, svc.cfg.history_lines),
            workflow: None,
            svc,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        self.scope.take_output()
    }

    /// Negotiation offer, banner and the login prompt.
    pub fn greet(&mut self) {
        self.scope.write(&telnet::handshake());
        self.scope.write(BANNER);
        self.start_login();
    }

    fn start_login(&mut self) {
        let finalizer = self.svc.auth.clone();
        match workflow::start(&mut self.workflow, || auth::login_workflow(finalizer)) {
            Ok((wf, true)) => {
                wf.begin(self.svc.prompts.as_ref(), &mut self.scope);
            }
            Ok((_, false)) => {}
            Err(e) => warn!(session = %self.scope.session, err = %e, "login workflow rejected"),
        }
    }

    pub fn handle_input(&mut self, input: Input, decoder: &mut Decoder) -> Flow {
        match input {
            Input::Line(mut raw) => {
                let flow = self.handle_line(&raw);
                raw[..].zeroize();
                flow
            }
            Input::Control(ev) => {
                self.on_control(ev, decoder);
                Flow::Continue
            }
        }
    }

    fn masked_step_active(&self) -> bool {
        self.workflow
            .as_ref()
            .and_then(Workflow::current_step)
            .is_some_and(Step::is_masked)
    }

    fn handle_line(&mut self, raw: &[u8]) -> Flow {
        let cfg = &self.svc.cfg;
        let line = Zeroizing::new(sanitize_line(raw, cfg.max_line_bytes, cfg.ansi.keeps_escapes()));
        if self.masked_step_active() {
            self.scope.history.reset_cursor();
        } else {
            self.scope.history.push(&line);
        }

        if let Some(wf) = self.workflow.as_mut().filter(|w| w.is_active()) {
            let res = wf.submit(&line, self.svc.prompts.as_ref(), &mut self.scope);
            return self.after_submit(res);
        }

        let flow = match interceptor::try_intercept(&line, &mut self.scope, &self.svc.control) {
            Intercept::Quit => {
                self.scope.write_str("bye\r\n");
                Flow::Disconnect
            }
            Intercept::Handled => Flow::Continue,
            Intercept::NotMine => self.svc.dispatcher.dispatch(&line, &mut self.scope),
        };
        if flow == Flow::Continue {
            self.scope.write(PROMPT);
        }
        flow
    }

    fn after_submit(&mut self, res: Submit) -> Flow {
        match res {
            Submit::Completed(Completion::Disconnect) => {
                self.workflow = None;
                Flow::Disconnect
            }
            Submit::Completed(Completion::Clear) | Submit::Aborted => {
                self.workflow = None;
                self.after_workflow();
                Flow::Continue
            }
            Submit::Completed(Completion::Keep) => {
                self.after_workflow();
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    /// An unbound connection always has the login dialogue running.
    fn after_workflow(&mut self) {
        if self.scope.identity.is_none() {
            self.start_login();
        } else {
            self.scope.write(PROMPT);
        }
    }

    fn on_control(&mut self, ev: ControlEvent, decoder: &mut Decoder) {
        match ev {
            ControlEvent::Ansi(AnsiEvent::Key(k @ (Key::Up | Key::Down))) => {
                if self.masked_step_active() {
                    return;
                }
                let h = &mut self.scope.history;
                let recalled = match k {
                    Key::Up => h.recall_older(),
                    _ => h.recall_newer(),
                }
                .unwrap_or_default()
                .to_string();
                decoder.replace_line(recalled.as_bytes());
                self.scope.write(b"\r\x1b[2K");
                self.scope.write_str(&recalled);
            }
            ControlEvent::Ansi(other) => {
                debug!(session = %self.scope.session, event = ?other, "ansi event ignored");
            }
            ControlEvent::Telnet(TelnetEvent::TerminalSize { cols, rows }) => {
                debug!(session = %self.scope.session, cols, rows, "terminal size");
                self.scope.term_size = Some((cols, rows));
            }
            ControlEvent::Telnet(ev) => {
                debug!(session = %self.scope.session, event = ?ev, "telnet event");
            }
        }
    }

    /// Abort any workflow, hand echo back, drop history, leave the registry.
    /// Safe to call more than once.
    pub fn teardown(&mut self) {
        if let Some(mut wf) = self.workflow.take() {
            wf.abort(&mut self.scope);
        }
        self.scope.set_echo(true);
        self.scope.history.clear();
        self.svc.registry.deregister(self.scope.session);
    }
}
