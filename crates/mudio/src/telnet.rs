//! Telnet IAC parsing.
//!
//! The parser is fed one byte at a time *after* the introducer (`IAC`, 255) has
//! been seen by the decoder, so a sequence split across reads resumes where it
//! stopped. Recognized:
//! - `IAC IAC`                => literal 0xff data byte
//! - `IAC DO|DONT|WILL|WONT <opt>` => a [`Negotiation`]
//! - `IAC SB <opt> ... IAC SE` => subnegotiation (NAWS decoded, others dropped)
//! - `IAC NOP`, `IAC AYT`     => keep-alive
//!
//! The reply policy is "refuse everything" except the options the broker
//! offers itself (ECHO, SGA) and NAWS, which it wants.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const AYT: u8 = 246;
pub const NOP: u8 = 241;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_NAWS: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Do,
    Dont,
    Will,
    Wont,
}

impl Verb {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            DO => Some(Verb::Do),
            DONT => Some(Verb::Dont),
            WILL => Some(Verb::Will),
            WONT => Some(Verb::Wont),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Verb::Do => DO,
            Verb::Dont => DONT,
            Verb::Will => WILL,
            Verb::Wont => WONT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub verb: Verb,
    pub option: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetEvent {
    Negotiation(Negotiation),
    TerminalSize { cols: u16, rows: u16 },
    KeepAlive,
}

/// Result of feeding one byte to the [`IacParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IacStep {
    /// Sequence not finished yet.
    Pending,
    /// `IAC IAC`: a data byte.
    Literal(u8),
    Event(TelnetEvent),
    /// Sequence finished with nothing to report.
    Done,
}

#[derive(Debug, Default)]
pub struct IacParser {
    state: State,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Command,
    Negotiate {
        verb: Verb,
    },
    Subneg {
        opt: Option<u8>,
        iac_seen: bool,
        buf: Vec<u8>,
    },
}

impl IacParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any partial sequence; the next byte is read as the command after `IAC`.
    pub fn reset(&mut self) {
        self.state = State::Command;
    }

    /// Bytes buffered for an unfinished subnegotiation.
    pub fn buffered(&self) -> usize {
        match &self.state {
            State::Subneg { buf, .. } => buf.len(),
            _ => 0,
        }
    }

    pub fn push(&mut self, b: u8) -> IacStep {
        match &mut self.state {
            State::Command => match b {
                // Escaped 0xff => literal 0xff.
                IAC => IacStep::Literal(IAC),
                SB => {
                    self.state = State::Subneg {
                        opt: None,
                        iac_seen: false,
                        buf: Vec::new(),
                    };
                    IacStep::Pending
                }
                NOP | AYT => IacStep::Event(TelnetEvent::KeepAlive),
                _ => match Verb::from_byte(b) {
                    Some(verb) => {
                        self.state = State::Negotiate { verb };
                        IacStep::Pending
                    }
                    // Other 2-byte IAC commands (GA, EL, ...) - ignore.
                    None => IacStep::Done,
                },
            },
            State::Negotiate { verb } => {
                let n = Negotiation {
                    verb: *verb,
                    option: b,
                };
                self.state = State::Command;
                IacStep::Event(TelnetEvent::Negotiation(n))
            }
            State::Subneg { opt, iac_seen, buf } => {
                if opt.is_none() {
                    *opt = Some(b);
                    return IacStep::Pending;
                }

                if *iac_seen {
                    *iac_seen = false;
                    match b {
                        SE => {
                            let ev = subneg_event(*opt, buf);
                            self.state = State::Command;
                            return match ev {
                                Some(ev) => IacStep::Event(ev),
                                None => IacStep::Done,
                            };
                        }
                        IAC => buf.push(IAC),
                        // Unknown IAC within SB; ignore.
                        _ => {}
                    }
                    return IacStep::Pending;
                }

                if b == IAC {
                    *iac_seen = true;
                } else {
                    buf.push(b);
                }
                IacStep::Pending
            }
        }
    }
}

fn subneg_event(opt: Option<u8>, payload: &[u8]) -> Option<TelnetEvent> {
    match (opt, payload) {
        (Some(OPT_NAWS), [c0, c1, r0, r1]) => Some(TelnetEvent::TerminalSize {
            cols: u16::from_be_bytes([*c0, *c1]),
            rows: u16::from_be_bytes([*r0, *r1]),
        }),
        _ => None,
    }
}

pub fn command(verb: Verb, opt: u8) -> [u8; 3] {
    [IAC, verb.byte(), opt]
}

/// Reply to a peer negotiation, if one is owed.
pub fn reply_for(n: Negotiation) -> Option<[u8; 3]> {
    match (n.verb, n.option) {
        (Verb::Will, OPT_NAWS) => Some(command(Verb::Do, OPT_NAWS)),
        // Acks for what we offer ourselves.
        (Verb::Do, OPT_ECHO | OPT_SGA) => None,
        // "Please do X" => "No thanks".
        (Verb::Do, opt) => Some(command(Verb::Wont, opt)),
        // "I will do X" => "Please don't".
        (Verb::Will, opt) => Some(command(Verb::Dont, opt)),
        (Verb::Dont | Verb::Wont, _) => None,
    }
}

/// Sent once on connect: offer suppress-go-ahead and ask for window size.
pub fn handshake() -> Vec<u8> {
    let mut b = Vec::with_capacity(6);
    b.extend_from_slice(&command(Verb::Will, OPT_SGA));
    b.extend_from_slice(&command(Verb::Do, OPT_NAWS));
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(p: &mut IacParser, bytes: &[u8]) -> Vec<IacStep> {
        bytes.iter().map(|b| p.push(*b)).collect()
    }

    #[test]
    fn decodes_escaped_iac() {
        let mut p = IacParser::new();
        assert_eq!(p.push(IAC), IacStep::Literal(255));
    }

    #[test]
    fn negotiation_spans_two_bytes() {
        let mut p = IacParser::new();
        let steps = feed(&mut p, &[DO, 7]);
        assert_eq!(
            steps,
            vec![
                IacStep::Pending,
                IacStep::Event(TelnetEvent::Negotiation(Negotiation {
                    verb: Verb::Do,
                    option: 7
                }))
            ]
        );
    }

    #[test]
    fn decodes_naws() {
        let mut p = IacParser::new();
        let steps = feed(&mut p, &[SB, OPT_NAWS, 0, 80, 0, 24, IAC, SE]);
        assert_eq!(
            steps.last(),
            Some(&IacStep::Event(TelnetEvent::TerminalSize { cols: 80, rows: 24 }))
        );
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn naws_with_escaped_255_width() {
        let mut p = IacParser::new();
        let steps = feed(&mut p, &[SB, OPT_NAWS, 0, IAC, IAC, 0, 50, IAC, SE]);
        assert_eq!(
            steps.last(),
            Some(&IacStep::Event(TelnetEvent::TerminalSize { cols: 255, rows: 50 }))
        );
    }

    #[test]
    fn strips_unknown_subnegotiation() {
        let mut p = IacParser::new();
        let steps = feed(&mut p, &[SB, 24, b'x', b'y', IAC, SE]);
        assert_eq!(steps.last(), Some(&IacStep::Done));
    }

    #[test]
    fn nop_is_keepalive() {
        let mut p = IacParser::new();
        assert_eq!(p.push(NOP), IacStep::Event(TelnetEvent::KeepAlive));
    }

    #[test]
    fn refuses_unknown_options_but_accepts_naws() {
        let neg = |verb, option| Negotiation { verb, option };
        assert_eq!(reply_for(neg(Verb::Do, 1)), None);
        assert_eq!(reply_for(neg(Verb::Do, 24)), Some([IAC, WONT, 24]));
        assert_eq!(reply_for(neg(Verb::Will, 24)), Some([IAC, DONT, 24]));
        assert_eq!(reply_for(neg(Verb::Will, OPT_NAWS)), Some([IAC, DO, OPT_NAWS]));
        assert_eq!(reply_for(neg(Verb::Wont, 1)), None);
    }
}
