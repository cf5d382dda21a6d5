//! Per-connection input decoder.
//!
//! Turns raw bytes from a telnet-ish client into completed lines and control
//! events. All state lives in [`Decoder`], one byte is consumed at a time and
//! nothing is re-scanned, so splitting the stream at any point yields the same
//! output as feeding it whole.
//!
//! Escape (27) and negotiation (255) sequences are bounded by
//! `max_pending`; a sequence that grows past it is dropped and scanning
//! resumes in the normal state with the next byte. Lines longer than
//! `max_line` are dropped up to the next terminator. Nothing here errors.

use bytes::BytesMut;
use tracing::debug;

use crate::ansi::{self, AnsiEvent, AnsiMode, ESC, EscStep, EscapeScanner};
use crate::telnet::{self, IAC, IacParser, IacStep, TelnetEvent};

const BS: u8 = 8;
const DEL: u8 = 127;

#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub ansi: AnsiMode,
    /// Max bytes of a single escape or negotiation sequence.
    pub max_pending: usize,
    pub max_line: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ansi: AnsiMode::default(),
            max_pending: 64,
            max_line: 4 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Telnet(TelnetEvent),
    Ansi(AnsiEvent),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    /// A completed line without its terminator (may be empty).
    Line(BytesMut),
    Control(ControlEvent),
}

/// Output of one [`Decoder::decode`] call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub inputs: Vec<Input>,
    /// Negotiation replies owed to the peer.
    pub replies: Vec<u8>,
}

impl Decoded {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.replies.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Normal,
    InEscape,
    InNegotiation,
}

#[derive(Debug)]
pub struct Decoder {
    cfg: DecoderConfig,
    state: State,
    line: BytesMut,
    /// Current line overflowed; drop bytes until the terminator.
    discarding_line: bool,
    /// Last byte was `\r`; a following `\n` or `\0` belongs to it.
    after_cr: bool,
    iac: IacParser,
    /// Bytes consumed by the current negotiation sequence.
    iac_len: usize,
    esc: EscapeScanner,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl Decoder {
    pub fn new(cfg: DecoderConfig) -> Self {
        Self {
            cfg,
            state: State::Normal,
            line: BytesMut::with_capacity(256),
            discarding_line: false,
            after_cr: false,
            iac: IacParser::new(),
            iac_len: 0,
            esc: EscapeScanner::new(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.cfg
    }

    /// Bytes typed so far on the unfinished line.
    pub fn partial_line(&self) -> &[u8] {
        &self.line
    }

    /// Replace the unfinished line (history recall).
    pub fn replace_line(&mut self, text: &[u8]) {
        self.line.clear();
        self.discarding_line = false;
        let n = text.len().min(self.cfg.max_line);
        self.line.extend_from_slice(&text[..n]);
    }

    pub fn decode(&mut self, chunk: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        for &b in chunk {
            self.step(b, &mut out);
        }
        out
    }

    fn step(&mut self, b: u8, out: &mut Decoded) {
        match self.state {
            State::Normal => self.normal(b, out),
            State::InEscape => match self.esc.push(b) {
                EscStep::Pending => {
                    if self.esc.len() > self.cfg.max_pending {
                        debug!(len = self.esc.len(), "discarding oversized escape sequence");
                        self.esc.clear();
                        self.state = State::Normal;
                    }
                }
                EscStep::Complete => {
                    let seq = self.esc.take();
                    self.state = State::Normal;
                    self.finish_escape(&seq, out);
                }
                EscStep::Abort => {
                    self.esc.clear();
                    self.state = State::Normal;
                    self.normal(b, out);
                }
            },
            State::InNegotiation => {
                self.iac_len += 1;
                match self.iac.push(b) {
                    IacStep::Pending => {
                        if self.iac_len > self.cfg.max_pending {
                            debug!(len = self.iac_len, "discarding oversized negotiation");
                            self.iac.reset();
                            self.state = State::Normal;
                        }
                    }
                    IacStep::Literal(x) => {
                        self.state = State::Normal;
                        self.push_line_byte(x);
                    }
                    IacStep::Event(ev) => {
                        self.state = State::Normal;
                        if let TelnetEvent::Negotiation(n) = ev {
                            if let Some(reply) = telnet::reply_for(n) {
                                out.replies.extend_from_slice(&reply);
                            }
                        }
                        out.inputs.push(Input::Control(ControlEvent::Telnet(ev)));
                    }
                    IacStep::Done => self.state = State::Normal,
                }
            }
        }
    }

    fn normal(&mut self, b: u8, out: &mut Decoded) {
        if std::mem::take(&mut self.after_cr) && (b == b'\n' || b == 0) {
            return;
        }
        match b {
            IAC => {
                self.iac.reset();
                self.iac_len = 1;
                self.state = State::InNegotiation;
            }
            ESC => {
                self.esc.begin();
                self.state = State::InEscape;
            }
            b'\r' => {
                self.after_cr = true;
                self.flush_line(out);
            }
            b'\n' => self.flush_line(out),
            BS | DEL => self.erase_char(),
            b'\t' => self.push_line_byte(b),
            0..=31 => {}
            _ => self.push_line_byte(b),
        }
    }

    fn finish_escape(&mut self, seq: &[u8], out: &mut Decoded) {
        match self.cfg.ansi {
            AnsiMode::RawPassthrough => {
                for &b in seq {
                    self.push_line_byte(b);
                }
            }
            AnsiMode::StripAll => {}
            AnsiMode::ParseAndInterpret | AnsiMode::ParseButMonochrome => {
                if let Some(ev) = ansi::interpret(seq) {
                    out.inputs.push(Input::Control(ControlEvent::Ansi(ev)));
                }
            }
        }
    }

    fn push_line_byte(&mut self, b: u8) {
        if self.discarding_line {
            return;
        }
        if self.line.len() >= self.cfg.max_line {
            debug!(max = self.cfg.max_line, "discarding overlong line");
            self.line.clear();
            self.discarding_line = true;
            return;
        }
        self.line.extend_from_slice(&[b]);
    }

    fn erase_char(&mut self) {
        if self.discarding_line {
            return;
        }
        // Drop one UTF-8 scalar: continuation bytes first, then the lead byte.
        while let Some(&last) = self.line.last() {
            self.line.truncate(self.line.len() - 1);
            if last & 0xC0 != 0x80 {
                break;
            }
        }
    }

    fn flush_line(&mut self, out: &mut Decoded) {
        if std::mem::take(&mut self.discarding_line) {
            return;
        }
        out.inputs.push(Input::Line(self.line.split()));
    }
}
