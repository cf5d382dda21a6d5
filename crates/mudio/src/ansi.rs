//! ANSI escape sequences: scanning inbound sequences byte by byte, turning the
//! few we care about into events, and filtering outbound text per [`AnsiMode`].

use std::borrow::Cow;
use std::str::FromStr;

pub const ESC: u8 = 27;
pub const BEL: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnsiMode {
    /// Escape bytes are kept in the line / output untouched.
    RawPassthrough,
    /// Inbound sequences become events; output untouched.
    #[default]
    ParseAndInterpret,
    /// Inbound sequences dropped; all sequences stripped from output.
    StripAll,
    /// Inbound sequences become events; color (SGR) stripped from output.
    ParseButMonochrome,
}

impl AnsiMode {
    pub fn interprets_input(self) -> bool {
        matches!(
            self,
            AnsiMode::ParseAndInterpret | AnsiMode::ParseButMonochrome
        )
    }

    /// Whether complete escape sequences survive into submitted lines.
    pub fn keeps_escapes(self) -> bool {
        matches!(self, AnsiMode::RawPassthrough)
    }
}

impl FromStr for AnsiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(AnsiMode::RawPassthrough),
            "interpret" => Ok(AnsiMode::ParseAndInterpret),
            "strip" => Ok(AnsiMode::StripAll),
            "mono" => Ok(AnsiMode::ParseButMonochrome),
            other => Err(format!("unknown ansi mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsiEvent {
    Key(Key),
    CursorPosition { row: u16, col: u16 },
}

/// Result of feeding one byte to an [`EscapeScanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscStep {
    Pending,
    /// The byte closed the sequence; take it with [`EscapeScanner::take`].
    Complete,
    /// The byte cannot belong to the sequence. The sequence is void and the
    /// byte must be processed again as ordinary input.
    Abort,
}

#[derive(Debug, Default)]
enum EscState {
    #[default]
    Start,
    Csi,
    Ss3,
    Osc {
        esc_seen: bool,
    },
}

/// Accumulates one escape sequence, `ESC` included.
#[derive(Debug, Default)]
pub struct EscapeScanner {
    state: EscState,
    buf: Vec<u8>,
}

impl EscapeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new sequence with the introducer byte.
    pub fn begin(&mut self) {
        self.state = EscState::Start;
        self.buf.clear();
        self.buf.push(ESC);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.state = EscState::Start;
        self.buf.clear();
    }

    pub fn take(&mut self) -> Vec<u8> {
        self.state = EscState::Start;
        std::mem::take(&mut self.buf)
    }

    pub fn push(&mut self, b: u8) -> EscStep {
        let step = match self.state {
            EscState::Start => match b {
                b'[' => {
                    self.state = EscState::Csi;
                    EscStep::Pending
                }
                b'O' => {
                    self.state = EscState::Ss3;
                    EscStep::Pending
                }
                b']' => {
                    self.state = EscState::Osc { esc_seen: false };
                    EscStep::Pending
                }
                0x20..=0x7e => EscStep::Complete,
                _ => EscStep::Abort,
            },
            EscState::Csi => match b {
                // parameter and intermediate bytes
                0x20..=0x3f => EscStep::Pending,
                0x40..=0x7e => EscStep::Complete,
                _ => EscStep::Abort,
            },
            EscState::Ss3 => match b {
                0x20..=0x7e => EscStep::Complete,
                _ => EscStep::Abort,
            },
            EscState::Osc { esc_seen } => {
                if esc_seen || b == BEL {
                    EscStep::Complete
                } else {
                    if b == ESC {
                        self.state = EscState::Osc { esc_seen: true };
                    }
                    EscStep::Pending
                }
            }
        };
        if step != EscStep::Abort {
            self.buf.push(b);
        }
        step
    }
}

/// Map a complete sequence to an event. Sequences we don't care about map to `None`.
pub fn interpret(seq: &[u8]) -> Option<AnsiEvent> {
    match seq {
        [ESC, b'[', params @ .., fin] => interpret_csi(params, *fin),
        [ESC, b'O', fin] => key_for_final(*fin).map(AnsiEvent::Key),
        _ => None,
    }
}

fn interpret_csi(params: &[u8], fin: u8) -> Option<AnsiEvent> {
    match fin {
        b'~' => {
            let k = match params {
                b"1" | b"7" => Key::Home,
                b"4" | b"8" => Key::End,
                b"3" => Key::Delete,
                _ => return None,
            };
            Some(AnsiEvent::Key(k))
        }
        b'R' => {
            let s = std::str::from_utf8(params).ok()?;
            let (row, col) = s.split_once(';')?;
            Some(AnsiEvent::CursorPosition {
                row: row.parse().ok()?,
                col: col.parse().ok()?,
            })
        }
        // Modified arrows (`ESC [1;5A`) still count as arrows.
        _ => key_for_final(fin).map(AnsiEvent::Key),
    }
}

fn key_for_final(fin: u8) -> Option<Key> {
    match fin {
        b'A' => Some(Key::Up),
        b'B' => Some(Key::Down),
        b'C' => Some(Key::Right),
        b'D' => Some(Key::Left),
        b'H' => Some(Key::Home),
        b'F' => Some(Key::End),
        _ => None,
    }
}

fn is_sgr(seq: &[u8]) -> bool {
    seq.len() >= 3 && seq[1] == b'[' && seq.last() == Some(&b'm')
}

/// Apply `mode` to text about to be written to the client.
pub fn filter_outbound(text: &[u8], mode: AnsiMode) -> Cow<'_, [u8]> {
    let keep_seq: fn(&[u8]) -> bool = match mode {
        AnsiMode::RawPassthrough | AnsiMode::ParseAndInterpret => return Cow::Borrowed(text),
        AnsiMode::StripAll => |_| false,
        AnsiMode::ParseButMonochrome => |seq| !is_sgr(seq),
    };
    if memchr::memchr(ESC, text).is_none() {
        return Cow::Borrowed(text);
    }

    let mut out = Vec::with_capacity(text.len());
    let mut sc = EscapeScanner::new();
    for &b in text {
        if !sc.is_empty() {
            match sc.push(b) {
                EscStep::Pending => continue,
                EscStep::Complete => {
                    let seq = sc.take();
                    if keep_seq(&seq) {
                        out.extend_from_slice(&seq);
                    }
                    continue;
                }
                // Drop the broken sequence, keep the byte.
                EscStep::Abort => sc.clear(),
            }
        }
        if b == ESC {
            sc.begin();
        } else {
            out.push(b);
        }
    }
    // An unterminated trailing sequence is dropped.
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(bytes: &[u8]) -> (Vec<EscStep>, Vec<u8>) {
        let mut sc = EscapeScanner::new();
        sc.begin();
        let steps = bytes.iter().map(|b| sc.push(*b)).collect();
        (steps, sc.take())
    }

    #[test]
    fn csi_arrow_completes_on_final_byte() {
        let (steps, seq) = scan(b"[A");
        assert_eq!(steps, vec![EscStep::Pending, EscStep::Complete]);
        assert_eq!(interpret(&seq), Some(AnsiEvent::Key(Key::Up)));
    }

    #[test]
    fn ss3_and_tilde_keys() {
        assert_eq!(interpret(b"\x1bOB"), Some(AnsiEvent::Key(Key::Down)));
        assert_eq!(interpret(b"\x1b[3~"), Some(AnsiEvent::Key(Key::Delete)));
        assert_eq!(interpret(b"\x1b[1;5C"), Some(AnsiEvent::Key(Key::Right)));
    }

    #[test]
    fn cursor_position_report() {
        assert_eq!(
            interpret(b"\x1b[24;80R"),
            Some(AnsiEvent::CursorPosition { row: 24, col: 80 })
        );
        assert_eq!(interpret(b"\x1b[31m"), None);
    }

    #[test]
    fn control_byte_aborts_sequence() {
        let (steps, seq) = scan(b"[1\r");
        assert_eq!(steps.last(), Some(&EscStep::Abort));
        assert_eq!(seq, b"\x1b[1");
    }

    #[test]
    fn osc_ends_on_bel() {
        let (steps, _) = scan(b"]0;title\x07");
        assert_eq!(steps.last(), Some(&EscStep::Complete));
    }

    #[test]
    fn strip_removes_everything() {
        let out = filter_outbound(b"\x1b[1;31mred\x1b[0m \x1b[2Jok", AnsiMode::StripAll);
        assert_eq!(&out[..], b"red ok");
    }

    #[test]
    fn mono_keeps_cursor_moves() {
        let out = filter_outbound(b"\x1b[31mred\x1b[0m\x1b[2K", AnsiMode::ParseButMonochrome);
        assert_eq!(&out[..], b"red\x1b[2K");
    }

    #[test]
    fn raw_borrows() {
        let text = b"\x1b[31mred";
        assert!(matches!(
            filter_outbound(text, AnsiMode::RawPassthrough),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("MONO".parse::<AnsiMode>(), Ok(AnsiMode::ParseButMonochrome));
        assert!("colorful".parse::<AnsiMode>().is_err());
    }
}
