//! Line normalization before a line is treated as a command or an answer.

use crate::ansi::{BEL, ESC, EscStep, EscapeScanner};

const DEL: u8 = 0x7f;

/// Decode lossily as UTF-8, turn tabs into spaces, drop other control
/// characters, trim, and cap the length in characters.
///
/// Escape sequences are handled whole: with `keep_escapes` a complete
/// sequence stays byte for byte, otherwise it goes along with its
/// parameters. An unterminated sequence is always dropped.
pub fn sanitize_line(raw: &[u8], max_chars: usize, keep_escapes: bool) -> String {
    let bytes = filter_controls(raw, keep_escapes);
    let s = String::from_utf8_lossy(&bytes);
    let mut out = String::with_capacity(s.len().min(max_chars));
    let mut n = 0usize;
    for c in s.trim().chars() {
        if n >= max_chars {
            break;
        }
        // ESC and BEL are only still here inside a kept sequence.
        if c.is_control() && c != ESC as char && c != BEL as char {
            continue;
        }
        out.push(c);
        n += 1;
    }
    out.trim_end().to_string()
}

fn filter_controls(raw: &[u8], keep_escapes: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut esc = EscapeScanner::new();
    for &b in raw {
        if !esc.is_empty() {
            match esc.push(b) {
                EscStep::Pending => continue,
                EscStep::Complete => {
                    let seq = esc.take();
                    if keep_escapes {
                        out.extend_from_slice(&seq);
                    }
                    continue;
                }
                EscStep::Abort => esc.clear(),
            }
        }
        match b {
            ESC => esc.begin(),
            b'\t' => out.push(b' '),
            0..=31 | DEL => {}
            _ => out.push(b),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_controls_and_trims() {
        assert_eq!(sanitize_line(b"  say\thi\x07 there  ", 100, false), "say hi there");
        assert_eq!(sanitize_line(b"\xffok", 100, false), "\u{fffd}ok");
    }

    #[test]
    fn caps_length_in_chars() {
        assert_eq!(sanitize_line("h\u{e9}llo".as_bytes(), 2, false), "h\u{e9}");
        assert_eq!(sanitize_line(b"ab   cd", 4, false), "ab");
    }

    #[test]
    fn escape_sequences_go_whole() {
        let line = b"say \x1b[31mred\x1b[0m \x1b]0;title\x07done";
        assert_eq!(sanitize_line(line, 100, false), "say red done");
        assert_eq!(
            sanitize_line(line, 100, true),
            "say \x1b[31mred\x1b[0m \x1b]0;title\x07done"
        );
    }

    #[test]
    fn broken_escapes_never_leave_fragments() {
        // aborted by a control byte, then unterminated at the end
        assert_eq!(sanitize_line(b"a\x1b[3\x01b", 100, true), "ab");
        assert_eq!(sanitize_line(b"look\x1b[12", 100, true), "look");
        assert_eq!(sanitize_line(b"look\x1b[12", 100, false), "look");
    }
}
