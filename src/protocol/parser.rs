//! Low-level AT response parser.
//!
//! The parser consumes the byte stream of one channel in chunks of arbitrary
//! size and emits complete response groups. Each completed line is routed
//! either to the solicited path (a command is in flight) or to the unsolicited
//! path (an asynchronous network event). Chunk boundaries never change the
//! result, except for the continuation prompt, which is matched against the
//! whole chunk.
//!
//! ```text
//!            \r              \n
//!   Start ───────▶ StartAfterCR ───────▶ Inline ◀──┐ data, or \r \n inside quotes
//!     │ \n / data                          │  └─────┘
//!     └────────────────────────────────────┤ \r
//!                                          ▼
//!             line completed ◀── \n ── InlineAfterCR ── \r ──▶ InlineAfterMultipleCR
//!                   ▲                                               │ \r (loop)
//!                   └──────────────────── \n ───────────────────────┘
//! ```

use bytes::{Bytes, BytesMut};

use crate::protocol::command::{FinalResult, Response};
use crate::unsolicited::Unsolicited;

/// Prompt the modem sends when it waits for the second part of a command.
pub const CONTINUATION_PROMPT: &[u8] = b"\r\n> ";

/// Data-driven parser settings; per-modem deviations live here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Reply headers that are followed by a PDU line within a solicited response.
    pub solicited_pdu_prefixes: Vec<String>,
    /// Unsolicited headers that are followed by a PDU line.
    pub unsolicited_pdu_prefixes: Vec<String>,
    /// The exact chunk that signals a continuation prompt.
    pub continuation_prompt: Bytes,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            solicited_pdu_prefixes: vec!["+CMGL:".into(), "+CMGR:".into()],
            unsolicited_pdu_prefixes: vec!["+CMT:".into(), "+CBM:".into(), "+CDS:".into()],
            continuation_prompt: Bytes::from_static(CONTINUATION_PROMPT),
        }
    }
}

impl ParserConfig {
    /// Replaces the solicited PDU-announcing prefixes.
    #[must_use]
    pub fn solicited_pdu_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.solicited_pdu_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the unsolicited PDU-announcing prefixes.
    #[must_use]
    pub fn unsolicited_pdu_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsolicited_pdu_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the continuation prompt.
    #[must_use]
    pub fn continuation_prompt(mut self, prompt: impl Into<Bytes>) -> Self {
        self.continuation_prompt = prompt.into();
        self
    }
}

/// Position of the parser within the current line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Between lines.
    Start,
    /// Saw `\r` between lines.
    StartAfterCr,
    /// Accumulating a line.
    Inline,
    /// Saw `\r` after line data.
    InlineAfterCr,
    /// Saw two or more `\r` after line data.
    InlineAfterMultipleCr,
}

/// Which path announced the PDU line that comes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingPdu {
    Solicited,
    Unsolicited,
}

/// A completed group of lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// The response to the command in flight.
    Response(Response),
    /// An unsolicited result code, possibly with its PDU line.
    Unsolicited(Unsolicited),
}

/// Byte-by-byte AT response parser.
#[derive(Debug)]
pub struct LineParser {
    config: ParserConfig,
    state: ParserState,
    line: BytesMut,
    in_quotes: bool,
    solicited: Vec<String>,
    unsolicited: Vec<String>,
    pending_pdu: Option<PendingPdu>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl LineParser {
    /// Creates a parser with the given configuration.
    #[must_use]
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            state: ParserState::Start,
            line: BytesMut::with_capacity(256),
            in_quotes: false,
            solicited: Vec::new(),
            unsolicited: Vec::new(),
            pending_pdu: None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ParserState {
        self.state
    }

    /// Returns true if no partial line or group is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == ParserState::Start
            && self.line.is_empty()
            && self.solicited.is_empty()
            && self.unsolicited.is_empty()
            && self.pending_pdu.is_none()
    }

    /// Drops everything buffered and returns to [`ParserState::Start`].
    pub fn reset(&mut self) {
        self.state = ParserState::Start;
        self.line.clear();
        self.in_quotes = false;
        self.solicited.clear();
        self.unsolicited.clear();
        self.pending_pdu = None;
    }

    /// Feeds a chunk of received bytes.
    ///
    /// `in_flight` carries the valid reply prefixes of the command currently
    /// waiting for its response, or `None` if no command is in flight. Once a
    /// response completes, the rest of the chunk is parsed as unsolicited,
    /// since the next command has not been written yet.
    pub fn feed(&mut self, data: &[u8], in_flight: Option<&[String]>) -> Vec<Parsed> {
        let mut out = Vec::new();

        if in_flight.is_some() && data == self.config.continuation_prompt.as_ref() {
            tracing::trace!("continuation prompt received");
            out.push(Parsed::Response(Response::default()));
            self.reset();
            return out;
        }

        let mut in_flight = in_flight;
        for &byte in data {
            self.step(byte, &mut in_flight, &mut out);
        }
        out
    }

    fn step(&mut self, byte: u8, in_flight: &mut Option<&[String]>, out: &mut Vec<Parsed>) {
        use ParserState::{InlineAfterCr, InlineAfterMultipleCr, Inline, Start, StartAfterCr};

        let next = match (self.state, byte) {
            (Start, b'\r') | (StartAfterCr, b'\r') => Some(StartAfterCr),
            (Start | StartAfterCr, b'\n') => Some(Inline),
            (Start, _) => {
                self.push_byte(byte);
                Some(Inline)
            }
            (Inline, b'\r' | b'\n') if self.in_quotes => {
                self.push_byte(byte);
                Some(Inline)
            }
            (Inline, b'\r') => Some(InlineAfterCr),
            (Inline, b'\n') | (InlineAfterCr | InlineAfterMultipleCr, b'\n') => {
                self.line_completed(in_flight, out);
                Some(Start)
            }
            (Inline, _) => {
                self.push_byte(byte);
                Some(Inline)
            }
            (InlineAfterCr | InlineAfterMultipleCr, b'\r') => Some(InlineAfterMultipleCr),
            (StartAfterCr | InlineAfterCr | InlineAfterMultipleCr, _) => None,
        };

        match next {
            Some(state) => self.state = state,
            None => {
                tracing::warn!(
                    "undefined parser transition from {:?} on byte {byte:#04x} ({}), line so far {:?}; resetting",
                    self.state,
                    if in_flight.is_some() { "solicited" } else { "unsolicited" },
                    String::from_utf8_lossy(&self.line),
                );
                self.reset();
            }
        }
    }

    fn push_byte(&mut self, byte: u8) {
        if byte == b'"' {
            self.in_quotes = !self.in_quotes;
        }
        self.line.extend_from_slice(&[byte]);
    }

    fn line_completed(&mut self, in_flight: &mut Option<&[String]>, out: &mut Vec<Parsed>) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        self.in_quotes = false;

        match *in_flight {
            Some(prefixes) => {
                if self.solicited_line(line, prefixes, out) {
                    *in_flight = None;
                }
            }
            None => self.unsolicited_line(line, out),
        }
    }

    /// Handles a line while a command is in flight. Returns true when the
    /// response is complete.
    fn solicited_line(&mut self, line: String, prefixes: &[String], out: &mut Vec<Parsed>) -> bool {
        if self.pending_pdu == Some(PendingPdu::Unsolicited) {
            self.unsolicited_line(line, out);
            return false;
        }

        if FinalResult::classify(&line).is_some() {
            tracing::trace!("solicited response completed by {line:?}");
            self.solicited.push(line);
            let lines = std::mem::take(&mut self.solicited);
            out.push(Parsed::Response(Response::new(lines)));
            self.reset();
            return true;
        }

        if self.pending_pdu == Some(PendingPdu::Solicited) {
            if line.is_empty() {
                // same as on the unsolicited path
                return false;
            }
            self.pending_pdu = None;
            self.solicited.push(line);
            return false;
        }

        if line.is_empty() {
            return false;
        }

        if !prefixes.is_empty() && !prefixes.iter().any(|p| line.starts_with(p.as_str())) {
            tracing::debug!("line {line:?} matches no reply prefix, treating it as unsolicited");
            self.unsolicited_line(line, out);
            return false;
        }

        if starts_with_any(&line, &self.config.solicited_pdu_prefixes) {
            self.pending_pdu = Some(PendingPdu::Solicited);
        }
        self.solicited.push(line);
        false
    }

    fn unsolicited_line(&mut self, line: String, out: &mut Vec<Parsed>) {
        if self.pending_pdu == Some(PendingPdu::Unsolicited) {
            if line.is_empty() {
                // some modems put an empty line between header and PDU
                return;
            }
            self.pending_pdu = None;
            self.unsolicited.push(line);
            self.deliver_unsolicited(out);
            return;
        }

        if line.is_empty() {
            return;
        }

        let announces_pdu = starts_with_any(&line, &self.config.unsolicited_pdu_prefixes);
        self.unsolicited.push(line);
        if announces_pdu {
            self.pending_pdu = Some(PendingPdu::Unsolicited);
        } else {
            self.deliver_unsolicited(out);
        }
    }

    fn deliver_unsolicited(&mut self, out: &mut Vec<Parsed>) {
        let lines = std::mem::take(&mut self.unsolicited);
        tracing::trace!("unsolicited group completed: {lines:?}");
        out.push(Parsed::Unsolicited(Unsolicited::new(lines)));
    }
}

fn starts_with_any(line: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| line.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: &[String] = &[];

    fn response(lines: &[&str]) -> Parsed {
        Parsed::Response(Response::new(lines.iter().map(|&l| l.to_owned()).collect()))
    }

    fn unsolicited(lines: &[&str]) -> Parsed {
        Parsed::Unsolicited(Unsolicited::new(lines.iter().map(|&l| l.to_owned()).collect()))
    }

    /// Feeds `data` split at every position and checks all splits agree.
    fn assert_split_invariant(data: &[u8], in_flight: Option<&[String]>, expected: &[Parsed]) {
        for split in 0..=data.len() {
            let mut parser = LineParser::default();
            let mut got = parser.feed(&data[..split], in_flight);
            let flight = if got.iter().any(|p| matches!(p, Parsed::Response(_))) {
                None
            } else {
                in_flight
            };
            got.extend(parser.feed(&data[split..], flight));
            assert_eq!(got, expected, "split at {split}");
            assert!(parser.is_idle(), "parser not idle after split at {split}");
        }

        let mut parser = LineParser::default();
        let mut got = Vec::new();
        let mut flight = in_flight;
        for byte in data {
            let parsed = parser.feed(std::slice::from_ref(byte), flight);
            if parsed.iter().any(|p| matches!(p, Parsed::Response(_))) {
                flight = None;
            }
            got.extend(parsed);
        }
        assert_eq!(got, expected, "byte by byte");
    }

    #[test]
    fn test_simple_ok() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\nOK\r\n", Some(NONE));
        assert_eq!(out, vec![response(&["OK"])]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_multi_line_response_any_split() {
        assert_split_invariant(
            b"\r\n+CGMR: 1.0\r\n\r\n+CGMM: GTA02\r\n\r\nOK\r\n",
            Some(NONE),
            &[response(&["+CGMR: 1.0", "+CGMM: GTA02", "OK"])],
        );
    }

    #[test]
    fn test_error_tokens_terminate() {
        for token in ["ERROR", "+CME ERROR: 10", "+CMS ERROR: 322", "NO CARRIER", "BUSY"] {
            let mut parser = LineParser::default();
            let data = format!("\r\n{token}\r\n");
            assert_eq!(parser.feed(data.as_bytes(), Some(NONE)), vec![response(&[token])]);
        }
    }

    #[test]
    fn test_quoted_crlf_is_not_a_terminator() {
        assert_split_invariant(
            b"\r\n+CPBR: 1,\"+4912\",145,\"two\r\nlines\"\r\n\r\nOK\r\n",
            Some(NONE),
            &[response(&["+CPBR: 1,\"+4912\",145,\"two\r\nlines\"", "OK"])],
        );
    }

    #[test]
    fn test_unsolicited_single_line() {
        assert_split_invariant(
            b"\r\n+CREG: 1,\"000F\",\"032F\"\r\n\r\nRING\r\n",
            None,
            &[unsolicited(&["+CREG: 1,\"000F\",\"032F\""]), unsolicited(&["RING"])],
        );
    }

    #[test]
    fn test_unsolicited_pdu() {
        assert_split_invariant(
            b"\r\n+CMT: ,22\r\n0791947106004034040D91\r\n",
            None,
            &[unsolicited(&["+CMT: ,22", "0791947106004034040D91"])],
        );
    }

    #[test]
    fn test_empty_line_before_unsolicited_pdu_is_discarded() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\n+CBM: 88\r\n\r\n001000DD\r\n", None);
        assert_eq!(out, vec![unsolicited(&["+CBM: 88", "001000DD"])]);
    }

    #[test]
    fn test_solicited_pdu() {
        let prefixes = ["+CMGL:".to_owned()];
        assert_split_invariant(
            b"\r\n+CMGL: 1,1,,22\r\n07919471\r\n\r\nOK\r\n",
            Some(&prefixes),
            &[response(&["+CMGL: 1,1,,22", "07919471", "OK"])],
        );
    }

    #[test]
    fn test_empty_line_before_solicited_pdu_is_discarded() {
        let prefixes = ["+CMGL:".to_owned()];
        assert_split_invariant(
            b"\r\n+CMGL: 1,1,,22\r\n\r\n07919471\r\n\r\nOK\r\n",
            Some(&prefixes),
            &[response(&["+CMGL: 1,1,,22", "07919471", "OK"])],
        );
    }

    #[test]
    fn test_interleaved_unsolicited_is_reclassified() {
        let prefixes = ["+COPS:".to_owned()];
        let mut parser = LineParser::default();
        let out = parser.feed(
            b"\r\n+CREG: 2\r\n\r\n+COPS: 0,0,\"E-Plus\"\r\n\r\nOK\r\n",
            Some(&prefixes),
        );
        assert_eq!(
            out,
            vec![
                unsolicited(&["+CREG: 2"]),
                response(&["+COPS: 0,0,\"E-Plus\"", "OK"])
            ]
        );
    }

    #[test]
    fn test_interleaved_unsolicited_pdu_keeps_response_intact() {
        let prefixes = ["+CPBR:".to_owned()];
        let mut parser = LineParser::default();
        let out = parser.feed(
            b"\r\n+CPBR: 1,\"123\",129,\"A\"\r\n\r\n+CMT: ,4\r\n0011\r\n\r\nOK\r\n",
            Some(&prefixes),
        );
        assert_eq!(
            out,
            vec![
                unsolicited(&["+CMT: ,4", "0011"]),
                response(&["+CPBR: 1,\"123\",129,\"A\"", "OK"])
            ]
        );
    }

    #[test]
    fn test_no_prefixes_accepts_any_line() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\nFIC\r\n\r\nOK\r\n", Some(NONE));
        assert_eq!(out, vec![response(&["FIC", "OK"])]);
    }

    #[test]
    fn test_rest_of_chunk_after_response_is_unsolicited() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\nOK\r\n\r\n+CSQ: 20,99\r\n", Some(NONE));
        assert_eq!(out, vec![response(&["OK"]), unsolicited(&["+CSQ: 20,99"])]);
    }

    #[test]
    fn test_continuation_prompt() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\n> ", Some(NONE));
        assert_eq!(out, vec![Parsed::Response(Response::default())]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_multiple_cr() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\n+CSQ: 20,99\r\r\r\n", None);
        assert_eq!(out, vec![unsolicited(&["+CSQ: 20,99"])]);
        assert_eq!(parser.state(), ParserState::Start);
    }

    #[test]
    fn test_undefined_transition_resets() {
        let mut parser = LineParser::default();
        assert!(parser.feed(b"\r\n+CFUN: 1\rX", Some(NONE)).is_empty());
        assert!(parser.is_idle());

        let out = parser.feed(b"\r\nOK\r\n", Some(NONE));
        assert_eq!(out, vec![response(&["OK"])]);
    }

    #[test]
    fn test_empty_lines_are_ignored() {
        let mut parser = LineParser::default();
        let out = parser.feed(b"\r\n\r\n\r\n+CSQ: 17,99\r\n", None);
        assert_eq!(out, vec![unsolicited(&["+CSQ: 17,99"])]);
    }
}
