//! AT command and response types.
//!
//! Commands are ASCII lines prefixed with `AT` and terminated by `\r\n`.
//! A response is the group of lines the modem sends back, ending in a
//! termination token such as `OK` or `+CME ERROR: 10`.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DeviceError, Error, Result};

/// Ctrl-Z, ends a two-part command and aborts a running one.
pub const CTRL_Z: u8 = 0x1a;

/// Commands that routinely need more than the channel's default timeout.
///
/// Matched by prefix, in order; the more specific entries come first.
const COMMAND_TIMEOUTS: &[(&str, Duration)] = &[
    ("+COPS=?", Duration::from_secs(80)),
    ("+COPS", Duration::from_secs(15)),
    ("+CPIN", Duration::from_secs(7)),
    ("+CFUN", Duration::from_secs(9)),
    ("+CCFC", Duration::from_secs(10)),
    ("+CMGL", Duration::from_secs(10)),
];

/// Returns the built-in timeout for a command text, if it has one.
#[must_use]
pub fn default_timeout_for(text: &str) -> Option<Duration> {
    COMMAND_TIMEOUTS
        .iter()
        .find(|(prefix, _)| text.starts_with(prefix))
        .map(|&(_, timeout)| timeout)
}

/// A command waiting to be written to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    payload: Bytes,
    continuation: Option<Bytes>,
    timeout: Option<Duration>,
    valid_prefixes: Vec<String>,
}

impl Command {
    /// Creates an AT command. `text` is everything after the `AT` prefix.
    ///
    /// A text with an embedded `\r` is a two-part command (e.g. `+CMGS`):
    /// the first part is sent as `AT<first>\r`, and after the modem's `> `
    /// prompt the second part follows, terminated by Ctrl-Z.
    #[must_use]
    pub fn at(text: impl Into<String>) -> Self {
        let text = text.into();
        let timeout = default_timeout_for(&text);

        let (payload, continuation) = match text.split_once('\r') {
            Some((first, second)) => {
                let mut head = BytesMut::with_capacity(first.len() + 3);
                head.put_slice(b"AT");
                head.put_slice(first.as_bytes());
                head.put_u8(b'\r');

                let mut tail = BytesMut::with_capacity(second.len() + 1);
                tail.put_slice(second.as_bytes());
                tail.put_u8(CTRL_Z);
                (head.freeze(), Some(tail.freeze()))
            }
            None => {
                let mut line = BytesMut::with_capacity(text.len() + 4);
                line.put_slice(b"AT");
                line.put_slice(text.as_bytes());
                line.put_slice(b"\r\n");
                (line.freeze(), None)
            }
        };

        Self {
            text,
            payload,
            continuation,
            timeout,
            valid_prefixes: Vec::new(),
        }
    }

    /// Creates a command that is written verbatim.
    #[must_use]
    pub fn raw(data: impl Into<Bytes>) -> Self {
        let payload = data.into();
        let text = String::from_utf8_lossy(&payload).trim().to_owned();
        Self {
            text,
            payload,
            continuation: None,
            timeout: None,
            valid_prefixes: Vec::new(),
        }
    }

    /// Overrides the timeout for this command.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the prefixes an information line of the reply may start with.
    ///
    /// Lines arriving mid-response that match none of them are treated as
    /// unsolicited.
    #[must_use]
    pub fn valid_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the command text as given by the caller.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the bytes written for the first (or only) part.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the explicit or built-in timeout, if any.
    #[must_use]
    pub const fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the valid reply prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.valid_prefixes
    }

    /// Splits a two-part command into the prompt-requesting head and the body.
    ///
    /// The head carries no reply prefixes and the default timeout; the body
    /// keeps everything else.
    pub(crate) fn into_parts(self) -> (Option<Self>, Self) {
        match self.continuation {
            Some(body) => {
                let head = Self {
                    text: self.text.clone(),
                    payload: self.payload,
                    continuation: None,
                    timeout: None,
                    valid_prefixes: Vec::new(),
                };
                let body = Self {
                    text: self.text,
                    payload: body,
                    continuation: None,
                    timeout: self.timeout,
                    valid_prefixes: self.valid_prefixes,
                };
                (Some(head), body)
            }
            None => (None, self),
        }
    }
}

/// How a solicited response ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    /// `OK`.
    Ok,
    /// `CONNECT`, optionally followed by a rate or text.
    Connect(String),
    /// One of the error tokens.
    Error(DeviceError),
    /// The empty response delivered for a `> ` continuation prompt.
    Prompt,
}

impl FinalResult {
    /// Classifies a terminal line. Returns `None` for non-terminal lines.
    #[must_use]
    pub fn classify(line: &str) -> Option<Self> {
        if line == "OK" {
            return Some(Self::Ok);
        }
        if line == "ERROR" {
            return Some(Self::Error(DeviceError::Failed));
        }
        if let Some(rest) = line.strip_prefix("CONNECT") {
            return Some(Self::Connect(rest.trim().to_owned()));
        }

        let coded: [(&str, fn(u16) -> DeviceError); 3] = [
            ("+CME ERROR", DeviceError::Cme),
            ("+CMS ERROR", DeviceError::Cms),
            ("+EXT ERROR", DeviceError::Ext),
        ];
        for (prefix, make) in coded {
            if line.starts_with(prefix) {
                let code = right_hand_side(line).parse::<u16>();
                return Some(Self::Error(
                    code.map_or_else(|_| DeviceError::Unparsed(line.to_owned()), make),
                ));
            }
        }

        if line.starts_with("BUSY") {
            Some(Self::Error(DeviceError::Busy))
        } else if line.starts_with("NO ANSWER") {
            Some(Self::Error(DeviceError::NoAnswer))
        } else if line.starts_with("NO CARRIER") {
            Some(Self::Error(DeviceError::NoCarrier))
        } else if line.starts_with("NO DIALTONE") {
            Some(Self::Error(DeviceError::NoDialtone))
        } else {
            None
        }
    }
}

/// A complete solicited response: information lines plus the terminal line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    lines: Vec<String>,
}

impl Response {
    /// Creates a response from its lines.
    #[must_use]
    pub const fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Returns all lines, including the terminal one.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consumes the response and returns its lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Returns the terminal line.
    #[must_use]
    pub fn final_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    /// Returns the lines before the terminal line.
    #[must_use]
    pub fn information(&self) -> &[String] {
        match self.lines.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// Classifies the terminal line.
    #[must_use]
    pub fn final_result(&self) -> FinalResult {
        match self.final_line() {
            None => FinalResult::Prompt,
            Some(line) => FinalResult::classify(line)
                .unwrap_or_else(|| FinalResult::Error(DeviceError::Unparsed(line.to_owned()))),
        }
    }

    /// Returns true if the response ended in `OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.final_result() == FinalResult::Ok
    }

    /// Turns an error terminal line into [`Error::DeviceFailed`].
    pub fn into_result(self, command: &str) -> Result<Self> {
        match self.final_result() {
            FinalResult::Error(reason) => Err(Error::DeviceFailed {
                command: command.to_owned(),
                reason,
            }),
            FinalResult::Ok | FinalResult::Connect(_) | FinalResult::Prompt => Ok(self),
        }
    }
}

/// Returns the part of a line after the first `:`, without surrounding
/// blanks and quotes. Lines without a colon are returned trimmed.
#[must_use]
pub fn right_hand_side(line: &str) -> &str {
    let rhs = line.split_once(':').map_or(line, |(_, rhs)| rhs);
    rhs.trim_matches(|c| c == ' ' || c == '"')
}

/// Splits a comma-separated value list, honouring quoted fields.
///
/// Quotes are removed from the returned values.
#[must_use]
pub fn split_values(values: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in values.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => out.push(std::mem::take(&mut current).trim().to_owned()),
            _ => current.push(c),
        }
    }
    if !values.is_empty() {
        out.push(current.trim().to_owned());
    }
    out
}
