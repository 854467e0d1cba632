//! STOMP 1.2 frame codec.
//!
//! A [`StompFrame`] is a value object: a command from a closed set, an
//! ordered list of header key/value pairs, and an opaque body. The parser is
//! strict — unterminated frames, unknown commands, malformed headers, missing
//! mandatory headers and bad body termination are all rejected with a typed
//! [`StompError`]. Serializing a frame built through [`StompFrame::new`] and
//! parsing it back yields the same frame.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors returned by the frame parser and the frame builder.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StompError {
    #[error("empty input")]
    EmptyInput,
    #[error("frame is not NUL-terminated")]
    UnterminatedFrame,
    #[error("invalid STOMP command")]
    InvalidCommand,
    #[error("malformed header line")]
    NoHeader,
    #[error("empty header key")]
    EmptyHeaderKey,
    #[error("invalid header value")]
    InvalidHeaderValue,
    #[error("missing required header")]
    MissingRequiredHeader,
    #[error("content-length does not match the body length")]
    ContentLengthMismatch,
    #[error("unexpected data after the body NUL octet")]
    JunkAfterBody,
}

/// The closed set of STOMP 1.2 commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    Abort,
    Ack,
    Begin,
    Commit,
    Connect,
    Connected,
    Disconnect,
    Error,
    Message,
    Nack,
    Receipt,
    Send,
    Stomp,
    Subscribe,
    Unsubscribe,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Abort => "ABORT",
            StompCommand::Ack => "ACK",
            StompCommand::Begin => "BEGIN",
            StompCommand::Commit => "COMMIT",
            StompCommand::Connect => "CONNECT",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Error => "ERROR",
            StompCommand::Message => "MESSAGE",
            StompCommand::Nack => "NACK",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Send => "SEND",
            StompCommand::Stomp => "STOMP",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
        }
    }

    /// Header escaping applies to every command except CONNECT and CONNECTED
    /// (STOMP 1.2 keeps those frames backward compatible with 1.0).
    fn uses_header_escapes(&self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }

    /// Headers that must be present on a frame with this command.
    fn required_headers(&self) -> &'static [StompHeader] {
        match self {
            StompCommand::Connect | StompCommand::Stomp => {
                &[StompHeader::AcceptVersion, StompHeader::Host]
            }
            StompCommand::Connected => &[StompHeader::Version],
            StompCommand::Send => &[StompHeader::Destination],
            StompCommand::Subscribe => &[StompHeader::Destination, StompHeader::Id],
            StompCommand::Unsubscribe => &[StompHeader::Id],
            StompCommand::Message => &[
                StompHeader::Destination,
                StompHeader::MessageId,
                StompHeader::Subscription,
            ],
            StompCommand::Receipt => &[StompHeader::ReceiptId],
            _ => &[],
        }
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompCommand {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ABORT" => Ok(StompCommand::Abort),
            "ACK" => Ok(StompCommand::Ack),
            "BEGIN" => Ok(StompCommand::Begin),
            "COMMIT" => Ok(StompCommand::Commit),
            "CONNECT" => Ok(StompCommand::Connect),
            "CONNECTED" => Ok(StompCommand::Connected),
            "DISCONNECT" => Ok(StompCommand::Disconnect),
            "ERROR" => Ok(StompCommand::Error),
            "MESSAGE" => Ok(StompCommand::Message),
            "NACK" => Ok(StompCommand::Nack),
            "RECEIPT" => Ok(StompCommand::Receipt),
            "SEND" => Ok(StompCommand::Send),
            "STOMP" => Ok(StompCommand::Stomp),
            "SUBSCRIBE" => Ok(StompCommand::Subscribe),
            "UNSUBSCRIBE" => Ok(StompCommand::Unsubscribe),
            _ => Err(StompError::InvalidCommand),
        }
    }
}

/// The closed set of STOMP 1.2 header keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompHeader {
    AcceptVersion,
    Ack,
    ContentLength,
    ContentType,
    Destination,
    HeartBeat,
    Host,
    Id,
    Login,
    Message,
    MessageId,
    Passcode,
    Receipt,
    ReceiptId,
    Server,
    Session,
    Subscription,
    Transaction,
    Version,
}

impl StompHeader {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompHeader::AcceptVersion => "accept-version",
            StompHeader::Ack => "ack",
            StompHeader::ContentLength => "content-length",
            StompHeader::ContentType => "content-type",
            StompHeader::Destination => "destination",
            StompHeader::HeartBeat => "heart-beat",
            StompHeader::Host => "host",
            StompHeader::Id => "id",
            StompHeader::Login => "login",
            StompHeader::Message => "message",
            StompHeader::MessageId => "message-id",
            StompHeader::Passcode => "passcode",
            StompHeader::Receipt => "receipt",
            StompHeader::ReceiptId => "receipt-id",
            StompHeader::Server => "server",
            StompHeader::Session => "session",
            StompHeader::Subscription => "subscription",
            StompHeader::Transaction => "transaction",
            StompHeader::Version => "version",
        }
    }
}

impl fmt::Display for StompHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompHeader {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept-version" => Ok(StompHeader::AcceptVersion),
            "ack" => Ok(StompHeader::Ack),
            "content-length" => Ok(StompHeader::ContentLength),
            "content-type" => Ok(StompHeader::ContentType),
            "destination" => Ok(StompHeader::Destination),
            "heart-beat" => Ok(StompHeader::HeartBeat),
            "host" => Ok(StompHeader::Host),
            "id" => Ok(StompHeader::Id),
            "login" => Ok(StompHeader::Login),
            "message" => Ok(StompHeader::Message),
            "message-id" => Ok(StompHeader::MessageId),
            "passcode" => Ok(StompHeader::Passcode),
            "receipt" => Ok(StompHeader::Receipt),
            "receipt-id" => Ok(StompHeader::ReceiptId),
            "server" => Ok(StompHeader::Server),
            "session" => Ok(StompHeader::Session),
            "subscription" => Ok(StompHeader::Subscription),
            "transaction" => Ok(StompHeader::Transaction),
            "version" => Ok(StompHeader::Version),
            _ => Err(StompError::NoHeader),
        }
    }
}

/// A validated STOMP 1.2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    command: StompCommand,
    headers: Vec<(StompHeader, String)>,
    body: String,
}

impl StompFrame {
    /// Build a frame, validating the mandatory headers for the command.
    ///
    /// Headers keep their insertion order. If a key is passed more than once
    /// the first occurrence wins, matching the parser. A `content-length`
    /// header, when given, must equal the body length in bytes.
    pub fn new<H, B>(command: StompCommand, headers: H, body: B) -> Result<Self, StompError>
    where
        H: IntoIterator<Item = (StompHeader, String)>,
        B: Into<String>,
    {
        let body = body.into();
        if body.contains('\0') {
            // The body runs up to the first NUL octet on the wire, so a NUL
            // inside the body cannot round-trip.
            return Err(StompError::JunkAfterBody);
        }
        let mut deduped: Vec<(StompHeader, String)> = Vec::new();
        for (key, value) in headers {
            if value.contains('\0') {
                return Err(StompError::InvalidHeaderValue);
            }
            if !command.uses_header_escapes() && (value.contains('\n') || value.contains('\r')) {
                // No escaping on CONNECT/CONNECTED, so a newline would break
                // the framing.
                return Err(StompError::InvalidHeaderValue);
            }
            if !deduped.iter().any(|(k, _)| *k == key) {
                deduped.push((key, value));
            }
        }
        let frame = Self {
            command,
            headers: deduped,
            body,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Parse a frame off the wire.
    pub fn parse(input: &str) -> Result<Self, StompError> {
        if input.is_empty() {
            return Err(StompError::EmptyInput);
        }
        let nul = input.find('\0').ok_or(StompError::UnterminatedFrame)?;

        // Only heartbeat padding (CR/LF) may follow the terminating NUL.
        if !input[nul + 1..].bytes().all(|b| b == b'\r' || b == b'\n') {
            return Err(StompError::JunkAfterBody);
        }
        let content = &input[..nul];

        // Command line.
        let command_end = content.find('\n').ok_or(StompError::NoHeader)?;
        let command: StompCommand = strip_cr(&content[..command_end]).parse()?;

        // Header lines, up to the blank line.
        let mut rest = &content[command_end + 1..];
        let mut headers: Vec<(StompHeader, String)> = Vec::new();
        loop {
            let line_end = rest.find('\n').ok_or(StompError::NoHeader)?;
            let line = strip_cr(&rest[..line_end]);
            rest = &rest[line_end + 1..];
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(StompError::NoHeader)?;
            let raw_key = &line[..colon];
            if raw_key.is_empty() {
                return Err(StompError::EmptyHeaderKey);
            }
            let key: StompHeader = raw_key.parse()?;
            let value = if command.uses_header_escapes() {
                unescape(&line[colon + 1..])?
            } else {
                line[colon + 1..].to_string()
            };
            // STOMP 1.2 §2.1: on repeated keys the first occurrence wins.
            if !headers.iter().any(|(k, _)| *k == key) {
                headers.push((key, value));
            }
        }

        let frame = Self {
            command,
            headers,
            body: rest.to_string(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Serialize the frame to its wire representation, including the
    /// terminating NUL octet.
    pub fn to_wire(&self) -> String {
        let escaping = self.command.uses_header_escapes();
        let mut out = String::new();
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            out.push_str(key.as_str());
            out.push(':');
            if escaping {
                out.push_str(&escape(value));
            } else {
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    pub fn command(&self) -> StompCommand {
        self.command
    }

    pub fn headers(&self) -> &[(StompHeader, String)] {
        &self.headers
    }

    /// Value of the first (and only retained) occurrence of a header.
    pub fn header(&self, key: StompHeader) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    fn validate(&self) -> Result<(), StompError> {
        for required in self.command.required_headers() {
            if self.header(*required).is_none() {
                return Err(StompError::MissingRequiredHeader);
            }
        }
        if let Some(length) = self.header(StompHeader::ContentLength) {
            let length: usize = length
                .parse()
                .map_err(|_| StompError::ContentLengthMismatch)?;
            if length != self.body.len() {
                return Err(StompError::ContentLengthMismatch);
            }
        }
        Ok(())
    }
}

impl FromStr for StompFrame {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StompFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frame, {} byte body", self.command, self.body.len())
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Apply the STOMP 1.2 header value escapes.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

/// Undo the STOMP 1.2 header value escapes. Any other escape sequence is a
/// fatal frame error per the specification.
fn unescape(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidHeaderValue),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(StompHeader, &str)]) -> Vec<(StompHeader, String)> {
        pairs
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect()
    }

    #[test]
    fn parses_a_well_formed_frame() {
        let input = "CONNECT\naccept-version:1.2\nhost:ltnm.example.com\n\n\0";
        let frame = StompFrame::parse(input).unwrap();
        assert_eq!(frame.command(), StompCommand::Connect);
        assert_eq!(frame.header(StompHeader::AcceptVersion), Some("1.2"));
        assert_eq!(frame.header(StompHeader::Host), Some("ltnm.example.com"));
        assert_eq!(frame.body(), "");
    }

    #[test]
    fn parses_a_frame_with_a_body() {
        let input = "MESSAGE\ndestination:/passengers\nmessage-id:42\nsubscription:sub-0\n\n{\"x\":1}\0";
        let frame = StompFrame::parse(input).unwrap();
        assert_eq!(frame.command(), StompCommand::Message);
        assert_eq!(frame.body(), "{\"x\":1}");
    }

    #[test]
    fn accepts_carriage_returns_in_line_endings() {
        let input = "RECEIPT\r\nreceipt-id:77\r\n\r\nok\0";
        let frame = StompFrame::parse(input).unwrap();
        assert_eq!(frame.header(StompHeader::ReceiptId), Some("77"));
        assert_eq!(frame.body(), "ok");
    }

    #[test]
    fn accepts_heartbeat_padding_after_the_nul() {
        let input = "RECEIPT\nreceipt-id:77\n\n\0\r\n\n";
        assert!(StompFrame::parse(input).is_ok());
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(StompFrame::parse(""), Err(StompError::EmptyInput));
    }

    #[test]
    fn rejects_a_frame_without_nul() {
        let input = "RECEIPT\nreceipt-id:77\n\nbody";
        assert_eq!(StompFrame::parse(input), Err(StompError::UnterminatedFrame));
    }

    #[test]
    fn rejects_an_unknown_command() {
        let input = "SHOUT\nreceipt-id:77\n\n\0";
        assert_eq!(StompFrame::parse(input), Err(StompError::InvalidCommand));
    }

    #[test]
    fn rejects_a_header_without_a_colon() {
        let input = "RECEIPT\nreceipt-id 77\n\n\0";
        assert_eq!(StompFrame::parse(input), Err(StompError::NoHeader));
    }

    #[test]
    fn rejects_an_empty_header_key() {
        let input = "RECEIPT\n:77\n\n\0";
        assert_eq!(StompFrame::parse(input), Err(StompError::EmptyHeaderKey));
    }

    #[test]
    fn rejects_a_missing_blank_line() {
        let input = "RECEIPT\nreceipt-id:77\0";
        assert_eq!(StompFrame::parse(input), Err(StompError::NoHeader));
    }

    #[test]
    fn rejects_a_missing_required_header() {
        let input = "SUBSCRIBE\ndestination:/passengers\n\n\0";
        assert_eq!(
            StompFrame::parse(input),
            Err(StompError::MissingRequiredHeader)
        );
    }

    #[test]
    fn rejects_junk_after_the_body() {
        let input = "RECEIPT\nreceipt-id:77\n\nbody\0junk";
        assert_eq!(StompFrame::parse(input), Err(StompError::JunkAfterBody));
    }

    #[test]
    fn rejects_a_content_length_mismatch() {
        let input = "SEND\ndestination:/passengers\ncontent-length:3\n\nlonger\0";
        assert_eq!(
            StompFrame::parse(input),
            Err(StompError::ContentLengthMismatch)
        );
    }

    #[test]
    fn accepts_a_matching_content_length() {
        let input = "SEND\ndestination:/passengers\ncontent-length:6\n\nlonger\0";
        assert!(StompFrame::parse(input).is_ok());
    }

    #[test]
    fn first_duplicate_header_wins() {
        let input = "RECEIPT\nreceipt-id:first\nreceipt-id:second\n\n\0";
        let frame = StompFrame::parse(input).unwrap();
        assert_eq!(frame.header(StompHeader::ReceiptId), Some("first"));
        assert_eq!(frame.headers().len(), 1);
    }

    #[test]
    fn unescapes_header_values() {
        let input = "SEND\ndestination:a\\cb\\nc\\rd\\\\e\n\n\0";
        let frame = StompFrame::parse(input).unwrap();
        assert_eq!(frame.header(StompHeader::Destination), Some("a:b\nc\rd\\e"));
    }

    #[test]
    fn rejects_an_invalid_escape_sequence() {
        let input = "SEND\ndestination:a\\xb\n\n\0";
        assert_eq!(StompFrame::parse(input), Err(StompError::InvalidHeaderValue));
    }

    #[test]
    fn connect_header_values_stay_raw() {
        // CONNECT is exempt from escaping: backslashes pass through.
        let input = "CONNECT\naccept-version:1.2\nhost:a\\cb\n\n\0";
        let frame = StompFrame::parse(input).unwrap();
        assert_eq!(frame.header(StompHeader::Host), Some("a\\cb"));
    }

    #[test]
    fn serializes_in_insertion_order() {
        let frame = StompFrame::new(
            StompCommand::Subscribe,
            headers(&[
                (StompHeader::Id, "sub-0"),
                (StompHeader::Destination, "/passengers"),
                (StompHeader::Ack, "auto"),
                (StompHeader::Receipt, "sub-0"),
            ]),
            "",
        )
        .unwrap();
        assert_eq!(
            frame.to_wire(),
            "SUBSCRIBE\nid:sub-0\ndestination:/passengers\nack:auto\nreceipt:sub-0\n\n\0"
        );
    }

    #[test]
    fn builder_rejects_missing_required_headers() {
        let result = StompFrame::new(
            StompCommand::Subscribe,
            headers(&[(StompHeader::Destination, "/passengers")]),
            "",
        );
        assert_eq!(result, Err(StompError::MissingRequiredHeader));
    }

    #[test]
    fn round_trips_frames_with_special_characters() {
        let frame = StompFrame::new(
            StompCommand::Send,
            headers(&[(StompHeader::Destination, "queue:a\nline\r\\end")]),
            "payload",
        )
        .unwrap();
        let parsed = StompFrame::parse(&frame.to_wire()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn round_trips_an_empty_body_frame() {
        let frame = StompFrame::new(
            StompCommand::Unsubscribe,
            headers(&[(StompHeader::Id, "sub-1")]),
            "",
        )
        .unwrap();
        assert_eq!(StompFrame::parse(&frame.to_wire()).unwrap(), frame);
    }

    #[test]
    fn round_trips_a_message_frame() {
        let frame = StompFrame::new(
            StompCommand::Message,
            headers(&[
                (StompHeader::Destination, "/passengers"),
                (StompHeader::MessageId, "m-1"),
                (StompHeader::Subscription, "sub-2"),
                (StompHeader::ContentLength, "4"),
            ]),
            "data",
        )
        .unwrap();
        assert_eq!(StompFrame::parse(&frame.to_wire()).unwrap(), frame);
    }

    #[test]
    fn builder_rejects_a_nul_in_the_body() {
        let result = StompFrame::new(StompCommand::Error, Vec::new(), "a\0b");
        assert_eq!(result, Err(StompError::JunkAfterBody));
    }
}
