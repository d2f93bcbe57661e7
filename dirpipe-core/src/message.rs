//! Text request/response messages exchanged over the connect pipe.
//!
//! ```text
//! CONNECT DIRPIPE/1.0
//! accept-types: ChunkFilePipe%2CFilePipe
//! ```
//!
//! ```text
//! DIRPIPE/1.0 200 Pipe created
//! directory: /tmp/pipes/3f2a...
//! role: yin
//! type: ChunkFilePipe
//! ```
//!
//! Parameter keys and values are percent-encoded.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;

/// Protocol tag placed in every header line.
pub const PROTOCOL: &str = "DIRPIPE";

/// Protocol version placed in every header line.
pub const VERSION: &str = "1.0";

/// File a server creates inside a request directory to claim it.
pub const SERVED_MARKER: &str = ".served";

/// Parameter keys.
pub mod keys {
    /// Directory backing a file or chunk-file pipe.
    pub const DIRECTORY: &str = "directory";
    /// File backing a shared-memory pipe.
    pub const FILE: &str = "file";
    /// Role of the receiving end.
    pub const ROLE: &str = "role";
    /// Pipe type name.
    pub const TYPE: &str = "type";
    /// Shared-memory file size in bytes.
    pub const SIZE: &str = "size";
    /// Comma-separated pipe type names the client accepts.
    pub const ACCEPT_TYPES: &str = "accept-types";
}

/// Request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the server to create a pipe.
    Connect,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            other => Err(Error::parse(format!("unknown command '{other}'"))),
        }
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The pipe exists and the parameters describe the client's end.
    PipeCreated,
    /// The request could not be read or parsed.
    BadRequest,
    /// The server failed to satisfy a well-formed request.
    InternalError,
}

impl Status {
    /// Numeric status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::PipeCreated => 200,
            Self::BadRequest => 400,
            Self::InternalError => 500,
        }
    }

    /// Default human-readable text.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::PipeCreated => "Pipe created",
            Self::BadRequest => "Bad request",
            Self::InternalError => "Internal error",
        }
    }

    /// Looks a status up by code.
    ///
    /// # Errors
    /// Returns a parse error for unknown codes.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            200 => Ok(Self::PipeCreated),
            400 => Ok(Self::BadRequest),
            500 => Ok(Self::InternalError),
            other => Err(Error::parse(format!("unknown status code {other}"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Ordered `key: value` parameters of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, String>,
}

impl Parameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns a parameter value or a parse error naming the missing key.
    ///
    /// # Errors
    /// Returns a parse error if the key is absent.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::parse(format!("missing parameter '{key}'")))
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        for (key, value) in self.iter() {
            dst.put_slice(percent_encode(key).as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(percent_encode(value).as_bytes());
            dst.put_u8(b'\n');
        }
    }

    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut params = Self::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| Error::parse(format!("parameter line without ':': '{line}'")))?;
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(Error::parse(format!("invalid parameter key '{key}'")));
            }
            params.insert(percent_decode(key)?, percent_decode(value.trim())?);
        }
        Ok(params)
    }
}

/// A request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request command.
    pub command: Command,
    /// Request parameters.
    pub params: Parameters,
}

impl Request {
    /// Creates a `CONNECT` request accepting the given pipe type names.
    ///
    /// An empty list leaves the choice to the server.
    pub fn connect<I, S>(accept_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accept: Vec<String> = accept_types
            .into_iter()
            .map(|name| name.as_ref().to_owned())
            .collect();
        let mut params = Parameters::new();
        if !accept.is_empty() {
            params.insert(keys::ACCEPT_TYPES, accept.join(","));
        }
        Self {
            command: Command::Connect,
            params,
        }
    }

    /// Pipe type names listed in `accept-types`, in the client's order.
    #[must_use]
    pub fn accept_types(&self) -> Vec<String> {
        self.params
            .get(keys::ACCEPT_TYPES)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serializes the request.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(64);
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b' ');
        put_protocol(&mut dst);
        dst.put_u8(b'\n');
        self.params.encode_into(&mut dst);
        dst.freeze()
    }

    /// Parses a serialized request.
    ///
    /// # Errors
    /// Returns a parse error for malformed headers or parameter lines.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let text = as_text(src)?;
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::parse("empty request"))?;
        let (command, protocol) = header
            .split_once(' ')
            .ok_or_else(|| Error::parse(format!("malformed request header '{header}'")))?;
        check_protocol(protocol.trim())?;
        Ok(Self {
            command: Command::parse(command)?,
            params: Parameters::parse_lines(lines)?,
        })
    }
}

/// A response sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response status.
    pub status: Status,
    /// Human-readable text following the status code.
    pub message: String,
    /// Response parameters.
    pub params: Parameters,
}

impl Response {
    /// Creates a response with the given status and text.
    ///
    /// Line breaks in `message` are replaced by spaces.
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            status,
            message: message.replace(['\r', '\n'], " "),
            params: Parameters::new(),
        }
    }

    /// Creates a `200 PipeCreated` response.
    #[must_use]
    pub fn pipe_created(params: Parameters) -> Self {
        Self {
            params,
            ..Self::new(Status::PipeCreated, Status::PipeCreated.reason())
        }
    }

    /// Returns true for `200 PipeCreated`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::PipeCreated
    }

    /// Serializes the response.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(128);
        put_protocol(&mut dst);
        dst.put_slice(format!(" {} ", self.status.code()).as_bytes());
        dst.put_slice(self.message.as_bytes());
        dst.put_u8(b'\n');
        self.params.encode_into(&mut dst);
        dst.freeze()
    }

    /// Parses a serialized response.
    ///
    /// # Errors
    /// Returns a parse error for malformed headers, unknown status codes or
    /// malformed parameter lines.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let text = as_text(src)?;
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::parse("empty response"))?;
        let mut parts = header.splitn(3, ' ');
        check_protocol(parts.next().unwrap_or_default())?;
        let code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::parse(format!("malformed response header '{header}'")))?;
        Ok(Self {
            status: Status::from_code(code)?,
            message: parts.next().unwrap_or_default().to_owned(),
            params: Parameters::parse_lines(lines)?,
        })
    }
}

fn put_protocol(dst: &mut BytesMut) {
    dst.put_slice(PROTOCOL.as_bytes());
    dst.put_u8(b'/');
    dst.put_slice(VERSION.as_bytes());
}

fn check_protocol(token: &str) -> Result<()> {
    match token.split_once('/') {
        Some((PROTOCOL, VERSION)) => Ok(()),
        Some((PROTOCOL, version)) => Err(Error::parse(format!(
            "unsupported protocol version '{version}'"
        ))),
        _ => Err(Error::parse(format!("unknown protocol '{token}'"))),
    }
}

fn as_text(src: &[u8]) -> Result<&str> {
    std::str::from_utf8(src).map_err(|e| Error::parse(format!("message is not UTF-8: {e}")))
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b'/')
}

/// Percent-encodes every byte outside `A-Z a-z 0-9 - . _ ~ /`.
#[must_use]
pub fn percent_encode(value: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0F) as usize] as char);
        }
    }
    out
}

/// Reverses [`percent_encode`].
///
/// # Errors
/// Returns a parse error for truncated or non-hex escapes and for escapes
/// that do not decode to UTF-8.
pub fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| Error::parse(format!("invalid percent escape in '{value}'")))?;
            out.push(escape);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| Error::parse(format!("decoded value is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = Request::connect(["ChunkFilePipe", "FilePipe"]);
        let encoded = request.encode();
        assert_eq!(
            &encoded[..],
            b"CONNECT DIRPIPE/1.0\naccept-types: ChunkFilePipe%2CFilePipe\n"
        );
        assert_eq!(
            request.accept_types(),
            vec!["ChunkFilePipe".to_string(), "FilePipe".to_string()]
        );
    }

    #[test]
    fn test_request_round_trip() {
        let mut request = Request::connect(Vec::<String>::new());
        assert!(request.accept_types().is_empty());
        request.params.insert("note", "grüße: 100% ünïcødé\tok");
        request.params.insert(keys::DIRECTORY, "/tmp/with space/ä");

        let decoded = Request::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_round_trip_with_unusual_keys() {
        let mut request = Request::connect(["FilePipe"]);
        request.params.insert("a:b", "v");
        request.params.insert("a b", "w");
        request.params.insert("ключ%", "x: y");

        let encoded = request.encode();
        assert!(encoded.windows(6).any(|w| w == b"a%3Ab:"));
        let decoded = Request::decode(&encoded).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.params.get("a:b"), Some("v"));
        assert_eq!(decoded.params.get("a"), None);
        assert_eq!(decoded.params.get("a b"), Some("w"));
    }

    #[test]
    fn test_response_round_trip() {
        let mut params = Parameters::new();
        params.insert(keys::TYPE, "SharedMemoryPipe");
        params.insert(keys::ROLE, "yin");
        params.insert(keys::FILE, "/tmp/pipes/日本語.shm");
        params.insert(keys::SIZE, "4096");
        let response = Response::pipe_created(params);

        let decoded = Response::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.is_success());
        assert_eq!(decoded.params.require(keys::SIZE).unwrap(), "4096");
    }

    #[test]
    fn test_response_header_text() {
        let response = Response::new(Status::BadRequest, "parse error:\nbad header");
        let encoded = response.encode();
        assert!(encoded.starts_with(b"DIRPIPE/1.0 400 parse error: bad header\n"));

        let decoded = Response::decode(&encoded).unwrap();
        assert_eq!(decoded.status, Status::BadRequest);
        assert_eq!(decoded.message, "parse error: bad header");
    }

    #[test]
    fn test_decode_rejects_malformed_messages() {
        assert!(matches!(Request::decode(b""), Err(Error::Parse { .. })));
        assert!(matches!(Request::decode(b"CONNECT\n"), Err(Error::Parse { .. })));
        assert!(matches!(Request::decode(b"LISTEN DIRPIPE/1.0\n"), Err(Error::Parse { .. })));
        assert!(matches!(Request::decode(b"CONNECT DIRPIPE/2.0\n"), Err(Error::Parse { .. })));
        assert!(matches!(Request::decode(b"CONNECT HTTP/1.0\n"), Err(Error::Parse { .. })));
        assert!(matches!(
            Request::decode(b"CONNECT DIRPIPE/1.0\nno separator\n"),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            Request::decode(b"CONNECT DIRPIPE/1.0\ntype: %G1\n"),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(Response::decode(b"DIRPIPE/1.0 302 Moved\n"), Err(Error::Parse { .. })));
        assert!(matches!(Response::decode(b"DIRPIPE/1.0 abc\n"), Err(Error::Parse { .. })));
        assert!(matches!(Response::decode(&[0xFF, 0xFE]), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_decode_tolerates_blank_lines_and_crlf() {
        let request =
            Request::decode(b"CONNECT DIRPIPE/1.0\r\n\r\naccept-types: FilePipe\r\n").unwrap();
        assert_eq!(request.accept_types(), vec!["FilePipe".to_string()]);
    }

    #[test]
    fn test_percent_encoding() {
        assert_eq!(percent_encode("a b/c"), "a%20b/c");
        assert_eq!(percent_encode("ä"), "%C3%A4");
        assert_eq!(percent_decode("%C3%A4%3a").unwrap(), "ä:");
        assert!(percent_decode("%C3").is_err());
        assert!(percent_decode("%").is_err());
    }
}
