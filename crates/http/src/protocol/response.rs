use std::fmt;

use bytes::{Bytes, BytesMut};
use http::StatusCode;

use crate::protocol::Http1HeaderLine;
use crate::protocol::request::encode_head;

/// `VERSION SP CODE SP DESCRIPTION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http1ResponseLine {
    version: String,
    code: u32,
    description: String,
}

impl Http1ResponseLine {
    pub fn new(version: impl Into<String>, code: u32, description: impl Into<String>) -> Self {
        Self { version: version.into(), code, description: description.into() }
    }

    /// Parses a status line without its line break.
    ///
    /// The code is read digit by digit and must be followed by blanks and a
    /// description that is not empty once trimmed.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_start();
        let (version, rest) = line.split_once(|c: char| c.is_ascii_whitespace())?;
        let rest = rest.trim_start();

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let code = rest[..digits]
            .bytes()
            .try_fold(0u32, |code, digit| code.checked_mul(10)?.checked_add(u32::from(digit - b'0')))?;

        let tail = &rest[digits..];
        if !tail.starts_with(|c: char| c.is_ascii_whitespace()) {
            return None;
        }
        let description = tail.trim();
        if description.is_empty() {
            return None;
        }

        Some(Self::new(version, code, description))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The code as an [`http::StatusCode`], when it is in range.
    pub fn status(&self) -> Option<StatusCode> {
        u16::try_from(self.code).ok().and_then(|code| StatusCode::from_u16(code).ok())
    }
}

impl fmt::Display for Http1ResponseLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.code, self.description)
    }
}

/// A status line and its headers, without the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http1Response {
    line: Http1ResponseLine,
    headers: Vec<Http1HeaderLine>,
}

impl Http1Response {
    pub fn new(line: Http1ResponseLine, headers: Vec<Http1HeaderLine>) -> Self {
        Self { line, headers }
    }

    pub fn line(&self) -> &Http1ResponseLine {
        &self.line
    }

    pub fn headers(&self) -> &[Http1HeaderLine] {
        &self.headers
    }

    pub fn into_parts(self) -> (Http1ResponseLine, Vec<Http1HeaderLine>) {
        (self.line, self.headers)
    }

    /// Appends `line CRLF (header CRLF)* CRLF` to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_head(&self.line, &self.headers, dst);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

impl fmt::Display for Http1Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.line)?;
        for header in &self.headers {
            write!(f, "{header}\r\n")?;
        }
        f.write_str("\r\n")
    }
}
