use std::fmt;

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};

/// One `Name: value` line of a message head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http1HeaderLine {
    name: String,
    value: String,
}

impl Http1HeaderLine {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Parses `NAME ':' [SP | HT]* VALUE`, without the line break.
    ///
    /// The colon is required and the name must not be empty.
    pub fn parse(line: &str) -> Option<Self> {
        let (name, value) = line.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, value.trim_start_matches([' ', '\t'])))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Http1HeaderLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Value of the first header called `name`, compared case-insensitively.
pub fn find_header<'a>(headers: &'a [Http1HeaderLine], name: &str) -> Option<&'a str> {
    headers.iter().find(|header| header.is(name)).map(Http1HeaderLine::value)
}

/// The declared `Content-Length`; 0 when absent or not a number.
pub fn content_length(headers: &[Http1HeaderLine]) -> usize {
    find_header(headers, CONTENT_LENGTH.as_str()).and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}

/// Whether the message declares any `Transfer-Encoding`.
pub fn has_transfer_encoding(headers: &[Http1HeaderLine]) -> bool {
    find_header(headers, TRANSFER_ENCODING.as_str()).is_some_and(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_line() {
        let header = Http1HeaderLine::parse("Content-Type: text/html").unwrap();
        assert_eq!(header.name(), "Content-Type");
        assert_eq!(header.value(), "text/html");
        assert_eq!(header.to_string(), "Content-Type: text/html");
    }

    #[test]
    fn leading_blanks_are_skipped() {
        let header = Http1HeaderLine::parse("Accept:\t  */*").unwrap();
        assert_eq!(header.value(), "*/*");

        let header = Http1HeaderLine::parse("X-Empty:").unwrap();
        assert_eq!(header.value(), "");
    }

    #[test]
    fn invalid_header_lines() {
        assert!(Http1HeaderLine::parse(": value").is_none());
        assert!(Http1HeaderLine::parse("no colon here").is_none());
    }

    #[test]
    fn content_length_lookup() {
        let headers = vec![Http1HeaderLine::new("Host", "localhost"), Http1HeaderLine::new("content-LENGTH", " 13 ")];
        assert_eq!(content_length(&headers), 13);

        assert_eq!(content_length(&[]), 0);
        assert_eq!(content_length(&[Http1HeaderLine::new("Content-Length", "thirteen")]), 0);
        assert_eq!(content_length(&[Http1HeaderLine::new("Content-Length", "99999999999999999999999")]), 0);
    }

    #[test]
    fn transfer_encoding_lookup() {
        assert!(has_transfer_encoding(&[Http1HeaderLine::new("Transfer-Encoding", "chunked")]));
        assert!(!has_transfer_encoding(&[Http1HeaderLine::new("Transfer-Encoding", " ")]));
        assert!(!has_transfer_encoding(&[Http1HeaderLine::new("Content-Length", "1")]));
    }
}
