use crate::utils::ensure;

/// Why a parse could not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Incomplete {
    /// Valid so far, more bytes are needed.
    Truncated,
    Invalid,
}

pub(crate) fn is_line_break(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Splits the first line off `src`.
///
/// Returns the line without its break and the number of bytes consumed,
/// break included. A break is one CR or LF, paired with the next byte when
/// that byte is the other one of the two. A CR that ends the buffer may still
/// be followed by its LF, so it leaves the line truncated.
pub(crate) fn next_line(src: &[u8]) -> Result<(&[u8], usize), Incomplete> {
    let end = src.iter().position(|byte| is_line_break(*byte)).ok_or(Incomplete::Truncated)?;

    let consumed = match src.get(end + 1) {
        Some(next) if is_line_break(*next) && *next != src[end] => end + 2,
        Some(_) => end + 1,
        None => {
            ensure!(src[end] == b'\n', Incomplete::Truncated);
            end + 1
        }
    };

    Ok((&src[..end], consumed))
}

pub(crate) fn as_str(line: &[u8]) -> Result<&str, Incomplete> {
    std::str::from_utf8(line).ok().ok_or(Incomplete::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_breaks() {
        assert_eq!(next_line(b"abc\r\ndef"), Ok((&b"abc"[..], 5)));
        assert_eq!(next_line(b"abc\n\rdef"), Ok((&b"abc"[..], 5)));
        assert_eq!(next_line(b"abc\ndef"), Ok((&b"abc"[..], 4)));
        assert_eq!(next_line(b"abc\rdef"), Ok((&b"abc"[..], 4)));
        assert_eq!(next_line(b"abc\n"), Ok((&b"abc"[..], 4)));
    }

    #[test]
    fn same_byte_twice_is_two_breaks() {
        assert_eq!(next_line(b"abc\n\n"), Ok((&b"abc"[..], 4)));
        assert_eq!(next_line(b"\n"), Ok((&b""[..], 1)));
        assert_eq!(next_line(b"abc\r\rx"), Ok((&b"abc"[..], 4)));
    }

    #[test]
    fn truncated_lines() {
        assert_eq!(next_line(b""), Err(Incomplete::Truncated));
        assert_eq!(next_line(b"abc"), Err(Incomplete::Truncated));
        assert_eq!(next_line(b"abc\r"), Err(Incomplete::Truncated));
    }

    #[test]
    fn non_utf8_is_invalid() {
        assert_eq!(as_str(b"ok"), Ok("ok"));
        assert_eq!(as_str(&[0xff, 0xfe]), Err(Incomplete::Invalid));
    }
}
