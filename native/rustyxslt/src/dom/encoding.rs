//! Input decoding
//!
//! Everything is parsed as UTF-8. UTF-16 input (by BOM or `<` pattern) is
//! transcoded, a UTF-8 BOM is dropped, and a declared ISO-8859-1 encoding is
//! honoured. Any other invalid byte sequence is a parse failure.

use std::borrow::Cow;

use super::parse::ParseError;

/// Detected input encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl InputEncoding {
    /// Detect encoding from byte order mark, initial bytes, or the declaration
    pub fn detect(input: &[u8]) -> Self {
        match input {
            [0xFF, 0xFE, ..] | [b'<', 0x00, ..] => InputEncoding::Utf16Le,
            [0xFE, 0xFF, ..] | [0x00, b'<', ..] => InputEncoding::Utf16Be,
            _ if declares_latin1(input) => InputEncoding::Latin1,
            _ => InputEncoding::Utf8,
        }
    }
}

/// Pull `encoding="..."` out of a leading XML declaration
fn declared_encoding(input: &[u8]) -> Option<&[u8]> {
    if !input.starts_with(b"<?xml") {
        return None;
    }
    let end = memchr::memmem::find(input, b"?>")?;
    let decl = &input[..end];
    let at = memchr::memmem::find(decl, b"encoding")?;
    let rest = &decl[at + 8..];
    let quote_at = rest.iter().position(|&b| b == b'"' || b == b'\'')?;
    let quote = rest[quote_at];
    let value = &rest[quote_at + 1..];
    let close = value.iter().position(|&b| b == quote)?;
    Some(&value[..close])
}

fn declares_latin1(input: &[u8]) -> bool {
    declared_encoding(input).is_some_and(|enc| {
        enc.eq_ignore_ascii_case(b"ISO-8859-1") || enc.eq_ignore_ascii_case(b"latin1") || enc.eq_ignore_ascii_case(b"ISO_8859-1")
    })
}

/// Decode raw input into text for the tokenizer
pub fn decode_input(input: &[u8]) -> Result<Cow<'_, str>, ParseError> {
    match InputEncoding::detect(input) {
        InputEncoding::Utf8 => {
            let bytes = input.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(input);
            std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| ParseError::new(e.valid_up_to(), format!("invalid UTF-8: {}", e)))
        }
        InputEncoding::Latin1 => Ok(Cow::Owned(input.iter().map(|&b| b as char).collect())),
        InputEncoding::Utf16Le => decode_utf16(input, [0xFF, 0xFE], u16::from_le_bytes).map(Cow::Owned),
        InputEncoding::Utf16Be => decode_utf16(input, [0xFE, 0xFF], u16::from_be_bytes).map(Cow::Owned),
    }
}

fn decode_utf16(input: &[u8], bom: [u8; 2], unit: fn([u8; 2]) -> u16) -> Result<String, ParseError> {
    let bytes = input.strip_prefix(&bom).unwrap_or(input);
    if bytes.len() % 2 != 0 {
        return Err(ParseError::new(bytes.len(), "invalid UTF-16: odd number of bytes"));
    }
    let code_units: Vec<u16> = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&code_units).map_err(|e| ParseError::new(0, format!("invalid UTF-16: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(InputEncoding::detect(b"<root/>"), InputEncoding::Utf8);
        assert_eq!(InputEncoding::detect(&[0xFF, 0xFE, b'<', 0x00]), InputEncoding::Utf16Le);
        assert_eq!(InputEncoding::detect(&[0x00, b'<', 0x00, b'r']), InputEncoding::Utf16Be);
        assert_eq!(
            InputEncoding::detect(b"<?xml version='1.0' encoding='ISO-8859-1'?><r/>"),
            InputEncoding::Latin1
        );
    }

    #[test]
    fn test_utf8_bom_is_dropped() {
        assert_eq!(decode_input(&[0xEF, 0xBB, 0xBF, b'<', b'r', b'/', b'>']).unwrap(), "<r/>");
    }

    #[test]
    fn test_utf16_le() {
        let input = [0xFF, 0xFE, b'<', 0x00, b'r', 0x00, b'/', 0x00, b'>', 0x00];
        assert_eq!(decode_input(&input).unwrap(), "<r/>");
    }

    #[test]
    fn test_latin1_declared() {
        let mut input = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>".to_vec();
        input.push(0xE9);
        input.extend_from_slice(b"</r>");
        assert!(decode_input(&input).unwrap().contains("<r>\u{e9}</r>"));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        assert!(decode_input(&[b'<', b'r', b'>', 0xFF, b'<', b'/', b'r', b'>']).is_err());
    }
}
