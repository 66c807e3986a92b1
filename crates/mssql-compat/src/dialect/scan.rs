//! Lexical masking of SQL text.
//!
//! Rules and the binder only act on code. [`mask`] returns a copy of the
//! statement with string literals, quoted or bracketed identifiers and
//! comments blanked to spaces, so byte offsets found in the mask are valid in
//! the original.

/// Copy `sql` with every non-code region replaced by spaces of equal byte length.
pub fn mask(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    while i < bytes.len() {
        let end = match bytes[i] {
            b'\'' | b'"' => skip_quoted(bytes, i, bytes[i]),
            b'[' => skip_until(bytes, i + 1, b"]"),
            b'-' if bytes.get(i + 1) == Some(&b'-') => skip_until(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => skip_until(bytes, i + 2, b"*/"),
            _ => {
                i += 1;
                continue;
            }
        };
        out[i..end].fill(b' ');
        i = end;
    }

    // Blanked regions start and end on ASCII delimiters, so the copy stays valid UTF-8.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Index just past the closing `quote`. A doubled quote is an escape.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Index just past the first `terminator` at or after `from`, or the end of input.
fn skip_until(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    let from = from.min(bytes.len());
    bytes[from..]
        .windows(terminator.len())
        .position(|w| w == terminator)
        .map_or(bytes.len(), |p| from + p + terminator.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_length_and_code() {
        let sql = "SELECT 'a?b' AS x, [c?] FROM t WHERE y = ?";
        let masked = mask(sql);
        assert_eq!(masked.len(), sql.len());
        assert_eq!(masked.matches('?').count(), 1);
        assert!(masked.starts_with("SELECT "));
        assert!(masked.ends_with("WHERE y = ?"));
    }

    #[test]
    fn test_mask_comments() {
        let sql = "SELECT id -- why?\nFROM t /* and ? */ WHERE id = ?";
        let masked = mask(sql);
        assert_eq!(masked.matches('?').count(), 1);
        assert!(masked.contains("FROM t"));
    }

    #[test]
    fn test_unterminated_comment_runs_to_end() {
        let masked = mask("SELECT 1 /* ? ");
        assert_eq!(masked.trim_end(), "SELECT 1");
    }

    #[test]
    fn test_double_quoted_identifiers() {
        let masked = mask(r#"SELECT "odd?col", "it""s" FROM t"#);
        assert!(!masked.contains('?'));
        assert!(!masked.contains("it"));
        assert!(masked.ends_with(" FROM t"));
    }

    #[test]
    fn test_escaped_quote_and_multibyte_text() {
        let sql = "SELECT * FROM t WHERE note = 'it''s ünïcode ?' AND id = ?";
        let masked = mask(sql);
        assert_eq!(masked.len(), sql.len());
        assert_eq!(masked.find('?'), sql.rfind('?'));
    }
}
