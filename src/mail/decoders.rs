/// Decodes RFC 2047 encoded-words in a bare header value (IMAP envelope
/// fields arrive undecoded).
pub fn decode_mime_words(raw: &[u8]) -> String {
    // mailparse expects a full "Key: value" header line
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Joins non-empty lines with single spaces and cuts at `max_chars`.
pub fn normalize_snippet(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

/// Gmail snippets carry HTML character references; they go through the
/// same HTML reader as message bodies.
pub fn unescape_snippet(s: &str) -> String {
    crate::render::html::extract_text(s).replace('\u{a0}', " ")
}
