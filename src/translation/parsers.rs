pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() && bytes[idx] == b'$' {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        // `$1$` is not a tag; tags cannot start with a digit
        if tag.as_bytes().first().is_some_and(u8::is_ascii_digit) {
            return None;
        }
        Some((tag, idx))
    } else {
        None
    }
}

pub(super) fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..=end].starts_with(tag.as_bytes())
        && bytes.get(end) == Some(&b'$')
}

pub(super) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

/// `[A-Za-z_$][A-Za-z0-9_$]*` starting at `start`; returns the end offset.
pub(super) fn scan_name(bytes: &[u8], start: usize) -> Option<usize> {
    if !bytes.get(start).copied().is_some_and(is_name_start) {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && is_word_byte(bytes[idx]) {
        idx += 1;
    }
    Some(idx)
}

/// `%(name)s` starting at the `%`; returns the end offset and the name range.
pub(super) fn scan_pyformat(bytes: &[u8], start: usize) -> Option<(usize, usize, usize)> {
    if bytes.get(start) != Some(&b'%') || bytes.get(start + 1) != Some(&b'(') {
        return None;
    }
    let name_start = start + 2;
    let mut idx = name_start;
    while idx < bytes.len() && is_word_byte(bytes[idx]) {
        idx += 1;
    }
    if idx == name_start || bytes.get(idx) != Some(&b')') || bytes.get(idx + 1) != Some(&b's') {
        return None;
    }
    Some((idx + 2, name_start, idx))
}

/// `%s` starting at the `%`.
pub(super) fn is_format_marker(bytes: &[u8], start: usize) -> bool {
    bytes.get(start) == Some(&b'%') && bytes.get(start + 1) == Some(&b's')
}
