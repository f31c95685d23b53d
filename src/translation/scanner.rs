use super::ParamStyle;
use super::parsers::{
    is_block_comment_end, is_block_comment_start, is_format_marker, is_line_comment_start,
    is_word_byte, matches_tag, scan_name, scan_pyformat, try_start_dollar_quote,
};

#[derive(Clone)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// A lexical piece of SQL text as seen by the translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Piece<'a> {
    /// Anything that is not a bind marker, including literals and comments.
    Text(&'a str),
    /// A bind marker. `name` is the pyformat/named identifier or the numeric digits.
    Marker {
        style: ParamStyle,
        name: &'a str,
        raw: &'a str,
    },
    /// An escaped marker; `literal` is the token without its escape character.
    Escaped { literal: &'a str },
}

pub(super) fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start {
        None
    } else {
        std::str::from_utf8(&bytes[start..idx])
            .ok()
            .map(|digits| (idx, digits))
    }
}

struct Scanner<'a> {
    sql: &'a str,
    bytes: &'a [u8],
    pieces: Vec<Piece<'a>>,
    text_start: usize,
}

impl<'a> Scanner<'a> {
    fn flush_text(&mut self, until: usize) {
        if until > self.text_start {
            self.pieces.push(Piece::Text(&self.sql[self.text_start..until]));
        }
    }

    fn emit(&mut self, at: usize, end: usize, piece: Piece<'a>) {
        self.flush_text(at);
        self.pieces.push(piece);
        self.text_start = end;
    }

    /// Marker (or escape) starting at `idx`, as `(end, piece)`.
    fn marker_at(&self, idx: usize) -> Option<(usize, Piece<'a>)> {
        let bytes = self.bytes;
        match *bytes.get(idx)? {
            b'?' => Some((
                idx + 1,
                Piece::Marker {
                    style: ParamStyle::QMark,
                    name: "",
                    raw: &self.sql[idx..=idx],
                },
            )),
            b'%' => {
                if is_format_marker(bytes, idx) {
                    Some((
                        idx + 2,
                        Piece::Marker {
                            style: ParamStyle::Format,
                            name: "",
                            raw: &self.sql[idx..idx + 2],
                        },
                    ))
                } else {
                    scan_pyformat(bytes, idx).map(|(end, name_start, name_end)| {
                        (
                            end,
                            Piece::Marker {
                                style: ParamStyle::PyFormat,
                                name: &self.sql[name_start..name_end],
                                raw: &self.sql[idx..end],
                            },
                        )
                    })
                }
            }
            b':' => {
                let prev = idx.checked_sub(1).map(|p| bytes[p]);
                if prev.is_some_and(|p| p == b':' || is_word_byte(p)) {
                    return None;
                }
                let (end, style) = if let Some(end) = scan_name(bytes, idx + 1) {
                    (end, ParamStyle::Named)
                } else if let Some((end, _)) = scan_digits(bytes, idx + 1) {
                    (end, ParamStyle::Numeric)
                } else {
                    return None;
                };
                // maximal token followed by ':' is not a marker
                if bytes.get(end) == Some(&b':') {
                    return None;
                }
                Some((
                    end,
                    Piece::Marker {
                        style,
                        name: &self.sql[idx + 1..end],
                        raw: &self.sql[idx..end],
                    },
                ))
            }
            _ => None,
        }
    }

    /// `\<marker>` or `%<format marker>` starting at the escape character.
    fn escape_at(&self, idx: usize) -> Option<(usize, Piece<'a>)> {
        let escape = self.bytes[idx];
        let (end, piece) = self.marker_at(idx + 1)?;
        let Piece::Marker { style, raw, .. } = piece else {
            return None;
        };
        let allowed = match escape {
            b'\\' => true,
            b'%' => matches!(style, ParamStyle::Format | ParamStyle::PyFormat),
            _ => false,
        };
        allowed.then_some((end, Piece::Escaped { literal: raw }))
    }
}

/// Split SQL into text, marker and escape pieces.
///
/// Quoted strings, quoted identifiers, comments and dollar-quoted bodies are passed through as
/// text and never inspected for markers.
pub(super) fn scan(sql: &str) -> Vec<Piece<'_>> {
    let mut scanner = Scanner {
        sql,
        bytes: sql.as_bytes(),
        pieces: Vec::new(),
        text_start: 0,
    };
    let bytes = sql.as_bytes();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'`' => state = State::Backticked,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = advance;
                    }
                }
                b'\\' | b'%' => {
                    if let Some((end, piece)) = scanner.escape_at(idx) {
                        scanner.emit(idx, end, piece);
                        idx = end;
                        continue;
                    }
                    if b == b'%' {
                        if bytes.get(idx + 1) == Some(&b'%') {
                            // `%%` not followed by a marker stays literal
                            idx += 2;
                            continue;
                        }
                        if let Some((end, piece)) = scanner.marker_at(idx) {
                            scanner.emit(idx, end, piece);
                            idx = end;
                            continue;
                        }
                    }
                }
                b':' if bytes.get(idx + 1) == Some(&b':') => {
                    idx += 2;
                    continue;
                }
                b':' | b'?' => {
                    if let Some((end, piece)) = scanner.marker_at(idx) {
                        scanner.emit(idx, end, piece);
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Backticked => {
                if b == b'`' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    idx += 1;
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    let tag_len = tag.len();
                    state = State::Normal;
                    idx += tag_len + 1;
                }
            }
        }
        idx += 1;
    }

    scanner.flush_text(bytes.len());
    scanner.pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(sql: &str) -> Vec<(ParamStyle, String)> {
        scan(sql)
            .into_iter()
            .filter_map(|piece| match piece {
                Piece::Marker { style, name, .. } => Some((style, name.to_string())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn finds_each_style() {
        assert_eq!(markers("a=%s"), vec![(ParamStyle::Format, String::new())]);
        assert_eq!(markers("a=%(x)s"), vec![(ParamStyle::PyFormat, "x".into())]);
        assert_eq!(markers("a=:x"), vec![(ParamStyle::Named, "x".into())]);
        assert_eq!(markers("a=:12"), vec![(ParamStyle::Numeric, "12".into())]);
        assert_eq!(markers("a=?"), vec![(ParamStyle::QMark, String::new())]);
    }

    #[test]
    fn casts_and_time_like_text_are_not_markers() {
        assert!(markers("select x::int, a:b from t").is_empty());
        assert!(markers("select :abc: from t").is_empty());
        assert!(markers("select 12:30").is_empty());
    }

    #[test]
    fn opaque_regions_are_skipped() {
        let sql = "select '?', \"a?\", `b?` -- ?\n/* :x /* %s */ */ $q$ :y $q$ from t where a = ?";
        assert_eq!(markers(sql), vec![(ParamStyle::QMark, String::new())]);
    }

    #[test]
    fn escapes_are_recognized() {
        let pieces = scan(r"a = \? and b = %%s and c = \:name and d = %%(k)s");
        let escaped: Vec<&str> = pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Escaped { literal } => Some(*literal),
                _ => None,
            })
            .collect();
        assert_eq!(escaped, vec!["?", "%s", ":name", "%(k)s"]);
        assert!(markers(r"a = \? and b = %%s").is_empty());
    }

    #[test]
    fn double_percent_stays_text() {
        assert!(markers("select '5%%' like a %% b").is_empty());
    }

    #[test]
    fn multibyte_text_survives() {
        let pieces = scan("select 'é', ü from t where a = ?");
        let text: String = pieces
            .iter()
            .map(|p| match p {
                Piece::Text(t) => *t,
                Piece::Marker { raw, .. } => raw,
                Piece::Escaped { literal } => literal,
            })
            .collect();
        assert_eq!(text, "select 'é', ü from t where a = ?");
    }
}
