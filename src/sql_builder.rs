//! Statement text as a list of segments.
//!
//! Caller-written text is scanned for bind markers and escapes; identifiers that were already
//! quoted and the placeholder lists produced by auto-format are not. A table named `a{b}%s` can
//! therefore be spliced in without double escaping.

use std::fmt;

use crate::error::SqlClientError;
use crate::translation::{self, ParamStyle, TargetStyle, Translated, Translator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Caller text; scanned for markers and escapes.
    Raw(String),
    /// Already-final text; copied as is.
    Verbatim(String),
    /// Auto-format slot for the `(col, ...)` column list.
    Columns,
    /// Auto-format slot for the placeholder list.
    Values,
}

/// Double every brace so `text` reads literally once parsed by [`Sql::from_template`].
#[must_use]
pub fn escape_template(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// A statement under construction.
///
/// ```rust
/// use sql_client::sql_builder::Sql;
///
/// let sql = Sql::new()
///     .raw("INSERT INTO ")
///     .verbatim("\"odd{name}\"")
///     .columns()
///     .raw(" VALUES(")
///     .values()
///     .raw(")");
/// let filled = sql.fill("(a,b)", "?,?");
/// assert_eq!(filled.to_string(), "INSERT INTO \"odd{name}\"(a,b) VALUES(?,?)");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sql {
    segments: Vec<Segment>,
}

impl Sql {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn raw(mut self, text: impl Into<String>) -> Self {
        self.push(Segment::Raw(text.into()));
        self
    }

    #[must_use]
    pub fn verbatim(mut self, text: impl Into<String>) -> Self {
        self.push(Segment::Verbatim(text.into()));
        self
    }

    #[must_use]
    pub fn columns(mut self) -> Self {
        self.push(Segment::Columns);
        self
    }

    #[must_use]
    pub fn values(mut self) -> Self {
        self.push(Segment::Values);
        self
    }

    pub fn push(&mut self, segment: Segment) {
        match (self.segments.last_mut(), segment) {
            (Some(Segment::Raw(last)), Segment::Raw(text)) => last.push_str(&text),
            (Some(Segment::Verbatim(last)), Segment::Verbatim(text)) => last.push_str(&text),
            (_, segment) => self.segments.push(segment),
        }
    }

    pub fn append(&mut self, other: Sql) {
        for segment in other.segments {
            self.push(segment);
        }
    }

    /// Parse a `{}` template: the first `{}` is the column slot, the second the values slot.
    /// `{{` and `}}` stand for literal braces.
    ///
    /// # Errors
    ///
    /// Returns `SqlClientError::ConfigError` for a third slot or an unmatched brace.
    pub fn from_template(template: &str) -> Result<Self, SqlClientError> {
        let mut sql = Sql::new();
        let mut text = String::new();
        let mut slots = 0usize;
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek()) {
                ('{', Some('{')) | ('}', Some('}')) => {
                    chars.next();
                    text.push(c);
                }
                ('{', Some('}')) => {
                    chars.next();
                    if !text.is_empty() {
                        sql.push(Segment::Raw(std::mem::take(&mut text)));
                    }
                    slots += 1;
                    match slots {
                        1 => sql.push(Segment::Columns),
                        2 => sql.push(Segment::Values),
                        _ => {
                            return Err(SqlClientError::ConfigError(
                                "auto-format templates take at most two `{}` slots".into(),
                            ));
                        }
                    }
                }
                ('{' | '}', _) => {
                    return Err(SqlClientError::ConfigError(format!(
                        "unmatched `{c}` in auto-format template; write `{c}{c}` for a literal brace"
                    )));
                }
                _ => text.push(c),
            }
        }
        if !text.is_empty() {
            sql.push(Segment::Raw(text));
        }
        Ok(sql)
    }

    /// Re-read raw segments as `{}` templates; see [`Sql::from_template`].
    ///
    /// # Errors
    ///
    /// Returns `SqlClientError::ConfigError` for more than two slots overall or an unmatched
    /// brace.
    pub fn expand_slots(&self) -> Result<Sql, SqlClientError> {
        let mut out = Sql::new();
        for segment in &self.segments {
            match segment {
                Segment::Raw(text) => out.append(Sql::from_template(text)?),
                other => out.push(other.clone()),
            }
        }
        let slots = out
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Columns | Segment::Values))
            .count();
        if slots > 2 {
            return Err(SqlClientError::ConfigError(
                "auto-format templates take at most two `{}` slots".into(),
            ));
        }
        Ok(out)
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn has_slots(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Columns | Segment::Values))
    }

    fn raw_text(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Raw(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Style of the markers in the raw segments; see [`translation::detect`].
    #[must_use]
    pub fn detect(&self, hint: Option<ParamStyle>) -> Option<ParamStyle> {
        translation::detect_in(self.raw_text(), hint)
    }

    /// Marker names of `style` in the raw segments, in order.
    #[must_use]
    pub fn placeholder_names(&self, style: ParamStyle) -> Vec<String> {
        self.raw_text()
            .flat_map(|text| translation::placeholder_names(text, style))
            .collect()
    }

    /// Replace the auto-format slots with final text.
    #[must_use]
    pub fn fill(&self, columns: &str, values: &str) -> Sql {
        let mut out = Sql::new();
        for segment in &self.segments {
            out.push(match segment {
                Segment::Columns => Segment::Verbatim(columns.to_string()),
                Segment::Values => Segment::Verbatim(values.to_string()),
                other => other.clone(),
            });
        }
        out
    }

    /// Translate raw segments from `from` to `to`; marker numbering runs across segments.
    ///
    /// Unfilled slots render as empty text.
    #[must_use]
    pub fn translate(&self, from: Option<ParamStyle>, to: TargetStyle) -> Translated {
        let mut translator = Translator::new(from, to);
        for segment in &self.segments {
            match segment {
                Segment::Raw(text) => translator.feed(text),
                Segment::Verbatim(text) => translator.push_verbatim(text),
                Segment::Columns | Segment::Values => {}
            }
        }
        translator.finish()
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Raw(text) | Segment::Verbatim(text) => f.write_str(text)?,
                Segment::Columns | Segment::Values => f.write_str("{}")?,
            }
        }
        Ok(())
    }
}

impl From<&str> for Sql {
    fn from(text: &str) -> Self {
        Sql::new().raw(text)
    }
}

impl From<String> for Sql {
    fn from(text: String) -> Self {
        Sql::new().raw(text)
    }
}

impl From<&String> for Sql {
    fn from(text: &String) -> Self {
        Sql::new().raw(text.as_str())
    }
}
