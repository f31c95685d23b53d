//! Bind-parameter style detection and rewriting.
//!
//! Five conventions are understood: `%s`, `%(name)s`, `:name`, `:1` and `?`. A marker preceded by
//! `\` (or, for the `%` styles, by `%`) is an escaped literal: it is never bound and the escape
//! character is dropped from the output.

mod literal;
mod parsers;
mod scanner;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use scanner::{Piece, scan};

pub use literal::{interpolate, to_sql_literal};

/// Bind-parameter syntax convention.
///
/// Declaration order is the detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamStyle {
    /// `%(name)s`
    #[value(name = "pyformat")]
    PyFormat,
    /// `%s`
    Format,
    /// `:name`
    Named,
    /// `:1`
    Numeric,
    /// `?`
    #[value(name = "qmark")]
    QMark,
}

impl ParamStyle {
    pub const ALL: [ParamStyle; 5] = [
        ParamStyle::PyFormat,
        ParamStyle::Format,
        ParamStyle::Named,
        ParamStyle::Numeric,
        ParamStyle::QMark,
    ];

    /// Styles that bind by name (or number) rather than by position.
    #[must_use]
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            ParamStyle::PyFormat | ParamStyle::Named | ParamStyle::Numeric
        )
    }

    /// Styles that bind from a mapping.
    #[must_use]
    pub fn binds_by_name(self) -> bool {
        matches!(self, ParamStyle::PyFormat | ParamStyle::Named)
    }

    /// Styles that bind strictly by occurrence order.
    #[must_use]
    pub fn is_positional(self) -> bool {
        matches!(self, ParamStyle::Format | ParamStyle::QMark)
    }
}

/// Output style plus the marker used for numeric placeholders.
///
/// Drivers disagree on numeric markers: `:1` (Oracle), `$1` (`PostgreSQL`), `@P1` (SQL Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStyle {
    pub style: ParamStyle,
    pub numeric_prefix: &'static str,
}

impl TargetStyle {
    #[must_use]
    pub fn new(style: ParamStyle) -> Self {
        Self {
            style,
            numeric_prefix: ":",
        }
    }

    #[must_use]
    pub fn with_numeric_prefix(mut self, numeric_prefix: &'static str) -> Self {
        self.numeric_prefix = numeric_prefix;
        self
    }

    fn numbered(&self, n: &str) -> String {
        match self.style {
            ParamStyle::PyFormat => format!("%({n})s"),
            ParamStyle::Named => format!(":{n}"),
            ParamStyle::Numeric => format!("{}{n}", self.numeric_prefix),
            ParamStyle::Format => "%s".to_string(),
            ParamStyle::QMark => "?".to_string(),
        }
    }
}

impl From<ParamStyle> for TargetStyle {
    fn from(style: ParamStyle) -> Self {
        TargetStyle::new(style)
    }
}

/// Result of [`translate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub sql: String,
    /// Names (or numeric digits) of the source markers, in order of appearance.
    ///
    /// Empty for positional sources; see `marker_count`.
    pub names: Vec<String>,
    pub marker_count: usize,
    /// Declared 1-based indices, when a numeric source is rewritten to a positional style and
    /// its markers are not exactly `1..=N` in order.
    pub remap: Option<Vec<usize>>,
}

/// Infer the style a statement is written in.
///
/// `hint` is checked first; the remaining styles follow in declaration order. Returns `None`
/// when the text carries no unescaped marker.
#[must_use]
pub fn detect(sql: &str, hint: Option<ParamStyle>) -> Option<ParamStyle> {
    detect_in([sql], hint)
}

/// [`detect`] over several text fragments of one statement.
pub(crate) fn detect_in<'a>(
    fragments: impl IntoIterator<Item = &'a str>,
    hint: Option<ParamStyle>,
) -> Option<ParamStyle> {
    let mut present = [false; 5];
    for fragment in fragments {
        for piece in scan(fragment) {
            if let Piece::Marker { style, .. } = piece {
                present[style_index(style)] = true;
            }
        }
    }
    if let Some(hint) = hint
        && present[style_index(hint)]
    {
        return Some(hint);
    }
    ParamStyle::ALL
        .into_iter()
        .find(|style| present[style_index(*style)])
}

/// Names (or numeric digits) of the markers of `style`, in order of appearance.
#[must_use]
pub fn placeholder_names(sql: &str, style: ParamStyle) -> Vec<String> {
    scan(sql)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Marker { style: s, name, .. } if s == style => Some(name.to_string()),
            _ => None,
        })
        .collect()
}

/// Rewrite `sql` from `from` markers into `to` markers and drop escape characters.
///
/// With `from == None` only escapes are stripped. Markers of styles other than `from` are left
/// as written.
///
/// ```rust
/// use sql_client::translation::{ParamStyle, TargetStyle, translate};
///
/// let out = translate("select * from t where a = %s and b = %s", Some(ParamStyle::Format),
///     TargetStyle::new(ParamStyle::Numeric).with_numeric_prefix("$"));
/// assert_eq!(out.sql, "select * from t where a = $1 and b = $2");
/// ```
#[must_use]
pub fn translate(sql: &str, from: Option<ParamStyle>, to: impl Into<TargetStyle>) -> Translated {
    let mut translator = Translator::new(from, to.into());
    translator.feed(sql);
    translator.finish()
}

/// Incremental translation over the fragments of one statement.
///
/// Marker numbering continues across fragments; verbatim fragments are copied untouched.
pub(crate) struct Translator {
    from: Option<ParamStyle>,
    to: TargetStyle,
    renumber: bool,
    out: String,
    names: Vec<String>,
    marker_count: usize,
}

impl Translator {
    pub(crate) fn new(from: Option<ParamStyle>, to: TargetStyle) -> Self {
        // numeric output and name-based output from a positional source renumber markers
        let renumber = from.is_some_and(|from| {
            from != to.style
                && (to.style == ParamStyle::Numeric
                    || (to.style.binds_by_name() && from.is_positional()))
        });
        Self {
            from,
            to,
            renumber,
            out: String::new(),
            names: Vec::new(),
            marker_count: 0,
        }
    }

    pub(crate) fn feed(&mut self, sql: &str) {
        self.out.reserve(sql.len() + 8);
        for piece in scan(sql) {
            match piece {
                Piece::Text(text) => self.out.push_str(text),
                Piece::Escaped { literal } => self.out.push_str(literal),
                Piece::Marker { style, name, raw } => self.marker(style, name, raw),
            }
        }
    }

    pub(crate) fn push_verbatim(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn marker(&mut self, style: ParamStyle, name: &str, raw: &str) {
        if Some(style) != self.from {
            self.out.push_str(raw);
            return;
        }
        self.marker_count += 1;
        if style.is_keyed() {
            self.names.push(name.to_string());
        }
        if self.renumber {
            let n = self.marker_count.to_string();
            self.out.push_str(&self.to.numbered(&n));
        } else if style == self.to.style && style != ParamStyle::Numeric {
            self.out.push_str(raw);
        } else {
            self.out.push_str(&self.to.numbered(name));
        }
    }

    pub(crate) fn finish(self) -> Translated {
        let remap = (self.from == Some(ParamStyle::Numeric) && self.to.style.is_positional())
            .then(|| numeric_remap(&self.names))
            .flatten();
        Translated {
            sql: self.out,
            names: self.names,
            marker_count: self.marker_count,
            remap,
        }
    }
}

/// Declared numeric indices when they are anything other than `1..=N` in order.
pub(crate) fn numeric_remap(names: &[String]) -> Option<Vec<usize>> {
    let nums: Vec<usize> = names.iter().filter_map(|n| n.parse().ok()).collect();
    let in_order = nums.iter().enumerate().all(|(i, n)| *n == i + 1);
    (!in_order).then_some(nums)
}

/// Placeholder tokens for `fields` in `target` style, one per field.
///
/// Positional styles only use the field count.
#[must_use]
pub fn render<S: AsRef<str>>(fields: &[S], target: impl Into<TargetStyle>) -> Vec<String> {
    let target = target.into();
    fields
        .iter()
        .enumerate()
        .map(|(i, field)| match target.style {
            ParamStyle::Numeric => target.numbered(&(i + 1).to_string()),
            _ => target.numbered(field.as_ref()),
        })
        .collect()
}

/// Placeholder tokens for `count` anonymous values.
#[must_use]
pub fn render_count(count: usize, target: impl Into<TargetStyle>) -> Vec<String> {
    let names: Vec<String> = (1..=count).map(|n| n.to_string()).collect();
    render(&names, target)
}

fn style_index(style: ParamStyle) -> usize {
    match style {
        ParamStyle::PyFormat => 0,
        ParamStyle::Format => 1,
        ParamStyle::Named => 2,
        ParamStyle::Numeric => 3,
        ParamStyle::QMark => 4,
    }
}
