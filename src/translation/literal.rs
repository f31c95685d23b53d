use std::fmt::Write;

use super::ParamStyle;
use super::scanner::{Piece, scan};
use crate::args::Record;
use crate::types::RowValues;

/// Render a value as a SQL literal.
#[must_use]
pub fn to_sql_literal(value: &RowValues) -> String {
    match value {
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) => f.to_string(),
        RowValues::Text(s) => quote(s),
        RowValues::Bool(b) => String::from(if *b { "1" } else { "0" }),
        RowValues::Timestamp(dt) => quote(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        RowValues::Null => "NULL".to_string(),
        RowValues::JSON(value) => quote(&value.to_string()),
        RowValues::Blob(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\'');
            out
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Inline `record` into `sql` (written in `style`) as literals.
///
/// Meant for log lines and debugging; markers without a matching value are kept verbatim.
#[must_use]
pub fn interpolate(sql: &str, style: Option<ParamStyle>, record: Option<&Record>) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut position = 0usize;
    for piece in scan(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Escaped { literal } => out.push_str(literal),
            Piece::Marker { style: s, name, raw } => {
                let value = if Some(s) == style {
                    position += 1;
                    record.and_then(|record| lookup(record, s, name, position))
                } else {
                    None
                };
                match value {
                    Some(value) => out.push_str(&to_sql_literal(value)),
                    None => out.push_str(raw),
                }
            }
        }
    }
    out
}

fn lookup<'r>(
    record: &'r Record,
    style: ParamStyle,
    name: &str,
    position: usize,
) -> Option<&'r RowValues> {
    match (style, record) {
        (ParamStyle::Format | ParamStyle::QMark, Record::Positional(values)) => {
            values.get(position - 1)
        }
        (ParamStyle::Format | ParamStyle::QMark, Record::Named(map)) => {
            map.get_index(position - 1).map(|(_, v)| v)
        }
        _ => record.field(name),
    }
}
