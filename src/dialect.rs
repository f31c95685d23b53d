//! Per-database SQL conventions: bind style, identifier quoting, save statement, row limits and
//! row locks.

use crate::sql_builder::Sql;
use crate::translation::{ParamStyle, TargetStyle};
use crate::types::DatabaseType;

/// How a dialect caps the number of selected rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `... LIMIT n`
    Limit,
    /// `SELECT TOP n ...`
    Top,
    /// `... FETCH FIRST n ROWS ONLY`
    FetchFirst,
}

/// How a dialect takes row locks for a claim select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStyle {
    /// Trailing `FOR UPDATE`.
    ForUpdate,
    /// `WITH (UPDLOCK, ROWLOCK)` table hint.
    TableHint,
    /// No row locks; the transaction's `BEGIN` takes the write lock instead.
    BeginImmediate,
}

/// How a dialect invokes a stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// `CALL name(...)`
    Call,
    /// `SELECT * FROM name(...)`, for set-returning functions.
    SelectFrom,
    /// `EXEC name ...`
    Exec,
    /// `BEGIN name(...); END;`
    Block,
    /// No stored procedures.
    Unsupported,
}

/// SQL conventions of one database.
///
/// ```rust
/// use sql_client::dialect::Dialect;
/// use sql_client::translation::ParamStyle;
///
/// let pg = Dialect::postgres();
/// assert_eq!(pg.paramstyle, ParamStyle::Numeric);
/// assert_eq!(pg.quote_identifier("order"), "\"order\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub db_type: DatabaseType,
    /// Bind style the driver expects.
    pub paramstyle: ParamStyle,
    /// Marker written before numeric placeholders (`:`, `$`, `@P`).
    pub numeric_prefix: &'static str,
    /// Identifier template; `{}` is replaced by the identifier.
    pub escape_formatter: String,
    /// Statement that opens `save_data`, e.g. `INSERT INTO`.
    pub statement_save_data: String,
    /// Statement that opens an explicit transaction.
    pub begin_sql: &'static str,
    pub limit_style: LimitStyle,
    pub lock_style: LockStyle,
    pub call_style: CallStyle,
}

impl Dialect {
    #[must_use]
    pub fn for_type(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::Sqlite => Self::sqlite(),
            DatabaseType::Postgres => Self::postgres(),
            DatabaseType::Mssql => Self::mssql(),
            DatabaseType::Mysql => Self::mysql(),
            DatabaseType::Oracle => Self::oracle(),
        }
    }

    #[must_use]
    pub fn sqlite() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            paramstyle: ParamStyle::QMark,
            numeric_prefix: "?",
            escape_formatter: "\"{}\"".to_string(),
            statement_save_data: "INSERT INTO".to_string(),
            begin_sql: "BEGIN IMMEDIATE",
            limit_style: LimitStyle::Limit,
            lock_style: LockStyle::BeginImmediate,
            call_style: CallStyle::Unsupported,
        }
    }

    #[must_use]
    pub fn postgres() -> Self {
        Self {
            db_type: DatabaseType::Postgres,
            paramstyle: ParamStyle::Numeric,
            numeric_prefix: "$",
            escape_formatter: "\"{}\"".to_string(),
            statement_save_data: "INSERT INTO".to_string(),
            begin_sql: "BEGIN",
            limit_style: LimitStyle::Limit,
            lock_style: LockStyle::ForUpdate,
            call_style: CallStyle::SelectFrom,
        }
    }

    #[must_use]
    pub fn mssql() -> Self {
        Self {
            db_type: DatabaseType::Mssql,
            paramstyle: ParamStyle::Numeric,
            numeric_prefix: "@P",
            escape_formatter: "[{}]".to_string(),
            statement_save_data: "INSERT".to_string(),
            begin_sql: "BEGIN TRANSACTION",
            limit_style: LimitStyle::Top,
            lock_style: LockStyle::TableHint,
            call_style: CallStyle::Exec,
        }
    }

    #[must_use]
    pub fn mysql() -> Self {
        Self {
            db_type: DatabaseType::Mysql,
            paramstyle: ParamStyle::Format,
            numeric_prefix: ":",
            escape_formatter: "`{}`".to_string(),
            statement_save_data: "INSERT INTO".to_string(),
            begin_sql: "BEGIN",
            limit_style: LimitStyle::Limit,
            lock_style: LockStyle::ForUpdate,
            call_style: CallStyle::Call,
        }
    }

    #[must_use]
    pub fn oracle() -> Self {
        Self {
            db_type: DatabaseType::Oracle,
            paramstyle: ParamStyle::Named,
            numeric_prefix: ":",
            escape_formatter: "\"{}\"".to_string(),
            statement_save_data: "INSERT INTO".to_string(),
            begin_sql: "SET TRANSACTION READ WRITE",
            limit_style: LimitStyle::FetchFirst,
            lock_style: LockStyle::ForUpdate,
            call_style: CallStyle::Block,
        }
    }

    #[must_use]
    pub fn with_paramstyle(mut self, paramstyle: ParamStyle) -> Self {
        self.paramstyle = paramstyle;
        self
    }

    #[must_use]
    pub fn with_escape_formatter(mut self, escape_formatter: impl Into<String>) -> Self {
        self.escape_formatter = escape_formatter.into();
        self
    }

    #[must_use]
    pub fn with_statement_save_data(mut self, statement: impl Into<String>) -> Self {
        self.statement_save_data = statement.into();
        self
    }

    /// The bind style this dialect's driver accepts, with its numeric marker.
    #[must_use]
    pub fn target_style(&self) -> TargetStyle {
        self.style(self.paramstyle)
    }

    /// `style` rendered with this dialect's numeric marker.
    #[must_use]
    pub fn style(&self, style: ParamStyle) -> TargetStyle {
        TargetStyle::new(style).with_numeric_prefix(self.numeric_prefix)
    }

    /// Apply the escape formatter to one identifier.
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        if self.escape_formatter.contains("{}") {
            self.escape_formatter.replacen("{}", name, 1)
        } else {
            name.to_string()
        }
    }

    /// `SELECT` prefix for a row-capped select (`TOP n` dialects only).
    #[must_use]
    pub fn limit_prefix(&self, limit: Option<u64>) -> String {
        match (self.limit_style, limit) {
            (LimitStyle::Top, Some(n)) => format!("TOP {n} "),
            _ => String::new(),
        }
    }

    /// Trailing row cap.
    #[must_use]
    pub fn limit_suffix(&self, limit: Option<u64>) -> String {
        match (self.limit_style, limit) {
            (LimitStyle::Limit, Some(n)) => format!(" LIMIT {n}"),
            (LimitStyle::FetchFirst, Some(n)) => format!(" FETCH FIRST {n} ROWS ONLY"),
            _ => String::new(),
        }
    }

    /// Table hint placed right after the table name.
    #[must_use]
    pub fn lock_hint(&self, lock: bool) -> &'static str {
        if lock && self.lock_style == LockStyle::TableHint {
            " WITH (UPDLOCK, ROWLOCK)"
        } else {
            ""
        }
    }

    /// Trailing lock clause.
    #[must_use]
    pub fn lock_suffix(&self, lock: bool) -> &'static str {
        if lock && self.lock_style == LockStyle::ForUpdate {
            " FOR UPDATE"
        } else {
            ""
        }
    }
}

impl Dialect {
    /// Statement calling procedure `name` with `arity` positional `%s` markers; `None` when the
    /// database has no stored procedures.
    #[must_use]
    pub fn call_statement(&self, name: &str, arity: usize) -> Option<Sql> {
        let markers = vec!["%s"; arity].join(", ");
        let sql = match self.call_style {
            CallStyle::Call => Sql::new().raw("CALL ").verbatim(name).raw(format!("({markers})")),
            CallStyle::SelectFrom => Sql::new()
                .raw("SELECT * FROM ")
                .verbatim(name)
                .raw(format!("({markers})")),
            CallStyle::Exec if arity == 0 => Sql::new().raw("EXEC ").verbatim(name),
            CallStyle::Exec => Sql::new().raw("EXEC ").verbatim(name).raw(format!(" {markers}")),
            CallStyle::Block => Sql::new()
                .raw("BEGIN ")
                .verbatim(name)
                .raw(format!("({markers}); END;")),
            CallStyle::Unsupported => return None,
        };
        Some(sql)
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::sqlite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_follow_driver_conventions() {
        assert_eq!(Dialect::sqlite().paramstyle, ParamStyle::QMark);
        assert_eq!(Dialect::mysql().quote_identifier("a"), "`a`");
        assert_eq!(Dialect::mssql().quote_identifier("a"), "[a]");
        assert_eq!(Dialect::mssql().statement_save_data, "INSERT");
        assert_eq!(Dialect::postgres().target_style().numeric_prefix, "$");
    }

    #[test]
    fn limits_and_locks_render_per_dialect() {
        let ms = Dialect::mssql();
        assert_eq!(ms.limit_prefix(Some(2)), "TOP 2 ");
        assert_eq!(ms.limit_suffix(Some(2)), "");
        assert_eq!(ms.lock_hint(true), " WITH (UPDLOCK, ROWLOCK)");

        let pg = Dialect::postgres();
        assert_eq!(pg.limit_suffix(Some(5)), " LIMIT 5");
        assert_eq!(pg.lock_suffix(true), " FOR UPDATE");
        assert_eq!(pg.lock_suffix(false), "");

        let lite = Dialect::sqlite();
        assert_eq!(lite.lock_suffix(true), "");
        assert_eq!(lite.begin_sql, "BEGIN IMMEDIATE");
        assert_eq!(Dialect::oracle().limit_suffix(Some(1)), " FETCH FIRST 1 ROWS ONLY");
    }

    #[test]
    fn procedure_calls_per_dialect() {
        let call = |d: Dialect, n| d.call_statement("p", n).map(|sql| sql.to_string());
        assert_eq!(call(Dialect::postgres(), 2).as_deref(), Some("SELECT * FROM p(%s, %s)"));
        assert_eq!(call(Dialect::mssql(), 1).as_deref(), Some("EXEC p %s"));
        assert_eq!(call(Dialect::mssql(), 0).as_deref(), Some("EXEC p"));
        assert_eq!(call(Dialect::mysql(), 0).as_deref(), Some("CALL p()"));
        assert_eq!(call(Dialect::oracle(), 1).as_deref(), Some("BEGIN p(%s); END;"));
        assert_eq!(call(Dialect::sqlite(), 1), None);
    }

    #[test]
    fn custom_formatter_without_slot_leaves_names_bare() {
        let d = Dialect::postgres().with_escape_formatter("");
        assert_eq!(d.quote_identifier("x"), "x");
    }
}
