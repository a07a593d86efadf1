//! Statement parsing on top of sqlparser-rs.
//!
//! Besides the statement tree, a parse returns a [`StatementScan`] built from
//! the same token stream: the positions of bare `?` placeholders, which the
//! tree does not number, and the identifiers used as column qualifiers.

use crate::error::{Result, RoutingError};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserOptions};
use sqlparser::tokenizer::{Span, Token};
use std::collections::HashSet;

/// SQL dialects the router can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    MySql,
    Postgres,
    Generic,
    Sqlite,
}

impl SqlDialect {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mysql" => Some(SqlDialect::MySql),
            "postgres" | "postgresql" => Some(SqlDialect::Postgres),
            "generic" => Some(SqlDialect::Generic),
            "sqlite" => Some(SqlDialect::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::MySql => "mysql",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Generic => "generic",
            SqlDialect::Sqlite => "sqlite",
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
        }
    }
}

/// Default sqlparser options used by the router
pub fn parser_options() -> ParserOptions {
    ParserOptions::new().with_trailing_commas(true)
}

/// Token-level facts about a statement.
#[derive(Debug, Clone, Default)]
pub struct StatementScan {
    /// Start positions (line, column) of bare `?` placeholders, in text order
    placeholders: Vec<(u64, u64)>,
    /// Lower-cased identifiers directly followed by `.`
    qualifiers: HashSet<String>,
}

impl StatementScan {
    /// 1-based position of the bare `?` placeholder starting at `span`.
    pub fn placeholder_index(&self, span: &Span) -> Option<usize> {
        let start = (span.start.line, span.start.column);
        self.placeholders
            .iter()
            .position(|location| *location == start)
            .map(|position| position + 1)
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    /// True when `name` qualifies a column somewhere in the statement (`name.col`).
    pub fn is_qualifier(&self, name: &str) -> bool {
        self.qualifiers.contains(&name.to_lowercase())
    }
}

/// Parse exactly one SELECT, INSERT, UPDATE or DELETE statement.
pub fn parse_statement(
    sql: &str,
    dialect: SqlDialect,
    recursion_limit: usize,
) -> Result<(Statement, StatementScan)> {
    let dialect = dialect.dialect();

    let mut parser = Parser::new(dialect.as_ref())
        .with_options(parser_options())
        .with_recursion_limit(recursion_limit)
        .try_with_sql(sql)
        .map_err(|e| RoutingError::parse(sql, e.to_string()))?;
    let scan = scan_tokens(&parser);

    let mut statements = parser
        .parse_statements()
        .map_err(|e| RoutingError::parse(sql, e.to_string()))?;

    if statements.len() != 1 {
        log::warn!("Rejected sql with {} statements: {}", statements.len(), sql);
        return Err(RoutingError::parse(
            sql,
            format!("expected exactly one statement, found {}", statements.len()),
        ));
    }

    let statement = statements.remove(0);
    match &statement {
        Statement::Query(_)
        | Statement::Insert(_)
        | Statement::Update { .. }
        | Statement::Delete(_) => Ok((statement, scan)),
        _ => {
            log::warn!("Rejected unsupported statement kind: {}", sql);
            Err(RoutingError::parse(
                sql,
                "only SELECT, INSERT, UPDATE and DELETE statements can be routed",
            ))
        }
    }
}

fn scan_tokens(parser: &Parser<'_>) -> StatementScan {
    let mut scan = StatementScan::default();
    let mut idx = 0;
    loop {
        let current = parser.peek_nth_token_ref(idx);
        match &current.token {
            Token::EOF => break,
            Token::Placeholder(text) if text == "?" => {
                scan.placeholders
                    .push((current.span.start.line, current.span.start.column));
            }
            Token::Word(word) => {
                if matches!(parser.peek_nth_token_ref(idx + 1).token, Token::Period) {
                    scan.qualifiers.insert(word.value.to_lowercase());
                }
            }
            _ => {}
        }
        idx += 1;
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_names() {
        assert_eq!(SqlDialect::from_name("MySQL"), Some(SqlDialect::MySql));
        assert_eq!(SqlDialect::from_name("postgresql"), Some(SqlDialect::Postgres));
        assert_eq!(SqlDialect::from_name("oracle"), None);
        assert_eq!(SqlDialect::Sqlite.as_str(), "sqlite");
    }

    #[test]
    fn test_parse_accepts_dml() {
        for sql in [
            "SELECT * FROM orders",
            "INSERT INTO orders (uid) VALUES (1)",
            "UPDATE orders SET status = 1",
            "DELETE FROM orders WHERE uid = 1",
        ] {
            assert!(parse_statement(sql, SqlDialect::MySql, 64).is_ok(), "{}", sql);
        }
    }

    #[test]
    fn test_parse_rejects_other_statements() {
        let err = parse_statement("CREATE TABLE t (id INT)", SqlDialect::MySql, 64).unwrap_err();
        assert!(matches!(err, RoutingError::Parse { .. }));

        let err = parse_statement("SELECT 1; SELECT 2", SqlDialect::MySql, 64).unwrap_err();
        assert!(matches!(err, RoutingError::Parse { .. }));

        let err = parse_statement("SELEC * FROM", SqlDialect::MySql, 64).unwrap_err();
        assert!(matches!(err, RoutingError::Parse { .. }));
    }

    #[test]
    fn test_scan_placeholders_and_qualifiers() {
        let (_, scan) = parse_statement(
            "SELECT o.id FROM orders o WHERE o.uid = ? AND status IN (?, ?)",
            SqlDialect::MySql,
            64,
        )
        .unwrap();
        assert_eq!(scan.placeholder_count(), 3);
        assert!(scan.is_qualifier("O"));
        assert!(!scan.is_qualifier("orders"));
    }
}
