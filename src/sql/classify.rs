//! Classification of raw statements passed to `Querier::run`.
//!
//! Raw statements are executed verbatim; the only thing the engine needs to
//! know is whether the driver should fetch a result set.

use crate::models::Dialect;
use sqlparser::ast::Statement as Ast;
use sqlparser::dialect::{self, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Get the sqlparser dialect for the given database dialect.
pub fn parser_dialect(dialect: Dialect) -> Box<dyn dialect::Dialect> {
    match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Decide whether a raw statement yields rows.
///
/// Parsed queries, SHOW/EXPLAIN/PRAGMA-style statements and any statement with
/// a RETURNING clause yield rows. Statements sqlparser cannot parse fall back to
/// a leading-keyword check.
pub fn returns_rows(sql: &str, dialect: Dialect) -> bool {
    let parser_dialect = parser_dialect(dialect);

    if has_returning(sql, parser_dialect.as_ref()) {
        return true;
    }

    match Parser::parse_sql(parser_dialect.as_ref(), sql) {
        Ok(statements) => statements.last().is_some_and(yields_rows),
        Err(_) => leading_keyword_yields_rows(sql),
    }
}

fn yields_rows(stmt: &Ast) -> bool {
    matches!(
        stmt,
        Ast::Query(_)
            | Ast::Explain { .. }
            | Ast::ExplainTable { .. }
            | Ast::Pragma { .. }
            | Ast::ShowTables { .. }
            | Ast::ShowColumns { .. }
            | Ast::ShowDatabases { .. }
            | Ast::ShowSchemas { .. }
            | Ast::ShowCreate { .. }
            | Ast::ShowFunctions { .. }
            | Ast::ShowVariable { .. }
            | Ast::ShowVariables { .. }
            | Ast::ShowStatus { .. }
            | Ast::ShowCollation { .. }
    )
}

fn has_returning(sql: &str, dialect: &dyn dialect::Dialect) -> bool {
    match Tokenizer::new(dialect, sql).tokenize() {
        Ok(tokens) => tokens
            .iter()
            .any(|t| matches!(t, Token::Word(w) if w.keyword == Keyword::RETURNING && w.quote_style.is_none())),
        Err(_) => false,
    }
}

fn leading_keyword_yields_rows(sql: &str) -> bool {
    let first = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first.as_str(),
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "PRAGMA" | "VALUES" | "DESCRIBE" | "DESC"
            | "TABLE"
    )
}
