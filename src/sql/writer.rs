//! Statement text buffer with an aligned parameter stream.

use crate::models::{Dialect, Value};

/// A generated statement: text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<Value>,
    /// Whether executing this statement yields a result set.
    pub returns_rows: bool,
}

impl Statement {
    /// A raw statement supplied by the caller.
    pub fn raw(text: impl Into<String>, params: Vec<Value>, returns_rows: bool) -> Self {
        Self {
            text: text.into(),
            params,
            returns_rows,
        }
    }
}

/// Owns the text buffer and the parameter list together, so every placeholder
/// is numbered from the parameter it binds.
#[derive(Debug)]
pub struct SqlWriter {
    dialect: Dialect,
    text: String,
    params: Vec<Value>,
}

impl SqlWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            text: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Append trusted SQL text (keywords, operators).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    /// Append a quoted identifier.
    pub fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = quote_ident(self.dialect, name);
        self.text.push_str(&quoted);
        self
    }

    /// Append a comma-separated list of quoted identifiers.
    pub fn ident_list<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
        self
    }

    /// Bind a value and append its placeholder.
    pub fn bind(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.text.push_str(&placeholder);
        self
    }

    pub fn finish(self, returns_rows: bool) -> Statement {
        Statement {
            text: self.text,
            params: self.params,
            returns_rows,
        }
    }
}

/// Quote an identifier, doubling any embedded quote character.
pub fn quote_ident(dialect: Dialect, name: &str) -> String {
    let q = dialect.quote_char();
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(q);
    for ch in name.chars() {
        if ch == q {
            quoted.push(q);
        }
        quoted.push(ch);
    }
    quoted.push(q);
    quoted
}
