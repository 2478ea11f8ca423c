//! # Expression Language
//!
//! The small interpreter behind `if` conditions, `path` references and
//! provider filters. Expressions are parsed once into a tree and evaluated
//! against a JSON environment such as `{"item": .., "context": ..}`.
//!
//! ```text
//! item.id < 100 && context.limit == 50
//! item.role in ["admin", "owner"]
//! item.createdAt > time.Now - 7 * time.Day
//! item.tags[0] == 'new' ? "fresh" : "seen"
//! ```
//!
//! Reading a key that does not exist is an error, not `null`: conditions
//! that reference missing data are treated as unsatisfied by callers.

mod ast;
mod errors;
mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use errors::{ExpressionError, ExpressionResult};

/// A parsed expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> ExpressionResult<Self> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.root
    }

    /// First identifier of a path expression (`item` in `item.user.name`)
    pub fn root_identifier(&self) -> Option<&str> {
        self.root.root_identifier()
    }

    /// Split a provider path into `(provider, method, rest)`, with `rest`
    /// re-rooted at `root`. `None` unless the expression is a member chain of
    /// at least two segments.
    pub fn split_call_path(&self, root: &str) -> Option<(String, String, Expression)> {
        let (provider, method, rest) = self.root.split_call_path(root)?;
        Some((
            provider.to_string(),
            method.to_string(),
            Expression {
                source: self.source.clone(),
                root: rest,
            },
        ))
    }

    pub fn evaluate(&self, env: &Value) -> ExpressionResult<Value> {
        eval::evaluate(&self.root, env).map(|value| value.into_owned())
    }

    /// Fail if any statically addressable path is missing from `env`
    pub fn validate_identifiers(&self, env: &Value) -> ExpressionResult<()> {
        eval::validate_identifiers(&self.root, env)
    }

    /// Validate identifiers, then evaluate to a boolean
    pub fn evaluate_condition(&self, env: &Value) -> ExpressionResult<bool> {
        self.validate_identifiers(env)?;
        match self.evaluate(env)? {
            Value::Bool(result) => Ok(result),
            other => Err(ExpressionError::NotBoolean(other.to_string())),
        }
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
