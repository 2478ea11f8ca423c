//! Expression syntax tree.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::In => "in",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// The identifier at the root of a member/index chain, if any
    pub fn root_identifier(&self) -> Option<&str> {
        match self {
            Self::Ident(name) => Some(name),
            Self::Member(target, _) | Self::Index(target, _) => target.root_identifier(),
            _ => None,
        }
    }

    /// Split a `provider.method...` chain into the call target and the
    /// remaining access re-rooted at `root`.
    ///
    /// `reaction.Counters.items[0].likes` with root `item` yields
    /// `("reaction", "Counters", item.items[0].likes)`.
    pub fn split_call_path(&self, root: &str) -> Option<(&str, &str, Expr)> {
        match self {
            Self::Member(target, field) => match target.as_ref() {
                Self::Ident(provider) => Some((provider, field, Self::Ident(root.to_string()))),
                _ => {
                    let (provider, method, rest) = target.split_call_path(root)?;
                    Some((provider, method, Self::Member(Box::new(rest), field.clone())))
                }
            },
            Self::Index(target, index) => {
                let (provider, method, rest) = target.split_call_path(root)?;
                Some((provider, method, Self::Index(Box::new(rest), index.clone())))
            }
            _ => None,
        }
    }

    /// Visit every node, parents before children
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Self::Literal(_) | Self::Ident(_) => {}
            Self::Member(target, _) => target.walk(visit),
            Self::Index(target, index) => {
                target.walk(visit);
                index.walk(visit);
            }
            Self::Array(items) => items.iter().for_each(|e| e.walk(visit)),
            Self::Object(entries) => entries.iter().for_each(|(_, e)| e.walk(visit)),
            Self::Unary(_, operand) => operand.walk(visit),
            Self::Binary(_, lhs, rhs) => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Self::Conditional(cond, then, otherwise) => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
        }
    }
}
