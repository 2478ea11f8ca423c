//! Precedence-climbing parser producing an [`Expr`] tree.
//!
//! Precedence, loosest first:
//!
//! ```text
//! ?:          (right associative)
//! ||
//! &&
//! == !=
//! < <= > >= in
//! + -
//! * / %
//! ! -         (prefix)
//! . [] ()     (postfix / primary)
//! ```

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::errors::{ExpressionError, ExpressionResult};
use super::lexer::{tokenize, Span, Token};

pub fn parse(input: &str) -> ExpressionResult<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::syntax(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let expr = parser.expression()?;
    if let Some((token, span)) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::syntax(
            span.start,
            format!("unexpected trailing token {token:?}"),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> ExpressionResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(ExpressionError::syntax(
                self.position(),
                format!("expected {expected:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn expression(&mut self) -> ExpressionResult<Expr> {
        let condition = self.binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.expression()?;
        self.expect(Token::Colon)?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn binary(&mut self, min_precedence: u8) -> ExpressionResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, precedence)) = self.peek().and_then(binary_op) {
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(precedence + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ExpressionResult<Expr> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> ExpressionResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let position = self.position();
                match self.advance() {
                    Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    other => {
                        return Err(ExpressionError::syntax(
                            position,
                            format!("expected field name after '.', found {other:?}"),
                        ))
                    }
                }
            } else if self.eat(&Token::BracketOpen) {
                let index = self.expression()?;
                self.expect(Token::BracketClose)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> ExpressionResult<Expr> {
        let position = self.position();
        let token = self
            .advance()
            .ok_or_else(|| ExpressionError::syntax(position, "unexpected end of expression"))?;

        match token {
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::String(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::ParenOpen => {
                let inner = self.expression()?;
                self.expect(Token::ParenClose)?;
                Ok(inner)
            }
            Token::BracketOpen => {
                let mut items = Vec::new();
                if !self.eat(&Token::BracketClose) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::BracketClose) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::BraceOpen => {
                let mut entries = Vec::new();
                if !self.eat(&Token::BraceClose) {
                    loop {
                        let key_position = self.position();
                        let key = match self.advance() {
                            Some(Token::String(s)) | Some(Token::Ident(s)) => s,
                            other => {
                                return Err(ExpressionError::syntax(
                                    key_position,
                                    format!("expected object key, found {other:?}"),
                                ))
                            }
                        };
                        self.expect(Token::Colon)?;
                        entries.push((key, self.expression()?));
                        if self.eat(&Token::BraceClose) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Expr::Object(entries))
            }
            other => Err(ExpressionError::syntax(
                position,
                format!("unexpected token {other:?}"),
            )),
        }
    }
}

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    let op = match token {
        Token::Or => (BinaryOp::Or, 1),
        Token::And => (BinaryOp::And, 2),
        Token::Eq => (BinaryOp::Eq, 3),
        Token::NotEq => (BinaryOp::NotEq, 3),
        Token::Less => (BinaryOp::Less, 4),
        Token::LessOrEqual => (BinaryOp::LessOrEqual, 4),
        Token::Greater => (BinaryOp::Greater, 4),
        Token::GreaterOrEqual => (BinaryOp::GreaterOrEqual, 4),
        Token::In => (BinaryOp::In, 4),
        Token::Plus => (BinaryOp::Add, 5),
        Token::Minus => (BinaryOp::Sub, 5),
        Token::Star => (BinaryOp::Mul, 6),
        Token::Slash => (BinaryOp::Div, 6),
        Token::Percent => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

/// Integral literals stay integers so they compare equal to JSON integers
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
