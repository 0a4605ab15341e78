//! Test expressions for rule patterns
//!
//! A small expression language evaluated against pattern bindings:
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := unary (("+" | "-") unary)*
//! unary   := ("!" | "-") unary | primary
//! primary := INT | STRING | "true" | "false" | ?var | "(" expr ")"
//! ```

use std::collections::BTreeSet;

use super::Bindings;
use crate::facts::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Lit(Value),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Var(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: &[&str] = &["==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "!"];

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            tokens.push(Token::LParen);
            chars.next();
        } else if c == ')' {
            tokens.push(Token::RParen);
            chars.next();
        } else if c == '?' {
            chars.next();
            let mut name = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !is_var_char(c) {
                    break;
                }
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(format!("empty variable name at offset {pos}"));
            }
            tokens.push(Token::Var(name));
        } else if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                digits.push(c);
                chars.next();
            }
            let n = digits
                .parse()
                .map_err(|e| format!("bad integer {digits:?}: {e}"))?;
            tokens.push(Token::Int(n));
        } else if c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, c)) => text.push(c),
                    None => return Err(format!("unterminated string at offset {pos}")),
                }
            }
            tokens.push(Token::Str(text));
        } else if c.is_ascii_alphabetic() {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                ident.push(c);
                chars.next();
            }
            tokens.push(Token::Ident(ident));
        } else {
            let rest = &input[pos..];
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character {c:?} at offset {pos}"))?;
            for _ in 0..op.len() {
                chars.next();
            }
            tokens.push(Token::Op(*op));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn binary(
        &mut self,
        ops: &[(&str, BinOp)],
        operand: fn(&mut Self) -> Result<Expr, String>,
    ) -> Result<Expr, String> {
        let mut lhs = operand(self)?;
        while let Some(op) = self.peek_op() {
            let Some(&(_, bin)) = ops.iter().find(|(sym, _)| *sym == op) else {
                break;
            };
            self.pos += 1;
            let rhs = operand(self)?;
            lhs = Expr::Binary(bin, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, String> {
        self.binary(&[("||", BinOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expr, String> {
        self.binary(&[("&&", BinOp::And)], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.sum()?;
        let op = match self.peek_op() {
            Some("==") => BinOp::Eq,
            Some("!=") => BinOp::Ne,
            Some("<") => BinOp::Lt,
            Some("<=") => BinOp::Le,
            Some(">") => BinOp::Gt,
            Some(">=") => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Expr, String> {
        self.binary(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.peek_op() {
            Some("!") => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Lit(Value::Int(n))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Token::Var(name)) => Ok(Expr::Var(name)),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                _ => Err(format!("unknown identifier {ident:?}")),
            },
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

impl Expr {
    pub(crate) fn parse(input: &str) -> Result<Self, String> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or()?;
        if parser.pos < parser.tokens.len() {
            return Err(format!(
                "unexpected trailing input {:?}",
                parser.tokens[parser.pos]
            ));
        }
        Ok(expr)
    }

    /// Variables referenced anywhere in the expression.
    pub(crate) fn variables(&self) -> BTreeSet<&str> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables<'a>(&'a self, vars: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Lit(_) => {}
            Expr::Var(name) => {
                vars.insert(name.as_str());
            }
            Expr::Not(inner) | Expr::Neg(inner) => inner.collect_variables(vars),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
        }
    }

    pub(crate) fn eval(&self, bindings: &Bindings) -> Result<Value, String> {
        match self {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Var(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| format!("variable ?{name} is not bound")),
            Expr::Not(inner) => match inner.eval(bindings)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(format!("cannot negate {}", other.type_name())),
            },
            Expr::Neg(inner) => match inner.eval(bindings)? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| "integer overflow".to_string()),
                other => Err(format!("cannot negate {}", other.type_name())),
            },
            Expr::Binary(BinOp::And, lhs, rhs) => {
                if !expect_bool(lhs.eval(bindings)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(rhs.eval(bindings)?, "&&")?))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                if expect_bool(lhs.eval(bindings)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(rhs.eval(bindings)?, "||")?))
            }
            Expr::Binary(op, lhs, rhs) => binary(*op, lhs.eval(bindings)?, rhs.eval(bindings)?),
        }
    }
}

fn expect_bool(value: Value, op: &str) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(format!("{op} expects booleans, got {}", other.type_name())),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    match (op, &lhs, &rhs) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string()),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => a
            .checked_sub(*b)
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string()),
        (BinOp::Add | BinOp::Sub, _, _) => Err(format!(
            "arithmetic on {} and {}",
            lhs.type_name(),
            rhs.type_name()
        )),
        _ if std::mem::discriminant(&lhs) != std::mem::discriminant(&rhs) => Err(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        )),
        (BinOp::Eq, _, _) => Ok(Value::Bool(lhs == rhs)),
        (BinOp::Ne, _, _) => Ok(Value::Bool(lhs != rhs)),
        (_, Value::Bool(_), _) => Err("booleans are not ordered".to_string()),
        (BinOp::Lt, _, _) => Ok(Value::Bool(lhs < rhs)),
        (BinOp::Le, _, _) => Ok(Value::Bool(lhs <= rhs)),
        (BinOp::Gt, _, _) => Ok(Value::Bool(lhs > rhs)),
        (BinOp::Ge, _, _) => Ok(Value::Bool(lhs >= rhs)),
        (BinOp::And | BinOp::Or, _, _) => Err("logical operator outside Expr::eval".to_string()),
    }
}
