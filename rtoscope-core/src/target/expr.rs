//! The small expression language kernel descriptions use to name globals.
//!
//! Grammar:
//!
//! ```text
//! expr    := '&' expr | '*' expr | postfix
//! postfix := primary ( '.' ident | '->' ident | '[' number ']' )*
//! primary := ident | number | '(' expr ')'
//! ```

use crate::error::AccessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Symbol(String),
    Literal(u64),
    AddressOf(Box<Expr>),
    Deref(Box<Expr>),
    Member(Box<Expr>, String),
    Arrow(Box<Expr>, String),
    Index(Box<Expr>, u64),
}

impl Expr {
    /// Every global the expression reads.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Symbol(name) => out.push(name),
            Self::Literal(_) => {}
            Self::AddressOf(inner)
            | Self::Deref(inner)
            | Self::Member(inner, _)
            | Self::Arrow(inner, _)
            | Self::Index(inner, _) => inner.collect_symbols(out),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(u64),
    Amp,
    Star,
    Dot,
    Arrow,
    LBracket,
    RBracket,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'&' => {
                tokens.push(Token::Amp);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            b'[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let literal = &text[start..i];
                let value = match literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => literal.parse::<u64>(),
                }
                .map_err(|_| format!("bad number `{literal}`"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token::Ident(text[start..i].to_string()));
            }
            other => return Err(format!("unexpected character `{}`", other as char)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, want: &Token) -> Result<(), String> {
        match self.bump() {
            Some(ref got) if got == want => Ok(()),
            Some(got) => Err(format!("expected {want:?}, found {got:?}")),
            None => Err(format!("expected {want:?}, found end of input")),
        }
    }

    fn ident(&mut self) -> Result<String, String> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(name),
            Some(other) => Err(format!("expected member name, found {other:?}")),
            None => Err("expected member name, found end of input".to_string()),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Amp) => {
                self.pos += 1;
                Ok(Expr::AddressOf(Box::new(self.expr()?)))
            }
            Some(Token::Star) => {
                self.pos += 1;
                Ok(Expr::Deref(Box::new(self.expr()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    expr = Expr::Member(Box::new(expr), self.ident()?);
                }
                Some(Token::Arrow) => {
                    self.pos += 1;
                    expr = Expr::Arrow(Box::new(expr), self.ident()?);
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = match self.bump() {
                        Some(Token::Number(n)) => n,
                        other => return Err(format!("expected index, found {other:?}")),
                    };
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), index);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(Expr::Symbol(name)),
            Some(Token::Number(n)) => Ok(Expr::Literal(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("empty expression".to_string()),
        }
    }
}

/// Parse an expression such as `&pxReadyTasksLists[2].xListEnd`.
pub fn parse(text: &str) -> Result<Expr, AccessError> {
    let fail = |reason: String| AccessError::Expression { expr: text.to_string(), reason };
    let tokens = tokenize(text).map_err(fail)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr().map_err(fail)?;
    if let Some(extra) = parser.peek() {
        return Err(fail(format!("trailing {extra:?}")));
    }
    Ok(expr)
}
