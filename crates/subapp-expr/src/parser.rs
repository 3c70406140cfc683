//! Recursive-descent parser for binding expressions.
//!
//! Precedence, loosest first: `?:`, `||`, `&&`, equality, relational,
//! additive, multiplicative, unary, postfix (`.`, `[]`, call), primary.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Code |
//! |---------|-------|------|
//! | Blank text | `""` or whitespace only | `Empty` |
//! | Stray token | `a b`, `a +* b` | `UnexpectedToken` |
//! | Truncated input | `a +`, `f(` | `UnexpectedEnd` |
//! | Bad literal | `'abc`, `1e` | `UnterminatedString`, `InvalidNumber` |
//! | Bad placeholder | `Hello {{name` | `UnterminatedInterpolation` |
//! | Oversized input | more than [`MAX_TOKENS`] tokens | `TooLong` |
//! | Deep nesting | `((((a))))` past [`MAX_NESTING`], or a tree deeper than [`MAX_DEPTH`] | `TooDeep` |

use std::fmt;

use crate::ast::{BinaryOp, Expr, Literal, LogicalOp, UnaryOp};
use crate::lexer::{Token, TokenKind, tokenize};

pub type ParseResult<T> = Result<T, ParseError>;

/// Longest accepted expression, in tokens.
pub const MAX_TOKENS: usize = 4096;

/// Deepest accepted bracket or parenthesis nesting.
pub const MAX_NESTING: usize = 64;

/// Deepest accepted syntax tree. Evaluation recurses once per level.
pub const MAX_DEPTH: usize = 256;

/// Stable parse error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorCode {
    Empty,
    UnexpectedCharacter,
    UnexpectedToken,
    UnexpectedEnd,
    UnterminatedString,
    InvalidEscape,
    InvalidNumber,
    UnterminatedInterpolation,
    TooLong,
    TooDeep,
}

/// Malformed expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    /// The full text that failed to parse.
    pub source: String,
    /// Byte offset into `source`.
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(
        code: ParseErrorCode,
        message: impl Into<String>,
        source: impl Into<String>,
        offset: usize,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: source.into(),
            offset,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} in '{}' at offset {}",
            self.code, self.message, self.source, self.offset
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse expression text into a syntax tree.
pub fn parse_expr(source: &str) -> ParseResult<Expr> {
    if source.trim().is_empty() {
        return Err(ParseError::new(
            ParseErrorCode::Empty,
            "empty expression",
            source,
            0,
        ));
    }
    let tokens = tokenize(source)?;
    if tokens.len() > MAX_TOKENS {
        return Err(ParseError::new(
            ParseErrorCode::TooLong,
            format!("more than {MAX_TOKENS} tokens"),
            source,
            tokens[MAX_TOKENS].offset,
        ));
    }
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        nesting: 0,
    };
    let expr = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(parser.unexpected(token.clone()));
    }
    if expr.depth() > MAX_DEPTH {
        return Err(ParseError::new(
            ParseErrorCode::TooDeep,
            format!("expression nests deeper than {MAX_DEPTH} levels"),
            source,
            0,
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> ParseResult<Token> {
        let token = self.tokens.get(self.pos).cloned().ok_or_else(|| {
            ParseError::new(
                ParseErrorCode::UnexpectedEnd,
                "unexpected end of expression",
                self.source,
                self.source.len(),
            )
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> ParseResult<()> {
        let token = self.next()?;
        if matches!(token.kind, TokenKind::Op(found) if found == op) {
            Ok(())
        } else {
            Err(ParseError::new(
                ParseErrorCode::UnexpectedToken,
                format!("expected '{op}', found {}", describe(&token.kind)),
                self.source,
                token.offset,
            ))
        }
    }

    fn unexpected(&self, token: Token) -> ParseError {
        ParseError::new(
            ParseErrorCode::UnexpectedToken,
            format!("unexpected {}", describe(&token.kind)),
            self.source,
            token.offset,
        )
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        if self.nesting >= MAX_NESTING {
            let offset = self.peek().map_or(self.source.len(), |t| t.offset);
            return Err(ParseError::new(
                ParseErrorCode::TooDeep,
                format!("more than {MAX_NESTING} nested groups"),
                self.source,
                offset,
            ));
        }
        self.nesting += 1;
        let expr = self.conditional();
        self.nesting -= 1;
        expr
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let test = self.logical_or()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.logical_and()?;
        while self.eat("||") {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        symbols: &[&str],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        while let Some(symbol) = self.peek_op().filter(|op| symbols.contains(op)) {
            let offset = self.peek().map_or(0, |t| t.offset);
            self.pos += 1;
            let right = next(self)?;
            let op = BinaryOp::from_symbol(symbol).ok_or_else(|| {
                ParseError::new(
                    ParseErrorCode::UnexpectedToken,
                    format!("unknown operator '{symbol}'"),
                    self.source,
                    offset,
                )
            })?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(&["==", "!=", "===", "!=="], Self::relational)
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        self.binary_level(&["<", ">", "<=", ">="], Self::additive)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        self.binary_level(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        self.binary_level(&["*", "/", "%"], Self::unary)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let mut ops = Vec::new();
        loop {
            let op = match self.peek_op() {
                Some("!") => UnaryOp::Not,
                Some("-") => UnaryOp::Negate,
                Some("+") => UnaryOp::Plus,
                _ => break,
            };
            self.pos += 1;
            ops.push(op);
        }
        let mut expr = self.postfix()?;
        for op in ops.into_iter().rev() {
            expr = Expr::Unary {
                op,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let token = self.next()?;
                let TokenKind::Ident(property) = token.kind else {
                    return Err(self.unexpected(token));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat("(") {
                let args = self.list(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`. The opening token is
    /// already consumed. A trailing comma is accepted.
    fn list(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
            if self.eat(close) {
                return Ok(items);
            }
        }
    }

    fn object(&mut self) -> ParseResult<Expr> {
        let mut entries = Vec::new();
        if self.eat("}") {
            return Ok(Expr::Object(entries));
        }
        loop {
            let token = self.next()?;
            let (key, shorthand) = match token.kind {
                TokenKind::Ident(name) => (name.clone(), Some(name)),
                TokenKind::Str(key) => (key, None),
                TokenKind::Number(n) => (crate::value::format_number(n), None),
                kind => {
                    return Err(self.unexpected(Token {
                        kind,
                        offset: token.offset,
                    }));
                }
            };
            let value = if self.eat(":") {
                self.expression()?
            } else if let Some(name) = shorthand {
                Expr::Identifier(name)
            } else {
                self.expect(":")?;
                self.expression()?
            };
            entries.push((key, value));
            if self.eat("}") {
                return Ok(Expr::Object(entries));
            }
            self.expect(",")?;
            if self.eat("}") {
                return Ok(Expr::Object(entries));
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Literal::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::String(s))),
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Literal::Bool(true)),
                "false" => Expr::Literal(Literal::Bool(false)),
                "null" => Expr::Literal(Literal::Null),
                "undefined" => Expr::Literal(Literal::Undefined),
                _ => Expr::Identifier(name),
            }),
            TokenKind::Op("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            TokenKind::Op("[") => Ok(Expr::Array(self.list("]")?)),
            TokenKind::Op("{") => self.object(),
            kind => Err(self.unexpected(Token {
                kind,
                offset: token.offset,
            })),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {}", crate::value::format_number(*n)),
        TokenKind::Str(s) => format!("string '{s}'"),
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Op(op) => format!("'{op}'"),
    }
}
