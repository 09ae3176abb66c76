//! Recursive-descent parser producing a [`Body`].

use super::lexer::{Tok, Token, tokenize};
use super::{Attribute, Block, Body, Expr, Item, Step};
use crate::error::HclError;

/// Parse a configuration file.
///
/// # Errors
///
/// Returns [`HclError`] with the line and column of the first syntax error.
pub fn parse(text: &str) -> Result<Body, HclError> {
    let tokens = tokenize(text)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let body = p.body(false)?;
    p.expect_eof()?;
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// Deepest nesting of blocks and expressions accepted.
const MAX_NESTING: usize = 32;

/// Binary operators by precedence, loosest first.
const BINARY_LEVELS: &[&[&str]] = &[
    &["||"],
    &["&&"],
    &["==", "!="],
    &["<", "<=", ">", ">="],
    &["+", "-"],
    &["*", "/", "%"],
];

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |t| t.line)
    }

    fn err(&self, message: impl Into<String>) -> HclError {
        let (line, column) = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or((0, 0), |t| (t.line, t.column));
        HclError {
            line,
            column,
            message: message.into(),
        }
    }

    /// Run `f` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, HclError>,
    ) -> Result<T, HclError> {
        if self.depth >= MAX_NESTING {
            return Err(self.err(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), HclError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{p}', found {}", describe(self.peek()))))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Comment(_)) {
            self.pos += 1;
        }
    }

    fn expect_eof(&mut self) -> Result<(), HclError> {
        if matches!(self.peek(), Tok::Eof) {
            Ok(())
        } else {
            Err(self.err(format!("unexpected {}", describe(self.peek()))))
        }
    }

    /// Items until `}` (nested) or end of input (top level).
    fn body(&mut self, nested: bool) -> Result<Body, HclError> {
        let mut body = Body::default();
        loop {
            match self.peek().clone() {
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Comment(text) => {
                    self.pos += 1;
                    body.items.push(Item::Comment(text));
                }
                Tok::Eof if !nested => return Ok(body),
                Tok::Punct("}") if nested => return Ok(body),
                Tok::Eof => return Err(self.err("expected '}' before end of input")),
                Tok::Ident(name) => {
                    let line = self.line();
                    self.pos += 1;
                    if self.is_punct("=") {
                        self.pos += 1;
                        let value = self.expr()?;
                        self.end_of_item()?;
                        body.items.push(Item::Attribute(Attribute { key: name, value }));
                    } else {
                        let mut block = self.block_rest(name)?;
                        block.line = line;
                        body.items.push(Item::Block(block));
                    }
                }
                other => {
                    return Err(self.err(format!(
                        "expected attribute or block, found {}",
                        describe(&other)
                    )));
                }
            }
        }
    }

    /// After an attribute or block: a trailing comment, newline, `}` or end.
    fn end_of_item(&mut self) -> Result<(), HclError> {
        if matches!(self.peek(), Tok::Comment(_)) {
            self.pos += 1;
        }
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof | Tok::Punct("}") => Ok(()),
            other => Err(self.err(format!("expected newline, found {}", describe(other)))),
        }
    }

    fn block_rest(&mut self, kind: String) -> Result<Block, HclError> {
        let mut labels = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Str(label) | Tok::Ident(label) => {
                    self.pos += 1;
                    labels.push(label);
                }
                Tok::Punct("{") => break,
                other => {
                    return Err(self.err(format!(
                        "expected block label or '{{', found {}",
                        describe(&other)
                    )));
                }
            }
        }
        self.expect_punct("{")?;
        let body = self.nested(|p| p.body(true))?;
        self.expect_punct("}")?;
        self.end_of_item()?;
        Ok(Block {
            kind,
            labels,
            body,
            line: 0,
        })
    }

    fn expr(&mut self) -> Result<Expr, HclError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, HclError> {
        let cond = self.binary(0)?;
        if self.eat_punct("?") {
            self.skip_newlines();
            let then = self.expr()?;
            self.skip_newlines();
            self.expect_punct(":")?;
            self.skip_newlines();
            let otherwise = self.expr()?;
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn binary(&mut self, level: usize) -> Result<Expr, HclError> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.unary();
        };
        let mut lhs = self.binary(level + 1)?;
        loop {
            let op = match self.peek() {
                Tok::Punct(p) if ops.contains(p) => *p,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary {
                op: op.to_owned(),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, HclError> {
        for op in ["!", "-"] {
            if self.eat_punct(op) {
                let operand = self.nested(Self::unary)?;
                return Ok(Expr::Unary {
                    op: op.to_owned(),
                    operand: Box::new(operand),
                });
            }
        }
        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn primary(&mut self) -> Result<Expr, HclError> {
        match self.advance() {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) | Tok::Heredoc(s) => Ok(Expr::String(s)),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "for" => Err(self.err("for expressions are not supported")),
                _ if self.is_punct("(") => {
                    self.pos += 1;
                    let args = self.call_args()?;
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Traversal {
                    root: name,
                    steps: Vec::new(),
                }),
            },
            Tok::Punct("(") => {
                self.skip_newlines();
                let inner = self.expr()?;
                self.skip_newlines();
                self.expect_punct(")")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Tok::Punct("[") => self.tuple(),
            Tok::Punct("{") => self.object(),
            other => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.err(format!("expected expression, found {}", describe(&other))))
            }
        }
    }

    /// Attribute, index and splat steps after a primary expression.
    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, HclError> {
        loop {
            let step = if self.is_punct(".") {
                self.pos += 1;
                match self.advance() {
                    Tok::Ident(name) => Step::Attr(name),
                    Tok::Number(n) => Step::Index(Box::new(Expr::Number(n))),
                    Tok::Punct("*") => Step::Splat,
                    other => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.err(format!(
                            "expected attribute name after '.', found {}",
                            describe(&other)
                        )));
                    }
                }
            } else if self.is_punct("[") {
                self.pos += 1;
                if self.eat_punct("*") {
                    self.expect_punct("]")?;
                    Step::Splat
                } else {
                    self.skip_newlines();
                    let index = self.expr()?;
                    self.skip_newlines();
                    self.expect_punct("]")?;
                    Step::Index(Box::new(index))
                }
            } else {
                return Ok(expr);
            };

            expr = match expr {
                Expr::Traversal { root, mut steps } => {
                    steps.push(step);
                    Expr::Traversal { root, steps }
                }
                other => {
                    return Err(self.err(format!(
                        "traversal on {} is not supported",
                        expr_name(&other)
                    )));
                }
            };
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, HclError> {
        let mut args = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punct(")") {
                return Ok(args);
            }
            args.push(self.expr()?);
            self.eat_punct("...");
            self.skip_newlines();
            if !self.eat_punct(",") {
                self.skip_newlines();
                self.expect_punct(")")?;
                return Ok(args);
            }
        }
    }

    fn tuple(&mut self) -> Result<Expr, HclError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punct("]") {
                return Ok(Expr::Tuple(items));
            }
            if matches!(self.peek(), Tok::Ident(s) if s == "for") {
                return Err(self.err("for expressions are not supported"));
            }
            items.push(self.expr()?);
            self.skip_newlines();
            if !self.eat_punct(",") {
                self.skip_newlines();
                self.expect_punct("]")?;
                return Ok(Expr::Tuple(items));
            }
        }
    }

    fn object(&mut self) -> Result<Expr, HclError> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punct("}") {
                return Ok(Expr::Object(entries));
            }
            let key = match self.advance() {
                Tok::Ident(k) if k == "for" => {
                    return Err(self.err("for expressions are not supported"));
                }
                Tok::Ident(k) | Tok::Str(k) | Tok::Number(k) => k,
                Tok::Punct("(") => {
                    let inner = self.expr()?;
                    self.expect_punct(")")?;
                    inner
                        .as_reference()
                        .or_else(|| inner.as_str().map(str::to_owned))
                        .ok_or_else(|| self.err("unsupported computed object key"))?
                }
                other => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.err(format!("expected object key, found {}", describe(&other))));
                }
            };
            if !self.eat_punct("=") {
                self.expect_punct(":")?;
            }
            self.skip_newlines();
            let value = self.expr()?;
            entries.push((key, value));

            if matches!(self.peek(), Tok::Comment(_)) {
                self.pos += 1;
            }
            if !self.eat_punct(",") && !matches!(self.peek(), Tok::Newline) {
                self.skip_newlines();
                self.expect_punct("}")?;
                return Ok(Expr::Object(entries));
            }
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(s) => format!("identifier '{s}'"),
        Tok::Number(n) => format!("number {n}"),
        Tok::Str(_) => "string".to_owned(),
        Tok::Heredoc(_) => "heredoc".to_owned(),
        Tok::Punct(p) => format!("'{p}'"),
        Tok::Comment(_) => "comment".to_owned(),
        Tok::Newline => "newline".to_owned(),
        Tok::Eof => "end of input".to_owned(),
    }
}

fn expr_name(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call { .. } => "function call",
        Expr::Paren(_) => "parenthesized expression",
        Expr::Tuple(_) => "tuple",
        Expr::Object(_) => "object",
        _ => "literal",
    }
}
