use std::fmt;

use thiserror::Error;

use crate::expr::{BinaryOp, Expr, ExprKind, Span};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::registry::FunctionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} col {}: {}", self.line, self.column, self.message)
    }
}

/// Every problem found while parsing one script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} parse errors", .errors.len())]
pub struct ParseErrors {
    pub errors: Vec<ParseError>,
}

impl ParseErrors {
    pub fn count(&self) -> usize {
        self.errors.len()
    }
}

/// Parses `source`, resolving every called function against `registry`.
///
/// Unknown function names are collected and parsing continues; a syntax
/// error stops parsing.
pub fn parse_script<H>(source: &str, registry: &FunctionRegistry<H>) -> Result<Expr, ParseErrors> {
    let tokens = tokenize(source).map_err(|error| ParseErrors {
        errors: vec![error],
    })?;

    let is_known = |name: &str| registry.contains(name);
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        errors: Vec::new(),
        is_known: &is_known,
    };

    match parser.program() {
        Ok(expr) if parser.errors.is_empty() => Ok(expr),
        Ok(_) => Err(ParseErrors {
            errors: parser.errors,
        }),
        Err(error) => {
            parser.errors.push(error);
            Err(ParseErrors {
                errors: parser.errors,
            })
        }
    }
}

const PREFIX_NOT_BP: u8 = 6;

/// Deepest nesting of parentheses, `!`, `if` and calls a script may use.
pub const MAX_NESTING_DEPTH: usize = 256;

fn infix_binding(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    match kind {
        TokenKind::Semi => Some((BinaryOp::Sequence, 1)),
        TokenKind::OrOr => Some((BinaryOp::Or, 2)),
        TokenKind::AndAnd => Some((BinaryOp::And, 3)),
        TokenKind::EqEq => Some((BinaryOp::Equal, 4)),
        TokenKind::NotEq => Some((BinaryOp::NotEqual, 4)),
        TokenKind::Plus => Some((BinaryOp::Concat, 5)),
        _ => None,
    }
}

fn starts_expression(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Str(_) | TokenKind::LParen | TokenKind::Bang | TokenKind::If
    )
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    errors: Vec<ParseError>,
    is_known: &'r dyn Fn(&str) -> bool,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, token: &Token) -> ParseError {
        ParseError {
            line: token.line,
            column: token.column,
            message: format!("syntax error, unexpected {}", token.kind.describe()),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            let found = self.peek().clone();
            Err(ParseError {
                line: found.line,
                column: found.column,
                message: format!(
                    "syntax error, unexpected {}, expecting {}",
                    found.kind.describe(),
                    kind.describe()
                ),
            })
        }
    }

    fn program(&mut self) -> Result<Expr, ParseError> {
        let expr = self.expression(0)?;
        let next = self.peek().clone();
        if next.kind != TokenKind::Eof {
            return Err(self.unexpected(&next));
        }
        Ok(expr)
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.prefix()?;

        while let Some((op, bp)) = infix_binding(&self.peek().kind) {
            if bp < min_bp {
                break;
            }
            self.advance();

            // `expr ;` with nothing after it is the expression itself.
            if op == BinaryOp::Sequence && !starts_expression(&self.peek().kind) {
                continue;
            }

            let rhs = self.expression(bp + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            let token = self.peek();
            return Err(ParseError {
                line: token.line,
                column: token.column,
                message: format!("expression nested too deeply (limit {MAX_NESTING_DEPTH})"),
            });
        }

        self.depth += 1;
        let operand = self.operand();
        self.depth -= 1;
        operand
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.kind.clone() {
            TokenKind::Str(value) => {
                if self.peek().kind == TokenKind::LParen {
                    self.call(value, token)
                } else {
                    Ok(Expr::literal(value, Span::new(token.start, token.end)))
                }
            }
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Bang => {
                let operand = self.expression(PREFIX_NOT_BP)?;
                let span = Span::new(token.start, operand.span.end);
                Ok(Expr {
                    kind: ExprKind::Not(Box::new(operand)),
                    span,
                })
            }
            TokenKind::If => {
                let condition = self.expression(0)?;
                self.expect(TokenKind::Then)?;
                let then_branch = self.expression(0)?;
                let else_branch = if self.peek().kind == TokenKind::Else {
                    self.advance();
                    Some(Box::new(self.expression(0)?))
                } else {
                    None
                };
                let endif = self.expect(TokenKind::Endif)?;
                Ok(Expr {
                    kind: ExprKind::If {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    },
                    span: Span::new(token.start, endif.end),
                })
            }
            _ => Err(self.unexpected(&token)),
        }
    }

    fn call(&mut self, name: String, name_token: Token) -> Result<Expr, ParseError> {
        if !(self.is_known)(&name) {
            self.errors.push(ParseError {
                line: name_token.line,
                column: name_token.column,
                message: format!("unknown function \"{name}\""),
            });
        }

        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.expression(0)?);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RParen)?;

        Ok(Expr::call(
            name,
            args,
            Span::new(name_token.start, close.end),
        ))
    }
}
