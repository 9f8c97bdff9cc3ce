//! Tokenizer and recursive-descent parser for arithmetic expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr     := additive
//! additive := term (('+' | '-') term)*
//! term     := unary (('*' | '/' | '%') unary)*
//! unary    := ('-' | '+') unary | power
//! power    := postfix ('^' unary)?        right associative
//! postfix  := primary '!'*
//! primary  := number | ident | ident '(' [expr (',' expr)*] ')' | '(' expr ')'
//! ```
//!
//! Unary minus binds looser than `^`, so `-x^2` is `-(x^2)`.

use super::ast::{Expr, Operator};

/// Upper bound on nesting depth; keeps hostile input from exhausting the stack.
pub const MAX_DEPTH: usize = 64;

/// Upper bound on accepted source length in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;

/// Parse failures. Positions are byte offsets into the source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expression is empty")]
    Empty,
    #[error("Expression is longer than {} bytes", MAX_SOURCE_LEN)]
    TooLong,
    #[error("Unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("Invalid number '{text}' at {pos}")]
    InvalidNumber { text: String, pos: usize },
    #[error("Unexpected {found} at {pos}")]
    UnexpectedToken { found: String, pos: usize },
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Expression nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(Operator),
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(v) => format!("number {v}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Op(op) => format!("operator '{}'", op.symbol()),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                // Exponent: e/E followed by optional sign and at least one digit.
                if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                    let mut look = pos + 1;
                    if look < bytes.len() && (bytes[look] == b'+' || bytes[look] == b'-') {
                        look += 1;
                    }
                    if look < bytes.len() && bytes[look].is_ascii_digit() {
                        pos = look;
                        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                            pos += 1;
                        }
                    }
                }
                let text = &source[start..pos];
                let value: f64 = text.parse().map_err(|_| ParseError::InvalidNumber {
                    text: text.to_string(),
                    pos: start,
                })?;
                if !value.is_finite() {
                    return Err(ParseError::InvalidNumber {
                        text: text.to_string(),
                        pos: start,
                    });
                }
                tokens.push((Token::Number(value), start));
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while bytes.get(pos).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
                    pos += 1;
                }
                tokens.push((Token::Ident(source[start..pos].to_string()), start));
            }
            _ => {
                let token = match c {
                    b'+' => Token::Op(Operator::Add),
                    b'-' => Token::Op(Operator::Sub),
                    b'*' => Token::Op(Operator::Mul),
                    b'/' => Token::Op(Operator::Div),
                    b'^' => Token::Op(Operator::Pow),
                    b'%' => Token::Op(Operator::Rem),
                    b'!' => Token::Op(Operator::Factorial),
                    b'(' => Token::LParen,
                    b')' => Token::RParen,
                    b',' => Token::Comma,
                    _ => {
                        let ch = source[start..].chars().next().unwrap_or('\u{fffd}');
                        return Err(ParseError::UnexpectedChar { ch, pos: start });
                    }
                };
                tokens.push((token, start));
                pos += 1;
            }
        }
    }

    Ok(tokens)
}

/// Parse `source` into an expression tree.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(ParseError::TooLong);
    }
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some((token, pos)) => Err(ParseError::UnexpectedToken {
            found: token.describe(),
            pos: *pos,
        }),
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.cursor)
    }

    fn peek_op(&self) -> Option<Operator> {
        match self.peek() {
            Some((Token::Op(op), _)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Result<(Token, usize), ParseError> {
        let item = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd)?;
        self.cursor += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let (token, pos) = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: token.describe(),
                pos,
            })
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep);
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let result = self.additive();
        self.depth -= 1;
        result
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        while let Some(op @ (Operator::Add | Operator::Sub)) = self.peek_op() {
            self.cursor += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(op @ (Operator::Mul | Operator::Div | Operator::Rem)) = self.peek_op() {
            self.cursor += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(op @ (Operator::Add | Operator::Sub)) = self.peek_op() {
            self.cursor += 1;
            self.descend()?;
            let operand = self.unary();
            self.depth -= 1;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand?),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.peek_op() == Some(Operator::Pow) {
            self.cursor += 1;
            self.descend()?;
            let exponent = self.unary();
            self.depth -= 1;
            return Ok(Expr::Binary {
                op: Operator::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent?),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.peek_op() == Some(Operator::Factorial) {
            self.cursor += 1;
            expr = Expr::Unary {
                op: Operator::Factorial,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let (token, pos) = self.next()?;
        match token {
            Token::Number(value) => Ok(Expr::Literal(value)),
            Token::Ident(name) => {
                if matches!(self.peek(), Some((Token::LParen, _))) {
                    self.cursor += 1;
                    let args = self.arguments()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Symbol(name))
                }
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Group(Box::new(inner)))
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                pos,
            }),
        }
    }

    /// Arguments after an opening parenthesis, consuming the closing one.
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some((Token::RParen, _))) {
            self.cursor += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            let (token, pos) = self.next()?;
            match token {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                other => {
                    return Err(ParseError::UnexpectedToken {
                        found: other.describe(),
                        pos,
                    });
                }
            }
        }
    }
}
