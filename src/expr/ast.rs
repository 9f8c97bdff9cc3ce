//! Expression tree produced by the parser.
//!
//! The parser accepts a wider grammar than the sandbox allows (extra operators,
//! arbitrary function and symbol names) so that the whitelist, not the grammar,
//! is the single place where safety is decided.

use std::fmt;

/// Arithmetic operator appearing in an [`Expr::Binary`] or [`Expr::Unary`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// `%` - parsed but not whitelisted.
    Rem,
    /// Postfix `!` - parsed but not whitelisted.
    Factorial,
}

impl Operator {
    /// Source token for this operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "^",
            Operator::Rem => "%",
            Operator::Factorial => "!",
        }
    }
}

/// Closed set of expression node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Prefix (`-x`, `+x`) or postfix (`x!`) operator applied to one operand.
    Unary { op: Operator, operand: Box<Expr> },
    /// Infix operator.
    Binary {
        op: Operator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Function call `name(args...)`.
    Call { name: String, args: Vec<Expr> },
    /// Named symbol (variable or constant).
    Symbol(String),
    /// Numeric literal.
    Literal(f64),
    /// Explicit parenthesis wrapper.
    Group(Box<Expr>),
}

/// Compact serialization. Explicit groups are kept as parentheses, so the
/// output re-parses to the same tree without inserting extra brackets.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Unary {
                op: Operator::Factorial,
                operand,
            } => write!(f, "{operand}!"),
            Expr::Unary { op, operand } => write!(f, "{}{operand}", op.symbol()),
            Expr::Binary { op, lhs, rhs } => write!(f, "{lhs}{}{rhs}", op.symbol()),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Symbol(name) => f.write_str(name),
            Expr::Literal(value) => write_literal(f, *value),
            Expr::Group(inner) => write!(f, "({inner})"),
        }
    }
}

/// Shortest of the plain and exponent forms, so `1e300` stays `1e300` and
/// `0.5` stays `0.5`. Both forms round-trip through the tokenizer.
fn write_literal(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    let plain = value.to_string();
    let exponent = format!("{value:e}");
    if exponent.len() < plain.len() {
        f.write_str(&exponent)
    } else {
        f.write_str(&plain)
    }
}
