//! Whitelist validation of parsed expressions.
//!
//! An expression is accepted only if every node is a whitelisted operator,
//! a whitelisted function called with a permitted number of arguments, a
//! known symbol, a literal, or a group around an accepted node. Acceptance is
//! all-or-nothing.

use super::ast::{Expr, Operator};
use super::canonical::canonicalize;
use super::parser::{MAX_SOURCE_LEN, ParseError, parse};

/// Number of arguments a whitelisted function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    /// Whether `count` arguments satisfy this contract.
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&count),
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Between(lo, hi) => write!(f, "{lo} or {hi}"),
        }
    }
}

/// Whitelisted functions and their arity contracts.
pub const ALLOWED_FUNCTIONS: &[(&str, Arity)] = &[
    ("sqrt", Arity::Exact(1)),
    ("cbrt", Arity::Exact(1)),
    ("abs", Arity::Exact(1)),
    ("exp", Arity::Exact(1)),
    ("log", Arity::Between(1, 2)),
    ("log10", Arity::Exact(1)),
    ("log2", Arity::Exact(1)),
    ("sin", Arity::Exact(1)),
    ("cos", Arity::Exact(1)),
    ("tan", Arity::Exact(1)),
    ("asin", Arity::Exact(1)),
    ("acos", Arity::Exact(1)),
    ("atan", Arity::Exact(1)),
    ("sinh", Arity::Exact(1)),
    ("cosh", Arity::Exact(1)),
    ("tanh", Arity::Exact(1)),
    ("asinh", Arity::Exact(1)),
    ("acosh", Arity::Exact(1)),
    ("atanh", Arity::Exact(1)),
    ("min", Arity::AtLeast(1)),
    ("max", Arity::AtLeast(1)),
    ("round", Arity::Exact(1)),
    ("ceil", Arity::Exact(1)),
    ("floor", Arity::Exact(1)),
    ("mod", Arity::Exact(2)),
    ("hypot", Arity::AtLeast(1)),
];

/// Free variables of an objective function.
pub const VARIABLES: &[&str] = &["x", "y"];

/// Named constants.
pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("PI", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("E", std::f64::consts::E),
];

/// Look up the arity contract of a whitelisted function.
pub fn function_arity(name: &str) -> Option<Arity> {
    ALLOWED_FUNCTIONS
        .iter()
        .find(|(allowed, _)| *allowed == name)
        .map(|(_, arity)| *arity)
}

/// Value of a named constant.
pub fn constant_value(name: &str) -> Option<f64> {
    CONSTANTS
        .iter()
        .find(|(constant, _)| *constant == name)
        .map(|(_, value)| *value)
}

fn is_allowed_operator(op: Operator) -> bool {
    matches!(
        op,
        Operator::Add | Operator::Sub | Operator::Mul | Operator::Div | Operator::Pow
    )
}

/// Reasons an expression is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Operator '{0}' is not allowed")]
    Operator(&'static str),
    #[error("Function '{0}' is not allowed")]
    Function(String),
    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: Arity,
        got: usize,
    },
    #[error("Unknown symbol '{0}'")]
    Symbol(String),
}

/// Check every node of `expr` against the whitelist.
pub fn check(expr: &Expr) -> Result<(), SandboxError> {
    match expr {
        Expr::Unary { op, operand } => {
            // Only prefix +/- are unary arithmetic; `!` is rejected here too.
            if !matches!(op, Operator::Add | Operator::Sub) {
                return Err(SandboxError::Operator(op.symbol()));
            }
            check(operand)
        }
        Expr::Binary { op, lhs, rhs } => {
            if !is_allowed_operator(*op) {
                return Err(SandboxError::Operator(op.symbol()));
            }
            check(lhs)?;
            check(rhs)
        }
        Expr::Call { name, args } => {
            let arity =
                function_arity(name).ok_or_else(|| SandboxError::Function(name.clone()))?;
            if !arity.accepts(args.len()) {
                return Err(SandboxError::Arity {
                    name: name.clone(),
                    expected: arity,
                    got: args.len(),
                });
            }
            args.iter().try_for_each(check)
        }
        Expr::Symbol(name) => {
            if VARIABLES.contains(&name.as_str()) || constant_value(name).is_some() {
                Ok(())
            } else {
                Err(SandboxError::Symbol(name.clone()))
            }
        }
        Expr::Literal(_) => Ok(()),
        Expr::Group(inner) => check(inner),
    }
}

/// A validated objective function of `x` and `y`.
///
/// Only [`validate`] constructs this type, so holding one proves the source
/// passed the whitelist.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveFunction {
    source_text: String,
    ast: Expr,
    canonical_text: String,
}

impl ObjectiveFunction {
    /// Text as entered by the user.
    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Validated tree of the source text.
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Backend-normalized serialization.
    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }
}

/// Parse and whitelist-check `text`.
///
/// The canonical text must itself fit the source limit so it always
/// re-parses on the backend.
pub fn validate(text: &str) -> Result<ObjectiveFunction, SandboxError> {
    let ast = parse(text)?;
    check(&ast)?;
    let canonical_text = canonicalize(&ast).to_string();
    if canonical_text.len() > MAX_SOURCE_LEN {
        return Err(ParseError::TooLong.into());
    }
    Ok(ObjectiveFunction {
        source_text: text.to_string(),
        ast,
        canonical_text,
    })
}
