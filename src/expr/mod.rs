//! Expression sandbox for user-supplied objective functions.
//!
//! A formula such as `x^2 + y^2` goes through three stages:
//!
//! - **Parse** (`parser`): text into an [`Expr`] tree using a general
//!   arithmetic grammar.
//! - **Validate** (`sandbox`): every node checked against a whitelist of
//!   operators, functions (with arity contracts) and symbols. Anything else
//!   rejects the whole expression.
//! - **Canonicalize** (`canonical`): `log(value, base)` rewritten to the
//!   `log(base, value)` order the backend expects, then serialized.
//!
//! The result is an [`ObjectiveFunction`], which can be evaluated locally for
//! plotting (`eval`) and whose canonical text is what gets sent to the backend.
//!
//! # Example
//!
//! ```rust
//! use optim_client::expr::{Vars, evaluate, validate};
//!
//! let f = validate("x^2 + y^2").unwrap();
//! assert_eq!(evaluate(&f, Vars { x: 2.0, y: 3.0 }), Ok(13.0));
//!
//! assert!(validate("system(x)").is_err());
//! assert_eq!(validate("log(8,2)").unwrap().canonical_text(), "log(2,8)");
//! ```

mod ast;
mod canonical;
mod eval;
mod parser;
mod sandbox;

pub use ast::{Expr, Operator};
pub use canonical::canonicalize;
pub use eval::{EvalError, SurfaceSamples, Vars, evaluate, evaluate_expr, sample_surface};
pub use parser::{MAX_DEPTH, MAX_SOURCE_LEN, ParseError, parse};
pub use sandbox::{
    ALLOWED_FUNCTIONS, Arity, CONSTANTS, ObjectiveFunction, SandboxError, VARIABLES, check,
    constant_value, function_arity, validate,
};
