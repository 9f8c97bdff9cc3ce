//! Catalog of classic test functions for global optimization.

use serde::Serialize;

use super::SearchBounds;

/// A named test function with its customary search box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BuiltinFunction {
    /// Lookup key.
    pub key: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Formula in sandbox syntax.
    pub formula: &'static str,
    /// Suggested search bounds.
    pub bounds: SearchBounds,
}

pub const BUILTIN_FUNCTIONS: &[BuiltinFunction] = &[
    BuiltinFunction {
        key: "rastrigin",
        name: "Rastrigin function",
        formula: "20 + (x * x - 10 * cos(2 * pi * x)) + (y * y - 10 * cos(2 * pi * y))",
        bounds: SearchBounds {
            lower_x: -5.12,
            upper_x: 5.12,
            lower_y: -5.12,
            upper_y: 5.12,
        },
    },
    BuiltinFunction {
        key: "rosenbrock",
        name: "Rosenbrock function",
        formula: "(1-x)^2 + 100*(y - x^2)^2",
        bounds: SearchBounds {
            lower_x: -5.0,
            upper_x: 5.0,
            lower_y: -5.0,
            upper_y: 5.0,
        },
    },
    BuiltinFunction {
        key: "schwefel",
        name: "Schwefel function",
        formula: "-x * sin(sqrt(abs(x))) - y*sin(sqrt(abs(y)))",
        bounds: SearchBounds {
            lower_x: -100.0,
            upper_x: 100.0,
            lower_y: -100.0,
            upper_y: 100.0,
        },
    },
];

/// Look up a built-in function by key.
pub fn builtin_function(key: &str) -> Option<&'static BuiltinFunction> {
    BUILTIN_FUNCTIONS.iter().find(|f| f.key == key)
}
