//! Evaluation of validated expressions and surface sampling for plotting.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use serde::Serialize;

use super::ast::{Expr, Operator};
use super::sandbox::{ObjectiveFunction, constant_value};
use crate::schema::SearchBounds;

/// Values bound to the free variables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vars {
    pub x: f64,
    pub y: f64,
}

/// Evaluation failures. A failed evaluation means "no value at this point".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("'{0}' is outside the domain of the function")]
    Domain(String),
    #[error("Result is not a finite number")]
    NonFinite,
    #[error("Unsupported node: {0}")]
    Unsupported(String),
}

/// Evaluate the original (non-rewritten) tree of `function` at `vars`.
pub fn evaluate(function: &ObjectiveFunction, vars: Vars) -> Result<f64, EvalError> {
    evaluate_expr(function.ast(), vars)
}

/// Evaluate an expression tree. The final value must be finite.
pub fn evaluate_expr(expr: &Expr, vars: Vars) -> Result<f64, EvalError> {
    let value = eval_node(expr, vars)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite)
    }
}

fn eval_node(expr: &Expr, vars: Vars) -> Result<f64, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Group(inner) => eval_node(inner, vars),
        Expr::Symbol(name) => match name.as_str() {
            "x" => Ok(vars.x),
            "y" => Ok(vars.y),
            other => constant_value(other).ok_or_else(|| EvalError::Unsupported(other.into())),
        },
        Expr::Unary { op, operand } => {
            let value = eval_node(operand, vars)?;
            match op {
                Operator::Sub => Ok(-value),
                Operator::Add => Ok(value),
                other => Err(EvalError::Unsupported(other.symbol().into())),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_node(lhs, vars)?;
            let b = eval_node(rhs, vars)?;
            match op {
                Operator::Add => Ok(a + b),
                Operator::Sub => Ok(a - b),
                Operator::Mul => Ok(a * b),
                Operator::Div => Ok(a / b),
                Operator::Pow => checked("^", a.powf(b), &[a, b]),
                other => Err(EvalError::Unsupported(other.symbol().into())),
            }
        }
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval_node(arg, vars))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values)
        }
    }
}

/// NaN produced from non-NaN inputs is a domain error.
fn checked(name: &str, result: f64, inputs: &[f64]) -> Result<f64, EvalError> {
    if result.is_nan() && !inputs.iter().any(|v| v.is_nan()) {
        Err(EvalError::Domain(name.to_string()))
    } else {
        Ok(result)
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let unary = |f: fn(f64) -> f64| match args {
        [a] => checked(name, f(*a), args),
        _ => Err(EvalError::Unsupported(name.to_string())),
    };

    match name {
        "sqrt" => unary(f64::sqrt),
        "cbrt" => unary(f64::cbrt),
        "abs" => unary(f64::abs),
        "exp" => unary(f64::exp),
        "log10" => unary(f64::log10),
        "log2" => unary(f64::log2),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "asin" => unary(f64::asin),
        "acos" => unary(f64::acos),
        "atan" => unary(f64::atan),
        "sinh" => unary(f64::sinh),
        "cosh" => unary(f64::cosh),
        "tanh" => unary(f64::tanh),
        "asinh" => unary(f64::asinh),
        "acosh" => unary(f64::acosh),
        "atanh" => unary(f64::atanh),
        "round" => unary(f64::round),
        "ceil" => unary(f64::ceil),
        "floor" => unary(f64::floor),
        "log" => match args {
            [value] => checked(name, value.ln(), args),
            [value, base] => checked(name, value.ln() / base.ln(), args),
            _ => Err(EvalError::Unsupported(name.to_string())),
        },
        "mod" => match args {
            // Result takes the sign of the divisor; mod(a, 0) is a.
            [a, b] if *b == 0.0 => Ok(*a),
            [a, b] => checked(name, a - b * (a / b).floor(), args),
            _ => Err(EvalError::Unsupported(name.to_string())),
        },
        "min" if !args.is_empty() => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" if !args.is_empty() => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "hypot" if !args.is_empty() => Ok(args.iter().map(|v| v * v).sum::<f64>().sqrt()),
        _ => Err(EvalError::Unsupported(name.to_string())),
    }
}

/// Grid of function values over a search box, for surface plots.
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceSamples {
    /// Sample coordinates along X.
    pub xs: Vec<f64>,
    /// Sample coordinates along Y.
    pub ys: Vec<f64>,
    /// `values[i][j]` is the value at `(xs[i], ys[j])`, `None` where evaluation failed.
    pub values: Vec<Vec<Option<f64>>>,
}

impl SurfaceSamples {
    /// Minimum and maximum over accepted samples.
    pub fn z_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .flatten()
            .flatten()
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Number of grid points that produced no value.
    pub fn rejected_count(&self) -> usize {
        self.values.iter().flatten().filter(|v| v.is_none()).count()
    }
}

fn linspace(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| lo + (hi - lo) * i as f64 / (count - 1) as f64)
        .collect()
}

/// Sample `function` on a `resolution x resolution` grid spanning `bounds`.
///
/// Bounds are normalized first; resolutions below 2 are raised to 2.
pub fn sample_surface(
    function: &ObjectiveFunction,
    bounds: &SearchBounds,
    resolution: usize,
) -> SurfaceSamples {
    let bounds = bounds.normalized();
    let resolution = resolution.max(2);
    let xs = linspace(bounds.lower_x, bounds.upper_x, resolution);
    let ys = linspace(bounds.lower_y, bounds.upper_y, resolution);

    let values = sample_rows(function, &xs, &ys);
    SurfaceSamples { xs, ys, values }
}

#[cfg(not(target_arch = "wasm32"))]
fn sample_rows(function: &ObjectiveFunction, xs: &[f64], ys: &[f64]) -> Vec<Vec<Option<f64>>> {
    // Rows are independent, one task per x
    xs.par_iter()
        .map(|&x| {
            ys.iter()
                .map(|&y| evaluate(function, Vars { x, y }).ok())
                .collect()
        })
        .collect()
}

#[cfg(target_arch = "wasm32")]
fn sample_rows(function: &ObjectiveFunction, xs: &[f64], ys: &[f64]) -> Vec<Vec<Option<f64>>> {
    xs.iter()
        .map(|&x| {
            ys.iter()
                .map(|&y| evaluate(function, Vars { x, y }).ok())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::validate;

    fn eval_at(text: &str, x: f64, y: f64) -> Result<f64, EvalError> {
        evaluate(&validate(text).unwrap(), Vars { x, y })
    }

    #[test]
    fn test_sum_of_squares() {
        assert_eq!(eval_at("x^2 + y^2", 2.0, 3.0), Ok(13.0));
    }

    #[test]
    fn test_unary_minus_and_power() {
        assert_eq!(eval_at("-x^2", 3.0, 0.0), Ok(-9.0));
        assert_eq!(eval_at("2^3^2", 0.0, 0.0), Ok(512.0));
    }

    #[test]
    fn test_constants() {
        let v = eval_at("pi + E", 0.0, 0.0).unwrap();
        assert!((v - (std::f64::consts::PI + std::f64::consts::E)).abs() < 1e-12);
    }

    #[test]
    fn test_domain_errors_are_rejections() {
        assert_eq!(eval_at("sqrt(x)", -1.0, 0.0), Err(EvalError::Domain("sqrt".into())));
        assert_eq!(eval_at("log(x)", 0.0, 0.0), Err(EvalError::NonFinite));
        assert_eq!(eval_at("1 / x", 0.0, 0.0), Err(EvalError::NonFinite));
        assert!(eval_at("acos(x)", 2.0, 0.0).is_err());
    }

    #[test]
    fn test_variadic_functions() {
        assert_eq!(eval_at("min(x, y, 7)", 3.0, -2.0), Ok(-2.0));
        assert_eq!(eval_at("max(x)", 3.0, 0.0), Ok(3.0));
        assert_eq!(eval_at("hypot(x, y)", 3.0, 4.0), Ok(5.0));
    }

    #[test]
    fn test_mod_follows_divisor_sign() {
        assert_eq!(eval_at("mod(x, 3)", -1.0, 0.0), Ok(2.0));
        assert_eq!(eval_at("mod(x, -3)", 1.0, 0.0), Ok(-2.0));
        assert_eq!(eval_at("mod(x, 0)", 5.0, 0.0), Ok(5.0));
    }

    #[test]
    fn test_log_with_base() {
        let v = eval_at("log(8, 2)", 0.0, 0.0).unwrap();
        assert!((v - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_surface_skips_rejected_points() {
        let f = validate("sqrt(x)").unwrap();
        let bounds = SearchBounds::new(-1.0, 1.0, 0.0, 1.0);
        let surface = sample_surface(&f, &bounds, 3);

        assert_eq!(surface.xs, vec![-1.0, 0.0, 1.0]);
        assert_eq!(surface.rejected_count(), 3);
        assert_eq!(surface.z_range(), Some((0.0, 1.0)));
    }

    #[test]
    fn test_surface_normalizes_reversed_bounds() {
        let f = validate("x + y").unwrap();
        let bounds = SearchBounds::new(1.0, -1.0, 2.0, -2.0);
        let surface = sample_surface(&f, &bounds, 1);

        assert_eq!(surface.xs, vec![-1.0, 1.0]);
        assert_eq!(surface.ys, vec![-2.0, 2.0]);
        assert_eq!(surface.z_range(), Some((-3.0, 3.0)));
    }

    #[test]
    fn test_surface_with_no_values() {
        let f = validate("log(-1 - x^2)").unwrap();
        let surface = sample_surface(&f, &SearchBounds::default(), 4);
        assert_eq!(surface.z_range(), None);
    }
}
