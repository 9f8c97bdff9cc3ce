//! Backend-normalizing rewrite of validated expressions.
//!
//! The numeric backend reads a two-argument logarithm as `log(base, value)`,
//! while user input follows the `log(value, base)` convention. Every other
//! node passes through unchanged.

use super::ast::Expr;

/// Return a rewritten copy of `expr`. The input tree is left untouched.
pub fn canonicalize(expr: &Expr) -> Expr {
    match expr {
        Expr::Call { name, args } if name == "log" && args.len() == 2 => Expr::Call {
            name: name.clone(),
            args: vec![canonicalize(&args[1]), canonicalize(&args[0])],
        },
        Expr::Call { name, args } => Expr::Call {
            name: name.clone(),
            args: args.iter().map(canonicalize).collect(),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(canonicalize(operand)),
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op: *op,
            lhs: Box::new(canonicalize(lhs)),
            rhs: Box::new(canonicalize(rhs)),
        },
        Expr::Group(inner) => Expr::Group(Box::new(canonicalize(inner))),
        Expr::Symbol(_) | Expr::Literal(_) => expr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::expr::{Vars, evaluate_expr, parse, validate};

    #[test]
    fn test_log_with_base_is_swapped() {
        let f = validate("log(8,2)").unwrap();
        assert_eq!(f.canonical_text(), "log(2,8)");
    }

    #[test]
    fn test_nested_log_is_swapped_recursively() {
        let f = validate("log(log(x, 3), y)").unwrap();
        assert_eq!(f.canonical_text(), "log(y,log(3,x))");
    }

    #[test]
    fn test_single_argument_log_unchanged() {
        let f = validate("log(x + 1)").unwrap();
        assert_eq!(f.canonical_text(), "log(x+1)");
    }

    #[test]
    fn test_rewrite_does_not_touch_source_tree() {
        let f = validate("log(8, 2)").unwrap();
        let value = evaluate_expr(f.ast(), Vars { x: 0.0, y: 0.0 }).unwrap();
        assert!((value - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_canonical_text_reparses() {
        for text in [
            "-x^2 - -y",
            "2^-1 * (x - (y - 1))",
            "20 + (x * x - 10 * cos(2 * pi * x)) + (y * y - 10 * cos(2 * pi * y))",
            "+x / 1.5e-3",
        ] {
            let f = validate(text).unwrap();
            let reparsed = parse(f.canonical_text()).unwrap();
            assert_eq!(&reparsed, f.ast(), "{text}");
        }
    }

    #[test]
    fn test_extreme_literals_stay_short() {
        let f = validate("x*1e-20 + 2.5e-7").unwrap();
        assert_eq!(f.canonical_text(), "x*1e-20+2.5e-7");

        let source = ["1e300"; 15].join("+");
        let f = validate(&source).unwrap();
        assert_eq!(f.canonical_text(), source);
        assert_eq!(&parse(f.canonical_text()).unwrap(), f.ast());

        let f = validate("123456789 * x + 0.5").unwrap();
        assert_eq!(f.canonical_text(), "123456789*x+0.5");
    }

    fn arb_expr() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            Just("x".to_string()),
            Just("y".to_string()),
            Just("pi".to_string()),
            (0u32..100).prop_map(|n| format!("{}", n as f64 / 4.0)),
            (1u32..10, -300i32..300).prop_map(|(m, e)| format!("{m}e{e}")),
            (1u32..1000, 1u32..100).prop_map(|(a, b)| format!("{a}.{b:02}e-9")),
        ];
        leaf.prop_recursive(4, 32, 3, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} + {b}")),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} - {b}")),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} * {b}")),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) / ({b} + 7)")),
                inner.clone().prop_map(|a| format!("-{a}")),
                inner.clone().prop_map(|a| format!("sin({a})")),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("max({a}, {b})")),
                inner.clone().prop_map(|a| format!("({a})^2")),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_canonical_text_evaluates_the_same(text in arb_expr()) {
            let f = validate(&text).unwrap();
            prop_assert!(f.canonical_text().len() <= text.len() + 8, "{}", f.canonical_text());
            let reparsed = validate(f.canonical_text()).unwrap();
            let vars = Vars { x: 1.0, y: 1.0 };
            let original = evaluate_expr(f.ast(), vars);
            let again = evaluate_expr(reparsed.ast(), vars);
            match (original, again) {
                (Ok(a), Ok(b)) => prop_assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0)),
                (Err(_), Err(_)) => {}
                (a, b) => prop_assert!(false, "mismatch {:?} vs {:?}", a, b),
            }
        }
    }
}
