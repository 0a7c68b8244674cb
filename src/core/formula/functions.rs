//! Built-in functions: SUM, AVG, MIN, MAX and EXTERNAL_REF

use std::cmp::Ordering;

use super::evaluator::{evaluate, CellResolver};
use super::math;
use super::parser::{parse_value, Expr, Literal, EXTERNAL_REF};
use super::tokenizer::Operator;
use crate::error::{EvalError, EvalResult};

/// Dispatch a call by case-folded name
pub(super) async fn call<R>(name: &str, args: &[Expr], resolver: &mut R) -> EvalResult<Literal>
where
    R: CellResolver + ?Sized,
{
    let upper_name = name.to_uppercase();

    if upper_name == EXTERNAL_REF {
        return external_ref(args, resolver).await;
    }

    let aggregate: fn(&[Literal]) -> Result<Literal, EvalError> = match upper_name.as_str() {
        "SUM" => sum,
        "AVG" => avg,
        "MIN" => min,
        "MAX" => max,
        _ => return Err(EvalError::UnknownFunction(name.to_string()).into()),
    };

    if args.is_empty() {
        return Err(
            EvalError::InvalidCall(format!("{} expects at least one argument", upper_name)).into(),
        );
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(evaluate(arg, &mut *resolver).await?);
    }

    Ok(aggregate(&values)?)
}

/// Left fold with the binary-add promotion rule
fn sum(values: &[Literal]) -> Result<Literal, EvalError> {
    let (first, rest) = values
        .split_first()
        .ok_or_else(|| EvalError::InvalidCall("SUM of nothing".to_string()))?;

    rest.iter()
        .try_fold(first.clone(), |acc, value| math::apply(Operator::Add, &acc, value))
}

/// SUM divided by the argument count; division promotes like `/` does
fn avg(values: &[Literal]) -> Result<Literal, EvalError> {
    let total = sum(values)?;
    let count = Literal::int(values.len().to_string());
    math::apply(Operator::Div, &total, &count)
}

fn min(values: &[Literal]) -> Result<Literal, EvalError> {
    pick(values, Ordering::Less)
}

fn max(values: &[Literal]) -> Result<Literal, EvalError> {
    pick(values, Ordering::Greater)
}

/// Return the original literal that wins the comparison; first one wins ties
fn pick(values: &[Literal], wins: Ordering) -> Result<Literal, EvalError> {
    let mut best: Option<&Literal> = None;

    for value in values {
        match best {
            Some(current) if math::compare(value, current)? != wins => {}
            Some(_) => best = Some(value),
            None => {
                // Reject non-numeric text even when it is the only argument.
                math::magnitude(value)?;
                best = Some(value);
            }
        }
    }

    best.cloned()
        .ok_or_else(|| EvalError::InvalidCall("empty argument list".to_string()))
}

/// EXTERNAL_REF(locator): exactly one bare identifier naming a remote cell
async fn external_ref<R>(args: &[Expr], resolver: &mut R) -> EvalResult<Literal>
where
    R: CellResolver + ?Sized,
{
    let locator = match args {
        [Expr::Identifier(locator)] => locator,
        [_] => {
            return Err(
                EvalError::InvalidCall(format!("{} expects a bare locator", EXTERNAL_REF)).into(),
            )
        }
        _ => {
            return Err(EvalError::InvalidCall(format!(
                "{} expects a single argument, got {}",
                EXTERNAL_REF,
                args.len()
            ))
            .into())
        }
    };

    let result = resolver.fetch_external(locator).await?;
    Ok(parse_value(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::formula::evaluator::tests::{eval_with, MapResolver};
    use crate::error::{FormulaError, ResolveError};
    use pretty_assertions::assert_eq;

    async fn eval(formula: &str) -> EvalResult<Literal> {
        let mut resolver = MapResolver::with(&[("var1", "1"), ("var2", "2")]);
        eval_with(formula, &mut resolver).await
    }

    #[tokio::test]
    async fn test_sum_avg_min_max() {
        assert_eq!(eval("SUM(var1, var2)").await.unwrap(), Literal::int("3"));
        assert_eq!(eval("AVG(var1, var2)").await.unwrap(), Literal::float("1.5"));
        assert_eq!(eval("MIN(var1, var2)").await.unwrap(), Literal::int("1"));
        assert_eq!(eval("MAX(var1, var2)").await.unwrap(), Literal::int("2"));
    }

    #[tokio::test]
    async fn test_names_are_case_insensitive() {
        assert_eq!(eval("sum(1, 2, 3)").await.unwrap(), Literal::int("6"));
        assert_eq!(eval("Max(1, 2) + 1").await.unwrap(), Literal::int("3"));
    }

    #[tokio::test]
    async fn test_min_max_keep_original_literal() {
        assert_eq!(eval("MIN(2, 1.50, 3)").await.unwrap(), Literal::float("1.50"));
        assert_eq!(eval("MAX(1.0, 1)").await.unwrap(), Literal::float("1.0"));
        assert_eq!(eval("MAX(1, 1.0)").await.unwrap(), Literal::int("1"));
    }

    #[tokio::test]
    async fn test_sum_promotes_on_float() {
        assert_eq!(eval("SUM(1, 2.5)").await.unwrap(), Literal::float("3.5"));
    }

    #[tokio::test]
    async fn test_avg_of_equal_values_is_float_typed() {
        assert_eq!(eval("AVG(2, 2)").await.unwrap(), Literal::float("2"));
    }

    #[tokio::test]
    async fn test_empty_call_is_rejected() {
        assert!(eval("SUM()").await.is_err());
        assert!(eval("MAX()").await.is_err());
    }

    #[tokio::test]
    async fn test_min_with_text_argument_fails() {
        let mut resolver = MapResolver::with(&[("s", "hello")]);
        assert!(eval_with("MIN(s)", &mut resolver).await.is_err());
        assert!(eval_with("MIN(1, s)", &mut resolver).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_function() {
        match eval("FOO(1)").await {
            Err(ResolveError::Formula(FormulaError::Eval(EvalError::UnknownFunction(name)))) => {
                assert_eq!(name, "FOO")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_external_ref_fetches_and_classifies() {
        let mut resolver = MapResolver::default();
        resolver
            .external
            .insert("http://remote/api/v1/s/c".to_string(), "41".to_string());

        let result = eval_with("EXTERNAL_REF(http://remote/api/v1/s/c) + 1", &mut resolver)
            .await
            .unwrap();
        assert_eq!(result, Literal::int("42"));
    }

    #[tokio::test]
    async fn test_external_ref_call_shape() {
        let mut resolver = MapResolver::default();
        let args = vec![Expr::Literal(Literal::int("1"))];
        assert!(external_ref(&args, &mut resolver).await.is_err());
        assert!(external_ref(&[], &mut resolver).await.is_err());
        assert!(eval("EXTERNAL_REF()").await.is_err());
    }
}
