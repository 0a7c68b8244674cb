//! Formula evaluator
//!
//! Reduces an AST to a single [`Literal`]. Cell references and external
//! fetches are delegated to a [`CellResolver`], which is how the solver plugs
//! its memoization and cycle detection into the walk.

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::functions;
use super::math;
use super::parser::{parse_value, Expr, Literal};
use crate::error::{EvalError, EvalResult};

/// Supplies values for identifiers met during evaluation
#[async_trait]
pub trait CellResolver: Send {
    /// Computed result text of a referenced cell
    async fn resolve_reference(&mut self, cell_id: &str) -> EvalResult<String>;

    /// Result text of a remote cell addressed by `locator`
    async fn fetch_external(&mut self, locator: &str) -> EvalResult<String>;
}

/// Evaluate an expression.
///
/// No partial results: the first failure anywhere in the tree is returned.
pub fn evaluate<'a, R>(expr: &'a Expr, resolver: &'a mut R) -> BoxFuture<'a, EvalResult<Literal>>
where
    R: CellResolver + ?Sized,
{
    Box::pin(async move {
        match expr {
            Expr::Literal(literal) => Ok(literal.clone()),

            Expr::Paren(inner) => evaluate(inner, resolver).await,

            Expr::Identifier(name) => {
                let result = resolver.resolve_reference(name).await?;
                Ok(parse_value(&result))
            }

            Expr::Binary { op, left, right } => {
                let left = evaluate(left, &mut *resolver).await?;
                let right = evaluate(right, &mut *resolver).await?;
                Ok(math::apply(*op, &left, &right)?)
            }

            Expr::Unary { op, operand } => {
                let operand = evaluate(operand, resolver).await?;
                let zero = Literal::new(operand.kind, "0");
                Ok(math::apply(*op, &zero, &operand)?)
            }

            Expr::Call { name, args } => functions::call(name, args, resolver).await,

            Expr::Invalid => Err(EvalError::InvalidNode.into()),
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::formula::parser::parse_expr;
    use crate::error::{FormulaError, ResolveError};
    use std::collections::HashMap;

    /// Resolver over fixed result texts
    #[derive(Default)]
    pub(crate) struct MapResolver {
        pub cells: HashMap<String, String>,
        pub external: HashMap<String, String>,
    }

    impl MapResolver {
        pub fn with(cells: &[(&str, &str)]) -> Self {
            Self {
                cells: cells
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                external: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl CellResolver for MapResolver {
        async fn resolve_reference(&mut self, cell_id: &str) -> EvalResult<String> {
            self.cells
                .get(&cell_id.to_lowercase())
                .cloned()
                .ok_or_else(|| EvalError::UnknownCell(cell_id.to_string()).into())
        }

        async fn fetch_external(&mut self, locator: &str) -> EvalResult<String> {
            self.external
                .get(locator)
                .cloned()
                .ok_or_else(|| EvalError::External(format!("no route to {}", locator)).into())
        }
    }

    pub(crate) async fn eval_with(formula: &str, resolver: &mut MapResolver) -> EvalResult<Literal> {
        let expr = parse_expr(formula)?;
        evaluate(&expr, resolver).await
    }

    async fn eval(formula: &str) -> EvalResult<Literal> {
        eval_with(formula, &mut MapResolver::default()).await
    }

    fn eval_error(result: EvalResult<Literal>) -> EvalError {
        match result {
            Err(ResolveError::Formula(FormulaError::Eval(err))) => err,
            other => panic!("expected evaluation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eval_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").await.unwrap(), Literal::int("7"));
        assert_eq!(eval("(1 + 2) * 3").await.unwrap(), Literal::int("9"));
        assert_eq!(eval("1 + 2.3").await.unwrap().text, "3.3");
    }

    #[tokio::test]
    async fn test_eval_all_operations() {
        let mut resolver =
            MapResolver::with(&[("var1", "1"), ("var2", "2"), ("var3", "3"), ("var4", "4")]);
        let result = eval_with("var1+(var2*var3+var4)/2", &mut resolver)
            .await
            .unwrap();
        assert_eq!(result.text, "6");
    }

    #[tokio::test]
    async fn test_eval_unary() {
        assert_eq!(eval("-5").await.unwrap(), Literal::int("-5"));
        assert_eq!(eval("--5").await.unwrap(), Literal::int("5"));
        assert_eq!(eval("-2.5").await.unwrap(), Literal::float("-2.5"));
        assert_eq!(eval("+7").await.unwrap(), Literal::int("7"));
    }

    #[tokio::test]
    async fn test_eval_unary_on_string_is_type_error() {
        let mut resolver = MapResolver::with(&[("s", "text")]);
        let err = eval_error(eval_with("-s", &mut resolver).await);
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_eval_reference_reclassifies_value() {
        let mut resolver = MapResolver::with(&[("var2", "+12")]);
        let result = eval_with("1-var2", &mut resolver).await.unwrap();
        assert_eq!(result, Literal::int("-11"));
    }

    #[tokio::test]
    async fn test_eval_string_reference_passes_through() {
        let mut resolver = MapResolver::with(&[("var3", "abc!@_*.%á")]);
        let result = eval_with("((var3))", &mut resolver).await.unwrap();
        assert_eq!(result, Literal::string("abc!@_*.%á"));
    }

    #[tokio::test]
    async fn test_eval_string_arithmetic_fails() {
        let mut resolver = MapResolver::with(&[("a", "Some string")]);
        let err = eval_error(eval_with("a+1", &mut resolver).await);
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_eval_division() {
        assert_eq!(eval("1/2").await.unwrap(), Literal::float("0.5"));
        assert_eq!(eval_error(eval("1/0").await), EvalError::DivisionByZero);
        assert_eq!(eval_error(eval("1/0.000").await), EvalError::DivisionByZero);
    }

    #[tokio::test]
    async fn test_eval_unknown_reference() {
        let err = eval_error(eval("missing + 1").await);
        assert_eq!(err, EvalError::UnknownCell("missing".to_string()));
    }

    #[tokio::test]
    async fn test_eval_invalid_node_fails() {
        let mut resolver = MapResolver::default();
        let err = eval_error(evaluate(&Expr::Invalid, &mut resolver).await);
        assert_eq!(err, EvalError::InvalidNode);
    }
}
