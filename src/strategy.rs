use std::collections::BTreeMap;
use std::sync::Arc;

use crate::Result;
use crate::error::Error;

type Strategy<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;

/// Named functions looked up at call time.
pub struct StrategyRegistry<I, O> {
    strategies: BTreeMap<String, Strategy<I, O>>,
}

impl<I, O> Default for StrategyRegistry<I, O> {
    fn default() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }
}

impl<I, O> Clone for StrategyRegistry<I, O> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
        }
    }
}

impl<I, O> StrategyRegistry<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the strategy called `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, strategy: F) -> &mut Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        self.strategies.insert(name.into(), Arc::new(strategy));
        self
    }

    pub fn execute(&self, name: &str, input: I) -> Result<O> {
        let strategy = self
            .strategies
            .get(name)
            .ok_or_else(|| Error::StrategyNotFound {
                name: name.to_owned(),
            })?;
        Ok(strategy(input))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn available(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Operands {
    pub a: f64,
    pub b: f64,
}

/// `add`, `subtract`, `multiply` and `divide`; division by zero yields `None`.
pub fn arithmetic() -> StrategyRegistry<Operands, Option<f64>> {
    let mut registry = StrategyRegistry::new();
    registry
        .register("add", |ops: Operands| Some(ops.a + ops.b))
        .register("subtract", |ops: Operands| Some(ops.a - ops.b))
        .register("multiply", |ops: Operands| Some(ops.a * ops.b))
        .register("divide", |ops: Operands| (ops.b != 0.0).then_some(ops.a / ops.b));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executes_registered_and_dynamic_strategies() {
        let mut registry = arithmetic();
        let ops = Operands { a: 5.0, b: 3.0 };
        assert_eq!(registry.execute("add", ops).expect("add"), Some(8.0));
        assert_eq!(registry.execute("multiply", ops).expect("multiply"), Some(15.0));
        assert_eq!(
            registry
                .execute("divide", Operands { a: 1.0, b: 0.0 })
                .expect("divide"),
            None
        );

        registry.register("power", |ops: Operands| Some(ops.a.powf(ops.b)));
        assert_eq!(
            registry
                .execute("power", Operands { a: 2.0, b: 3.0 })
                .expect("power"),
            Some(8.0)
        );
        assert_eq!(
            registry.available(),
            vec!["add", "divide", "multiply", "power", "subtract"]
        );
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let registry = StrategyRegistry::<(), ()>::new();
        let error = registry.execute("compare", ()).expect_err("missing strategy");
        assert!(matches!(&error, Error::StrategyNotFound { name } if name == "compare"));
        assert_eq!(error.to_string(), "strategy 'compare' not found");
    }
}
