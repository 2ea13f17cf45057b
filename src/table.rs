//! Variable table mapping symbol names to expressions.
//!
//! A [`VariableTable`] binds each variable name to an [`Expr`] that may be a
//! plain constant or a further expression tree referencing other names. Lookups
//! evaluate lazily and recursively; a set of names visited on the current
//! evaluation stack travels along so that reference cycles (`a => b => a`) are
//! reported as [`EvalError::CyclicDependency`] instead of recursing forever.
//!
//! Entries can be removed without cascading effects: an expression elsewhere
//! that still mentions a removed name simply fails to resolve with
//! [`EvalError::MissingEntry`] if it is evaluated afterwards.

use std::collections::{HashMap, HashSet};

use crate::errors::EvalError;
use crate::expr::Expr;

/// Mapping from variable name to bound expression.
#[derive(Default, Clone)]
pub struct VariableTable {
    entries: HashMap<String, Expr>,
}

impl VariableTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to an expression, overwriting any previous binding. The
    /// expression handle is shared, not copied.
    pub fn set(&mut self, name: impl Into<String>, expression: Expr) {
        self.entries.insert(name.into(), expression);
    }

    /// Binds `name` to a constant value.
    pub fn set_value(&mut self, name: impl Into<String>, value: f64) {
        self.set(name, Expr::constant(value));
    }

    /// Returns the expression bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<Expr> {
        self.entries.get(name).cloned()
    }

    /// Removes the binding for `name`, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Expr> {
        self.entries.remove(name)
    }

    /// Removes every binding.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the bound names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Unions `other`'s entries into this table; on a key collision `other`'s
    /// binding wins.
    pub fn merge(&mut self, other: &VariableTable) {
        for (name, expression) in &other.entries {
            self.entries.insert(name.clone(), expression.clone());
        }
    }

    /// Evaluates the expression bound to `name`.
    pub fn value_of(&self, name: &str) -> Result<f64, EvalError> {
        let mut visited = HashSet::new();
        self.value_of_with(name, &mut visited)
    }

    /// Evaluates `name` with an explicit set of names already on the active
    /// evaluation stack. Seeing `name` a second time while it is still on the
    /// stack means the bindings form a cycle.
    pub(crate) fn value_of_with(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> Result<f64, EvalError> {
        if visited.contains(name) {
            return Err(EvalError::CyclicDependency(name.to_string()));
        }
        let expression = self
            .get(name)
            .ok_or_else(|| EvalError::MissingEntry(name.to_string()))?;
        visited.insert(name.to_string());
        let value = expression.evaluate_with(self, visited);
        visited.remove(name);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove_clear() {
        let mut table = VariableTable::new();
        table.set_value("a", 3.0);
        table.set("b", Expr::parse("a * 2").unwrap());
        assert_eq!(table.len(), 2);
        assert_eq!(table.value_of("b").unwrap(), 6.0);

        // overwrite
        table.set_value("a", 5.0);
        assert_eq!(table.value_of("b").unwrap(), 10.0);

        assert!(table.remove("a").is_some());
        assert!(table.get("a").is_none());
        // b still exists but no longer resolves
        assert!(matches!(
            table.value_of("b"),
            Err(EvalError::MissingEntry(name)) if name == "a"
        ));

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_merge_other_wins() {
        let mut base = VariableTable::new();
        base.set_value("a", 1.0);
        base.set_value("b", 2.0);

        let mut other = VariableTable::new();
        other.set_value("b", 20.0);
        other.set_value("c", 30.0);

        base.merge(&other);
        assert_eq!(base.value_of("a").unwrap(), 1.0);
        assert_eq!(base.value_of("b").unwrap(), 20.0);
        assert_eq!(base.value_of("c").unwrap(), 30.0);
    }

    #[test]
    fn test_self_cycle_is_detected() {
        let mut table = VariableTable::new();
        table.set("a", Expr::parse("a").unwrap());
        assert!(matches!(
            table.value_of("a"),
            Err(EvalError::CyclicDependency(name)) if name == "a"
        ));
    }

    #[test]
    fn test_four_cycle_is_detected_from_any_member() {
        let mut table = VariableTable::new();
        table.set("a", Expr::parse("b + 1").unwrap());
        table.set("b", Expr::parse("c + 1").unwrap());
        table.set("c", Expr::parse("d + 1").unwrap());
        table.set("d", Expr::parse("b + 1").unwrap());

        for name in ["a", "b", "c", "d"] {
            assert!(
                matches!(table.value_of(name), Err(EvalError::CyclicDependency(_))),
                "expected cycle evaluating {name}"
            );
        }
    }

    #[test]
    fn test_diamond_dependency_is_not_a_cycle() {
        // a and b both reference c; c leaves the stack between the two visits
        let mut table = VariableTable::new();
        table.set("sum", Expr::parse("a + b").unwrap());
        table.set("a", Expr::parse("c * 2").unwrap());
        table.set("b", Expr::parse("c * 3").unwrap());
        table.set_value("c", 4.0);
        assert_eq!(table.value_of("sum").unwrap(), 20.0);
    }
}
