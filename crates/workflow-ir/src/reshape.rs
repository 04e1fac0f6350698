use std::collections::HashMap;

use workflow_path::Path;

use crate::expression::Expression;

/// One entry of a [`Reshape`]: either a computed expression or a
/// nested sub-shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ReshapeValue {
    Expr(Expression),
    Nested(Reshape),
}

/// An ordered mapping from a field name to either an expression or a
/// nested `Reshape` — the shape a `$project` stage builds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reshape(Vec<(String, ReshapeValue)>);

impl Reshape {
    pub fn new() -> Reshape {
        Reshape(Vec::new())
    }

    pub fn set(&mut self, name: impl Into<String>, value: ReshapeValue) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn field(&mut self, name: impl Into<String>, expr: Expression) {
        self.set(name, ReshapeValue::Expr(expr));
    }

    pub fn get(&self, name: &str) -> Option<&ReshapeValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReshapeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Flatten every top-level field to a `Path -> Expression` map
    /// (nested reshapes become their own `{field}.{nested}` entries
    /// only where the nested value is itself an expression — used to
    /// test "pure rename" coverage for the group/project inlining
    /// rules, which only ever reference top-level projected fields).
    pub fn as_field_map(&self) -> HashMap<Path, Expression> {
        self.0
            .iter()
            .filter_map(|(k, v)| match v {
                ReshapeValue::Expr(e) => Some((Path::name(k.clone()), e.clone())),
                ReshapeValue::Nested(_) => None,
            })
            .collect()
    }

    /// Inline this shape as the new outer shape of a `Project`-after-
    /// `Project` pair: each entry of `outer` that references a field
    /// of `self` (the inner shape) is rewritten to the inner
    /// expression directly.
    pub fn inline_under(&self, outer: &Reshape) -> Reshape {
        let inner_map = self.as_field_map();
        let mut result = Reshape::new();
        for (name, value) in outer.iter() {
            let rewritten = match value {
                ReshapeValue::Expr(e) => ReshapeValue::Expr(e.substitute(&inner_map)),
                ReshapeValue::Nested(n) => ReshapeValue::Nested(n.clone()),
            };
            result.set(name, rewritten);
        }
        result
    }

    /// Merge two disjoint shapes into one (used by the merge
    /// planner's `Project, Project` row). Returns `None` if the two
    /// shapes share a field name — the caller falls back to renaming
    /// via sub-reshapes instead.
    pub fn merge_disjoint(&self, other: &Reshape) -> Option<Reshape> {
        let mut result = self.clone();
        for (name, value) in other.iter() {
            if result.get(name).is_some() {
                return None;
            }
            result.set(name, value.clone());
        }
        Some(result)
    }
}
