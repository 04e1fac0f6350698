use std::collections::HashMap;

use workflow_bson::Value;
use workflow_path::Path;

/// An aggregation-pipeline expression: a literal, a field/variable
/// reference, or an opaque operator call (`$concat`, `$add`, …). We
/// don't model every MQL operator — only enough structure for the
/// coalesce and merge passes to recognize pure field references
/// (renames) and rewrite the field/variable references a stage holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// `$a.b`
    Field(Path),
    /// `$$a.b` (includes the `ROOT`/`CURRENT` pseudo-variables as the
    /// leading leaf name)
    Var(Path),
    /// `{ $opName: [args...] }`
    Op(String, Vec<Expression>),
    /// A document built from computed sub-expressions — e.g. the body
    /// of a `$project`/`$addFields`/`SimpleMap` that combines several
    /// field values into one result document. Distinct from
    /// `Literal(Value::Document(..))`, whose entries are constants.
    Object(Vec<(String, Expression)>),
}

impl Expression {
    pub fn root() -> Expression {
        Expression::Var(Path::name("ROOT"))
    }

    /// A pure rename: a bare field reference with no operator wrapping
    /// it. Used by the coalesce rules that only fire when every
    /// referenced value is a direct copy, not a computed expression.
    pub fn as_pure_field(&self) -> Option<&Path> {
        match self {
            Expression::Field(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_pure_rename(&self) -> bool {
        matches!(self, Expression::Field(_) | Expression::Var(_))
    }

    /// Rewrite every `Field`/`Var` leaf through `f`. Used to rebase a
    /// transplanted stage (`prefix_base`) and to substitute renamed
    /// references during projection inlining.
    pub fn map_refs(&self, f: &mut impl FnMut(&Path, bool) -> Path) -> Expression {
        match self {
            Expression::Literal(v) => Expression::Literal(v.clone()),
            Expression::Field(p) => Expression::Field(f(p, false)),
            Expression::Var(p) => Expression::Var(f(p, true)),
            Expression::Op(name, args) => {
                Expression::Op(name.clone(), args.iter().map(|a| a.map_refs(f)).collect())
            }
            Expression::Object(fields) => Expression::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.map_refs(f))).collect(),
            ),
        }
    }

    /// Substitute every occurrence of a pure field reference found in
    /// `subst` with its bound expression. Returns `None` if any
    /// referenced field is *not* in `subst` and isn't already closed
    /// (used by the group/project inlining rules, which only fire
    /// when every reference resolves).
    pub fn substitute(&self, subst: &HashMap<Path, Expression>) -> Expression {
        match self {
            Expression::Field(p) => subst.get(p).cloned().unwrap_or_else(|| self.clone()),
            Expression::Op(name, args) => Expression::Op(
                name.clone(),
                args.iter().map(|a| a.substitute(subst)).collect(),
            ),
            Expression::Object(fields) => Expression::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.substitute(subst))).collect(),
            ),
            other => other.clone(),
        }
    }

    /// `true` if every field reference in this expression resolves to
    /// a pure rename (not a computed expression) in `projection` — the
    /// precondition rule 4/9 require before inlining a project into a
    /// group.
    pub fn resolves_to_pure_renames(&self, projection: &HashMap<Path, Expression>) -> bool {
        match self {
            Expression::Field(p) => projection
                .get(p)
                .map(Expression::is_pure_rename)
                .unwrap_or(true),
            Expression::Op(_, args) => args.iter().all(|a| a.resolves_to_pure_renames(projection)),
            Expression::Object(fields) => {
                fields.iter().all(|(_, v)| v.resolves_to_pure_renames(projection))
            }
            _ => true,
        }
    }
}
