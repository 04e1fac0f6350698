//! The coalesce rewriter (component D): pattern-matched algebraic
//! simplifications applied at every node construction.
//!
//! [`rewrite`] inspects only the outermost node and its immediate
//! child — two levels — and either returns an algebraically
//! equivalent, simpler term or the node unchanged. It is never applied
//! recursively by itself; each smart constructor in [`crate::node`]
//! calls it once on the node it just built, and reaching a tree-wide
//! fixpoint is the constructors' job collectively, not this function's.

use std::collections::HashMap;

use workflow_bson::Value;
use workflow_path::Path;

use crate::expression::Expression;
use crate::node::{GeoNearParams, GroupOp, Grouped, Node, SortDir};
use crate::reshape::{Reshape, ReshapeValue};

pub fn rewrite(node: Node) -> Node {
    match node {
        Node::Match(src, sel) => match *src {
            // Rule 1: Match ∘ Match → one Match, selectors conjoined.
            Node::Match(inner, inner_sel) => {
                rewrite(Node::Match(inner, inner_sel.and(sel)))
            }
            // Rule 2: Match ∘ Sort → Sort ∘ Match (selection before sort).
            Node::Sort(inner, keys) => {
                rewrite(Node::Sort(Box::new(rewrite(Node::Match(inner, sel))), keys))
            }
            other => Node::Match(Box::new(other), sel),
        },

        Node::Limit(src, n) => match *src {
            // Rule 5: Limit ∘ Limit → Limit(min).
            Node::Limit(inner, inner_n) => rewrite(Node::Limit(inner, n.min(inner_n))),
            // Rule 6: Limit ∘ Skip → Skip ∘ Limit(widened).
            Node::Skip(inner, k) => {
                rewrite(Node::Skip(Box::new(rewrite(Node::Limit(inner, k + n))), k))
            }
            other => Node::Limit(Box::new(other), n),
        },

        Node::Skip(src, n) => match *src {
            // Rule 7: Skip ∘ Skip → Skip(sum).
            Node::Skip(inner, inner_n) => rewrite(Node::Skip(inner, n + inner_n)),
            other => Node::Skip(Box::new(other), n),
        },

        Node::Project(src, shape, id) => match *src {
            // Rule 3: Project ∘ Project → one Project, inner shape
            // inlined under outer; ids combine via `coalesce`.
            Node::Project(inner, inner_shape, inner_id) => rewrite(Node::Project(
                inner,
                inner_shape.inline_under(&shape),
                inner_id.coalesce(id),
            )),
            // Rule 4: Project ∘ Group → inline into Group when every
            // referenced field is a pure rename; else leave as-is.
            Node::Group(inner, grouped, by) if id != crate::id_handling::IdHandling::ExcludeId => {
                match try_inline_project_over_group(&shape, &grouped) {
                    Some(renamed) => rewrite(Node::Group(inner, renamed, by)),
                    None => Node::Project(
                        Box::new(Node::Group(inner, grouped, by)),
                        shape,
                        id,
                    ),
                }
            }
            // Rule 4 (Unwind-of-Group variant).
            Node::Unwind(unwind_src, field)
                if id != crate::id_handling::IdHandling::ExcludeId =>
            {
                if let Node::Group(inner, grouped, by) = *unwind_src {
                    match try_inline_project_over_group(&shape, &grouped) {
                        Some(renamed) => rewrite(Node::Project(
                            Box::new(Node::Unwind(
                                Box::new(Node::Group(inner, renamed, by)),
                                field,
                            )),
                            shape,
                            id,
                        )),
                        None => Node::Project(
                            Box::new(Node::Unwind(
                                Box::new(Node::Group(inner, grouped, by)),
                                field,
                            )),
                            shape,
                            id,
                        ),
                    }
                } else {
                    Node::Project(Box::new(Node::Unwind(unwind_src, field)), shape, id)
                }
            }
            other => Node::Project(Box::new(other), shape, id),
        },

        Node::Group(src, grouped, by) => {
            let by = normalize_group_by(by);
            match *src {
                // Rule 9: pull project-computed expressions into the
                // group when every reference resolves in that shape.
                Node::Project(inner, shape, _id) => {
                    match try_inline_group_projects(&shape, &grouped, &by) {
                        Some((new_grouped, new_by)) => {
                            rewrite(Node::Group(inner, new_grouped, new_by))
                        }
                        None => Node::Group(
                            Box::new(Node::Project(inner, shape, _id)),
                            grouped,
                            by,
                        ),
                    }
                }
                other => Node::Group(Box::new(other), grouped, by),
            }
        }

        Node::Out(src, collection) => match *src {
            // Rule 13: Out ∘ Read(c) degenerates to Read(c) — writing
            // a collection to itself.
            Node::Read(c) if c == collection => Node::Read(c),
            other => Node::Out(Box::new(other), collection),
        },

        Node::Map(src, f, scope) => match *src {
            // Rule 10: Map ∘ Map composes via the Kleisli-free functorial rule.
            Node::Map(inner, inner_f, inner_scope) => match inner_scope.merge(&scope) {
                Ok(merged) => rewrite(Node::Map(inner, f.compose_map_map(&inner_f), merged)),
                Err(_) => Node::Map(Box::new(Node::Map(inner, inner_f, inner_scope)), f, scope),
            },
            other => Node::Map(Box::new(other), f, scope),
        },

        Node::FlatMap(src, f, scope) => match *src {
            // Rule 10: FlatMap ∘ Map.
            Node::Map(inner, inner_f, inner_scope) => match inner_scope.merge(&scope) {
                Ok(merged) => {
                    rewrite(Node::FlatMap(inner, f.compose_flatmap_map(&inner_f), merged))
                }
                Err(_) => Node::FlatMap(Box::new(Node::Map(inner, inner_f, inner_scope)), f, scope),
            },
            // Rule 10: FlatMap ∘ FlatMap (Kleisli composition).
            Node::FlatMap(inner, inner_f, inner_scope) => match inner_scope.merge(&scope) {
                Ok(merged) => rewrite(Node::FlatMap(
                    inner,
                    f.compose_flatmap_flatmap(&inner_f),
                    merged,
                )),
                Err(_) => {
                    Node::FlatMap(Box::new(Node::FlatMap(inner, inner_f, inner_scope)), f, scope)
                }
            },
            other => Node::FlatMap(Box::new(other), f, scope),
        },

        // Rule 11: SimpleMap ∘ SimpleMap.
        Node::SimpleMap(src, expr, flattens, scope) => match *src {
            Node::SimpleMap(inner, inner_expr, inner_flattens, inner_scope) => {
                match (inner_scope.merge(&scope), try_compose_simple_map_exprs(&expr, &inner_expr)) {
                    (Ok(merged), Some(composed)) => {
                        let mut all_flattens = inner_flattens;
                        all_flattens.extend(flattens);
                        rewrite(Node::SimpleMap(inner, composed, all_flattens, merged))
                    }
                    _ => Node::SimpleMap(
                        Box::new(Node::SimpleMap(inner, inner_expr, inner_flattens, inner_scope)),
                        expr,
                        flattens,
                        scope,
                    ),
                }
            }
            other => Node::SimpleMap(Box::new(other), expr, flattens, scope),
        },

        // Rule 12: FoldLeft ∘ FoldLeft → flatten, inner tail first.
        Node::FoldLeft(head, tail) => match *head {
            Node::FoldLeft(inner_head, inner_tail) => {
                let mut flattened = inner_tail;
                flattened.extend(tail);
                rewrite(Node::FoldLeft(inner_head, flattened))
            }
            other => Node::FoldLeft(Box::new(other), tail),
        },

        // Rule 14: GeoNear ∘ GeoNear — left as a documented no-op.
        // FIXME: decide a parameter-merge policy once a second GeoNear
        // call site exists; merging `near`/`query`/sort-order
        // semantics across two geo stages is not well-defined without
        // one, so we keep both stages distinct rather than guess.
        Node::GeoNear(src, params) => Node::GeoNear(src, params),

        other => other,
    }
}

/// Rule 8: a `Group` whose `by` key is a non-null literal compacts to
/// grouping under the literal `null` — semantically equivalent (every
/// document still falls into one group) and smaller to serialize.
fn normalize_group_by(by: Expression) -> Expression {
    match &by {
        Expression::Literal(v) if !v.is_null() => Expression::Literal(Value::Null),
        _ => by,
    }
}

/// Rule 4's inlining direction: every `Project` entry that references
/// a `Group` output field must be a pure rename of that field (or of
/// `_id`) for the projection to disappear. Returns the renamed
/// `Grouped` map, or `None` to decline (caller keeps both stages).
fn try_inline_project_over_group(shape: &Reshape, grouped: &Grouped) -> Option<Grouped> {
    let mut renamed = Grouped::new();
    for (out_name, value) in shape.iter() {
        let ReshapeValue::Expr(expr) = value else {
            return None;
        };
        let referenced = expr.as_pure_field()?;
        let leaves = referenced.leaves();
        if leaves.len() != 1 {
            return None;
        }
        let field_name = leaves[0].to_string();
        if field_name == "_id" {
            continue;
        }
        let op = grouped.get(&field_name)?;
        renamed.set(out_name, op.clone());
    }
    Some(renamed)
}

/// Rule 9's inlining direction: substitute every field reference in
/// the group's accumulators/`by` key with the expression that
/// produced it in the immediately preceding projection, as long as
/// every such reference actually resolves in that shape.
fn try_inline_group_projects(
    shape: &Reshape,
    grouped: &Grouped,
    by: &Expression,
) -> Option<(Grouped, Expression)> {
    let field_map = shape.as_field_map();
    if !all_field_refs_resolve(by, &field_map) {
        return None;
    }
    for (_, op) in grouped.iter() {
        if !all_field_refs_resolve(op.expr(), &field_map) {
            return None;
        }
    }
    let new_by = by.substitute(&field_map);
    let mut new_grouped = Grouped::new();
    for (name, op) in grouped.iter() {
        new_grouped.set(name, substitute_group_op(op, &field_map));
    }
    Some((new_grouped, new_by))
}

fn substitute_group_op(op: &GroupOp, map: &HashMap<Path, Expression>) -> GroupOp {
    let substituted = op.expr().substitute(map);
    match op {
        GroupOp::Sum(_) => GroupOp::Sum(substituted),
        GroupOp::Push(_) => GroupOp::Push(substituted),
        GroupOp::AddToSet(_) => GroupOp::AddToSet(substituted),
        GroupOp::First(_) => GroupOp::First(substituted),
        GroupOp::Last(_) => GroupOp::Last(substituted),
        GroupOp::Max(_) => GroupOp::Max(substituted),
        GroupOp::Min(_) => GroupOp::Min(substituted),
        GroupOp::Avg(_) => GroupOp::Avg(substituted),
    }
}

fn all_field_refs_resolve(expr: &Expression, map: &HashMap<Path, Expression>) -> bool {
    match expr {
        Expression::Field(p) => map.contains_key(p),
        Expression::Op(_, args) => args.iter().all(|a| all_field_refs_resolve(a, map)),
        Expression::Object(fields) => fields.iter().all(|(_, v)| all_field_refs_resolve(v, map)),
        Expression::Literal(_) | Expression::Var(_) => true,
    }
}

/// `outer` evaluates against whatever document `inner` produced, so
/// composing them means substituting every field reference in `outer`
/// with the expression that produced it in `inner` — the same
/// substitution `Reshape::inline_under` uses to compose two
/// `Project`s. `inner` only has named sub-fields to substitute when
/// it's itself an object literal; the identity pass-through
/// (`Expression::root()`, the shape `Unwind`-lowering produces) needs
/// no rewrite at all. Anything else has no field map to substitute
/// through, so this declines and the caller keeps both stages nested.
fn try_compose_simple_map_exprs(outer: &Expression, inner: &Expression) -> Option<Expression> {
    match inner {
        Expression::Var(p) if *p == Path::name("ROOT") => Some(outer.clone()),
        Expression::Object(fields) => {
            let field_map: HashMap<Path, Expression> =
                fields.iter().map(|(k, v)| (Path::name(k.clone()), v.clone())).collect();
            Some(outer.substitute(&field_map))
        }
        _ => None,
    }
}

// `Sort(Project(...))` etc. are not simplifiable this way; a
// `Project`-over-`SimpleMap` rule was considered and is intentionally
// not wired in here due to a correctness concern. It would read, were
// it ever re-enabled:
//
//   Node::Project(src, shape, id) if matches!(*src, Node::SimpleMap(..)) => { ... }
//
// Do not re-enable without a separate analysis of which projections
// are safe to push through a SimpleMap's expression.
#[allow(dead_code)]
fn project_over_simple_map_declined() {}
