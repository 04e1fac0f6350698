//! The finalize pass (component F): irreversible shape normalizations
//! applied exactly once, after merge assembly is done and before
//! [`crate::crush`] lowers the tree to a task tree.
//!
//! Two independent passes compose here: [`finish`] prunes `Project`
//! fields a downstream consumer never reads (`deleteUnusedFields`),
//! and [`finalize0`] eliminates every `Project`/`Unwind`/`SimpleMap`
//! that sits directly beneath a map-reduce stage, since the execution
//! target can only run a single JS function there. [`finalize`] runs
//! both, then promotes a trailing `Project` when the resulting tree's
//! shape is statically known.

use std::collections::HashSet;

use workflow_bson::Value;
use workflow_ir::{Expression, IdHandling, JsFn, Node, Reshape, ReshapeValue, Scope, Selector};
use workflow_path::{Path, ReservedNames};

use crate::serialize::expression_to_js;

/// Run `deleteUnusedFields` then `finalize0`, then promote a final
/// `Project` over the resulting tree's statically known shape.
pub fn finalize(node: Node, reserved: &ReservedNames) -> Node {
    let node = finish(node, None);
    let node = finalize0(node, reserved);
    promote_shape(node, reserved)
}

// ---------------------------------------------------------------
// finish / deleteUnusedFields
// ---------------------------------------------------------------

/// Top-level field names a consumer downstream of `node` actually
/// reads. `None` means "unknown — assume everything", which is the
/// only sound answer once the tree passes through a node whose
/// reference set isn't fully analyzable here (a map-reduce stage's
/// opaque JS body, a `FoldLeft`, a `Join`).
type Required = Option<HashSet<String>>;

fn top_name(p: &Path) -> String {
    p.leaves()[0].to_string()
}

fn union(req: &Required, extra: HashSet<String>) -> Required {
    match req {
        None => None,
        Some(r) => {
            let mut out = r.clone();
            out.extend(extra);
            Some(out)
        }
    }
}

fn collect_expr_refs(expr: &Expression, out: &mut HashSet<String>) {
    match expr {
        Expression::Literal(_) => {}
        Expression::Field(p) | Expression::Var(p) => {
            out.insert(top_name(p));
        }
        Expression::Op(_, args) => args.iter().for_each(|a| collect_expr_refs(a, out)),
        Expression::Object(fields) => fields.iter().for_each(|(_, v)| collect_expr_refs(v, out)),
    }
}

fn collect_selector_refs(sel: &Selector, out: &mut HashSet<String>) {
    match sel {
        Selector::And(cs) | Selector::Or(cs) => cs.iter().for_each(|c| collect_selector_refs(c, out)),
        Selector::Cmp(p, _, _) | Selector::Exists(p, _) => {
            out.insert(top_name(p));
        }
        Selector::Regex { field, .. } => {
            out.insert(top_name(field));
        }
        // A `$where` predicate can read anything; the caller treats
        // this as "required = None" rather than trusting this set.
        Selector::Where(_) => {}
    }
}

fn collect_reshape_refs(shape: &Reshape, out: &mut HashSet<String>) {
    for (_, value) in shape.iter() {
        match value {
            ReshapeValue::Expr(e) => collect_expr_refs(e, out),
            ReshapeValue::Nested(n) => collect_reshape_refs(n, out),
        }
    }
}

/// `deleteUnusedFields`: prune `Project` entries that nothing
/// downstream reads. Only `Project` shapes are pruned — every other
/// node's own field set is left alone; a `Group`'s accumulators are
/// typically each deliberately requested by the caller that built them.
fn finish(node: Node, required: Required) -> Node {
    match node {
        Node::Pure(v) => Node::Pure(v),
        Node::Read(c) => Node::Read(c),

        Node::Match(src, sel) => {
            let mut refs = HashSet::new();
            collect_selector_refs(&sel, &mut refs);
            let child_required = if matches!(sel, Selector::Where(_)) {
                None
            } else {
                union(&required, refs)
            };
            Node::Match(Box::new(finish(*src, child_required)), sel)
        }
        Node::Limit(src, n) => Node::Limit(Box::new(finish(*src, required)), n),
        Node::Skip(src, n) => Node::Skip(Box::new(finish(*src, required)), n),
        Node::Sort(src, keys) => {
            let mut refs = HashSet::new();
            for (p, _) in &keys {
                refs.insert(top_name(p));
            }
            Node::Sort(Box::new(finish(*src, union(&required, refs))), keys)
        }
        Node::Out(src, c) => Node::Out(Box::new(finish(*src, None)), c),

        Node::Project(src, shape, id) => {
            let pruned = match &required {
                None => shape,
                Some(names) => {
                    let mut out = Reshape::new();
                    for (name, value) in shape.iter() {
                        if names.contains(name) || name == "_id" {
                            out.set(name, value.clone());
                        }
                    }
                    out
                }
            };
            let mut refs = HashSet::new();
            collect_reshape_refs(&pruned, &mut refs);
            Node::Project(Box::new(finish(*src, Some(refs))), pruned, id)
        }

        Node::Redact(src, expr) => {
            let mut refs = HashSet::new();
            collect_expr_refs(&expr, &mut refs);
            Node::Redact(Box::new(finish(*src, union(&required, refs))), expr)
        }
        Node::Unwind(src, field) => {
            let mut refs = HashSet::new();
            refs.insert(top_name(&field));
            Node::Unwind(Box::new(finish(*src, union(&required, refs))), field)
        }
        Node::Group(src, grouped, by) => {
            let mut refs = HashSet::new();
            collect_expr_refs(&by, &mut refs);
            for (_, op) in grouped.iter() {
                collect_expr_refs(op.expr(), &mut refs);
            }
            // A Group discards everything not named by its own
            // accumulators/by-key, so the child only ever needs that set.
            Node::Group(Box::new(finish(*src, Some(refs))), grouped, by)
        }
        Node::GeoNear(src, params) => Node::GeoNear(Box::new(finish(*src, None)), params),

        // Map-reduce stages and composers carry opaque JS or
        // independent sub-trees; a sound answer requires everything.
        Node::Map(src, f, scope) => Node::Map(Box::new(finish(*src, None)), f, scope),
        Node::FlatMap(src, f, scope) => Node::FlatMap(Box::new(finish(*src, None)), f, scope),
        Node::Reduce(src, f, scope) => Node::Reduce(Box::new(finish(*src, None)), f, scope),
        Node::SimpleMap(src, expr, flattens, scope) => {
            Node::SimpleMap(Box::new(finish(*src, None)), expr, flattens, scope)
        }
        Node::FoldLeft(head, tail) => Node::FoldLeft(
            Box::new(finish(*head, None)),
            tail.into_iter().map(|t| finish(t, None)).collect(),
        ),
        Node::Join(set) => Node::Join(set.into_iter().map(|n| finish(n, None)).collect()),
    }
}

// ---------------------------------------------------------------
// finalize0
// ---------------------------------------------------------------

/// Build the object-construction `Expression` a `Project`'s `Reshape`
/// denotes, honoring `_id` the way `$project` does: it rides along
/// implicitly unless the stage excludes it outright.
fn reshape_to_expression(shape: &Reshape, id: IdHandling) -> Expression {
    let mut fields: Vec<(String, Expression)> = Vec::new();
    if id != IdHandling::ExcludeId && shape.get("_id").is_none() {
        fields.push(("_id".to_string(), Expression::Field(Path::name("_id"))));
    }
    for (name, value) in shape.iter() {
        let expr = match value {
            ReshapeValue::Expr(e) => e.clone(),
            ReshapeValue::Nested(n) => reshape_to_expression(n, IdHandling::IgnoreId),
        };
        fields.push((name.to_string(), expr));
    }
    Expression::Object(fields)
}

fn map_js_fn(expr: &Expression) -> JsFn {
    JsFn::new(["key", "value"], format!("return [key, {}];", expression_to_js(expr, "value")))
}

/// Rule 3's `FlatMap` form for a `SimpleMap` with one or more flatten
/// paths: a document is produced for every element reachable by
/// walking the cartesian product of each flattened array.
fn flatmap_js_fn(expr: &Expression, flattens: &[Path]) -> JsFn {
    let mut body = String::from("var __out = [];\n");
    for (i, path) in flattens.iter().enumerate() {
        let arr = path.to_js_expr("value");
        body.push_str(&format!(
            "var __arr{i} = {arr} || []; for (var __i{i} = 0; __i{i} < __arr{i}.length; __i{i}++) {{\n"
        ));
    }
    for (i, path) in flattens.iter().enumerate() {
        body.push_str(&format!("value.{path} = __arr{i}[__i{i}];\n"));
    }
    body.push_str(&format!("__out.push([key, {}]);\n", expression_to_js(expr, "value")));
    for _ in flattens {
        body.push_str("}\n");
    }
    body.push_str("return __out;");
    JsFn::new(["key", "value"], body)
}

fn raw_from_simple_map(inner: Node, expr: Expression, flattens: Vec<Path>, scope: Scope) -> Node {
    if flattens.is_empty() {
        Node::Map(Box::new(inner), map_js_fn(&expr), scope)
    } else {
        Node::FlatMap(Box::new(inner), flatmap_js_fn(&expr, &flattens), scope)
    }
}

/// The source-side half of rules 1-3: finalize `src` recursively, then
/// collapse whatever it became — a `Project`, an `Unwind`, or a
/// `SimpleMap` — into the raw `Map`/`FlatMap` form a map-reduce stage
/// can sit directly on top of. Anything else (a `Read`, a pipeline
/// chain, another map-reduce stage) is left untouched.
fn lower_mr_source(src: Node, reserved: &ReservedNames) -> Node {
    let src = finalize0(src, reserved);
    match src {
        Node::Project(inner, shape, id) => {
            let expr = reshape_to_expression(&shape, id);
            raw_from_simple_map(*inner, expr, Vec::new(), Scope::new())
        }
        Node::Unwind(inner, field) => {
            raw_from_simple_map(*inner, Expression::root(), vec![field], Scope::new())
        }
        Node::SimpleMap(inner, expr, flattens, scope) => {
            raw_from_simple_map(*inner, expr, flattens, scope)
        }
        other => other,
    }
}

fn ends_in_reduce(node: &Node) -> bool {
    matches!(node, Node::Reduce(..))
}

fn default_fold_left_reducer() -> JsFn {
    JsFn::new(
        ["key", "values"],
        "var acc = {}; values.forEach(function(v) { for (var k in v) { acc[k] = v[k]; } }); return acc;",
    )
}

fn finalize_fold_left(head: Node, tail: Vec<Node>, reserved: &ReservedNames) -> Node {
    let finalized_head = finalize0(head, reserved);
    let mut shape = Reshape::new();
    shape.field(&reserved.expr_label, Expression::root());
    let wrapped_head = Node::Project(Box::new(finalized_head), shape, IdHandling::IncludeId);

    let new_tail = tail
        .into_iter()
        .map(|t| {
            let t = finalize0(t, reserved);
            if ends_in_reduce(&t) {
                t
            } else {
                Node::Reduce(Box::new(t), default_fold_left_reducer(), Scope::new())
            }
        })
        .collect();

    Node::FoldLeft(Box::new(wrapped_head), new_tail)
}

/// Lower every map-reduce-adjacent `Project`/`Unwind`/`SimpleMap` in
/// the tree and normalize every `FoldLeft`. Structural recursion
/// everywhere else.
pub fn finalize0(node: Node, reserved: &ReservedNames) -> Node {
    match node {
        Node::Pure(v) => Node::Pure(v),
        Node::Read(c) => Node::Read(c),
        Node::Match(src, sel) => Node::Match(Box::new(finalize0(*src, reserved)), sel),
        Node::Limit(src, n) => Node::Limit(Box::new(finalize0(*src, reserved)), n),
        Node::Skip(src, n) => Node::Skip(Box::new(finalize0(*src, reserved)), n),
        Node::Sort(src, keys) => Node::Sort(Box::new(finalize0(*src, reserved)), keys),
        Node::Out(src, c) => Node::Out(Box::new(finalize0(*src, reserved)), c),
        Node::Project(src, shape, id) => Node::Project(Box::new(finalize0(*src, reserved)), shape, id),
        Node::Redact(src, expr) => Node::Redact(Box::new(finalize0(*src, reserved)), expr),
        Node::Unwind(src, field) => Node::Unwind(Box::new(finalize0(*src, reserved)), field),
        Node::Group(src, grouped, by) => Node::Group(Box::new(finalize0(*src, reserved)), grouped, by),
        Node::GeoNear(src, params) => Node::GeoNear(Box::new(finalize0(*src, reserved)), params),
        Node::Map(src, f, scope) => Node::Map(Box::new(lower_mr_source(*src, reserved)), f, scope),
        Node::FlatMap(src, f, scope) => Node::FlatMap(Box::new(lower_mr_source(*src, reserved)), f, scope),
        Node::Reduce(src, f, scope) => Node::Reduce(Box::new(lower_mr_source(*src, reserved)), f, scope),
        Node::SimpleMap(src, expr, flattens, scope) => {
            let lowered = lower_mr_source(*src, reserved);
            raw_from_simple_map(lowered, expr, flattens, scope)
        }
        Node::FoldLeft(head, tail) => finalize_fold_left(*head, tail, reserved),
        Node::Join(set) => Node::Join(set.into_iter().map(|n| finalize0(n, reserved)).collect()),
    }
}

/// The shape-promotion step: append a trailing `Project` listing
/// exactly the statically known field names as `Include` (`1`),
/// `IgnoreId`, if the top node's shape is known.
fn promote_shape(node: Node, _reserved: &ReservedNames) -> Node {
    match node.simple_shape() {
        Some(names) => {
            let mut shape = Reshape::new();
            for name in names {
                shape.field(name, Expression::Literal(Value::Int32(1)));
            }
            Node::Project(Box::new(node), shape, IdHandling::IgnoreId)
        }
        None => node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_ir::{CmpOp, GroupOp};

    fn reserved() -> ReservedNames {
        ReservedNames::default()
    }

    #[test]
    fn map_over_project_lowers_to_map() {
        let mut shape = Reshape::new();
        shape.field("a", Expression::Field(Path::name("raw_a")));
        let project = Node::project(Node::read("c"), shape, IdHandling::IncludeId);
        let m = Node::Map(Box::new(project), JsFn::identity_map(), Scope::new());
        let finalized = finalize0(m, &reserved());
        match finalized {
            Node::Map(src, ..) => assert!(matches!(*src, Node::Read(_))),
            other => panic!("expected Map over Read, got {other:?}"),
        }
    }

    #[test]
    fn map_over_unwind_lowers_to_flatmap() {
        let unwind = Node::unwind(Node::read("c"), Path::name("tags"));
        let m = Node::Map(Box::new(unwind), JsFn::identity_map(), Scope::new());
        let finalized = finalize0(m, &reserved());
        match finalized {
            Node::FlatMap(src, ..) => assert!(matches!(*src, Node::Read(_))),
            other => panic!("expected FlatMap over Read, got {other:?}"),
        }
    }

    #[test]
    fn fold_left_wraps_head_and_appends_default_reduce() {
        let n = Node::FoldLeft(Box::new(Node::read("a")), vec![Node::read("b")]);
        let finalized = finalize0(n, &reserved());
        match finalized {
            Node::FoldLeft(head, tail) => {
                match *head {
                    Node::Project(_, shape, id) => {
                        assert_eq!(id, IdHandling::IncludeId);
                        assert!(shape.get("value").is_some());
                    }
                    other => panic!("expected wrapped Project head, got {other:?}"),
                }
                assert_eq!(tail.len(), 1);
                assert!(matches!(tail[0], Node::Reduce(..)));
            }
            other => panic!("expected FoldLeft, got {other:?}"),
        }
    }

    #[test]
    fn finish_prunes_unused_project_fields() {
        let mut shape = Reshape::new();
        shape.field("keep", Expression::Field(Path::name("a")));
        shape.field("drop", Expression::Field(Path::name("b")));
        let project = Node::project(Node::read("c"), shape, IdHandling::IncludeId);
        let matched = Node::match_(project, Selector::Cmp(Path::name("keep"), CmpOp::Eq, Value::Int32(1)));
        let finalized = finish(matched, None);
        match finalized {
            Node::Match(src, _) => match *src {
                Node::Project(_, shape, _) => {
                    assert!(shape.get("keep").is_some());
                    assert!(shape.get("drop").is_none());
                }
                other => panic!("expected Project, got {other:?}"),
            },
            other => panic!("expected Match, got {other:?}"),
        }
    }

    #[test]
    fn promote_shape_appends_project_when_shape_known() {
        let mut grouped = workflow_ir::Grouped::new();
        grouped.set("total", GroupOp::Sum(Expression::Field(Path::name("amount"))));
        let group = Node::group(Node::read("c"), grouped, Expression::Literal(Value::Null));
        let promoted = promote_shape(group, &reserved());
        match promoted {
            Node::Project(_, shape, id) => {
                assert_eq!(id, IdHandling::IgnoreId);
                assert!(shape.get("total").is_some());
                assert!(shape.get("_id").is_some());
            }
            other => panic!("expected promoted Project, got {other:?}"),
        }
    }

    #[test]
    fn promote_shape_appends_project_for_simple_map_object_literal() {
        let expr = Expression::Object(vec![
            ("a".to_string(), Expression::Field(Path::name("raw_a"))),
            ("b".to_string(), Expression::Field(Path::name("raw_b"))),
        ]);
        let m = Node::simple_map(Node::read("c"), expr, Vec::new(), Scope::new());
        let promoted = promote_shape(m, &reserved());
        match promoted {
            Node::Project(_, shape, id) => {
                assert_eq!(id, IdHandling::IgnoreId);
                assert!(shape.get("a").is_some());
                assert!(shape.get("b").is_some());
            }
            other => panic!("expected promoted Project, got {other:?}"),
        }
    }

    #[test]
    fn finalize_is_idempotent() {
        let unwind = Node::unwind(Node::read("c"), Path::name("tags"));
        let m = Node::Map(Box::new(unwind), JsFn::identity_map(), Scope::new());
        let once = finalize(m, &reserved());
        let twice = finalize(once.clone(), &reserved());
        assert_eq!(once, twice);
    }
}
