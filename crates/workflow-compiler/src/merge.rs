//! The merge planner (component E): given two workflow terms that must
//! feed a common downstream consumer, produce one unified term plus a
//! pair of bases telling the caller where each input's original root
//! document ended up.

use std::collections::HashSet;

use workflow_bson::Value;
use workflow_ir::{
    Expression, GeoNearParams, GroupOp, Grouped, IdHandling, Node, Reshape, ReshapeValue, Scope,
};
use workflow_path::{NameGen, Path, ReservedNames};

use workflow_ir::DocVar;

fn docvar_to_expr(dv: &DocVar) -> Expression {
    match dv {
        DocVar::Root => Expression::root(),
        DocVar::Field(p) => Expression::Field(p.clone()),
    }
}

/// Rebase every plain field reference a stage holds through `base`,
/// leaving variable references (`$$ROOT` and friends) untouched — the
/// `prefixBase` helper used to transplant a stage onto a merged source.
fn rebase_closure(base: DocVar) -> impl FnMut(&Path, bool) -> Path {
    move |p, is_var| if is_var { p.clone() } else { base.prefix_path(p) }
}

// `reserved` doesn't feed name generation directly: the caller is
// expected to have built `namegen` with `NameGen::from_reserved`
// already, so its prefix is set once for the whole merge. It's threaded
// through here (and most of this module's other functions) only
// because `reparent_shape_preserving` and friends recurse into `merge`
// itself, which needs it for nested `fresh_pair` calls deeper in the
// tree.
fn fresh_pair(namegen: &mut NameGen, _reserved: &ReservedNames) -> (String, String) {
    let names = namegen.fresh_names(2, &HashSet::new());
    (names[0].clone(), names[1].clone())
}

/// Produce a unified workflow for `l` and `r`, plus the bases at which
/// each input's original root document can be found in the result.
/// Always succeeds: when no structural pattern applies, falls back to
/// a `FoldLeft` of independent projections.
pub fn merge(l: &Node, r: &Node, namegen: &mut NameGen, reserved: &ReservedNames) -> (DocVar, DocVar, Node) {
    if let Some(result) = try_merge(l, r, namegen, reserved) {
        return result;
    }
    if let Some((rb, lb, node)) = try_merge(r, l, namegen, reserved) {
        return (lb, rb, node);
    }
    tracing::debug!("no structural merge pattern applies, falling back to FoldLeft");
    fallback_fold_left(l, r, namegen, reserved)
}

fn try_merge(
    l: &Node,
    r: &Node,
    namegen: &mut NameGen,
    reserved: &ReservedNames,
) -> Option<(DocVar, DocVar, Node)> {
    if l == r {
        return Some((DocVar::Root, DocVar::Root, l.clone()));
    }

    match (l, r) {
        (Node::Pure(a), Node::Pure(b)) => {
            let (ln, rn) = fresh_pair(namegen, reserved);
            let unified = Node::pure(Value::doc([(ln.clone(), a.clone()), (rn.clone(), b.clone())]));
            Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
        }

        (Node::Pure(a), _) => {
            let (ln, rn) = fresh_pair(namegen, reserved);
            let mut shape = Reshape::new();
            shape.field(&ln, Expression::Literal(a.clone()));
            shape.field(&rn, Expression::root());
            let unified = Node::project(r.clone(), shape, IdHandling::IncludeId);
            Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
        }

        // Project, Project: merge sources first, then reconcile shapes.
        (Node::Project(lsrc, lshape, lid), Node::Project(rsrc, rshape, rid)) => {
            let (lb, rb, unified_src) = merge(lsrc, rsrc, namegen, reserved);
            let lshape = rebase_reshape(lshape, &lb);
            let rshape = rebase_reshape(rshape, &rb);
            let merged_id = lid.merge(*rid);
            if let Some(merged_shape) = lshape.merge_disjoint(&rshape) {
                let unified = Node::project(unified_src, merged_shape, merged_id);
                Some((DocVar::Root, DocVar::Root, unified))
            } else {
                tracing::debug!("project shapes share a field name, nesting under fresh names instead");
                let (ln, rn) = fresh_pair(namegen, reserved);
                let mut shape = Reshape::new();
                shape.set(&ln, ReshapeValue::Nested(lshape));
                shape.set(&rn, ReshapeValue::Nested(rshape));
                let unified = Node::project(unified_src, shape, IdHandling::IncludeId);
                Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
            }
        }

        // Project, <anything with its own `src`>: merge the project's
        // source with the other branch, then wrap both as nested
        // fields of a fresh top-level projection.
        (Node::Project(lsrc, lshape, _lid), _) if r.src().is_some() || matches!(r, Node::Pure(_) | Node::Read(_)) => {
            let (lb, rb, unified_src) = merge(lsrc, r, namegen, reserved);
            let lshape = rebase_reshape(lshape, &lb);
            let (ln, rn) = fresh_pair(namegen, reserved);
            let mut shape = Reshape::new();
            shape.set(&ln, ReshapeValue::Nested(lshape));
            shape.field(&rn, docvar_to_expr(&rb));
            let unified = Node::project(unified_src, shape, IdHandling::IncludeId);
            Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
        }

        // A shape-preserving stage on the left reparents over the
        // merged source; its own base tracks the (possibly rebased)
        // left base, the right base is untouched. `Redact` isn't part
        // of this group: it evaluates recursively through every
        // subdocument of whatever it's given, so reparenting it over
        // an arbitrary `r`'s merged structure would also prune/descend
        // into `r`'s data, not just `l`'s own subtree the way these
        // single top-level operations safely can.
        (Node::Match(ls, sel), _) => reparent_shape_preserving(ls, r, namegen, reserved, |src, base| {
            let mut f = rebase_closure(base);
            Node::match_(src, sel.map_fields(&mut |p| f(p, false)))
        }),
        (Node::Limit(ls, n), _) => {
            reparent_shape_preserving(ls, r, namegen, reserved, |src, _base| Node::limit(src, *n))
        }
        (Node::Skip(ls, n), _) => {
            reparent_shape_preserving(ls, r, namegen, reserved, |src, _base| Node::skip(src, *n))
        }
        (Node::Sort(ls, keys), _) => reparent_shape_preserving(ls, r, namegen, reserved, |src, base| {
            let mut f = rebase_closure(base);
            Node::sort(src, keys.iter().map(|(p, d)| (f(p, false), *d)).collect())
        }),
        (Node::GeoNear(ls, params), _) => {
            reparent_shape_preserving(ls, r, namegen, reserved, |src, base| {
                let mut f = rebase_closure(base);
                let rebased = GeoNearParams {
                    near: params.near.clone(),
                    distance_field: f(&params.distance_field, false),
                    limit: params.limit,
                    max_distance: params.max_distance,
                    query: params.query.as_ref().map(|q| q.map_fields(&mut |p| f(p, false))),
                    spherical: params.spherical,
                    distance_multiplier: params.distance_multiplier,
                    include_locs: params.include_locs.as_ref().map(|p| f(p, false)),
                    unique_docs: params.unique_docs,
                };
                Node::geo_near(src, rebased)
            })
        }

        // Group, Group on an equal `by`: merge the grouped maps when
        // their result-field names are disjoint; otherwise run both
        // under fresh accumulator keys in one Group and project each
        // side's original names back out under lName/rName.
        (Node::Group(lsrc, lgrouped, lby), Node::Group(rsrc, rgrouped, rby)) if lby == rby => {
            let (lb, rb, unified_src) = merge(lsrc, rsrc, namegen, reserved);
            let lgrouped = lgrouped.map_refs(&mut rebase_closure(lb.clone()));
            let rgrouped = rgrouped.map_refs(&mut rebase_closure(rb));
            let by = lby.map_refs(&mut rebase_closure(lb));
            if let Some(merged) = lgrouped.merge_disjoint(&rgrouped) {
                let unified = Node::group(unified_src, merged, by);
                Some((DocVar::Root, DocVar::Root, unified))
            } else {
                tracing::debug!("group accumulator names collide, renaming both sides under fresh keys");
                let l_fields: Vec<(String, GroupOp)> =
                    lgrouped.iter().map(|(k, op)| (k.to_string(), op.clone())).collect();
                let r_fields: Vec<(String, GroupOp)> =
                    rgrouped.iter().map(|(k, op)| (k.to_string(), op.clone())).collect();
                let fresh = namegen.fresh_names(l_fields.len() + r_fields.len(), &HashSet::new());
                let mut combined = Grouped::new();
                let mut l_shape = Reshape::new();
                l_shape.field("_id", Expression::Field(Path::name("_id")));
                let mut r_shape = Reshape::new();
                r_shape.field("_id", Expression::Field(Path::name("_id")));
                let mut fresh_iter = fresh.into_iter();
                for (name, op) in l_fields {
                    let fresh_key = fresh_iter.next().expect("one fresh key per field");
                    l_shape.field(&name, Expression::Field(Path::name(&fresh_key)));
                    combined.set(fresh_key, op);
                }
                for (name, op) in r_fields {
                    let fresh_key = fresh_iter.next().expect("one fresh key per field");
                    r_shape.field(&name, Expression::Field(Path::name(&fresh_key)));
                    combined.set(fresh_key, op);
                }
                let grouped_node = Node::group(unified_src, combined, by);
                let (ln, rn) = fresh_pair(namegen, reserved);
                let mut outer = Reshape::new();
                outer.set(&ln, ReshapeValue::Nested(l_shape));
                outer.set(&rn, ReshapeValue::Nested(r_shape));
                let unified = Node::project(grouped_node, outer, IdHandling::IgnoreId);
                Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
            }
        }

        // Map, Project: map-reduce stages are opaque to source merging,
        // so just nest the project's shape under a fresh name next to
        // the map's own (whole) output.
        (Node::Map(..), Node::Project(_, rshape, _)) => {
            let (ln, rn) = fresh_pair(namegen, reserved);
            let mut shape = Reshape::new();
            shape.field(&ln, Expression::root());
            shape.set(&rn, ReshapeValue::Nested(rshape.clone()));
            let unified = Node::project(l.clone(), shape, IdHandling::IncludeId);
            Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
        }

        // Unwind, Unwind on the same field: one Unwind suffices.
        (Node::Unwind(ls, lfield), Node::Unwind(rs, rfield)) if lfield == rfield => {
            let (lb, rb, unified_src) = merge(ls, rs, namegen, reserved);
            let unified = Node::unwind(unified_src, lb.prefix_path(lfield));
            Some((lb, rb, unified))
        }

        (Node::Unwind(ls, field), _) => {
            let (lb, rb, unified_src) = merge(ls, r, namegen, reserved);
            if lb == rb {
                // Project apart first so the unwind doesn't also
                // explode the right branch's view of the document.
                let (ln, rn) = fresh_pair(namegen, reserved);
                let mut shape = Reshape::new();
                shape.field(&ln, docvar_to_expr(&lb));
                shape.field(&rn, docvar_to_expr(&rb));
                let projected = Node::project(unified_src, shape, IdHandling::IncludeId);
                let new_lb = DocVar::field(Path::name(&ln));
                let unified = Node::unwind(projected, new_lb.prefix_path(field));
                Some((new_lb, DocVar::field(Path::name(rn)), unified))
            } else {
                let unified = Node::unwind(unified_src, lb.prefix_path(field));
                Some((lb, rb, unified))
            }
        }

        // Two flatten-free SimpleMaps combine into one that emits a
        // document with both sides under fresh names.
        (
            Node::SimpleMap(ls, lexpr, lflat, lscope),
            Node::SimpleMap(rs, rexpr, rflat, rscope),
        ) if lflat.is_empty() && rflat.is_empty() => {
            let merged_scope = match lscope.merge(rscope) {
                Ok(s) => s,
                Err(_) => {
                    tracing::debug!("SimpleMap scopes conflict, declining the merge");
                    return None;
                }
            };
            let (lb, rb, unified_src) = merge(ls, rs, namegen, reserved);
            let (ln, rn) = fresh_pair(namegen, reserved);
            let combined = Expression::Object(vec![
                (ln.clone(), rebase_expr(lexpr, &lb)),
                (rn.clone(), rebase_expr(rexpr, &rb)),
            ]);
            let unified = Node::simple_map(unified_src, combined, Vec::new(), merged_scope);
            Some((DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified))
        }

        // Redact, Redact: two redacts in sequence. Merge the sources,
        // then apply both redact expressions one after the other over
        // the unified source — safe because each expression only ever
        // prunes what it was written against, rebased onto the same
        // document its own source now sits at.
        (Node::Redact(lsrc, lexpr), Node::Redact(rsrc, rexpr)) => {
            let (lb, rb, unified_src) = merge(lsrc, rsrc, namegen, reserved);
            let redacted = Node::redact(unified_src, lexpr.map_refs(&mut rebase_closure(lb.clone())));
            let redacted = Node::redact(redacted, rexpr.map_refs(&mut rebase_closure(rb.clone())));
            Some((lb, rb, redacted))
        }

        _ => None,
    }
}

fn reparent_shape_preserving(
    ls: &Node,
    r: &Node,
    namegen: &mut NameGen,
    reserved: &ReservedNames,
    rebuild: impl FnOnce(Node, DocVar) -> Node,
) -> Option<(DocVar, DocVar, Node)> {
    let (lb, rb, unified_src) = merge(ls, r, namegen, reserved);
    let new_node = rebuild(unified_src, lb.clone());
    Some((lb, rb, new_node))
}

fn rebase_reshape(shape: &Reshape, base: &DocVar) -> Reshape {
    let mut f = rebase_closure(base.clone());
    let mut out = Reshape::new();
    for (name, value) in shape.iter() {
        let rewritten = match value {
            ReshapeValue::Expr(e) => ReshapeValue::Expr(e.map_refs(&mut f)),
            ReshapeValue::Nested(n) => ReshapeValue::Nested(rebase_reshape(n, base)),
        };
        out.set(name, rewritten);
    }
    out
}

fn rebase_expr(expr: &Expression, base: &DocVar) -> Expression {
    expr.map_refs(&mut rebase_closure(base.clone()))
}

/// The universal fallback: wrap each side in its own projection under
/// a fresh name and sequence them as a `FoldLeft`. Always applicable.
fn fallback_fold_left(
    l: &Node,
    r: &Node,
    namegen: &mut NameGen,
    reserved: &ReservedNames,
) -> (DocVar, DocVar, Node) {
    let (ln, rn) = fresh_pair(namegen, reserved);
    let mut lshape = Reshape::new();
    lshape.field(&ln, Expression::root());
    let head = Node::project(l.clone(), lshape, IdHandling::IncludeId);

    let mut rshape = Reshape::new();
    rshape.field(&rn, Expression::root());
    let tail_entry = Node::project(r.clone(), rshape, IdHandling::IncludeId);

    let unified = Node::fold_left(head, vec![tail_entry]);
    (DocVar::field(Path::name(ln)), DocVar::field(Path::name(rn)), unified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_ir::{CmpOp, Selector};

    fn gen() -> NameGen {
        NameGen::new()
    }

    #[test]
    fn identical_workflows_merge_with_zero_fresh_names() {
        let w = Node::read("c");
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let (lb, rb, unified) = merge(&w, &w, &mut namegen, &reserved);
        assert_eq!(lb, DocVar::Root);
        assert_eq!(rb, DocVar::Root);
        assert_eq!(unified, w);
        assert_eq!(namegen.calls(), 0);
    }

    #[test]
    fn merge_of_two_pures_names_in_order() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let l = Node::pure(Value::doc([("x".to_string(), Value::Int32(1))]));
        let r = Node::pure(Value::doc([("y".to_string(), Value::Int32(2))]));
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert_eq!(lb, DocVar::field(Path::name("__sd_tmp_0")));
        assert_eq!(rb, DocVar::field(Path::name("__sd_tmp_1")));
        match unified {
            Node::Pure(Value::Document(doc)) => {
                assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["__sd_tmp_0", "__sd_tmp_1"]);
            }
            other => panic!("expected merged Pure document, got {other:?}"),
        }
    }

    #[test]
    fn match_reparents_over_merged_source() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let l = Node::match_(Node::read("c"), Selector::Cmp(Path::name("a"), CmpOp::Eq, Value::Int32(1)));
        let r = Node::read("c");
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert_eq!(lb, DocVar::Root);
        assert_eq!(rb, DocVar::Root);
        assert!(matches!(unified, Node::Match(..)));
    }

    #[test]
    fn disjoint_groups_merge_into_one() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let mut lgrouped = Grouped::new();
        lgrouped.set("total", GroupOp::Sum(Expression::Field(Path::name("amount"))));
        let mut rgrouped = Grouped::new();
        rgrouped.set("count", GroupOp::Sum(Expression::Literal(Value::Int32(1))));
        let by = Expression::Literal(Value::Null);
        let l = Node::group(Node::read("c"), lgrouped, by.clone());
        let r = Node::group(Node::read("c"), rgrouped, by);
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert_eq!(lb, DocVar::Root);
        assert_eq!(rb, DocVar::Root);
        match unified {
            Node::Group(_, grouped, _) => {
                assert!(grouped.get("total").is_some());
                assert!(grouped.get("count").is_some());
            }
            other => panic!("expected merged Group, got {other:?}"),
        }
    }

    #[test]
    fn colliding_groups_rename_under_fresh_keys() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let mut lgrouped = Grouped::new();
        lgrouped.set("total", GroupOp::Sum(Expression::Field(Path::name("amount"))));
        let mut rgrouped = Grouped::new();
        rgrouped.set("total", GroupOp::Sum(Expression::Field(Path::name("other"))));
        let by = Expression::Literal(Value::Null);
        let l = Node::group(Node::read("c"), lgrouped, by.clone());
        let r = Node::group(Node::read("c"), rgrouped, by);
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert!(lb.as_path().is_some());
        assert!(rb.as_path().is_some());
        match unified {
            Node::Project(src, shape, IdHandling::IgnoreId) => {
                assert!(matches!(*src, Node::Group(..)));
                assert_eq!(shape.names().len(), 2);
            }
            other => panic!("expected renaming Project over Group, got {other:?}"),
        }
    }

    #[test]
    fn map_project_nests_project_shape() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let l = Node::map(Node::read("a"), workflow_ir::JsFn::identity_map(), Scope::new());
        let mut shape = Reshape::new();
        shape.field("x", Expression::Field(Path::name("y")));
        let r = Node::project(Node::read("b"), shape, IdHandling::IgnoreId);
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert!(lb.as_path().is_some());
        assert!(rb.as_path().is_some());
        assert!(matches!(unified, Node::Project(..)));
    }

    #[test]
    fn geo_near_reparents_over_merged_source() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let params = GeoNearParams {
            near: Value::Array(vec![Value::Double(0.0), Value::Double(0.0)]),
            distance_field: Path::name("dist"),
            limit: None,
            max_distance: None,
            query: None,
            spherical: false,
            distance_multiplier: None,
            include_locs: None,
            unique_docs: None,
        };
        let l = Node::geo_near(Node::read("c"), params);
        let r = Node::read("c");
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert_eq!(lb, DocVar::Root);
        assert_eq!(rb, DocVar::Root);
        assert!(matches!(unified, Node::GeoNear(..)));
    }

    #[test]
    fn redact_after_redact_sequences_both_expressions() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let l = Node::redact(
            Node::read("c"),
            Expression::Op("$cond".to_string(), vec![Expression::Field(Path::name("a"))]),
        );
        let r = Node::redact(
            Node::read("c"),
            Expression::Op("$cond".to_string(), vec![Expression::Field(Path::name("b"))]),
        );
        let (lb, rb, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert_eq!(lb, DocVar::Root);
        assert_eq!(rb, DocVar::Root);
        match unified {
            Node::Redact(src, outer_expr) => {
                assert_eq!(outer_expr, Expression::Op("$cond".to_string(), vec![Expression::Field(Path::name("b"))]));
                assert!(matches!(*src, Node::Redact(..)));
            }
            other => panic!("expected nested Redact, got {other:?}"),
        }
    }

    #[test]
    fn redact_against_non_redact_falls_back_to_fold_left() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let l = Node::redact(Node::read("c"), Expression::Field(Path::name("a")));
        let r = Node::read("d");
        let (_, _, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert!(matches!(unified, Node::FoldLeft(..)));
    }

    #[test]
    fn unsupported_pair_falls_back_to_fold_left() {
        let mut namegen = gen();
        let reserved = ReservedNames::default();
        let l = Node::reduce(Node::read("a"), workflow_ir::JsFn::identity_map(), Scope::new());
        let r = Node::map(Node::read("b"), workflow_ir::JsFn::identity_map(), Scope::new());
        let (_, _, unified) = merge(&l, &r, &mut namegen, &reserved);
        assert!(matches!(unified, Node::FoldLeft(..)));
    }
}
