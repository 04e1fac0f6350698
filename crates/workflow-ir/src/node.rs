use workflow_bson::Value;
use workflow_path::Path;

use crate::coalesce;
use crate::expression::Expression;
use crate::id_handling::IdHandling;
use crate::jsfn::JsFn;
use crate::reshape::Reshape;
use crate::scope::Scope;
use crate::selector::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// A single `$group` accumulator: the operator paired with the
/// expression it accumulates over.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOp {
    Sum(Expression),
    Push(Expression),
    AddToSet(Expression),
    First(Expression),
    Last(Expression),
    Max(Expression),
    Min(Expression),
    Avg(Expression),
}

impl GroupOp {
    pub fn expr(&self) -> &Expression {
        match self {
            GroupOp::Sum(e)
            | GroupOp::Push(e)
            | GroupOp::AddToSet(e)
            | GroupOp::First(e)
            | GroupOp::Last(e)
            | GroupOp::Max(e)
            | GroupOp::Min(e)
            | GroupOp::Avg(e) => e,
        }
    }

    fn map_expr(&self, new: Expression) -> GroupOp {
        match self {
            GroupOp::Sum(_) => GroupOp::Sum(new),
            GroupOp::Push(_) => GroupOp::Push(new),
            GroupOp::AddToSet(_) => GroupOp::AddToSet(new),
            GroupOp::First(_) => GroupOp::First(new),
            GroupOp::Last(_) => GroupOp::Last(new),
            GroupOp::Max(_) => GroupOp::Max(new),
            GroupOp::Min(_) => GroupOp::Min(new),
            GroupOp::Avg(_) => GroupOp::Avg(new),
        }
    }

    pub fn mongo_op_name(&self) -> &'static str {
        match self {
            GroupOp::Sum(_) => "$sum",
            GroupOp::Push(_) => "$push",
            GroupOp::AddToSet(_) => "$addToSet",
            GroupOp::First(_) => "$first",
            GroupOp::Last(_) => "$last",
            GroupOp::Max(_) => "$max",
            GroupOp::Min(_) => "$min",
            GroupOp::Avg(_) => "$avg",
        }
    }
}

/// An ordered mapping from a result field name to the accumulator
/// that fills it — the `$group` stage's non-`_id` body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouped(Vec<(String, GroupOp)>);

impl Grouped {
    pub fn new() -> Grouped {
        Grouped(Vec::new())
    }

    pub fn set(&mut self, name: impl Into<String>, op: GroupOp) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = op;
        } else {
            self.0.push((name, op));
        }
    }

    pub fn get(&self, name: &str) -> Option<&GroupOp> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupOp)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Disjoint union of two grouped maps; `None` if they share a
    /// result-field name (used by the `Group, Group` merge row).
    pub fn merge_disjoint(&self, other: &Grouped) -> Option<Grouped> {
        let mut out = self.clone();
        for (name, op) in other.iter() {
            if out.get(name).is_some() {
                return None;
            }
            out.set(name, op.clone());
        }
        Some(out)
    }

    pub fn map_refs(&self, f: &mut impl FnMut(&Path, bool) -> Path) -> Grouped {
        Grouped(
            self.0
                .iter()
                .map(|(k, op)| (k.clone(), op.map_expr(op.expr().map_refs(f))))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoNearParams {
    pub near: Value,
    pub distance_field: Path,
    pub limit: Option<u64>,
    pub max_distance: Option<f64>,
    pub query: Option<Selector>,
    pub spherical: bool,
    pub distance_multiplier: Option<f64>,
    pub include_locs: Option<Path>,
    pub unique_docs: Option<bool>,
}

/// The recursive workflow IR (component C): a closed set of node
/// variants over a `Box<Node>`/`Vec<Node>` child shape. Every smart
/// constructor finishes by running the freshly-built node through
/// [`coalesce::rewrite`] before handing it back, so a `Node` value is
/// always in local coalesce-normal-form at its own root.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // sources
    Pure(Value),
    Read(String),

    // shape-preserving pipeline stages
    Match(Box<Node>, Selector),
    Limit(Box<Node>, u64),
    Skip(Box<Node>, u64),
    Sort(Box<Node>, Vec<(Path, SortDir)>),
    Out(Box<Node>, String),

    // reshaping pipeline stages
    Project(Box<Node>, Reshape, IdHandling),
    Redact(Box<Node>, Expression),
    Unwind(Box<Node>, Path),
    Group(Box<Node>, Grouped, Expression),
    GeoNear(Box<Node>, GeoNearParams),

    // map-reduce stages
    Map(Box<Node>, JsFn, Scope),
    FlatMap(Box<Node>, JsFn, Scope),
    SimpleMap(Box<Node>, Expression, Vec<Path>, Scope),
    Reduce(Box<Node>, JsFn, Scope),

    // composers
    FoldLeft(Box<Node>, Vec<Node>),
    Join(Vec<Node>),
}

impl Node {
    pub fn pure(v: Value) -> Node {
        Node::Pure(v)
    }

    pub fn read(collection: impl Into<String>) -> Node {
        Node::Read(collection.into())
    }

    pub fn match_(src: Node, selector: Selector) -> Node {
        coalesce::rewrite(Node::Match(Box::new(src), selector))
    }

    pub fn limit(src: Node, n: u64) -> Node {
        coalesce::rewrite(Node::Limit(Box::new(src), n))
    }

    pub fn skip(src: Node, n: u64) -> Node {
        coalesce::rewrite(Node::Skip(Box::new(src), n))
    }

    pub fn sort(src: Node, keys: Vec<(Path, SortDir)>) -> Node {
        coalesce::rewrite(Node::Sort(Box::new(src), keys))
    }

    pub fn out(src: Node, collection: impl Into<String>) -> Node {
        coalesce::rewrite(Node::Out(Box::new(src), collection.into()))
    }

    pub fn project(src: Node, shape: Reshape, id: IdHandling) -> Node {
        coalesce::rewrite(Node::Project(Box::new(src), shape, id))
    }

    pub fn redact(src: Node, expr: Expression) -> Node {
        coalesce::rewrite(Node::Redact(Box::new(src), expr))
    }

    pub fn unwind(src: Node, field: Path) -> Node {
        coalesce::rewrite(Node::Unwind(Box::new(src), field))
    }

    pub fn group(src: Node, grouped: Grouped, by: Expression) -> Node {
        coalesce::rewrite(Node::Group(Box::new(src), grouped, by))
    }

    pub fn geo_near(src: Node, params: GeoNearParams) -> Node {
        coalesce::rewrite(Node::GeoNear(Box::new(src), params))
    }

    pub fn map(src: Node, f: JsFn, scope: Scope) -> Node {
        coalesce::rewrite(Node::Map(Box::new(src), f, scope))
    }

    pub fn flat_map(src: Node, f: JsFn, scope: Scope) -> Node {
        coalesce::rewrite(Node::FlatMap(Box::new(src), f, scope))
    }

    pub fn simple_map(src: Node, expr: Expression, flattens: Vec<Path>, scope: Scope) -> Node {
        coalesce::rewrite(Node::SimpleMap(Box::new(src), expr, flattens, scope))
    }

    pub fn reduce(src: Node, f: JsFn, scope: Scope) -> Node {
        coalesce::rewrite(Node::Reduce(Box::new(src), f, scope))
    }

    pub fn fold_left(head: Node, tail: Vec<Node>) -> Node {
        assert!(!tail.is_empty(), "FoldLeft requires a non-empty tail");
        coalesce::rewrite(Node::FoldLeft(Box::new(head), tail))
    }

    pub fn join(set: Vec<Node>) -> Node {
        coalesce::rewrite(Node::Join(set))
    }

    /// The immediate child this node wraps, for the single-child
    /// variants. `None` for sources, `FoldLeft`, and `Join`.
    pub fn src(&self) -> Option<&Node> {
        match self {
            Node::Pure(_) | Node::Read(_) | Node::FoldLeft(..) | Node::Join(_) => None,
            Node::Match(s, _)
            | Node::Limit(s, _)
            | Node::Skip(s, _)
            | Node::Sort(s, _)
            | Node::Out(s, _)
            | Node::Project(s, ..)
            | Node::Redact(s, _)
            | Node::Unwind(s, _)
            | Node::Group(s, ..)
            | Node::GeoNear(s, _)
            | Node::Map(s, ..)
            | Node::FlatMap(s, ..)
            | Node::SimpleMap(s, ..)
            | Node::Reduce(s, ..) => Some(s),
        }
    }

    /// `true` for the stages that are always pipelineable, and for
    /// `Match` whose selector has no `Where` clause.
    pub fn is_pipelineable_stage(&self) -> bool {
        match self {
            Node::Match(_, sel) => sel.is_pipelineable(),
            Node::Limit(..)
            | Node::Skip(..)
            | Node::Sort(..)
            | Node::Out(..)
            | Node::Project(..)
            | Node::Redact(..)
            | Node::Unwind(..)
            | Node::Group(..)
            | Node::GeoNear(..) => true,
            _ => false,
        }
    }

    pub fn is_map_reduce_stage(&self) -> bool {
        matches!(self, Node::Map(..) | Node::FlatMap(..) | Node::SimpleMap(..) | Node::Reduce(..))
    }

    /// The "known simple shape" of this node for the finalize pass's
    /// shape-promotion step: the set of field names a downstream
    /// `Project({f: Include}, IgnoreId)` could recover without
    /// changing the resulting document, or `None` if the shape isn't
    /// statically known.
    pub fn simple_shape(&self) -> Option<Vec<String>> {
        match self {
            Node::Pure(Value::Document(doc)) => Some(doc.keys().map(str::to_string).collect()),
            Node::Project(_, shape, _) => Some(shape.names()),
            Node::Group(_, grouped, _) => {
                let mut names: Vec<String> = grouped.iter().map(|(k, _)| k.to_string()).collect();
                names.push("_id".to_string());
                Some(names)
            }
            Node::SimpleMap(_, Expression::Object(fields), _, _) => {
                Some(fields.iter().map(|(k, _)| k.clone()).collect())
            }
            Node::Match(s, _)
            | Node::Limit(s, _)
            | Node::Skip(s, _)
            | Node::Sort(s, _)
            | Node::Redact(s, _) => s.simple_shape(),
            _ => None,
        }
    }

    /// Apply `f` to every field/variable reference this node's own
    /// parameters hold (not its children) — used both to rebase a
    /// transplanted stage (`prefix_base`) and to substitute renamed
    /// references during inlining.
    pub fn rewrite_refs(&self, f: &mut impl FnMut(&Path, bool) -> Path) -> Node {
        let mut field_only = |p: &Path| f(p, false);
        match self {
            Node::Pure(v) => Node::Pure(v.clone()),
            Node::Read(c) => Node::Read(c.clone()),
            Node::Match(s, sel) => Node::Match(s.clone(), sel.map_fields(&mut field_only)),
            Node::Limit(s, n) => Node::Limit(s.clone(), *n),
            Node::Skip(s, n) => Node::Skip(s.clone(), *n),
            Node::Sort(s, keys) => Node::Sort(
                s.clone(),
                keys.iter().map(|(p, d)| (field_only(p), *d)).collect(),
            ),
            Node::Out(s, c) => Node::Out(s.clone(), c.clone()),
            Node::Project(s, shape, id) => {
                Node::Project(s.clone(), rewrite_reshape_refs(shape, f), *id)
            }
            Node::Redact(s, expr) => Node::Redact(s.clone(), expr.map_refs(f)),
            Node::Unwind(s, field) => Node::Unwind(s.clone(), field_only(field)),
            Node::Group(s, grouped, by) => Node::Group(s.clone(), grouped.map_refs(f), by.map_refs(f)),
            Node::GeoNear(s, params) => Node::GeoNear(
                s.clone(),
                GeoNearParams {
                    near: params.near.clone(),
                    distance_field: field_only(&params.distance_field),
                    limit: params.limit,
                    max_distance: params.max_distance,
                    query: params.query.as_ref().map(|q| q.map_fields(&mut field_only)),
                    spherical: params.spherical,
                    distance_multiplier: params.distance_multiplier,
                    include_locs: params.include_locs.as_ref().map(&mut field_only),
                    unique_docs: params.unique_docs,
                },
            ),
            Node::Map(s, fun, scope) => Node::Map(s.clone(), fun.clone(), scope.clone()),
            Node::FlatMap(s, fun, scope) => Node::FlatMap(s.clone(), fun.clone(), scope.clone()),
            Node::SimpleMap(s, expr, flattens, scope) => Node::SimpleMap(
                s.clone(),
                expr.map_refs(f),
                flattens.iter().map(&mut field_only).collect(),
                scope.clone(),
            ),
            Node::Reduce(s, fun, scope) => Node::Reduce(s.clone(), fun.clone(), scope.clone()),
            Node::FoldLeft(h, t) => Node::FoldLeft(h.clone(), t.clone()),
            Node::Join(set) => Node::Join(set.clone()),
        }
    }
}

fn rewrite_reshape_refs(
    shape: &Reshape,
    f: &mut impl FnMut(&Path, bool) -> Path,
) -> Reshape {
    use crate::reshape::ReshapeValue;
    let mut out = Reshape::new();
    for (name, value) in shape.iter() {
        let rewritten = match value {
            ReshapeValue::Expr(e) => ReshapeValue::Expr(e.map_refs(f)),
            ReshapeValue::Nested(n) => ReshapeValue::Nested(rewrite_reshape_refs(n, f)),
        };
        out.set(name, rewritten);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::CmpOp;

    #[test]
    fn src_returns_none_for_sources_and_composers() {
        assert!(Node::pure(Value::Null).src().is_none());
        assert!(Node::read("c").src().is_none());
    }

    #[test]
    fn simple_shape_known_for_project_and_group() {
        let p = Node::project(Node::read("c"), Reshape::new(), IdHandling::IgnoreId);
        assert_eq!(p.simple_shape(), Some(vec![]));
    }

    #[test]
    fn match_selector_pipelineable_unless_where() {
        let ok = Node::match_(
            Node::read("c"),
            Selector::Cmp(Path::name("a"), CmpOp::Eq, Value::Int32(1)),
        );
        assert!(ok.is_pipelineable_stage());

        let where_sel = Node::Match(Box::new(Node::read("c")), Selector::Where("true".into()));
        assert!(!where_sel.is_pipelineable_stage());
    }
}
