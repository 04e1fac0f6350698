//! Rendering of a pipeline-stage [`Node`] to its one-key-per-stage
//! BSON wire form: `{"$match": {...}}`, `{"$project": {...}}`, and so
//! on.

use bson::{Bson, Document, doc};
use workflow_ir::{Expression, GeoNearParams, IdHandling, Node, Reshape, ReshapeValue, Selector, SortDir};
use workflow_path::Path;

pub fn expression_to_bson(expr: &Expression) -> Bson {
    match expr {
        Expression::Literal(v) => Bson::from(v.clone()),
        Expression::Field(p) => Bson::String(p.to_field_ref()),
        Expression::Var(p) => Bson::String(p.to_variable_ref()),
        Expression::Op(name, args) => {
            let value = if args.len() == 1 {
                expression_to_bson(&args[0])
            } else {
                Bson::Array(args.iter().map(expression_to_bson).collect())
            };
            let mut d = Document::new();
            d.insert(name.clone(), value);
            Bson::Document(d)
        }
        Expression::Object(fields) => {
            let mut d = Document::new();
            for (name, value) in fields {
                d.insert(name.clone(), expression_to_bson(value));
            }
            Bson::Document(d)
        }
    }
}

/// Render an `Expression` as a JS expression rooted at `root` — the
/// identifier a synthesized map-reduce function binds the current
/// document to. Operator application has no evaluator behind it here;
/// a call form (`$multiply(a, b)`) is enough to carry the right shape
/// into a generated function body.
pub fn expression_to_js(expr: &Expression, root: &str) -> String {
    match expr {
        Expression::Literal(v) => v.to_js_expr(),
        Expression::Field(p) | Expression::Var(p) => p.to_js_expr(root),
        Expression::Op(name, args) => {
            let args_js = args.iter().map(|a| expression_to_js(a, root)).collect::<Vec<_>>().join(", ");
            format!("{name}({args_js})")
        }
        Expression::Object(fields) => {
            let body = fields
                .iter()
                .map(|(k, v)| format!("{}: {}", js_key(k), expression_to_js(v, root)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {body} }}")
        }
    }
}

fn js_key(k: &str) -> String {
    format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn reshape_to_bson(shape: &Reshape) -> Document {
    let mut doc = Document::new();
    for (name, value) in shape.iter() {
        let bson_value = match value {
            ReshapeValue::Expr(e) => expression_to_bson(e),
            ReshapeValue::Nested(n) => Bson::Document(reshape_to_bson(n)),
        };
        doc.insert(name.to_string(), bson_value);
    }
    doc
}

fn project_doc(shape: &Reshape, id: IdHandling) -> Document {
    let mut doc = Document::new();
    if id == IdHandling::ExcludeId {
        doc.insert("_id", false);
    }
    for (k, v) in reshape_to_bson(shape) {
        doc.insert(k, v);
    }
    doc
}

pub fn cmp_op_str(op: workflow_ir::CmpOp) -> &'static str {
    use workflow_ir::CmpOp::*;
    match op {
        Eq => "$eq",
        Gt => "$gt",
        Gte => "$gte",
        Lt => "$lt",
        Lte => "$lte",
    }
}

pub fn selector_to_bson(sel: &Selector) -> Document {
    let mut doc = Document::new();
    match sel {
        Selector::And(children) => {
            let arr = children.iter().map(|c| Bson::Document(selector_to_bson(c))).collect::<Vec<_>>();
            doc.insert("$and", arr);
        }
        Selector::Or(children) => {
            let arr = children.iter().map(|c| Bson::Document(selector_to_bson(c))).collect::<Vec<_>>();
            doc.insert("$or", arr);
        }
        Selector::Cmp(field, workflow_ir::CmpOp::Eq, value) => {
            doc.insert(field.to_string(), Bson::from(value.clone()));
        }
        Selector::Cmp(field, op, value) => {
            let mut inner = Document::new();
            inner.insert(cmp_op_str(*op), Bson::from(value.clone()));
            doc.insert(field.to_string(), inner);
        }
        Selector::Regex { field, pattern, options } => {
            let mut inner = Document::new();
            inner.insert("$regex", pattern.clone());
            inner.insert("$options", options.clone());
            doc.insert(field.to_string(), inner);
        }
        Selector::Exists(field, present) => {
            let mut inner = Document::new();
            inner.insert("$exists", *present);
            doc.insert(field.to_string(), inner);
        }
        Selector::Where(js) => {
            doc.insert("$where", js.clone());
        }
    }
    doc
}

fn sort_doc(keys: &[(Path, SortDir)]) -> Document {
    let mut doc = Document::new();
    for (path, dir) in keys {
        doc.insert(path.to_string(), if *dir == SortDir::Asc { 1 } else { -1 });
    }
    doc
}

fn group_doc(grouped: &workflow_ir::Grouped, by: &Expression) -> Document {
    let mut doc = Document::new();
    doc.insert("_id", expression_to_bson(by));
    for (name, op) in grouped.iter() {
        let mut inner = Document::new();
        inner.insert(op.mongo_op_name(), expression_to_bson(op.expr()));
        doc.insert(name.to_string(), inner);
    }
    doc
}

fn geo_near_doc(params: &GeoNearParams) -> Document {
    let mut doc = Document::new();
    doc.insert("near", Bson::from(params.near.clone()));
    doc.insert("distanceField", params.distance_field.to_string());
    if let Some(limit) = params.limit {
        doc.insert("limit", limit as i64);
    }
    if let Some(max_distance) = params.max_distance {
        doc.insert("maxDistance", max_distance);
    }
    if let Some(query) = &params.query {
        doc.insert("query", Bson::Document(selector_to_bson(query)));
    }
    doc.insert("spherical", params.spherical);
    if let Some(mult) = params.distance_multiplier {
        doc.insert("distanceMultiplier", mult);
    }
    if let Some(locs) = &params.include_locs {
        doc.insert("includeLocs", locs.to_string());
    }
    if let Some(unique) = params.unique_docs {
        doc.insert("uniqueDocs", unique);
    }
    doc
}

/// Render one pipeline-representable `Node` variant as its one-key
/// stage document. Panics on a variant that isn't itself a pipeline
/// stage (map-reduce variants and composers never reach this
/// function — [`crate::crush`] only hands it nodes it has already
/// classified pipelineable).
pub fn stage_to_bson(node: &Node) -> Document {
    match node {
        Node::Match(_, sel) => doc! { "$match": selector_to_bson(sel) },
        Node::Limit(_, n) => doc! { "$limit": *n as i64 },
        Node::Skip(_, n) => doc! { "$skip": *n as i64 },
        Node::Sort(_, keys) => doc! { "$sort": sort_doc(keys) },
        Node::Out(_, collection) => doc! { "$out": collection.clone() },
        Node::Project(_, shape, id) => doc! { "$project": project_doc(shape, *id) },
        Node::Redact(_, expr) => doc! { "$redact": expression_to_bson(expr) },
        Node::Unwind(_, field) => doc! { "$unwind": field.to_field_ref() },
        Node::Group(_, grouped, by) => doc! { "$group": group_doc(grouped, by) },
        Node::GeoNear(_, params) => doc! { "$geoNear": geo_near_doc(params) },
        other => panic!("stage_to_bson called on a non-pipeline node: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_bson::Value;

    #[test]
    fn match_eq_renders_bare_field_value() {
        let sel = Selector::eq(Path::name("a"), Value::Int32(1));
        assert_eq!(selector_to_bson(&sel), doc! { "a": 1 });
    }

    #[test]
    fn geo_near_field_order_is_fixed() {
        let params = GeoNearParams {
            near: Value::Array(vec![Value::Double(1.0), Value::Double(2.0)]),
            distance_field: Path::name("dist"),
            limit: Some(10),
            max_distance: Some(5.0),
            query: None,
            spherical: true,
            distance_multiplier: None,
            include_locs: None,
            unique_docs: Some(true),
        };
        let doc = geo_near_doc(&params);
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["near", "distanceField", "limit", "maxDistance", "spherical", "uniqueDocs"]);
    }

    #[test]
    fn project_exclude_id_inserts_false() {
        let mut shape = Reshape::new();
        shape.field("a", Expression::Field(Path::name("a")));
        let doc = project_doc(&shape, IdHandling::ExcludeId);
        assert_eq!(doc.get_bool("_id"), Ok(false));
    }

    #[test]
    fn expression_to_js_renders_field_refs_and_calls() {
        let expr = Expression::Op(
            "$multiply".to_string(),
            vec![Expression::Field(Path::name("a")), Expression::Literal(Value::Int32(2))],
        );
        assert_eq!(expression_to_js(&expr, "value"), "$multiply(value.a, NumberInt(2))");
    }
}
