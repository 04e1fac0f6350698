use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use workflow_bson::Value;
use workflow_compiler::{compile, compile_merged};
use workflow_ir::{CmpOp, Expression, GroupOp, Grouped, IdHandling, JsFn, Node, Reshape, Scope, Selector};
use workflow_path::{Path, ReservedNames};

// ── Helpers ────────────────────────────────────────────────────

fn scan() -> Node {
    Node::read("users")
}

fn matched(src: Node) -> Node {
    Node::match_(src, Selector::Cmp(Path::name("status"), CmpOp::Eq, Value::Text("active".into())))
}

fn projected(src: Node) -> Node {
    let mut shape = Reshape::new();
    shape.field("name", Expression::Field(Path::name("name")));
    shape.field("age", Expression::Field(Path::name("age")));
    Node::project(src, shape, IdHandling::IncludeId)
}

fn grouped_by_status(src: Node) -> Node {
    let mut grouped = Grouped::new();
    grouped.set("total", GroupOp::Sum(Expression::Literal(Value::Int32(1))));
    Node::group(src, grouped, Expression::Field(Path::name("status")))
}

fn mapped(src: Node) -> Node {
    Node::map(src, JsFn::identity_map(), Scope::new())
}

// ── Benchmarks ─────────────────────────────────────────────────

fn bench_compile_pipeline_chain(c: &mut Criterion) {
    c.bench_function("compile/pipeline_chain", |b| {
        b.iter_batched(
            || Node::limit(projected(matched(scan())), 10),
            |node| compile(node, &ReservedNames::default()).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_compile_group_promotes_shape(c: &mut Criterion) {
    c.bench_function("compile/group_promotes_shape", |b| {
        b.iter_batched(
            || grouped_by_status(matched(scan())),
            |node| compile(node, &ReservedNames::default()).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_compile_map_over_project_lowers(c: &mut Criterion) {
    c.bench_function("compile/map_over_project_lowers", |b| {
        b.iter_batched(
            || mapped(projected(matched(scan()))),
            |node| compile(node, &ReservedNames::default()).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_merge_identical_sources(c: &mut Criterion) {
    c.bench_function("merge/identical_sources", |b| {
        b.iter_batched(
            || {
                let reserved = ReservedNames::default();
                (matched(scan()), matched(scan()), reserved)
            },
            |(l, r, reserved)| compile_merged(&l, &r, &reserved),
            BatchSize::SmallInput,
        );
    });
}

fn bench_merge_projects_over_common_source(c: &mut Criterion) {
    c.bench_function("merge/projects_over_common_source", |b| {
        b.iter_batched(
            || {
                let reserved = ReservedNames::default();
                let l = projected(matched(scan()));
                let r = grouped_by_status(matched(scan()));
                (l, r, reserved)
            },
            |(l, r, reserved)| compile_merged(&l, &r, &reserved),
            BatchSize::SmallInput,
        );
    });
}

fn bench_merge_incompatible_branches_falls_back(c: &mut Criterion) {
    c.bench_function("merge/incompatible_branches_fall_back", |b| {
        b.iter_batched(
            || {
                let reserved = ReservedNames::default();
                let l = Node::reduce(Node::read("a"), JsFn::identity_map(), Scope::new());
                let r = mapped(Node::read("b"));
                (l, r, reserved)
            },
            |(l, r, reserved)| compile_merged(&l, &r, &reserved),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_compile_pipeline_chain,
    bench_compile_group_promotes_shape,
    bench_compile_map_over_project_lowers,
    bench_merge_identical_sources,
    bench_merge_projects_over_common_source,
    bench_merge_incompatible_branches_falls_back,
);
criterion_main!(benches);
