//! The crush pass (component G): fold a finalized [`Node`] tree into
//! the executable [`WorkflowTask`] tree the driver understands —
//! contiguous runs of pipeline stages batched together,
//! map-reduce stages lowered to [`MapReduceSpec`]s, and composers
//! (`FoldLeft`, `Join`) carried through structurally.
//!
//! `crush` is a paramorphism in spirit: each node is folded with
//! access to its own already-crushed child. In this recursive-descent
//! form that's simply "crush the child first, then decide what to do
//! with the result" — no explicit child/crushed-child pair needs
//! threading since there's exactly one child to look at per call
//! (`FoldLeft`/`Join` aside, which crush each of their own children
//! independently).

use workflow_ir::{JsFn, Node, Scope, Selector, SortDir};
use workflow_path::Path;

use crate::error::CrushError;
use crate::task::{MapReduceSpec, WorkflowTask};

/// Lower a finalized `Node` to its task tree. Fails only on two
/// structural impossibilities: an empty `FoldLeft` tail (smart
/// constructors already refuse to build one, so this only fires on a
/// hand-assembled `Node`) and an empty `Join`.
pub fn crush(node: &Node) -> Result<WorkflowTask, CrushError> {
    match node {
        Node::Pure(v) => Ok(WorkflowTask::Pure(v.clone())),
        Node::Read(c) => Ok(WorkflowTask::Read(c.clone())),

        Node::Match(src, sel) if sel.is_pipelineable() => extend_pipeline(src, node),
        Node::Match(src, sel) => {
            let source = crush(src)?;
            let spec = MapReduceSpec {
                scope: Scope::new(),
                selection: Some(sel.clone()),
                ..MapReduceSpec::identity()
            };
            Ok(WorkflowTask::map_reduce(source, spec))
        }

        Node::Limit(src, ..)
        | Node::Skip(src, ..)
        | Node::Sort(src, ..)
        | Node::Out(src, ..)
        | Node::Project(src, ..)
        | Node::Redact(src, ..)
        | Node::Unwind(src, ..)
        | Node::Group(src, ..)
        | Node::GeoNear(src, ..) => extend_pipeline(src, node),

        Node::Map(src, f, scope) => crush_map_reduce(src, MrFunction::Map(f.clone()), scope.clone()),
        Node::FlatMap(src, f, scope) => crush_map_reduce(src, MrFunction::Map(f.clone()), scope.clone()),
        Node::Reduce(src, f, scope) => crush_map_reduce(src, MrFunction::Reduce(f.clone()), scope.clone()),
        // finalize0 eliminates SimpleMap before crush runs in the
        // normal pipeline, but a caller invoking crush directly on an
        // un-finalized tree still gets a sound (if pipeline-less)
        // lowering: treat it the same as a Map whose function ignores
        // the flatten list's multiplicity.
        Node::SimpleMap(src, _, _, scope) => {
            crush_map_reduce(src, MrFunction::Map(JsFn::identity_map()), scope.clone())
        }

        Node::FoldLeft(head, tail) => {
            if tail.is_empty() {
                return Err(CrushError::EmptyFoldLeftTail);
            }
            let head_task = crush(head)?;
            let tail_tasks = tail.iter().map(crush).collect::<Result<Vec<_>, _>>()?;
            Ok(WorkflowTask::fold_left(head_task, tail_tasks))
        }
        Node::Join(set) => {
            if set.is_empty() {
                return Err(CrushError::EmptyJoin);
            }
            let tasks = set.iter().map(crush).collect::<Result<Vec<_>, _>>()?;
            Ok(WorkflowTask::Join(tasks))
        }
    }
}

/// Distinguishes a `Map`/`FlatMap` source function (which becomes the
/// job's `map`) from a `Reduce` source function (which becomes its
/// `reduce`, riding on an identity map) without cloning `JsFn` twice
/// at every call site.
enum MrFunction {
    Map(JsFn),
    Reduce(JsFn),
}

/// Crush a map-reduce-stage node: fold its already-crushed source into
/// the new job when that source is itself a compatible, finalizer-free
/// `MapReduceTask`, or inline a short `[Match? Sort? Limit?]` pipeline
/// prefix as the job's `selection`/`inputSort`/`limit`; otherwise wrap
/// the crushed source wholesale.
fn crush_map_reduce(src: &Node, kind: MrFunction, scope: Scope) -> Result<WorkflowTask, CrushError> {
    let source_task = crush(src)?;

    if let WorkflowTask::MapReduce { source: inner_source, spec: inner_spec } = source_task {
        if inner_spec.reduce.is_none() && inner_spec.finalize.is_none() {
            if let Ok(merged_scope) = inner_spec.scope.merge(&scope) {
                let mut composed = *inner_spec;
                composed.scope = merged_scope;
                apply_kind(&mut composed, kind);
                return Ok(WorkflowTask::map_reduce(*inner_source, composed));
            }
        }
        // Scope conflict or an incompatible finalizer/reduce already
        // present: keep the inner job as an opaque source and wrap it.
        tracing::debug!("declining to compose adjacent map-reduce jobs, wrapping the inner job instead");
        let mut spec = MapReduceSpec { scope, ..MapReduceSpec::identity() };
        apply_kind(&mut spec, kind);
        let inner_task = WorkflowTask::MapReduce { source: inner_source, spec: inner_spec };
        return Ok(WorkflowTask::map_reduce(inner_task, spec));
    }

    if let WorkflowTask::Pipeline { source, stages } = source_task {
        if let Some((selection, input_sort, limit)) = inline_prefix(&stages) {
            tracing::trace!(len = stages.len(), "inlining pipeline prefix into map-reduce job spec");
            let mut spec = MapReduceSpec { scope, selection, input_sort, limit, ..MapReduceSpec::identity() };
            apply_kind(&mut spec, kind);
            return Ok(WorkflowTask::map_reduce(*source, spec));
        }
        let mut spec = MapReduceSpec { scope, ..MapReduceSpec::identity() };
        apply_kind(&mut spec, kind);
        return Ok(WorkflowTask::map_reduce(WorkflowTask::Pipeline { source, stages }, spec));
    }

    let mut spec = MapReduceSpec { scope, ..MapReduceSpec::identity() };
    apply_kind(&mut spec, kind);
    Ok(WorkflowTask::map_reduce(source_task, spec))
}

fn apply_kind(spec: &mut MapReduceSpec, kind: MrFunction) {
    match kind {
        MrFunction::Map(f) => spec.map = f,
        MrFunction::Reduce(f) => spec.reduce = Some(f),
    }
}

/// A contiguous `[Match? Sort? Limit?]` prefix — in that relative
/// order, each stage optional — can fold directly into a
/// `MapReduceSpec`'s `selection`/`inputSort`/`limit` fields instead of
/// running as its own pipeline ahead of the job. Returns `None` if
/// `stages` doesn't match that shape, or if the
/// `Match` carries a non-pipelineable (`Where`) selector — the crusher
/// would already have routed that case through the map-reduce `Match`
/// branch, not a `Pipeline` task, so it never reaches here.
fn inline_prefix(stages: &[Node]) -> Option<(Option<Selector>, Option<Vec<(Path, SortDir)>>, Option<u64>)> {
    if stages.is_empty() || stages.len() > 3 {
        return None;
    }
    let mut idx = 0;
    let selection = if let Some(Node::Match(_, sel)) = stages.get(idx) {
        idx += 1;
        Some(sel.clone())
    } else {
        None
    };
    let input_sort = if let Some(Node::Sort(_, keys)) = stages.get(idx) {
        idx += 1;
        Some(keys.clone())
    } else {
        None
    };
    let limit = if let Some(Node::Limit(_, n)) = stages.get(idx) {
        idx += 1;
        Some(*n)
    } else {
        None
    };
    if idx != stages.len() {
        return None;
    }
    Some((selection, input_sort, limit))
}

/// Append `node` (a pipeline-stage variant) to the crushed pipeline
/// task for `src`, starting a new `Pipeline` if `src` didn't already
/// crush into one.
fn extend_pipeline(src: &Node, node: &Node) -> Result<WorkflowTask, CrushError> {
    let source_task = crush(src)?;
    match source_task {
        WorkflowTask::Pipeline { source, mut stages } => {
            stages.push(node.clone());
            Ok(WorkflowTask::Pipeline { source, stages })
        }
        other => Ok(WorkflowTask::pipeline(other, vec![node.clone()])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_bson::Value;
    use workflow_ir::{CmpOp, IdHandling, Reshape};

    #[test]
    fn pure_and_read_crush_to_leaf_tasks() {
        assert_eq!(crush(&Node::pure(Value::Null)).unwrap(), WorkflowTask::Pure(Value::Null));
        assert_eq!(crush(&Node::read("c")).unwrap(), WorkflowTask::Read("c".to_string()));
    }

    #[test]
    fn adjacent_pipeline_stages_batch_into_one_pipeline_task() {
        let n = Node::limit(Node::match_(Node::read("c"), Selector::eq(Path::name("a"), Value::Int32(1))), 5);
        let task = crush(&n).unwrap();
        match task {
            WorkflowTask::Pipeline { source, stages } => {
                assert!(matches!(*source, WorkflowTask::Read(_)));
                assert_eq!(stages.len(), 2);
            }
            other => panic!("expected a single Pipeline task, got {other:?}"),
        }
    }

    #[test]
    fn where_selector_crushes_to_map_reduce_with_selection() {
        let n = Node::Match(Box::new(Node::read("c")), Selector::Where("this.a > 1".into()));
        let task = crush(&n).unwrap();
        match task {
            WorkflowTask::MapReduce { source, spec } => {
                assert!(matches!(*source, WorkflowTask::Read(_)));
                assert!(spec.reduce.is_none());
                assert!(matches!(spec.selection, Some(Selector::Where(_))));
            }
            other => panic!("expected a MapReduce task, got {other:?}"),
        }
    }

    #[test]
    fn map_over_short_pipeline_prefix_inlines_into_spec() {
        let matched = Node::match_(Node::read("c"), Selector::Cmp(Path::name("a"), CmpOp::Eq, Value::Int32(1)));
        let limited = Node::limit(matched, 10);
        let m = Node::Map(Box::new(limited), JsFn::identity_map(), Scope::new());
        let task = crush(&m).unwrap();
        match task {
            WorkflowTask::MapReduce { source, spec } => {
                assert!(matches!(*source, WorkflowTask::Read(_)));
                assert!(spec.selection.is_some());
                assert_eq!(spec.limit, Some(10));
            }
            other => panic!("expected MapReduce with inlined prefix, got {other:?}"),
        }
    }

    #[test]
    fn fold_left_crushes_each_branch_independently() {
        let n = Node::FoldLeft(
            Box::new(Node::project(Node::read("a"), Reshape::new(), IdHandling::IncludeId)),
            vec![Node::reduce(Node::read("b"), JsFn::identity_map(), Scope::new())],
        );
        let task = crush(&n).unwrap();
        match task {
            WorkflowTask::FoldLeft { head, tail } => {
                assert!(matches!(*head, WorkflowTask::Pipeline { .. }));
                assert_eq!(tail.len(), 1);
                assert!(matches!(tail[0], WorkflowTask::MapReduce { .. }));
            }
            other => panic!("expected FoldLeft task, got {other:?}"),
        }
    }

    #[test]
    fn join_over_empty_set_is_a_structural_error() {
        assert!(matches!(crush(&Node::Join(Vec::new())), Err(CrushError::EmptyJoin)));
    }
}
