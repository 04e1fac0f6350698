use workflow_bson::Value;
use workflow_ir::{JsFn, Node, Scope, Selector, SortDir};
use workflow_path::Path;

/// How a map-reduce job's output is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutAction {
    Reduce,
    Merge,
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Out {
    /// Output is discarded / inline (the default `out: {inline: 1}` shape).
    None,
    /// Output replaces a named collection wholesale.
    Named(String),
    WithAction { collection: String, action: OutAction, non_atomic: Option<bool> },
}

/// The full shape of a map-reduce job: map/reduce functions, an
/// optional finalizer, an optional pre-filter/sort/
/// limit applied before the job runs, the scope shipped alongside,
/// and the output disposition.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceSpec {
    pub map: JsFn,
    pub reduce: Option<JsFn>,
    pub finalize: Option<JsFn>,
    pub selection: Option<Selector>,
    pub input_sort: Option<Vec<(Path, SortDir)>>,
    pub limit: Option<u64>,
    pub scope: Scope,
    pub out: Out,
}

impl MapReduceSpec {
    pub fn new(map: JsFn) -> MapReduceSpec {
        MapReduceSpec {
            map,
            reduce: None,
            finalize: None,
            selection: None,
            input_sort: None,
            limit: None,
            scope: Scope::new(),
            out: Out::None,
        }
    }

    pub fn identity() -> MapReduceSpec {
        MapReduceSpec::new(JsFn::identity_map())
    }
}

/// The executable task tree the crush pass lowers a [`Node`] into.
/// Unlike `Node`, a `WorkflowTask` has no coalesce rewriter: it is the
/// final, driver-facing shape.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowTask {
    Pure(Value),
    Read(String),
    /// A contiguous run of pipelineable stages over `source`. Each
    /// entry of `stages` is guaranteed (by construction in
    /// [`crate::crush`]) to be one of `Node`'s pipeline-stage variants
    /// — never a map-reduce stage or a composer.
    Pipeline { source: Box<WorkflowTask>, stages: Vec<Node> },
    MapReduce { source: Box<WorkflowTask>, spec: Box<MapReduceSpec> },
    FoldLeft { head: Box<WorkflowTask>, tail: Vec<WorkflowTask> },
    Join(Vec<WorkflowTask>),
}

impl WorkflowTask {
    pub fn pipeline(source: WorkflowTask, stages: Vec<Node>) -> WorkflowTask {
        WorkflowTask::Pipeline { source: Box::new(source), stages }
    }

    pub fn map_reduce(source: WorkflowTask, spec: MapReduceSpec) -> WorkflowTask {
        WorkflowTask::MapReduce { source: Box::new(source), spec: Box::new(spec) }
    }

    pub fn fold_left(head: WorkflowTask, tail: Vec<WorkflowTask>) -> WorkflowTask {
        WorkflowTask::FoldLeft { head: Box::new(head), tail }
    }
}
