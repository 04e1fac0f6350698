//! The merge planner (component E), finalize pass (component F), and
//! crush pass (component G): the three passes that take workflow terms
//! built with `workflow-ir`'s smart constructors and turn them into an
//! executable task tree.
//!
//! A full compile runs them in sequence — `merge` to unify branches
//! that feed a common consumer, `finalize` to normalize the result into
//! its final shape, `crush` to fold it into a [`WorkflowTask`] — but
//! each stands on its own and can be invoked directly by a caller that
//! has already done part of the work.

mod crush;
mod error;
mod finalize;
mod merge;
mod serialize;
mod task;

pub use crush::crush;
pub use error::CrushError;
pub use finalize::{finalize, finalize0};
pub use merge::merge;
pub use serialize::{cmp_op_str, expression_to_bson, expression_to_js, reshape_to_bson, selector_to_bson, stage_to_bson};
pub use task::{MapReduceSpec, Out, OutAction, WorkflowTask};

use workflow_ir::{DocVar, Node};
use workflow_path::{NameGen, ReservedNames};

/// Run the full pipeline over a pair of terms that feed a common
/// consumer: merge, finalize, crush.
pub fn compile_merged(l: &Node, r: &Node, reserved: &ReservedNames) -> (DocVar, DocVar, Result<WorkflowTask, CrushError>) {
    let mut namegen = NameGen::from_reserved(reserved);
    let (lb, rb, unified) = merge(l, r, &mut namegen, reserved);
    let finalized = finalize(unified, reserved);
    (lb, rb, crush(&finalized))
}

/// Run the full pipeline over a single already-assembled term: finalize
/// then crush, with no merge step.
pub fn compile(node: Node, reserved: &ReservedNames) -> Result<WorkflowTask, CrushError> {
    crush(&finalize(node, reserved))
}
