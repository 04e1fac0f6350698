//! Field-path algebra (component B): non-empty leaf sequences with
//! concatenation, prefix tests, and deterministic fresh-name
//! generation.

mod leaf;
mod namegen;
mod path;

pub use leaf::Leaf;
pub use namegen::{NameGen, ReservedNames};
pub use path::Path;
