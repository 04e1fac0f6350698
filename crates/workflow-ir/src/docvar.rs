use workflow_path::Path;

/// "The thing downstream thinks is the document root is actually
/// located *here*" — the merge planner's and crusher's notion of a
/// base.
///
/// `Root` is the identity base: no rebasing needed, the ambient
/// document is exactly what downstream code sees. `Field(p)` says the
/// real root was relocated under `p` by some earlier `Project`/`Group`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocVar {
    Root,
    Field(Path),
}

impl DocVar {
    pub fn field(p: Path) -> DocVar {
        DocVar::Field(p)
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            DocVar::Root => None,
            DocVar::Field(p) => Some(p),
        }
    }

    /// Rebase a reference path that was relative to this base's own
    /// root onto `outer`: `outer \ self-relative-path`. Used when a
    /// stage already expressed in terms of `self` is transplanted so
    /// its ambient root becomes `outer`.
    pub fn rebase_onto(&self, outer: &DocVar) -> DocVar {
        match (self, outer) {
            (DocVar::Root, _) => outer.clone(),
            (DocVar::Field(p), DocVar::Root) => DocVar::Field(p.clone()),
            (DocVar::Field(p), DocVar::Field(o)) => DocVar::Field(o.concat(p)),
        }
    }

    /// Prefix a bare reference path `p` (relative to `self`) so it
    /// reads correctly once `self` is no longer the ambient root —
    /// the `prefixBase` helper.
    pub fn prefix_path(&self, p: &Path) -> Path {
        match self {
            DocVar::Root => p.clone(),
            DocVar::Field(base) => base.concat(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_rebase_is_identity_on_outer() {
        let outer = DocVar::field(Path::name("x"));
        assert_eq!(DocVar::Root.rebase_onto(&outer), outer);
    }

    #[test]
    fn field_rebase_onto_root_is_unchanged() {
        let base = DocVar::field(Path::name("a"));
        assert_eq!(base.rebase_onto(&DocVar::Root), base);
    }

    #[test]
    fn field_rebase_onto_field_concatenates() {
        let base = DocVar::field(Path::name("a"));
        let outer = DocVar::field(Path::name("b"));
        assert_eq!(base.rebase_onto(&outer), DocVar::field(Path::name("b").concat(&Path::name("a"))));
    }

    #[test]
    fn prefix_path_is_noop_under_root() {
        let p = Path::name("f");
        assert_eq!(DocVar::Root.prefix_path(&p), p);
    }
}
