use std::fmt;

use crate::leaf::Leaf;

/// A non-empty, ordered sequence of [`Leaf`]s.
///
/// Textual rendering is dot-separated regardless of whether a leaf is
/// a name or an index (`a.3.b`); the variants only matter for the
/// structural equality/coercion rules on [`Leaf`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(Vec<Leaf>);

impl Path {
    pub fn single(leaf: Leaf) -> Path {
        Path(vec![leaf])
    }

    /// Build a path from a non-empty `Vec` of leaves. Returns `None`
    /// if `leaves` is empty — a `Path` is never empty.
    pub fn from_leaves(leaves: Vec<Leaf>) -> Option<Path> {
        if leaves.is_empty() { None } else { Some(Path(leaves)) }
    }

    pub fn name(s: impl Into<String>) -> Path {
        Path::single(Leaf::name(s))
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.0
    }

    pub fn flatten(&self) -> Vec<Leaf> {
        self.0.clone()
    }

    /// Concatenation: `self \ other` (Scala `\`).
    pub fn concat(&self, other: &Path) -> Path {
        let mut leaves = self.0.clone();
        leaves.extend(other.0.iter().cloned());
        Path(leaves)
    }

    /// Extension by a list of leaves (Scala `\\`).
    pub fn extend(&self, more: impl IntoIterator<Item = Leaf>) -> Path {
        let mut leaves = self.0.clone();
        leaves.extend(more);
        Path(leaves)
    }

    /// Drop the last leaf. `None` for a single-leaf path — a path's
    /// parent is only defined when there's something left over.
    pub fn parent(&self) -> Option<Path> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Path(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn last(&self) -> &Leaf {
        self.0.last().expect("Path is never empty")
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        prefix.0.len() <= self.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// `$field.path` — a field reference.
    pub fn to_field_ref(&self) -> String {
        format!("${self}")
    }

    /// `$$variable.path` — a variable reference.
    pub fn to_variable_ref(&self) -> String {
        format!("$${self}")
    }

    /// Compile `arg.a.b[3]` etc. by projecting this path onto `arg`,
    /// the JS expression the path is rooted at.
    pub fn to_js_expr(&self, arg: &str) -> String {
        let mut out = String::from(arg);
        for leaf in &self.0 {
            leaf.write_js_suffix(&mut out);
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for leaf in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{leaf}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_flattens_associatively() {
        let a = Path::name("a");
        let b = Path::name("b");
        let c = Path::name("c");
        let left = a.concat(&b).concat(&c);
        let right = a.concat(&b.concat(&c));
        assert_eq!(left.flatten(), right.flatten());
        assert_eq!(
            a.concat(&b).flatten().len() + c.flatten().len(),
            left.flatten().len()
        );
    }

    #[test]
    fn parent_drops_last_leaf() {
        let p = Path::from_leaves(vec![Leaf::name("a"), Leaf::name("b"), Leaf::index(3)]).unwrap();
        let parent = p.parent().unwrap();
        assert_eq!(parent.to_string(), "a.b");
        assert!(parent.parent().unwrap().parent().is_none());
    }

    #[test]
    fn display_renders_dotted() {
        let p = Path::from_leaves(vec![Leaf::name("a"), Leaf::index(3), Leaf::name("b")]).unwrap();
        assert_eq!(p.to_string(), "a.3.b");
    }

    #[test]
    fn starts_with() {
        let p = Path::from_leaves(vec![Leaf::name("a"), Leaf::name("b"), Leaf::name("c")]).unwrap();
        let prefix = Path::from_leaves(vec![Leaf::name("a"), Leaf::name("b")]).unwrap();
        let not_prefix = Path::from_leaves(vec![Leaf::name("a"), Leaf::name("x")]).unwrap();
        assert!(p.starts_with(&prefix));
        assert!(!p.starts_with(&not_prefix));
        assert!(p.starts_with(&p));
    }

    #[test]
    fn field_and_variable_refs() {
        let p = Path::name("a").concat(&Path::name("b"));
        assert_eq!(p.to_field_ref(), "$a.b");
        assert_eq!(p.to_variable_ref(), "$$a.b");
    }

    #[test]
    fn js_expr_projection_uses_brackets_for_non_identifiers() {
        let p = Path::from_leaves(vec![Leaf::name("a"), Leaf::index(3), Leaf::name("weird key")])
            .unwrap();
        assert_eq!(p.to_js_expr("doc"), "doc.a[3][\"weird key\"]");
    }

    #[test]
    fn name_and_index_are_never_equal_without_coercion() {
        assert_ne!(Leaf::name("3"), Leaf::index(3));
        assert_eq!(Leaf::index(3).to_name(), Leaf::name("3"));
    }
}
