use workflow_bson::Value;
use workflow_path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A `$match` selector tree.
///
/// Shaped like a boolean expression over field comparisons — the same
/// closed set of cases a zero-copy filter parser built over raw BSON
/// would produce (`And`/`Or`/comparison/regex/exists), plus the one
/// case that forces map-reduce lowering: an arbitrary `$where`
/// JS-predicate clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Cmp(Path, CmpOp, Value),
    Regex { field: Path, pattern: String, options: String },
    Exists(Path, bool),
    /// An arbitrary JS predicate evaluated per-document; never
    /// pipelineable.
    Where(String),
}

impl Selector {
    pub fn eq(field: Path, value: Value) -> Selector {
        Selector::Cmp(field, CmpOp::Eq, value)
    }

    /// Build a `Regex` selector, validating that `pattern` is a
    /// syntactically valid regular expression before it is carried any
    /// further — the downstream database rejects a malformed pattern
    /// only at query time, which is too late to give a useful
    /// diagnostic naming the offending node.
    pub fn regex(
        field: Path,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Result<Selector, regex::Error> {
        let pattern = pattern.into();
        regex::Regex::new(&pattern)?;
        Ok(Selector::Regex { field, pattern, options: options.into() })
    }

    /// Conjoin two selectors, flattening nested `And`s so repeated
    /// `and` calls don't build up spurious nesting (coalesce rule 1
    /// relies on this to keep `Match`-after-`Match` output flat).
    pub fn and(self, other: Selector) -> Selector {
        let mut children = Vec::new();
        match self {
            Selector::And(cs) => children.extend(cs),
            other => children.push(other),
        }
        match other {
            Selector::And(cs) => children.extend(cs),
            other => children.push(other),
        }
        Selector::And(children)
    }

    /// A `Match` carrying this selector is pipelineable iff it
    /// contains no `Where` clause anywhere in its tree.
    pub fn is_pipelineable(&self) -> bool {
        match self {
            Selector::Where(_) => false,
            Selector::And(cs) | Selector::Or(cs) => cs.iter().all(Selector::is_pipelineable),
            Selector::Cmp(..) | Selector::Regex { .. } | Selector::Exists(..) => true,
        }
    }

    pub fn map_fields(&self, f: &mut impl FnMut(&Path) -> Path) -> Selector {
        match self {
            Selector::And(cs) => Selector::And(cs.iter().map(|c| c.map_fields(f)).collect()),
            Selector::Or(cs) => Selector::Or(cs.iter().map(|c| c.map_fields(f)).collect()),
            Selector::Cmp(p, op, v) => Selector::Cmp(f(p), *op, v.clone()),
            Selector::Regex { field, pattern, options } => Selector::Regex {
                field: f(field),
                pattern: pattern.clone(),
                options: options.clone(),
            },
            Selector::Exists(p, b) => Selector::Exists(f(p), *b),
            Selector::Where(js) => Selector::Where(js.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_existing_conjunctions() {
        let a = Selector::eq(Path::name("a"), Value::Int32(1));
        let b = Selector::eq(Path::name("b"), Value::Int32(2));
        let c = Selector::eq(Path::name("c"), Value::Int32(3));
        let combined = a.and(b).and(c);
        match combined {
            Selector::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected a flat And, got {other:?}"),
        }
    }

    #[test]
    fn where_clause_is_never_pipelineable() {
        let sel = Selector::eq(Path::name("a"), Value::Int32(1))
            .and(Selector::Where("this.a > 1".into()));
        assert!(!sel.is_pipelineable());
    }

    #[test]
    fn ordinary_selector_is_pipelineable() {
        let sel = Selector::eq(Path::name("a"), Value::Int32(1))
            .and(Selector::Exists(Path::name("b"), true));
        assert!(sel.is_pipelineable());
    }

    #[test]
    fn regex_rejects_invalid_pattern() {
        assert!(Selector::regex(Path::name("a"), "[unterminated", "").is_err());
        assert!(Selector::regex(Path::name("a"), "^abc$", "i").is_ok());
    }
}
