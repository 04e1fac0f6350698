use workflow_bson::Value;

/// A mapping of free JS identifiers used inside a map-reduce body to
/// the BSON values shipped alongside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope(Vec<(String, Value)>);

/// Two scopes disagree on the value bound to the same identifier.
/// Callers (map-composition coalesce rules) treat this as a
/// declinable rewrite: keep the un-composed terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeConflict(pub String);

impl Scope {
    pub fn new() -> Scope {
        Scope(Vec::new())
    }

    pub fn single(name: impl Into<String>, value: Value) -> Scope {
        Scope(vec![(name.into(), value)])
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Left-biased union that fails the moment the two scopes bind the
    /// same identifier to different values. A shared identical
    /// binding is not a conflict.
    pub fn merge(&self, other: &Scope) -> Result<Scope, ScopeConflict> {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            match out.get(k) {
                Some(existing) if existing != v => return Err(ScopeConflict(k.clone())),
                Some(_) => {}
                None => out.0.push((k.clone(), v.clone())),
            }
        }
        Ok(out)
    }
}
