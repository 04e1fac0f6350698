use crate::value::Value;

/// An ordered mapping from field name to [`Value`].
///
/// Insertion order is significant and preserved through every
/// transformation — re-inserting an existing key updates its value
/// in place rather than moving it to the end, matching how a BSON
/// document itself never reorders on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(Vec<(String, Value)>);

impl Document {
    pub fn new() -> Self {
        Document(Vec::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        Document(Vec::with_capacity(cap))
    }

    /// Insert `value` under `key`. If `key` is already present, its
    /// value is replaced in place and the previous value returned.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.0.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Document> for bson::Document {
    fn from(doc: Document) -> Self {
        let mut out = bson::Document::new();
        for (k, v) in doc.0 {
            out.insert(k, bson::Bson::from(v));
        }
        out
    }
}

impl From<bson::Document> for Document {
    fn from(doc: bson::Document) -> Self {
        doc.into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()
    }
}
