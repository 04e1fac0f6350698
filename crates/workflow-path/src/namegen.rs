use std::collections::HashSet;

/// Reserved-name configuration threaded through [`NameGen`] and the
/// merge/finalize/crush passes, so a caller embedding this compiler
/// can steer clear of its own field names instead of hardcoding the
/// `__sd_tmp_` prefix everywhere.
#[derive(Debug, Clone)]
pub struct ReservedNames {
    pub tmp_prefix: String,
    pub expr_label: String,
    pub id_label: String,
}

impl Default for ReservedNames {
    fn default() -> Self {
        ReservedNames {
            tmp_prefix: "__sd_tmp_".to_string(),
            expr_label: "value".to_string(),
            id_label: "_id".to_string(),
        }
    }
}

/// Deterministic fresh-name/fresh-index generator.
///
/// Produces the infinite lazy sequences `__sd_tmp_0, __sd_tmp_1, …`
/// and `0, 1, …`, filtering out any name/index in the caller-supplied
/// collision set. Determinism given the same starting counter and
/// collision set is required — tests pin exact output.
#[derive(Debug, Clone)]
pub struct NameGen {
    counter: u64,
    index_counter: i64,
    prefix: String,
}

impl NameGen {
    pub fn new() -> Self {
        NameGen::with_prefix("__sd_tmp_")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        NameGen {
            counter: 0,
            index_counter: 0,
            prefix: prefix.into(),
        }
    }

    pub fn from_reserved(reserved: &ReservedNames) -> Self {
        NameGen::with_prefix(reserved.tmp_prefix.clone())
    }

    /// Number of names handed out so far (tests pin this).
    pub fn calls(&self) -> u64 {
        self.counter
    }

    pub fn fresh_name(&mut self, avoid: &HashSet<String>) -> String {
        loop {
            let candidate = format!("{}{}", self.prefix, self.counter);
            self.counter += 1;
            if !avoid.contains(&candidate) {
                return candidate;
            }
        }
    }

    pub fn fresh_names(&mut self, n: usize, avoid: &HashSet<String>) -> Vec<String> {
        let mut seen: HashSet<String> = avoid.clone();
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let name = self.fresh_name(&seen);
            seen.insert(name.clone());
            out.push(name);
        }
        out
    }

    pub fn fresh_index(&mut self, avoid: &HashSet<i64>) -> i64 {
        loop {
            let candidate = self.index_counter;
            self.index_counter += 1;
            if !avoid.contains(&candidate) {
                return candidate;
            }
        }
    }
}

impl Default for NameGen {
    fn default() -> Self {
        NameGen::new()
    }
}
