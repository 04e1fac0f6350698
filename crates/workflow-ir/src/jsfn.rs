/// A synthesized JS function. Only the shape needed by the compiler's
/// own templates is modeled here — the body is opaque text, never
/// parsed or executed. The AST that would otherwise back `body` lives
/// entirely on the other side of this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsFn {
    pub params: Vec<String>,
    pub body: String,
}

impl JsFn {
    pub fn new(params: impl IntoIterator<Item = impl Into<String>>, body: impl Into<String>) -> JsFn {
        JsFn {
            params: params.into_iter().map(Into::into).collect(),
            body: body.into(),
        }
    }

    pub fn identity_map() -> JsFn {
        JsFn::new(["key", "value"], "emit(key, value);")
    }

    pub fn to_source(&self) -> String {
        format!("function({}) {{ {} }}", self.params.join(", "), self.body)
    }

    /// `Map ∘ Map`: apply `self` after `inner`, both of arity
    /// `(key, value) -> [key', value']`.
    pub fn compose_map_map(&self, inner: &JsFn) -> JsFn {
        JsFn::new(
            ["key", "value"],
            format!(
                "return ({outer}).apply(null, ({inner}).apply(null, [key, value]));",
                outer = self.to_source(),
                inner = inner.to_source(),
            ),
        )
    }

    /// `FlatMap ∘ Map`: lift `inner`'s single result into a one-element
    /// list, then concat-map through `self`.
    pub fn compose_flatmap_map(&self, inner: &JsFn) -> JsFn {
        JsFn::new(
            ["key", "value"],
            format!(
                "var pair = ({inner}).apply(null, [key, value]); return ({outer}).apply(null, pair);",
                outer = self.to_source(),
                inner = inner.to_source(),
            ),
        )
    }

    /// `FlatMap ∘ FlatMap`: Kleisli composition over the array monad —
    /// `flatmap(self) . inner`.
    pub fn compose_flatmap_flatmap(&self, inner: &JsFn) -> JsFn {
        JsFn::new(
            ["key", "value"],
            format!(
                "var pairs = ({inner}).apply(null, [key, value]); var out = []; \
                 pairs.forEach(function(p) {{ out = out.concat(({outer}).apply(null, p)); }}); \
                 return out;",
                outer = self.to_source(),
                inner = inner.to_source(),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_map_map_wraps_both_functions() {
        let f = JsFn::new(["key", "value"], "return [key, value + 1];");
        let g = JsFn::new(["key", "value"], "return [key, value * 2];");
        let composed = f.compose_map_map(&g);
        assert_eq!(composed.params, vec!["key", "value"]);
        assert!(composed.body.contains("value + 1"));
        assert!(composed.body.contains("value * 2"));
    }
}
