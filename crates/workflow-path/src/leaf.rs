use std::fmt;

/// One segment of a [`crate::Path`]: either a document field name or an
/// array index.
///
/// `Name("3")` and `Index(3)` are never equal by derived `PartialEq` —
/// names compare only with names, indices only with indices. The one
/// sanctioned bridge is [`Leaf::to_name`], an explicit one-directional
/// coercion used by callers that need to treat an index leaf as a
/// field name (e.g. when rendering a path into a `$group` key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Leaf {
    Name(String),
    Index(i64),
}

impl Leaf {
    pub fn name(s: impl Into<String>) -> Leaf {
        Leaf::Name(s.into())
    }

    pub fn index(i: i64) -> Leaf {
        Leaf::Index(i)
    }

    /// Coerce an `Index` leaf into the `Name` leaf with its decimal
    /// rendering. A no-op on an already-`Name` leaf. This is the only
    /// direction of coercion the algebra allows.
    pub fn to_name(&self) -> Leaf {
        match self {
            Leaf::Name(_) => self.clone(),
            Leaf::Index(i) => Leaf::Name(i.to_string()),
        }
    }

    /// A bare-identifier name is safe to render with dot syntax in a
    /// JS expression; anything else needs bracket syntax.
    fn is_bare_identifier(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    }

    pub(crate) fn write_js_suffix(&self, out: &mut String) {
        match self {
            Leaf::Name(s) if Self::is_bare_identifier(s) => {
                out.push('.');
                out.push_str(s);
            }
            Leaf::Name(s) => {
                out.push_str("[\"");
                out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                out.push_str("\"]");
            }
            Leaf::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Name(s) => write!(f, "{s}"),
            Leaf::Index(i) => write!(f, "{i}"),
        }
    }
}
