use base64::Engine;
use bson::oid::ObjectId;
use uuid::Uuid;

use crate::document::Document;

/// The BSON value model shared by every stage of the compiler.
///
/// Wire-type codes are preserved verbatim from the BSON spec for
/// compatibility (see the doc comment on each variant). `NA` is not a
/// real BSON type; it stands in for anything this model can't carry
/// (legacy `DbPointer`, `Decimal128`, `Undefined`) and round-trips
/// through the wire leg as `Bson::Undefined`, and through the
/// JS-expression leg as the `undefined` literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// code 1
    Double(f64),
    /// code 2
    Text(String),
    /// code 3 — ordered, insertion order significant
    Document(Document),
    /// code 4
    Array(Vec<Value>),
    /// code 5 — generic-subtype byte sequence
    Binary(Vec<u8>),
    /// code 7
    ObjectId(ObjectId),
    /// code 8
    Bool(bool),
    /// code 9 — millisecond precision
    Date(bson::DateTime),
    /// code 10
    Null,
    /// code 11
    Regex { pattern: String, options: String },
    /// code 13
    JavaScript(String),
    /// code 14
    Symbol(String),
    /// code 15 — the scope is dropped on JS-expression projection (lossy by design, see `to_js_expr`)
    JavaScriptScope(String, Document),
    /// code 16
    Int32(i32),
    /// code 17 — (epoch-seconds, ordinal)
    Timestamp { seconds: u32, ordinal: u32 },
    /// code 18
    Int64(i64),
    /// code 255
    MinKey,
    /// code 127
    MaxKey,
    /// not a wire type: placeholder for values this model can't represent
    NA,
}

impl Value {
    pub fn doc(pairs: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Document(pairs.into_iter().collect())
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Construct a `Binary` value from a UUID.
    ///
    /// MongoDB's legacy UUID subtype stores the 16 bytes in
    /// little-endian-concatenated order: the two 8-byte halves of the
    /// standard big-endian UUID layout are each byte-reversed and
    /// swapped. We reproduce that by reversing the whole 16-byte
    /// array, which is the pack's documented oddity and must not be
    /// "corrected."
    pub fn from_uuid(uuid: Uuid) -> Value {
        let mut bytes = *uuid.as_bytes();
        bytes.reverse();
        Value::Binary(bytes.to_vec())
    }

    /// Recover a UUID from a `Binary` value produced by [`Value::from_uuid`].
    pub fn to_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Binary(bytes) if bytes.len() == 16 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(bytes);
                buf.reverse();
                Some(Uuid::from_bytes(buf))
            }
            _ => None,
        }
    }

    /// Render this value the way the mongo shell would accept it as a
    /// JS expression literal: `ObjectId(...)`, `ISODate(...)`,
    /// `NumberInt(...)`, `NumberLong(...)`, `Timestamp(...)`, the bare
    /// `MinKey`/`MaxKey` identifiers, plus ordinary literal syntax for
    /// the rest.
    pub fn to_js_expr(&self) -> String {
        match self {
            Value::Double(f) => format!("{f}"),
            Value::Text(s) => js_string_literal(s),
            Value::Document(doc) => {
                let body = doc
                    .iter()
                    .map(|(k, v)| format!("{}: {}", js_string_literal(k), v.to_js_expr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {body} }}")
            }
            Value::Array(items) => {
                let body = items
                    .iter()
                    .map(Value::to_js_expr)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{body}]")
            }
            Value::Binary(bytes) => {
                format!("BinData(0, \"{}\")", base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            Value::ObjectId(oid) => format!("ObjectId(\"{oid}\")"),
            Value::Bool(b) => b.to_string(),
            Value::Date(dt) => format!(
                "ISODate(\"{}\")",
                dt.try_to_rfc3339_string()
                    .unwrap_or_else(|_| dt.timestamp_millis().to_string())
            ),
            Value::Null => "null".to_string(),
            Value::Regex { pattern, options } => format!("/{pattern}/{options}"),
            Value::JavaScript(code) => code.clone(),
            // Legacy Symbol type has no shell constructor; the closest
            // faithful rendering is a plain string literal.
            Value::Symbol(s) => js_string_literal(s),
            Value::JavaScriptScope(code, _scope) => code.clone(),
            Value::Int32(n) => format!("NumberInt({n})"),
            Value::Timestamp { seconds, ordinal } => format!("Timestamp({seconds}, {ordinal})"),
            Value::Int64(n) => format!("NumberLong(\"{n}\")"),
            Value::MinKey => "MinKey".to_string(),
            Value::MaxKey => "MaxKey".to_string(),
            Value::NA => "undefined".to_string(),
        }
    }
}

fn js_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

impl From<Value> for bson::Bson {
    fn from(v: Value) -> bson::Bson {
        match v {
            Value::Double(f) => bson::Bson::Double(f),
            Value::Text(s) => bson::Bson::String(s),
            Value::Document(d) => bson::Bson::Document(d.into()),
            Value::Array(items) => {
                bson::Bson::Array(items.into_iter().map(bson::Bson::from).collect())
            }
            Value::Binary(bytes) => bson::Bson::Binary(bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes,
            }),
            Value::ObjectId(oid) => bson::Bson::ObjectId(oid),
            Value::Bool(b) => bson::Bson::Boolean(b),
            Value::Date(dt) => bson::Bson::DateTime(dt),
            Value::Null => bson::Bson::Null,
            Value::Regex { pattern, options } => {
                bson::Bson::RegularExpression(bson::Regex { pattern, options })
            }
            Value::JavaScript(code) => bson::Bson::JavaScriptCode(code),
            Value::Symbol(s) => bson::Bson::Symbol(s),
            Value::JavaScriptScope(code, scope) => {
                bson::Bson::JavaScriptCodeWithScope(bson::JavaScriptCodeWithScope {
                    code,
                    scope: scope.into(),
                })
            }
            Value::Int32(n) => bson::Bson::Int32(n),
            Value::Timestamp { seconds, ordinal } => bson::Bson::Timestamp(bson::Timestamp {
                time: seconds,
                increment: ordinal,
            }),
            Value::Int64(n) => bson::Bson::Int64(n),
            Value::MinKey => bson::Bson::MinKey,
            Value::MaxKey => bson::Bson::MaxKey,
            Value::NA => bson::Bson::Undefined,
        }
    }
}

impl From<bson::Bson> for Value {
    fn from(b: bson::Bson) -> Value {
        match b {
            bson::Bson::Double(f) => Value::Double(f),
            bson::Bson::String(s) => Value::Text(s),
            bson::Bson::Document(d) => Value::Document(d.into()),
            bson::Bson::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            bson::Bson::Binary(b) => Value::Binary(b.bytes),
            bson::Bson::ObjectId(oid) => Value::ObjectId(oid),
            bson::Bson::Boolean(b) => Value::Bool(b),
            bson::Bson::DateTime(dt) => Value::Date(dt),
            bson::Bson::Null => Value::Null,
            bson::Bson::RegularExpression(r) => Value::Regex {
                pattern: r.pattern,
                options: r.options,
            },
            bson::Bson::JavaScriptCode(code) => Value::JavaScript(code),
            bson::Bson::Symbol(s) => Value::Symbol(s),
            bson::Bson::JavaScriptCodeWithScope(s) => {
                Value::JavaScriptScope(s.code, s.scope.into())
            }
            bson::Bson::Int32(n) => Value::Int32(n),
            bson::Bson::Timestamp(t) => Value::Timestamp {
                seconds: t.time,
                ordinal: t.increment,
            },
            bson::Bson::Int64(n) => Value::Int64(n),
            bson::Bson::MinKey => Value::MinKey,
            bson::Bson::MaxKey => Value::MaxKey,
            // Legacy / unrepresentable types fold into the placeholder.
            bson::Bson::Decimal128(_) | bson::Bson::DbPointer(_) | bson::Bson::Undefined => {
                Value::NA
            }
        }
    }
}
