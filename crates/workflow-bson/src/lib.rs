//! The BSON value model shared by every stage of the workflow compiler
//! (component A). A `Value` is bidirectionally convertible to the real
//! BSON wire format via the `bson` crate, and to a mongo-shell JS
//! expression via [`Value::to_js_expr`].

mod document;
mod value;

pub use document::Document;
pub use value::Value;
