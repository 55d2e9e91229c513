//! PRD parsing and validation.
//!
//! A PRD is a dependency graph of stories, each backed by one gate. PRDs are
//! YAML or JSON documents validated against an embedded JSON Schema before
//! typed parsing, then flattened and checked for structural errors.

mod parser;
mod schema;

pub use parser::{Authority, Prd, PrdError, Story};
pub use schema::validate_prd_schema;
