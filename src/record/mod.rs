//! Record Domain Model
//!
//! The civic record, its canonical on-disk representation, the header
//! schema validator, and path conventions.

mod model;
pub mod paths;
pub mod schema;
mod serializer;

pub use model::{now_iso, slugify, Author, CommitInfo, Draft, Record, RecordError, SourceInfo};
pub use schema::{
    Diagnostic, DiagnosticSeverity, SchemaValidator, ValidationOptions, ValidationReport,
};
pub use serializer::{parse_record, serialize_record};
