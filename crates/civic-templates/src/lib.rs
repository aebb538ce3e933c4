//! Record Templates
//!
//! Templates capture the shape of a new civic record: required header
//! fields, allowed statuses, structural sections, validation rules, and a
//! markdown body with variable placeholders, conditional blocks, and
//! partials. A template may extend a parent (`extends: "type/name"`); the
//! loader resolves the chain and merges it into one effective template.
//!
//! Templates live as header+body files under a base directory, with a
//! customization directory searched first:
//!
//! ```text
//! ---
//! name: default
//! type: policy
//! required_fields: [title, status]
//! statuses: [draft, active]
//! ---
//! # {{ title }}
//!
//! {{#if department}}Maintained by {{ department }}.{{/if}}
//! {{> signature_block clerk=author }}
//! ```

mod definition;
mod error;
mod expander;
mod loader;
mod validation;

pub use definition::{
    AdvancedRule, FieldRelationship, Section, Template, TemplateHeader,
};
pub use error::TemplateError;
pub use expander::{apply_smart_defaults, evaluate_condition, TemplateExpander};
pub use loader::TemplateLoader;
pub use validation::{
    validate_header, BusinessLogicRegistry, IssueSeverity, ValidationIssue,
};
