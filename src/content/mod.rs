//! Content validation, sanitization, and durable storage.
//!
//! This is the authority side's only mutation path. Incoming batches are
//! validated field-by-field, sanitized by type, and written both as
//! individually addressable rows (point reads, debugging) and into the
//! aggregate content snapshot that serves the public read path.

pub mod sanitize;
pub mod store;
pub mod validate;

pub use store::{BatchResult, ContentSnapshot, ContentStore, FieldOutcome, StoredField};
pub use validate::{validate, ValidationError};
