//! Per-field validation rules.
//!
//! Validation runs at the persistence gateway, never in the staging
//! layer. A failing field is recorded and skipped; it does not abort the
//! rest of its batch.

use crate::ledger::{FieldChange, FieldType};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

/// Length caps per field type (characters of raw input).
const MAX_TEXT_LEN: usize = 5_000;
const MAX_HTML_LEN: usize = 50_000;
const MAX_URL_LEN: usize = 2_048;
const MAX_EMAIL_LEN: usize = 320;
const MAX_COLOR_LEN: usize = 16;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// 6-digit or 3-digit hex color, leading `#` optional on input.
static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#?([0-9a-fA-F]{6}|[0-9a-fA-F]{3})$").unwrap());

/// Why a single field was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("value is required")]
    Required,
    #[error("value exceeds {limit} characters")]
    TooLong { limit: usize },
    #[error("not a valid http(s) URL")]
    InvalidUrl,
    #[error("not a valid email address")]
    InvalidEmail,
    #[error("not a 3- or 6-digit hex color")]
    InvalidColor,
}

/// Validation rules for one field type.
#[derive(Debug, Clone, Copy)]
pub struct FieldRules {
    /// Whether an empty (after trim) value is rejected. Text and HTML
    /// fields may be cleared; typed fields must carry a value.
    pub required: bool,
    pub max_length: usize,
}

impl FieldRules {
    pub fn for_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => Self {
                required: false,
                max_length: MAX_TEXT_LEN,
            },
            FieldType::Html => Self {
                required: false,
                max_length: MAX_HTML_LEN,
            },
            FieldType::Url => Self {
                required: true,
                max_length: MAX_URL_LEN,
            },
            FieldType::Email => Self {
                required: true,
                max_length: MAX_EMAIL_LEN,
            },
            FieldType::Color => Self {
                required: true,
                max_length: MAX_COLOR_LEN,
            },
        }
    }
}

/// Check one change against its type's rules.
pub fn validate(change: &FieldChange) -> Result<(), ValidationError> {
    let rules = FieldRules::for_type(change.field_type);
    let value = change.field_value.trim();

    if value.is_empty() {
        return if rules.required {
            Err(ValidationError::Required)
        } else {
            Ok(())
        };
    }

    if change.field_value.chars().count() > rules.max_length {
        return Err(ValidationError::TooLong {
            limit: rules.max_length,
        });
    }

    match change.field_type {
        FieldType::Text | FieldType::Html => Ok(()),
        FieldType::Url => {
            let parsed = Url::parse(value).map_err(|_| ValidationError::InvalidUrl)?;
            if parsed.scheme() == "http" || parsed.scheme() == "https" {
                Ok(())
            } else {
                Err(ValidationError::InvalidUrl)
            }
        }
        FieldType::Email => {
            if EMAIL_RE.is_match(value) {
                Ok(())
            } else {
                Err(ValidationError::InvalidEmail)
            }
        }
        FieldType::Color => {
            if COLOR_RE.is_match(value) {
                Ok(())
            } else {
                Err(ValidationError::InvalidColor)
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn change(value: &str, field_type: FieldType) -> FieldChange {
        FieldChange {
            field_name: "f".into(),
            field_value: value.into(),
            field_type,
        }
    }

    #[test]
    fn text_accepts_anything_within_limit() {
        assert!(validate(&change("hello <world>", FieldType::Text)).is_ok());
        assert!(validate(&change("", FieldType::Text)).is_ok());
    }

    #[test]
    fn text_rejects_over_limit() {
        let long = "x".repeat(MAX_TEXT_LEN + 1);
        assert_eq!(
            validate(&change(&long, FieldType::Text)),
            Err(ValidationError::TooLong {
                limit: MAX_TEXT_LEN
            })
        );
    }

    #[test]
    fn url_requires_http_scheme() {
        assert!(validate(&change("https://example.com/page", FieldType::Url)).is_ok());
        assert!(validate(&change("http://example.com", FieldType::Url)).is_ok());
        assert_eq!(
            validate(&change("javascript:alert(1)", FieldType::Url)),
            Err(ValidationError::InvalidUrl)
        );
        assert_eq!(
            validate(&change("ftp://example.com", FieldType::Url)),
            Err(ValidationError::InvalidUrl)
        );
        assert_eq!(
            validate(&change("not a url", FieldType::Url)),
            Err(ValidationError::InvalidUrl)
        );
    }

    #[test]
    fn url_is_required() {
        assert_eq!(
            validate(&change("  ", FieldType::Url)),
            Err(ValidationError::Required)
        );
    }

    #[test]
    fn email_format() {
        assert!(validate(&change("ops@example.com", FieldType::Email)).is_ok());
        assert_eq!(
            validate(&change("not-an-email", FieldType::Email)),
            Err(ValidationError::InvalidEmail)
        );
        assert_eq!(
            validate(&change("a@b", FieldType::Email)),
            Err(ValidationError::InvalidEmail)
        );
    }

    #[test]
    fn color_accepts_three_and_six_digit_hex() {
        assert!(validate(&change("#a1b2c3", FieldType::Color)).is_ok());
        assert!(validate(&change("A1B2C3", FieldType::Color)).is_ok());
        assert!(validate(&change("#fff", FieldType::Color)).is_ok());
        assert_eq!(
            validate(&change("#12345", FieldType::Color)),
            Err(ValidationError::InvalidColor)
        );
        assert_eq!(
            validate(&change("red", FieldType::Color)),
            Err(ValidationError::InvalidColor)
        );
    }
}
