//! Request parameter validation.
//!
//! Every scalar that reaches the document model passes through here first.
//! Failures are [`AppError::Validation`]; nothing invalid is silently
//! replaced by a default, except the page number which defaults to 1 when
//! absent and is clamped to at least 1.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use uuid::{Uuid, Variant as UuidVariant, Version};

/// Bounds applied to request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Largest accepted numeric id.
    #[serde(default = "default_max_id")]
    pub max_id: i64,

    /// Longest accepted free string, in characters.
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,

    /// Longest accepted search query, in characters.
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Largest accepted page number.
    #[serde(default = "default_max_page")]
    pub max_page: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_id: default_max_id(),
            max_string_length: default_max_string_length(),
            max_query_length: default_max_query_length(),
            max_page: default_max_page(),
        }
    }
}

fn default_max_id() -> i64 {
    i64::from(i32::MAX)
}

fn default_max_string_length() -> usize {
    255
}

fn default_max_query_length() -> usize {
    100
}

fn default_max_page() -> u32 {
    100_000
}

/// Validates scalar request inputs against [`Limits`].
#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: Limits,
}

impl Validator {
    /// Create a validator.
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Active limits.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Require a parameter to be present and non-blank.
    pub fn required<'a>(&self, field: &str, raw: Option<&'a str>) -> Result<&'a str> {
        match raw.map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(AppError::validation(field, "is required")),
        }
    }

    /// Positive numeric id, at most `max_id`.
    pub fn id(&self, field: &str, raw: &str) -> Result<i64> {
        let id: i64 = raw
            .trim()
            .parse()
            .map_err(|_| AppError::validation(field, "must be a number"))?;

        if id < 1 || id > self.limits.max_id {
            return Err(AppError::validation(
                field,
                format!("must be between 1 and {}", self.limits.max_id),
            ));
        }
        Ok(id)
    }

    /// Trimmed string of at most `max_len` characters (default
    /// `max_string_length`). Empty strings are accepted.
    pub fn string(&self, field: &str, raw: &str, max_len: Option<usize>) -> Result<String> {
        let max_len = max_len.unwrap_or(self.limits.max_string_length);
        let value = raw.trim();

        if value.chars().count() > max_len {
            return Err(AppError::validation(
                field,
                format!("must be at most {} characters", max_len),
            ));
        }
        if value.chars().any(char::is_control) {
            return Err(AppError::validation(field, "must not contain control characters"));
        }
        Ok(value.to_string())
    }

    /// One of a fixed set of values, compared case-insensitively.
    pub fn one_of<'a>(&self, field: &str, raw: &str, allowed: &[&'a str]) -> Result<&'a str> {
        let value = raw.trim();
        allowed
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(value))
            .copied()
            .ok_or_else(|| {
                AppError::validation(field, format!("must be one of: {}", allowed.join(", ")))
            })
    }

    /// Page number: 1 when absent or blank, clamped to at least 1.
    pub fn page(&self, raw: Option<&str>) -> Result<u32> {
        let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(1);
        };

        let page: i64 = value
            .parse()
            .map_err(|_| AppError::validation("page", "must be a number"))?;

        if page > i64::from(self.limits.max_page) {
            return Err(AppError::validation(
                "page",
                format!("must be at most {}", self.limits.max_page),
            ));
        }
        Ok(page.max(1) as u32)
    }

    /// Search query: required, non-blank, at most `max_query_length`.
    pub fn search_query(&self, raw: Option<&str>) -> Result<String> {
        let value = self.required("q", raw)?;
        self.string("q", value, Some(self.limits.max_query_length))
    }

    /// Language code such as `en` or `pt-BR`.
    pub fn language(&self, field: &str, raw: &str) -> Result<String> {
        let value = self.string(field, raw, Some(16))?;
        let valid = !value.is_empty()
            && value.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(AppError::validation(field, "must be a language code"));
        }
        Ok(value)
    }

    /// Random (version 4) UUID. The input is returned unchanged.
    pub fn uuid_v4<'a>(&self, field: &str, raw: &'a str) -> Result<&'a str> {
        let uuid = Uuid::try_parse(raw)
            .map_err(|_| AppError::validation(field, "must be a UUID"))?;

        if uuid.get_version() != Some(Version::Random) || uuid.get_variant() != UuidVariant::RFC4122
        {
            return Err(AppError::validation(field, "must be a version 4 UUID"));
        }
        Ok(raw)
    }
}
