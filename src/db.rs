mod schema;

pub use schema::Database;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Book record as stored in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBook {
    /// Unique book ID (UUID).
    pub id: String,
    /// Book title.
    pub title: String,
    /// Authors as a JSON array.
    pub authors_json: Option<String>,
    /// Book description, may contain HTML.
    pub description: Option<String>,
    /// Language code.
    pub language: Option<String>,
    /// Genres as a JSON array.
    pub genres_json: Option<String>,
    /// File type (extension).
    pub format: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl StoredBook {
    /// Decoded author names.
    pub fn authors(&self) -> Vec<String> {
        decode_list(self.authors_json.as_deref())
    }

    /// Decoded genre names.
    pub fn genres(&self) -> Vec<String> {
        decode_list(self.genres_json.as_deref())
    }

    /// Update time as an RFC 3339 string.
    pub fn updated_rfc3339(&self) -> String {
        DateTime::<Utc>::from_timestamp(self.updated_at, 0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Sort order of book listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookOrder {
    /// Alphabetical by title.
    #[default]
    Title,
    /// Most recently updated first.
    Newest,
}

impl BookOrder {
    /// Accepted `order` parameter values.
    pub const NAMES: [&'static str; 2] = ["title", "new"];

    /// Parse one of [`BookOrder::NAMES`]. Unknown names fall back to title order.
    pub fn from_name(name: &str) -> Self {
        match name {
            "new" => BookOrder::Newest,
            _ => BookOrder::Title,
        }
    }

    /// Parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookOrder::Title => "title",
            BookOrder::Newest => "new",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            BookOrder::Title => "title COLLATE NOCASE, id",
            BookOrder::Newest => "updated_at DESC, title COLLATE NOCASE, id",
        }
    }
}

/// Encode a list for a `*_json` column. Empty lists are stored as NULL.
pub fn encode_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        serde_json::to_string(items).ok()
    }
}

fn decode_list(json: Option<&str>) -> Vec<String> {
    json.and_then(|j| serde_json::from_str::<Vec<String>>(j).ok())
        .unwrap_or_default()
}

/// Get current Unix timestamp.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
