//! OPDS catalog documents: model, vocabulary, protocol variants and rendering.

pub mod mime;
mod model;
mod opensearch;
pub mod rel;
mod render;
mod version;

pub use model::{
    Author, Category, Entry, Facet, FacetValue, Feed, Group, Link, Metadata, Navigation, Text,
    TextKind,
};
pub use opensearch::generate_opensearch;
pub use render::render;
pub use version::Variant;

use crate::error::AppError;

/// Minimal document used when even the error feed cannot be rendered.
const FALLBACK_ERROR_DOCUMENT: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opds="http://opds-spec.org/2010/catalog">"#,
    "<id>urn:opds-catalog:error</id><title>Error</title>",
    "<updated>1970-01-01T00:00:00Z</updated></feed>"
);

/// Build the catalog document returned for a failed request.
///
/// The error goes through the regular model and renderer so clients always
/// receive a valid feed, whatever the failure was.
pub fn error_document(err: &AppError) -> Vec<u8> {
    let status = err.status();
    let reason = status.canonical_reason().unwrap_or("Error");

    let mut entry = Entry::new(format!("urn:opds-catalog:error:{}:detail", err.kind()), reason);
    entry.set_summary(err.to_string(), TextKind::Text);

    let mut feed = Feed::new(format!("urn:opds-catalog:error:{}", err.kind()), "Error");
    feed.set_subtitle(format!("{} {}", status.as_u16(), reason))
        .add_entry(entry);

    render(&feed, Variant::Current).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to render error document");
        FALLBACK_ERROR_DOCUMENT.as_bytes().to_vec()
    })
}
