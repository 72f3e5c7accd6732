//! Media types used in catalog links.

use std::borrow::Cow;

/// Generic OPDS catalog feed.
pub const CATALOG: &str = "application/atom+xml;profile=opds-catalog";
/// Navigation feed.
pub const NAVIGATION: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
/// Acquisition feed.
pub const ACQUISITION_FEED: &str = "application/atom+xml;profile=opds-catalog;kind=acquisition";
/// Complete catalog entry document.
pub const ENTRY: &str = "application/atom+xml;type=entry;profile=opds-catalog";
/// OpenSearch description document.
pub const OPENSEARCH: &str = "application/opensearchdescription+xml";

/// Media type of a downloadable file, by file type or extension.
///
/// Unknown types map to `application/<ext>`.
pub fn acquisition_type(file_type: &str) -> Cow<'static, str> {
    let ext = file_type.trim().trim_start_matches('.').to_ascii_lowercase();

    let known = match ext.as_str() {
        "fb2" => "application/fb2+zip",
        "epub" => "application/epub+zip",
        "mobi" => "application/x-mobipocket-ebook",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "rtf" => "application/rtf",
        "djvu" | "djv" => "image/vnd.djvu",
        _ => return Cow::Owned(format!("application/{}", ext)),
    };

    Cow::Borrowed(known)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types() {
        assert_eq!(acquisition_type("fb2"), "application/fb2+zip");
        assert_eq!(acquisition_type("EPUB"), "application/epub+zip");
        assert_eq!(acquisition_type(".htm"), "text/html");
        assert_eq!(acquisition_type("djv"), "image/vnd.djvu");
        assert_eq!(
            acquisition_type("docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[test]
    fn unknown_type_falls_back_to_application() {
        assert_eq!(acquisition_type("xyz"), "application/xyz");
    }
}
