//! Link relation vocabulary.

/// Catalog root.
pub const START: &str = "start";
/// The current document.
pub const SELF: &str = "self";
/// Parent document.
pub const UP: &str = "up";
/// OpenSearch description.
pub const SEARCH: &str = "search";
/// First page of a paginated feed.
pub const FIRST: &str = "first";
/// Previous page.
pub const PREVIOUS: &str = "previous";
/// Next page.
pub const NEXT: &str = "next";
/// Last page.
pub const LAST: &str = "last";
/// Child catalog.
pub const SUBSECTION: &str = "subsection";
/// Alternate representation.
pub const ALTERNATE: &str = "alternate";
/// Group an entry belongs to.
pub const COLLECTION: &str = "collection";

/// Downloadable publication.
pub const ACQUISITION: &str = "http://opds-spec.org/acquisition";
/// Cover image.
pub const IMAGE: &str = "http://opds-spec.org/image";
/// Cover thumbnail.
pub const THUMBNAIL: &str = "http://opds-spec.org/image/thumbnail";
/// Facet value.
pub const FACET: &str = "http://opds-spec.org/facet";
/// Newest-first ordering.
pub const SORT_NEW: &str = "http://opds-spec.org/sort/new";
