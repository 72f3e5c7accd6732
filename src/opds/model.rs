//! Catalog document model.
//!
//! Every value here is built per request, handed to the renderer once and
//! dropped. Free text goes through the [`Sanitizer`] at the moment it is set,
//! but only for the fields that carry descriptive prose: summaries, content,
//! category labels and facet labels. Titles and author names are stored
//! verbatim so names in any script survive untouched.

use crate::opds::{mime, rel};
use crate::sanitize::Sanitizer;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Extension elements, keyed by namespace then element name.
pub type Metadata = BTreeMap<String, BTreeMap<String, String>>;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// How a text construct is to be interpreted by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    /// Plain text.
    #[default]
    Text,
    /// Escaped HTML markup.
    Html,
}

impl TextKind {
    /// Value of the Atom `type` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            TextKind::Text => "text",
            TextKind::Html => "html",
        }
    }
}

/// A sanitized summary or content body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    /// Normalized text.
    pub value: String,
    /// Interpretation of `value`.
    pub kind: TextKind,
}

/// Entry author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name, never sanitized.
    pub name: String,
    /// Link to the author's page.
    pub uri: Option<String>,
}

/// Entry category (genre, subject).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Machine term.
    pub term: String,
    /// Human-readable label, sanitized.
    pub label: String,
    /// Categorization scheme URI.
    pub scheme: Option<String>,
}

/// Catalog link.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Link {
    /// Target URL.
    pub href: String,
    /// Relation type.
    pub rel: String,
    /// Media type of the target.
    pub media_type: Option<String>,
    /// Human-readable title.
    pub title: Option<String>,
    /// Language of the target.
    pub hreflang: Option<String>,
    /// Size of the target in bytes.
    pub length: Option<u64>,
    /// Extra properties, rendered space-joined as `key=value`.
    pub properties: BTreeMap<String, String>,
}

impl Link {
    /// Create a link with the two mandatory attributes.
    pub fn new(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            rel: rel.into(),
            ..Default::default()
        }
    }

    /// Set the media type.
    pub fn with_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the target language.
    pub fn with_hreflang(mut self, hreflang: impl Into<String>) -> Self {
        self.hreflang = Some(hreflang.into());
        self
    }

    /// Set the target size.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Download link for a publication file, typed from its file type.
    pub fn acquisition(href: impl Into<String>, file_type: &str) -> Self {
        Self::new(href, rel::ACQUISITION).with_type(mime::acquisition_type(file_type))
    }

    /// Cover image link.
    pub fn image(href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::new(href, rel::IMAGE).with_type(media_type)
    }

    /// Cover thumbnail link.
    pub fn thumbnail(href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::new(href, rel::THUMBNAIL).with_type(media_type)
    }

    /// Link to another catalog feed.
    pub fn navigation(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self::new(href, rel).with_type(mime::CATALOG)
    }

    /// Link to the OpenSearch description.
    pub fn search(href: impl Into<String>) -> Self {
        Self::new(href, rel::SEARCH).with_type(mime::OPENSEARCH)
    }

    /// Alternative ordering of the current feed.
    pub fn sort(href: impl Into<String>, rel: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(href, rel)
            .with_type(mime::ACQUISITION_FEED)
            .with_title(title)
    }
}

/// Pagination state of a feed. Rendered as first/previous/next/last links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// 1-based current page.
    pub current_page: u32,
    /// Number of pages.
    pub total_pages: u32,
    /// Number of items across all pages.
    pub total_items: u64,
    /// Page size.
    pub items_per_page: u32,
    /// URL the page parameter is appended to.
    pub base_url: String,
    /// Query parameters carried over to every page link.
    pub params: BTreeMap<String, String>,
}

impl Navigation {
    /// Navigation with an explicit page count.
    pub fn new(base_url: impl Into<String>, current_page: u32, total_pages: u32) -> Self {
        Self {
            current_page: current_page.max(1),
            total_pages,
            total_items: 0,
            items_per_page: 0,
            base_url: base_url.into(),
            params: BTreeMap::new(),
        }
    }

    /// Navigation derived from item counts.
    pub fn paginate(
        base_url: impl Into<String>,
        current_page: u32,
        items_per_page: u32,
        total_items: u64,
    ) -> Self {
        let per_page = u64::from(items_per_page.max(1));
        let total_pages = total_items.div_ceil(per_page).min(u64::from(u32::MAX)) as u32;

        Self {
            total_items,
            items_per_page,
            ..Self::new(base_url, current_page, total_pages)
        }
    }

    /// Carry a query parameter into page links.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Row offset of the current page.
    pub fn offset(&self) -> u64 {
        u64::from(self.current_page.saturating_sub(1)) * u64::from(self.items_per_page)
    }

    /// Pagination links. Empty when everything fits on one page.
    pub fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        if self.total_pages <= 1 {
            return links;
        }

        if self.current_page > 1 {
            links.push(Link::navigation(self.page_href(1), rel::FIRST));
            // A page past the end still points back at the last real page.
            let previous = (self.current_page - 1).min(self.total_pages);
            links.push(Link::navigation(self.page_href(previous), rel::PREVIOUS));
        }
        if self.current_page < self.total_pages {
            links.push(Link::navigation(
                self.page_href(self.current_page + 1),
                rel::NEXT,
            ));
            links.push(Link::navigation(
                self.page_href(self.total_pages),
                rel::LAST,
            ));
        }

        links
    }

    fn page_href(&self, page: u32) -> String {
        let mut query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        query.push(format!("page={}", page));

        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.base_url, separator, query.join("&"))
    }
}

/// One selectable value of a facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetValue {
    /// Machine value.
    pub term: String,
    /// Display label, sanitized when the facet is added to a feed.
    pub label: String,
    /// Feed URL with this value applied.
    pub href: String,
    /// Number of matching items.
    pub count: Option<u64>,
    /// Whether this value is the one currently applied.
    pub active: bool,
}

/// Filterable dimension of a feed. Facets without values are not rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    /// Facet group name.
    pub name: String,
    /// Values in display order.
    pub values: Vec<FacetValue>,
}

impl Facet {
    /// Create an empty facet group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Add a value.
    pub fn add_value(
        &mut self,
        term: impl Into<String>,
        label: impl Into<String>,
        href: impl Into<String>,
        count: Option<u64>,
        active: bool,
    ) -> &mut Self {
        self.values.push(FacetValue {
            term: term.into(),
            label: label.into(),
            href: href.into(),
            count,
            active,
        });
        self
    }

    /// Whether the facet would render anything.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Named bucket of entries for grouped display.
#[derive(Debug, Clone)]
pub struct Group {
    /// Group title.
    pub title: String,
    /// Feed listing the whole group.
    pub href: Option<String>,
    /// Entries in insertion order.
    pub entries: Vec<Entry>,
}

impl Group {
    /// Create an empty group.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: None,
            entries: Vec::new(),
        }
    }

    /// Link the group to its own feed.
    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    /// Append an entry.
    pub fn add_entry(&mut self, entry: Entry) -> &mut Self {
        self.entries.push(entry);
        self
    }
}

/// Catalog entry: one publication or one navigation item.
#[derive(Debug, Clone)]
pub struct Entry {
    id: String,
    title: String,
    updated: String,
    authors: Vec<Author>,
    categories: Vec<Category>,
    summary: Option<Text>,
    content: Option<Text>,
    links: Vec<Link>,
    metadata: Metadata,
    sanitizer: Arc<Sanitizer>,
}

impl Entry {
    /// Create an entry with the shared default sanitizer.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated: now_rfc3339(),
            authors: Vec::new(),
            categories: Vec::new(),
            summary: None,
            content: None,
            links: Vec::new(),
            metadata: Metadata::new(),
            sanitizer: Sanitizer::shared(),
        }
    }

    /// Use a specific sanitizer for fields set afterwards.
    pub fn with_sanitizer(mut self, sanitizer: Arc<Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Set the id.
    pub fn set_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = id.into();
        self
    }

    /// Set the title. Stored verbatim.
    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.title = title.into();
        self
    }

    /// Set the update timestamp (RFC 3339).
    pub fn set_updated(&mut self, updated: impl Into<String>) -> &mut Self {
        self.updated = updated.into();
        self
    }

    /// Add an author. The name is stored verbatim.
    pub fn add_author(&mut self, name: impl Into<String>, uri: Option<String>) -> &mut Self {
        self.authors.push(Author {
            name: name.into(),
            uri,
        });
        self
    }

    /// Add a category. The label is sanitized.
    pub fn add_category(
        &mut self,
        term: impl Into<String>,
        label: &str,
        scheme: Option<String>,
    ) -> &mut Self {
        let label = self.sanitizer.normalize(label, false);
        self.categories.push(Category {
            term: term.into(),
            label,
            scheme,
        });
        self
    }

    /// Set the summary. Always sanitized; HTML structure kept for `Html`.
    pub fn set_summary(&mut self, text: impl AsRef<str>, kind: TextKind) -> &mut Self {
        self.summary = Some(self.sanitize(text.as_ref(), kind));
        self
    }

    /// Set the content. Always sanitized; HTML structure kept for `Html`.
    pub fn set_content(&mut self, text: impl AsRef<str>, kind: TextKind) -> &mut Self {
        self.content = Some(self.sanitize(text.as_ref(), kind));
        self
    }

    /// Append a link.
    pub fn add_link(&mut self, link: Link) -> &mut Self {
        self.links.push(link);
        self
    }

    /// Add an extension element.
    pub fn add_metadata(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.metadata
            .entry(namespace.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    fn sanitize(&self, text: &str, kind: TextKind) -> Text {
        Text {
            value: self.sanitizer.normalize(text, kind == TextKind::Html),
            kind,
        }
    }

    /// Entry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Entry title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Update timestamp.
    pub fn updated(&self) -> &str {
        &self.updated
    }

    /// Authors in insertion order.
    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    /// Categories in insertion order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Sanitized summary.
    pub fn summary(&self) -> Option<&Text> {
        self.summary.as_ref()
    }

    /// Sanitized content.
    pub fn content(&self) -> Option<&Text> {
        self.content.as_ref()
    }

    /// Links in insertion order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Extension elements.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Catalog feed: the root of one response document.
#[derive(Debug, Clone)]
pub struct Feed {
    id: String,
    title: String,
    subtitle: Option<String>,
    updated: String,
    icon: Option<String>,
    rights: Option<String>,
    authors: Vec<Author>,
    links: Vec<Link>,
    navigation: Option<Navigation>,
    facets: Vec<Facet>,
    metadata: Metadata,
    entries: Vec<Entry>,
    groups: Vec<Group>,
    sanitizer: Arc<Sanitizer>,
}

impl Feed {
    /// Create a feed with the shared default sanitizer.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            updated: now_rfc3339(),
            icon: None,
            rights: None,
            authors: Vec::new(),
            links: Vec::new(),
            navigation: None,
            facets: Vec::new(),
            metadata: Metadata::new(),
            entries: Vec::new(),
            groups: Vec::new(),
            sanitizer: Sanitizer::shared(),
        }
    }

    /// Use a specific sanitizer for facets added afterwards.
    pub fn with_sanitizer(mut self, sanitizer: Arc<Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Set the id.
    pub fn set_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = id.into();
        self
    }

    /// Set the title. Stored verbatim.
    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.title = title.into();
        self
    }

    /// Set the subtitle. Stored verbatim.
    pub fn set_subtitle(&mut self, subtitle: impl Into<String>) -> &mut Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Set the update timestamp (RFC 3339).
    pub fn set_updated(&mut self, updated: impl Into<String>) -> &mut Self {
        self.updated = updated.into();
        self
    }

    /// Set the icon URL.
    pub fn set_icon(&mut self, icon: impl Into<String>) -> &mut Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the rights statement. Stored verbatim.
    pub fn set_rights(&mut self, rights: impl Into<String>) -> &mut Self {
        self.rights = Some(rights.into());
        self
    }

    /// Add a feed-level author. The name is stored verbatim.
    pub fn add_author(&mut self, name: impl Into<String>, uri: Option<String>) -> &mut Self {
        self.authors.push(Author {
            name: name.into(),
            uri,
        });
        self
    }

    /// Append a link.
    pub fn add_link(&mut self, link: Link) -> &mut Self {
        self.links.push(link);
        self
    }

    /// Set pagination.
    pub fn set_navigation(&mut self, navigation: Navigation) -> &mut Self {
        self.navigation = Some(navigation);
        self
    }

    /// Add a facet group. Value labels are sanitized.
    pub fn add_facet(&mut self, mut facet: Facet) -> &mut Self {
        for value in &mut facet.values {
            value.label = self.sanitizer.normalize(&value.label, false);
        }
        self.facets.push(facet);
        self
    }

    /// Add an extension element.
    pub fn add_metadata(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.metadata
            .entry(namespace.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Append an entry.
    pub fn add_entry(&mut self, entry: Entry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Append a group.
    pub fn add_group(&mut self, group: Group) -> &mut Self {
        self.groups.push(group);
        self
    }

    /// Feed id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Feed title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Subtitle.
    pub fn subtitle(&self) -> Option<&str> {
        self.subtitle.as_deref()
    }

    /// Update timestamp.
    pub fn updated(&self) -> &str {
        &self.updated
    }

    /// Icon URL.
    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    /// Rights statement.
    pub fn rights(&self) -> Option<&str> {
        self.rights.as_deref()
    }

    /// Feed-level authors.
    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    /// Links in insertion order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Pagination, if any.
    pub fn navigation(&self) -> Option<&Navigation> {
        self.navigation.as_ref()
    }

    /// Facet groups.
    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    /// Extension elements.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Groups in insertion order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }
}
