//! Feed serialization.
//!
//! Output is built completely in memory and only returned when every element
//! was written, so callers never see a partial document. Element order is
//! fixed per variant; see [`render`].

use crate::error::{AppError, Result};
use crate::opds::model::{Author, Entry, Facet, Feed, Link, Metadata, Text, TextKind};
use crate::opds::{Variant, mime, rel};
use crate::sanitize::{escape_xml, repair_html, strip_control};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Namespace prefixes declared on the root element.
const NAMESPACES: &[(&str, &str)] = &[
    ("opds", "http://opds-spec.org/2010/catalog"),
    ("dc", "http://purl.org/dc/terms/"),
    ("opensearch", "http://a9.com/-/spec/opensearch/1.1/"),
    ("thr", "http://purl.org/syndication/thread/1.0"),
    ("schema", "http://schema.org/"),
];

/// Serialize a feed to UTF-8 XML.
///
/// Feed order: id, title, subtitle (current), updated, icon, rights
/// (current), authors, links, pagination links, item counters (current),
/// facets (current), metadata, entries, grouped entries.
///
/// Entry order: id, title, updated, authors, categories, summary, content,
/// links, metadata.
///
/// Fails with [`AppError::Render`] before writing anything if the feed, an
/// entry or a link is missing a mandatory field.
pub fn render(feed: &Feed, variant: Variant) -> Result<Vec<u8>> {
    check_feed(feed)?;

    let mut out = FeedWriter::new(variant);
    out.feed(feed)?;

    tracing::debug!(
        id = feed.id(),
        variant = %variant,
        entries = feed.entries().len(),
        "Rendered feed"
    );

    Ok(out.finish())
}

fn check_feed(feed: &Feed) -> Result<()> {
    require("feed id", feed.id())?;
    require("feed title", feed.title())?;
    feed.links().iter().try_for_each(check_link)?;
    check_metadata(feed.metadata())?;

    let grouped = feed.groups().iter().flat_map(|g| g.entries.iter());
    for entry in feed.entries().iter().chain(grouped) {
        require("entry id", entry.id())?;
        require("entry title", entry.title())?;
        entry.links().iter().try_for_each(check_link)?;
        check_metadata(entry.metadata())?;
    }

    for facet in feed.facets() {
        for value in &facet.values {
            require("facet href", &value.href)?;
        }
    }

    Ok(())
}

fn check_link(link: &Link) -> Result<()> {
    require("link href", &link.href)?;
    require("link rel", &link.rel)
}

fn check_metadata(metadata: &Metadata) -> Result<()> {
    for (namespace, elements) in metadata {
        require("metadata namespace", namespace)?;
        for name in elements.keys() {
            if !is_xml_name(name) {
                return Err(AppError::Render(format!(
                    "invalid metadata element name: {:?}",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Render(format!("{} is required", what)));
    }
    Ok(())
}

/// Unprefixed XML name: letter or underscore, then letters, digits, `-`, `_`, `.`.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

struct FeedWriter {
    writer: Writer<Cursor<Vec<u8>>>,
    variant: Variant,
}

impl FeedWriter {
    fn new(variant: Variant) -> Self {
        Self {
            writer: Writer::new(Cursor::new(Vec::new())),
            variant,
        }
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner().into_inner()
    }

    fn current(&self) -> bool {
        self.variant == Variant::Current
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| AppError::Render(e.to_string()))
    }

    fn start(&mut self, elem: BytesStart<'_>) -> Result<()> {
        self.emit(Event::Start(elem))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.emit(Event::Text(BytesText::from_escaped(escape_xml(text))))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(BytesStart::new(name))?;
        self.text(text)?;
        self.end(name)
    }

    fn feed(&mut self, feed: &Feed) -> Result<()> {
        self.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("feed");
        root.push_attribute(("xmlns", ATOM_NS));
        for (prefix, uri) in NAMESPACES {
            root.push_attribute((format!("xmlns:{}", prefix).as_str(), *uri));
        }
        self.start(root)?;

        self.text_element("id", feed.id())?;
        self.text_element("title", feed.title())?;
        if let Some(subtitle) = feed.subtitle().filter(|_| self.current()) {
            self.text_element("subtitle", subtitle)?;
        }
        self.text_element("updated", feed.updated())?;
        if let Some(icon) = feed.icon() {
            self.text_element("icon", icon)?;
        }
        if let Some(rights) = feed.rights().filter(|_| self.current()) {
            self.text_element("rights", rights)?;
        }

        for author in feed.authors() {
            self.author(author)?;
        }

        for link in feed.links() {
            self.link(link, &[])?;
        }

        if let Some(navigation) = feed.navigation() {
            for link in navigation.links() {
                self.link(&link, &[])?;
            }
            if self.current() {
                self.text_element("opds:numberOfItems", &navigation.total_items.to_string())?;
                self.text_element("opds:itemsPerPage", &navigation.items_per_page.to_string())?;
            }
        }

        if self.current() {
            for facet in feed.facets().iter().filter(|f| !f.is_empty()) {
                self.facet(facet)?;
            }
        }

        self.metadata(feed.metadata())?;

        for entry in feed.entries() {
            self.entry(entry, None)?;
        }

        for group in feed.groups() {
            let collection = group
                .href
                .as_ref()
                .map(|href| Link::new(href.clone(), rel::COLLECTION).with_title(group.title.clone()));
            for entry in &group.entries {
                self.entry(entry, collection.as_ref())?;
            }
        }

        self.end("feed")
    }

    fn entry(&mut self, entry: &Entry, collection: Option<&Link>) -> Result<()> {
        self.start(BytesStart::new("entry"))?;

        self.text_element("id", entry.id())?;
        self.text_element("title", entry.title())?;
        self.text_element("updated", entry.updated())?;

        for author in entry.authors() {
            self.author(author)?;
        }

        for category in entry.categories() {
            let mut elem = BytesStart::new("category");
            elem.push_attribute(("term", &*strip_control(&category.term)));
            elem.push_attribute(("label", &*strip_control(&category.label)));
            if let Some(scheme) = &category.scheme {
                elem.push_attribute(("scheme", &*strip_control(scheme)));
            }
            self.emit(Event::Empty(elem))?;
        }

        if let Some(summary) = entry.summary() {
            self.text_construct("summary", summary)?;
        }
        if let Some(content) = entry.content() {
            self.text_construct("content", content)?;
        }

        for link in entry.links().iter().chain(collection) {
            self.link(link, &[])?;
        }

        self.metadata(entry.metadata())?;

        self.end("entry")
    }

    fn author(&mut self, author: &Author) -> Result<()> {
        self.start(BytesStart::new("author"))?;
        self.text_element("name", &author.name)?;
        if let Some(uri) = &author.uri {
            self.text_element("uri", uri)?;
        }
        self.end("author")
    }

    fn text_construct(&mut self, name: &str, text: &Text) -> Result<()> {
        let mut elem = BytesStart::new(name);
        elem.push_attribute(("type", text.kind.as_str()));
        self.start(elem)?;

        match text.kind {
            TextKind::Text => self.text(&text.value)?,
            TextKind::Html => self.text(&repair_html(&strip_control(&text.value)))?,
        }

        self.end(name)
    }

    /// Attributes are written href, rel, type, title, hreflang, length,
    /// properties, then any extension attributes.
    fn link(&mut self, link: &Link, extra: &[(&str, String)]) -> Result<()> {
        let mut elem = BytesStart::new("link");
        elem.push_attribute(("href", &*strip_control(&link.href)));
        elem.push_attribute(("rel", &*strip_control(&link.rel)));
        if let Some(media_type) = &link.media_type {
            elem.push_attribute(("type", &*strip_control(media_type)));
        }
        if let Some(title) = &link.title {
            elem.push_attribute(("title", &*strip_control(title)));
        }
        if let Some(hreflang) = &link.hreflang {
            elem.push_attribute(("hreflang", &*strip_control(hreflang)));
        }
        if let Some(length) = link.length {
            elem.push_attribute(("length", length.to_string().as_str()));
        }
        if !link.properties.is_empty() {
            let properties = link
                .properties
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            elem.push_attribute(("properties", &*strip_control(&properties)));
        }
        for (name, value) in extra {
            elem.push_attribute((*name, &*strip_control(value)));
        }

        self.emit(Event::Empty(elem))
    }

    fn facet(&mut self, facet: &Facet) -> Result<()> {
        for value in &facet.values {
            let link = Link::new(value.href.clone(), rel::FACET)
                .with_type(mime::ACQUISITION_FEED)
                .with_title(value.label.clone());

            let mut extra = vec![("opds:facetGroup", facet.name.clone())];
            if value.active {
                extra.push(("opds:activeFacet", "true".to_string()));
            }
            if let Some(count) = value.count {
                extra.push(("thr:count", count.to_string()));
            }

            self.link(&link, &extra)?;
        }
        Ok(())
    }

    fn metadata(&mut self, metadata: &Metadata) -> Result<()> {
        for (namespace, elements) in metadata {
            let prefix = NAMESPACES
                .iter()
                .find(|(prefix, uri)| prefix == namespace || uri == namespace)
                .map(|(prefix, _)| *prefix);

            for (name, value) in elements {
                match prefix {
                    Some(prefix) => {
                        self.text_element(&format!("{}:{}", prefix, name), value)?;
                    }
                    None => {
                        let mut elem = BytesStart::new(name.as_str());
                        elem.push_attribute(("xmlns", &*strip_control(namespace)));
                        self.start(elem)?;
                        self.text(value)?;
                        self.end(name)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opds::{Facet, Group, Navigation};

    fn render_str(feed: &Feed, variant: Variant) -> String {
        String::from_utf8(render(feed, variant).unwrap()).unwrap()
    }

    fn sample_feed() -> Feed {
        let mut feed = Feed::new("urn:feed", "Library");
        feed.set_subtitle("Everything")
            .set_updated("2024-01-01T00:00:00Z")
            .set_icon("/favicon.ico")
            .set_rights("CC0")
            .add_link(Link::navigation("/opds", rel::START));
        feed
    }

    #[test]
    fn renders_fixed_feed_order() {
        let mut feed = sample_feed();
        feed.set_navigation(Navigation::paginate("/opds/books", 1, 2, 5));

        let xml = render_str(&feed, Variant::Current);
        let positions: Vec<usize> = [
            "<id>urn:feed</id>",
            "<title>Library</title>",
            "<subtitle>",
            "<updated>",
            "<icon>",
            "<rights>",
            "rel=\"start\"",
            "rel=\"next\"",
            "<opds:numberOfItems>5</opds:numberOfItems>",
            "<opds:itemsPerPage>2</opds:itemsPerPage>",
        ]
        .iter()
        .map(|needle| xml.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
        .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", xml);
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><feed xmlns="http://www.w3.org/2005/Atom""#));
    }

    #[test]
    fn legacy_omits_current_only_elements() {
        let mut feed = sample_feed();
        feed.set_navigation(Navigation::paginate("/opds/books", 1, 2, 5));
        let mut facet = Facet::new("Language");
        facet.add_value("en", "English", "/opds/books?lang=en", Some(5), true);
        feed.add_facet(facet);

        let xml = render_str(&feed, Variant::Legacy);
        assert!(!xml.contains("<subtitle>"));
        assert!(!xml.contains("<rights>"));
        assert!(!xml.contains("numberOfItems"));
        assert!(!xml.contains(rel::FACET));
        assert!(xml.contains("rel=\"next\""));
        assert!(xml.contains("<icon>/favicon.ico</icon>"));
    }

    #[test]
    fn facets_render_with_extension_attributes() {
        let mut feed = sample_feed();
        let mut facet = Facet::new("Language");
        facet.add_value("en", "English", "/b?lang=en", Some(5), true);
        facet.add_value("ru", "Русский", "/b?lang=ru", None, false);
        feed.add_facet(facet).add_facet(Facet::new("Empty"));

        let xml = render_str(&feed, Variant::Current);
        assert!(xml.contains(
            r#"<link href="/b?lang=en" rel="http://opds-spec.org/facet" type="application/atom+xml;profile=opds-catalog;kind=acquisition" title="English" opds:facetGroup="Language" opds:activeFacet="true" thr:count="5"/>"#
        ));
        assert!(xml.contains(r#"title="Русский" opds:facetGroup="Language"/>"#));
        assert!(!xml.contains("Empty"));
    }

    #[test]
    fn link_attribute_order_and_properties() {
        let mut feed = sample_feed();
        feed.add_link(
            Link::acquisition("/dl?a=1&b=2", "epub")
                .with_title("Get \"it\"")
                .with_hreflang("en")
                .with_length(1024)
                .with_property("z", "last")
                .with_property("a", "first"),
        );

        let xml = render_str(&feed, Variant::Current);
        assert!(xml.contains(
            r#"<link href="/dl?a=1&amp;b=2" rel="http://opds-spec.org/acquisition" type="application/epub+zip" title="Get &quot;it&quot;" hreflang="en" length="1024" properties="a=first z=last"/>"#
        ), "{}", xml);
    }

    #[test]
    fn entry_renders_fixed_order() {
        let mut entry = Entry::new("urn:e", "Title");
        entry
            .set_updated("2024-02-02T00:00:00Z")
            .add_link(Link::acquisition("/dl", "pdf"))
            .set_content("<p>Body</p>", TextKind::Html)
            .set_summary("Short", TextKind::Text)
            .add_category("sf", "SF", Some("urn:genres".to_string()))
            .add_author("Author", Some("/a/1".to_string()))
            .add_metadata("dc", "language", "en");
        let mut feed = sample_feed();
        feed.add_entry(entry);

        let xml = render_str(&feed, Variant::Current);
        let start = xml.find("<entry>").unwrap();
        let entry_xml = &xml[start..];
        assert_eq!(
            entry_xml,
            concat!(
                "<entry><id>urn:e</id><title>Title</title><updated>2024-02-02T00:00:00Z</updated>",
                "<author><name>Author</name><uri>/a/1</uri></author>",
                r#"<category term="sf" label="SF" scheme="urn:genres"/>"#,
                r#"<summary type="text">Short</summary>"#,
                r#"<content type="html">&lt;p&gt;Body&lt;/p&gt;</content>"#,
                r#"<link href="/dl" rel="http://opds-spec.org/acquisition" type="application/pdf"/>"#,
                "<dc:language>en</dc:language></entry></feed>"
            )
        );
    }

    #[test]
    fn html_content_is_repaired_before_escaping() {
        let mut entry = Entry::new("urn:e", "T");
        entry.set_content("<p>one<br>two <b>open</p>", TextKind::Html);
        let mut feed = sample_feed();
        feed.add_entry(entry);

        let xml = render_str(&feed, Variant::Current);
        assert!(xml.contains("&lt;p&gt;one&lt;br/&gt;two open&lt;/p&gt;"), "{}", xml);
    }

    #[test]
    fn control_characters_are_stripped() {
        let mut feed = Feed::new("urn:x", "Bad\u{1}Title\u{1F}");
        feed.add_link(Link::new("/a\u{0}b", "self"));
        let xml = render_str(&feed, Variant::Current);
        assert!(xml.contains("<title>BadTitle</title>"));
        assert!(xml.contains(r#"href="/ab""#));
    }

    #[test]
    fn unknown_metadata_namespace_is_declared_inline() {
        let mut feed = sample_feed();
        feed.add_metadata("urn:custom", "rating", "5");
        let xml = render_str(&feed, Variant::Current);
        assert!(xml.contains(r#"<rating xmlns="urn:custom">5</rating>"#));
    }

    #[test]
    fn grouped_entries_get_collection_link() {
        let mut group = Group::new("Series").with_href("/opds/series/1");
        group.add_entry(Entry::new("urn:g1", "One"));
        let mut feed = sample_feed();
        feed.add_entry(Entry::new("urn:plain", "Plain")).add_group(group);

        let xml = render_str(&feed, Variant::Current);
        assert!(xml.find("urn:plain").unwrap() < xml.find("urn:g1").unwrap());
        assert!(xml.contains(r#"<link href="/opds/series/1" rel="collection" title="Series"/>"#));
    }

    #[test]
    fn missing_required_fields_fail() {
        assert!(matches!(
            render(&Feed::new("", "Title"), Variant::Current),
            Err(AppError::Render(_))
        ));
        assert!(matches!(
            render(&Feed::new("urn:x", "  "), Variant::Current),
            Err(AppError::Render(_))
        ));

        let mut feed = sample_feed();
        feed.add_entry(Entry::new("urn:e", ""));
        assert!(render(&feed, Variant::Current).is_err());

        let mut feed = sample_feed();
        feed.add_link(Link::new("/x", ""));
        assert!(render(&feed, Variant::Current).is_err());

        let mut feed = sample_feed();
        feed.add_metadata("dc", "bad name", "x");
        assert!(render(&feed, Variant::Current).is_err());
    }
}
