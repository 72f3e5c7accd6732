//! HTTP request handlers.

use crate::cache::{self, CacheKey};
use crate::db::{BookOrder, StoredBook};
use crate::error::{AppError, Result};
use crate::opds::{self, Entry, Facet, Feed, Group, Link, Navigation, TextKind, Variant, mime, rel};
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Books shown in the root feed's new arrivals group.
const NEW_ARRIVALS: u32 = 5;

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Query parameters accepted by catalog feeds. Each handler reads the
/// ones it needs; the rest are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    version: Option<String>,
    page: Option<String>,
    lang: Option<String>,
    order: Option<String>,
    q: Option<String>,
}

impl CatalogParams {
    fn variant(&self) -> Variant {
        Variant::resolve(self.version.as_deref())
    }
}

/// Serve a rendered feed through the cache with conditional GET support.
///
/// `build` runs only on a cache miss. Failures propagate without touching
/// the cache, so error documents are never stored.
fn respond_with_feed(
    state: &AppState,
    key: CacheKey,
    headers: &HeaderMap,
    content_type: &str,
    build: impl FnOnce() -> Result<Vec<u8>>,
) -> Result<Response<Body>> {
    let key = key.to_string();

    let cached = state.cache.as_ref().and_then(|cache| cache.get_entry(&key));
    let (body, written_at) = match cached {
        Some(entry) => (entry.body, entry.written_at),
        None => {
            // Tag the entry with the token seen before the data was read.
            let token = state.cache.as_ref().map(|cache| cache.current_token());
            let body = build()?;
            let written_at = match state.cache.as_ref().zip(token) {
                Some((cache, token)) => cache.set_with_token(&key, &body, token).written_at,
                None => Utc::now().timestamp_millis(),
            };
            (body, written_at)
        }
    };

    let etag = cache::compute_etag(&body);
    let max_age = state.cache.as_ref().map_or(0, |cache| cache.ttl().as_secs());
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    let builder = Response::builder()
        .header(header::ETAG, &etag)
        .header(header::CACHE_CONTROL, format!("public, max-age={}", max_age))
        .header(header::LAST_MODIFIED, http_date(written_at));

    let response = if cache::is_not_modified(if_none_match, &etag) {
        tracing::debug!(key = %key, "Client copy is current");
        builder.status(StatusCode::NOT_MODIFIED).body(Body::empty())
    } else {
        builder
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
    };

    Ok(response.unwrap_or_else(|_| Response::default()))
}

/// IMF-fixdate for `Last-Modified`.
fn http_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Self, start and search links every catalog feed carries.
fn add_feed_links(feed: &mut Feed, base_url: &str, self_href: String, self_type: &str) {
    feed.add_link(Link::new(self_href, rel::SELF).with_type(self_type))
        .add_link(Link::navigation(format!("{}/opds", base_url), rel::START))
        .add_link(Link::search(format!("{}/opensearch.xml", base_url)));
}

/// Catalog entry for one stored book.
fn book_entry(book: &StoredBook, base_url: &str) -> Entry {
    let mut entry = Entry::new(format!("urn:uuid:{}", book.id), &book.title);
    entry.set_updated(book.updated_rfc3339());

    for author in book.authors() {
        let uri = format!(
            "{}/opds/search?q={}",
            base_url,
            urlencoding::encode(&author)
        );
        entry.add_author(author, Some(uri));
    }

    for genre in book.genres() {
        entry.add_category(genre.clone(), &genre, None);
    }

    if let Some(description) = book.description.as_deref().filter(|d| !d.trim().is_empty()) {
        entry.set_summary(description, TextKind::Html);
    }

    if let Some(language) = &book.language {
        entry.add_metadata("dc", "language", language.clone());
    }

    entry
        .add_link(
            Link::acquisition(
                format!("{}/books/{}/download.{}", base_url, book.id, book.format),
                &book.format,
            )
            .with_length(book.file_size.max(0) as u64),
        )
        .add_link(
            Link::new(format!("{}/opds/books/{}", base_url, book.id), rel::ALTERNATE)
                .with_type(mime::ENTRY),
        );

    entry
}

/// Facet over catalog languages.
fn language_facet(state: &AppState, active: Option<&str>) -> Result<Facet> {
    let base_url = state.base_url();
    let mut facet = Facet::new("Language");

    for (language, count) in state.db.language_counts()? {
        let href = format!(
            "{}/opds/books?lang={}",
            base_url,
            urlencoding::encode(&language)
        );
        let is_active = active == Some(language.as_str());
        facet.add_value(language.clone(), language, href, Some(count), is_active);
    }

    Ok(facet)
}

// ============================================================================
// OPDS CATALOG
// ============================================================================

/// Catalog root navigation feed.
pub async fn catalog_root(
    State(state): State<AppState>,
    Query(params): Query<CatalogParams>,
    headers: HeaderMap,
) -> Result<Response<Body>> {
    let variant = params.variant();
    let key = CacheKey::new("root", variant);

    respond_with_feed(&state, key, &headers, mime::NAVIGATION, || {
        opds::render(&root_feed(&state)?, variant)
    })
}

fn root_feed(state: &AppState) -> Result<Feed> {
    let base_url = state.base_url();
    let total = state.db.count_books(None)?;

    let mut feed = Feed::new("urn:opds-catalog:root", &state.config.server.title);
    add_feed_links(
        &mut feed,
        base_url,
        format!("{}/opds", base_url),
        mime::NAVIGATION,
    );

    let mut all = Entry::new("urn:opds-catalog:books", "All books");
    all.set_content(format!("{} books", total), TextKind::Text)
        .add_link(
            Link::new(format!("{}/opds/books", base_url), rel::SUBSECTION)
                .with_type(mime::ACQUISITION_FEED),
        );
    feed.add_entry(all);

    for (language, count) in state.db.language_counts()? {
        let mut entry = Entry::new(
            format!("urn:opds-catalog:books:lang:{}", language),
            format!("Books in {}", language),
        );
        entry
            .set_content(format!("{} books", count), TextKind::Text)
            .add_link(
                Link::new(
                    format!(
                        "{}/opds/books?lang={}",
                        base_url,
                        urlencoding::encode(&language)
                    ),
                    rel::SUBSECTION,
                )
                .with_type(mime::ACQUISITION_FEED),
            );
        feed.add_entry(entry);
    }

    let newest = state
        .db
        .list_books(None, BookOrder::Newest, 0, NEW_ARRIVALS)?;
    if !newest.is_empty() {
        let mut group =
            Group::new("New arrivals").with_href(format!("{}/opds/books?order=new", base_url));
        for book in &newest {
            group.add_entry(book_entry(book, base_url));
        }
        feed.add_group(group);
    }

    Ok(feed)
}

/// Paginated acquisition feed of all books, optionally filtered by language.
pub async fn catalog_books(
    State(state): State<AppState>,
    Query(params): Query<CatalogParams>,
    headers: HeaderMap,
) -> Result<Response<Body>> {
    let variant = params.variant();
    let page = state.validator.page(params.page.as_deref())?;
    let language = params
        .lang
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .map(|l| state.validator.language("lang", l))
        .transpose()?;
    let order = params
        .order
        .as_deref()
        .map(|o| state.validator.one_of("order", o, &BookOrder::NAMES))
        .transpose()?
        .map_or(BookOrder::Title, BookOrder::from_name);

    let key = CacheKey::new("books", variant)
        .param("page", page)
        .param_opt("lang", language.as_deref())
        .param("order", order.as_str());

    respond_with_feed(&state, key, &headers, mime::ACQUISITION_FEED, || {
        opds::render(&books_feed(&state, page, language.as_deref(), order)?, variant)
    })
}

fn books_feed(
    state: &AppState,
    page: u32,
    language: Option<&str>,
    order: BookOrder,
) -> Result<Feed> {
    let base_url = state.base_url();
    let per_page = state.config.server.page_size.max(1);
    let total = state.db.count_books(language)?;

    let mut navigation =
        Navigation::paginate(format!("{}/opds/books", base_url), page, per_page, total);
    if let Some(language) = language {
        navigation = navigation.with_param("lang", language);
    }
    if order != BookOrder::Title {
        navigation = navigation.with_param("order", order.as_str());
    }

    let books = state
        .db
        .list_books(language, order, navigation.offset(), per_page)?;

    let (id, title, self_href) = match language {
        Some(language) => (
            format!("urn:opds-catalog:books:lang:{}", language),
            format!("Books in {}", language),
            format!(
                "{}/opds/books?lang={}",
                base_url,
                urlencoding::encode(language)
            ),
        ),
        None => (
            "urn:opds-catalog:books".to_string(),
            "All books".to_string(),
            format!("{}/opds/books", base_url),
        ),
    };

    let mut feed = Feed::new(id, title);
    add_feed_links(&mut feed, base_url, self_href, mime::ACQUISITION_FEED);
    feed.add_link(Link::navigation(format!("{}/opds", base_url), rel::UP))
        .add_link(Link::sort(
            format!("{}/opds/books?order=new", base_url),
            rel::SORT_NEW,
            "Newest first",
        ))
        .add_facet(language_facet(state, language)?)
        .set_navigation(navigation);

    for book in &books {
        feed.add_entry(book_entry(book, base_url));
    }

    Ok(feed)
}

/// Search results feed.
pub async fn catalog_search(
    State(state): State<AppState>,
    Query(params): Query<CatalogParams>,
    headers: HeaderMap,
) -> Result<Response<Body>> {
    let variant = params.variant();
    let query = state.validator.search_query(params.q.as_deref())?;
    let page = state.validator.page(params.page.as_deref())?;

    let key = CacheKey::new("search", variant)
        .param("q", &query)
        .param("page", page);

    respond_with_feed(&state, key, &headers, mime::ACQUISITION_FEED, || {
        opds::render(&search_feed(&state, &query, page)?, variant)
    })
}

fn search_feed(state: &AppState, query: &str, page: u32) -> Result<Feed> {
    let base_url = state.base_url();
    let per_page = state.config.server.page_size.max(1);
    let total = state.db.count_search(query)?;

    let navigation =
        Navigation::paginate(format!("{}/opds/search", base_url), page, per_page, total)
            .with_param("q", query);
    let books = state
        .db
        .search_books(query, navigation.offset(), per_page)?;

    let mut feed = Feed::new(
        format!("urn:opds-catalog:search:{}", urlencoding::encode(query)),
        format!("Search: {}", query),
    );
    add_feed_links(
        &mut feed,
        base_url,
        format!(
            "{}/opds/search?q={}",
            base_url,
            urlencoding::encode(query)
        ),
        mime::ACQUISITION_FEED,
    );
    feed.add_link(Link::navigation(format!("{}/opds", base_url), rel::UP))
        .set_navigation(navigation);

    for book in &books {
        feed.add_entry(book_entry(book, base_url));
    }

    Ok(feed)
}

/// Single-book feed.
pub async fn catalog_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CatalogParams>,
    headers: HeaderMap,
) -> Result<Response<Body>> {
    let variant = params.variant();
    let id = state.validator.uuid_v4("id", &id)?.to_ascii_lowercase();

    let key = CacheKey::new("book", variant).param("id", &id);

    respond_with_feed(&state, key, &headers, mime::ACQUISITION_FEED, || {
        let book = state
            .db
            .get_book(&id)?
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

        let base_url = state.base_url();
        let mut feed = Feed::new(format!("urn:opds-catalog:book:{}", book.id), &book.title);
        feed.set_updated(book.updated_rfc3339());
        add_feed_links(
            &mut feed,
            base_url,
            format!("{}/opds/books/{}", base_url, book.id),
            mime::ACQUISITION_FEED,
        );
        feed.add_link(Link::navigation(format!("{}/opds/books", base_url), rel::UP))
            .add_entry(book_entry(&book, base_url));

        opds::render(&feed, variant)
    })
}

/// OpenSearch description.
pub async fn opensearch(State(state): State<AppState>) -> impl IntoResponse {
    let xml = opds::generate_opensearch(&state.config.server.title, state.base_url());
    build_response(StatusCode::OK, mime::OPENSEARCH, xml)
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
