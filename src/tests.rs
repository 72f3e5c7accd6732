use crate::config::Config;
use crate::db::{BookOrder, Database, StoredBook, encode_list, now_timestamp};
use crate::opds::{self, Entry, Feed, Link, TextKind, Variant, mime};
use crate::server::{AppState, create_router, feed_cache};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use tower::ServiceExt;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn make_book(title: &str, authors: &[&str], language: Option<&str>) -> StoredBook {
    let now = now_timestamp();
    let authors: Vec<String> = authors.iter().map(|a| a.to_string()).collect();
    StoredBook {
        id: uuid::Uuid::new_v4().to_string(),
        title: title.to_string(),
        authors_json: encode_list(&authors),
        description: Some("<p>A <b>fine</b> book".to_string()),
        language: language.map(str::to_string),
        genres_json: encode_list(&["Fiction".to_string()]),
        format: "epub".to_string(),
        file_size: 1024,
        created_at: now,
        updated_at: now,
    }
}

fn add_book(db: &Database, title: &str, authors: &[&str], language: Option<&str>) -> StoredBook {
    let book = make_book(title, authors, language);
    db.save_book(&book).unwrap();
    book
}

fn seeded_db() -> Database {
    let db = test_db();
    add_book(&db, "War and Peace", &["Leo Tolstoy"], Some("ru"));
    add_book(&db, "Anna Karenina", &["Leo Tolstoy"], Some("ru"));
    add_book(&db, "Middlemarch", &["George Eliot"], Some("en"));
    db
}

fn app_with(db: Database, page_size: u32) -> Router {
    let mut config = Config::default();
    config.server.page_size = page_size;
    create_router(AppState::new(config, db).unwrap())
}

async fn get(
    app: &Router,
    uri: &str,
    headers: &[(header::HeaderName, &str)],
) -> (StatusCode, HeaderMap, String) {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(name, *value);
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

// ============================================================================
// DATABASE
// ============================================================================

#[test]
fn db_save_and_get_book() {
    let db = test_db();
    let book = add_book(&db, "Middlemarch", &["George Eliot"], Some("en"));

    let stored = db.get_book(&book.id).unwrap().unwrap();
    assert_eq!(stored.title, "Middlemarch");
    assert_eq!(stored.authors(), vec!["George Eliot"]);
    assert_eq!(stored.genres(), vec!["Fiction"]);
    assert_eq!(stored.language.as_deref(), Some("en"));
    assert!(db.get_book("missing").unwrap().is_none());
}

#[test]
fn db_save_book_updates_existing() {
    let db = test_db();
    let mut book = add_book(&db, "Draft", &[], None);
    book.title = "Final".to_string();
    db.save_book(&book).unwrap();

    assert_eq!(db.count_books(None).unwrap(), 1);
    assert_eq!(db.get_book(&book.id).unwrap().unwrap().title, "Final");
}

#[test]
fn db_delete_book() {
    let db = test_db();
    let book = add_book(&db, "Gone", &[], None);
    assert!(db.delete_book(&book.id).unwrap());
    assert!(!db.delete_book(&book.id).unwrap());
    assert_eq!(db.count_books(None).unwrap(), 0);
}

#[test]
fn db_list_books_pages_and_filters() {
    let db = seeded_db();

    let titles: Vec<String> = db
        .list_books(None, BookOrder::Title, 0, 2)
        .unwrap()
        .into_iter()
        .map(|b| b.title)
        .collect();
    assert_eq!(titles, vec!["Anna Karenina", "Middlemarch"]);

    let rest = db.list_books(None, BookOrder::Title, 2, 2).unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].title, "War and Peace");

    assert_eq!(db.count_books(Some("ru")).unwrap(), 2);
    assert_eq!(db.list_books(Some("en"), BookOrder::Title, 0, 10).unwrap().len(), 1);
    assert_eq!(
        db.language_counts().unwrap(),
        vec![("en".to_string(), 1), ("ru".to_string(), 2)]
    );
}

#[test]
fn db_list_books_newest_first() {
    let db = test_db();
    let mut old = make_book("Old", &[], None);
    old.updated_at -= 100;
    db.save_book(&old).unwrap();
    add_book(&db, "New", &[], None);

    let books = db.list_books(None, BookOrder::Newest, 0, 10).unwrap();
    assert_eq!(books[0].title, "New");
    assert_eq!(books[1].title, "Old");
}

#[test]
fn db_search_matches_title_and_author() {
    let db = seeded_db();
    add_book(&db, "100% Pure_Fiction", &[], None);

    assert_eq!(db.count_search("tolstoy").unwrap(), 2);
    assert_eq!(db.search_books("march", 0, 10).unwrap()[0].title, "Middlemarch");
    assert_eq!(db.count_search("%").unwrap(), 1);
    assert_eq!(db.count_search("n_n").unwrap(), 0);
    assert_eq!(db.count_search("nothing here").unwrap(), 0);
}

#[test]
fn db_watermark_tracks_changes() {
    let db = test_db();
    let empty = db.watermark().unwrap();
    assert_eq!(empty, "0");

    let book = add_book(&db, "One", &[], None);
    let one = db.watermark().unwrap();
    assert_ne!(one, empty);
    assert_eq!(one, db.watermark().unwrap());

    db.delete_book(&book.id).unwrap();
    let deleted = db.watermark().unwrap();
    assert_ne!(deleted, one);
    assert_ne!(deleted, empty);

    assert!(!db.delete_book(&book.id).unwrap());
    assert_eq!(db.watermark().unwrap(), deleted);
}

#[test]
fn db_watermark_changes_on_same_second_edit() {
    let db = test_db();
    let mut book = add_book(&db, "Draft Title", &[], None);
    let before = db.watermark().unwrap();

    // Same updated_at and same row count as before.
    book.title = "Final Title".to_string();
    db.save_book(&book).unwrap();
    assert_ne!(db.watermark().unwrap(), before);
}

#[test]
fn db_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("catalog.db");

    let book = add_book(&Database::open(&path).unwrap(), "Kept", &[], None);
    let reopened = Database::open(&path).unwrap();
    assert_eq!(reopened.get_book(&book.id).unwrap().unwrap().title, "Kept");
}

// ============================================================================
// RENDERING
// ============================================================================

#[test]
fn three_entries_render_as_three_entry_elements_in_order() {
    let mut feed = Feed::new("urn:test", "Test");
    for title in ["First", "Second", "Third"] {
        let mut entry = Entry::new(format!("urn:test:{}", title), title);
        entry.add_link(Link::acquisition(format!("/dl/{}", title), "fb2"));
        feed.add_entry(entry);
    }

    for variant in [Variant::Legacy, Variant::Current] {
        let xml = String::from_utf8(opds::render(&feed, variant).unwrap()).unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();

        let titles: Vec<&str> = doc
            .root_element()
            .children()
            .filter(|n| n.has_tag_name("entry"))
            .map(|entry| {
                entry
                    .children()
                    .find(|n| n.has_tag_name("title"))
                    .and_then(|n| n.text())
                    .unwrap()
            })
            .collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
    }
}

#[test]
fn author_names_bypass_sanitization_but_summaries_do_not() {
    let raw = "Ёжик <b>Büsch</b> ©";
    let mut entry = Entry::new("urn:e", "Title");
    entry.add_author(raw, None).set_summary(raw, TextKind::Text);
    let mut feed = Feed::new("urn:f", "Feed");
    feed.add_entry(entry);

    let xml = String::from_utf8(opds::render(&feed, Variant::Current).unwrap()).unwrap();
    let doc = roxmltree::Document::parse(&xml).unwrap();

    let text_of = |name: &str| {
        doc.descendants()
            .find(|n| n.has_tag_name(name))
            .and_then(|n| n.text())
            .unwrap()
            .to_string()
    };
    assert_eq!(text_of("name"), raw);
    assert_eq!(text_of("summary"), "Ёжик bBusch/b");
}

#[test]
fn noncharacters_in_verbatim_title_are_dropped() {
    let mut feed = Feed::new("urn:x", "Bad\u{FFFF}Title\u{FFFE}");
    let mut entry = Entry::new("urn:x:1", "Entry\u{FFFE}");
    entry.add_author("Au\u{FFFF}thor", None);
    feed.add_entry(entry);

    for variant in [Variant::Legacy, Variant::Current] {
        let xml = String::from_utf8(opds::render(&feed, variant).unwrap()).unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();

        let title = doc
            .root_element()
            .children()
            .find(|n| n.has_tag_name("title"))
            .and_then(|n| n.text());
        assert_eq!(title, Some("BadTitle"));
        let name = doc
            .descendants()
            .find(|n| n.has_tag_name("name"))
            .and_then(|n| n.text());
        assert_eq!(name, Some("Author"));
    }
}

#[test]
fn error_document_is_a_valid_feed() {
    let err = crate::AppError::validation("q", "is required");
    let xml = String::from_utf8(opds::error_document(&err)).unwrap();
    let doc = roxmltree::Document::parse(&xml).unwrap();

    let id = doc
        .descendants()
        .find(|n| n.has_tag_name("id"))
        .and_then(|n| n.text());
    assert_eq!(id, Some("urn:opds-catalog:error:validation"));
    assert!(xml.contains("400 Bad Request"));
    assert!(xml.contains("is required"));
}

// ============================================================================
// HTTP
// ============================================================================

#[tokio::test]
async fn root_feed_has_cache_headers() {
    let app = app_with(seeded_db(), 30);
    let (status, headers, body) = get(&app, "/opds", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], mime::NAVIGATION);
    assert!(headers.contains_key(header::ETAG));
    assert!(headers.contains_key(header::LAST_MODIFIED));
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=3600");

    let doc = roxmltree::Document::parse(&body).unwrap();
    assert!(body.contains("New arrivals"));
    assert!(body.contains("/opds/books?lang=ru"));
    assert_eq!(
        doc.root_element()
            .children()
            .filter(|n| n.has_tag_name("entry"))
            .count(),
        // All books, two languages, three new arrivals.
        6
    );
}

#[tokio::test]
async fn matching_if_none_match_returns_304() {
    let app = app_with(seeded_db(), 30);
    let (_, headers, first) = get(&app, "/opds/books", &[]).await;
    let etag = headers[header::ETAG].to_str().unwrap().to_string();

    let (status, headers, body) =
        get(&app, "/opds/books", &[(header::IF_NONE_MATCH, etag.as_str())]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert_eq!(headers[header::ETAG].to_str().unwrap(), etag);

    let (status, _, body) =
        get(&app, "/opds/books", &[(header::IF_NONE_MATCH, "\"stale\"")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, first);
}

#[tokio::test]
async fn books_feed_paginates_and_facets() {
    let app = app_with(seeded_db(), 2);
    let (status, headers, body) = get(&app, "/opds/books", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], mime::ACQUISITION_FEED);
    assert!(body.contains(r#"href="/opds/books?page=2" rel="next""#), "{}", body);
    assert!(body.contains("<opds:numberOfItems>3</opds:numberOfItems>"));
    assert!(body.contains("<opds:itemsPerPage>2</opds:itemsPerPage>"));
    assert!(body.contains(r#"opds:facetGroup="Language""#));
    assert!(body.contains(r#"type="application/epub+zip""#));

    let (_, _, page2) = get(&app, "/opds/books?page=2", &[]).await;
    assert!(page2.contains("War and Peace"));
    assert!(!page2.contains("Anna Karenina"));
    assert!(page2.contains(r#"rel="previous""#));
}

#[tokio::test]
async fn language_filter_marks_active_facet() {
    let app = app_with(seeded_db(), 30);
    let (status, _, body) = get(&app, "/opds/books?lang=en", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Middlemarch"));
    assert!(!body.contains("War and Peace"));
    assert!(body.contains(r#"opds:facetGroup="Language" opds:activeFacet="true" thr:count="1""#));
}

#[tokio::test]
async fn legacy_version_omits_counters_and_facets() {
    let app = app_with(seeded_db(), 2);
    let (status, _, body) = get(&app, "/opds/books?version=1.0", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("numberOfItems"));
    assert!(!body.contains("facetGroup"));
    assert!(body.contains(r#"rel="next""#));

    let (_, _, current) = get(&app, "/opds/books?version=1.2", &[]).await;
    assert_ne!(body, current);
}

#[tokio::test]
async fn search_finds_by_author() {
    let app = app_with(seeded_db(), 30);
    let (status, _, body) = get(&app, "/opds/search?q=Tolstoy", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<title>Search: Tolstoy</title>"));
    assert!(body.contains("Anna Karenina"));
    assert!(body.contains("War and Peace"));
    assert!(!body.contains("Middlemarch"));
}

#[tokio::test]
async fn empty_search_is_a_validation_error_feed() {
    let app = app_with(seeded_db(), 30);

    for uri in ["/opds/search", "/opds/search?q=", "/opds/search?q=%20%20"] {
        let (status, headers, body) = get(&app, uri, &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(headers[header::CONTENT_TYPE], mime::CATALOG);
        roxmltree::Document::parse(&body).unwrap();
        assert!(body.contains("urn:opds-catalog:error:validation"));
    }
}

#[tokio::test]
async fn invalid_page_is_rejected() {
    let app = app_with(seeded_db(), 30);
    let (status, _, _) = get(&app, "/opds/books?page=abc", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get(&app, "/opds/books?order=random", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_book_lookup() {
    let db = seeded_db();
    let book = add_book(&db, "Emma", &["Jane Austen"], Some("en"));
    let app = app_with(db, 30);

    let (status, _, body) = get(&app, &format!("/opds/books/{}", book.id), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<title>Emma</title>"));
    assert!(body.contains("<dc:language>en</dc:language>"));
    assert!(body.contains(&format!("urn:uuid:{}", book.id)));

    let missing = uuid::Uuid::new_v4();
    let (status, _, body) = get(&app, &format!("/opds/books/{}", missing), &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("urn:opds-catalog:error:not-found"));

    let (status, _, _) = get(&app, "/opds/books/not-a-uuid", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_returns_error_feed() {
    let app = app_with(test_db(), 30);
    let (status, _, body) = get(&app, "/nowhere", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("urn:opds-catalog:error:not-found"));
}

#[tokio::test]
async fn catalog_changes_invalidate_cached_feeds() {
    let db = seeded_db();
    let app = app_with(db.clone(), 30);

    let (_, headers, before) = get(&app, "/opds/books", &[]).await;
    let etag = headers[header::ETAG].to_str().unwrap().to_string();
    assert!(!before.contains("Emma"));

    add_book(&db, "Emma", &["Jane Austen"], Some("en"));

    let (status, headers, after) =
        get(&app, "/opds/books", &[(header::IF_NONE_MATCH, etag.as_str())]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(after.contains("Emma"));
    assert_ne!(headers[header::ETAG].to_str().unwrap(), etag);
}

#[tokio::test]
async fn in_place_edit_invalidates_cached_feed() {
    let db = test_db();
    let mut book = add_book(&db, "Draft Title", &["Anon"], None);
    let app = app_with(db.clone(), 30);

    let (_, _, before) = get(&app, "/opds/books", &[]).await;
    assert!(before.contains("Draft Title"));

    book.title = "Final Title".to_string();
    db.save_book(&book).unwrap();

    let (status, _, after) = get(&app, "/opds/books", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(after.contains("Final Title"));
    assert!(!after.contains("Draft Title"));
}

#[tokio::test]
async fn cached_feed_is_served_until_data_changes() {
    let app = app_with(seeded_db(), 30);
    let (_, first_headers, first) = get(&app, "/opds", &[]).await;
    let (_, second_headers, second) = get(&app, "/opds", &[]).await;

    assert_eq!(first, second);
    assert_eq!(first_headers[header::ETAG], second_headers[header::ETAG]);
    assert_eq!(
        first_headers[header::LAST_MODIFIED],
        second_headers[header::LAST_MODIFIED]
    );
}

#[tokio::test]
async fn disabled_cache_still_sets_etag() {
    let mut config = Config::default();
    config.cache.enabled = false;
    let app = create_router(AppState::new(config, seeded_db()).unwrap());

    let (status, headers, _) = get(&app, "/opds/books", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key(header::ETAG));
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=0");
}

#[tokio::test]
async fn opensearch_description() {
    let app = app_with(test_db(), 30);
    let (status, headers, body) = get(&app, "/opensearch.xml", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], mime::OPENSEARCH);
    assert!(body.contains("/opds/search?q={searchTerms}"));
    roxmltree::Document::parse(&body).unwrap();
}

#[tokio::test]
async fn sqlite_cache_backend_serves_feeds() {
    let db = seeded_db();
    let config = Config::default();
    let store = std::sync::Arc::new(crate::cache::SqliteStore::open_memory().unwrap());
    let cache = feed_cache(store.clone(), &config, db.clone());
    let app = create_router(AppState::with_cache(
        config,
        db,
        Some(std::sync::Arc::new(cache)),
    ));

    let (status, _, first) = get(&app, "/opds/search?q=Eliot", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(first.contains("Middlemarch"));

    let keys = crate::cache::CacheStore::keys(&*store).unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("search:"));

    let (_, _, second) = get(&app, "/opds/search?q=Eliot", &[]).await;
    assert_eq!(first, second);
}
