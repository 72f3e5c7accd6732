//! opds-catalog server entry point.

use clap::Parser;
use opds_catalog::{
    cache::CacheManager,
    config::{BookCommand, CacheBackend, CacheCommand, Cli, Command, Config},
    db::{self, BookOrder, Database, StoredBook},
    server,
    validate::Validator,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::Book { action }) => cmd_book(action, &config).await,
        Some(Command::Cache { action }) => cmd_cache(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: opds-catalog book add \"<title>\" --author \"<name>\"");

    Ok(())
}

/// Catalog management commands.
async fn cmd_book(action: BookCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let validator = Validator::new(config.limits.clone());

    match action {
        BookCommand::Add {
            title,
            author,
            description,
            language,
            genre,
            format,
            size,
        } => {
            let title = validator.required("title", Some(title.as_str()))?.to_string();
            let language = language
                .as_deref()
                .map(|l| validator.language("language", l))
                .transpose()?;
            let format = validator.string("format", &format, Some(16))?.to_lowercase();
            let now = db::now_timestamp();

            let book = StoredBook {
                id: uuid::Uuid::new_v4().to_string(),
                title,
                authors_json: db::encode_list(&author),
                description,
                language,
                genres_json: db::encode_list(&genre),
                format,
                file_size: size.max(0),
                created_at: now,
                updated_at: now,
            };

            db.save_book(&book)?;
            println!("Added book: {} (id: {})", book.title, book.id);
        }

        BookCommand::Del { id } => {
            let id = validator.uuid_v4("id", &id)?;
            if db.delete_book(id)? {
                println!("Deleted book: {}", id);
            } else {
                println!("Book not found: {}", id);
            }
        }

        BookCommand::List => {
            let total = db.count_books(None)?;
            let books = db.list_books(None, BookOrder::Title, 0, u32::MAX)?;
            if books.is_empty() {
                println!("No books found.");
            } else {
                println!("{:<36} {:<8} {:<6} TITLE", "ID", "FORMAT", "LANG");
                println!("{}", "-".repeat(80));
                for book in books {
                    println!(
                        "{:<36} {:<8} {:<6} {}",
                        book.id,
                        book.format,
                        book.language.as_deref().unwrap_or("-"),
                        book.title
                    );
                }
                println!("\n{} books", total);
            }
        }
    }

    Ok(())
}

/// Feed cache commands.
async fn cmd_cache(action: CacheCommand, config: &Config) -> anyhow::Result<()> {
    match action {
        CacheCommand::Clear { pattern } => {
            if config.cache.backend == CacheBackend::Memory {
                println!("Memory cache lives in the server process; restart it to clear.");
                return Ok(());
            }

            let store = server::open_cache_store(config)?;
            let cache = CacheManager::new(
                store,
                Duration::from_secs(config.cache.ttl_seconds),
                String::new,
            );

            match pattern {
                Some(pattern) => {
                    let removed = cache.invalidate_by_pattern(&pattern);
                    println!("Removed {} cached feeds matching {}", removed, pattern);
                }
                None => {
                    cache.invalidate_all();
                    println!("Cleared feed cache: {}", config.cache.path.display());
                }
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opds_catalog=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Open database
    let db = Database::open(&config.database.path)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        cache = config.cache.enabled,
        backend = ?config.cache.backend,
        ttl_seconds = config.cache.ttl_seconds,
        "Starting opds-catalog server"
    );

    let books = db.count_books(None)?;
    if books == 0 {
        tracing::warn!(
            "Catalog is empty. Add books with: opds-catalog book add \"<title>\" --author \"<name>\""
        );
    }

    // Create application state
    let bind = config.server.bind;
    let state = server::AppState::new(config, db)?;

    // Create router
    let app = server::create_router(state);

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %bind, books, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
