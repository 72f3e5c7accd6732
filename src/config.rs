use crate::validate::Limits;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// OPDS catalog server for self-hosted e-book libraries.
#[derive(Parser, Debug, Clone)]
#[command(name = "opds-catalog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "OPDS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Catalog management commands.
    Book {
        /// Book subcommand action.
        #[command(subcommand)]
        action: BookCommand,
    },

    /// Feed cache commands.
    Cache {
        /// Cache subcommand action.
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Catalog management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum BookCommand {
    /// Add a book record.
    Add {
        /// Book title.
        title: String,
        /// Author (repeatable).
        #[arg(short, long)]
        author: Vec<String>,
        /// Description, may contain HTML.
        #[arg(short, long)]
        description: Option<String>,
        /// Language code.
        #[arg(short, long)]
        language: Option<String>,
        /// Genre (repeatable).
        #[arg(short, long)]
        genre: Vec<String>,
        /// File type.
        #[arg(short, long, default_value = "epub")]
        format: String,
        /// File size in bytes.
        #[arg(long, default_value_t = 0)]
        size: i64,
    },

    /// Delete a book record.
    Del {
        /// Book ID.
        id: String,
    },

    /// List book records.
    List,
}

/// Feed cache subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Drop cached feeds.
    Clear {
        /// Only drop keys matching this glob (e.g. "books:*").
        #[arg(short, long)]
        pattern: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Feed cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request parameter limits.
    #[serde(default)]
    pub limits: Limits,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Catalog title.
    #[serde(default = "default_title")]
    pub title: String,

    /// URL prefix for generated links (empty for relative links).
    #[serde(default)]
    pub base_url: String,

    /// Entries per acquisition feed page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
            base_url: String::new(),
            page_size: default_page_size(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "My Library".to_string()
}

fn default_page_size() -> u32 {
    30
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

/// Where cached feeds are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process map, lost on restart.
    #[default]
    Memory,
    /// SQLite file at `cache.path`.
    Sqlite,
}

/// Feed cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether rendered feeds are cached.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Storage backend.
    #[serde(default)]
    pub backend: CacheBackend,

    /// Cache database path for the sqlite backend.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Lifetime of a cached feed in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend: CacheBackend::default(),
            path: default_cache_path(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/feed-cache.db")
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("opds-catalog.toml"),
            dirs::config_dir()
                .map(|p| p.join("opds-catalog").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/opds-catalog/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# opds-catalog configuration

[server]
bind = "0.0.0.0:8080"
title = "My Library"
# Prefix for generated links, e.g. "https://books.example.org"
base_url = ""
page_size = 30

[database]
# path = "/var/lib/opds-catalog/catalog.db"

[cache]
enabled = true
# Backend: "memory" or "sqlite"
backend = "memory"
# path = "/var/lib/opds-catalog/feed-cache.db"
ttl_seconds = 3600

[limits]
max_query_length = 100
max_string_length = 255
"#
        .to_string()
    }
}
