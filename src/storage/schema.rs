//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the gallery database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Posts, keyed by the site-assigned number
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    number TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    author_id TEXT NOT NULL DEFAULT '',
    author_ip TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL DEFAULT '',
    views INTEGER NOT NULL DEFAULT 0,
    votes INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL DEFAULT '',
    first_seen_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Comments, append-only
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL REFERENCES posts(id),
    author TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

-- Content-addressed image index: one row per unique hash
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL REFERENCES posts(id),
    file_path TEXT NOT NULL,
    hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_post ON images(post_id);

-- Ordered image references of each post (including deduplicated ones)
CREATE TABLE IF NOT EXISTS post_images (
    post_id INTEGER NOT NULL REFERENCES posts(id),
    image_id INTEGER NOT NULL REFERENCES images(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (post_id, position)
);

CREATE INDEX IF NOT EXISTS idx_post_images_image ON post_images(image_id);

-- Singleton progress record of the latest crawl
CREATE TABLE IF NOT EXISTS crawl_progress (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    target_url TEXT NOT NULL,
    current_page INTEGER NOT NULL,
    total_pages INTEGER NOT NULL,
    total_processed INTEGER NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
