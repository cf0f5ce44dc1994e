//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::extract::CommentStub;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CommentRecord, CrawlStatus, ImageInsert, ImageRecord, PostData, PostDetailRecord, PostRecord,
    PostSummary, ProgressRecord, UpsertAction, UpsertOutcome,
};
use crate::GalleryError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const POST_COLUMNS: &str = "p.id, p.number, p.title, p.author, p.author_id, p.author_ip, p.date,
     p.views, p.votes, p.content, p.first_seen_at, p.updated_at";

const IMAGE_COLUMNS: &str = "i.id, i.post_id, i.file_path, i.hash";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    writes: u64,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(GalleryError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, GalleryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(StorageError::from)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )
        .map_err(StorageError::from)?;

        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self { conn, writes: 0 })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, GalleryError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn, writes: 0 })
    }

    /// Number of committed write operations issued through this handle
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        id: row.get(0)?,
        number: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        author_id: row.get(4)?,
        author_ip: row.get(5)?,
        date: row.get(6)?,
        views: row.get(7)?,
        votes: row.get(8)?,
        content: row.get(9)?,
        first_seen_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn map_image(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        post_id: row.get(1)?,
        file_path: row.get(2)?,
        hash: row.get(3)?,
    })
}

fn post_exists(conn: &Connection, post_id: i64) -> StorageResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM posts WHERE id = ?1", params![post_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

impl Storage for SqliteStorage {
    // ===== Posts =====

    fn upsert_post(
        &mut self,
        post: &PostData,
        comment_count: usize,
    ) -> StorageResult<UpsertOutcome> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        let existing: Option<(i64, i64, i64)> = tx
            .query_row(
                "SELECT id, views, votes FROM posts WHERE number = ?1",
                params![post.number],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO posts (number, title, author, author_id, author_ip, date, views, votes,
                     content, first_seen_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        post.number,
                        post.title,
                        post.author,
                        post.author_id,
                        post.author_ip,
                        post.date,
                        post.views,
                        post.votes,
                        post.content,
                        now
                    ],
                )?;
                UpsertOutcome {
                    action: UpsertAction::Inserted,
                    post_id: tx.last_insert_rowid(),
                }
            }
            Some((id, views, votes)) => {
                let stored_comments: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;

                if views != post.views
                    || votes != post.votes
                    || stored_comments != comment_count as i64
                {
                    tx.execute(
                        "UPDATE posts SET title = ?1, date = ?2, views = ?3, votes = ?4, content = ?5,
                         updated_at = ?6 WHERE id = ?7",
                        params![post.title, post.date, post.views, post.votes, post.content, now, id],
                    )?;
                    UpsertOutcome {
                        action: UpsertAction::Updated,
                        post_id: id,
                    }
                } else {
                    UpsertOutcome {
                        action: UpsertAction::Unchanged,
                        post_id: id,
                    }
                }
            }
        };

        tx.commit()?;
        if outcome.action != UpsertAction::Unchanged {
            self.writes += 1;
        }
        Ok(outcome)
    }

    fn get_post_by_number(&self, number: &str) -> StorageResult<Option<PostRecord>> {
        let post = self
            .conn
            .query_row(
                &format!("SELECT {} FROM posts p WHERE p.number = ?1", POST_COLUMNS),
                params![number],
                map_post,
            )
            .optional()?;
        Ok(post)
    }

    fn get_post(&self, post_id: i64) -> StorageResult<PostDetailRecord> {
        let post = self
            .conn
            .query_row(
                &format!("SELECT {} FROM posts p WHERE p.id = ?1", POST_COLUMNS),
                params![post_id],
                map_post,
            )
            .optional()?
            .ok_or_else(|| StorageError::PostNotFound(format!("Post ID {}", post_id)))?;

        Ok(PostDetailRecord {
            comments: self.get_comments(post_id)?,
            images: self.get_post_images(post_id)?,
            post,
        })
    }

    fn list_posts(&self, page: u32, page_size: u32) -> StorageResult<(Vec<PostSummary>, u64)> {
        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {},
             (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
             (SELECT COUNT(*) FROM post_images pi WHERE pi.post_id = p.id)
             FROM posts p
             ORDER BY CAST(p.number AS INTEGER) DESC
             LIMIT ?1 OFFSET ?2",
            POST_COLUMNS
        ))?;

        let posts = stmt
            .query_map(params![i64::from(page_size), offset], |row| {
                Ok(PostSummary {
                    post: map_post(row)?,
                    comment_count: row.get::<_, i64>(12)? as u64,
                    image_count: row.get::<_, i64>(13)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((posts, self.count_posts()?))
    }

    fn recent_posts(&self, limit: u32) -> StorageResult<Vec<PostRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM posts p ORDER BY CAST(p.number AS INTEGER) DESC LIMIT ?1",
            POST_COLUMNS
        ))?;

        let posts = stmt
            .query_map(params![i64::from(limit)], map_post)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(posts)
    }

    fn post_dates(&self) -> StorageResult<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, date FROM posts ORDER BY id")?;
        let dates = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dates)
    }

    fn count_posts(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn remove_post(&mut self, post_id: i64) -> StorageResult<Vec<ImageRecord>> {
        let tx = self.conn.transaction()?;

        if !post_exists(&tx, post_id)? {
            return Err(StorageError::PostNotFound(format!("Post ID {}", post_id)));
        }

        let owned = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM images i WHERE i.post_id = ?1 ORDER BY i.id",
                IMAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![post_id], map_image)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut removed = Vec::new();
        for image in owned {
            let new_owner: Option<i64> = tx.query_row(
                "SELECT MIN(post_id) FROM post_images WHERE image_id = ?1 AND post_id != ?2",
                params![image.id, post_id],
                |row| row.get(0),
            )?;

            match new_owner {
                Some(owner) => {
                    tx.execute(
                        "UPDATE images SET post_id = ?1 WHERE id = ?2",
                        params![owner, image.id],
                    )?;
                }
                None => removed.push(image),
            }
        }

        tx.execute("DELETE FROM post_images WHERE post_id = ?1", params![post_id])?;
        for image in &removed {
            tx.execute("DELETE FROM images WHERE id = ?1", params![image.id])?;
        }
        tx.execute("DELETE FROM comments WHERE post_id = ?1", params![post_id])?;
        tx.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;

        tx.commit()?;
        self.writes += 1;
        Ok(removed)
    }

    // ===== Comments =====

    fn append_comment(&mut self, post_id: i64, comment: &CommentStub) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        if !post_exists(&tx, post_id)? {
            return Err(StorageError::PostNotFound(format!("Post ID {}", post_id)));
        }

        tx.execute(
            "INSERT INTO comments (post_id, author, content, date, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![post_id, comment.author, comment.content, comment.date, now],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;
        self.writes += 1;
        Ok(id)
    }

    fn append_new_comments(
        &mut self,
        post_id: i64,
        comments: &[CommentStub],
    ) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        if !post_exists(&tx, post_id)? {
            return Err(StorageError::PostNotFound(format!("Post ID {}", post_id)));
        }

        let mut inserted = 0;
        for comment in comments {
            let known: Option<i64> = tx
                .query_row(
                    "SELECT id FROM comments
                     WHERE post_id = ?1 AND author = ?2 AND content = ?3 AND date = ?4 LIMIT 1",
                    params![post_id, comment.author, comment.content, comment.date],
                    |row| row.get(0),
                )
                .optional()?;

            if known.is_some() {
                continue;
            }

            tx.execute(
                "INSERT INTO comments (post_id, author, content, date, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![post_id, comment.author, comment.content, comment.date, now],
            )?;
            inserted += 1;
        }

        tx.commit()?;
        if inserted > 0 {
            self.writes += 1;
        }
        Ok(inserted)
    }

    fn get_comments(&self, post_id: i64) -> StorageResult<Vec<CommentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, post_id, author, content, date FROM comments WHERE post_id = ?1 ORDER BY id",
        )?;

        let comments = stmt
            .query_map(params![post_id], |row| {
                Ok(CommentRecord {
                    id: row.get(0)?,
                    post_id: row.get(1)?,
                    author: row.get(2)?,
                    content: row.get(3)?,
                    date: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(comments)
    }

    fn count_comments(&self, post_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_all_comments(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Images =====

    fn find_image_by_hash(&self, hash: &str) -> StorageResult<Option<ImageRecord>> {
        let image = self
            .conn
            .query_row(
                &format!("SELECT {} FROM images i WHERE i.hash = ?1", IMAGE_COLUMNS),
                params![hash],
                map_image,
            )
            .optional()?;
        Ok(image)
    }

    fn insert_image(
        &mut self,
        post_id: i64,
        file_path: &str,
        hash: &str,
    ) -> StorageResult<ImageInsert> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            "INSERT INTO images (post_id, file_path, hash, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hash) DO NOTHING",
            params![post_id, file_path, hash, now],
        )?;

        let record = tx.query_row(
            &format!("SELECT {} FROM images i WHERE i.hash = ?1", IMAGE_COLUMNS),
            params![hash],
            map_image,
        )?;

        tx.commit()?;

        if changed > 0 {
            self.writes += 1;
            Ok(ImageInsert::Inserted(record))
        } else {
            Ok(ImageInsert::Existing(record))
        }
    }

    fn link_post_images(&mut self, post_id: i64, image_ids: &[i64]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM post_images WHERE post_id = ?1", params![post_id])?;
        for (position, image_id) in image_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO post_images (post_id, image_id, position) VALUES (?1, ?2, ?3)",
                params![post_id, image_id, position as i64],
            )?;
        }

        tx.commit()?;
        self.writes += 1;
        Ok(())
    }

    fn get_post_images(&self, post_id: i64) -> StorageResult<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM post_images pi JOIN images i ON i.id = pi.image_id
             WHERE pi.post_id = ?1 ORDER BY pi.position",
            IMAGE_COLUMNS
        ))?;

        let images = stmt
            .query_map(params![post_id], map_image)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(images)
    }

    fn exclusive_images(&self, post_id: i64) -> StorageResult<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM images i
             WHERE i.post_id = ?1
             AND NOT EXISTS (
                 SELECT 1 FROM post_images pi WHERE pi.image_id = i.id AND pi.post_id != ?1
             )
             ORDER BY i.id",
            IMAGE_COLUMNS
        ))?;

        let images = stmt
            .query_map(params![post_id], map_image)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(images)
    }

    fn count_images(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Progress =====

    fn save_progress(&mut self, progress: &ProgressRecord) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_progress
             (id, target_url, current_page, total_pages, total_processed, status, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                progress.target_url,
                progress.current_page,
                progress.total_pages,
                progress.total_processed as i64,
                progress.status.to_db_string(),
                now
            ],
        )?;
        self.writes += 1;
        Ok(())
    }

    fn get_progress(&self) -> StorageResult<Option<ProgressRecord>> {
        let progress = self
            .conn
            .query_row(
                "SELECT target_url, current_page, total_pages, total_processed, status, updated_at
                 FROM crawl_progress WHERE id = 1",
                [],
                |row| {
                    Ok(ProgressRecord {
                        target_url: row.get(0)?,
                        current_page: row.get(1)?,
                        total_pages: row.get(2)?,
                        total_processed: row.get::<_, i64>(3)? as u64,
                        status: CrawlStatus::from_db_string(&row.get::<_, String>(4)?)
                            .unwrap_or(CrawlStatus::Stopped),
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(progress)
    }
}
