//! Archival of old posts
//!
//! A post whose publish date is older than the cutoff is written to
//! `post_<number>.tar.gz` in the archive directory and then removed from the
//! live store. The tarball holds `post.json` (post, comments and image index
//! rows) plus an `images/` folder with the files only this post owned.
//!
//! Images that other live posts still reference stay on disk and are handed to
//! the earliest such post.

use crate::storage::{CommentRecord, ImageRecord, PostRecord, SqliteStorage, Storage};
use crate::GalleryError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MANIFEST_NAME: &str = "post.json";

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y.%m.%d %H:%M:%S"];

/// Content of an archive's manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedPost {
    pub post: PostRecord,
    pub comments: Vec<CommentRecord>,

    /// Every image the post referenced, in order
    pub images: Vec<ImageRecord>,

    /// Index paths of the image files bundled under `images/`
    pub bundled_images: Vec<String>,
}

/// Result of an archival pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archived: Vec<PathBuf>,
    /// Posts older than the cutoff that could not be archived
    pub failed: usize,
    /// Posts whose date could not be read
    pub undated: usize,
}

/// Parses a site-formatted publish date
///
/// Accepts `2024-05-01 12:34:56`, `2024-05-01 12:34`, `2024.05.01 12:34:56`,
/// `2024-05-01`, `2024.05.01` and `24.05.01`.
pub fn parse_post_date(date: &str) -> Option<NaiveDateTime> {
    let date = date.trim();

    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(date, format) {
            return Some(parsed);
        }
    }

    let date_only = if date.contains('-') {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    } else if date.split('.').next().map(str::len) == Some(2) {
        NaiveDate::parse_from_str(date, "%y.%m.%d").ok()
    } else {
        NaiveDate::parse_from_str(date, "%Y.%m.%d").ok()
    };

    date_only.and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Archives every post published more than `max_age_days` before `now`
///
/// # Arguments
///
/// * `storage` - Shared store handle
/// * `images_dir` - Root the image index paths are relative to
/// * `archive_dir` - Destination of the tarballs, created if needed
/// * `max_age_days` - Age threshold
/// * `now` - Reference time for the cutoff
pub fn archive_older_than(
    storage: &Mutex<SqliteStorage>,
    images_dir: &Path,
    archive_dir: &Path,
    max_age_days: u32,
    now: DateTime<Utc>,
) -> Result<ArchiveReport, GalleryError> {
    std::fs::create_dir_all(archive_dir)?;
    let cutoff = (now - Duration::days(i64::from(max_age_days))).naive_utc();

    let dates = storage.lock().unwrap().post_dates()?;
    let mut report = ArchiveReport::default();

    for (post_id, date) in dates {
        let Some(published) = parse_post_date(&date) else {
            tracing::debug!("Post {} has unreadable date '{}', keeping it", post_id, date);
            report.undated += 1;
            continue;
        };

        if published >= cutoff {
            continue;
        }

        let mut storage = storage.lock().unwrap();
        match archive_post(&mut storage, post_id, images_dir, archive_dir) {
            Ok(path) => {
                tracing::info!("Archived post {} to {}", post_id, path.display());
                report.archived.push(path);
            }
            Err(e) => {
                tracing::warn!("Failed to archive post {}: {}", post_id, e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Writes one post's archive and removes the post from the store
fn archive_post(
    storage: &mut SqliteStorage,
    post_id: i64,
    images_dir: &Path,
    archive_dir: &Path,
) -> Result<PathBuf, GalleryError> {
    let detail = storage.get_post(post_id)?;
    let exclusive = storage.exclusive_images(post_id)?;

    let bundled: Vec<&ImageRecord> = exclusive
        .iter()
        .filter(|image| {
            let present = images_dir.join(&image.file_path).is_file();
            if !present {
                tracing::warn!("Image file {} is missing, archiving index row only", image.file_path);
            }
            present
        })
        .collect();

    let manifest = ArchivedPost {
        bundled_images: bundled.iter().map(|image| image.file_path.clone()).collect(),
        post: detail.post,
        comments: detail.comments,
        images: detail.images,
    };

    let path = archive_dir.join(format!("post_{}.tar.gz", manifest.post.number));
    let partial = archive_dir.join(format!("post_{}.tar.gz.part", manifest.post.number));

    if let Err(e) = write_tarball(&partial, &manifest, &bundled, images_dir) {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    std::fs::rename(&partial, &path)?;

    let removed = match storage.remove_post(post_id) {
        Ok(removed) => removed,
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
    };

    for image in removed {
        let file = images_dir.join(&image.file_path);
        if let Err(e) = std::fs::remove_file(&file) {
            tracing::warn!("Could not delete archived image {}: {}", file.display(), e);
        }
    }

    Ok(path)
}

fn write_tarball(
    path: &Path,
    manifest: &ArchivedPost,
    images: &[&ImageRecord],
    images_dir: &Path,
) -> Result<(), GalleryError> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| GalleryError::Archive(format!("manifest encoding failed: {}", e)))?;

    let encoder = GzEncoder::new(File::create(path)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(json.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, MANIFEST_NAME, json.as_slice())?;

    for image in images {
        builder.append_path_with_name(
            images_dir.join(&image.file_path),
            format!("images/{}", image.file_path),
        )?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

/// Reads the manifest back from an archive
pub fn read_archive(path: &Path) -> Result<ArchivedPost, GalleryError> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        if entry_path.as_path() != Path::new(MANIFEST_NAME) {
            continue;
        }

        let mut json = String::new();
        entry.read_to_string(&mut json)?;
        return serde_json::from_str(&json)
            .map_err(|e| GalleryError::Archive(format!("invalid manifest in {}: {}", path.display(), e)));
    }

    Err(GalleryError::Archive(format!(
        "{} has no {}",
        path.display(),
        MANIFEST_NAME
    )))
}
