//! Content-addressed image storage
//!
//! Images are downloaded once per distinct content. The SHA-256 of the bytes is
//! the identity: when the hash is already indexed the existing file is reused
//! and nothing new is written to disk.

use crate::crawler::Fetcher;
use crate::extract::ImageRef;
use crate::storage::{ImageInsert, SqliteStorage, Storage};
use crate::ImageError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

/// Extensions kept when naming stored files
const KNOWN_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Used when neither the suggested name nor the URL carries a known extension
const DEFAULT_EXTENSION: &str = ".jpg";

/// A stored (or reused) image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub image_id: i64,
    pub hash: String,

    /// Absolute location of the file on disk
    pub path: PathBuf,

    /// True when the bytes were already indexed and no file was written
    pub deduplicated: bool,
}

/// Writes image files below a root directory and indexes them by hash
#[derive(Debug, Clone)]
pub struct ImageStore {
    images_dir: PathBuf,
}

impl ImageStore {
    /// Creates the store, creating the directory if needed
    pub fn new(images_dir: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let images_dir = images_dir.into();
        std::fs::create_dir_all(&images_dir)?;
        Ok(Self { images_dir })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Resolves an index path (relative to the images directory)
    pub fn resolve(&self, file_path: &str) -> PathBuf {
        self.images_dir.join(file_path)
    }

    /// Downloads an image and stores it unless its content is already known
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Fetcher used for the download
    /// * `storage` - Shared storage holding the image index
    /// * `post_id` - Post that references the image
    /// * `post_number` - Site number of that post, used in the file name
    /// * `index` - 1-based position of the image within the post
    /// * `image` - The reference extracted from the detail page
    pub async fn store(
        &self,
        fetcher: &Fetcher,
        storage: &Mutex<SqliteStorage>,
        post_id: i64,
        post_number: u64,
        index: usize,
        image: &ImageRef,
    ) -> Result<StoredImage, ImageError> {
        let bytes = fetcher.fetch_bytes(&image.url).await?;
        self.store_bytes(storage, post_id, post_number, index, image, &bytes)
    }

    /// Stores already-downloaded bytes
    pub fn store_bytes(
        &self,
        storage: &Mutex<SqliteStorage>,
        post_id: i64,
        post_number: u64,
        index: usize,
        image: &ImageRef,
        bytes: &[u8],
    ) -> Result<StoredImage, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty {
                url: image.url.to_string(),
            });
        }

        let hash = content_hash(bytes);

        let known = storage.lock().unwrap().find_image_by_hash(&hash)?;
        if let Some(record) = known {
            tracing::debug!("Image {} already stored as {}", image.url, record.file_path);
            return Ok(StoredImage {
                image_id: record.id,
                hash,
                path: self.resolve(&record.file_path),
                deduplicated: true,
            });
        }

        let preferred = image_file_name(post_number, index, &image.suggested_filename, &image.url);

        // Each writer stages its own copy so concurrent stores never share a temp file
        let partial = self.resolve(&format!(
            ".{}.{:016x}.part",
            &hash[..12],
            rand::random::<u64>()
        ));
        std::fs::write(&partial, bytes)?;
        let placed = self.place(&partial, &preferred, &hash);
        let _ = std::fs::remove_file(&partial);
        let (file_name, created) = placed?;
        let path = self.resolve(&file_name);

        let inserted = storage
            .lock()
            .unwrap()
            .insert_image(post_id, &file_name, &hash);

        match inserted {
            Ok(ImageInsert::Inserted(record)) => {
                tracing::debug!("Stored image {} as {}", image.url, file_name);
                Ok(StoredImage {
                    image_id: record.id,
                    hash,
                    path,
                    deduplicated: false,
                })
            }
            Ok(ImageInsert::Existing(record)) => {
                // Another writer indexed the same bytes first
                if created && record.file_path != file_name {
                    std::fs::remove_file(&path)?;
                }
                Ok(StoredImage {
                    image_id: record.id,
                    hash,
                    path: self.resolve(&record.file_path),
                    deduplicated: true,
                })
            }
            Err(e) => {
                if created {
                    let _ = std::fs::remove_file(&path);
                }
                Err(e.into())
            }
        }
    }

    /// Links the staged file under `preferred`, or a hash-suffixed name when
    /// `preferred` already holds different bytes
    ///
    /// Returns the chosen name and whether this call created the file. An
    /// existing file with identical content is reused as is.
    fn place(&self, partial: &Path, preferred: &str, hash: &str) -> Result<(String, bool), ImageError> {
        let candidates = [preferred.to_string(), with_hash_suffix(preferred, hash)];

        for candidate in candidates.iter() {
            let target = self.resolve(candidate);
            match std::fs::hard_link(partial, &target) {
                Ok(()) => return Ok((candidate.clone(), true)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if content_hash(&std::fs::read(&target)?) == hash {
                        return Ok((candidate.clone(), false));
                    }
                    // Same name, different bytes: keep both
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ImageError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free file name for {}", preferred),
        )))
    }
}

/// Hex-encoded SHA-256 of the content
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Builds `{post_number}_image_{index}{ext}`
///
/// The extension comes from the suggested name, then the URL path, then
/// falls back to `.jpg`.
pub fn image_file_name(post_number: u64, index: usize, suggested: &str, url: &Url) -> String {
    let extension = known_extension(suggested)
        .or_else(|| known_extension(url.path()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    format!("{}_image_{}{}", post_number, index, extension)
}

fn known_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    KNOWN_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn with_hash_suffix(file_name: &str, hash: &str) -> String {
    let short = &hash[..12];
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, short, ext),
        None => format!("{}_{}", file_name, short),
    }
}
