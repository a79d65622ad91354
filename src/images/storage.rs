//! Filesystem-level image storage.
//!
//! Accepted images are written unmodified under `{base_dir}/{item_id}/`,
//! named by the first 16 hex characters of their content hash.

use std::path::{Path, PathBuf};

use imagefetch_common::{Error, ImageFormat, ItemId, Result};

/// Location of a written image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenImage {
    /// Path relative to the storage base directory.
    pub path: String,
    pub absolute: PathBuf,
}

/// Filesystem manager for image storage.
#[derive(Debug, Clone)]
pub struct ImageStorage {
    base_dir: PathBuf,
}

impl ImageStorage {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write image bytes for an item.
    ///
    /// Writing the same content twice for the same item lands on the same
    /// file.
    ///
    /// # Arguments
    ///
    /// * `item_id` - The item this image belongs to
    /// * `content_hash` - Hex SHA-256 of `data`, used to name the file
    /// * `format` - Verified image format, which picks the extension
    /// * `data` - Raw image bytes, written unmodified
    ///
    /// # Returns
    ///
    /// The written file's path, both relative to the base directory and
    /// absolute.
    pub fn write(
        &self,
        item_id: &ItemId,
        content_hash: &str,
        format: ImageFormat,
        data: &[u8],
    ) -> Result<WrittenImage> {
        let item_dir = self.base_dir.join(item_id.to_string());
        std::fs::create_dir_all(&item_dir).map_err(|e| {
            Error::persistence(format!(
                "Failed to create image directory {}: {}",
                item_dir.display(),
                e
            ))
        })?;

        let filename = format_filename(content_hash, format);
        let absolute = item_dir.join(&filename);
        std::fs::write(&absolute, data).map_err(|e| {
            Error::persistence(format!(
                "Failed to write image file {}: {}",
                absolute.display(),
                e
            ))
        })?;

        Ok(WrittenImage {
            path: format!("{}/{}", item_id, filename),
            absolute,
        })
    }

    /// Get the filesystem path an image is (or would be) written to.
    ///
    /// # Arguments
    ///
    /// * `item_id` - The item the image belongs to
    /// * `content_hash` - The content hash of the image
    /// * `format` - The image format
    pub fn get_path(&self, item_id: &ItemId, content_hash: &str, format: ImageFormat) -> PathBuf {
        self.base_dir
            .join(item_id.to_string())
            .join(format_filename(content_hash, format))
    }

    /// Remove a written image. Missing files are not an error.
    ///
    /// # Arguments
    ///
    /// * `item_id` - The item the image belongs to
    /// * `content_hash` - The content hash of the image
    /// * `format` - The image format
    pub fn delete(&self, item_id: &ItemId, content_hash: &str, format: ImageFormat) -> Result<()> {
        let path = self.get_path(item_id, content_hash, format);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn format_filename(content_hash: &str, format: ImageFormat) -> String {
    let short = content_hash.get(..16).unwrap_or(content_hash);
    format!("{}.{}", short, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::content_hash;

    #[test]
    fn test_format_filename() {
        let hash = content_hash(b"image bytes");
        let name = format_filename(&hash, ImageFormat::Jpeg);
        assert_eq!(name, format!("{}.jpg", &hash[..16]));
        assert_eq!(format_filename("abc", ImageFormat::Png), "abc.png");
    }

    #[test]
    fn test_get_path() {
        let storage = ImageStorage::new(PathBuf::from("/data/images"));
        let item_id = ItemId::new();
        let path = storage.get_path(&item_id, "0123456789abcdef0123", ImageFormat::Webp);
        let expected = PathBuf::from(format!("/data/images/{}/0123456789abcdef.webp", item_id));
        assert_eq!(path, expected);
    }

    #[test]
    fn test_write_is_byte_exact_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImageStorage::new(dir.path().to_path_buf());
        let item_id = ItemId::new();
        let data = b"\x89PNG not really".to_vec();
        let hash = content_hash(&data);

        let written = storage.write(&item_id, &hash, ImageFormat::Png, &data).unwrap();
        assert!(written.path.starts_with(&item_id.to_string()));
        assert_eq!(std::fs::read(&written.absolute).unwrap(), data);

        storage.delete(&item_id, &hash, ImageFormat::Png).unwrap();
        assert!(!written.absolute.exists());
        storage.delete(&item_id, &hash, ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_write_into_unwritable_location_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let storage = ImageStorage::new(blocker);

        let result = storage.write(&ItemId::new(), "abcd", ImageFormat::Jpeg, b"x");
        assert!(matches!(result, Err(Error::Persistence(_))));
    }
}
