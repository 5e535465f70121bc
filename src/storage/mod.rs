use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::{fs::File, io::AsyncWriteExt};
use uuid::Uuid;

/// Route prefix under which stored files are served.
pub const FILES_ROUTE: &str = "/api/storage/files";

#[derive(Clone)]
pub struct StorageService {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub size: usize,
}

impl StorageService {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create storage dir at {}", root.display()))?;

        Ok(Self { root })
    }

    pub async fn save(&self, bytes: &[u8], original_name: Option<&str>) -> Result<StoredFile> {
        let ext = original_name
            .and_then(|name| Path::new(name).extension().and_then(|e| e.to_str()))
            .and_then(clean_extension);

        let id = Uuid::new_v4().to_string();
        let filename = match ext {
            Some(ext) if !ext.is_empty() => format!("{id}.{ext}"),
            _ => id.clone(),
        };

        let path = self.root.join(&filename);

        let mut file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create file {}", path.display()))?;

        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to write file {}", path.display()))?;

        Ok(StoredFile {
            id,
            url: format!("{FILES_ROUTE}/{filename}"),
            filename,
            size: bytes.len(),
        })
    }

    /// Reads a stored file back; names that could escape the root are refused.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        if !is_safe_filename(filename) {
            bail!("invalid file name");
        }
        let path = self.root.join(filename);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read file {}", path.display()))
    }
}

pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("m4a") => "audio/mp4",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

fn clean_extension(ext: &str) -> Option<String> {
    let filtered: String = ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    if filtered.is_empty() {
        None
    } else {
        Some(filtered.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_then_read_back() {
        let dir = TempDir::new().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();

        let stored = storage.save(b"%PDF-1.4", Some("Notes.P*D F")).await.unwrap();
        assert!(stored.filename.ends_with(".pdf"));
        assert_eq!(stored.url, format!("{FILES_ROUTE}/{}", stored.filename));
        assert_eq!(stored.size, 8);

        let bytes = storage.read(&stored.filename).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
        assert_eq!(content_type_for(&stored.filename), "application/pdf");
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();
        assert!(storage.read("../secret").await.is_err());
        assert!(storage.read("a/b").await.is_err());
        assert!(storage.read("").await.is_err());
    }
}
