use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use treetrade_types::api::{UploadProgress, UploadResponse};

/// 50 MB upload limit for objects
pub const MAX_OBJECT_SIZE: usize = 50 * 1024 * 1024;

/// Progress is reported after every chunk of this size.
const WRITE_CHUNK: usize = 64 * 1024;

/// A named content bucket stored as plain files under `{root}/{name}`.
///
/// Objects are immutable once written: uploading to an existing path fails.
pub struct Bucket {
    name: String,
    dir: PathBuf,
    public_base_url: String,
}

impl Bucket {
    pub async fn new(root: &Path, name: &str, public_base_url: &str) -> Result<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir).await?;
        info!("Bucket '{}' stored at {}", name, dir.display());
        Ok(Self {
            name: name.to_string(),
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-disk location for an object path, rejecting anything that would
    /// escape the bucket.
    pub fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("Invalid object path '{}'", path);
        }
        Ok(self.dir.join(relative))
    }

    /// Public URL an object is served from.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.name, path)
    }

    /// Write `bytes` to `path`, calling `progress` after each chunk.
    pub async fn upload<F>(&self, path: &str, bytes: &[u8], mut progress: F) -> Result<UploadResponse>
    where
        F: FnMut(UploadProgress),
    {
        if bytes.is_empty() {
            bail!("Refusing to store an empty object");
        }
        if bytes.len() > MAX_OBJECT_SIZE {
            bail!("Object is {} bytes, limit is {}", bytes.len(), MAX_OBJECT_SIZE);
        }

        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!("Object '{}' already exists", path);
            }
            Err(e) => return Err(e.into()),
        };

        let total = bytes.len() as u64;
        let mut loaded = 0u64;
        progress(UploadProgress { loaded, total });

        for chunk in bytes.chunks(WRITE_CHUNK) {
            if let Err(e) = file.write_all(chunk).await {
                drop(file);
                // Don't leave a truncated object behind.
                let _ = fs::remove_file(&target).await;
                return Err(e.into());
            }
            loaded += chunk.len() as u64;
            progress(UploadProgress { loaded, total });
        }
        file.flush().await?;

        info!("Stored {} bytes at {}/{}", total, self.name, path);
        Ok(UploadResponse {
            path: path.to_string(),
            public_url: self.public_url(path),
            size: total,
        })
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.object_path(path)?).await?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let target = self.object_path(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                info!("Deleted object {}/{}", self.name, path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {}/{} already gone", self.name, path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_bucket() -> (Bucket, PathBuf) {
        let root = std::env::temp_dir().join(format!("treetrade-bucket-{}", uuid::Uuid::new_v4()));
        let bucket = Bucket::new(&root, "listings", "http://localhost:3000/storage/").await.unwrap();
        (bucket, root)
    }

    #[tokio::test]
    async fn upload_reports_progress_and_url() {
        let (bucket, root) = temp_bucket().await;
        let data = vec![7u8; WRITE_CHUNK * 2 + 10];

        let mut seen = Vec::new();
        let resp = bucket
            .upload("listings/lamp.png", &data, |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(resp.size, data.len() as u64);
        assert_eq!(resp.public_url, "http://localhost:3000/storage/listings/listings/lamp.png");
        assert_eq!(seen.first().unwrap().loaded, 0);
        assert_eq!(seen.last().unwrap().percent(), 100.0);
        assert_eq!(seen.len(), 4);
        assert_eq!(bucket.read("listings/lamp.png").await.unwrap(), data);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn refuses_overwrite_and_traversal() {
        let (bucket, root) = temp_bucket().await;
        bucket.upload("a.png", b"one", |_| {}).await.unwrap();
        assert!(bucket.upload("a.png", b"two", |_| {}).await.is_err());
        assert_eq!(bucket.read("a.png").await.unwrap(), b"one");

        assert!(bucket.upload("../escape.png", b"x", |_| {}).await.is_err());
        assert!(bucket.upload("/abs.png", b"x", |_| {}).await.is_err());
        assert!(bucket.upload("empty.png", b"", |_| {}).await.is_err());

        bucket.delete("a.png").await.unwrap();
        bucket.delete("a.png").await.unwrap();

        let _ = std::fs::remove_dir_all(root);
    }
}
