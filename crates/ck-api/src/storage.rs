use anyhow::Result;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::info;

/// URL prefix under which stored blobs are served.
pub const PUBLIC_PREFIX: &str = "/uploads/";

const MAX_EXTENSION_CHARS: usize = 8;

/// Content-addressed upload storage.
///
/// Each blob is stored flat at `{dir}/{sha256}.{ext}`, so re-uploading the
/// same bytes under the same extension is a no-op.
pub struct BlobStore {
    dir: PathBuf,
}

/// A stored blob as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Public path, e.g. `/uploads/<sha256>.png`.
    pub path: String,
    pub size: u64,
}

impl BlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `data` and return its public path. `original_name` only
    /// contributes its extension.
    pub async fn put(&self, original_name: &str, data: &[u8]) -> Result<StoredBlob> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hex::encode(hasher.finalize());

        let file_name = match extension_of(original_name) {
            Some(ext) => format!("{}.{}", digest, ext),
            None => digest,
        };

        let target = self.dir.join(&file_name);
        if fs::try_exists(&target).await? {
            info!("Blob {} already stored", file_name);
        } else {
            let dir = self.dir.clone();
            let bytes = data.to_vec();
            tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &bytes))
                .await
                .map_err(|e| anyhow::anyhow!("blob write task failed: {}", e))??;
            info!("Stored blob {} ({} bytes)", file_name, data.len());
        }

        Ok(StoredBlob {
            path: format!("{}{}", PUBLIC_PREFIX, file_name),
            size: data.len() as u64,
        })
    }

    /// Whether `public_path` names a blob that exists in this store.
    pub async fn contains_path(&self, public_path: &str) -> bool {
        let Some(name) = public_path.strip_prefix(PUBLIC_PREFIX) else {
            return false;
        };
        if !is_blob_name(name) {
            return false;
        }
        fs::try_exists(self.dir.join(name)).await.unwrap_or(false)
    }
}

/// Write through a private temp file in `dir`, then rename onto `target`, so
/// readers only ever see complete blobs. Concurrent writers of the same
/// content each use their own temp file; whoever renames last wins.
fn write_atomically(dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    if let Err(e) = tmp.persist(target) {
        // Same name means same bytes; someone else got there first.
        if !target.exists() {
            return Err(e.error.into());
        }
    }
    Ok(())
}

/// Lowercased extension of a client file name, if it is short and alphanumeric.
fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_CHARS
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// `<64 hex>` or `<64 hex>.<ext>`; anything else cannot have come from `put`.
fn is_blob_name(name: &str) -> bool {
    let (digest, ext) = match name.split_once('.') {
        Some((d, e)) => (d, Some(e)),
        None => (name, None),
    };
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    match ext {
        Some(ext) => extension_of(&format!("x.{}", ext)).as_deref() == Some(ext),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn extensions() {
        assert_eq!(extension_of("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("evil.p/hp"), None);
        assert_eq!(extension_of("long.abcdefghi"), None);
    }

    #[tokio::test]
    async fn put_is_content_addressed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path().join("uploads")).await.unwrap();

        let a = store.put("cat.png", b"meow").await.unwrap();
        let b = store.put("other-name.png", b"meow").await.unwrap();
        assert_eq!(a, b);
        assert!(a.path.starts_with("/uploads/"));
        assert!(a.path.ends_with(".png"));
        assert_eq!(a.size, 4);

        assert!(store.contains_path(&a.path).await);
        assert!(!store.contains_path("/uploads/../secret").await);
        assert!(!store.contains_path("/elsewhere/x.png").await);

        let digest = a.path.trim_start_matches("/uploads/").trim_end_matches(".png");
        assert!(!store.contains_path(&format!("/uploads/{}.gif", digest)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_uploads_all_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(BlobStore::new(tmp.path().to_path_buf()).await.unwrap());
        let data: Arc<Vec<u8>> = Arc::new((0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect());

        for _ in 0..3 {
            let tasks: Vec<_> = (0..16)
                .map(|_| {
                    let store = store.clone();
                    let data = data.clone();
                    tokio::spawn(async move { store.put("a.bin", &data).await })
                })
                .collect();

            let mut paths = Vec::new();
            for task in tasks {
                paths.push(task.await.unwrap().unwrap().path);
            }
            paths.dedup();
            assert_eq!(paths.len(), 1);
            assert!(store.contains_path(&paths[0]).await);
        }

        // Only the blob itself is left behind, no temp files.
        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        let stored = std::fs::read(tmp.path().join(&names[0])).unwrap();
        assert_eq!(stored, *data);
    }
}
