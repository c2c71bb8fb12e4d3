//! Media storage backends and upload staging.
//!
//! Handlers never touch the media directory directly: uploads are streamed to
//! a [`StagedFile`] first, then handed to a [`MediaStorage`] which returns the
//! durable URL and the identifier needed to delete the file later.

use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use mime_guess::{MimeGuess, mime};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::MediaAsset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Video,
    Raw,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Raw => "raw",
        }
    }

    /// Audio is stored alongside video, as hosted media services do.
    pub fn from_path(path: &Path) -> Self {
        match MimeGuess::from_path(path).first() {
            Some(guess) if guess.type_() == mime::IMAGE => Self::Image,
            Some(guess) if guess.type_() == mime::VIDEO || guess.type_() == mime::AUDIO => {
                Self::Video
            }
            _ => Self::Raw,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
    pub resource_type: ResourceKind,
    /// Seconds, when the backend can tell.
    pub duration: Option<f64>,
}

impl UploadedMedia {
    pub fn asset(&self) -> MediaAsset {
        MediaAsset {
            url: self.url.clone(),
            public_id: self.public_id.clone(),
        }
    }
}

/// Durable media storage. Calls are blocking; async callers run them on the
/// blocking pool.
pub trait MediaStorage: Send + Sync {
    fn upload(&self, local: &Path) -> Result<UploadedMedia>;

    /// Deleting something that is already gone succeeds.
    fn delete(&self, public_id: &str, kind: ResourceKind) -> Result<()>;
}

/// Stores files under `<root>/<kind>/<uuid>.<ext>` and serves them from
/// `<public_base_url>/<kind>/<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct LocalMediaStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating media root {}", root.display()))?;
        Ok(Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_path(&self, public_id: &str, kind: ResourceKind) -> Result<PathBuf> {
        if public_id.is_empty()
            || public_id.contains(['/', '\\'])
            || public_id.starts_with('.')
        {
            bail!("invalid media identifier {public_id:?}");
        }
        Ok(self.root.join(kind.as_str()).join(public_id))
    }
}

impl MediaStorage for LocalMediaStorage {
    fn upload(&self, local: &Path) -> Result<UploadedMedia> {
        let kind = ResourceKind::from_path(local);
        let public_id = match local.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_ascii_lowercase()),
            None => Uuid::new_v4().to_string(),
        };

        let dir = self.root.join(kind.as_str());
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let dest = dir.join(&public_id);
        fs::copy(local, &dest)
            .with_context(|| format!("copying {} to {}", local.display(), dest.display()))?;

        Ok(UploadedMedia {
            url: format!("{}/{}/{}", self.public_base_url, kind, public_id),
            public_id,
            resource_type: kind,
            duration: None,
        })
    }

    fn delete(&self, public_id: &str, kind: ResourceKind) -> Result<()> {
        let path = self.object_path(public_id, kind)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// A multipart file field written to the upload directory. The temporary
/// file is removed when the value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    original_name: Option<String>,
    size: u64,
}

impl StagedFile {
    /// Creates an empty staging file that keeps the extension of the client's
    /// file name, so the storage backend can classify it.
    pub fn create(upload_dir: &Path, original_name: Option<&str>) -> Result<Self> {
        fs::create_dir_all(upload_dir)
            .with_context(|| format!("creating upload dir {}", upload_dir.display()))?;
        let suffix = original_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(upload_dir)
            .with_context(|| format!("staging upload in {}", upload_dir.display()))?;
        Ok(Self {
            file,
            original_name: original_name.map(str::to_string),
            size: 0,
        })
    }

    /// Writes `contents` in one go. Used by tests and small fields.
    pub fn from_bytes(upload_dir: &Path, original_name: &str, contents: &[u8]) -> Result<Self> {
        let mut staged = Self::create(upload_dir, Some(original_name))?;
        fs::write(staged.path(), contents)
            .with_context(|| format!("writing {}", staged.path().display()))?;
        staged.size = contents.len() as u64;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Async writer over the staged file for streaming request bodies.
    pub fn writer(&self) -> Result<StagedWriter> {
        let std_file = self.file.reopen().context("reopening staged upload")?;
        Ok(StagedWriter {
            inner: tokio::fs::File::from_std(std_file),
            written: 0,
        })
    }

    pub fn record_size(&mut self, size: u64) {
        self.size = size;
    }
}

pub struct StagedWriter {
    inner: tokio::fs::File,
    written: u64,
}

impl StagedWriter {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.inner
            .write_all(chunk)
            .await
            .context("writing staged upload")?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and returns the number of bytes written.
    pub async fn finish(mut self) -> Result<u64> {
        self.inner.flush().await.context("flushing staged upload")?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_mime_type() {
        assert_eq!(ResourceKind::from_path(Path::new("a.png")), ResourceKind::Image);
        assert_eq!(ResourceKind::from_path(Path::new("a.JPG")), ResourceKind::Image);
        assert_eq!(ResourceKind::from_path(Path::new("clip.mp4")), ResourceKind::Video);
        assert_eq!(ResourceKind::from_path(Path::new("notes.txt")), ResourceKind::Raw);
        assert_eq!(ResourceKind::from_path(Path::new("noext")), ResourceKind::Raw);
    }

    #[test]
    fn local_upload_and_delete() {
        let media = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let storage = LocalMediaStorage::new(media.path(), "/media/").unwrap();

        let staged = StagedFile::from_bytes(uploads.path(), "avatar.png", b"png-bytes").unwrap();
        assert!(staged.path().to_string_lossy().ends_with(".png"));
        assert_eq!(staged.size(), 9);

        let uploaded = storage.upload(staged.path()).unwrap();
        assert_eq!(uploaded.resource_type, ResourceKind::Image);
        assert!(uploaded.public_id.ends_with(".png"));
        assert_eq!(uploaded.url, format!("/media/image/{}", uploaded.public_id));
        let stored = media.path().join("image").join(&uploaded.public_id);
        assert_eq!(fs::read(&stored).unwrap(), b"png-bytes");

        storage
            .delete(&uploaded.public_id, ResourceKind::Image)
            .unwrap();
        assert!(!stored.exists());
        // Second delete is a no-op.
        storage
            .delete(&uploaded.public_id, ResourceKind::Image)
            .unwrap();
    }

    #[test]
    fn delete_rejects_path_escapes() {
        let media = tempfile::tempdir().unwrap();
        let storage = LocalMediaStorage::new(media.path(), "/media").unwrap();
        assert!(storage.delete("../secret", ResourceKind::Raw).is_err());
        assert!(storage.delete("a/b", ResourceKind::Raw).is_err());
        assert!(storage.delete("", ResourceKind::Raw).is_err());
    }

    #[test]
    fn staged_file_is_removed_on_drop() {
        let uploads = tempfile::tempdir().unwrap();
        let staged = StagedFile::from_bytes(uploads.path(), "clip.mp4", b"x").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn staged_writer_streams_chunks() {
        let uploads = tempfile::tempdir().unwrap();
        let mut staged = StagedFile::create(uploads.path(), Some("clip.mp4")).unwrap();
        let mut writer = staged.writer().unwrap();
        writer.write_chunk(b"abc").await.unwrap();
        writer.write_chunk(b"def").await.unwrap();
        let written = writer.finish().await.unwrap();
        staged.record_size(written);
        assert_eq!(staged.size(), 6);
        assert_eq!(fs::read(staged.path()).unwrap(), b"abcdef");
        assert_eq!(staged.original_name(), Some("clip.mp4"));
    }
}
