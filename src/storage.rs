use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, IoError>>>>;

const PHOTO_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
const PHOTO_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub key: String,
    pub url: String,
}

#[derive(Debug)]
pub enum UploadError {
    UnsupportedType,
    TooLarge,
    Io(IoError),
}

/// Seam for the blob backend. Disk is what ships; a remote store slots in
/// behind the same trait without touching handlers.
#[async_trait(?Send)]
pub trait BlobStore: Send + Sync {
    async fn store(&self, key: &str, data: ByteStream) -> IoResult<()>;
    async fn remove(&self, key: &str) -> IoResult<()>;
    fn public_url(&self, key: &str) -> String;
}

pub struct DiskStore {
    root_dir: PathBuf,
    public_base: String,
}

impl DiskStore {
    pub fn new(root_dir: PathBuf, public_base: String) -> Self {
        Self {
            root_dir,
            public_base,
        }
    }
}

#[async_trait(?Send)]
impl BlobStore for DiskStore {
    /// Uploads land under a temporary name and only take the final key
    /// once fully written, so readers never see a half-written file.
    async fn store(&self, key: &str, mut data: ByteStream) -> IoResult<()> {
        let part_path = self.root_dir.join(format!("{}.part", key));
        let mut file = tokio::fs::File::create(&part_path).await?;

        let mut failure: Option<IoError> = None;
        while let Some(chunk) = data.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        failure = Some(e);
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if failure.is_none() {
            if let Err(e) = file.flush().await {
                failure = Some(e);
            }
        }
        drop(file);

        match failure {
            None => tokio::fs::rename(&part_path, self.root_dir.join(key)).await,
            Some(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }

    async fn remove(&self, key: &str) -> IoResult<()> {
        match tokio::fs::remove_file(self.root_dir.join(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), key)
    }
}

/// Extension of an uploaded photo, lowercased, if it is one we accept.
pub fn photo_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
    PHOTO_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Photo handling for student records: image extensions only, capped at
/// 5MB, one generated key per upload.
#[derive(Clone)]
pub struct StudentMedia {
    store: Arc<dyn BlobStore>,
}

impl StudentMedia {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub async fn attach_photo<S>(
        &self,
        student_id: i32,
        filename: &str,
        data: S,
    ) -> Result<StoredPhoto, UploadError>
    where
        S: Stream<Item = Result<Bytes, IoError>> + 'static,
    {
        let ext = photo_extension(filename).ok_or(UploadError::UnsupportedType)?;
        let key = format!("student_{}_{}.{}", student_id, Uuid::new_v4(), ext);

        // The cap is enforced on the stream so an oversized upload aborts
        // mid-transfer instead of after it.
        let mut seen = 0u64;
        let capped = data.map(move |chunk| {
            let bytes = chunk?;
            seen += bytes.len() as u64;
            if seen > PHOTO_MAX_BYTES {
                Err(IoError::new(ErrorKind::InvalidData, "photo exceeds size limit"))
            } else {
                Ok(bytes)
            }
        });

        match self.store.store(&key, Box::pin(capped)).await {
            Ok(()) => Ok(StoredPhoto {
                url: self.store.public_url(&key),
                key,
            }),
            Err(e) if e.kind() == ErrorKind::InvalidData => Err(UploadError::TooLarge),
            Err(e) => Err(UploadError::Io(e)),
        }
    }

    pub async fn remove_photo(&self, key: &str) -> Result<(), UploadError> {
        self.store.remove(key).await.map_err(UploadError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn photo_extensions_are_a_closed_lowercased_set() {
        assert_eq!(photo_extension("face.jpg").as_deref(), Some("jpg"));
        assert_eq!(photo_extension("FACE.JPG").as_deref(), Some("jpg"));
        assert_eq!(photo_extension("scan.webp").as_deref(), Some("webp"));
        assert!(photo_extension("resume.pdf").is_none());
        assert!(photo_extension("noextension").is_none());
    }

    struct MemStore {
        blobs: Mutex<Vec<(String, usize)>>,
    }

    impl MemStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                blobs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait(?Send)]
    impl BlobStore for MemStore {
        async fn store(&self, key: &str, mut data: ByteStream) -> IoResult<()> {
            let mut size = 0;
            while let Some(chunk) = data.next().await {
                size += chunk?.len();
            }
            self.blobs.lock().unwrap().push((key.to_string(), size));
            Ok(())
        }

        async fn remove(&self, key: &str) -> IoResult<()> {
            self.blobs.lock().unwrap().retain(|(k, _)| k != key);
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("/uploads/{}", key)
        }
    }

    fn chunks(count: usize, chunk_len: usize) -> impl Stream<Item = Result<Bytes, IoError>> {
        let chunk = Bytes::from(vec![0u8; chunk_len]);
        futures_util::stream::iter((0..count).map(move |_| Ok::<_, IoError>(chunk.clone())))
    }

    #[actix_web::test]
    async fn attach_photo_stores_under_a_student_key() {
        let store = MemStore::new();
        let media = StudentMedia::new(store.clone());

        let stored = media.attach_photo(7, "Face.JPG", chunks(2, 512)).await.unwrap();

        assert!(stored.key.starts_with("student_7_"));
        assert!(stored.key.ends_with(".jpg"));
        assert_eq!(stored.url, format!("/uploads/{}", stored.key));

        let blobs = store.blobs.lock().unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].1, 1024);
    }

    #[actix_web::test]
    async fn oversized_stream_is_rejected_and_nothing_kept() {
        let store = MemStore::new();
        let media = StudentMedia::new(store.clone());

        let result = media.attach_photo(7, "big.png", chunks(6, 1024 * 1024)).await;

        assert!(matches!(result, Err(UploadError::TooLarge)));
        assert!(store.blobs.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn unsupported_type_never_reaches_the_store() {
        let store = MemStore::new();
        let media = StudentMedia::new(store.clone());

        let result = media.attach_photo(7, "resume.pdf", chunks(1, 16)).await;

        assert!(matches!(result, Err(UploadError::UnsupportedType)));
        assert!(store.blobs.lock().unwrap().is_empty());
    }
}
