use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed blob store for post images. Keys are SHA-256 hex
/// digests computed at upload time.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError>;
}

// ---------------- Filesystem implementation (default) ----------------

pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    /// Root comes from MEDIA_ROOT, defaulting to ./media. Files land under
    /// posts/<first two hash chars>/<hash>.
    pub fn new() -> Self {
        let root = std::env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("media"));
        Self { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let mut p = self.root.clone();
        p.push("posts");
        p.push(&hash[0..2]);
        p.push(hash);
        p
    }
}

impl Default for FsImageStore {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, hash: &str, _mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(hash);
        if path.exists() {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| ImageStoreError::Other(e.to_string()))
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(hash);
        let bytes = std::fs::read(&path).map_err(|_| ImageStoreError::NotFound)?;
        // MIME is not persisted separately; sniff it back out of the bytes
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError> {
        let _ = std::fs::remove_file(self.path_for(hash));
        Ok(())
    }
}

// ---------------- S3 implementation (MinIO compatible) ----------------

#[cfg(feature = "s3-store")]
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

#[cfg(feature = "s3-store")]
impl S3ImageStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;
        use log::{info, warn};

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "quill-media".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing: MinIO and most local endpoints lack wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3/MinIO client (path-style addressing)");

        if client.head_bucket().bucket(&bucket).send().await.is_err() {
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e) => {
                        if attempt >= max_attempts {
                            return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e}"));
                        }
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        Ok(Self { bucket, client, prefix: "posts".into() })
    }

    fn key_for(&self, hash: &str) -> String {
        format!("{}/{}/{}", self.prefix, &hash[0..2], hash)
    }
}

#[cfg(feature = "s3-store")]
#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = self.key_for(hash);
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok()
        {
            return Err(ImageStoreError::Duplicate);
        }
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime)
            .send()
            .await
            .map_err(|e| {
                log::error!("put_object failed hash={hash} bucket={}: {e:?}", self.bucket);
                ImageStoreError::Other(e.to_string())
            })?;
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let key = self.key_for(hash);
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|_| ImageStoreError::NotFound)?;
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let bytes = Vec::from(data.into_bytes().as_ref());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError> {
        let key = self.key_for(hash);
        let _ = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;
        Ok(())
    }
}

/// Pick the store backend: S3 when the feature is on and an endpoint is
/// configured, filesystem otherwise.
pub async fn build_image_store() -> Arc<dyn ImageStore> {
    #[cfg(feature = "s3-store")]
    if std::env::var("S3_ENDPOINT").is_ok() {
        match S3ImageStore::new().await {
            Ok(store) => return Arc::new(store),
            Err(e) => panic!("failed to initialize S3 image store: {e}"),
        }
    }
    Arc::new(FsImageStore::new())
}
