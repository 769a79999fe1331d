//! Remote object store uploads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// One object to store, with the key/value metadata attached to it.
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    pub key: String,
    pub content_type: &'static str,
    pub content_encoding: Option<&'static str>,
    pub body: Bytes,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectUpload {
    pub fn json(key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            content_type: "application/json",
            content_encoding: None,
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Gzip-compresses the body and marks the object's content encoding.
    pub fn gzipped(mut self) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.body)?;
        self.body = Bytes::from(encoder.finish()?);
        self.content_encoding = Some("gzip");
        Ok(self)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, upload: ObjectUpload) -> Result<()>;

    /// Locator a consumer can use to download `key`.
    fn locator(&self, key: &str) -> String;
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the ambient AWS configuration (env vars, profile,
    /// instance role).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, upload: ObjectUpload) -> Result<()> {
        let metadata = upload.metadata.into_iter().collect();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&upload.key)
            .body(ByteStream::from(upload.body))
            .content_type(upload.content_type)
            .set_content_encoding(upload.content_encoding.map(str::to_string))
            .set_metadata(Some(metadata))
            .send()
            .await
            .with_context(|| format!("S3 PutObject failed for s3://{}/{}", self.bucket, upload.key))?;
        Ok(())
    }

    fn locator(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Keeps uploads in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<ObjectUpload>>,
}

impl MemoryObjectStore {
    pub fn uploads(&self) -> Vec<ObjectUpload> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, upload: ObjectUpload) -> Result<()> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(upload);
        Ok(())
    }

    fn locator(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
