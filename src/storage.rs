//! Object storage port and its S3/MinIO adapter.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::Multipart;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::StorageConfig,
    error::{AppError, AppResult},
};

/// Presigned links handed to clients live this long.
pub const PRESIGN_TTL_SECS: u64 = 30 * 60;

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    async fn presign_get(&self, key: &str, seconds: u64) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, seconds: u64) -> anyhow::Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(std::time::Duration::from_secs(seconds))?)
            .await
            .context("s3 presign_get")?;
        Ok(presigned.uri().to_string())
    }
}

/// An uploaded file as received from a multipart form.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// Text fields plus the images sent under one file field.
#[derive(Debug, Default)]
pub struct ImageForm {
    pub fields: HashMap<String, String>,
    pub images: Vec<UploadItem>,
}

impl ImageForm {
    pub async fn read(mut mp: Multipart, file_field: &str) -> AppResult<Self> {
        let mut form = ImageForm::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?
        {
            let name = field.name().map(|s| s.to_string()).unwrap_or_default();
            if name == file_field {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                if ext_from_mime(&content_type).is_none() {
                    return Err(AppError::bad_request("only image files are allowed"));
                }
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text()))?;
                form.images.push(UploadItem { body, content_type });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text()))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn require_image(&mut self) -> AppResult<UploadItem> {
        if self.images.len() > 1 {
            return Err(AppError::bad_request("only one attachment is allowed"));
        }
        self.images
            .pop()
            .ok_or_else(|| AppError::bad_request("attachment is required"))
    }

    pub fn take_images(&mut self) -> Vec<UploadItem> {
        std::mem::take(&mut self.images)
    }

    pub fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name).filter(|v| !v.trim().is_empty())
    }
}

/// Stores the file under `folder` and returns its object key.
pub async fn upload(
    storage: &dyn StorageClient,
    item: UploadItem,
    folder: &str,
) -> anyhow::Result<String> {
    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", folder.trim_end_matches('/'), Uuid::new_v4(), ext);
    storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .with_context(|| format!("put_object {key}"))?;
    debug!(key = %key, "object stored");
    Ok(key)
}

/// Stores every file under `folder`. Already stored files are removed again
/// when one of them fails.
pub async fn upload_many(
    storage: &dyn StorageClient,
    items: Vec<UploadItem>,
    folder: &str,
) -> anyhow::Result<Vec<String>> {
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        match upload(storage, item, folder).await {
            Ok(key) => keys.push(key),
            Err(e) => {
                remove_many(storage, &keys).await;
                return Err(e);
            }
        }
    }
    Ok(keys)
}

/// Best-effort removal. A dangling object is logged, not surfaced.
pub async fn remove(storage: &dyn StorageClient, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(error = ?e, key = %key, "failed to remove stored object");
    }
}

pub async fn remove_many(storage: &dyn StorageClient, keys: &[String]) {
    for key in keys {
        remove(storage, key).await;
    }
}

pub async fn presign(storage: &dyn StorageClient, key: &str) -> anyhow::Result<String> {
    storage
        .presign_get(key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for {key}"))
}
