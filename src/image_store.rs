use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Object store for uploaded food images.
///
/// The orchestrator only ever uploads bytes and resolves a fetchable URL for
/// them; everything else about the backing store is an implementation detail.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Write image bytes at the given key
    async fn put_image(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Resolve a fetchable URL for a previously uploaded key
    async fn resolve_url(&self, key: &str) -> Result<String>;
}

/// S3-backed image store
pub struct S3ImageStore {
    client: S3Client,
    bucket: String,
    public_base_url: Option<String>,
    presigned_url_expiry: Duration,
}

impl S3ImageStore {
    /// Create a new S3 image store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 image store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            presigned_url_expiry: Duration::from_secs(config.presigned_url_expiry_secs),
        })
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    #[instrument(skip(self, bytes), fields(key = %key, size_bytes = bytes.len()))]
    async fn put_image(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let body = ByteStream::from(bytes.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload image to S3")?;

        debug!(key = %key, "Image uploaded to S3");

        Ok(())
    }

    async fn resolve_url(&self, key: &str) -> Result<String> {
        // A public bucket (or CDN in front of one) yields a durable URL;
        // otherwise fall back to a presigned GET.
        if let Some(ref base) = self.public_base_url {
            return Ok(format!("{}/{}", base, key));
        }

        let presigning_config = PresigningConfig::expires_in(self.presigned_url_expiry)
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }
}

/// Generate an object key for an uploaded food image.
/// Format: {prefix}/{user_id}/{date}/{timestamp}_{file_name}
///
/// Partitioning strategy:
/// - First level: user id, so per-user listing and access rules stay simple
/// - Second level: date (YYYY-MM-DD) for lifecycle policies
/// - Filename: millisecond timestamp + original name for uniqueness across
///   concurrent submissions
pub fn generate_image_key(
    prefix: &str,
    user_id: &str,
    now: DateTime<Utc>,
    image_name: &str,
) -> String {
    let date = now.format("%Y-%m-%d").to_string();
    let timestamp_str = now.format("%H%M%S%3f").to_string();

    format!(
        "{prefix}/{user_id}/{date}/{timestamp}_{name}",
        prefix = prefix.trim_matches('/'),
        user_id = sanitize_path_component(user_id),
        date = date,
        timestamp = timestamp_str,
        name = sanitize_path_component(image_name)
    )
}

/// Sanitize a path component to prevent path traversal.
/// Dots are preserved so file extensions survive, but runs of them
/// collapse to a single dot.
fn sanitize_path_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut last_dot = false;

    for c in component.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => {
                out.push(c);
                last_dot = false;
            }
            '.' => {
                if !last_dot {
                    out.push('.');
                }
                last_dot = true;
            }
            _ => {
                out.push('_');
                last_dot = false;
            }
        }
    }

    out
}
