use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use curasync_core::store::{ObjectStore, StoredObject};
use curasync_core::{Error, Result};
use tracing::debug;

/// Object store backed by S3. Each put carries a Content-MD5 so S3 rejects corrupted bodies.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn md5_base64(data: &[u8]) -> String {
    let sum = md5::compute(data);
    B64.encode(sum.0)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<StoredObject> {
        let size = body.len() as u64;
        let checksum = md5_base64(&body);

        let resp = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_md5(checksum)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "put s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(bucket, key, size, "Stored object");

        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            e_tag: resp.e_tag().map(|s| s.trim_matches('"').to_string()),
        })
    }
}
