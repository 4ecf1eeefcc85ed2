use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Object storage used to stage inputs and publish results.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited URL granting direct read access to an object.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl_secs: u32,
    ) -> Result<String, StorageError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// Client for S3-compatible object storage (AWS S3, LocalStack, MinIO, R2).
pub struct S3Storage {
    region: Region,
    credentials: Credentials,
    path_style: bool,
    public_endpoint: Option<String>,
}

impl S3Storage {
    /// `endpoint` selects a custom S3-compatible service (path-style addressing);
    /// without it the AWS endpoint for `region` is used.
    pub fn new(
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let (region, path_style) = match endpoint {
            Some(endpoint) => (
                Region::Custom {
                    region: region.to_string(),
                    endpoint: endpoint.to_string(),
                },
                true,
            ),
            None => (
                region
                    .parse::<Region>()
                    .map_err(|e| StorageError::Config(e.to_string()))?,
                false,
            ),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            region,
            credentials,
            path_style,
            public_endpoint: None,
        })
    }

    /// Rewrite presigned URLs so they point at `public_endpoint` instead of the
    /// endpoint the service itself talks to.
    pub fn with_public_endpoint(mut self, public_endpoint: Option<String>) -> Self {
        self.public_endpoint = public_endpoint;
        self
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    fn public_url(&self, url: String) -> String {
        match (&self.public_endpoint, &self.region) {
            (Some(public), Region::Custom { endpoint, .. }) => {
                rewrite_endpoint(&url, endpoint, public)
            }
            _ => url,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let response = self
            .bucket(bucket)?
            .put_object_with_content_type(key, data, content_type)
            .await?;
        check_status(response.status_code(), bucket, key)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket(bucket)?.get_object(key).await?;
        check_status(response.status_code(), bucket, key)?;
        Ok(response.to_vec())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl_secs: u32,
    ) -> Result<String, StorageError> {
        let url = self
            .bucket(bucket)?
            .presign_get(key, ttl_secs, None)
            .await?;
        Ok(self.public_url(url))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let response = self.bucket(bucket)?.delete_object(key).await?;
        check_status(response.status_code(), bucket, key)
    }
}

fn check_status(code: u16, bucket: &str, key: &str) -> Result<(), StorageError> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(format!("{bucket}/{key}"))),
        other => Err(StorageError::Status(other, format!("{bucket}/{key}"))),
    }
}

/// Replace the scheme+host prefix `internal` of `url` with `public`.
fn rewrite_endpoint(url: &str, internal: &str, public: &str) -> String {
    let internal = internal.trim_end_matches('/');
    match url.strip_prefix(internal) {
        Some(rest) => format!("{}{}", public.trim_end_matches('/'), rest),
        None => url.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("S3 returned status {0} for {1}")]
    Status(u16, String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
