use crate::app::ports::{ByteStream, ObjectInfo, ObjectStorePort, StoredObject};
use crate::error::StoreError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutMultipartOptions, WriteMultipart};
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Parts in flight while streaming an upload.
const MAX_UPLOAD_CONCURRENCY: usize = 4;

/// Store accessor over any `object_store` backend, S3 in production.
#[derive(Clone)]
pub struct BucketStore {
    inner: Arc<dyn ObjectStore>,
}

impl BucketStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// S3-compatible bucket. Credentials come from the usual `AWS_*`
    /// environment variables; TLS follows the endpoint's scheme.
    pub fn s3(endpoint: &str, region: &str, bucket: &str) -> Result<Self, StoreError> {
        let store = AmazonS3Builder::from_env()
            .with_endpoint(endpoint)
            .with_region(region)
            .with_bucket_name(bucket)
            .with_allow_http(endpoint.starts_with("http://"))
            .build()?;
        Ok(Self::new(Arc::new(store)))
    }
}

fn not_found_or(key: &str, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound { key: key.to_string() },
        other => StoreError::Backend(other),
    }
}

#[async_trait]
impl ObjectStorePort for BucketStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.inner.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        let result = self
            .inner
            .get(&Path::from(key))
            .await
            .map_err(|e| not_found_or(key, e))?;
        let info = ObjectInfo {
            size: result.meta.size as u64,
            last_modified: result.meta.last_modified,
            e_tag: result.meta.e_tag.clone(),
            content_type: result
                .attributes
                .get(&Attribute::ContentType)
                .map(|v| v.as_ref().to_string()),
        };
        let body = result
            .into_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();
        Ok(StoredObject { info, body })
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        content_type: Option<&str>,
        content_disposition: &str,
    ) -> Result<u64, StoreError> {
        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        attributes.insert(Attribute::ContentDisposition, content_disposition.to_string().into());

        let upload = self
            .inner
            .put_multipart_opts(
                &Path::from(key),
                PutMultipartOptions { attributes, ..Default::default() },
            )
            .await?;
        let mut writer = WriteMultipart::new(upload);

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StoreError::Body(e.to_string()));
                }
            };
            if let Err(e) = writer.wait_for_capacity(MAX_UPLOAD_CONCURRENCY).await {
                let _ = writer.abort().await;
                return Err(e.into());
            }
            written += chunk.len() as u64;
            writer.put(chunk);
        }
        writer.finish().await?;

        debug!(key, bytes = written, "Stored object");
        Ok(written)
    }

    fn list(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> BoxStream<'static, Result<String, StoreError>> {
        // object_store prefixes are whole path segments, so list from the
        // enclosing directory and match the rest as a plain string prefix.
        let dir = prefix.rsplit_once('/').map(|(dir, _)| Path::from(dir));
        let prefix = prefix.to_string();
        self.inner
            .list(dir.as_ref())
            .map_err(StoreError::from)
            .map_ok(|meta| meta.location.to_string())
            .try_filter(move |key| {
                let keep = key.starts_with(&prefix)
                    && (recursive || !key[prefix.len()..].contains('/'));
                futures::future::ready(keep)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::mock::body_stream;
    use object_store::memory::InMemory;

    fn store() -> BucketStore {
        BucketStore::new(Arc::new(InMemory::new()))
    }

    async fn read_all(body: ByteStream) -> Vec<u8> {
        body.try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_exists_and_get() {
        let store = store();
        assert!(!store.exists("2025/01/02.pdf").await.unwrap());

        let written = store
            .put(
                "2025/01/02.pdf",
                body_stream(b"%PDF-1.7".to_vec()),
                Some("application/pdf"),
                "attachment; filename=2025-01-02.pdf",
            )
            .await
            .unwrap();
        assert_eq!(written, 8);
        assert!(store.exists("2025/01/02.pdf").await.unwrap());

        let object = store.get("2025/01/02.pdf").await.unwrap();
        assert_eq!(object.info.size, 8);
        assert_eq!(object.info.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(read_all(object.body).await, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let err = store().get("2025/01/02.pdf").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_matches_partial_segment_prefix() {
        let store = store();
        for key in ["2024/12/25.pdf", "2025/01/02.pdf", "other/2025.pdf", "19/01/01.pdf"] {
            store.put(key, body_stream(b"x".to_vec()), None, "attachment").await.unwrap();
        }

        let mut keys: Vec<String> = store.list("20", true).try_collect().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["2024/12/25.pdf", "2025/01/02.pdf"]);

        let shallow: Vec<String> = store.list("20", false).try_collect().await.unwrap();
        assert!(shallow.is_empty());

        let nested: Vec<String> = store.list("2025/01/", false).try_collect().await.unwrap();
        assert_eq!(nested, vec!["2025/01/02.pdf"]);
    }
}
