//! S3-compatible object store client
//!
//! Blocking client built on rust-s3. One client serves both the WAL and the
//! backup bucket; bucket handles are cheap and built per call.

use std::io::Read;

use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::BucketConfiguration;
use tracing::debug;

use super::object::ObjectStore;
use super::{CountingReader, StoredObject};
use crate::config::Settings;
use crate::error::{KeeperError, KeeperResult};

/// Connection parameters for an S3-compatible endpoint
pub struct S3Client {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Client {
    pub fn from_settings(settings: &Settings) -> KeeperResult<Self> {
        let region = match &settings.s3_endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.s3_location.clone(),
                endpoint: endpoint.clone(),
            },
            None => settings.s3_location.parse::<Region>().map_err(|e| {
                KeeperError::Config(format!(
                    "invalid s3_location '{}': {}",
                    settings.s3_location, e
                ))
            })?,
        };

        // Fall back to AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY and friends
        let credentials = match (&settings.s3_access_key, &settings.s3_secret_key) {
            (Some(access), Some(secret)) => {
                Credentials::new(Some(access.as_str()), Some(secret.as_str()), None, None, None)
            }
            _ => Credentials::default(),
        }
        .map_err(|e| KeeperError::Config(format!("Failed to load S3 credentials: {}", e)))?;

        Ok(Self {
            region,
            credentials,
            path_style: settings.s3_path_style,
        })
    }

    fn bucket(&self, name: &str) -> KeeperResult<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn is_missing(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

impl ObjectStore for S3Client {
    fn bucket_exists(&self, bucket: &str) -> KeeperResult<bool> {
        Ok(self.bucket(bucket)?.exists()?)
    }

    fn create_bucket(&self, bucket: &str, _location: &str) -> KeeperResult<()> {
        // The location travels inside `self.region`
        let config = BucketConfiguration::default();
        let response = if self.path_style {
            Bucket::create_with_path_style(
                bucket,
                self.region.clone(),
                self.credentials.clone(),
                config,
            )?
        } else {
            Bucket::create(bucket, self.region.clone(), self.credentials.clone(), config)?
        };

        if !response.success() {
            return Err(KeeperError::ObjectStore(format!(
                "creating bucket {} failed: {} {}",
                bucket, response.response_code, response.response_text
            )));
        }
        Ok(())
    }

    fn object_exists(&self, bucket: &str, key: &str) -> KeeperResult<bool> {
        match self.bucket(bucket)?.head_object(key) {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &mut dyn Read,
        content_type: &str,
    ) -> KeeperResult<u64> {
        let handle = self.bucket(bucket)?;
        let mut reader = CountingReader::new(data);
        handle.put_object_stream_with_content_type(&mut reader, key, content_type)?;
        debug!(bucket, key, content_type, "put object");
        Ok(reader.count())
    }

    fn get_object(&self, bucket: &str, key: &str) -> KeeperResult<Vec<u8>> {
        match self.bucket(bucket)?.get_object(key) {
            Ok(response) => Ok(response.bytes().to_vec()),
            Err(e) if is_missing(&e) => Err(KeeperError::object_not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn list_objects(&self, bucket: &str) -> KeeperResult<Vec<StoredObject>> {
        let pages = self.bucket(bucket)?.list(String::new(), None)?;
        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| StoredObject {
                name: object.key,
                size: object.size,
            })
            .collect())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> KeeperResult<()> {
        match self.bucket(bucket)?.delete_object(key) {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Err(KeeperError::object_not_found(key)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_endpoint_region() {
        let mut settings = Settings::default();
        settings.s3_endpoint = Some("http://127.0.0.1:9000".into());
        settings.s3_access_key = Some("minio".into());
        settings.s3_secret_key = Some("minio123".into());

        let client = S3Client::from_settings(&settings).unwrap();
        assert_eq!(client.region.endpoint(), "http://127.0.0.1:9000");
        assert!(client.path_style);
    }

    #[test]
    fn test_explicit_credentials() {
        let mut settings = Settings::default();
        settings.s3_access_key = Some("access".into());
        settings.s3_secret_key = Some("secret".into());

        let client = S3Client::from_settings(&settings).unwrap();
        assert_eq!(client.credentials.access_key.as_deref(), Some("access"));
    }
}
