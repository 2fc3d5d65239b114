//! Google Cloud Storage backend using object_store crate

use super::store::StoreBackend;
use super::MultipartConfig;
use crate::config::Config;
use crate::error::{Error, Result};
use object_store::gcp::GoogleCloudStorageBuilder;
use std::sync::Arc;

/// Open a GCS bucket.
///
/// Credentials come from the environment (`GOOGLE_APPLICATION_CREDENTIALS`,
/// `GOOGLE_SERVICE_ACCOUNT`, ...) unless the config names a service account
/// file, which then takes precedence.
pub fn open(bucket: &str, config: &Config) -> Result<StoreBackend> {
    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);

    if let Some(path) = &config.gcs_service_account_path {
        builder = builder.with_service_account_path(path.to_string_lossy());
    }

    let store = builder
        .build()
        .map_err(|e| Error::config(format!("Failed to create GCS client: {}", e)))?;

    tracing::debug!(bucket = %bucket, "Created GCS client");

    Ok(StoreBackend::new("gcs", Arc::new(store)).with_multipart(MultipartConfig::from(config)))
}
