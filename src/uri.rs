//! URI parsing for storage locations

use crate::error::{Error, Result};
use std::path::PathBuf;
use url::Url;

/// Where a bucket lives, plus the key prefix inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Directory used as a bucket (empty prefix)
    Local(PathBuf),

    /// AWS S3 bucket and prefix
    S3 { bucket: String, prefix: String },

    /// Google Cloud Storage bucket and prefix
    Gcs { bucket: String, prefix: String },

    /// Azure Blob Storage container and prefix
    Azure { container: String, prefix: String },
}

impl Location {
    /// Parse a location string into a Location enum.
    ///
    /// Anything without a known scheme is a local path.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((scheme, _)) = s.split_once("://") {
            match scheme.to_lowercase().as_str() {
                "s3" => {
                    let (bucket, prefix) = Self::split_url(s, "bucket")?;
                    return Ok(Location::S3 { bucket, prefix });
                }
                "gs" | "gcs" => {
                    let (bucket, prefix) = Self::split_url(s, "bucket")?;
                    return Ok(Location::Gcs { bucket, prefix });
                }
                "az" | "azure" => {
                    let (container, prefix) = Self::split_url(s, "container")?;
                    return Ok(Location::Azure { container, prefix });
                }
                "file" => {
                    let path = &s[scheme.len() + 3..];
                    return Ok(Location::Local(PathBuf::from(path)));
                }
                other => {
                    return Err(Error::InvalidUri {
                        uri: s.to_string(),
                        reason: format!("unsupported scheme '{}'", other),
                    })
                }
            }
        }

        Ok(Location::Local(PathBuf::from(s)))
    }

    /// Split `scheme://host/path` into host and path without the leading `/`
    fn split_url(s: &str, what: &str) -> Result<(String, String)> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUri {
            uri: s.to_string(),
            reason: e.to_string(),
        })?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUri {
                uri: s.to_string(),
                reason: format!("missing {} name", what),
            })?
            .to_string();

        // Keys are stored verbatim, so undo the URL escaping of the path
        let path = url.path().trim_start_matches('/');
        Ok((host, percent_decode(path)))
    }

    /// Key prefix inside the bucket (as written, not normalized)
    pub fn prefix(&self) -> &str {
        match self {
            Location::Local(_) => "",
            Location::S3 { prefix, .. }
            | Location::Gcs { prefix, .. }
            | Location::Azure { prefix, .. } => prefix,
        }
    }

    /// True if both locations name the same bucket (prefixes may differ)
    pub fn same_store(&self, other: &Location) -> bool {
        match (self, other) {
            (Location::Local(a), Location::Local(b)) => a == b,
            (Location::S3 { bucket: a, .. }, Location::S3 { bucket: b, .. }) => a == b,
            (Location::Gcs { bucket: a, .. }, Location::Gcs { bucket: b, .. }) => a == b,
            (Location::Azure { container: a, .. }, Location::Azure { container: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Get the scheme/protocol name
    pub fn scheme(&self) -> &'static str {
        match self {
            Location::Local(_) => "file",
            Location::S3 { .. } => "s3",
            Location::Gcs { .. } => "gs",
            Location::Azure { .. } => "az",
        }
    }

    /// Convert back to a URI string
    pub fn to_uri(&self) -> String {
        match self {
            Location::Local(path) => path.display().to_string(),
            Location::S3 { bucket: host, prefix }
            | Location::Gcs { bucket: host, prefix }
            | Location::Azure {
                container: host,
                prefix,
            } => {
                if prefix.is_empty() {
                    format!("{}://{}", self.scheme(), host)
                } else {
                    format!("{}://{}/{}", self.scheme(), host, prefix)
                }
            }
        }
    }
}

/// Decode `%XX` escapes left by URL parsing.
///
/// Goes through the form decoder, so `+` and `&` are escaped first to keep
/// them literal.
fn percent_decode(s: &str) -> String {
    let query = format!("k={}", s.replace('+', "%2B").replace('&', "%26"));
    url::form_urlencoded::parse(query.as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}
