//! artisync - keep object-store prefixes in step with local directories
//!
//! The engine mirrors a local directory into a key prefix of an object store
//! (Google Cloud Storage, S3, Azure Blob, or a plain directory), uploads and
//! downloads whole trees, and exposes the single-object primitives it is
//! built on through the [`Storage`] trait.

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod progress;
pub mod retry;
pub mod storage;
pub mod sync;
pub mod types;
pub mod uri;

pub use config::Config;
pub use error::{Error, Result};
pub use storage::Storage;
pub use sync::SyncEngine;
pub use types::*;
