//! Cargohold is a small OCI distribution registry: container clients push and
//! pull images over the Docker Registry HTTP API V2, and content lands in a
//! digest-addressed layout on a pluggable blob store.
//!
//! The crate splits into three layers:
//!
//! - [`storage`]: the [`storage::BlobStore`] trait and the filesystem
//!   implementation ([`storage::LocalStore`]);
//! - [`oci`]: the storage engine with digests and streaming verification,
//!   path layout, upload sessions, and the manifest/tag model;
//! - [`serve`]: the axum HTTP adapter speaking the distribution protocol.

pub mod cli;
pub mod config;
pub mod error;
pub mod oci;
pub mod serve;
pub mod storage;

pub use error::{RegistryError, Result};
pub use oci::digest::Digest;
pub use oci::OciStorage;
