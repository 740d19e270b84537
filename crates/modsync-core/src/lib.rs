//! Core types and utilities for modsync.
//!
//! This crate provides the foundational types used throughout the modsync workspace:
//!
//! - **Module names**: validated DNS-1123 labels
//! - **Resource identities**: the `(group, version, kind, namespace, name)` key
//!   used to compare rendered manifests against cluster state
//! - **Version tokens**: opaque optimistic-concurrency tokens
//! - **Content digests**: blake3 fingerprints of rendered output
//!
//! # Example
//!
//! ```
//! use modsync_core::{ModuleName, ResourceIdentity};
//!
//! let name = ModuleName::new("app").unwrap();
//! let id = ResourceIdentity::new("apps/v1", "Deployment", "default", name.as_str());
//!
//! assert_eq!(id.group, "apps");
//! assert_eq!(id.to_string(), "apps/v1/Deployment/default/app");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{
    split_api_version, validate_dns_label, ContentDigest, IdError, ModuleName, ResourceIdentity,
    VersionToken,
};
