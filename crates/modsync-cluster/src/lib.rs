//! Kubernetes cluster access for modsync.
//!
//! This crate provides the [`ClusterStore`] trait and the [`K8sClusterStore`]
//! implementation used to read and write the resources a module owns. It
//! handles:
//!
//! - Resolving arbitrary kinds through API discovery (cached)
//! - Fetching, creating, replacing and deleting objects by identity
//! - Listing objects of every kind by label selector
//!
//! Ownership is expressed with the labels in [`labels`]; interpreting them is
//! left to the caller.
//!
//! # Example
//!
//! ```no_run
//! use modsync_cluster::{labels, ClusterConfig, ClusterStore, K8sClusterStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = K8sClusterStore::new(ClusterConfig::default()).await?;
//!
//! for resource in cluster.list_by_label(labels::MODULE, "web").await? {
//!     println!("{}", resource.identity);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils` feature
//! and use [`MockClusterStore`], which keeps objects in memory and records
//! every write.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod error;
pub mod k8s;
pub mod types;

pub use error::{ClusterError, Result};
pub use k8s::{ClusterStore, K8sClusterStore};
pub use types::{identity_of, labels, ClusterConfig, ClusterResource, KindScope};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock::{ClusterOp, MockClusterStore, OpKind};
