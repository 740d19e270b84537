//! Module reconciliation core for modsync.
//!
//! This crate turns a stored module (a template reference plus values) into
//! cluster resources and keeps the two in line. It owns the decisions: which
//! resources a module owns, what needs to change, and in what order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway (HTTP)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ModuleService                          │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌───────────────┐   │
//! │  │ Identity │ │Ownership │ │   Diff   │ │ Reconcile     │   │
//! │  │ Resolver │ │ Tracker  │ │  Engine  │ │ State Machine │   │
//! │  └──────────┘ └──────────┘ └──────────┘ └───────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │ Template │   │ Cluster  │
//!        │ (RocksDB)│   │  Store   │   │  (K8s)   │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use modsync_cluster::{ClusterConfig, K8sClusterStore};
//! use modsync_control::{
//!     CancelSignal, ControlConfig, CreateModuleRequest, HttpTemplateStore, ModuleControl,
//!     ModuleService, TemplateConfig,
//! };
//! use modsync_store::{RocksStore, TemplateRef};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/modsync")?);
//! let cluster = Arc::new(K8sClusterStore::new(ClusterConfig::default()).await?);
//! let templates = Arc::new(HttpTemplateStore::new(TemplateConfig::default())?);
//!
//! let control = ModuleService::new(store, cluster, templates, ControlConfig::default());
//!
//! let template = TemplateRef::new("https://raw.example.com/org/templates", "web", "v1");
//! let module = control
//!     .create_module(CreateModuleRequest::new("app", "default", template))
//!     .await?;
//! let report = control
//!     .reconcile_module(&module.name, CancelSignal::never())
//!     .await?;
//!
//! println!("created {} resource(s)", report.created.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Ownership
//!
//! A resource belongs to a module only if it carries the
//! `modsync.io/module=<name>` label. Resources without it are never
//! replaced or deleted, even when their identity matches a rendered one.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod diff;
pub mod error;
pub mod guard;
pub mod identity;
pub mod lifecycle;
pub mod ownership;
pub mod render;
pub mod service;
pub mod templates;
pub mod types;

pub use cancel::{CancelGuard, CancelHandle, CancelSignal};
pub use diff::ResourcePartition;
pub use error::{ControlError, Result};
pub use identity::DesiredResource;
pub use render::{RenderContext, Renderer, ValuesRenderer};
pub use service::{ModuleControl, ModuleService};
pub use templates::{
    HttpTemplateStore, StaticTemplateStore, TemplateConfig, TemplateDefinition, TemplateStore,
};
pub use types::{
    ApplyProgress, ControlConfig, CreateModuleRequest, ReconcilePlan, ReconcileReport,
    RenderedSet, ResourceState, TemplatePreview, TrackedResource, UpdateModuleRequest,
    ValidationReport,
};

// Re-export commonly used types from dependencies for convenience
pub use modsync_core::{ModuleName, ResourceIdentity, VersionToken};
pub use modsync_store::{Module, ModuleSpec, ModuleStatus, ReconcilePhase, TemplateRef};
