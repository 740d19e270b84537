//! HTTP gateway for the modsync module reconciler.
//!
//! This crate exposes the module operations over a JSON API. Handlers parse
//! and type-check requests, call the module service and map its errors to
//! responses; they hold no reconciliation logic of their own.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Clients (HTTP)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      modsync-gateway                        │
//! │        Router + Handlers  ·  trace / CORS / limits          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌───────────────────┐
//!                    │   ModuleService   │
//!                    └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use modsync_cluster::{ClusterConfig, K8sClusterStore};
//! use modsync_control::{ControlConfig, HttpTemplateStore, ModuleService, TemplateConfig};
//! use modsync_gateway::{create_router, GatewayConfig, GatewayState};
//! use modsync_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/modsync")?);
//! let cluster = Arc::new(K8sClusterStore::new(ClusterConfig::default()).await?);
//! let templates = Arc::new(HttpTemplateStore::new(TemplateConfig::default())?);
//! let control = Arc::new(ModuleService::new(store, cluster, templates, ControlConfig::default()));
//!
//! let state = GatewayState::new(control, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
