//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use modsync_control::{CancelSignal, ModuleControl};

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
pub struct GatewayState<C>
where
    C: ModuleControl,
{
    /// The module service.
    pub control: Arc<C>,
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// Fires when the server shuts down; passed to every reconcile.
    pub shutdown: CancelSignal,
}

impl<C> GatewayState<C>
where
    C: ModuleControl,
{
    /// Create a new gateway state whose reconciles are never cancelled.
    #[must_use]
    pub fn new(control: Arc<C>, config: GatewayConfig) -> Self {
        Self {
            control,
            config,
            shutdown: CancelSignal::never(),
        }
    }

    /// Cancel in-flight reconciles when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancelSignal) -> Self {
        self.shutdown = shutdown;
        self
    }
}

impl<C> Clone for GatewayState<C>
where
    C: ModuleControl,
{
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}
