//! Shared Client Context
//!
//! This module defines the `ClientContext` struct: the per-visit resources
//! every controller is built from. It replaces any process-wide singleton; a
//! second context is a second, fully independent visit.

use crate::{config::Config, navigation::RouteNavigator};
use finbuddy_core::Navigator;
use std::sync::Arc;

/// Created once at startup and handed to each controller.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub routes: Arc<RouteNavigator>,
}

impl ClientContext {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            routes: Arc::new(RouteNavigator::new()),
        }
    }

    /// The navigation capability shared by chat, voice and the control channel.
    pub fn navigator(&self) -> Arc<dyn Navigator> {
        self.routes.clone()
    }
}
