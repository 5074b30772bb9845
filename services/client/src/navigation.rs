//! Client-side routing.
//!
//! The terminal front end has no page router, so navigation publishes the
//! current route on a watch channel. Anything interested in route changes
//! (the printer in the binary, tests) subscribes to it.

use finbuddy_core::Navigator;
use tokio::sync::watch;
use tracing::info;

pub const INITIAL_ROUTE: &str = "/";

/// A [`Navigator`] that records the current route.
pub struct RouteNavigator {
    route: watch::Sender<String>,
}

impl RouteNavigator {
    pub fn new() -> Self {
        let (route, _) = watch::channel(INITIAL_ROUTE.to_string());
        Self { route }
    }

    pub fn current(&self) -> String {
        self.route.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.route.subscribe()
    }
}

impl Default for RouteNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for RouteNavigator {
    fn navigate(&self, target: &str) {
        info!(%target, "Navigating");
        self.route.send_replace(target.to_string());
    }
}
