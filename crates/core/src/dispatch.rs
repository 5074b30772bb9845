//! Redirect dispatch shared by the chat stream, the control channel and the
//! voice data channel.

use crate::frame::ControlFrame;
use std::sync::Arc;
use tracing::{info, warn};

/// The navigation capability of the surrounding application.
#[cfg_attr(test, mockall::automock)]
pub trait Navigator: Send + Sync {
    /// Moves the application to `target` (a route path such as `/analysis`).
    fn navigate(&self, target: &str);
}

/// Tells the caller whether to keep reading frames from the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// A redirect ended the exchange; remaining frames must not be applied.
    Stop,
}

/// Triggers navigation for the first redirect frame of one exchange.
///
/// Create one dispatcher per logical exchange. Later redirects in the same
/// exchange still report [`Dispatch::Stop`] but do not navigate again.
pub struct RedirectDispatcher {
    navigator: Arc<dyn Navigator>,
    redirected: bool,
}

impl RedirectDispatcher {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            navigator,
            redirected: false,
        }
    }

    /// Inspects one frame, navigating if it is the exchange's first redirect.
    pub fn dispatch(&mut self, frame: &ControlFrame) -> Dispatch {
        match frame.redirect_target() {
            Some(target) => self.redirect(target),
            None => Dispatch::Continue,
        }
    }

    /// Navigates to `target` unless this exchange already redirected.
    pub fn redirect(&mut self, target: &str) -> Dispatch {
        if self.redirected {
            warn!(%target, "Ignoring repeated redirect in the same exchange");
        } else {
            info!(%target, "Redirect signal received");
            self.redirected = true;
            self.navigator.navigate(target);
        }
        Dispatch::Stop
    }

    pub fn has_redirected(&self) -> bool {
        self.redirected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_navigates_once_and_stops() {
        let mut navigator = MockNavigator::new();
        navigator
            .expect_navigate()
            .withf(|target| target == "/x")
            .times(1)
            .return_const(());
        let mut dispatcher = RedirectDispatcher::new(Arc::new(navigator));

        let redirect = ControlFrame::Redirect {
            target: "/x".to_string(),
        };
        assert_eq!(dispatcher.dispatch(&redirect), Dispatch::Stop);
        assert!(dispatcher.has_redirected());
    }

    #[test]
    fn test_second_redirect_in_exchange_is_ignored() {
        let mut navigator = MockNavigator::new();
        navigator
            .expect_navigate()
            .withf(|target| target == "/first")
            .times(1)
            .return_const(());
        let mut dispatcher = RedirectDispatcher::new(Arc::new(navigator));

        let first = ControlFrame::Redirect {
            target: "/first".to_string(),
        };
        let second = ControlFrame::Redirect {
            target: "/second".to_string(),
        };
        assert_eq!(dispatcher.dispatch(&first), Dispatch::Stop);
        assert_eq!(dispatcher.dispatch(&second), Dispatch::Stop);
    }

    #[test]
    fn test_non_redirect_frames_continue() {
        let mut navigator = MockNavigator::new();
        navigator.expect_navigate().never();
        let mut dispatcher = RedirectDispatcher::new(Arc::new(navigator));

        let content = ControlFrame::Content {
            text: "hello".to_string(),
        };
        assert_eq!(dispatcher.dispatch(&content), Dispatch::Continue);
        assert_eq!(dispatcher.dispatch(&ControlFrame::Unknown), Dispatch::Continue);
        assert!(!dispatcher.has_redirected());
    }
}
