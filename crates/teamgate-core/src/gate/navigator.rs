use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::warn;

/// Whatever moves the visitor between pages.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Forwards navigations to a receiver owned by the page router.
#[derive(Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, path: &str) {
        if self.tx.send(path.to_string()).is_err() {
            warn!(path, "Navigation dropped, router is gone");
        }
    }
}

/// Keeps every requested path, for assertions.
#[derive(Clone, Default)]
pub struct RecordingNavigator {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_navigator_forwards_paths() {
        let (navigator, mut rx) = ChannelNavigator::new();
        navigator.navigate("/login");
        assert_eq!(rx.recv().await.as_deref(), Some("/login"));

        drop(rx);
        // Router gone: logged, not a panic
        navigator.navigate("/dashboard");
    }

    #[test]
    fn test_recording_navigator_shares_calls_across_clones() {
        let navigator = RecordingNavigator::new();
        let handle: Arc<dyn Navigator> = Arc::new(navigator.clone());
        handle.navigate("/dashboard");
        handle.navigate("/login");
        assert_eq!(navigator.calls(), vec!["/dashboard", "/login"]);
        assert_eq!(navigator.count(), 2);
    }
}
