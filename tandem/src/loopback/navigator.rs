use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_core::{Navigator, Result};
use tokio::sync::watch;
use tracing::debug;

/// Host page location. Navigation is instant; observers follow the URL
/// through [`SimulatedNavigator::subscribe`].
pub struct SimulatedNavigator {
    url: watch::Sender<String>,
    history: Mutex<Vec<String>>,
}

impl SimulatedNavigator {
    #[must_use]
    pub fn new(url: &str) -> Self {
        let (tx, _) = watch::channel(url.to_string());
        Self {
            url: tx,
            history: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.url.subscribe()
    }

    /// The user follows a link
    pub fn visit(&self, url: &str) {
        self.url.send_replace(url.to_string());
    }

    /// URLs navigated to programmatically
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl Navigator for SimulatedNavigator {
    fn current_url(&self) -> String {
        self.url.borrow().clone()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        self.history.lock().push(url.to_string());
        self.url.send_replace(url.to_string());
        Ok(())
    }
}
