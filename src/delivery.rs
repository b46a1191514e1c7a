use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::platform::{DeliveryClient, RenderMode};

const STARTUP_MESSAGE: &str = "✅ Message relay is running";

/// Sends formatted notifications to the single destination chat.
///
/// One `send_text` call per notification, never retried.
pub struct Delivery {
    client: Arc<dyn DeliveryClient>,
    destination: i64,
    mode: RenderMode,
}

impl Delivery {
    pub fn new(client: Arc<dyn DeliveryClient>, destination: i64, mode: RenderMode) -> Self {
        Self {
            client,
            destination,
            mode,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub async fn deliver(&self, text: &str) -> Result<()> {
        self.client
            .send_text(self.destination, text, self.mode)
            .await
            .with_context(|| format!("Failed to deliver to chat {}", self.destination))
    }

    /// Post the startup confirmation. Failure is logged and otherwise ignored.
    pub async fn announce_startup(&self) {
        match self
            .client
            .send_text(self.destination, STARTUP_MESSAGE, RenderMode::Plain)
            .await
        {
            Ok(()) => info!("Startup confirmation sent to {}", self.destination),
            Err(e) => warn!("Failed to send startup confirmation: {:#}", e),
        }
    }
}
