//! Upstream seam: the translation source and the glasses display sink.
//!
//! The engine is transport-agnostic; these traits are its only view of the
//! cloud. The production implementation is the WebSocket client in
//! [`ws`]; tests script their own.

mod ws;

pub use ws::UpstreamClient;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::TranslationEvent;

/// A live per-session subscription to translation events.
///
/// Dropping the feed cancels the subscription upstream.
pub struct TranslationFeed {
    /// Events in upstream arrival order. Closes on upstream disconnect.
    pub events: mpsc::Receiver<TranslationEvent>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TranslationFeed {
    /// Wrap a receiver with a cancellation hook invoked on drop.
    pub fn new(
        events: mpsc::Receiver<TranslationEvent>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wrap a bare receiver (tests, replay harnesses).
    #[must_use]
    pub fn detached(events: mpsc::Receiver<TranslationEvent>) -> Self {
        Self {
            events,
            cancel: None,
        }
    }
}

impl Drop for TranslationFeed {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Produces translation event streams for sessions.
///
/// The subscription names a direction pair, but the source may deliver events
/// in either direction of that pair; the session controller sorts out what
/// reaches the glasses.
#[async_trait]
pub trait TranslationSource: Send + Sync {
    /// Subscribe to translation events for one session.
    async fn subscribe(
        &self,
        session_id: &str,
        source_locale: &str,
        target_locale: &str,
    ) -> anyhow::Result<TranslationFeed>;
}

/// The glasses display surface.
///
/// Semantics are "show this text until replaced or expired"; an empty string
/// clears the display.
#[async_trait]
pub trait GlassesSink: Send + Sync {
    /// Show a text wall on the session's primary view.
    ///
    /// `duration_ms` of `None` means "display until superseded".
    async fn show_text_wall(
        &self,
        session_id: &str,
        text: &str,
        duration_ms: Option<u64>,
    ) -> anyhow::Result<()>;
}
