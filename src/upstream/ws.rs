//! WebSocket client for the upstream cloud.
//!
//! One socket carries everything: session lifecycle inbound, translation
//! events inbound (routed to per-session feeds), and display requests
//! outbound. The connection task reconnects with exponential backoff; a drop
//! of the socket stops every session it carried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::events::TranslationEvent;
use crate::registry::Relay;

use super::{GlassesSink, TranslationFeed, TranslationSource};

/// Buffered events per session feed.
const FEED_BUFFER: usize = 256;
/// Reconnect backoff bounds, seconds.
const BACKOFF_START_S: u64 = 2;
const BACKOFF_CAP_S: u64 = 60;

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Messages sent to the cloud.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ConnectionInit {
        package_name: String,
        api_key: String,
    },
    Subscribe {
        session_id: String,
        source_locale: String,
        target_locale: String,
    },
    Unsubscribe {
        session_id: String,
    },
    DisplayTextWall {
        session_id: String,
        text: String,
        view: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

/// Messages received from the cloud.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck {},
    SessionStart {
        session_id: String,
        user_id: String,
        #[serde(default)]
        device_model: Option<String>,
        #[serde(default)]
        settings: Option<serde_json::Value>,
    },
    SettingsUpdate {
        user_id: String,
        settings: serde_json::Value,
    },
    Translation(TranslationWire),
    SessionStop {
        user_id: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Wire form of a translation event (the relay stamps the receive time).
#[derive(Debug, Clone, Deserialize)]
struct TranslationWire {
    session_id: String,
    user_id: String,
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    translated_text: String,
    #[serde(default)]
    source_locale: String,
    #[serde(default)]
    target_locale: String,
    #[serde(default)]
    did_translate: bool,
    #[serde(default)]
    is_final: bool,
}

impl From<TranslationWire> for TranslationEvent {
    fn from(wire: TranslationWire) -> Self {
        Self {
            session_id: wire.session_id,
            user_id: wire.user_id,
            original_text: wire.original_text,
            translated_text: wire.translated_text,
            source_locale: wire.source_locale,
            target_locale: wire.target_locale,
            did_translate: wire.did_translate,
            is_final: wire.is_final,
            received_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

type RouteMap = HashMap<String, mpsc::Sender<TranslationEvent>>;

/// Upstream cloud client: [`TranslationSource`] + [`GlassesSink`] over one
/// WebSocket connection.
pub struct UpstreamClient {
    url: String,
    package_name: String,
    api_key: String,
    outbound: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    routes: Arc<Mutex<RouteMap>>,
}

impl UpstreamClient {
    /// Create a client for the configured endpoint. Nothing connects until
    /// [`UpstreamClient::run`] is spawned.
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url: config.upstream_url.clone(),
            package_name: config.package_name.clone(),
            api_key: config.api_key.clone(),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drive the connection until cancelled, reconnecting with backoff.
    ///
    /// Session lifecycle messages are dispatched into `relay`; a connection
    /// drop closes every routed feed, which stops the affected sessions.
    pub async fn run(&self, relay: Relay, cancel: CancellationToken) {
        let Some(mut outbound_rx) = self.take_outbound_rx() else {
            warn!("upstream client run() called twice, ignoring");
            return;
        };

        let mut backoff_s = BACKOFF_START_S;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.drive(&relay, &cancel, &mut outbound_rx).await {
                Ok(()) => break, // cancelled
                Err(err) => {
                    warn!("upstream connection lost: {err}; retrying in {backoff_s}s");
                }
            }
            // Closing the feeds stops every session this socket carried.
            lock_routes(&self.routes).clear();

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(backoff_s)) => {}
            }
            backoff_s = backoff_s.saturating_mul(2).min(BACKOFF_CAP_S);
        }
    }

    async fn drive(
        &self,
        relay: &Relay,
        cancel: &CancellationToken,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> anyhow::Result<()> {
        info!(url = %self.url, "connecting to upstream");
        let (mut socket, _response) = connect_async(self.url.as_str()).await?;

        let init = serde_json::to_string(&ClientMessage::ConnectionInit {
            package_name: self.package_name.clone(),
            api_key: self.api_key.clone(),
        })?;
        socket.send(Message::Text(init)).await?;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = socket.close(None).await;
                    return Ok(());
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(text) => socket.send(Message::Text(text)).await?,
                        None => anyhow::bail!("outbound channel closed"),
                    }
                }
                incoming = socket.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(relay, &text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            socket.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            anyhow::bail!("upstream closed the connection: {frame:?}");
                        }
                        Some(Ok(_)) => {} // binary/pong frames are ignored
                        Some(Err(err)) => anyhow::bail!("socket error: {err}"),
                        None => anyhow::bail!("socket stream ended"),
                    }
                }
            }
        }
    }

    async fn handle_message(&self, relay: &Relay, text: &str) {
        // Malformed upstream events are logged and dropped without touching
        // any session state.
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("malformed upstream message, dropping: {err}");
                return;
            }
        };

        match message {
            ServerMessage::ConnectionAck {} => {
                info!("upstream connection acknowledged");
            }
            ServerMessage::SessionStart {
                session_id,
                user_id,
                device_model,
                settings,
            } => {
                relay
                    .open_session(&user_id, &session_id, device_model, settings)
                    .await;
            }
            ServerMessage::SettingsUpdate { user_id, settings } => {
                relay.update_settings(&user_id, settings).await;
            }
            ServerMessage::Translation(wire) => {
                let session_id = wire.session_id.clone();
                let sender = lock_routes(&self.routes).get(&session_id).cloned();
                match sender {
                    Some(sender) => {
                        let event = TranslationEvent::from(wire);
                        if sender.send(event).await.is_err() {
                            lock_routes(&self.routes).remove(&session_id);
                            debug!(session = %session_id, "dropped route to finished session");
                        }
                    }
                    None => {
                        debug!(session = %session_id, "translation for unsubscribed session");
                    }
                }
            }
            ServerMessage::SessionStop {
                user_id,
                session_id,
            } => {
                if let Some(session_id) = session_id {
                    lock_routes(&self.routes).remove(&session_id);
                }
                relay.close_session(&user_id).await;
            }
            ServerMessage::Error { message } => {
                warn!("upstream reported an error: {message}");
            }
        }
    }

    fn send_client_message(&self, message: &ClientMessage) -> anyhow::Result<()> {
        let text = serde_json::to_string(message)?;
        self.outbound
            .send(text)
            .map_err(|_| anyhow::anyhow!("upstream connection task is gone"))
    }

    fn take_outbound_rx(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        match self.outbound_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl TranslationSource for UpstreamClient {
    async fn subscribe(
        &self,
        session_id: &str,
        source_locale: &str,
        target_locale: &str,
    ) -> anyhow::Result<TranslationFeed> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        lock_routes(&self.routes).insert(session_id.to_owned(), tx);

        self.send_client_message(&ClientMessage::Subscribe {
            session_id: session_id.to_owned(),
            source_locale: source_locale.to_owned(),
            target_locale: target_locale.to_owned(),
        })?;

        let routes = Arc::clone(&self.routes);
        let outbound = self.outbound.clone();
        let feed_session = session_id.to_owned();
        Ok(TranslationFeed::new(rx, move || {
            lock_routes(&routes).remove(&feed_session);
            if let Ok(text) = serde_json::to_string(&ClientMessage::Unsubscribe {
                session_id: feed_session.clone(),
            }) {
                let _ = outbound.send(text);
            }
        }))
    }
}

#[async_trait]
impl GlassesSink for UpstreamClient {
    async fn show_text_wall(
        &self,
        session_id: &str,
        text: &str,
        duration_ms: Option<u64>,
    ) -> anyhow::Result<()> {
        self.send_client_message(&ClientMessage::DisplayTextWall {
            session_id: session_id.to_owned(),
            text: text.to_owned(),
            view: "main",
            duration_ms,
        })
    }
}

fn lock_routes(routes: &Mutex<RouteMap>) -> std::sync::MutexGuard<'_, RouteMap> {
    match routes.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
