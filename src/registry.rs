//! Process-wide session registry.
//!
//! One `Relay` per process owns every per-user slot: the fan-out hub and
//! conversation log (which outlive sessions so viewers can idle across
//! reconnects) and the handle of the live session worker, if any. At most one
//! session is live per user; a newer one supersedes the older.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::events::LanguagePair;
use crate::hub::{FanoutHub, ViewerSubscription};
use crate::locale::{NoopTransliterator, Transliterator};
use crate::session::{self, SessionCommand, SessionSeed};
use crate::transcript::ConversationLog;
use crate::upstream::{GlassesSink, TranslationSource};

/// Per-user state that outlives individual sessions.
///
/// Only the session worker mutates the log; the registry and the HTTP surface
/// take the lock for reads and for the subscribe snapshot.
pub(crate) struct UserShared {
    pub hub: FanoutHub,
    log: Mutex<ConversationLog>,
}

impl UserShared {
    fn new(user_id: &str, buffer: usize, max_entries: usize) -> Self {
        Self {
            hub: FanoutHub::new(user_id, buffer),
            log: Mutex::new(ConversationLog::new(max_entries)),
        }
    }

    /// Run `f` with the log locked. Broadcasting inside `f` is how workers
    /// keep the replay boundary exact for joining subscribers.
    pub(crate) fn with_log<R>(&self, f: impl FnOnce(&mut ConversationLog) -> R) -> R {
        let mut guard = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

/// Handle on a live session worker.
struct SessionHandle {
    session_id: String,
    inbox: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct UserSlot {
    shared: Arc<UserShared>,
    session: Option<SessionHandle>,
}

struct RelayInner {
    config: RelayConfig,
    source: Arc<dyn TranslationSource>,
    sink: Arc<dyn GlassesSink>,
    transliterator: Arc<dyn Transliterator>,
    users: Mutex<HashMap<String, UserSlot>>,
}

/// The relay engine: session lifecycle, settings, viewer subscriptions.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    /// Create a relay over the given upstream source and glasses sink.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        source: Arc<dyn TranslationSource>,
        sink: Arc<dyn GlassesSink>,
    ) -> Self {
        Self::with_transliterator(config, source, sink, Arc::new(NoopTransliterator))
    }

    /// Create a relay with a custom pinyin transliterator.
    #[must_use]
    pub fn with_transliterator(
        config: RelayConfig,
        source: Arc<dyn TranslationSource>,
        sink: Arc<dyn GlassesSink>,
        transliterator: Arc<dyn Transliterator>,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                config,
                source,
                sink,
                transliterator,
                users: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The configuration the relay was built with.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Open (or supersede) the session for a user.
    ///
    /// A live prior session is stopped first; its conversation log is kept —
    /// the transition is graceful from the viewers' point of view. Explicit
    /// [`Relay::close_session`] wipes the log instead.
    pub async fn open_session(
        &self,
        user_id: &str,
        session_id: &str,
        device_model: Option<String>,
        settings_payload: Option<serde_json::Value>,
    ) {
        let settings = match &settings_payload {
            Some(payload) => {
                crate::settings::merge_settings(&self.inner.config.default_settings, payload)
            }
            None => self.inner.config.default_settings.clone(),
        };

        let previous = {
            let mut users = lock_users(&self.inner.users);
            let slot = users.entry(user_id.to_owned()).or_insert_with(|| UserSlot {
                shared: Arc::new(UserShared::new(
                    user_id,
                    self.inner.config.tuning.subscriber_buffer,
                    self.inner.config.tuning.max_log_entries,
                )),
                session: None,
            });
            slot.session.take()
        };
        if let Some(prior) = previous {
            info!(
                user = user_id,
                superseded = %prior.session_id,
                by = session_id,
                "session superseded"
            );
            stop_worker(prior).await;
        }

        let shared = self.shared_for(user_id);
        let (inbox_tx, inbox_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let seed = SessionSeed {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            device_model,
            settings,
            shared,
            source: Arc::clone(&self.inner.source),
            sink: Arc::clone(&self.inner.sink),
            transliterator: Arc::clone(&self.inner.transliterator),
            tuning: self.inner.config.tuning.clone(),
        };

        let on_exit = self.exit_hook(user_id, session_id);
        let task = tokio::spawn(session::run_session(
            seed,
            inbox_rx,
            cancel.clone(),
            on_exit,
        ));

        let mut users = lock_users(&self.inner.users);
        if let Some(slot) = users.get_mut(user_id) {
            slot.session = Some(SessionHandle {
                session_id: session_id.to_owned(),
                inbox: inbox_tx,
                cancel,
                task,
            });
        }
        info!(user = user_id, session = session_id, "session opened");
    }

    /// Forward a settings payload to the user's live session.
    pub async fn update_settings(&self, user_id: &str, payload: serde_json::Value) {
        let inbox = {
            let users = lock_users(&self.inner.users);
            users
                .get(user_id)
                .and_then(|slot| slot.session.as_ref())
                .map(|handle| handle.inbox.clone())
        };
        match inbox {
            Some(inbox) => {
                if inbox.send(SessionCommand::Settings(payload)).await.is_err() {
                    warn!(user = user_id, "settings update for a finished session");
                }
            }
            None => debug!(user = user_id, "settings update with no live session"),
        }
    }

    /// Stop the user's session and wipe their conversation state.
    ///
    /// Viewer subscribers are left connected; they will see the next
    /// session's events for this user.
    pub async fn close_session(&self, user_id: &str) {
        let handle = {
            let mut users = lock_users(&self.inner.users);
            users.get_mut(user_id).and_then(|slot| slot.session.take())
        };
        let Some(handle) = handle else {
            return;
        };
        let session_id = handle.session_id.clone();
        stop_worker(handle).await;

        if let Some(shared) = self.try_shared_for(user_id) {
            shared.with_log(ConversationLog::clear);
        }
        info!(user = user_id, session = %session_id, "session closed");
    }

    /// Subscribe a viewer to a user's events, with replay.
    ///
    /// The snapshot and the registration happen under the log lock, so the
    /// subscriber sees exactly the entries present at join, then live events.
    #[must_use]
    pub fn subscribe(&self, user_id: &str) -> ViewerSubscription {
        let shared = self.shared_for(user_id);
        shared.with_log(|log| shared.hub.subscribe(&log.all_entries()))
    }

    /// Current language pair for a user (defaults when they have no state).
    #[must_use]
    pub fn language_pair(&self, user_id: &str) -> LanguagePair {
        match self.try_shared_for(user_id) {
            Some(shared) => shared.with_log(|log| log.language_pair().clone()),
            None => {
                let defaults = &self.inner.config.default_settings;
                LanguagePair {
                    from: crate::locale::display_name(&defaults.source_language),
                    to: crate::locale::display_name(&defaults.target_language),
                }
            }
        }
    }

    /// The first user with a live session, if any (dev-mode auth fallback).
    #[must_use]
    pub fn first_active_user(&self) -> Option<String> {
        let users = lock_users(&self.inner.users);
        users
            .iter()
            .find(|(_, slot)| slot.session.is_some())
            .map(|(user_id, _)| user_id.clone())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        let users = lock_users(&self.inner.users);
        users
            .values()
            .filter(|slot| slot.session.is_some())
            .count()
    }

    /// Stop every live session (process shutdown).
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut users = lock_users(&self.inner.users);
            users
                .values_mut()
                .filter_map(|slot| slot.session.take())
                .collect()
        };
        for handle in handles {
            stop_worker(handle).await;
        }
    }

    fn shared_for(&self, user_id: &str) -> Arc<UserShared> {
        let mut users = lock_users(&self.inner.users);
        let slot = users.entry(user_id.to_owned()).or_insert_with(|| UserSlot {
            shared: Arc::new(UserShared::new(
                user_id,
                self.inner.config.tuning.subscriber_buffer,
                self.inner.config.tuning.max_log_entries,
            )),
            session: None,
        });
        Arc::clone(&slot.shared)
    }

    fn try_shared_for(&self, user_id: &str) -> Option<Arc<UserShared>> {
        let users = lock_users(&self.inner.users);
        users.get(user_id).map(|slot| Arc::clone(&slot.shared))
    }

    /// Cleanup run when a worker exits on its own (upstream feed closed).
    /// A superseding session has already replaced the handle; the session id
    /// check keeps the hook from tearing down its successor.
    fn exit_hook(&self, user_id: &str, session_id: &str) -> Box<dyn FnOnce() + Send> {
        let inner: Weak<RelayInner> = Arc::downgrade(&self.inner);
        let user_id = user_id.to_owned();
        let session_id = session_id.to_owned();
        Box::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut users = lock_users(&inner.users);
            let Some(slot) = users.get_mut(&user_id) else {
                return;
            };
            if slot
                .session
                .as_ref()
                .is_some_and(|handle| handle.session_id == session_id)
            {
                slot.session = None;
                debug!(user = %user_id, session = %session_id, "session handle reaped");
            }
        })
    }
}

async fn stop_worker(handle: SessionHandle) {
    let _ = handle.inbox.try_send(SessionCommand::Stop);
    handle.cancel.cancel();
    if let Err(err) = handle.task.await {
        warn!("session worker join failed: {err}");
    }
}

fn lock_users(
    users: &Mutex<HashMap<String, UserSlot>>,
) -> std::sync::MutexGuard<'_, HashMap<String, UserSlot>> {
    match users.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
