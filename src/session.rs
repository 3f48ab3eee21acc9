//! Per-user session worker.
//!
//! All mutations of a user's state happen on one task driven by an inbox and
//! the upstream feed, which keeps the hot path lock-light and preserves
//! per-user event order. Timers (debounce, inactivity) are deadlines polled
//! by the worker's own select loop, so a fire racing a cancel is a no-op by
//! construction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::caption::CaptionFormatter;
use crate::config::RelayTuning;
use crate::debounce::Debouncer;
use crate::events::{LanguagePair, TranslationEvent, ViewerEvent};
use crate::locale::{self, Transliterator};
use crate::registry::UserShared;
use crate::settings::{self, UserSettings};
use crate::stabilizer::ConfidenceTracker;
use crate::upstream::{GlassesSink, TranslationFeed, TranslationSource};

/// Commands the registry sends into a session worker.
pub(crate) enum SessionCommand {
    /// Apply a settings payload (partial JSON merged over current settings).
    Settings(serde_json::Value),
    /// Graceful stop.
    Stop,
}

/// Everything a worker needs at spawn time.
pub(crate) struct SessionSeed {
    pub user_id: String,
    pub session_id: String,
    pub device_model: Option<String>,
    pub settings: UserSettings,
    pub shared: Arc<UserShared>,
    pub source: Arc<dyn TranslationSource>,
    pub sink: Arc<dyn GlassesSink>,
    pub transliterator: Arc<dyn Transliterator>,
    pub tuning: RelayTuning,
}

/// What woke the worker up.
enum Step {
    Cancelled,
    Command(Option<SessionCommand>),
    Event(Option<TranslationEvent>),
    DebounceFire,
    InactivityFire,
}

struct SessionWorker {
    user_id: String,
    session_id: String,
    device_model: Option<String>,
    settings: UserSettings,
    tracker: ConfidenceTracker,
    captions: CaptionFormatter,
    debouncer: Debouncer,
    shared: Arc<UserShared>,
    source: Arc<dyn TranslationSource>,
    sink: Arc<dyn GlassesSink>,
    transliterator: Arc<dyn Transliterator>,
    tuning: RelayTuning,
    /// Armed after each translation event; disarmed once fired.
    inactivity_at: Option<Instant>,
}

/// Run a session to completion. `on_exit` runs after the worker's state is
/// torn down, whatever caused the exit.
pub(crate) async fn run_session(
    seed: SessionSeed,
    mut inbox: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
    on_exit: Box<dyn FnOnce() + Send>,
) {
    let mut worker = SessionWorker::new(seed);
    worker.publish_language_pair();

    let mut feed = worker.subscribe_or_warn().await;

    loop {
        let debounce_deadline = worker.debouncer.deadline();
        let inactivity_deadline = worker.inactivity_at;

        let step = {
            let feed_fut = async {
                match feed.as_mut() {
                    Some(f) => f.events.recv().await,
                    None => std::future::pending().await,
                }
            };
            let debounce_fut = async {
                match debounce_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let inactivity_fut = async {
                match inactivity_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = cancel.cancelled() => Step::Cancelled,
                cmd = inbox.recv() => Step::Command(cmd),
                event = feed_fut => Step::Event(event),
                () = debounce_fut => Step::DebounceFire,
                () = inactivity_fut => Step::InactivityFire,
            }
        };

        match step {
            Step::Cancelled => break,
            Step::Command(None) | Step::Command(Some(SessionCommand::Stop)) => break,
            Step::Command(Some(SessionCommand::Settings(payload))) => {
                worker.apply_settings(payload, &mut feed).await;
            }
            Step::Event(Some(event)) => worker.handle_translation(event).await,
            Step::Event(None) => {
                // Upstream disconnect: full per-user cleanup, then stop.
                info!(user = %worker.user_id, "upstream feed closed, stopping session");
                worker.shared.with_log(crate::transcript::ConversationLog::clear);
                break;
            }
            Step::DebounceFire => worker.flush_debounced().await,
            Step::InactivityFire => worker.inactivity_clear().await,
        }
    }

    drop(feed);
    worker.debouncer.clear();
    debug!(user = %worker.user_id, session = %worker.session_id, "session worker exited");
    on_exit();
}

impl SessionWorker {
    fn new(seed: SessionSeed) -> Self {
        let settings = seed.settings.normalized();
        let tracker = ConfidenceTracker::new(
            settings.confidence_heuristic,
            seed.tuning.acceptance_threshold,
            settings.target_is_cjk(),
        );
        let captions = CaptionFormatter::new(
            settings.line_width,
            settings.number_of_lines,
            settings.target_is_cjk(),
            seed.tuning.max_final_captions,
        );
        let debouncer = Debouncer::new(Duration::from_millis(seed.tuning.debounce_delay_ms));
        Self {
            user_id: seed.user_id,
            session_id: seed.session_id,
            device_model: seed.device_model,
            settings,
            tracker,
            captions,
            debouncer,
            shared: seed.shared,
            source: seed.source,
            sink: seed.sink,
            transliterator: seed.transliterator,
            tuning: seed.tuning,
            inactivity_at: None,
        }
    }

    fn language_pair(&self) -> LanguagePair {
        LanguagePair {
            from: locale::display_name(&self.settings.source_language),
            to: locale::display_name(&self.settings.target_language),
        }
    }

    fn publish_language_pair(&self) {
        let pair = self.language_pair();
        self.shared
            .with_log(|log| log.set_language_pair(&pair.from, &pair.to));
    }

    /// Subscribe to the upstream pair, unless the device cannot render the
    /// target, in which case a warning caption is shown instead.
    async fn subscribe_or_warn(&mut self) -> Option<TranslationFeed> {
        let device = self.device_model.clone().unwrap_or_default();
        if let Some(warning) = settings::unsupported_warning(&device, &self.settings.target_language)
        {
            warn!(
                user = %self.user_id,
                device = %device,
                target = %self.settings.target_language,
                "unsupported display combination, not subscribing"
            );
            self.show(&warning, Some(settings::WARNING_DURATION_MS)).await;
            return None;
        }

        match self
            .source
            .subscribe(
                &self.session_id,
                &self.settings.source_language,
                &self.settings.target_language,
            )
            .await
        {
            Ok(feed) => Some(feed),
            Err(err) => {
                warn!(user = %self.user_id, "upstream subscribe failed: {err}");
                None
            }
        }
    }

    /// The heart: route one translation event to the glasses and the log.
    async fn handle_translation(&mut self, event: TranslationEvent) {
        self.inactivity_at =
            Some(Instant::now() + Duration::from_secs(self.tuning.inactivity_timeout_s));

        // Reverse-direction translations are logged but never displayed.
        let display_direction = !event.did_translate
            || locale::same_language(&event.target_locale, &self.settings.target_language);

        let show_on_glasses = if event.did_translate {
            display_direction
        } else {
            self.settings.display_mode == settings::DisplayMode::Everything
        };

        if show_on_glasses && !event.translated_text.trim().is_empty() {
            let mut glasses_text = event.translated_text.clone();
            if self.settings.target_is_pinyin() {
                glasses_text = self.transliterator.transliterate(&glasses_text);
            }

            if event.is_final {
                let frame = self.captions.process(&glasses_text, true);
                self.debouncer.record_final(Instant::now());
                self.show(&frame, Some(self.tuning.final_display_ms)).await;
            } else {
                let prefix = self
                    .tracker
                    .stabilize(&glasses_text, std::time::Instant::now());
                if !prefix.is_empty() {
                    let frame = self.captions.process(&prefix, false);
                    if let Some(frame) = self.debouncer.offer_interim(frame, Instant::now()) {
                        self.show(&frame, None).await;
                    }
                }
            }
        }

        if event.did_translate {
            let original_language = locale::display_name(&event.source_locale);
            let translated_language = locale::display_name(&event.target_locale);
            let entry = self.shared.with_log(|log| {
                let entry = log.add_translation(
                    &event.original_text,
                    &event.translated_text,
                    &original_language,
                    &translated_language,
                    event.is_final,
                );
                // Broadcasting under the log lock keeps the replay boundary
                // for joining subscribers exact.
                if let Some(entry) = &entry {
                    self.shared
                        .hub
                        .broadcast(&ViewerEvent::Translation(entry.clone()));
                }
                entry
            });
            if entry.is_none() {
                debug!(user = %self.user_id, "dropped blank translation event");
            }
        }

        if event.is_final && display_direction {
            self.tracker.reset();
        }
    }

    /// Emit the coalesced interim frame whose deadline came due.
    async fn flush_debounced(&mut self) {
        if let Some(frame) = self.debouncer.fire(Instant::now()) {
            self.show(&frame, None).await;
        }
    }

    /// 40 s of silence: wipe captions and log, tell the viewers, blank the
    /// glasses. Subscribers stay connected.
    async fn inactivity_clear(&mut self) {
        info!(user = %self.user_id, "inactivity timeout, clearing conversation");
        self.inactivity_at = None;
        self.captions.clear();
        self.tracker.reset();
        self.shared.with_log(|log| {
            log.clear();
            self.shared.hub.broadcast(&ViewerEvent::Clear {});
        });
        self.show("", None).await;
    }

    /// Apply a settings payload merged over the current settings.
    async fn apply_settings(
        &mut self,
        payload: serde_json::Value,
        feed: &mut Option<TranslationFeed>,
    ) {
        let updated = settings::merge_settings(&self.settings, &payload).normalized();
        if updated == self.settings {
            return;
        }

        let language_changed = updated.source_language != self.settings.source_language
            || updated.target_language != self.settings.target_language;

        let device = self.device_model.clone().unwrap_or_default();
        let unsupported = settings::unsupported_warning(&device, &updated.target_language);

        if language_changed {
            self.settings = updated;
            self.tracker = ConfidenceTracker::new(
                self.settings.confidence_heuristic,
                self.tuning.acceptance_threshold,
                self.settings.target_is_cjk(),
            );
            self.captions = CaptionFormatter::new(
                self.settings.line_width,
                self.settings.number_of_lines,
                self.settings.target_is_cjk(),
                self.tuning.max_final_captions,
            );

            let pair = self.language_pair();
            self.shared.with_log(|log| {
                log.set_language_pair(&pair.from, &pair.to);
                // The log itself is kept: it is historical context.
                self.shared
                    .hub
                    .broadcast(&ViewerEvent::LanguageChange(pair.clone()));
            });

            *feed = None;
            if let Some(warning) = unsupported {
                warn!(
                    user = %self.user_id,
                    target = %self.settings.target_language,
                    "unsupported display combination after settings change"
                );
                self.show(&warning, Some(settings::WARNING_DURATION_MS)).await;
            } else {
                *feed = self.subscribe_or_warn().await;
            }
            info!(
                user = %self.user_id,
                from = %self.settings.source_language,
                to = %self.settings.target_language,
                "language pair changed"
            );
        } else {
            // Formatting-only change: keep finals, re-wrap them to the new
            // rectangle; the log and the feed are untouched.
            self.settings = updated;
            self.captions
                .reconfigure(self.settings.line_width, self.settings.number_of_lines);
            self.tracker.set_heuristic(self.settings.confidence_heuristic);
        }
    }

    async fn show(&self, text: &str, duration_ms: Option<u64>) {
        if let Err(err) = self
            .sink
            .show_text_wall(&self.session_id, text, duration_ms)
            .await
        {
            warn!(user = %self.user_id, "glasses write failed: {err}");
        }
    }
}
