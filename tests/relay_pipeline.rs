//! End-to-end scenarios across the relay engine: scripted upstream source,
//! recording glasses sink, paused tokio time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use lingolens::upstream::{GlassesSink, TranslationFeed, TranslationSource};
use lingolens::{
    ConfidenceHeuristic, DisplayMode, LineWidth, Relay, RelayConfig, RelayTuning,
    TranslationEvent, UserSettings, ViewerEvent,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Upstream source the test scripts by pushing events per session.
struct ScriptedSource {
    feeds: Arc<Mutex<HashMap<String, mpsc::Sender<TranslationEvent>>>>,
    subscriptions: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    async fn push(&self, session_id: &str, event: TranslationEvent) {
        let sender = self
            .feeds
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .expect("no feed for session");
        sender.send(event).await.expect("feed closed");
    }

    fn has_feed(&self, session_id: &str) -> bool {
        self.feeds.lock().unwrap().contains_key(session_id)
    }

    /// Simulate an upstream disconnect for one session.
    fn drop_feed(&self, session_id: &str) {
        self.feeds.lock().unwrap().remove(session_id);
    }

    fn subscriptions(&self) -> Vec<(String, String, String)> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranslationSource for ScriptedSource {
    async fn subscribe(
        &self,
        session_id: &str,
        source_locale: &str,
        target_locale: &str,
    ) -> anyhow::Result<TranslationFeed> {
        let (tx, rx) = mpsc::channel(64);
        self.feeds
            .lock()
            .unwrap()
            .insert(session_id.to_owned(), tx);
        self.subscriptions.lock().unwrap().push((
            session_id.to_owned(),
            source_locale.to_owned(),
            target_locale.to_owned(),
        ));

        let feeds = Arc::clone(&self.feeds);
        let session = session_id.to_owned();
        Ok(TranslationFeed::new(rx, move || {
            feeds.lock().unwrap().remove(&session);
        }))
    }
}

#[derive(Debug, Clone)]
struct GlassesWrite {
    text: String,
    duration_ms: Option<u64>,
    at: Instant,
}

/// Glasses sink that records every write with its (paused-clock) timestamp.
struct RecordingSink {
    writes: Mutex<Vec<GlassesWrite>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            writes: Mutex::new(Vec::new()),
        })
    }

    fn writes(&self) -> Vec<GlassesWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl GlassesSink for RecordingSink {
    async fn show_text_wall(
        &self,
        _session_id: &str,
        text: &str,
        duration_ms: Option<u64>,
    ) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(GlassesWrite {
            text: text.to_owned(),
            duration_ms,
            at: Instant::now(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    relay: Relay,
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
}

fn harness() -> Harness {
    let config = RelayConfig {
        package_name: "org.example.lingolens".to_owned(),
        api_key: "test-key".to_owned(),
        port: 0,
        production: false,
        upstream_url: "ws://unused".to_owned(),
        default_settings: UserSettings {
            source_language: "es-ES".to_owned(),
            target_language: "en-US".to_owned(),
            line_width: LineWidth::Medium,
            number_of_lines: 3,
            display_mode: DisplayMode::Everything,
            confidence_heuristic: ConfidenceHeuristic::WordStability,
        },
        tuning: RelayTuning::default(),
    };
    let source = ScriptedSource::new();
    let sink = RecordingSink::new();
    let source_dyn: Arc<dyn TranslationSource> = Arc::clone(&source) as Arc<dyn TranslationSource>;
    let sink_dyn: Arc<dyn GlassesSink> = Arc::clone(&sink) as Arc<dyn GlassesSink>;
    let relay = Relay::new(config, source_dyn, sink_dyn);
    Harness {
        relay,
        source,
        sink,
    }
}

fn translated(session: &str, text: &str, is_final: bool) -> TranslationEvent {
    TranslationEvent {
        session_id: session.to_owned(),
        user_id: "user@example.com".to_owned(),
        original_text: format!("[es] {text}"),
        translated_text: text.to_owned(),
        source_locale: "es-ES".to_owned(),
        target_locale: "en-US".to_owned(),
        did_translate: true,
        is_final,
        received_at: Utc::now(),
    }
}

/// Let spawned workers run (paused time advances only while everyone waits).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn next_event(rx: &mut mpsc::Receiver<ViewerEvent>) -> ViewerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for viewer event")
        .expect("viewer stream closed")
}

fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stabilizing_prefix_and_final_promotion() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;
    assert_eq!(
        h.source.subscriptions(),
        vec![("s1".to_owned(), "es-ES".to_owned(), "en-US".to_owned())]
    );

    let interims = [
        "the",
        "the quik",
        "the quick",
        "the quick brow",
        "the quick brown",
    ];
    for interim in interims {
        h.source.push("s1", translated("s1", interim, false)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // Glasses frames only ever grow between finals.
    let writes = h.sink.writes();
    assert!(!writes.is_empty());
    let mut last = 0usize;
    for write in &writes {
        let count = token_count(&write.text);
        assert!(count >= last, "frame shrank: {writes:?}");
        last = count;
    }
    assert!(writes.iter().any(|w| w.text.contains("the quick")));

    h.source
        .push("s1", translated("s1", "the quick brown", true))
        .await;
    settle().await;

    // The final goes straight to the glasses with the long display hold.
    let writes = h.sink.writes();
    let last = writes.last().unwrap();
    assert!(last.text.contains("the quick brown"));
    assert_eq!(last.duration_ms, Some(20_000));

    // One utterance in the log, promoted in place.
    let replay = h.relay.subscribe("user@example.com");
    let translations: Vec<_> = replay
        .initial
        .iter()
        .filter_map(|e| match e {
            ViewerEvent::Translation(entry) => Some(entry.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(translations.len(), 1);
    assert!(translations[0].is_final);
    assert!(translations[0].is_new_utterance);
    assert_eq!(translations[0].translated_text, "the quick brown");
}

#[tokio::test(start_paused = true)]
async fn refined_utterance_keeps_one_id() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;

    let mut viewer = h.relay.subscribe("user@example.com");
    assert_eq!(viewer.initial.len(), 1); // connected only

    h.source.push("s1", translated("s1", "alpha", false)).await;
    h.source.push("s1", translated("s1", "bravo", false)).await;
    h.source
        .push("s1", translated("s1", "charlie", true))
        .await;
    settle().await;

    let first = next_event(&mut viewer.events).await;
    let second = next_event(&mut viewer.events).await;
    let third = next_event(&mut viewer.events).await;
    let ids: Vec<String> = [&first, &second, &third]
        .iter()
        .map(|e| match e {
            ViewerEvent::Translation(entry) => entry.id.clone(),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[1], ids[2]);

    let replay = h.relay.subscribe("user@example.com");
    let entries: Vec<_> = replay
        .initial
        .iter()
        .filter_map(|e| match e {
            ViewerEvent::Translation(entry) => Some(entry.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_final);
    assert_eq!(entries[0].translated_text, "charlie");
}

#[tokio::test(start_paused = true)]
async fn reverse_direction_logged_not_displayed() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;

    let mut viewer = h.relay.subscribe("user@example.com");

    // The upstream pair also carries the other direction: Chinese output for
    // the conversation partner. It must never reach this user's glasses.
    let event = TranslationEvent {
        session_id: "s1".to_owned(),
        user_id: "user@example.com".to_owned(),
        original_text: "how are you".to_owned(),
        translated_text: "你好吗".to_owned(),
        source_locale: "en-US".to_owned(),
        target_locale: "zh-CN".to_owned(),
        did_translate: true,
        is_final: true,
        received_at: Utc::now(),
    };
    h.source.push("s1", event).await;
    settle().await;

    assert!(h.sink.writes().is_empty());

    let logged = next_event(&mut viewer.events).await;
    match logged {
        ViewerEvent::Translation(entry) => {
            assert_eq!(entry.original_language, "English");
            assert_eq!(entry.translated_language, "Chinese");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn inactivity_clears_but_counter_survives() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;

    let mut viewer = h.relay.subscribe("user@example.com");

    h.source.push("s1", translated("s1", "hello", true)).await;
    settle().await;
    let first = match next_event(&mut viewer.events).await {
        ViewerEvent::Translation(entry) => entry,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(first.id, "entry-1");

    // 40 s of silence.
    tokio::time::sleep(Duration::from_secs(41)).await;

    let cleared = next_event(&mut viewer.events).await;
    assert_eq!(cleared.event_type(), "clear");

    // The glasses got a blank frame.
    let writes = h.sink.writes();
    assert!(writes.last().unwrap().text.is_empty());

    // Log is empty now; the next utterance continues the id sequence.
    let replay = h.relay.subscribe("user@example.com");
    assert_eq!(replay.initial.len(), 1);

    h.source.push("s1", translated("s1", "again", true)).await;
    settle().await;
    let next = match next_event(&mut viewer.events).await {
        ViewerEvent::Translation(entry) => entry,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(next.id, "entry-2");
}

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_rapid_interims() {
    let h = harness();
    // Passthrough heuristic so every interim reaches the debouncer verbatim.
    h.relay
        .open_session(
            "user@example.com",
            "s1",
            None,
            Some(serde_json::json!({"confidenceHeuristic": "none"})),
        )
        .await;
    settle().await;

    let base = Instant::now();
    for (offset_ms, text) in [(0u64, "a"), (100, "ab"), (200, "abc"), (300, "abcd")] {
        tokio::time::sleep_until(base + Duration::from_millis(offset_ms)).await;
        h.source.push("s1", translated("s1", text, false)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep_until(base + Duration::from_millis(500)).await;
    h.source.push("s1", translated("s1", "abcde", false)).await;
    settle().await;

    let writes = h.sink.writes();
    assert_eq!(writes.len(), 3, "writes: {writes:?}");
    assert_eq!(writes[0].text, "a");
    // Coalesced to the latest of the burst, at the window boundary.
    assert_eq!(writes[1].text, "abcd");
    let gap = writes[1].at.duration_since(writes[0].at);
    assert!(gap >= Duration::from_millis(400));
    assert!(gap <= Duration::from_millis(410));
    // A full window after the first immediate send: straight through.
    assert_eq!(writes[2].text, "abcde");
}

#[tokio::test(start_paused = true)]
async fn settings_changes_preserve_the_log() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;

    let mut viewer = h.relay.subscribe("user@example.com");

    h.source.push("s1", translated("s1", "hello", true)).await;
    settle().await;
    let _ = next_event(&mut viewer.events).await;

    // Display-mode flip: nothing broadcast, log intact.
    h.relay
        .update_settings(
            "user@example.com",
            serde_json::json!({"displayMode": "translations"}),
        )
        .await;
    settle().await;

    // Target language flip: languageChange broadcast, log still intact,
    // upstream resubscribed with the new pair.
    h.relay
        .update_settings(
            "user@example.com",
            serde_json::json!({"targetLanguage": "fr-FR"}),
        )
        .await;
    settle().await;

    let change = next_event(&mut viewer.events).await;
    match change {
        ViewerEvent::LanguageChange(pair) => {
            assert_eq!(pair.from, "Spanish");
            assert_eq!(pair.to, "French");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let replay = h.relay.subscribe("user@example.com");
    assert_eq!(replay.initial.len(), 2); // connected + the kept entry

    let subs = h.source.subscriptions();
    assert_eq!(subs.last().unwrap().2, "fr-FR");

    let pair = h.relay.language_pair("user@example.com");
    assert_eq!(pair.from, "Spanish");
    assert_eq!(pair.to, "French");
}

#[tokio::test(start_paused = true)]
async fn superseding_session_keeps_the_log() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;
    h.source.push("s1", translated("s1", "kept", true)).await;
    settle().await;

    h.relay
        .open_session("user@example.com", "s2", None, None)
        .await;
    settle().await;

    assert!(!h.source.has_feed("s1"));
    assert!(h.source.has_feed("s2"));

    let replay = h.relay.subscribe("user@example.com");
    assert_eq!(replay.initial.len(), 2); // connected + the kept entry

    // The new session keeps flowing to the same viewers.
    let mut viewer = h.relay.subscribe("user@example.com");
    h.source.push("s2", translated("s2", "fresh", true)).await;
    settle().await;
    let event = next_event(&mut viewer.events).await;
    assert_eq!(event.event_type(), "translation");
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_wipes_state_but_not_viewers() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;
    h.source.push("s1", translated("s1", "gone", true)).await;
    settle().await;

    let mut viewer = h.relay.subscribe("user@example.com");

    h.relay.close_session("user@example.com").await;
    assert_eq!(h.relay.active_sessions(), 0);
    assert!(!h.source.has_feed("s1"));

    let replay = h.relay.subscribe("user@example.com");
    assert_eq!(replay.initial.len(), 1); // connected only: log wiped

    // The original viewer is still subscribed and sees the next session.
    h.relay
        .open_session("user@example.com", "s3", None, None)
        .await;
    settle().await;
    h.source.push("s3", translated("s3", "back", true)).await;
    settle().await;
    let event = next_event(&mut viewer.events).await;
    assert_eq!(event.event_type(), "translation");
}

#[tokio::test(start_paused = true)]
async fn upstream_disconnect_acts_as_stop() {
    let h = harness();
    h.relay
        .open_session("user@example.com", "s1", None, None)
        .await;
    settle().await;
    h.source.push("s1", translated("s1", "hola", true)).await;
    settle().await;

    h.source.drop_feed("s1");
    settle().await;

    assert_eq!(h.relay.active_sessions(), 0);
    let replay = h.relay.subscribe("user@example.com");
    assert_eq!(replay.initial.len(), 1); // log wiped
}

#[tokio::test(start_paused = true)]
async fn unsupported_device_combination_warns_and_skips_subscribe() {
    let h = harness();
    h.relay
        .open_session(
            "user@example.com",
            "s1",
            Some("Even Realities G1".to_owned()),
            Some(serde_json::json!({"targetLanguage": "ja-JP"})),
        )
        .await;
    settle().await;

    assert!(!h.source.has_feed("s1"));
    let writes = h.sink.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].text.contains("Japanese"));
    assert_eq!(writes[0].duration_ms, Some(10_000));
}

#[tokio::test(start_paused = true)]
async fn passthrough_respects_display_mode() {
    let h = harness();
    h.relay
        .open_session(
            "user@example.com",
            "s1",
            None,
            Some(serde_json::json!({"displayMode": "translations"})),
        )
        .await;
    settle().await;

    // Upstream did not translate (speaker already in the target language).
    let event = TranslationEvent {
        session_id: "s1".to_owned(),
        user_id: "user@example.com".to_owned(),
        original_text: "already english".to_owned(),
        translated_text: "already english".to_owned(),
        source_locale: "en-US".to_owned(),
        target_locale: "en-US".to_owned(),
        did_translate: false,
        is_final: true,
        received_at: Utc::now(),
    };
    h.source.push("s1", event.clone()).await;
    settle().await;

    // translations-only mode: passthrough is suppressed and not logged.
    assert!(h.sink.writes().is_empty());
    let replay = h.relay.subscribe("user@example.com");
    assert_eq!(replay.initial.len(), 1);

    // everything mode: passthrough reaches the glasses.
    h.relay
        .update_settings(
            "user@example.com",
            serde_json::json!({"displayMode": "everything"}),
        )
        .await;
    settle().await;
    h.source.push("s1", event).await;
    settle().await;
    let writes = h.sink.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].text.contains("already english"));
}
