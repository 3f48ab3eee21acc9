//! Lingolens: real-time translation relay and caption engine for smart glasses.
//!
//! The engine sits between an upstream cloud translation stream and two
//! display surfaces with very different needs:
//!
//! - **Glasses**: a small peripheral text wall that must stay visually calm.
//!   Interim translations pass through the confidence stabilizer (a
//!   non-shrinking confident prefix), the caption formatter (fixed
//!   rectangle, bounded history) and a debouncer before reaching the device.
//! - **Viewers**: browsers following the conversation over SSE, fed from a
//!   per-user fan-out hub with replay-on-join and a bounded conversation log.
//!
//! # Architecture
//!
//! Each user gets one worker task owning all of their state, driven by an
//! inbox plus the upstream feed; the process-wide [`Relay`] registry maps
//! users to workers and to the per-user hub that outlives sessions.

pub mod caption;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod hub;
pub mod locale;
pub mod registry;
pub mod server;
pub mod settings;
pub mod stabilizer;
pub mod transcript;
pub mod upstream;

mod session;

pub use config::{RelayConfig, RelayTuning};
pub use error::{RelayError, Result};
pub use events::{ConversationEntry, LanguagePair, TranslationEvent, ViewerEvent};
pub use registry::Relay;
pub use settings::{ConfidenceHeuristic, DisplayMode, LineWidth, UserSettings};
pub use upstream::{GlassesSink, TranslationFeed, TranslationSource, UpstreamClient};
