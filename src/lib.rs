//! JARVIS Voice - voice interaction controller for a conversational assistant
//!
//! This library provides the core of the assistant front-end:
//! - Continuous speech capture with automatic restart and barge-in
//! - Single-utterance speech playback with cancellation
//! - Command dispatch to the remote command-processing backend
//! - Session store for conversation history and the task cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Presentation                         │
//! │   Console  │  Chat  │  Task list  │  Settings        │
//! └──────────────┬───────────────────────▲──────────────┘
//!        commands│                       │snapshots, notices
//! ┌──────────────▼───────────────────────┴──────────────┐
//! │              Voice Interaction Controller            │
//! │  Capture adapter │ Playback adapter │ Session store  │
//! └──────┬──────────────────┬──────────────────┬────────┘
//!        │                  │                  │
//!   Microphone +       OpenAI TTS +      Command backend
//!     Whisper            speaker          (HTTP/JSON)
//! ```

pub mod config;
pub mod controller;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod session;
pub mod settings;
pub mod voice;

pub use config::Config;
pub use controller::{ControllerBuilder, ControllerHandle, Notice, VoiceController};
pub use credentials::CredentialStore;
pub use dispatch::{CommandDispatcher, CommandReply, HttpDispatcher, TaskDirective};
pub use error::{Error, Result};
pub use model::{Message, Role, Task, TaskId, TranscriptEvent, UserProfile, VoiceSettings};
pub use session::{ControllerState, Snapshot, VoiceInput};
pub use settings::{SettingsBus, SettingsChange};
