//! Capture stream adapter
//!
//! Wraps a continuous speech-recognition engine. The engine reports through
//! [`RecognitionSignal`]s tagged with the capture session that produced them;
//! the adapter decides which signals still matter and restarts the engine on
//! natural end-of-stream while listening is wanted.

use crate::model::TranscriptEvent;
use crate::session::VoiceInput;
use crate::{Error, Result};

/// A continuous speech-recognition engine
///
/// `start` must not block; results arrive later as [`RecognitionSignal`]s
/// carrying the given `session` number.
pub trait RecognitionEngine: Send {
    /// Begin a capture session
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] when microphone access is refused,
    /// [`Error::Unsupported`] when no engine or input device exists
    fn start(&mut self, session: u64) -> Result<()>;

    /// Stop the current capture session; idempotent
    fn stop(&mut self);
}

/// Engine-side failure reported mid-stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Access to the microphone was refused
    NotAllowed,
    /// The stream was stopped on request
    Aborted,
    NoSpeech,
    Network,
    Audio(String),
    Other(String),
}

impl std::fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAllowed => write!(f, "not-allowed"),
            Self::Aborted => write!(f, "aborted"),
            Self::NoSpeech => write!(f, "no-speech"),
            Self::Network => write!(f, "network"),
            Self::Audio(msg) => write!(f, "audio: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// What a recognition engine observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Transcript(TranscriptEvent),
    /// The stream ended, on request or by itself
    End,
    Error(RecognitionError),
}

/// Signal from a recognition engine, tagged with its capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSignal {
    pub session: u64,
    pub event: RecognitionEvent,
}

impl RecognitionSignal {
    #[must_use]
    pub const fn new(session: u64, event: RecognitionEvent) -> Self {
        Self { session, event }
    }
}

/// Result of feeding a signal to the adapter
#[derive(Debug)]
pub enum CaptureUpdate {
    /// Signal belongs to an old session or carries nothing actionable
    Ignored,
    Transcript(TranscriptEvent),
    /// Stream ended and was started again
    Restarted,
    /// Stream ended and stays stopped
    Stopped,
    /// Capture failed and was stopped; listening must be cleared
    Failed(Error),
}

/// Keeps a recognition engine running while listening is wanted
pub struct CaptureAdapter {
    engine: Option<Box<dyn RecognitionEngine>>,
    should_listen: bool,
    running: bool,
    session: u64,
    availability: VoiceInput,
}

impl CaptureAdapter {
    /// Wrap an engine; `None` means the platform has no recognizer
    #[must_use]
    pub fn new(engine: Option<Box<dyn RecognitionEngine>>) -> Self {
        let availability = if engine.is_some() {
            VoiceInput::Available
        } else {
            VoiceInput::Unsupported
        };

        Self {
            engine,
            should_listen: false,
            running: false,
            session: 0,
            availability,
        }
    }

    /// Whether listening has been requested and not withdrawn
    #[must_use]
    pub const fn should_listen(&self) -> bool {
        self.should_listen
    }

    /// Whether an engine session is currently running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub const fn availability(&self) -> VoiceInput {
        self.availability
    }

    /// Current capture session number
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Request continuous capture; a no-op while already running
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] or [`Error::Unsupported`] when voice input
    /// is unavailable, or the engine's start failure
    pub fn start(&mut self) -> Result<()> {
        match self.availability {
            VoiceInput::PermissionDenied => return Err(Error::PermissionDenied),
            VoiceInput::Unsupported => return Err(Error::Unsupported),
            VoiceInput::Available => {}
        }

        self.should_listen = true;
        if self.running {
            return Ok(());
        }
        self.begin()
    }

    /// Withdraw the listening request and stop the engine; idempotent
    pub fn stop(&mut self) {
        self.should_listen = false;
        if self.running {
            self.running = false;
            if let Some(engine) = self.engine.as_mut() {
                engine.stop();
            }
            tracing::debug!(session = self.session, "capture stopped");
        }
    }

    /// Interpret a signal from the engine
    pub fn handle(&mut self, signal: RecognitionSignal) -> CaptureUpdate {
        if signal.session != self.session {
            tracing::trace!(
                session = signal.session,
                current = self.session,
                "stale recognition signal"
            );
            return CaptureUpdate::Ignored;
        }

        match signal.event {
            RecognitionEvent::Transcript(event) if self.running => CaptureUpdate::Transcript(event),
            RecognitionEvent::Transcript(_) => CaptureUpdate::Ignored,
            RecognitionEvent::End => self.on_end(),
            RecognitionEvent::Error(RecognitionError::Aborted) => CaptureUpdate::Ignored,
            RecognitionEvent::Error(RecognitionError::NotAllowed) => {
                self.fail(VoiceInput::PermissionDenied);
                CaptureUpdate::Failed(Error::PermissionDenied)
            }
            RecognitionEvent::Error(err) => {
                tracing::warn!(session = self.session, error = %err, "recognition error");
                self.stop();
                CaptureUpdate::Failed(Error::RecognitionTransient(err.to_string()))
            }
        }
    }

    fn on_end(&mut self) -> CaptureUpdate {
        self.running = false;

        // Consulted now, not when a stop was requested
        if !self.should_listen {
            tracing::debug!(session = self.session, "capture ended");
            return CaptureUpdate::Stopped;
        }

        tracing::debug!(session = self.session, "capture ended by engine, restarting");
        match self.begin() {
            Ok(()) => CaptureUpdate::Restarted,
            Err(e) => CaptureUpdate::Failed(e),
        }
    }

    fn begin(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            self.availability = VoiceInput::Unsupported;
            self.should_listen = false;
            return Err(Error::Unsupported);
        };

        self.session += 1;
        match engine.start(self.session) {
            Ok(()) => {
                self.running = true;
                tracing::debug!(session = self.session, "capture started");
                Ok(())
            }
            Err(Error::PermissionDenied) => {
                self.fail(VoiceInput::PermissionDenied);
                Err(Error::PermissionDenied)
            }
            Err(Error::Unsupported) => {
                self.fail(VoiceInput::Unsupported);
                Err(Error::Unsupported)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start capture");
                self.should_listen = false;
                Err(e)
            }
        }
    }

    fn fail(&mut self, availability: VoiceInput) {
        tracing::warn!(?availability, "voice input disabled");
        self.availability = availability;
        self.should_listen = false;
        self.running = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
    }
}
