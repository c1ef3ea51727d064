//! Playback adapter
//!
//! Wraps a speech-synthesis engine so that at most one utterance is in
//! flight. Every utterance carries a generation number; completion signals
//! for anything but the current utterance are dropped.

use crate::model::VoiceSettings;
use crate::{Error, Result};

/// A speech-synthesis engine
///
/// `speak` must not block; progress is reported later as
/// [`SynthesisSignal`]s carrying the utterance generation.
pub trait SynthesisEngine: Send {
    /// Names of the voices the engine offers; may be empty while loading
    fn voices(&self) -> Vec<String>;

    /// Begin speaking an utterance
    ///
    /// # Errors
    ///
    /// Returns error if the utterance cannot be scheduled
    fn speak(&mut self, utterance: Utterance) -> Result<()>;

    /// Stop whatever is playing; safe when idle
    fn cancel(&mut self);
}

/// One request to the synthesis engine
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub generation: u64,
    pub text: String,
    /// Speaking rate multiplier
    pub rate: f32,
    /// Output gain in `0.0..=1.0`
    pub volume: f32,
    /// Catalog voice, `None` for the engine default
    pub voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started,
    Ended,
    Failed(String),
}

/// Signal from a synthesis engine, tagged with the utterance generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSignal {
    pub generation: u64,
    pub event: SynthesisEvent,
}

impl SynthesisSignal {
    #[must_use]
    pub const fn new(generation: u64, event: SynthesisEvent) -> Self {
        Self { generation, event }
    }
}

/// Effect of a synthesis signal on the speaking flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackUpdate {
    /// Superseded or cancelled utterance
    Ignored,
    Started,
    Finished,
    Failed(String),
}

/// Serializes utterances onto a synthesis engine
pub struct PlaybackAdapter {
    engine: Option<Box<dyn SynthesisEngine>>,
    preferred_voices: Vec<String>,
    generation: u64,
    in_flight: Option<u64>,
    speaking: bool,
}

impl PlaybackAdapter {
    /// Wrap an engine; `None` means the platform cannot synthesize speech
    #[must_use]
    pub fn new(engine: Option<Box<dyn SynthesisEngine>>, preferred_voices: Vec<String>) -> Self {
        Self {
            engine,
            preferred_voices,
            generation: 0,
            in_flight: None,
            speaking: false,
        }
    }

    /// Whether an utterance has been handed to the engine and not finished
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the engine reported the current utterance as audible
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Speak `text`, replacing any utterance in flight
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] without an engine, or the engine's failure
    pub fn speak(&mut self, text: &str, settings: VoiceSettings) -> Result<u64> {
        self.cancel();

        let Some(engine) = self.engine.as_mut() else {
            return Err(Error::Unsupported);
        };

        let settings = settings.clamped();
        self.generation += 1;
        let voice = select_voice(&engine.voices(), &self.preferred_voices);
        let utterance = Utterance {
            generation: self.generation,
            text: text.to_string(),
            rate: settings.rate,
            volume: settings.volume,
            voice,
        };

        tracing::debug!(
            generation = utterance.generation,
            voice = ?utterance.voice,
            rate = utterance.rate,
            "speaking"
        );
        engine.speak(utterance)?;
        self.in_flight = Some(self.generation);
        Ok(self.generation)
    }

    /// Stop the utterance in flight; safe when idle
    pub fn cancel(&mut self) {
        if let Some(generation) = self.in_flight.take() {
            if let Some(engine) = self.engine.as_mut() {
                engine.cancel();
            }
            tracing::debug!(generation, "playback cancelled");
        }
        self.speaking = false;
    }

    /// Interpret a signal from the engine
    pub fn handle(&mut self, signal: &SynthesisSignal) -> PlaybackUpdate {
        if self.in_flight != Some(signal.generation) {
            tracing::trace!(
                generation = signal.generation,
                current = self.generation,
                "stale synthesis signal"
            );
            return PlaybackUpdate::Ignored;
        }

        match &signal.event {
            SynthesisEvent::Started => {
                self.speaking = true;
                PlaybackUpdate::Started
            }
            SynthesisEvent::Ended => {
                self.finish();
                PlaybackUpdate::Finished
            }
            SynthesisEvent::Failed(reason) => {
                tracing::warn!(generation = signal.generation, reason = %reason, "playback failed");
                self.finish();
                PlaybackUpdate::Failed(reason.clone())
            }
        }
    }

    fn finish(&mut self) {
        self.in_flight = None;
        self.speaking = false;
    }
}

/// First preferred name found in the catalog, compared case-insensitively
#[must_use]
pub fn select_voice(catalog: &[String], preferred: &[String]) -> Option<String> {
    preferred.iter().find_map(|wanted| {
        let wanted = wanted.to_lowercase();
        catalog
            .iter()
            .find(|voice| voice.to_lowercase().contains(&wanted))
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Call {
        Speak(u64, Option<String>),
        Cancel,
    }

    struct RecordingEngine {
        voices: Vec<String>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl SynthesisEngine for RecordingEngine {
        fn voices(&self) -> Vec<String> {
            self.voices.clone()
        }

        fn speak(&mut self, utterance: Utterance) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Speak(utterance.generation, utterance.voice));
            Ok(())
        }

        fn cancel(&mut self) {
            self.calls.lock().unwrap().push(Call::Cancel);
        }
    }

    fn adapter(voices: &[&str]) -> (PlaybackAdapter, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = RecordingEngine {
            voices: voices.iter().map(ToString::to_string).collect(),
            calls: Arc::clone(&calls),
        };
        let preferred = vec!["fable".to_string(), "onyx".to_string()];
        (PlaybackAdapter::new(Some(Box::new(engine)), preferred), calls)
    }

    #[test]
    fn test_speak_cancels_previous() {
        let (mut playback, calls) = adapter(&[]);
        let first = playback.speak("one", VoiceSettings::default()).unwrap();
        let second = playback.speak("two", VoiceSettings::default()).unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Speak(first, None), Call::Cancel, Call::Speak(second, None)]
        );
    }

    #[test]
    fn test_stale_end_does_not_clear_newer() {
        let (mut playback, _calls) = adapter(&[]);
        let first = playback.speak("one", VoiceSettings::default()).unwrap();
        let second = playback.speak("two", VoiceSettings::default()).unwrap();

        let update = playback.handle(&SynthesisSignal::new(second, SynthesisEvent::Started));
        assert_eq!(update, PlaybackUpdate::Started);

        let update = playback.handle(&SynthesisSignal::new(first, SynthesisEvent::Ended));
        assert_eq!(update, PlaybackUpdate::Ignored);
        assert!(playback.is_speaking());

        playback.handle(&SynthesisSignal::new(second, SynthesisEvent::Ended));
        assert!(!playback.is_speaking());
        assert!(!playback.is_active());
    }

    #[test]
    fn test_cancel_when_idle_is_silent() {
        let (mut playback, calls) = adapter(&[]);
        playback.cancel();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_after_cancel_ignored() {
        let (mut playback, _calls) = adapter(&[]);
        let generation = playback.speak("one", VoiceSettings::default()).unwrap();
        playback.cancel();

        let update = playback.handle(&SynthesisSignal::new(generation, SynthesisEvent::Started));
        assert_eq!(update, PlaybackUpdate::Ignored);
        assert!(!playback.is_speaking());
    }

    #[test]
    fn test_preferred_voice_selected() {
        let (mut playback, calls) = adapter(&["alloy", "Onyx", "Fable (British)"]);
        playback.speak("hello", VoiceSettings::default()).unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Speak(1, Some("Fable (British)".to_string()))]
        );
    }

    #[test]
    fn test_select_voice_falls_back_to_default() {
        let preferred = vec!["fable".to_string()];
        assert_eq!(select_voice(&[], &preferred), None);
        assert_eq!(select_voice(&["nova".to_string()], &preferred), None);
        let catalog = vec!["onyx".to_string(), "nova".to_string()];
        let preferred = vec!["nova".to_string(), "onyx".to_string()];
        assert_eq!(select_voice(&catalog, &preferred), Some("nova".to_string()));
    }

    #[test]
    fn test_no_engine_is_unsupported() {
        let mut playback = PlaybackAdapter::new(None, Vec::new());
        assert!(matches!(
            playback.speak("hello", VoiceSettings::default()),
            Err(Error::Unsupported)
        ));
        assert!(!playback.is_active());
    }
}
