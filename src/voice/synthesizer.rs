//! Cloud speech synthesis played on the local speaker

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::playback::{SynthesisEngine, SynthesisEvent, SynthesisSignal, Utterance};
use super::speaker::{PlaybackOutcome, Speaker, decode_mp3};
use super::tts::{TextToSpeech, VOICE_CATALOG};
use crate::Result;

/// Synthesis engine backed by `OpenAI` TTS and the default output device
pub struct CloudSynthesizer {
    tts: Arc<TextToSpeech>,
    default_voice: String,
    start_delay: Duration,
    sink: mpsc::UnboundedSender<SynthesisSignal>,
    runtime: Handle,
    current: Option<CancellationToken>,
}

impl CloudSynthesizer {
    /// Create a synthesizer reporting into `sink`
    ///
    /// Must be called from within a tokio runtime. `start_delay` is waited
    /// before each utterance is requested.
    #[must_use]
    pub fn new(
        tts: TextToSpeech,
        default_voice: String,
        start_delay: Duration,
        sink: mpsc::UnboundedSender<SynthesisSignal>,
    ) -> Self {
        Self {
            tts: Arc::new(tts),
            default_voice,
            start_delay,
            sink,
            runtime: Handle::current(),
            current: None,
        }
    }
}

impl SynthesisEngine for CloudSynthesizer {
    fn voices(&self) -> Vec<String> {
        VOICE_CATALOG.iter().map(ToString::to_string).collect()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<()> {
        self.cancel();

        let token = CancellationToken::new();
        self.current = Some(token.clone());

        let job = Job {
            tts: Arc::clone(&self.tts),
            voice: utterance
                .voice
                .clone()
                .unwrap_or_else(|| self.default_voice.clone()),
            start_delay: self.start_delay,
            sink: self.sink.clone(),
            token,
        };
        self.runtime.spawn(job.run(utterance));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }
}

impl Drop for CloudSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Job {
    tts: Arc<TextToSpeech>,
    voice: String,
    start_delay: Duration,
    sink: mpsc::UnboundedSender<SynthesisSignal>,
    token: CancellationToken,
}

impl Job {
    async fn run(self, utterance: Utterance) {
        let generation = utterance.generation;

        let audio = tokio::select! {
            () = self.token.cancelled() => return,
            audio = async {
                tokio::time::sleep(self.start_delay).await;
                self.tts.synthesize(&utterance.text, &self.voice, utterance.rate).await
            } => audio,
        };

        let samples = match audio.and_then(|mp3| decode_mp3(&mp3)) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(generation, error = %e, "speech synthesis failed");
                self.emit(generation, SynthesisEvent::Failed(e.to_string()));
                return;
            }
        };

        if self.token.is_cancelled() {
            return;
        }
        self.emit(generation, SynthesisEvent::Started);

        let token = self.token.clone();
        let volume = utterance.volume;
        let played = tokio::task::spawn_blocking(move || -> Result<PlaybackOutcome> {
            Speaker::open()?.play_blocking(samples, volume, &token)
        })
        .await;

        match played {
            Ok(Ok(PlaybackOutcome::Completed)) => self.emit(generation, SynthesisEvent::Ended),
            Ok(Ok(PlaybackOutcome::Cancelled)) => {
                tracing::debug!(generation, "utterance interrupted");
            }
            Ok(Err(e)) => self.emit(generation, SynthesisEvent::Failed(e.to_string())),
            Err(e) => self.emit(generation, SynthesisEvent::Failed(e.to_string())),
        }
    }

    fn emit(&self, generation: u64, event: SynthesisEvent) {
        if self.sink.send(SynthesisSignal::new(generation, event)).is_err() {
            tracing::trace!(generation, "synthesis sink closed");
        }
    }
}
