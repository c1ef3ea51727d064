//! Continuous recognizer on the local microphone
//!
//! Each capture session runs on its own thread, since cpal streams cannot
//! cross threads. The thread segments the microphone stream into utterances,
//! transcribes each with Whisper and reports through the recognition sink.
//! After `idle_timeout` without speech the stream ends itself, which the
//! capture adapter answers with a restart while listening is wanted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::capture::{RecognitionEngine, RecognitionError, RecognitionEvent, RecognitionSignal};
use super::microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
use super::segmenter::{SegmentEvent, UtteranceSegmenter};
use super::stt::SpeechToText;
use crate::model::TranscriptEvent;
use crate::{Error, Result};

/// Interim text shown while an utterance is being captured
pub const LISTENING_MARKER: &str = "…";

/// Cadence at which captured audio is drained from the microphone
const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// Longest wait for the capture thread to open the input device
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

struct ActiveSession {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Recognition engine backed by the default microphone and Whisper
pub struct MicrophoneRecognizer {
    stt: Arc<SpeechToText>,
    sink: mpsc::UnboundedSender<RecognitionSignal>,
    runtime: Handle,
    idle_timeout: Duration,
    active: Option<ActiveSession>,
}

impl MicrophoneRecognizer {
    /// Create a recognizer reporting into `sink`
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        stt: SpeechToText,
        sink: mpsc::UnboundedSender<RecognitionSignal>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            stt: Arc::new(stt),
            sink,
            runtime: Handle::current(),
            idle_timeout,
            active: None,
        }
    }
}

impl RecognitionEngine for MicrophoneRecognizer {
    fn start(&mut self, session: u64) -> Result<()> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let worker = Worker {
            session,
            stt: Arc::clone(&self.stt),
            sink: self.sink.clone(),
            runtime: self.runtime.clone(),
            idle_timeout: self.idle_timeout,
            stop: Arc::clone(&stop),
        };

        let thread = std::thread::Builder::new()
            .name(format!("jarvis-capture-{session}"))
            .spawn(move || match Microphone::open() {
                // Nobody is waiting any more once startup has timed out
                Ok(microphone) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        worker.run(&microphone);
                    }
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match await_open(&ready_rx, STARTUP_TIMEOUT) {
            Ok(()) => {
                self.active = Some(ActiveSession { stop, thread });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session, error = %e, "capture did not start");
                stop.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::Release);
            // The worker reports End itself; joining would block on a transcription
            drop(active.thread);
        }
    }
}

impl Drop for MicrophoneRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    session: u64,
    stt: Arc<SpeechToText>,
    sink: mpsc::UnboundedSender<RecognitionSignal>,
    runtime: Handle,
    idle_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self, microphone: &Microphone) {
        tracing::debug!(session = self.session, "recognizer session started");

        let mut segmenter = UtteranceSegmenter::new();
        let mut last_speech = Instant::now();

        while !self.stopped() {
            std::thread::sleep(CHUNK_INTERVAL);

            let event = segmenter.process(&microphone.take_buffer());
            if let Some(interim) = interim_for(&event) {
                self.emit(RecognitionEvent::Transcript(interim));
            }

            match event {
                SegmentEvent::Quiet => {
                    if last_speech.elapsed() >= self.idle_timeout {
                        tracing::debug!(session = self.session, "no speech, ending stream");
                        break;
                    }
                }
                SegmentEvent::Began | SegmentEvent::Confirmed | SegmentEvent::Continuing => {
                    last_speech = Instant::now();
                }
                SegmentEvent::Discarded => {}
                SegmentEvent::Complete(samples) => {
                    last_speech = Instant::now();
                    if let Some(event) = self.transcribe(&samples) {
                        self.emit(event);
                    }
                    // Audio heard while transcribing belongs to no utterance
                    let _ = microphone.take_buffer();
                }
            }
        }

        self.emit(RecognitionEvent::End);
        tracing::debug!(session = self.session, "recognizer session ended");
    }

    fn transcribe(&self, samples: &[f32]) -> Option<RecognitionEvent> {
        let wav = match samples_to_wav(samples, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => return Some(RecognitionEvent::Error(RecognitionError::Audio(e.to_string()))),
        };

        let result = self.runtime.block_on(self.stt.transcribe(&wav));
        if self.stopped() {
            return None;
        }

        Some(match result {
            Ok(text) => RecognitionEvent::Transcript(TranscriptEvent::final_text(text)),
            Err(e) => RecognitionEvent::Error(e),
        })
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn emit(&self, event: RecognitionEvent) {
        if self
            .sink
            .send(RecognitionSignal::new(self.session, event))
            .is_err()
        {
            tracing::trace!(session = self.session, "recognition sink closed");
        }
    }
}

/// Wait for the capture thread to report whether the input device opened
fn await_open(ready: &Receiver<Result<()>>, timeout: Duration) -> Result<()> {
    match ready.recv_timeout(timeout) {
        Ok(opened) => opened,
        Err(RecvTimeoutError::Timeout) => Err(Error::Audio(format!(
            "input device did not open within {timeout:?}"
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(Error::Audio(
            "capture thread exited during startup".to_string(),
        )),
    }
}

/// Interim transcript to report for a segmenter event
///
/// Only an utterance long enough to be speech shows the listening marker, so
/// a click or a burst of speaker echo never reaches barge-in.
fn interim_for(event: &SegmentEvent) -> Option<TranscriptEvent> {
    match event {
        SegmentEvent::Confirmed => Some(TranscriptEvent::interim(LISTENING_MARKER)),
        _ => None,
    }
}
