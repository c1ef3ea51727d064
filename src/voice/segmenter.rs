//! Energy-based utterance segmentation
//!
//! Splits a continuous microphone stream into utterances: speech starts when
//! chunk energy crosses a threshold and ends after a stretch of silence.
//! An utterance only counts as speech once it holds `MIN_SPEECH_SAMPLES` of
//! loud audio; clicks and coughs never get that far.

use super::microphone::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech in an utterance (0.3 seconds at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.5 seconds)
const SILENCE_SAMPLES: usize = 8000;

/// Longest utterance before it is cut (30 seconds)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speech,
}

/// What a chunk of audio did to the current utterance
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Nothing happening
    Quiet,
    /// Loud audio started; not yet long enough to be speech
    Began,
    /// The utterance just reached the minimum speech length
    Confirmed,
    /// Utterance still being captured
    Continuing,
    /// Utterance finished; carries its samples
    Complete(Vec<f32>),
    /// Utterance was too short to be speech and was dropped
    Discarded,
}

/// Cuts a sample stream into utterances
#[derive(Debug)]
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
    confirmed: bool,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            speech_samples: 0,
            silence_counter: 0,
            confirmed: false,
        }
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> SegmentEvent {
        if samples.is_empty() {
            return match self.state {
                SegmenterState::Idle => SegmentEvent::Quiet,
                SegmenterState::Speech => SegmentEvent::Continuing,
            };
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if !is_speech {
                    return SegmentEvent::Quiet;
                }
                self.state = SegmenterState::Speech;
                self.speech_buffer.clear();
                self.speech_buffer.extend_from_slice(samples);
                self.speech_samples = samples.len();
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected");
                if self.confirm() {
                    SegmentEvent::Confirmed
                } else {
                    SegmentEvent::Began
                }
            }
            SegmenterState::Speech => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES {
                    if self.speech_samples < MIN_SPEECH_SAMPLES {
                        tracing::trace!(speech = self.speech_samples, "too short, discarding");
                        self.reset();
                        return SegmentEvent::Discarded;
                    }
                    return self.complete();
                }

                if self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES {
                    tracing::debug!("utterance hit maximum length");
                    return self.complete();
                }

                if self.confirm() {
                    SegmentEvent::Confirmed
                } else {
                    SegmentEvent::Continuing
                }
            }
        }
    }

    /// Return to idle, dropping any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
        self.confirmed = false;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Mark the utterance as speech the first time it is long enough
    fn confirm(&mut self) -> bool {
        if self.confirmed || self.speech_samples < MIN_SPEECH_SAMPLES {
            return false;
        }
        self.confirmed = true;
        true
    }

    fn complete(&mut self) -> SegmentEvent {
        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
        let samples = std::mem::take(&mut self.speech_buffer);
        self.reset();
        SegmentEvent::Complete(samples)
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
