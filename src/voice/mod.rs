//! Voice capture and playback
//!
//! The controller only sees the two adapters ([`CaptureAdapter`],
//! [`PlaybackAdapter`]) and the engine traits behind them. The native
//! engines record from the default microphone, transcribe with Whisper and
//! speak through `OpenAI` TTS on the default output device.

mod capture;
mod microphone;
mod playback;
mod recognizer;
mod segmenter;
mod speaker;
mod stt;
mod synthesizer;
mod tts;

pub use capture::{
    CaptureAdapter, CaptureUpdate, RecognitionEngine, RecognitionError, RecognitionEvent,
    RecognitionSignal,
};
pub use microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
pub use playback::{
    PlaybackAdapter, PlaybackUpdate, SynthesisEngine, SynthesisEvent, SynthesisSignal, Utterance,
    select_voice,
};
pub use recognizer::{LISTENING_MARKER, MicrophoneRecognizer};
pub use segmenter::{SegmentEvent, SegmenterState, UtteranceSegmenter};
pub use speaker::{PLAYBACK_SAMPLE_RATE, PlaybackOutcome, Speaker, decode_mp3, tone};
pub use stt::SpeechToText;
pub use synthesizer::CloudSynthesizer;
pub use tts::{TextToSpeech, VOICE_CATALOG};
