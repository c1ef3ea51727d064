//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use jarvis_voice::voice::{
    PLAYBACK_SAMPLE_RATE, SAMPLE_RATE, SegmentEvent, SegmenterState, UtteranceSegmenter,
    samples_to_wav, select_voice, tone,
};

/// Generate sine wave audio samples
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

#[test]
fn test_segmenter_starts_idle() {
    let mut segmenter = UtteranceSegmenter::new();
    assert_eq!(segmenter.state(), SegmenterState::Idle);
    assert!(segmenter.speech_buffer().is_empty());

    assert_eq!(segmenter.process(&generate_silence(0.1)), SegmentEvent::Quiet);
    assert_eq!(segmenter.process(&[]), SegmentEvent::Quiet);
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_utterance_completes_after_silence() {
    let mut segmenter = UtteranceSegmenter::new();

    // Long enough to count as speech straight away
    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    assert_eq!(segmenter.process(&speech), SegmentEvent::Confirmed);
    assert_eq!(segmenter.state(), SegmenterState::Speech);

    let silence = generate_silence(0.6);
    let SegmentEvent::Complete(samples) = segmenter.process(&silence) else {
        panic!("expected a complete utterance");
    };

    // Trailing silence stays in the utterance
    assert_eq!(samples.len(), speech.len() + silence.len());
    assert_eq!(segmenter.state(), SegmenterState::Idle);
    assert!(segmenter.speech_buffer().is_empty());
}

#[test]
fn test_streamed_chunks() {
    let mut segmenter = UtteranceSegmenter::new();
    let chunk = 1600;

    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    let events: Vec<SegmentEvent> = speech.chunks(chunk).map(|c| segmenter.process(c)).collect();
    assert_eq!(
        events,
        vec![
            SegmentEvent::Began,
            SegmentEvent::Continuing,
            SegmentEvent::Confirmed,
            SegmentEvent::Continuing,
            SegmentEvent::Continuing,
        ]
    );
    assert_eq!(segmenter.speech_buffer().len(), speech.len());

    let silence = generate_silence(1.0);
    let mut completed = None;
    for (i, c) in silence.chunks(chunk).enumerate() {
        if let SegmentEvent::Complete(samples) = segmenter.process(c) {
            completed = Some((i, samples));
            break;
        }
    }

    // 0.5 s of silence ends it: the sixth 100 ms chunk crosses the threshold
    let (index, samples) = completed.expect("utterance never completed");
    assert_eq!(index, 5);
    assert_eq!(samples.len(), speech.len() + 6 * chunk);
}

#[test]
fn test_pause_inside_utterance_keeps_it_open() {
    let mut segmenter = UtteranceSegmenter::new();

    segmenter.process(&generate_sine_samples(440.0, 0.3, 0.3));
    assert_eq!(
        segmenter.process(&generate_silence(0.3)),
        SegmentEvent::Continuing
    );
    assert_eq!(
        segmenter.process(&generate_sine_samples(440.0, 0.3, 0.3)),
        SegmentEvent::Continuing
    );
    assert!(matches!(
        segmenter.process(&generate_silence(0.6)),
        SegmentEvent::Complete(_)
    ));
}

#[test]
fn test_short_noise_is_discarded() {
    let mut segmenter = UtteranceSegmenter::new();

    assert_eq!(
        segmenter.process(&generate_sine_samples(440.0, 0.1, 0.3)),
        SegmentEvent::Began
    );
    assert_eq!(
        segmenter.process(&generate_silence(0.6)),
        SegmentEvent::Discarded
    );
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_click_is_never_confirmed() {
    let mut segmenter = UtteranceSegmenter::new();
    let mut audio = vec![0.1; 1600];
    audio.extend(generate_silence(1.0));

    let events: Vec<SegmentEvent> = audio.chunks(1600).map(|c| segmenter.process(c)).collect();
    assert_eq!(events[0], SegmentEvent::Began);
    assert!(!events.contains(&SegmentEvent::Confirmed));
    assert!(events.contains(&SegmentEvent::Discarded));
}

#[test]
fn test_long_utterance_is_cut() {
    let mut segmenter = UtteranceSegmenter::new();
    let second = generate_sine_samples(440.0, 1.0, 0.3);

    for i in 0..29 {
        let event = segmenter.process(&second);
        assert!(
            matches!(
                event,
                SegmentEvent::Began | SegmentEvent::Confirmed | SegmentEvent::Continuing
            ),
            "chunk {i}: {event:?}"
        );
    }

    let SegmentEvent::Complete(samples) = segmenter.process(&second) else {
        panic!("expected the utterance to be cut at 30 seconds");
    };
    assert_eq!(samples.len(), SAMPLE_RATE as usize * 30);
}

#[test]
fn test_segmenter_reset() {
    let mut segmenter = UtteranceSegmenter::new();
    segmenter.process(&generate_sine_samples(440.0, 0.2, 0.3));
    assert!(!segmenter.speech_buffer().is_empty());

    segmenter.reset();
    assert_eq!(segmenter.state(), SegmenterState::Idle);
    assert!(segmenter.speech_buffer().is_empty());
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // WAV header is 44 bytes, then 16-bit samples
    assert_eq!(wav_data.len(), 44 + samples.len() * 2);
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[0], 0);
    assert!(read_samples[3] > 32000);
    assert!(read_samples[4] < -32000);
}

#[test]
fn test_voice_selection_prefers_listed_order() {
    let catalog: Vec<String> = ["Microsoft Zira", "Google UK English Male", "Alex"]
        .iter()
        .map(ToString::to_string)
        .collect();

    let preferred = vec!["daniel".to_string(), "uk english male".to_string()];
    assert_eq!(
        select_voice(&catalog, &preferred).as_deref(),
        Some("Google UK English Male")
    );

    let preferred = vec!["ALEX".to_string(), "zira".to_string()];
    assert_eq!(select_voice(&catalog, &preferred).as_deref(), Some("Alex"));

    assert_eq!(select_voice(&catalog, &["daniel".to_string()]), None);
    assert_eq!(select_voice(&[], &preferred), None);
}

#[test]
fn test_tone_for_speaker_check() {
    let samples = tone(440.0, Duration::from_secs(2), 0.3);
    assert_eq!(samples.len(), PLAYBACK_SAMPLE_RATE as usize * 2);
    assert!(samples.iter().all(|s| s.abs() <= 0.3 + f32::EPSILON));
}
