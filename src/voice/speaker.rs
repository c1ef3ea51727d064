//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Sample rate for playback (matches TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How often a playing stream checks for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a playback run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Cancelled,
}

/// The default output device
pub struct Speaker {
    device: Device,
    config: StreamConfig,
}

impl Speaker {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config is available
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Play mono samples at `volume`, blocking until done or cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built
    pub fn play_blocking(
        &self,
        samples: Vec<f32>,
        volume: f32,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome> {
        if samples.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }

        let channels = usize::from(self.config.channels);
        let gain = volume.clamp(0.0, 1.0);
        let total = samples.len();

        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).map_or(0.0, |s| s * gain);
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                        if pos >= samples.len() {
                            finished.store(true, Ordering::Release);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (total as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        let outcome = loop {
            if cancel.is_cancelled() {
                break PlaybackOutcome::Cancelled;
            }
            if finished.load(Ordering::Acquire) || Instant::now() > deadline {
                // Let the device drain its last buffer
                std::thread::sleep(Duration::from_millis(100));
                break PlaybackOutcome::Completed;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        drop(stream);
        tracing::debug!(samples = total, ?outcome, "playback finished");
        Ok(outcome)
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error on malformed MP3 data
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) if frame.channels == 2 => {
                samples.extend(frame.data.chunks(2).map(|chunk| {
                    let left = f32::from(chunk[0]) / 32768.0;
                    let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                    f32::midpoint(left, right)
                }));
            }
            Ok(frame) => {
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

/// A sine tone, for speaker checks
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn tone(frequency: f32, duration: Duration, amplitude: f32) -> Vec<f32> {
    let count = (f64::from(PLAYBACK_SAMPLE_RATE) * duration.as_secs_f64()) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}
