//! Boundary with whatever decoded the audio.

use thiserror::Error;

/// Decoded PCM audio, one `f32` slice per channel.
pub trait DecodedAudio {
    fn sample_rate(&self) -> u32;

    fn duration_seconds(&self) -> f64;

    fn channel_count(&self) -> usize;

    fn channel(&self, index: usize) -> Option<&[f32]>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Audio source has no channels")]
    NoChannels,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Audio source contains no samples")]
    Empty,
}

/// Private copy of the first channel, taken once per source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl SourceSnapshot {
    pub fn capture(source: &dyn DecodedAudio) -> Result<Self, SourceError> {
        let sample_rate = source.sample_rate();
        if sample_rate == 0 {
            return Err(SourceError::InvalidSampleRate(sample_rate));
        }
        let channel = source.channel(0).ok_or(SourceError::NoChannels)?;
        if channel.is_empty() {
            return Err(SourceError::Empty);
        }

        let duration = source.duration_seconds();
        let duration_seconds = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            channel.len() as f64 / sample_rate as f64
        };

        Ok(Self {
            samples: channel.to_vec(),
            sample_rate,
            duration_seconds,
        })
    }
}

/// Single-channel in-memory audio.
#[derive(Debug, Clone)]
pub struct MonoBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl MonoBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// `seconds` of a sine tone, handy for tests and demos.
    pub fn sine(frequency_hz: f32, seconds: f64, sample_rate: u32) -> Self {
        let n = (seconds * sample_rate as f64).round() as usize;
        let samples = (0..n)
            .map(|i| {
                (2.0 * std::f32::consts::PI * frequency_hz * i as f32 / sample_rate as f32).sin()
            })
            .collect();
        Self::new(samples, sample_rate)
    }
}

impl DecodedAudio for MonoBuffer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    fn channel_count(&self) -> usize {
        1
    }

    fn channel(&self, index: usize) -> Option<&[f32]> {
        (index == 0).then_some(self.samples.as_slice())
    }
}
