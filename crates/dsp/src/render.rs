//! Short-time Fourier transform rendering of a single tile.
//!
//! Each pixel column is one Hann-windowed FFT centred on the column's time.
//! Rows are linear frequency bins from DC at the bottom to Nyquist at the top.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use spectra_core::{Raster, RasterError, TileRequest};
use thiserror::Error;

use crate::colormap::intensity_to_rgba;

/// Level mapped to the darkest color.
pub const DB_FLOOR: f32 = -100.0;

/// Level mapped to the brightest color.
pub const DB_CEILING: f32 = 0.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Sample rate must be non-zero")]
    InvalidSampleRate,

    #[error("Invalid time range {start}s..{end}s")]
    InvalidTimeRange { start: f64, end: f64 },

    #[error("FFT size must be at least 2, got {0}")]
    InvalidFftSize(usize),

    #[error(transparent)]
    Raster(#[from] RasterError),
}

/// A planned forward FFT and its analysis window.
#[derive(Clone)]
pub struct FftPlan {
    fft: Arc<dyn Fft<f32>>,
    window: Arc<[f32]>,
    window_sum: f32,
}

impl FftPlan {
    pub fn new(planner: &mut FftPlanner<f32>, size: usize) -> Result<Self, RenderError> {
        if size < 2 {
            return Err(RenderError::InvalidFftSize(size));
        }
        let fft = planner.plan_fft_forward(size);

        // Hann window
        let window: Arc<[f32]> = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
            .collect();
        let window_sum = window.iter().sum::<f32>().max(f32::EPSILON);

        Ok(Self {
            fft,
            window,
            window_sum,
        })
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }
}

/// Render the tile described by `request` from `samples`.
///
/// Samples outside the buffer are treated as silence, so the partial last
/// tile of a track fades to the floor color.
pub fn render_tile(
    samples: &[f32],
    sample_rate: u32,
    request: &TileRequest,
    plan: &FftPlan,
) -> Result<Raster, RenderError> {
    if sample_rate == 0 {
        return Err(RenderError::InvalidSampleRate);
    }
    let start = request.start_time_seconds;
    let end = request.end_time_seconds;
    if !start.is_finite() || !end.is_finite() || end <= start || start < 0.0 {
        return Err(RenderError::InvalidTimeRange { start, end });
    }

    let width = request.render_width_px;
    let height = request.raster_height_px;
    if width == 0 || height == 0 {
        return Err(RasterError::EmptyDimensions { width, height }.into());
    }

    let size = plan.size();
    let bins = size / 2;
    let amplitude_scale = 2.0 * request.gain / plan.window_sum;
    let silence = intensity_to_rgba(0.0);

    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); size];
    let mut column = vec![0.0f32; height as usize];
    let seconds_per_px = (end - start) / width as f64;

    for x in 0..width as usize {
        let center_seconds = start + (x as f64 + 0.5) * seconds_per_px;
        let center = (center_seconds * sample_rate as f64).round() as i64;
        let first = center - (size / 2) as i64;

        let mut audible = false;
        for (j, slot) in buffer.iter_mut().enumerate() {
            let index = first + j as i64;
            let sample = if index >= 0 && (index as usize) < samples.len() {
                audible = true;
                samples[index as usize]
            } else {
                0.0
            };
            *slot = Complex::new(sample * plan.window[j], 0.0);
        }

        if !audible {
            for y in 0..height as usize {
                put_pixel(&mut pixels, width as usize, x, y, silence);
            }
            continue;
        }

        plan.fft.process(&mut buffer);

        for (row, value) in column.iter_mut().enumerate() {
            let lo = row * bins / height as usize;
            let hi = ((row + 1) * bins / height as usize).max(lo + 1).min(bins.max(1));
            let peak = buffer[lo.min(bins.saturating_sub(1))..hi]
                .iter()
                .map(|c| c.norm())
                .fold(0.0f32, f32::max);
            *value = level_to_intensity(peak * amplitude_scale);
        }

        for (row, intensity) in column.iter().enumerate() {
            // Row 0 is the lowest frequency, drawn at the bottom
            let y = height as usize - 1 - row;
            put_pixel(&mut pixels, width as usize, x, y, intensity_to_rgba(*intensity));
        }
    }

    Ok(Raster::new(width, height, pixels)?)
}

fn level_to_intensity(amplitude: f32) -> f32 {
    let db = 20.0 * amplitude.max(1e-10).log10();
    ((db - DB_FLOOR) / (DB_CEILING - DB_FLOOR)).clamp(0.0, 1.0)
}

fn put_pixel(pixels: &mut [u8], width: usize, x: usize, y: usize, rgba: [u8; 4]) {
    let offset = (y * width + x) * 4;
    pixels[offset..offset + 4].copy_from_slice(&rgba);
}
