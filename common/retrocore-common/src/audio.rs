//! Shared audio rate conversion
//!
//! Every core produces samples at its own hardware rate (anywhere from ~32000 Hz to over
//! 2 MHz) and pushes them through a [`CubicResampler`] that produces output at the host
//! audio device rate.

use bincode::{Decode, Encode};
use std::collections::VecDeque;

pub const DEFAULT_OUTPUT_FREQUENCY: u64 = 48000;

// Fixed-point scale applied to frequencies so that the resample ratio arithmetic stays integral
const RESAMPLE_SCALING_FACTOR: u64 = 1 << 16;

/// 4-point cubic Hermite interpolation at position `x` in `[0, 1)` between `samples[1]` and
/// `samples[2]`.
#[must_use]
pub fn interpolate_cubic_hermite_4p(samples: [f64; 4], x: f64) -> f64 {
    let [s0, s1, s2, s3] = samples;

    let c0 = s1;
    let c1 = 0.5 * (s2 - s0);
    let c2 = s0 - 2.5 * s1 + 2.0 * s2 - 0.5 * s3;
    let c3 = 0.5 * (s3 - s0) + 1.5 * (s1 - s2);

    ((c3 * x + c2) * x + c1) * x + c0
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CubicResampler {
    scaled_source_frequency: u64,
    output_frequency: u64,
    cycle_counter_product: u64,
    scaled_x_counter: u64,
    input_samples_l: [f64; 4],
    input_samples_r: [f64; 4],
    output_samples: VecDeque<(f64, f64)>,
}

impl CubicResampler {
    #[must_use]
    pub fn new(source_frequency: f64) -> Self {
        Self {
            scaled_source_frequency: scale_source_frequency(source_frequency),
            output_frequency: DEFAULT_OUTPUT_FREQUENCY,
            cycle_counter_product: 0,
            scaled_x_counter: 0,
            input_samples_l: [0.0; 4],
            input_samples_r: [0.0; 4],
            output_samples: VecDeque::with_capacity(48000 / 60 * 2),
        }
    }

    pub fn collect_sample(&mut self, sample_l: f64, sample_r: f64) {
        push_sample(&mut self.input_samples_l, sample_l);
        push_sample(&mut self.input_samples_r, sample_r);

        let scaled_output_frequency = self.output_frequency * RESAMPLE_SCALING_FACTOR;
        self.cycle_counter_product += scaled_output_frequency;
        while self.cycle_counter_product >= self.scaled_source_frequency {
            self.cycle_counter_product -= self.scaled_source_frequency;

            self.scaled_x_counter += self.scaled_source_frequency;
            while self.scaled_x_counter >= scaled_output_frequency {
                self.scaled_x_counter -= scaled_output_frequency;
            }

            let x = (self.scaled_x_counter as f64) / (scaled_output_frequency as f64);
            let output_l = interpolate_cubic_hermite_4p(self.input_samples_l, x).clamp(-1.0, 1.0);
            let output_r = interpolate_cubic_hermite_4p(self.input_samples_r, x).clamp(-1.0, 1.0);
            self.output_samples.push_back((output_l, output_r));
        }
    }

    #[must_use]
    pub fn output_buffer_len(&self) -> usize {
        self.output_samples.len()
    }

    pub fn output_buffer_pop_front(&mut self) -> Option<(f64, f64)> {
        self.output_samples.pop_front()
    }

    /// Drain all buffered output samples into the given audio output.
    ///
    /// # Errors
    ///
    /// Propagates any error from the audio output.
    pub fn output_samples<A: crate::frontend::AudioOutput>(
        &mut self,
        audio_output: &mut A,
    ) -> Result<(), A::Err> {
        while let Some((sample_l, sample_r)) = self.output_samples.pop_front() {
            audio_output.push_sample(sample_l, sample_r)?;
        }
        Ok(())
    }

    pub fn update_source_frequency(&mut self, source_frequency: f64) {
        self.scaled_source_frequency = scale_source_frequency(source_frequency);
    }

    pub fn update_output_frequency(&mut self, output_frequency: u64) {
        self.output_frequency = output_frequency;
    }
}

fn scale_source_frequency(source_frequency: f64) -> u64 {
    (source_frequency * RESAMPLE_SCALING_FACTOR as f64).round() as u64
}

fn push_sample(samples: &mut [f64; 4], sample: f64) {
    samples.copy_within(1.., 0);
    samples[3] = sample;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsamples_at_expected_ratio() {
        let mut resampler = CubicResampler::new(96000.0);
        for _ in 0..9600 {
            resampler.collect_sample(0.25, -0.25);
        }

        // 96 kHz -> 48 kHz over 0.1s should produce ~4800 samples
        let len = resampler.output_buffer_len();
        assert!((4790..=4810).contains(&len), "unexpected output length {len}");
    }

    #[test]
    fn constant_input_produces_constant_output() {
        let mut resampler = CubicResampler::new(1_000_000.0);
        for _ in 0..100_000 {
            resampler.collect_sample(0.5, 0.5);
        }

        // Skip the warm-up samples from the zero-initialized history
        for _ in 0..4 {
            resampler.output_buffer_pop_front();
        }
        while let Some((l, r)) = resampler.output_buffer_pop_front() {
            assert!((l - 0.5).abs() < 1e-9 && (r - 0.5).abs() < 1e-9);
        }
    }
}
