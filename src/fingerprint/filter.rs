//! Zero-phase Butterworth band-pass filter.
//!
//! The filter is designed as a cascade of second-order sections (analog
//! Butterworth prototype → band-pass transform → bilinear transform) and
//! applied forward then backward, so the output carries no group delay and
//! spectral peaks stay aligned with the input timeline.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Imaginary parts below this are treated as a real prototype pole.
const REAL_POLE_EPS: f64 = 1e-12;

/// One biquad in transposed direct form II. `a[0]` is always 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    /// Gain at DC (z = 1).
    fn dc_gain(&self) -> f64 {
        let num = self.b[0] + self.b[1] + self.b[2];
        let den = self.a[0] + self.a[1] + self.a[2];
        if den.abs() < f64::EPSILON { 0.0 } else { num / den }
    }

    /// Delay-line state for a unit step that has been applied forever.
    fn step_state(&self) -> [f64; 2] {
        let y = self.dc_gain();
        [y - self.b[0], self.b[2] - self.a[2] * y]
    }

    /// Complex frequency response at point `z` on the unit circle.
    fn response(&self, z: Complex64) -> Complex64 {
        let zi = z.inv();
        let zi2 = zi * zi;
        let num = self.b[0] + zi * self.b[1] + zi2 * self.b[2];
        let den = self.a[0] + zi * self.a[1] + zi2 * self.a[2];
        num / den
    }

    #[inline]
    fn tick(&self, x: f64, state: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + state[0];
        state[0] = self.b[1] * x - self.a[1] * y + state[1];
        state[1] = self.b[2] * x - self.a[2] * y;
        y
    }
}

/// Digital Butterworth band-pass as cascaded biquads.
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: Vec<Biquad>,
    /// Per-section steady-state for a unit step at the cascade input.
    initial: Vec<[f64; 2]>,
    /// Odd-extension length used at both signal edges.
    pad_len: usize,
}

impl BandPass {
    /// Design an `order`-th order band-pass with edges `low_hz`..`high_hz`.
    ///
    /// Callers validate `0 < low_hz < high_hz < sample_rate / 2`.
    pub fn butterworth(order: usize, low_hz: f64, high_hz: f64, sample_rate: f64) -> Self {
        let fs2 = 2.0 * sample_rate;
        // Pre-warped analog band edges (rad/s)
        let w_low = fs2 * (PI * low_hz / sample_rate).tan();
        let w_high = fs2 * (PI * high_hz / sample_rate).tan();
        let bandwidth = w_high - w_low;
        let w0 = (w_low * w_high).sqrt();

        let mut sections = Vec::with_capacity(order);
        for k in 0..order {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            let proto = Complex64::from_polar(1.0, theta);
            if proto.im < -REAL_POLE_EPS {
                // conjugate of an upper-half-plane pole, already covered
                continue;
            }

            let half = proto * (bandwidth / 2.0);
            let disc = (half * half - Complex64::new(w0 * w0, 0.0)).sqrt();
            let to_z = |s: Complex64| (fs2 + s) / (fs2 - s);

            if proto.im.abs() <= REAL_POLE_EPS {
                // Real prototype pole: both band-pass poles share one section
                let z1 = to_z(half + disc);
                let z2 = to_z(half - disc);
                sections.push(Biquad {
                    b: [1.0, 0.0, -1.0],
                    a: [1.0, -(z1 + z2).re, (z1 * z2).re],
                });
            } else {
                for s in [half + disc, half - disc] {
                    let z = to_z(s);
                    sections.push(Biquad {
                        b: [1.0, 0.0, -1.0],
                        a: [1.0, -2.0 * z.re, z.norm_sqr()],
                    });
                }
            }
        }

        // Unit gain at the digital image of the analog centre frequency
        let center = Complex64::from_polar(1.0, 2.0 * (w0 / fs2).atan());
        let response: Complex64 = sections.iter().map(|s| s.response(center)).product();
        let gain = 1.0 / response.norm();
        if let Some(first) = sections.first_mut() {
            for coeff in &mut first.b {
                *coeff *= gain;
            }
        }

        let mut initial = Vec::with_capacity(sections.len());
        let mut scale = 1.0;
        for section in &sections {
            let [s0, s1] = section.step_state();
            initial.push([s0 * scale, s1 * scale]);
            scale *= section.dc_gain();
        }

        Self {
            sections,
            initial,
            pad_len: 3 * (2 * order + 1),
        }
    }

    #[cfg(test)]
    fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Filter forward and backward. Output has the same length as `input`.
    pub fn filtfilt(&self, input: &[f32]) -> Vec<f64> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }
        let pad = self.pad_len.min(n - 1);
        let signal: Vec<f64> = input.iter().map(|&x| x as f64).collect();
        let extended = odd_extension(&signal, pad);

        let mut forward = self.run(&extended);
        forward.reverse();
        let mut backward = self.run(&forward);
        backward.reverse();

        backward.drain(..pad);
        backward.truncate(n);
        backward
    }

    /// Single causal pass, state primed to the first sample's steady state.
    fn run(&self, signal: &[f64]) -> Vec<f64> {
        let x0 = signal.first().copied().unwrap_or(0.0);
        let mut states: Vec<[f64; 2]> = self
            .initial
            .iter()
            .map(|&[s0, s1]| [s0 * x0, s1 * x0])
            .collect();

        signal
            .iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(states.iter_mut())
                    .fold(x, |acc, (section, state)| section.tick(acc, state))
            })
            .collect()
    }
}

/// Point-symmetric extension about each edge sample (`2·x[0] − x[i]`).
fn odd_extension(signal: &[f64], pad: usize) -> Vec<f64> {
    let n = signal.len();
    let first = signal[0];
    let last = signal[n - 1];
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    fn sine(freq: f64, secs: f64) -> Vec<f32> {
        let n = (SR * secs) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / SR).sin() as f32)
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    fn speech_band() -> BandPass {
        BandPass::butterworth(4, 300.0, 3000.0, SR)
    }

    #[test]
    fn test_section_count_matches_order() {
        assert_eq!(speech_band().sections().len(), 4);
        assert_eq!(BandPass::butterworth(3, 300.0, 3000.0, SR).sections().len(), 3);
    }

    #[test]
    fn test_sections_are_stable() {
        for s in speech_band().sections() {
            // |a2| < 1 and |a1| < 1 + a2 keeps both poles inside the unit circle
            assert!(s.a[2].abs() < 1.0);
            assert!(s.a[1].abs() < 1.0 + s.a[2]);
        }
    }

    #[test]
    fn test_passband_tone_is_preserved_without_shift() {
        let input = sine(1000.0, 1.0);
        let out = speech_band().filtfilt(&input);
        assert_eq!(out.len(), input.len());

        // Skip edge transients, compare sample-by-sample in the middle
        let mid = 11025..33075;
        let max_err = mid
            .clone()
            .map(|i| (out[i] - input[i] as f64).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 0.02, "max error {max_err}");
    }

    #[test]
    fn test_stopband_tones_are_attenuated() {
        for freq in [50.0, 10_000.0] {
            let out = speech_band().filtfilt(&sine(freq, 1.0));
            let level = rms(&out[11025..33075]);
            assert!(level < 0.01, "{freq} Hz leaked at rms {level}");
        }
    }

    #[test]
    fn test_filtfilt_short_and_empty_inputs() {
        let bp = speech_band();
        assert!(bp.filtfilt(&[]).is_empty());
        assert_eq!(bp.filtfilt(&[0.5]).len(), 1);
        assert_eq!(bp.filtfilt(&[0.1, -0.2, 0.3]).len(), 3);
    }

    #[test]
    fn test_odd_extension() {
        let ext = odd_extension(&[1.0, 2.0, 4.0, 7.0], 2);
        assert_eq!(ext, vec![-2.0, 0.0, 1.0, 2.0, 4.0, 7.0, 10.0, 12.0]);
    }
}
