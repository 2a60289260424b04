//! Short-time magnitude spectrogram on an explicit `[bin, frame]` buffer.

use ndarray::{Array2, ArrayView1, Axis};
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

/// Added to the magnitude before taking the log.
pub const DB_EPSILON: f64 = 1e-10;

/// Log-power spectrogram: ascending frequency axis, ascending frame-time axis,
/// and a dense dB buffer with shape `(bins, frames)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    frequencies: Vec<f64>,
    times: Vec<f64>,
    magnitudes: Array2<f32>,
}

impl Spectrogram {
    /// Returns `None` when the buffer shape disagrees with the axes.
    pub fn new(frequencies: Vec<f64>, times: Vec<f64>, magnitudes: Array2<f32>) -> Option<Self> {
        if magnitudes.dim() != (frequencies.len(), times.len()) {
            return None;
        }
        Some(Self {
            frequencies,
            times,
            magnitudes,
        })
    }

    pub fn bins(&self) -> usize {
        self.frequencies.len()
    }

    pub fn frames(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Bin centre frequencies in Hz.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Frame centre times in seconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn magnitudes(&self) -> &Array2<f32> {
        &self.magnitudes
    }

    /// Bounds-checked cell access.
    pub fn get(&self, bin: usize, frame: usize) -> Option<f32> {
        self.magnitudes.get((bin, frame)).copied()
    }

    /// All bins of one frame, or `None` past the last frame.
    pub fn frame(&self, frame: usize) -> Option<ArrayView1<'_, f32>> {
        (frame < self.frames()).then(|| self.magnitudes.index_axis(Axis(1), frame))
    }
}

/// Hann-windowed STFT producing dB magnitudes.
///
/// Each segment has its mean removed before windowing, and magnitudes use
/// density scaling (`|X| / sqrt(fs · Σw²)`).
pub struct Stft {
    sample_rate: f64,
    hop_length: usize,
    window: Vec<f64>,
    scale: f64,
    fft: Arc<dyn RealToComplex<f64>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("sample_rate", &self.sample_rate)
            .field("n_fft", &self.window.len())
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize, sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f64;
        // Periodic Hann
        let window: Vec<f64> = (0..n_fft)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n_fft as f64).cos())
            .collect();
        let power: f64 = window.iter().map(|w| w * w).sum();
        let scale = (1.0 / (sample_rate * power)).sqrt();
        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(n_fft);

        Self {
            sample_rate,
            hop_length,
            window,
            scale,
            fft,
        }
    }

    pub fn n_fft(&self) -> usize {
        self.window.len()
    }

    /// Number of full frames that fit in `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.n_fft() {
            0
        } else {
            (len - self.n_fft()) / self.hop_length + 1
        }
    }

    pub fn compute(&self, signal: &[f64]) -> Result<Spectrogram, realfft::FftError> {
        let n_fft = self.n_fft();
        let frames = self.frame_count(signal.len());
        let bins = n_fft / 2 + 1;

        let frequencies: Vec<f64> = (0..bins)
            .map(|k| k as f64 * self.sample_rate / n_fft as f64)
            .collect();
        let times: Vec<f64> = (0..frames)
            .map(|t| (n_fft as f64 / 2.0 + (t * self.hop_length) as f64) / self.sample_rate)
            .collect();

        let mut magnitudes = Array2::<f32>::zeros((bins, frames));
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut scratch = self.fft.make_scratch_vec();

        for frame in 0..frames {
            let start = frame * self.hop_length;
            let segment = &signal[start..start + n_fft];
            let mean = segment.iter().sum::<f64>() / n_fft as f64;
            for ((slot, &x), &w) in input.iter_mut().zip(segment).zip(&self.window) {
                *slot = (x - mean) * w;
            }

            self.fft
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)?;

            for (bin, c) in spectrum.iter().enumerate() {
                let magnitude = c.norm() * self.scale;
                magnitudes[[bin, frame]] = (10.0 * (magnitude + DB_EPSILON).log10()) as f32;
            }
        }

        Ok(Spectrogram {
            frequencies,
            times,
            magnitudes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, sr: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / sr).sin()).collect()
    }

    #[test]
    fn test_axes_and_shape() {
        let stft = Stft::new(1024, 256, 8000);
        let spec = stft.compute(&vec![0.0; 4096]).unwrap();
        assert_eq!(spec.bins(), 513);
        assert_eq!(spec.frames(), (4096 - 1024) / 256 + 1);
        assert_eq!(spec.magnitudes().dim(), (513, 13));
        assert!((spec.frequencies()[1] - 8000.0 / 1024.0).abs() < 1e-12);
        assert!((spec.times()[0] - 512.0 / 8000.0).abs() < 1e-12);
        assert!(spec.times().windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_silence_hits_epsilon_floor() {
        let spec = Stft::new(512, 128, 8000).compute(&vec![0.0; 2048]).unwrap();
        let floor = (10.0 * DB_EPSILON.log10()) as f32;
        assert!(spec.magnitudes().iter().all(|&v| (v - floor).abs() < 1e-4));
    }

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let sr = 8000.0;
        let stft = Stft::new(1024, 512, sr as u32);
        // 1000 Hz lands exactly on bin 128
        let spec = stft.compute(&tone(1000.0, sr, 8192)).unwrap();
        let frame = spec.frame(3).unwrap();
        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(loudest, 128);
    }

    #[test]
    fn test_short_signal_has_no_frames() {
        let spec = Stft::new(1024, 128, 44100).compute(&vec![0.1; 1000]).unwrap();
        assert_eq!(spec.frames(), 0);
        assert!(spec.is_empty());
        assert!(spec.frame(0).is_none());
    }

    #[test]
    fn test_bounds_checked_access() {
        let spec = Stft::new(256, 64, 8000).compute(&vec![0.0; 512]).unwrap();
        assert!(spec.get(0, 0).is_some());
        assert!(spec.get(spec.bins(), 0).is_none());
        assert!(spec.get(0, spec.frames()).is_none());
    }

    #[test]
    fn test_new_rejects_mismatched_shape() {
        let m = Array2::<f32>::zeros((3, 2));
        assert!(Spectrogram::new(vec![0.0; 3], vec![0.0; 2], m.clone()).is_some());
        assert!(Spectrogram::new(vec![0.0; 2], vec![0.0; 2], m).is_none());
    }

    #[test]
    fn test_deterministic() {
        let stft = Stft::new(512, 128, 8000);
        let signal = tone(440.0, 8000.0, 4000);
        assert_eq!(stft.compute(&signal).unwrap(), stft.compute(&signal).unwrap());
    }
}
