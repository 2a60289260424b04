//! Landmark selection from a dB spectrogram.
//!
//! A cell becomes a landmark when it is the maximum of its neighbourhood,
//! clears the 75th percentile of all such maxima, clears its frame's noise
//! floor (mean + one standard deviation, or a fixed dB floor), and ranks among
//! the loudest `max_peaks` survivors of its frame.

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis, Zip};
use std::collections::VecDeque;

use super::spectrogram::Spectrogram;

/// Percentile of candidate magnitudes a landmark must exceed.
const CANDIDATE_PERCENTILE: f64 = 75.0;

/// Quantized time–frequency landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peak {
    /// Frame index in the source spectrogram.
    pub frame: usize,
    /// Frequency-bin index in the source spectrogram.
    pub bin: usize,
    /// Frame time in centiseconds.
    pub time_cs: i64,
    /// Bin frequency in whole Hz.
    pub freq_hz: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakExtractor {
    pub neighborhood: usize,
    pub max_peaks: usize,
    pub amp_min_db: Option<f32>,
}

impl PeakExtractor {
    /// Extract landmarks ordered by frame, then by ascending magnitude within a frame.
    pub fn extract(&self, spec: &Spectrogram) -> Vec<Peak> {
        if spec.is_empty() {
            return Vec::new();
        }
        let magnitudes = spec.magnitudes();

        let neighbourhood_max = maximum_filter(magnitudes, self.neighborhood);
        let mut mask: Array2<bool> = Zip::from(magnitudes)
            .and(&neighbourhood_max)
            .map_collect(|&value, &max| value == max);

        let candidates: Vec<f32> = Zip::from(magnitudes)
            .and(&mask)
            .fold(Vec::new(), |mut acc, &value, &keep| {
                if keep {
                    acc.push(value);
                }
                acc
            });
        if let Some(threshold) = percentile(candidates, CANDIDATE_PERCENTILE) {
            apply_threshold(&mut mask, magnitudes, |_| threshold);
        }

        match self.amp_min_db {
            Some(floor) => apply_threshold(&mut mask, magnitudes, |_| floor as f64),
            None => {
                let floors: Vec<f64> = magnitudes
                    .axis_iter(Axis(1))
                    .map(noise_floor)
                    .collect();
                apply_threshold(&mut mask, magnitudes, |frame| floors[frame]);
            }
        }

        self.select_per_frame(spec, &mask)
    }

    fn select_per_frame(&self, spec: &Spectrogram, mask: &Array2<bool>) -> Vec<Peak> {
        let magnitudes = spec.magnitudes();
        let mut peaks = Vec::new();

        for (frame, (values, keep)) in magnitudes
            .axis_iter(Axis(1))
            .zip(mask.axis_iter(Axis(1)))
            .enumerate()
        {
            let mut survivors: Vec<(usize, f32)> = values
                .iter()
                .zip(keep.iter())
                .enumerate()
                .filter(|(_, (_, keep))| **keep)
                .map(|(bin, (&value, _))| (bin, value))
                .collect();
            if survivors.is_empty() {
                continue;
            }

            // Stable sort keeps ascending bin order among equal magnitudes
            survivors.sort_by(|a, b| a.1.total_cmp(&b.1));
            let skip = survivors.len().saturating_sub(self.max_peaks);

            let time_cs = (spec.times()[frame] * 100.0).round_ties_even() as i64;
            peaks.extend(survivors[skip..].iter().map(|&(bin, _)| Peak {
                frame,
                bin,
                time_cs,
                freq_hz: spec.frequencies()[bin].round_ties_even() as i64,
            }));
        }

        peaks
    }
}

/// Keep only mask cells whose magnitude is strictly above `threshold(frame)`.
fn apply_threshold(
    mask: &mut Array2<bool>,
    magnitudes: &Array2<f32>,
    threshold: impl Fn(usize) -> f64,
) {
    for (frame, (keep, values)) in mask
        .axis_iter_mut(Axis(1))
        .zip(magnitudes.axis_iter(Axis(1)))
        .enumerate()
    {
        let limit = threshold(frame);
        Zip::from(keep)
            .and(values)
            .for_each(|k, &v| *k = *k && (v as f64) > limit);
    }
}

/// Mean plus one (population) standard deviation across a frame's bins.
fn noise_floor(frame: ArrayView1<'_, f32>) -> f64 {
    let n = frame.len() as f64;
    let mean = frame.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = frame
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    mean + var.sqrt()
}

/// Linear-interpolated percentile; `None` for an empty sample.
pub(crate) fn percentile(mut values: Vec<f32>, pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = pct / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let (a, b) = (values[lo] as f64, values[hi] as f64);
    Some(a + (b - a) * (rank - lo as f64))
}

/// Separable 2-D maximum filter with a `size × size` window.
///
/// The window spans `size / 2` cells before and `(size - 1) / 2` after each
/// cell and is clipped at the buffer edges.
pub(crate) fn maximum_filter(input: &Array2<f32>, size: usize) -> Array2<f32> {
    let before = size / 2;
    let after = size.saturating_sub(1) / 2;

    let mut along_time = Array2::<f32>::zeros(input.raw_dim());
    for (src, dst) in input
        .axis_iter(Axis(0))
        .zip(along_time.axis_iter_mut(Axis(0)))
    {
        sliding_max(src, dst, before, after);
    }

    let mut out = Array2::<f32>::zeros(input.raw_dim());
    for (src, dst) in along_time
        .axis_iter(Axis(1))
        .zip(out.axis_iter_mut(Axis(1)))
    {
        sliding_max(src, dst, before, after);
    }
    out
}

/// Monotonic-deque running maximum over `[i - before, i + after]`.
fn sliding_max(
    input: ArrayView1<'_, f32>,
    mut output: ArrayViewMut1<'_, f32>,
    before: usize,
    after: usize,
) {
    let n = input.len();
    let mut window: VecDeque<usize> = VecDeque::new();
    let mut next = 0;

    for i in 0..n {
        let hi = (i + after).min(n - 1);
        while next <= hi {
            while window.back().is_some_and(|&j| input[j] <= input[next]) {
                window.pop_back();
            }
            window.push_back(next);
            next += 1;
        }
        let lo = i.saturating_sub(before);
        while window.front().is_some_and(|&j| j < lo) {
            window.pop_front();
        }
        if let Some(&j) = window.front() {
            output[i] = input[j];
        }
    }
}
