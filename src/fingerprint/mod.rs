pub mod decode;
pub mod filter;
pub mod hashing;
pub mod peaks;
pub mod spectrogram;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::ConfigError;
use filter::BandPass;
use hashing::{LandmarkHash, LandmarkHasher};
use peaks::{Peak, PeakExtractor};
use spectrogram::{Spectrogram, Stft};

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("FFT error: {0}")]
    Fft(#[from] realfft::FftError),
}

/// Parameters shared by indexing and querying.
///
/// Hashes are only comparable when both sides used identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub sample_rate: u32,
    /// STFT window length in samples.
    pub n_fft: usize,
    pub hop_length: usize,
    /// Pairs per anchor, counting the anchor's own slot.
    pub fan_value: usize,
    /// Landmarks kept per frame.
    pub max_peaks: usize,
    /// Side of the square local-maximum window.
    pub neighborhood: usize,
    /// Fixed dB floor replacing the adaptive per-frame floor.
    pub amp_min_db: Option<f32>,
    /// Max anchor-to-target distance in seconds.
    pub zone_time: f64,
    /// Max anchor-to-target distance in Hz.
    pub zone_freq: f64,
    pub band_low: f64,
    pub band_high: f64,
    pub filter_order: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            n_fft: 4096,
            hop_length: 128,
            fan_value: 2,
            max_peaks: 10,
            neighborhood: 40,
            amp_min_db: None,
            zone_time: 1.0,
            zone_freq: 600.0,
            band_low: 300.0,
            band_high: 3000.0,
            filter_order: 4,
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let nyquist = self.sample_rate as f64 / 2.0;

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }
        if self.n_fft == 0 || self.hop_length == 0 {
            return invalid("n_fft and hop_length must be positive".into());
        }
        if self.hop_length > self.n_fft {
            return invalid(format!(
                "hop_length {} exceeds n_fft {}",
                self.hop_length, self.n_fft
            ));
        }
        if self.fan_value == 0 || self.max_peaks == 0 || self.neighborhood == 0 {
            return invalid("fan_value, max_peaks and neighborhood must be positive".into());
        }
        if self.zone_time <= 0.0 || self.zone_freq <= 0.0 {
            return invalid("zone_time and zone_freq must be positive".into());
        }
        if self.filter_order == 0 {
            return invalid("filter_order must be positive".into());
        }
        if !(self.band_low > 0.0 && self.band_low < self.band_high && self.band_high < nyquist) {
            return invalid(format!(
                "band {}..{} Hz must satisfy 0 < low < high < {nyquist}",
                self.band_low, self.band_high
            ));
        }
        Ok(())
    }

    /// Key/value view stored alongside an index and compared on load.
    pub fn meta_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sample_rate", self.sample_rate.to_string()),
            ("n_fft", self.n_fft.to_string()),
            ("hop_length", self.hop_length.to_string()),
            ("fan_value", self.fan_value.to_string()),
            ("max_peaks", self.max_peaks.to_string()),
            ("neighborhood", self.neighborhood.to_string()),
            (
                "amp_min_db",
                self.amp_min_db.map_or_else(|| "none".to_string(), |v| v.to_string()),
            ),
            ("zone_time", self.zone_time.to_string()),
            ("zone_freq", self.zone_freq.to_string()),
            ("band_low", self.band_low.to_string()),
            ("band_high", self.band_high.to_string()),
            ("filter_order", self.filter_order.to_string()),
        ]
    }
}

/// The full extraction chain: band-pass, STFT, peaks, landmark pairs.
///
/// Immutable after construction and safe to share between threads.
#[derive(Debug)]
pub struct Fingerprinter {
    config: FingerprintConfig,
    band: BandPass,
    stft: Stft,
    extractor: PeakExtractor,
    hasher: LandmarkHasher,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            band: BandPass::butterworth(
                config.filter_order,
                config.band_low,
                config.band_high,
                config.sample_rate as f64,
            ),
            stft: Stft::new(config.n_fft, config.hop_length, config.sample_rate),
            extractor: PeakExtractor {
                neighborhood: config.neighborhood,
                max_peaks: config.max_peaks,
                amp_min_db: config.amp_min_db,
            },
            hasher: LandmarkHasher {
                fan_value: config.fan_value,
                zone_time: config.zone_time,
                zone_freq: config.zone_freq,
            },
            config,
        })
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    pub fn hasher(&self) -> &LandmarkHasher {
        &self.hasher
    }

    pub fn spectrogram(&self, samples: &[f32]) -> Result<Spectrogram, FingerprintError> {
        let filtered = self.band.filtfilt(samples);
        Ok(self.stft.compute(&filtered)?)
    }

    pub fn peaks(&self, samples: &[f32]) -> Result<Vec<Peak>, FingerprintError> {
        let spec = self.spectrogram(samples)?;
        Ok(self.extractor.extract(&spec))
    }

    /// `(hash, anchor seconds)` pairs in ascending anchor time.
    pub fn hashes(&self, samples: &[f32]) -> Result<Vec<(LandmarkHash, f64)>, FingerprintError> {
        let peaks = self.peaks(samples)?;
        Ok(self.hasher.pairs(&peaks).collect())
    }

    pub fn hash_table(&self, samples: &[f32]) -> Result<HashTable, FingerprintError> {
        let peaks = self.peaks(samples)?;
        Ok(self.hasher.pairs(&peaks).collect())
    }
}

/// Hash → every anchor time at which one file produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashTable {
    entries: HashMap<LandmarkHash, Vec<f64>>,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: LandmarkHash, time: f64) {
        self.entries.entry(hash).or_default().push(time);
    }

    /// Distinct hashes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash occurrences, counting repeats.
    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn get(&self, hash: &LandmarkHash) -> Option<&[f64]> {
        self.entries.get(hash).map(Vec::as_slice)
    }

    /// How many times `hash` was produced.
    pub fn occurrences(&self, hash: &LandmarkHash) -> usize {
        self.entries.get(hash).map_or(0, Vec::len)
    }

    pub fn hashes(&self) -> impl Iterator<Item = &LandmarkHash> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LandmarkHash, &[f64])> {
        self.entries.iter().map(|(h, t)| (h, t.as_slice()))
    }
}

impl FromIterator<(LandmarkHash, f64)> for HashTable {
    fn from_iter<I: IntoIterator<Item = (LandmarkHash, f64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (hash, time) in iter {
            table.insert(hash, time);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::noise;

    fn fp() -> Fingerprinter {
        Fingerprinter::new(FingerprintConfig::default()).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(FingerprintConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let cases: Vec<Box<dyn Fn(&mut FingerprintConfig)>> = vec![
            Box::new(|c| c.n_fft = 0),
            Box::new(|c| c.hop_length = 0),
            Box::new(|c| c.hop_length = 8192),
            Box::new(|c| c.fan_value = 0),
            Box::new(|c| c.max_peaks = 0),
            Box::new(|c| c.zone_time = 0.0),
            Box::new(|c| c.zone_freq = -1.0),
            Box::new(|c| c.band_high = 30_000.0),
            Box::new(|c| c.band_low = 3000.0),
            Box::new(|c| c.filter_order = 0),
        ];
        for mutate in cases {
            let mut config = FingerprintConfig::default();
            mutate(&mut config);
            assert!(Fingerprinter::new(config).is_err());
        }
    }

    #[test]
    fn test_hashes_are_deterministic() {
        let fp = fp();
        let clip = noise(7, 44100);
        let a = fp.hashes(&clip).unwrap();
        let b = fp.hashes(&clip).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_pipeline_bounds() {
        let fp = fp();
        let clip = noise(3, 44100);
        let spec = fp.spectrogram(&clip).unwrap();
        let peaks = fp.peaks(&clip).unwrap();
        let hashes = fp.hashes(&clip).unwrap();

        for frame in 0..spec.frames() {
            assert!(peaks.iter().filter(|p| p.frame == frame).count() <= 10);
        }
        assert!(hashes.len() <= peaks.len() * fp.config().fan_value);
    }

    #[test]
    fn test_silence_and_short_clips_yield_nothing() {
        let fp = fp();
        assert!(fp.hashes(&vec![0.0; 44100]).unwrap().is_empty());
        assert!(fp.hashes(&vec![0.1; 1000]).unwrap().is_empty());
        assert!(fp.hashes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_hash_table_counts_repeats() {
        let h = LandmarkHash::new(1, 2, 3);
        let g = LandmarkHash::new(4, 5, 6);
        let table: HashTable = [(h, 0.5), (g, 0.7), (h, 1.5)].into_iter().collect();
        assert_eq!(table.len(), 2);
        assert_eq!(table.total(), 3);
        assert_eq!(table.occurrences(&h), 2);
        assert_eq!(table.get(&h), Some(&[0.5, 1.5][..]));
        assert_eq!(table.occurrences(&LandmarkHash::new(0, 0, 0)), 0);

        let json = serde_json::to_string(&table).unwrap();
        let back: HashTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_fingerprinter_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fingerprinter>();
    }
}
