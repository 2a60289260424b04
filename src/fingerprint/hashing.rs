//! Combinatorial landmark hashing.
//!
//! Each anchor peak is paired with the next `fan_value - 1` peaks in sequence.
//! A pair becomes a hash only inside the target zone: strictly later, at most
//! `zone_time` seconds away, and within `zone_freq` Hz.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;
use thiserror::Error;

use super::peaks::Peak;

/// Exact-match hash key over `(anchor Hz, target Hz, Δt centiseconds)`.
///
/// Text form is `anchor|target|delta`, which is also the stored representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LandmarkHash {
    pub anchor_hz: i64,
    pub target_hz: i64,
    pub delta_cs: i64,
}

#[derive(Error, Debug, PartialEq)]
#[error("Malformed landmark hash: {0:?}")]
pub struct ParseHashError(pub String);

impl LandmarkHash {
    pub fn new(anchor_hz: i64, target_hz: i64, delta_cs: i64) -> Self {
        Self { anchor_hz, target_hz, delta_cs }
    }
}

impl fmt::Display for LandmarkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.anchor_hz, self.target_hz, self.delta_cs)
    }
}

impl FromStr for LandmarkHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|').map(|p| p.parse::<i64>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(a)), Some(Ok(t)), Some(Ok(d)), None) => Ok(Self::new(a, t, d)),
            _ => Err(ParseHashError(s.to_string())),
        }
    }
}

impl From<LandmarkHash> for String {
    fn from(hash: LandmarkHash) -> Self {
        hash.to_string()
    }
}

impl TryFrom<String> for LandmarkHash {
    type Error = ParseHashError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Pairing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkHasher {
    pub fan_value: usize,
    pub zone_time: f64,
    pub zone_freq: f64,
}

impl LandmarkHasher {
    /// Enumerate `(hash, anchor seconds)` pairs for `peaks` (ordered by time).
    ///
    /// Every call starts a fresh enumeration over the same peaks.
    pub fn pairs<'a>(&self, peaks: &'a [Peak]) -> HashPairs<'a> {
        HashPairs {
            peaks,
            hasher: self.clone(),
            anchor: 0,
            offset: 1,
        }
    }

    /// Whether `anchor → target` lies inside the target zone.
    pub fn in_zone(&self, anchor: &Peak, target: &Peak) -> bool {
        let dt = (target.time_cs - anchor.time_cs) as f64 / 100.0;
        let df = (target.freq_hz - anchor.freq_hz).abs() as f64;
        dt > 0.0 && dt <= self.zone_time && df <= self.zone_freq
    }
}

/// Pull-based enumeration of landmark pairs, see [`LandmarkHasher::pairs`].
#[derive(Debug, Clone)]
pub struct HashPairs<'a> {
    peaks: &'a [Peak],
    hasher: LandmarkHasher,
    anchor: usize,
    offset: usize,
}

impl Iterator for HashPairs<'_> {
    type Item = (LandmarkHash, f64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.anchor < self.peaks.len() {
            let target = self.anchor + self.offset;
            if self.offset >= self.hasher.fan_value || target >= self.peaks.len() {
                self.anchor += 1;
                self.offset = 1;
                continue;
            }
            self.offset += 1;

            let a = &self.peaks[self.anchor];
            let b = &self.peaks[target];
            if self.hasher.in_zone(a, b) {
                let hash = LandmarkHash::new(a.freq_hz, b.freq_hz, b.time_cs - a.time_cs);
                return Some((hash, a.time_cs as f64 / 100.0));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let per_anchor = self.hasher.fan_value.saturating_sub(1);
        let remaining_anchors = self.peaks.len().saturating_sub(self.anchor);
        (0, Some(remaining_anchors.saturating_mul(per_anchor)))
    }
}

impl FusedIterator for HashPairs<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(time_cs: i64, freq_hz: i64) -> Peak {
        Peak { frame: time_cs as usize, bin: freq_hz as usize, time_cs, freq_hz }
    }

    fn hasher(fan_value: usize) -> LandmarkHasher {
        LandmarkHasher { fan_value, zone_time: 1.0, zone_freq: 600.0 }
    }

    #[test]
    fn test_hash_text_form() {
        let h = LandmarkHash::new(1000, 1200, 35);
        assert_eq!(h.to_string(), "1000|1200|35");
        assert_eq!("1000|1200|35".parse::<LandmarkHash>().unwrap(), h);
        assert!("1000|1200".parse::<LandmarkHash>().is_err());
        assert!("1000|1200|35|1".parse::<LandmarkHash>().is_err());
        assert!("a|b|c".parse::<LandmarkHash>().is_err());
    }

    #[test]
    fn test_hash_serde_as_string() {
        let h = LandmarkHash::new(500, 700, 12);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"500|700|12\"");
        let back: LandmarkHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_default_fan_pairs_neighbours_only() {
        let peaks = vec![peak(0, 1000), peak(10, 1100), peak(20, 1200)];
        let out: Vec<_> = hasher(2).pairs(&peaks).collect();
        assert_eq!(
            out,
            vec![
                (LandmarkHash::new(1000, 1100, 10), 0.0),
                (LandmarkHash::new(1100, 1200, 10), 0.1),
            ]
        );
    }

    #[test]
    fn test_fan_out_bound() {
        let peaks: Vec<_> = (0..50).map(|i| peak(i * 3, 1000 + (i % 5) * 10)).collect();
        for fan in 1..6 {
            let pairs = hasher(fan).pairs(&peaks);
            let (_, upper) = pairs.size_hint();
            let n = pairs.count();
            assert!(n <= peaks.len() * fan.saturating_sub(1));
            assert!(n <= upper.unwrap());
        }
    }

    #[test]
    fn test_zone_violations_emit_nothing() {
        let h = hasher(4);
        // same frame, too far in time, too far in frequency
        let same_time = vec![peak(10, 1000), peak(10, 1010)];
        let too_late = vec![peak(0, 1000), peak(101, 1000)];
        let too_wide = vec![peak(0, 1000), peak(5, 1601)];
        for peaks in [same_time, too_late, too_wide] {
            assert_eq!(h.pairs(&peaks).count(), 0);
        }
        // boundaries are inclusive
        let edge = vec![peak(0, 1000), peak(100, 1600)];
        assert_eq!(h.pairs(&edge).count(), 1);
    }

    #[test]
    fn test_every_emitted_pair_respects_zone() {
        let peaks: Vec<_> = (0..200)
            .map(|i| peak(i * 7 / 3, 300 + (i * 389) % 2700))
            .collect();
        let h = hasher(5);
        for (hash, _) in h.pairs(&peaks) {
            assert!(hash.delta_cs > 0 && hash.delta_cs <= 100);
            assert!((hash.target_hz - hash.anchor_hz).abs() <= 600);
        }
    }

    #[test]
    fn test_pairs_restartable_and_deterministic() {
        let peaks: Vec<_> = (0..30).map(|i| peak(i * 4, 500 + i * 20)).collect();
        let h = hasher(3);
        let first: Vec<_> = h.pairs(&peaks).collect();
        let second: Vec<_> = h.pairs(&peaks).collect();
        assert!(!first.is_empty());
        assert_eq!(first, second);
        // anchors come out in ascending time
        assert!(first.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_in_zone() {
        let h = hasher(2);
        assert!(h.in_zone(&peak(0, 1000), &peak(50, 1500)));
        assert!(!h.in_zone(&peak(50, 1000), &peak(0, 1000)));
    }

    #[test]
    fn test_empty_and_single() {
        let h = hasher(2);
        assert_eq!(h.pairs(&[]).count(), 0);
        assert_eq!(h.pairs(&[peak(0, 100)]).count(), 0);
    }
}
