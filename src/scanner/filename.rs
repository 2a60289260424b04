use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

// Trailing take/copy number, e.g. "song_2"
static NUMERIC_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(\d+)$").unwrap());

static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9 ]+").unwrap());

/// Derive the logical track key from a file name or path.
///
/// Directory and extension are dropped, a trailing `_<digits>` suffix is
/// removed, accents are stripped, anything other than ASCII letters and digits
/// becomes a space, and the result is lowercased with whitespace collapsed.
/// Different files may map to the same key; the key is stable under
/// re-normalization.
pub fn normalize_track_key(name: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);

    let stem = NUMERIC_SUFFIX_RE.replace(stem, "");
    let unaccented: String = stem.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let spaced = NON_ALNUM_RE.replace_all(&unaccented, " ");

    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_and_directory_dropped() {
        assert_eq!(normalize_track_key("music/rock/Song Title.mp3"), "song title");
        assert_eq!(normalize_track_key("Song Title.flac"), "song title");
    }

    #[test]
    fn test_numeric_suffix_stripped() {
        assert_eq!(normalize_track_key("Bohemian_Rhapsody_2.wav"), "bohemian rhapsody");
        assert_eq!(normalize_track_key("track_01.mp3"), "track");
        // only a trailing underscore-number run counts
        assert_eq!(normalize_track_key("Route 66.mp3"), "route 66");
        assert_eq!(normalize_track_key("99_Problems.mp3"), "99 problems");
    }

    #[test]
    fn test_accents_removed() {
        assert_eq!(normalize_track_key("Canción Bonita.mp3"), "cancion bonita");
        assert_eq!(normalize_track_key("Über Café.wav"), "uber cafe");
    }

    #[test]
    fn test_punctuation_becomes_space() {
        assert_eq!(normalize_track_key("Don't.Stop-Me__Now!.ogg"), "don t stop me now");
        assert_eq!(normalize_track_key("  A   B\tC .mp3"), "a b c");
    }

    #[test]
    fn test_collisions_aggregate() {
        assert_eq!(
            normalize_track_key("Hey_Jude_1.mp3"),
            normalize_track_key("hey jude.wav")
        );
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "Canción_Bonita_12.mp3",
            "Über Café (Live) [2019].flac",
            "Don't.Stop-Me__Now!.ogg",
            "ÅNGSTRÖM_7",
            "plain",
            "___",
            "",
        ];
        for input in inputs {
            let once = normalize_track_key(input);
            assert_eq!(normalize_track_key(&once), once, "input {input:?}");
        }
    }
}
