//! Audio analysis and stem types
//!
//! Shared between the separation service and anything consuming its JSON:
//! - `AudioFeatureRecord`: fixed-shape musical feature summary of an upload
//! - `StemName` / `StemSet`: the closed set of stems produced by separation
//! - `TempoMarking`: BPM to Italian tempo marking table

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ========================================
// Stems
// ========================================

/// One isolated component of a mixed track
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemName {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl StemName {
    /// Every stem a four-stem separation must produce, in response order
    pub const ALL: [StemName; 4] = [
        StemName::Vocals,
        StemName::Drums,
        StemName::Bass,
        StemName::Other,
    ];

    /// File stem used by the separation tool for this output
    pub fn as_str(&self) -> &'static str {
        match self {
            StemName::Vocals => "vocals",
            StemName::Drums => "drums",
            StemName::Bass => "bass",
            StemName::Other => "other",
        }
    }
}

impl fmt::Display for StemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public resource paths for a complete set of stems
///
/// All four members are required; a partial set cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemSet {
    pub vocals: String,
    pub drums: String,
    pub bass: String,
    pub other: String,
}

impl StemSet {
    /// Build a stem set from a per-stem map
    ///
    /// # Errors
    /// Returns the stems absent from `found`, in `StemName::ALL` order.
    pub fn from_map(mut found: BTreeMap<StemName, String>) -> Result<Self, Vec<StemName>> {
        let missing: Vec<StemName> = StemName::ALL
            .iter()
            .copied()
            .filter(|stem| !found.contains_key(stem))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let mut take = |stem: StemName| found.remove(&stem).unwrap_or_default();
        Ok(Self {
            vocals: take(StemName::Vocals),
            drums: take(StemName::Drums),
            bass: take(StemName::Bass),
            other: take(StemName::Other),
        })
    }

    pub fn get(&self, stem: StemName) -> &str {
        match stem {
            StemName::Vocals => &self.vocals,
            StemName::Drums => &self.drums,
            StemName::Bass => &self.bass,
            StemName::Other => &self.other,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StemName, &str)> {
        StemName::ALL.into_iter().map(move |stem| (stem, self.get(stem)))
    }
}

// ========================================
// Tempo and key
// ========================================

/// Qualitative tempo description derived from BPM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempoMarking {
    Grave,
    Largo,
    Larghetto,
    Adagio,
    Andante,
    Moderato,
    Allegro,
    Presto,
    Prestissimo,
}

/// Upper bounds (exclusive) of each marking, ascending
const TEMPO_TABLE: [(u32, TempoMarking); 8] = [
    (40, TempoMarking::Grave),
    (60, TempoMarking::Largo),
    (66, TempoMarking::Larghetto),
    (76, TempoMarking::Adagio),
    (108, TempoMarking::Andante),
    (121, TempoMarking::Moderato),
    (169, TempoMarking::Allegro),
    (200, TempoMarking::Presto),
];

impl TempoMarking {
    pub fn from_bpm(bpm: u32) -> Self {
        TEMPO_TABLE
            .iter()
            .find(|(upper, _)| bpm < *upper)
            .map(|(_, marking)| *marking)
            .unwrap_or(TempoMarking::Prestissimo)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TempoMarking::Grave => "Grave",
            TempoMarking::Largo => "Largo",
            TempoMarking::Larghetto => "Larghetto",
            TempoMarking::Adagio => "Adagio",
            TempoMarking::Andante => "Andante",
            TempoMarking::Moderato => "Moderato",
            TempoMarking::Allegro => "Allegro",
            TempoMarking::Presto => "Presto",
            TempoMarking::Prestissimo => "Prestissimo",
        }
    }
}

impl fmt::Display for TempoMarking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Major/minor mode of the detected key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMode {
    Major,
    Minor,
}

impl KeyMode {
    /// Lenient parse of analyzer output ("major", "Minor", "min", ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" | "maj" => Some(KeyMode::Major),
            "minor" | "min" => Some(KeyMode::Minor),
            _ => None,
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Major => f.write_str("Major"),
            KeyMode::Minor => f.write_str("Minor"),
        }
    }
}

// ========================================
// Feature record
// ========================================

pub const FALLBACK_BPM: u32 = 120;
pub const FALLBACK_ENERGY: f64 = 50.0;
pub const FALLBACK_BRIGHTNESS: f64 = 2000.0;
pub const FALLBACK_DURATION: f64 = 0.0;
pub const FALLBACK_RHYTHM_COMPLEXITY: f64 = 0.5;
pub const FALLBACK_SPECTRAL_ROLLOFF: f64 = 4000.0;

/// Key reported when the analyzer could not run or its output was unusable
pub const UNKNOWN_KEY: &str = "Unknown";

/// Key reported when the analyzer ran but reported an analysis error
pub const DEFAULT_KEY: &str = "C Major";

/// Musical features of an uploaded track
///
/// Always present in a job result; analysis failures produce one of the
/// fallback records instead of an absent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureRecord {
    /// Tempo in beats per minute
    pub bpm: u32,
    /// Full key name, e.g. "A Minor"
    pub key: String,
    pub mode: KeyMode,
    pub tempo_description: TempoMarking,
    /// RMS energy scaled to 0-100
    pub energy: f64,
    /// Mean spectral centroid in Hz
    pub brightness: f64,
    /// Analyzed duration in seconds
    pub duration: f64,
    /// Onset strength variability, 0-1
    pub rhythm_complexity: f64,
    /// Mean spectral rolloff in Hz
    pub spectral_rolloff: f64,
}

impl AudioFeatureRecord {
    /// Build a record from measured values, deriving key name and tempo marking
    #[allow(clippy::too_many_arguments)]
    pub fn measured(
        bpm: u32,
        tonic: &str,
        mode: KeyMode,
        energy: f64,
        brightness: f64,
        duration: f64,
        rhythm_complexity: f64,
        spectral_rolloff: f64,
    ) -> Self {
        Self {
            bpm,
            key: format!("{} {}", tonic.trim(), mode),
            mode,
            tempo_description: TempoMarking::from_bpm(bpm),
            energy,
            brightness,
            duration,
            rhythm_complexity,
            spectral_rolloff,
        }
    }

    /// Fallback when the analyzer failed to run or produced unusable output
    pub fn fallback() -> Self {
        Self::fallback_with_key(UNKNOWN_KEY)
    }

    /// Fallback when the analyzer reported an error in well-formed output
    pub fn fallback_default_key() -> Self {
        Self::fallback_with_key(DEFAULT_KEY)
    }

    fn fallback_with_key(key: &str) -> Self {
        Self {
            bpm: FALLBACK_BPM,
            key: key.to_string(),
            mode: KeyMode::Major,
            tempo_description: TempoMarking::from_bpm(FALLBACK_BPM),
            energy: FALLBACK_ENERGY,
            brightness: FALLBACK_BRIGHTNESS,
            duration: FALLBACK_DURATION,
            rhythm_complexity: FALLBACK_RHYTHM_COMPLEXITY,
            spectral_rolloff: FALLBACK_SPECTRAL_ROLLOFF,
        }
    }
}
