//! # Musical Tuning Module
//!
//! Equal-temperament note table and pitch-class mapping.
//!
//! ## Features
//! - Tempered note table from C0 to B7 (A4 = 440 Hz)
//! - Nearest-note lookup by absolute frequency error
//! - Pitch-class reduction with flat-to-sharp normalization
//! - Cent deviation calculations
//! - Chord label normalization for host-supplied expected values

use once_cell::sync::Lazy;
use std::fmt;

/// One of the 12 canonical pitch classes, always spelled with sharps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Semitones above C (0-11).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> PitchClass {
        Self::ALL[index % 12]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Pitch class a number of semitones above this one.
    pub fn transpose(self, semitones: usize) -> PitchClass {
        Self::from_index(self.index() + semitones)
    }

    /// Parses a note label in any common spelling.
    ///
    /// Accepts table labels such as `"C4 (Middle C)"` or `"C#4/Db4"` as well as
    /// bare names (`"Bb"`, `"f#"`, `"Eb3"`). The descriptive suffix, the
    /// alternate spelling and the octave digits are stripped, and flats are
    /// mapped to the equivalent sharp.
    ///
    /// # Returns
    /// * `Some(pitch_class)` - The canonical pitch class
    /// * `None` - The label does not start with a note letter
    pub fn parse(label: &str) -> Option<PitchClass> {
        let core = label.split_whitespace().next()?;
        let core = core.split('/').next()?;
        let core: String = core.chars().filter(|c| !c.is_ascii_digit()).collect();

        let mut chars = core.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let natural = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let accidental: i32 = match chars.next() {
            Some('#') | Some('♯') => 1,
            Some('b') | Some('♭') => -1,
            None => 0,
            Some(_) => return None,
        };
        if chars.next().is_some() {
            return None;
        }

        Some(Self::from_index((natural + accidental + 12) as usize))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone)]
pub struct Note {
    /// Table label (e.g., "A4 (Concert Pitch)", "C#3/Db3", "E2")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
    /// Canonical pitch class of the note
    pub pitch_class: PitchClass,
    /// Scientific octave number
    pub octave: i32,
}

const FLAT_NAMES: [Option<&str>; 12] = [
    None,
    Some("Db"),
    None,
    Some("Eb"),
    None,
    None,
    Some("Gb"),
    None,
    Some("Ab"),
    None,
    Some("Bb"),
    None,
];

/// Statically computed tempered notes from C0 to B7.
///
/// Frequencies use equal temperament with A4 = 440 Hz. Labels carry the
/// alternate flat spelling and, for C4 and A4, a descriptive suffix, so every
/// lookup goes through the same normalization as host-supplied labels.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    let mut notes = Vec::with_capacity(96);

    for octave in 0..8 {
        for pitch_class in PitchClass::ALL {
            // Semitones away from A4 (octave 4, index 9)
            let semitones = (octave - 4) * 12 + pitch_class.index() as i32 - 9;
            let frequency = 440.0 * 2.0_f32.powf(semitones as f32 / 12.0);

            let mut name = format!("{}{}", pitch_class, octave);
            if let Some(flat) = FLAT_NAMES[pitch_class.index()] {
                name = format!("{}/{}{}", name, flat, octave);
            }
            match (pitch_class, octave) {
                (PitchClass::C, 4) => name.push_str(" (Middle C)"),
                (PitchClass::A, 4) => name.push_str(" (Concert Pitch)"),
                _ => {}
            }

            notes.push(Note {
                name,
                frequency,
                pitch_class,
                octave,
            });
        }
    }
    notes
});

/// All notes of the tempered table, lowest first.
pub fn notes() -> &'static [Note] {
    &NOTES
}

/// Finds the closest tempered note to a given frequency.
///
/// Searches the whole table for the smallest absolute error in Hz. Non-finite
/// input maps to the lowest table entry rather than panicking.
pub fn find_nearest_note(freq: f32) -> &'static Note {
    let freq = if freq.is_finite() { freq } else { 0.0 };
    NOTES
        .iter()
        .min_by(|a, b| {
            let diff_a = (a.frequency - freq).abs();
            let diff_b = (b.frequency - freq).abs();
            diff_a.total_cmp(&diff_b)
        })
        .unwrap_or(&NOTES[0])
}

/// Maps a frequency to its octave-free, sharp-spelled pitch class.
pub fn pitch_class_of(freq: f32) -> PitchClass {
    let note = find_nearest_note(freq);
    // Goes through the label so table spelling and host spelling share one path.
    PitchClass::parse(&note.name).unwrap_or(note.pitch_class)
}

/// Calculates the deviation from a target frequency in cents.
///
/// * 100 cents = 1 semitone, 1200 cents = 1 octave
/// * Positive values indicate sharpness, negative values indicate flatness
/// * Returns 0.0 when either frequency is not positive
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    if freq <= 0.0 || target_freq <= 0.0 {
        return 0.0;
    }
    let cents = 1200.0 * (freq / target_freq).log2();
    if cents.is_finite() { cents } else { 0.0 }
}

/// Normalizes a chord label to the spelling used by the chord table.
///
/// `"Bb"` becomes `"A#"`, `"Ebm"` becomes `"D#m"`, `"g7"` becomes `"G7"`.
/// Any suffix after the root is kept verbatim.
///
/// # Returns
/// * `None` - The label does not start with a valid root
pub fn normalize_chord_label(label: &str) -> Option<String> {
    let label = label.trim();
    let mut chars = label.char_indices();
    let (_, letter) = chars.next()?;
    let root_len = match chars.next() {
        Some((i, c)) if matches!(c, '#' | 'b' | '♯' | '♭') => i + c.len_utf8(),
        Some((i, _)) => i,
        None => letter.len_utf8(),
    };

    let root = PitchClass::parse(&label[..root_len])?;
    Some(format!("{}{}", root, &label[root_len..]))
}
