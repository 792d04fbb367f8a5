//! # Chord Recognition Module
//!
//! Template matching of detected pitch classes against a fixed chord table.
//!
//! ## Features
//! - Triads on all 12 roots, dominant and minor sevenths on the natural roots
//! - Major/minor disambiguation from measured third intervals
//! - Score bonuses for guitar voicings (open strings, bass root, open shapes)
//! - Relaxed and root-only fallbacks when no template is convincing

use crate::peaks::{GUITAR_OPEN_STRINGS, Peak};
use crate::tuning::{self, PitchClass};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const MAJOR_THIRD_RATIO: f32 = 1.259_921; // 2^(4/12)
const MINOR_THIRD_RATIO: f32 = 1.189_207; // 2^(3/12)

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThirdType {
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChordQuality {
    Major,
    Minor,
    Dominant7,
    Minor7,
}

impl ChordQuality {
    /// Suffix appended to the root in a chord name.
    pub fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Minor7 => "m7",
        }
    }

    pub fn third_type(self) -> ThirdType {
        match self {
            ChordQuality::Major | ChordQuality::Dominant7 => ThirdType::Major,
            ChordQuality::Minor | ChordQuality::Minor7 => ThirdType::Minor,
        }
    }

    /// Same chord with the opposite third.
    pub fn parallel(self) -> ChordQuality {
        match self {
            ChordQuality::Major => ChordQuality::Minor,
            ChordQuality::Minor => ChordQuality::Major,
            ChordQuality::Dominant7 => ChordQuality::Minor7,
            ChordQuality::Minor7 => ChordQuality::Dominant7,
        }
    }

    /// Semitones above the root: root, third, fifth and optional seventh.
    fn intervals(self) -> &'static [usize] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
        }
    }
}

/// A named chord and its required pitch classes (root, third, fifth, seventh).
#[derive(Debug, Clone, PartialEq)]
pub struct ChordTemplate {
    pub name: String,
    pub root: PitchClass,
    pub quality: ChordQuality,
    pub pitch_classes: Vec<PitchClass>,
}

impl ChordTemplate {
    fn new(root: PitchClass, quality: ChordQuality) -> Self {
        Self {
            name: format!("{}{}", root, quality.suffix()),
            root,
            quality,
            pitch_classes: quality
                .intervals()
                .iter()
                .map(|&semitones| root.transpose(semitones))
                .collect(),
        }
    }

    pub fn third(&self) -> PitchClass {
        self.pitch_classes[1]
    }

    pub fn fifth(&self) -> PitchClass {
        self.pitch_classes[2]
    }

    pub fn contains(&self, pitch_class: PitchClass) -> bool {
        self.pitch_classes.contains(&pitch_class)
    }

    /// Same root, opposite third, if the table has it.
    pub fn parallel(&self) -> Option<&'static ChordTemplate> {
        let quality = self.quality.parallel();
        templates()
            .iter()
            .find(|t| t.root == self.root && t.quality == quality)
    }
}

const NATURAL_ROOTS: [PitchClass; 7] = [
    PitchClass::C,
    PitchClass::D,
    PitchClass::E,
    PitchClass::F,
    PitchClass::G,
    PitchClass::A,
    PitchClass::B,
];

const SHARP_ROOTS: [PitchClass; 5] = [
    PitchClass::CSharp,
    PitchClass::DSharp,
    PitchClass::FSharp,
    PitchClass::GSharp,
    PitchClass::ASharp,
];

/// Triads first (naturals before sharps), then sevenths. Earlier templates
/// win score ties.
static TEMPLATES: Lazy<Vec<ChordTemplate>> = Lazy::new(|| {
    let mut table = Vec::with_capacity(38);
    for roots in [&NATURAL_ROOTS[..], &SHARP_ROOTS[..]] {
        for quality in [ChordQuality::Major, ChordQuality::Minor] {
            table.extend(roots.iter().map(|&root| ChordTemplate::new(root, quality)));
        }
    }
    for quality in [ChordQuality::Dominant7, ChordQuality::Minor7] {
        table.extend(NATURAL_ROOTS.iter().map(|&root| ChordTemplate::new(root, quality)));
    }
    table
});

pub fn templates() -> &'static [ChordTemplate] {
    &TEMPLATES
}

/// Looks a chord up by name in any spelling (`"Bb"` finds `A#`).
pub fn find_template(name: &str) -> Option<&'static ChordTemplate> {
    let name = tuning::normalize_chord_label(name)?;
    templates().iter().find(|t| t.name == name)
}

/// A spectral peak tagged with its pitch class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedNote {
    pub pitch_class: PitchClass,
    pub peak: Peak,
}

/// Maps peaks to pitch classes, keeping their order.
pub fn classify_peaks(peaks: &[Peak]) -> Vec<DetectedNote> {
    peaks
        .iter()
        .filter(|p| p.frequency.is_finite() && p.frequency > 0.0)
        .map(|&peak| DetectedNote {
            pitch_class: tuning::pitch_class_of(peak.frequency),
            peak,
        })
        .collect()
}

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    /// Passed validation and the main acceptance threshold.
    Validated,
    /// Best template of the relaxed pass.
    Relaxed,
    /// Strongest pitch class reported as a major-chord root.
    RootOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChordCandidate {
    pub name: String,
    pub root: PitchClass,
    /// Template pitch classes that were detected.
    pub matched: Vec<PitchClass>,
    /// All detected pitch classes, strongest first.
    pub detected: Vec<PitchClass>,
    pub score: f32,
    /// 0-100.
    pub confidence: u8,
    pub kind: MatchKind,
}

/// Scoring constants of the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig {
    pub min_matches: usize,

    pub validation_base: f32,
    pub root_weight: f32,
    pub third_weight: f32,
    pub fifth_weight: f32,
    pub correct_third_weight: f32,
    pub wrong_third_weight: f32,

    pub third_tolerance: f32,
    pub third_error_weight: f32,
    pub min_third_confidence: f32,
    pub minor_third_bonus: f32,
    pub major_third_bonus: f32,
    pub wrong_third_penalty: f32,
    pub counterpart_penalty: f32,

    pub full_coverage_bonus: f32,
    pub amplitude_weight: f32,
    pub extra_class_penalty: f32,

    pub guitar_bonuses: bool,
    pub open_strings: Vec<f32>,
    pub open_string_tolerance_hz: f32,
    pub open_string_min_strength: f32,
    pub open_string_bonus: f32,
    pub bass_max_freq: f32,
    pub bass_min_strength: f32,
    pub bass_bonus: f32,
    pub open_chord_shapes: Vec<String>,
    pub open_shape_bonus: f32,
    pub guitar_confidence_threshold: f32,
    pub guitar_confidence_bonus: u8,

    pub acceptance_score: f32,
    pub conflict_score_ratio: f32,
    pub conflict_switch_margin: f32,
    pub conflict_keep_margin: f32,
    pub conflict_damping: f32,

    pub relaxed_match_score: f32,
    pub relaxed_root_bonus: f32,
    pub relaxed_acceptance: f32,
    pub root_fallback_confidence: u8,

    pub min_confidence: u8,
    pub max_confidence: u8,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            min_matches: 2,

            validation_base: 40.0,
            root_weight: 25.0,
            third_weight: 25.0,
            fifth_weight: 10.0,
            correct_third_weight: 20.0,
            wrong_third_weight: 10.0,

            third_tolerance: 0.025,
            third_error_weight: 30.0,
            min_third_confidence: 10.0,
            minor_third_bonus: 150.0,
            major_third_bonus: 120.0,
            wrong_third_penalty: 50.0,
            counterpart_penalty: 80.0,

            full_coverage_bonus: 75.0,
            amplitude_weight: 0.5,
            extra_class_penalty: 5.0,

            guitar_bonuses: true,
            open_strings: GUITAR_OPEN_STRINGS.to_vec(),
            open_string_tolerance_hz: 3.0,
            open_string_min_strength: 20.0,
            open_string_bonus: 30.0,
            bass_max_freq: 150.0,
            bass_min_strength: 15.0,
            bass_bonus: 25.0,
            open_chord_shapes: ["E", "A", "D", "G", "C", "Em", "Am", "Dm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            open_shape_bonus: 40.0,
            guitar_confidence_threshold: 50.0,
            guitar_confidence_bonus: 10,

            acceptance_score: 150.0,
            conflict_score_ratio: 0.7,
            conflict_switch_margin: 10.0,
            conflict_keep_margin: 5.0,
            conflict_damping: 30.0,

            relaxed_match_score: 50.0,
            relaxed_root_bonus: 25.0,
            relaxed_acceptance: 100.0,
            root_fallback_confidence: 25,

            min_confidence: 50,
            max_confidence: 95,
        }
    }
}

/// Completeness check of one template.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Validation {
    confidence: f32,
    measured_third: Option<ThirdType>,
}

#[derive(Debug, Clone)]
struct Scored {
    template: &'static ChordTemplate,
    matched: Vec<PitchClass>,
    validation: Validation,
    guitar_bonus: f32,
    score: f32,
}

/// Scores detected notes against the chord table.
#[derive(Debug, Clone)]
pub struct ChordMatcher {
    config: ChordConfig,
}

impl ChordMatcher {
    pub fn new(config: ChordConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    /// Best chord for a set of fundamental peaks, or `None` when there are no peaks.
    pub fn match_peaks(&self, peaks: &[Peak]) -> Option<ChordCandidate> {
        self.match_notes(&classify_peaks(peaks))
    }

    /// Runs the validated pass, then the relaxed pass, then the root fallback.
    pub fn match_notes(&self, notes: &[DetectedNote]) -> Option<ChordCandidate> {
        let detected = distinct_classes(notes);
        if detected.is_empty() {
            return None;
        }

        if let Some(candidate) = self.validated_pass(notes, &detected) {
            return Some(candidate);
        }
        if let Some(candidate) = self.relaxed_pass(notes, &detected) {
            return Some(candidate);
        }

        let root = detected[0];
        log::debug!("[CHORD] falling back to root {}", root);
        Some(ChordCandidate {
            name: root.to_string(),
            root,
            matched: vec![root],
            detected,
            score: 0.0,
            confidence: self.config.root_fallback_confidence,
            kind: MatchKind::RootOnly,
        })
    }

    fn validated_pass(&self, notes: &[DetectedNote], detected: &[PitchClass]) -> Option<ChordCandidate> {
        let mut best: Option<Scored> = None;
        for template in templates() {
            let Some(scored) = self.score_template(template, notes, detected) else {
                continue;
            };
            log::trace!("[CHORD] {} scored {:.1}", template.name, scored.score);
            if best.as_ref().is_none_or(|b| scored.score > b.score) {
                best = Some(scored);
            }
        }

        let mut best = best.filter(|b| b.score > self.config.acceptance_score)?;
        best = self.resolve_conflict(best, notes, detected);

        let mut confidence = score_to_confidence(best.score);
        if best.guitar_bonus > self.config.guitar_confidence_threshold {
            confidence = confidence.saturating_add(self.config.guitar_confidence_bonus);
        }
        let confidence = confidence.clamp(self.config.min_confidence, self.config.max_confidence);
        log::debug!(
            "[CHORD] {} accepted: score {:.1}, confidence {}",
            best.template.name,
            best.score,
            confidence
        );

        Some(ChordCandidate {
            name: best.template.name.clone(),
            root: best.template.root,
            matched: best.matched,
            detected: detected.to_vec(),
            score: best.score,
            confidence,
            kind: MatchKind::Validated,
        })
    }

    /// Checks the winner against its parallel major/minor.
    fn resolve_conflict(&self, best: Scored, notes: &[DetectedNote], detected: &[PitchClass]) -> Scored {
        let cfg = &self.config;
        let Some(counterpart) = best.template.parallel() else {
            return best;
        };
        let Some(other) = self.score_template(counterpart, notes, detected) else {
            return best;
        };
        if other.score <= best.score * cfg.conflict_score_ratio {
            return best;
        }

        let (ours, theirs) = (best.validation.confidence, other.validation.confidence);
        if theirs > ours + cfg.conflict_switch_margin {
            log::debug!(
                "[CHORD] switching {} -> {} (validation {} vs {})",
                best.template.name,
                other.template.name,
                ours,
                theirs
            );
            // The counterpart only had to come close to the winner
            let score = other.score.max(cfg.acceptance_score);
            Scored { score, ..other }
        } else if ours > theirs + cfg.conflict_keep_margin {
            best
        } else {
            log::debug!(
                "[CHORD] {} damped, ambiguous with {}",
                best.template.name,
                other.template.name
            );
            let score = (best.score - cfg.conflict_damping).max(cfg.acceptance_score);
            Scored { score, ..best }
        }
    }

    fn score_template(
        &self,
        template: &'static ChordTemplate,
        notes: &[DetectedNote],
        detected: &[PitchClass],
    ) -> Option<Scored> {
        let cfg = &self.config;
        let matched = matched_classes(template, detected);
        if matched.len() < cfg.min_matches {
            return None;
        }
        let validation = self.validate(template, notes, detected)?;

        let mut score = validation.confidence * 2.0;

        let guitar_bonus = if cfg.guitar_bonuses {
            self.guitar_bonus(template, notes, detected)
        } else {
            0.0
        };
        score += guitar_bonus;

        let expected = template.quality.third_type();
        if let Some(measured) = validation.measured_third {
            score += if measured != expected {
                -cfg.wrong_third_penalty
            } else if expected == ThirdType::Minor {
                cfg.minor_third_bonus
            } else {
                cfg.major_third_bonus
            };

            // The parallel chord's own third fits better than ours
            if let Some(counterpart) = template.parallel() {
                let competes = matched_classes(counterpart, detected).len() >= cfg.min_matches;
                if competes
                    && self.measure_third(template.root, counterpart.third(), notes)
                        == Some(counterpart.quality.third_type())
                {
                    score -= cfg.counterpart_penalty;
                }
            }
        }

        if matched.len() == template.pitch_classes.len() {
            score += cfg.full_coverage_bonus;
        }
        score += self.amplitude_bonus(&matched, notes);

        let extra = detected.iter().filter(|&&pc| !template.contains(pc)).count();
        score -= extra as f32 * cfg.extra_class_penalty;

        Some(Scored {
            template,
            matched,
            validation,
            guitar_bonus,
            score,
        })
    }

    /// Base confidence from which chord tones are present. `None` when neither
    /// the root nor the third is.
    fn validate(
        &self,
        template: &ChordTemplate,
        notes: &[DetectedNote],
        detected: &[PitchClass],
    ) -> Option<Validation> {
        let cfg = &self.config;
        let has_root = detected.contains(&template.root);
        let has_third = detected.contains(&template.third());
        let has_fifth = detected.contains(&template.fifth());
        if !has_root && !has_third {
            return None;
        }

        let measured_third = if has_root && has_third {
            self.measure_third(template.root, template.third(), notes)
        } else {
            None
        };
        let third_ok = measured_third.is_none_or(|t| t == template.quality.third_type());

        let mut confidence = cfg.validation_base;
        if has_root {
            confidence += cfg.root_weight;
        }
        if has_third {
            confidence += cfg.third_weight;
        }
        if has_fifth {
            confidence += cfg.fifth_weight;
        }
        if third_ok {
            confidence += cfg.correct_third_weight;
        } else {
            confidence -= cfg.wrong_third_weight;
        }

        Some(Validation {
            confidence,
            measured_third,
        })
    }

    /// Classifies the interval between detected root and third peaks.
    ///
    /// Every pairing of a root peak with a third peak is folded into one
    /// octave above the root and compared with the tempered major and minor
    /// third ratios. Each match is weighted by the pair's mean strength.
    ///
    /// # Returns
    /// * `Some(third)` - The best weighted classification, if above the minimum
    /// * `None` - No pair lies close enough to either ratio
    pub fn measure_third(
        &self,
        root: PitchClass,
        third: PitchClass,
        notes: &[DetectedNote],
    ) -> Option<ThirdType> {
        let cfg = &self.config;
        let mut best: Option<(ThirdType, f32)> = None;

        for r in notes.iter().filter(|n| n.pitch_class == root) {
            for t in notes.iter().filter(|n| n.pitch_class == third) {
                let base = r.peak.frequency;
                let mut upper = t.peak.frequency;
                if base <= 0.0 || upper <= 0.0 {
                    continue;
                }
                while upper < base {
                    upper *= 2.0;
                }
                while upper > base * 2.0 {
                    upper /= 2.0;
                }
                let ratio = upper / base;
                let combined = (r.peak.strength() + t.peak.strength()) / 2.0;

                for (kind, target) in [
                    (ThirdType::Major, MAJOR_THIRD_RATIO),
                    (ThirdType::Minor, MINOR_THIRD_RATIO),
                ] {
                    let diff = (ratio - target).abs();
                    if diff >= cfg.third_tolerance {
                        continue;
                    }
                    let confidence = combined * (1.0 - diff * cfg.third_error_weight);
                    if best.is_none_or(|(_, c)| confidence > c) {
                        best = Some((kind, confidence));
                    }
                }
            }
        }

        best.filter(|&(_, c)| c > cfg.min_third_confidence)
            .map(|(kind, _)| kind)
    }

    fn guitar_bonus(&self, template: &ChordTemplate, notes: &[DetectedNote], detected: &[PitchClass]) -> f32 {
        let cfg = &self.config;
        let mut bonus = 0.0;

        // Open strings that are chord tones and ring in the spectrum
        for &open in &cfg.open_strings {
            if !template.contains(tuning::pitch_class_of(open)) {
                continue;
            }
            let rings = notes.iter().any(|n| {
                (n.peak.frequency - open).abs() < cfg.open_string_tolerance_hz
                    && n.peak.strength() > cfg.open_string_min_strength
            });
            if rings {
                bonus += cfg.open_string_bonus;
            }
        }

        // Root in the bass register
        if notes.iter().any(|n| {
            n.pitch_class == template.root
                && n.peak.frequency < cfg.bass_max_freq
                && n.peak.strength() > cfg.bass_min_strength
        }) {
            bonus += cfg.bass_bonus;
        }

        // Complete open-position shape
        if cfg.open_chord_shapes.iter().any(|shape| *shape == template.name)
            && template.pitch_classes.iter().all(|pc| detected.contains(pc))
        {
            bonus += cfg.open_shape_bonus;
        }

        bonus
    }

    fn amplitude_bonus(&self, matched: &[PitchClass], notes: &[DetectedNote]) -> f32 {
        notes
            .iter()
            .filter(|n| matched.contains(&n.pitch_class))
            .map(|n| n.peak.strength() * self.config.amplitude_weight)
            .sum()
    }

    fn relaxed_pass(&self, notes: &[DetectedNote], detected: &[PitchClass]) -> Option<ChordCandidate> {
        let cfg = &self.config;
        let mut best: Option<(&'static ChordTemplate, Vec<PitchClass>, f32)> = None;

        for template in templates() {
            let matched = matched_classes(template, detected);
            if matched.is_empty() {
                continue;
            }
            let mut score = matched.len() as f32 * cfg.relaxed_match_score;
            if matched.contains(&template.root) {
                score += cfg.relaxed_root_bonus;
            }
            score += self.amplitude_bonus(&matched, notes);
            if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
                best = Some((template, matched, score));
            }
        }

        let (template, matched, score) = best.filter(|(_, _, s)| *s > cfg.relaxed_acceptance)?;
        let confidence = if score >= 150.0 {
            (50.0 + ((score - 150.0) / 10.0).round()).min(70.0)
        } else {
            (40.0 + ((score - 100.0) / 5.0).round()).min(60.0)
        };
        let confidence = confidence.clamp(0.0, 100.0) as u8;
        log::debug!(
            "[CHORD] relaxed match {}: score {:.1}, confidence {}",
            template.name,
            score,
            confidence
        );

        Some(ChordCandidate {
            name: template.name.clone(),
            root: template.root,
            matched,
            detected: detected.to_vec(),
            score,
            confidence,
            kind: MatchKind::Relaxed,
        })
    }
}

/// Maps a validated score to a confidence percentage before clamping.
fn score_to_confidence(score: f32) -> u8 {
    let confidence = if score >= 400.0 {
        (80.0 + ((score - 400.0) / 20.0).round()).min(95.0)
    } else if score >= 300.0 {
        (70.0 + ((score - 300.0) / 10.0).round()).min(85.0)
    } else if score >= 200.0 {
        (60.0 + ((score - 200.0) / 8.0).round()).min(75.0)
    } else {
        (50.0 + ((score - 150.0) / 5.0).round()).min(65.0)
    };
    confidence.clamp(0.0, 100.0) as u8
}

fn distinct_classes(notes: &[DetectedNote]) -> Vec<PitchClass> {
    let mut classes = Vec::new();
    for note in notes {
        if !classes.contains(&note.pitch_class) {
            classes.push(note.pitch_class);
        }
    }
    classes
}

fn matched_classes(template: &ChordTemplate, detected: &[PitchClass]) -> Vec<PitchClass> {
    template
        .pitch_classes
        .iter()
        .copied()
        .filter(|pc| detected.contains(pc))
        .collect()
}
