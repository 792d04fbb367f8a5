//! # Temporal Stabilizer
//!
//! Turns noisy per-cycle candidates into a steady reported label.
//!
//! A label becomes *stable* once it repeats within a short window of the
//! retained history. A stable label with enough confidence is *locked* for a
//! tier-dependent time, during which it is reported unconditionally.
//! A single cycle at the high tier locks immediately.
//!
//! All timing uses the caller's clock readings, never cycle counts.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockTier {
    Basic,
    Good,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// History entries older than this are dropped.
    pub retention_ms: u64,
    pub max_entries: usize,
    /// Window in which repeats count towards stability.
    pub stability_window_ms: u64,
    pub min_occurrences: usize,
    pub lock_enabled: bool,
    /// Minimum confidence for a stable label to lock.
    pub lock_threshold: u8,
    pub good_threshold: u8,
    /// High tier, also the instant-lock threshold.
    pub high_threshold: u8,
    pub basic_lock_ms: u64,
    pub good_lock_ms: u64,
    pub high_lock_ms: u64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            retention_ms: 1000,
            max_entries: 6,
            stability_window_ms: 250,
            min_occurrences: 2,
            lock_enabled: true,
            lock_threshold: 75,
            good_threshold: 85,
            high_threshold: 91,
            basic_lock_ms: 2000,
            good_lock_ms: 3000,
            high_lock_ms: 4000,
        }
    }
}

impl StabilizerConfig {
    pub fn tier_for(&self, confidence: u8) -> LockTier {
        if confidence >= self.high_threshold {
            LockTier::High
        } else if confidence >= self.good_threshold {
            LockTier::Good
        } else {
            LockTier::Basic
        }
    }

    pub fn lock_duration(&self, tier: LockTier) -> Duration {
        Duration::from_millis(match tier {
            LockTier::Basic => self.basic_lock_ms,
            LockTier::Good => self.good_lock_ms,
            LockTier::High => self.high_lock_ms,
        })
    }
}

/// One cycle's recognised label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: String,
    pub confidence: u8,
}

impl Candidate {
    pub fn new(label: impl Into<String>, confidence: u8) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// An active lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockState {
    pub label: String,
    pub confidence: u8,
    pub locked_at: Duration,
    pub tier: LockTier,
}

/// What the stabilizer reports for a cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stabilized {
    pub label: Option<String>,
    pub confidence: Option<u8>,
    pub stable: bool,
    pub lock: Option<LockTier>,
}

impl Stabilized {
    fn from_lock(lock: &LockState) -> Self {
        Self {
            label: Some(lock.label.clone()),
            confidence: Some(lock.confidence),
            stable: true,
            lock: Some(lock.tier),
        }
    }

    fn from_stable(stable: Option<&Candidate>) -> Self {
        match stable {
            Some(c) => Self {
                label: Some(c.label.clone()),
                confidence: Some(c.confidence),
                stable: true,
                lock: None,
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    at: Duration,
    label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stabilizer {
    config: StabilizerConfig,
    history: VecDeque<HistoryEntry>,
    stable: Option<Candidate>,
    lock: Option<LockState>,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.max_entries + 1),
            config,
            stable: None,
            lock: None,
        }
    }

    pub fn lock(&self) -> Option<&LockState> {
        self.lock.as_ref()
    }

    /// Feeds one cycle's candidate (or `None`) observed at `now`.
    pub fn update(&mut self, now: Duration, candidate: Option<Candidate>) -> Stabilized {
        self.expire_lock(now);
        if let Some(lock) = &self.lock {
            return Stabilized::from_lock(lock);
        }

        if let Some(c) = &candidate {
            if self.config.lock_enabled && c.confidence >= self.config.high_threshold {
                log::debug!("[STABILIZER] instant lock on {} ({})", c.label, c.confidence);
                self.stable = Some(c.clone());
                return self.engage_lock(c.clone(), now);
            }
        }

        self.history.push_back(HistoryEntry {
            at: now,
            label: candidate.as_ref().map(|c| c.label.clone()),
        });
        self.prune(now);

        let Some(candidate) = candidate else {
            let still_present = self.stable.as_ref().is_some_and(|stable| {
                self.history
                    .iter()
                    .any(|e| e.label.as_deref() == Some(stable.label.as_str()))
            });
            if !still_present {
                self.stable = None;
            }
            return Stabilized::from_stable(self.stable.as_ref());
        };

        let window = Duration::from_millis(self.config.stability_window_ms);
        let repeats = self
            .history
            .iter()
            .filter(|e| {
                e.label.as_deref() == Some(candidate.label.as_str())
                    && now.saturating_sub(e.at) <= window
            })
            .count();

        if repeats >= self.config.min_occurrences {
            log::trace!("[STABILIZER] {} stable ({} repeats)", candidate.label, repeats);
            self.stable = Some(candidate.clone());
            if self.config.lock_enabled && candidate.confidence >= self.config.lock_threshold {
                return self.engage_lock(candidate, now);
            }
        }

        Stabilized::from_stable(self.stable.as_ref())
    }

    /// Reported state without feeding a new cycle.
    pub fn current(&mut self, now: Duration) -> Stabilized {
        self.expire_lock(now);
        match &self.lock {
            Some(lock) => Stabilized::from_lock(lock),
            None => Stabilized::from_stable(self.stable.as_ref()),
        }
    }

    /// A gated (silent) cycle: an active lock survives, anything else is cleared.
    pub fn on_silence(&mut self, now: Duration) -> Stabilized {
        self.expire_lock(now);
        if let Some(lock) = &self.lock {
            return Stabilized::from_lock(lock);
        }
        self.history.clear();
        self.stable = None;
        Stabilized::default()
    }

    /// Whether a high-tier lock is active at `now`.
    pub fn high_locked(&mut self, now: Duration) -> bool {
        self.expire_lock(now);
        self.lock.as_ref().is_some_and(|l| l.tier == LockTier::High)
    }

    /// Drops history, stable label and lock.
    pub fn reset(&mut self) {
        self.history.clear();
        self.stable = None;
        if let Some(lock) = self.lock.take() {
            log::info!("[STABILIZER] lock on {} cancelled", lock.label);
        }
    }

    fn engage_lock(&mut self, candidate: Candidate, now: Duration) -> Stabilized {
        let tier = self.config.tier_for(candidate.confidence);
        log::info!(
            "[STABILIZER] locked {} at {}% ({:?}, {:?})",
            candidate.label,
            candidate.confidence,
            tier,
            self.config.lock_duration(tier)
        );
        let lock = LockState {
            label: candidate.label,
            confidence: candidate.confidence,
            locked_at: now,
            tier,
        };
        let output = Stabilized::from_lock(&lock);
        self.lock = Some(lock);
        output
    }

    fn expire_lock(&mut self, now: Duration) {
        let expired = self.lock.as_ref().is_some_and(|lock| {
            now.saturating_sub(lock.locked_at) >= self.config.lock_duration(lock.tier)
        });
        if expired {
            if let Some(lock) = self.lock.take() {
                log::info!("[STABILIZER] lock on {} released", lock.label);
            }
            self.history.clear();
            self.stable = None;
        }
    }

    fn prune(&mut self, now: Duration) {
        let retention = Duration::from_millis(self.config.retention_ms);
        self.history
            .retain(|e| now.saturating_sub(e.at) < retention);
        while self.history.len() > self.config.max_entries {
            self.history.pop_front();
        }
    }
}
