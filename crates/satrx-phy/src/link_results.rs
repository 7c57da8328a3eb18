//! Link-quality tables: (modcod, Es/No) to packet error probability.
//!
//! Tables are built once at configuration time and shared read-only by every
//! carrier (usually behind an `Arc`). Lookups never mutate anything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating link results.
#[derive(Debug, Error)]
pub enum LinkResultsError {
    /// A table has no points.
    #[error("link results for '{modcod}' are empty")]
    Empty {
        /// Modulation and coding id.
        modcod: String,
    },

    /// SNR values are not strictly increasing.
    #[error("link results for '{modcod}': SNR values must be strictly increasing (row {row})")]
    NotIncreasing {
        /// Modulation and coding id.
        modcod: String,
        /// Offending row (0-based).
        row: usize,
    },

    /// An error probability is outside [0, 1] or a value is not finite.
    #[error("link results for '{modcod}': invalid point ({snr_db}, {error_rate}) at row {row}")]
    InvalidPoint {
        /// Modulation and coding id.
        modcod: String,
        /// Offending row (0-based).
        row: usize,
        /// SNR of the point.
        snr_db: f64,
        /// Error probability of the point.
        error_rate: f64,
    },

    /// A text table line could not be parsed.
    #[error("link results for '{modcod}': cannot parse line {line}: '{text}'")]
    Parse {
        /// Modulation and coding id.
        modcod: String,
        /// 1-based line number.
        line: usize,
        /// Line content.
        text: String,
    },

    /// Quantisation step must be positive.
    #[error("SNR quantisation step must be positive, got {0}")]
    InvalidQuantization(f64),

    /// Reading a table file failed.
    #[error("IO error reading link results: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Lookup Table
// ============================================================================

/// One (SNR, error probability) point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkPoint {
    /// Es/No in dB.
    pub snr_db: f64,
    /// Packet error probability at that Es/No.
    pub error_rate: f64,
}

/// Error-rate curve of a single modulation and coding.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    points: Vec<LinkPoint>,
}

impl LookupTable {
    /// Build a table from points, validating ordering and ranges.
    pub fn new(modcod: &str, points: Vec<LinkPoint>) -> Result<Self, LinkResultsError> {
        if points.is_empty() {
            return Err(LinkResultsError::Empty {
                modcod: modcod.to_string(),
            });
        }
        for (row, p) in points.iter().enumerate() {
            if !p.snr_db.is_finite() || !(0.0..=1.0).contains(&p.error_rate) {
                return Err(LinkResultsError::InvalidPoint {
                    modcod: modcod.to_string(),
                    row,
                    snr_db: p.snr_db,
                    error_rate: p.error_rate,
                });
            }
            if row > 0 && p.snr_db <= points[row - 1].snr_db {
                return Err(LinkResultsError::NotIncreasing {
                    modcod: modcod.to_string(),
                    row,
                });
            }
        }
        Ok(LookupTable { points })
    }

    /// Parse a whitespace-separated text table.
    ///
    /// Each non-empty line holds `snr_db error_rate`. Lines starting with `#`
    /// or `%` are comments.
    pub fn from_text(modcod: &str, text: &str) -> Result<Self, LinkResultsError> {
        let mut points = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            let parse_err = || LinkResultsError::Parse {
                modcod: modcod.to_string(),
                line: idx + 1,
                text: raw.to_string(),
            };
            let mut cols = line.split_whitespace();
            let snr_db: f64 = cols
                .next()
                .and_then(|c| c.parse().ok())
                .ok_or_else(parse_err)?;
            let error_rate: f64 = cols
                .next()
                .and_then(|c| c.parse().ok())
                .ok_or_else(parse_err)?;
            points.push(LinkPoint { snr_db, error_rate });
        }
        Self::new(modcod, points)
    }

    /// Load a text table from a file.
    pub fn load(modcod: &str, path: &Path) -> Result<Self, LinkResultsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(modcod, &text)
    }

    /// Error probability at the given Es/No (dB).
    ///
    /// Below the first point the burst always fails. At or above the last
    /// point the table's best error rate applies. In between, the curve is
    /// interpolated linearly.
    pub fn error_rate(&self, snr_db: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if snr_db.is_nan() || snr_db < first.snr_db {
            return 1.0;
        }
        if snr_db >= last.snr_db {
            return last.error_rate;
        }
        // First point strictly above snr_db; exists because snr_db < last.snr_db.
        let upper = self.points.partition_point(|p| p.snr_db <= snr_db);
        let lo = self.points[upper - 1];
        let hi = self.points[upper];
        let t = (snr_db - lo.snr_db) / (hi.snr_db - lo.snr_db);
        (lo.error_rate + t * (hi.error_rate - lo.error_rate)).clamp(0.0, 1.0)
    }

    /// The table's points.
    pub fn points(&self) -> &[LinkPoint] {
        &self.points
    }
}

// ============================================================================
// Link Results
// ============================================================================

/// All error-rate curves known to the simulation, keyed by modcod.
#[derive(Debug, Clone, Default)]
pub struct LinkResults {
    tables: BTreeMap<String, LookupTable>,
    quantization_db: Option<f64>,
}

impl LinkResults {
    /// Create an empty set of link results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Floor Es/No values to a grid before lookup.
    pub fn with_quantization(mut self, step_db: f64) -> Result<Self, LinkResultsError> {
        if !(step_db > 0.0) || !step_db.is_finite() {
            return Err(LinkResultsError::InvalidQuantization(step_db));
        }
        self.quantization_db = Some(step_db);
        Ok(self)
    }

    /// Add or replace the curve of one modcod.
    pub fn insert(&mut self, modcod: impl Into<String>, table: LookupTable) {
        self.tables.insert(modcod.into(), table);
    }

    /// Check whether a modcod has a curve.
    pub fn contains(&self, modcod: &str) -> bool {
        self.tables.contains_key(modcod)
    }

    /// Get the curve of a modcod.
    pub fn table(&self, modcod: &str) -> Option<&LookupTable> {
        self.tables.get(modcod)
    }

    /// Known modcods in sorted order.
    pub fn modcods(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    /// Apply the configured quantisation to an Es/No value.
    pub fn quantize(&self, snr_db: f64) -> f64 {
        match self.quantization_db {
            Some(step) if snr_db.is_finite() => (snr_db / step).floor() * step,
            _ => snr_db,
        }
    }

    /// Error probability for a modcod at the given Es/No (dB).
    ///
    /// Returns `None` when the modcod is unknown.
    pub fn error_rate(&self, modcod: &str, snr_db: f64) -> Option<f64> {
        let table = self.tables.get(modcod)?;
        Some(table.error_rate(self.quantize(snr_db)))
    }
}

// ============================================================================
// Error Model
// ============================================================================

/// Per-carrier choice of how error probabilities are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorModel {
    /// Look up the link-quality table.
    #[default]
    LinkResults,
    /// Fixed error probability.
    Constant {
        /// Error probability in [0, 1].
        rate: f64,
    },
    /// Never fail.
    None,
}

impl ErrorModel {
    /// Error probability for a burst, or `None` if the modcod is unknown.
    pub fn error_rate(&self, results: &LinkResults, modcod: &str, snr_db: f64) -> Option<f64> {
        match self {
            ErrorModel::LinkResults => results.error_rate(modcod, snr_db),
            ErrorModel::Constant { rate } => Some(rate.clamp(0.0, 1.0)),
            ErrorModel::None => Some(0.0),
        }
    }

    /// Whether bursts of this modcod can be judged at all.
    pub fn supports(&self, results: &LinkResults, modcod: &str) -> bool {
        match self {
            ErrorModel::LinkResults => results.contains(modcod),
            _ => true,
        }
    }
}
