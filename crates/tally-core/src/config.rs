//! Reconciliation configuration
//!
//! Tolerances, confidence tiers and candidate search bounds used by the
//! match scorer and link selector.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override (`TALLY_RECONCILE_CONFIG`, then
//!    ~/.local/share/tally/config/reconcile.toml)
//! 2. Fall back to embedded defaults (compiled into binary)

use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/reconcile.toml");

/// Environment variable pointing at an override config file
pub const CONFIG_ENV: &str = "TALLY_RECONCILE_CONFIG";

/// Differences below one cent are rounding noise
pub const DEFAULT_EXACT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
/// Any difference of a cent or more is flagged as a mismatch
pub const DEFAULT_MISMATCH_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
/// Linking beyond 10% difference requires force
pub const DEFAULT_REJECT_THRESHOLD_PERCENT: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
pub const DEFAULT_HIGH_MAX_PERCENT: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
pub const DEFAULT_MEDIUM_MAX_PERCENT: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
pub const DEFAULT_WINDOW_DAYS: i64 = 20;
/// 0.10 added to the ranking score per day of distance
pub const DEFAULT_DATE_PENALTY_PER_DAY: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
pub const DEFAULT_MAX_CANDIDATES: usize = 5;
pub const DEFAULT_BILL_CATEGORY: &str = "Credit Card Bill";
pub const DEFAULT_EXPENSE_CATEGORY: &str = "Card Purchases";
pub const DEFAULT_CREDIT_CATEGORY: &str = "Card Credits";
pub const DEFAULT_PAYMENT_MARKER: &str = "pagamento recebido";

/// Reconciliation settings
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// |difference| below this is an exact match
    pub exact_epsilon: Decimal,
    /// |difference| above this flags the link with has_mismatch
    pub mismatch_tolerance: Decimal,
    /// difference_percent above this requires force to link
    pub reject_threshold_percent: Decimal,
    /// Upper bound of the high confidence tier
    pub high_max_percent: Decimal,
    /// Upper bound of the medium confidence tier
    pub medium_max_percent: Decimal,
    /// Candidate bills must be within this many days of the reference date
    pub window_days: i64,
    pub date_penalty_per_day: Decimal,
    pub max_candidates: usize,
    /// Category name marking aggregate bill payments
    pub bill_category: String,
    pub expense_category: String,
    pub credit_category: String,
    /// Lowercase description marker for payment-received lines
    pub payment_marker: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            exact_epsilon: DEFAULT_EXACT_EPSILON,
            mismatch_tolerance: DEFAULT_MISMATCH_TOLERANCE,
            reject_threshold_percent: DEFAULT_REJECT_THRESHOLD_PERCENT,
            high_max_percent: DEFAULT_HIGH_MAX_PERCENT,
            medium_max_percent: DEFAULT_MEDIUM_MAX_PERCENT,
            window_days: DEFAULT_WINDOW_DAYS,
            date_penalty_per_day: DEFAULT_DATE_PENALTY_PER_DAY,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            bill_category: DEFAULT_BILL_CATEGORY.to_string(),
            expense_category: DEFAULT_EXPENSE_CATEGORY.to_string(),
            credit_category: DEFAULT_CREDIT_CATEGORY.to_string(),
            payment_marker: DEFAULT_PAYMENT_MARKER.to_string(),
        }
    }
}

impl ReconcileConfig {
    /// Load from the override locations, falling back to embedded defaults
    pub fn load() -> Result<Self> {
        let override_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(default_config_path);
        load_config(override_path.as_deref())
    }

    /// Load from an explicit file (embedded defaults if it does not exist)
    pub fn from_path(path: &Path) -> Result<Self> {
        load_config(Some(path))
    }

    /// Parse TOML content on top of the built-in defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        parse_config(content)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("reconcile.toml"))
}

fn load_config(override_path: Option<&Path>) -> Result<ReconcileConfig> {
    let content = match override_path {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "Loading reconcile config override");
            fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?
        }
        _ => DEFAULT_CONFIG.to_string(),
    };

    parse_config(&content)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    tolerance: Option<RawTolerance>,
    confidence: Option<RawConfidence>,
    candidates: Option<RawCandidates>,
    categories: Option<RawCategories>,
    statement: Option<RawStatement>,
}

#[derive(Debug, Deserialize)]
struct RawTolerance {
    exact_epsilon: Option<Decimal>,
    mismatch_tolerance: Option<Decimal>,
    reject_threshold_percent: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RawConfidence {
    high_max_percent: Option<Decimal>,
    medium_max_percent: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RawCandidates {
    window_days: Option<i64>,
    date_penalty_per_day: Option<Decimal>,
    max_candidates: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawCategories {
    bill: Option<String>,
    itemized_expense: Option<String>,
    itemized_credit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStatement {
    payment_marker: Option<String>,
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<ReconcileConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let mut config = ReconcileConfig::default();

    if let Some(tolerance) = raw.tolerance {
        if let Some(v) = tolerance.exact_epsilon {
            config.exact_epsilon = v;
        }
        if let Some(v) = tolerance.mismatch_tolerance {
            config.mismatch_tolerance = v;
        }
        if let Some(v) = tolerance.reject_threshold_percent {
            config.reject_threshold_percent = v;
        }
    }

    if let Some(confidence) = raw.confidence {
        if let Some(v) = confidence.high_max_percent {
            config.high_max_percent = v;
        }
        if let Some(v) = confidence.medium_max_percent {
            config.medium_max_percent = v;
        }
    }

    if let Some(candidates) = raw.candidates {
        if let Some(v) = candidates.window_days {
            config.window_days = v;
        }
        if let Some(v) = candidates.date_penalty_per_day {
            config.date_penalty_per_day = v;
        }
        if let Some(v) = candidates.max_candidates {
            config.max_candidates = v;
        }
    }

    if let Some(categories) = raw.categories {
        if let Some(v) = categories.bill {
            config.bill_category = v;
        }
        if let Some(v) = categories.itemized_expense {
            config.expense_category = v;
        }
        if let Some(v) = categories.itemized_credit {
            config.credit_category = v;
        }
    }

    if let Some(statement) = raw.statement {
        if let Some(v) = statement.payment_marker {
            config.payment_marker = v.to_lowercase();
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &ReconcileConfig) -> Result<()> {
    if config.high_max_percent > config.medium_max_percent {
        return Err(Error::Config(
            "confidence.high_max_percent must not exceed medium_max_percent".to_string(),
        ));
    }
    if config.window_days < 0 {
        return Err(Error::Config(
            "candidates.window_days must not be negative".to_string(),
        ));
    }
    if config.max_candidates == 0 {
        return Err(Error::Config(
            "candidates.max_candidates must be at least 1".to_string(),
        ));
    }
    if config.payment_marker.trim().is_empty() {
        return Err(Error::Config(
            "statement.payment_marker must not be empty".to_string(),
        ));
    }
    Ok(())
}
