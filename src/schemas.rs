//! Data schemas for the staking era exporter.
//!
//! Era-scoped data sets as decoded from chain storage, the per-validator
//! record the pipeline emits, and the run metadata saved next to the reports.
//! Addresses are SS58 strings for the network being exported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema version for tracking changes
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Staking era identifier
pub type EraIndex = u32;

// ============================================================================
// Era-indexed data sets
// ============================================================================

/// Reward points earned per validator in one era. Entry order is the
/// on-chain order and defines the era's validator set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraPointsSet {
    pub era: EraIndex,
    pub total: u32,
    pub individual: Vec<(String, u32)>,
}

/// Commission preferences declared by validators for one era
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorPreferences {
    /// Parts per billion
    pub commission: u32,
    pub blocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraPreferencesSet {
    pub era: EraIndex,
    pub validators: HashMap<String, ValidatorPreferences>,
}

/// One slash applied to a validator in an era
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRecord {
    /// Slashed fraction, parts per billion
    pub fraction: u32,
    pub amount: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraSlashesSet {
    pub era: EraIndex,
    pub validators: HashMap<String, Vec<SlashRecord>>,
}

/// Stake backing one validator in one era
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exposure {
    pub own: u128,
    pub total: u128,
    /// `(nominator address, amount)` in on-chain order
    pub others: Vec<(String, u128)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraExposureSet {
    pub era: EraIndex,
    pub validators: HashMap<String, Exposure>,
}

/// Any era-scoped data set; lets the fetcher correlate responses by era
pub trait EraScoped {
    fn era(&self) -> EraIndex;
}

macro_rules! impl_era_scoped {
    ($($set:ty),*) => {
        $(impl EraScoped for $set {
            fn era(&self) -> EraIndex {
                self.era
            }
        })*
    };
}

impl_era_scoped!(EraPointsSet, EraPreferencesSet, EraSlashesSet, EraExposureSet);

// ============================================================================
// Per-account data
// ============================================================================

/// On-chain identity names of an account. `display_parent` is set when the
/// account is a sub-identity of another account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub display: Option<String>,
    pub display_parent: Option<String>,
}

// ============================================================================
// Output record
// ============================================================================

/// One validator's stats for one era, as written to a CSV row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatorEraRecord {
    pub era: EraIndex,
    pub validator_address: String,
    /// Empty when the stash has no bonded controller
    pub controller_address: String,
    pub display_name: String,
    pub era_points: u32,
    pub exposure: Exposure,
    /// Parts per billion
    pub commission: u32,
    pub slashes: Vec<SlashRecord>,
}

// ============================================================================
// Metadata Schema
// ============================================================================

/// Run metadata for reproducibility and auditing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Schema version used
    pub schema_version: String,

    /// Exporter run timestamp
    pub run_timestamp: DateTime<Utc>,

    /// Network the reports were taken from
    pub network: String,

    /// Block hash all storage reads were pinned to
    pub at_block: Option<String>,

    /// Eras exported, ascending
    pub eras: Vec<EraIndex>,

    /// Record counts by type
    pub record_counts: RecordCounts,

    /// CSV files written, in era order
    pub files: Vec<String>,

    /// Git commit hash (if available)
    pub git_commit: Option<String>,

    /// Exporter version
    pub exporter_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecordCounts {
    pub eras_written: usize,
    pub validator_rows: usize,
    pub slashed_validators: usize,
}

impl RunMetadata {
    pub fn new(network: &str, at_block: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_timestamp: Utc::now(),
            network: network.to_string(),
            at_block,
            eras: Vec::new(),
            record_counts: RecordCounts::default(),
            files: Vec::new(),
            git_commit: get_git_commit(),
            exporter_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

fn get_git_commit() -> Option<String> {
    std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_report_their_era() {
        let points = EraPointsSet {
            era: 7,
            total: 40,
            individual: vec![("V1".to_string(), 40)],
        };
        let exposure = EraExposureSet {
            era: 8,
            ..Default::default()
        };
        assert_eq!(points.era(), 7);
        assert_eq!(exposure.era(), 8);
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        let mut metadata = RunMetadata::new("kusama", Some("0xabc".to_string()));
        metadata.eras = vec![100, 101];
        metadata.record_counts.validator_rows = 3;
        metadata.save(&path).unwrap();

        let loaded: RunMetadata =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.network, "kusama");
        assert_eq!(loaded.eras, vec![100, 101]);
        assert_eq!(loaded.record_counts.validator_rows, 3);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }
}
