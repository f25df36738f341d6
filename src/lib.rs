//! Staking Era Exporter Library
//!
//! Exports per-era validator staking statistics from Substrate relay chains
//! (Kusama, Polkadot) to CSV, one file per network and era.
//!
//! # Pipeline Stages
//!
//! 1. **Era Selection** ([`select_eras`]): Picks the N most recent completed eras
//! 2. **Era Data** ([`fetch_era_data`]): Fetches points, commissions, slashes and exposures for those eras
//! 3. **Enrichment** ([`enrich_validators`]): Joins each validator with its controller and identity
//! 4. **Export** ([`write_csv`]): Writes `<network>_validators_era_<era>.csv`
//!
//! [`pipeline`] drives the stages; [`chain`] is the node access seam.
//!
//! # Example
//!
//! ```no_run
//! use staking_era_exporter::config::ExporterConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ExporterConfig::load();
//!     let metadata = staking_era_exporter::pipeline::run(&config, "kusama", 4).await?;
//!     println!("Exported eras {:?}", metadata.eras);
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod config;
pub mod enrich_validators;
pub mod fetch_era_data;
pub mod pipeline;
pub mod rpc;
pub mod schemas;
pub mod select_eras;
pub mod ss58;
pub mod storage;
pub mod write_csv;

// Re-export commonly used types
pub use config::ExporterConfig;
pub use pipeline::{Pipeline, PipelineError, PipelineState};
pub use schemas::{RunMetadata, ValidatorEraRecord};
