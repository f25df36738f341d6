//! Export pipeline driver.
//!
//! Runs `Connecting -> Selecting -> Fetching -> (Enriching -> Writing)* ->
//! Done`, one era at a time in ascending order. Any error moves the pipeline
//! to `Failed` and ends the run; CSVs already written stay on disk. An
//! unknown network name is rejected before a pipeline exists, since there is
//! no network to run it for.

use crate::chain::{ChainClient, ChainError, SubstrateChain};
use crate::config::{ChainConfig, ExporterConfig, ValidationError, MAX_ERAS};
use crate::enrich_validators::enrich_era;
use crate::fetch_era_data::fetch_era_data;
use crate::schemas::{EraIndex, RunMetadata};
use crate::select_eras::EraSelector;
use crate::write_csv::{write_era_csv, CsvExportError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Connecting,
    Selecting,
    Fetching,
    Enriching(EraIndex),
    Writing(EraIndex),
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Connecting => write!(f, "connecting"),
            PipelineState::Selecting => write!(f, "selecting"),
            PipelineState::Fetching => write!(f, "fetching"),
            PipelineState::Enriching(era) => write!(f, "enriching era {}", era),
            PipelineState::Writing(era) => write!(f, "writing era {}", era),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Cannot connect to node: {0}")]
    Connection(#[source] ChainError),

    #[error("Chain query failed: {0}")]
    Query(#[from] ChainError),

    #[error("Report write failed: {0}")]
    Write(#[from] CsvExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives one export run for one network.
pub struct Pipeline<'a> {
    chain: &'a ChainConfig,
    config: &'a ExporterConfig,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(chain: &'a ChainConfig, config: &'a ExporterConfig) -> Self {
        Self {
            chain,
            config,
            state: PipelineState::Connecting,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline {} -> {}", self.state, next);
        self.state = next;
    }

    /// Validate the requested era count against the configured ceiling,
    /// itself capped at [`MAX_ERAS`]. A rejected count fails the pipeline.
    pub fn selector(&mut self, count: u32) -> Result<EraSelector, PipelineError> {
        let ceiling = self.config.max_eras.min(MAX_ERAS);
        EraSelector::new(count, ceiling).map_err(|err| self.fail(err.into()))
    }

    /// Record a failure that happened outside [`Pipeline::export`]
    pub fn fail(&mut self, err: PipelineError) -> PipelineError {
        error!("Export for {} failed while {}: {}", self.chain.name, self.state, err);
        self.transition(PipelineState::Failed);
        err
    }

    /// Export the eras chosen by `selector` through `client`.
    pub async fn export<C: ChainClient + ?Sized>(
        &mut self,
        client: &C,
        selector: EraSelector,
        at_block: Option<String>,
    ) -> Result<RunMetadata, PipelineError> {
        match self.execute(client, selector, at_block).await {
            Ok(metadata) => {
                self.transition(PipelineState::Done);
                Ok(metadata)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn execute<C: ChainClient + ?Sized>(
        &mut self,
        client: &C,
        selector: EraSelector,
        at_block: Option<String>,
    ) -> Result<RunMetadata, PipelineError> {
        self.transition(PipelineState::Selecting);
        let available = client.eras_historic().await?;
        let eras = selector.select(&available);
        if eras.is_empty() {
            warn!("No completed eras available on {}", self.chain.name);
        } else {
            info!(
                "Exporting {} of {} requested eras ({}..={})",
                eras.len(),
                selector.requested(),
                eras[0],
                eras[eras.len() - 1]
            );
        }

        self.transition(PipelineState::Fetching);
        let era_data = fetch_era_data(client, &eras).await?;

        std::fs::create_dir_all(&self.config.export_dir)?;

        let mut metadata = RunMetadata::new(&self.chain.name, at_block);
        for data in &era_data {
            self.transition(PipelineState::Enriching(data.era));
            let records =
                enrich_era(client, self.chain, data, self.config.max_concurrent_lookups).await?;

            self.transition(PipelineState::Writing(data.era));
            let path = write_era_csv(&self.config.export_dir, &self.chain.name, data.era, &records)?;
            info!("Era {} written to {}", data.era, path.display());

            metadata.eras.push(data.era);
            metadata.files.push(file_name(&path));
            metadata.record_counts.eras_written += 1;
            metadata.record_counts.validator_rows += records.len();
            metadata.record_counts.slashed_validators +=
                records.iter().filter(|r| !r.slashes.is_empty()).count();
        }

        let metadata_path = self
            .config
            .export_dir
            .join(format!("{}_run_metadata.json", self.chain.name));
        metadata.save(&metadata_path)?;
        info!("Metadata saved to {:?}", metadata_path);

        Ok(metadata)
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Validate the request, connect to `chain_name` and export its last `count`
/// completed eras. Invalid input is rejected before any network call.
pub async fn run(
    config: &ExporterConfig,
    chain_name: &str,
    count: u32,
) -> Result<RunMetadata, PipelineError> {
    let chain = config.find_chain(chain_name)?;
    let mut pipeline = Pipeline::new(chain, config);
    let selector = pipeline.selector(count)?;

    let client = match SubstrateChain::connect(chain, config).await {
        Ok(client) => client,
        Err(err) => return Err(pipeline.fail(PipelineError::Connection(err))),
    };

    pipeline
        .export(&client, selector, Some(client.at_block().to_string()))
        .await
}

/// Paths of the CSVs a run wrote, resolved against the export directory
pub fn written_files(config: &ExporterConfig, metadata: &RunMetadata) -> Vec<PathBuf> {
    metadata
        .files
        .iter()
        .map(|file| config.export_dir.join(file))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{empty_sets, MockChain};
    use crate::schemas::{Exposure, Identity, ValidatorPreferences};

    fn config(dir: &tempfile::TempDir) -> ExporterConfig {
        ExporterConfig {
            export_dir: dir.path().to_path_buf(),
            ..ExporterConfig::default()
        }
    }

    /// Era 100 on kusama with a single validator V1
    fn kusama_chain() -> MockChain {
        let mut chain = MockChain {
            eras: vec![98, 99, 100],
            ..MockChain::default()
        };
        empty_sets(&mut chain, &[98, 99, 100]);

        let era_100 = 2;
        chain.points[era_100].total = 250;
        chain.points[era_100].individual = vec![("V1".to_string(), 250)];
        chain.preferences[era_100].validators.insert(
            "V1".to_string(),
            ValidatorPreferences {
                commission: 100_000_000,
                blocked: false,
            },
        );
        chain.exposure[era_100].validators.insert(
            "V1".to_string(),
            Exposure {
                own: 1000,
                total: 5000,
                others: vec![("N1".to_string(), 4000)],
            },
        );
        // in exposure but not in points: never reported
        chain.exposure[era_100]
            .validators
            .insert("V9".to_string(), Exposure::default());
        chain
            .controllers
            .insert("V1".to_string(), "C1".to_string());
        chain.identities.insert(
            "V1".to_string(),
            Identity {
                display: Some("Val1".to_string()),
                display_parent: None,
            },
        );
        chain
    }

    #[tokio::test]
    async fn test_end_to_end_single_era() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let kusama = config.find_chain("kusama").unwrap();
        let chain = kusama_chain();

        let mut pipeline = Pipeline::new(kusama, &config);
        let selector = EraSelector::new(1, MAX_ERAS).unwrap();
        let metadata = pipeline.export(&chain, selector, None).await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(metadata.eras, vec![100]);
        assert_eq!(metadata.files, vec!["kusama_validators_era_100.csv"]);
        assert_eq!(metadata.record_counts.validator_rows, 1);

        let contents =
            std::fs::read_to_string(dir.path().join("kusama_validators_era_100.csv")).unwrap();
        assert_eq!(
            contents,
            "era,name,stash_address,controller_address,commission_percent,self_stake,total_stake,num_stakers,era_points\n\
             100,Val1,V1,C1,10.00,1000,5000,1,250\n"
        );
        assert!(!dir.path().join("kusama_validators_era_99.csv").exists());
        assert!(dir.path().join("kusama_run_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_all_selected_eras_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let kusama = config.find_chain("kusama").unwrap();
        let chain = kusama_chain();

        let mut pipeline = Pipeline::new(kusama, &config);
        let selector = EraSelector::new(10, MAX_ERAS).unwrap();
        let metadata = pipeline.export(&chain, selector, None).await.unwrap();

        assert_eq!(metadata.eras, vec![98, 99, 100]);
        let files = written_files(&config, &metadata);
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.exists()));

        // eras without points produce a header-only report
        let era_98 = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(era_98.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let kusama = config.find_chain("kusama").unwrap();
        let chain = kusama_chain();
        let path = dir.path().join("kusama_validators_era_100.csv");

        let selector = EraSelector::new(1, MAX_ERAS).unwrap();
        Pipeline::new(kusama, &config)
            .export(&chain, selector, None)
            .await
            .unwrap();
        let first = std::fs::read(&path).unwrap();

        Pipeline::new(kusama, &config)
            .export(&chain, selector, None)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_run_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let kusama = config.find_chain("kusama").unwrap();
        let mut chain = kusama_chain();
        chain.failing = vec!["V1".to_string()];

        let mut pipeline = Pipeline::new(kusama, &config);
        let selector = EraSelector::new(2, MAX_ERAS).unwrap();
        let err = pipeline.export(&chain, selector, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::Query(ChainError::Lookup(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        // era 99 finished before era 100 failed
        assert!(dir.path().join("kusama_validators_era_99.csv").exists());
        assert!(!dir.path().join("kusama_validators_era_100.csv").exists());
        assert!(!dir.path().join("kusama_run_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_connecting() {
        let config = ExporterConfig::default();

        let err = run(&config, "westend", 1).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::UnknownChain(_))
        ));

        let err = run(&config, "kusama", MAX_ERAS + 1).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::EraCountOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_ceiling_holds_with_larger_configured_max() {
        let mut config = ExporterConfig::default();
        config.max_eras = 200;
        for chain in &mut config.chains {
            chain.rpc_url = Some("http://127.0.0.1:1".to_string());
        }

        let err = run(&config, "kusama", 100).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::EraCountOutOfRange {
                requested: 100,
                max: MAX_ERAS
            })
        ));
    }

    #[test]
    fn test_rejected_count_fails_pipeline() {
        let config = ExporterConfig::default();
        let kusama = config.find_chain("kusama").unwrap();

        let mut pipeline = Pipeline::new(kusama, &config);
        assert!(pipeline.selector(0).is_err());
        assert_eq!(pipeline.state(), PipelineState::Failed);

        let mut pipeline = Pipeline::new(kusama, &config);
        assert_eq!(pipeline.selector(MAX_ERAS).unwrap().requested(), MAX_ERAS);
        assert_eq!(pipeline.state(), PipelineState::Connecting);
    }

    #[tokio::test]
    async fn test_failed_batch_query_fails_run_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let kusama = config.find_chain("kusama").unwrap();
        let mut chain = kusama_chain();
        chain.failing_query = Some("slashes");

        let mut pipeline = Pipeline::new(kusama, &config);
        let selector = EraSelector::new(3, MAX_ERAS).unwrap();
        let err = pipeline.export(&chain, selector, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::Query(ChainError::Lookup(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert_eq!(chain.lookups.load(std::sync::atomic::Ordering::SeqCst), 0);
        for era in [98, 99, 100] {
            assert!(!dir
                .path()
                .join(format!("kusama_validators_era_{}.csv", era))
                .exists());
        }
    }

    #[tokio::test]
    async fn test_no_history_writes_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let polkadot = config.find_chain("polkadot").unwrap();
        let chain = MockChain::default();

        let mut pipeline = Pipeline::new(polkadot, &config);
        let selector = EraSelector::new(3, MAX_ERAS).unwrap();
        let metadata = pipeline.export(&chain, selector, None).await.unwrap();

        assert!(metadata.eras.is_empty());
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(dir.path().join("polkadot_run_metadata.json").exists());
    }
}
