#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runs ingestion, enrichment, and statistics collection as one pipeline.
//!
//! [`PipelineCoordinator::run`] processes one file through three steps:
//!
//! 1. **Ingest** (fatal): import the file. If it cannot be read, or it has
//!    features and none of them load, the run stops as
//!    [`RunState::Aborted`].
//! 2. **Enrich** (optional): predict a risk score for every feature the
//!    ingest step created and store it on the record. Only runs with an
//!    [`Enricher`] configured and `make_predictions` enabled. A failure is
//!    recorded and the run continues.
//! 3. **Collect statistics**: snapshot the store.
//!
//! Every run yields a [`PipelineRunReport`]; step failures are recorded in
//! it rather than returned as errors.

pub mod config;
pub mod enricher;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use hazard_map_database::{FeatureStore, StoreError};
use hazard_map_ingest::{CancellationToken, IngestError, Ingestor, ProgressCallback};
use hazard_map_ingest_models::IncrementalUpdateResult;
use hazard_map_pipeline_models::{
    BatchReport, BatchSummary, PipelineHistoryReport, PipelineRunReport, RunState, StepMetrics,
    StepName, StepOutcome,
};

pub use config::PipelineConfig;
pub use enricher::{EnrichError, Enricher};

/// Errors that prevent a pipeline from starting or finishing its
/// bookkeeping. Step failures are reported in [`PipelineRunReport`]
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A file or directory could not be ingested at all.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// The store could not be opened or queried.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The configuration file is not valid TOML for [`PipelineConfig`].
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A configuration or report file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The history report could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking enrichment task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Counters from one enrichment pass.
#[derive(Debug, Default)]
struct EnrichCounts {
    attempted: usize,
    annotated: usize,
    failed: usize,
    first_error: Option<String>,
}

/// Chains ingestion, enrichment, and statistics over one store.
pub struct PipelineCoordinator {
    ingestor: Ingestor,
    enricher: Option<Arc<dyn Enricher>>,
    config: PipelineConfig,
    history: Vec<PipelineRunReport>,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("ingestor", &self.ingestor)
            .field("has_enricher", &self.enricher.is_some())
            .field("config", &self.config)
            .field("runs", &self.history.len())
            .finish()
    }
}

impl PipelineCoordinator {
    /// Creates a coordinator over an already opened store.
    #[must_use]
    pub fn new(store: FeatureStore, config: PipelineConfig) -> Self {
        Self {
            ingestor: Ingestor::new(store, config.ingest.clone()),
            enricher: None,
            config,
            history: Vec::new(),
        }
    }

    /// Opens the store at `config.database_path`, creating its directory
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the directory cannot be created or the
    /// store cannot be opened.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        if let Some(parent) = config.database_path.parent() {
            hazard_map_database::paths::ensure_dir(parent)?;
        }
        let store = FeatureStore::open(&config.database_path)?;
        log::info!("Opened feature store at {}", config.database_path.display());

        Ok(Self::new(store, config))
    }

    /// Uses `enricher` for the enrichment step.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Uses `cancel` to stop ingestion and directory runs early.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.ingestor = self.ingestor.with_cancellation(cancel);
        self
    }

    /// Reports ingestion progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.ingestor = self.ingestor.with_progress(progress);
        self
    }

    /// The root store session.
    #[must_use]
    pub const fn store(&self) -> &FeatureStore {
        self.ingestor.store()
    }

    /// The ingestor the ingest step and directory runs go through.
    #[must_use]
    pub const fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reports of every run so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[PipelineRunReport] {
        &self.history
    }

    /// Releases the coordinator and returns its store session.
    #[must_use]
    pub fn into_store(self) -> FeatureStore {
        self.ingestor.into_store()
    }

    /// Runs the full pipeline for one file.
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, path: &Path) -> PipelineRunReport {
        let mut report = PipelineRunReport::new(path.display().to_string());
        log::info!("Pipeline run for {}", report.input);

        advance(&mut report, RunState::Ingesting);
        let created_ids = match self.ingestor.import_file(path, self.config.year).await {
            Ok(result) => {
                let metrics = StepMetrics::Ingest {
                    total: result.total,
                    loaded: result.loaded,
                    failed: result.failed,
                };
                if result.total > 0 && result.loaded == 0 {
                    report.steps.push(StepOutcome::failed(
                        StepName::Ingest,
                        Some(metrics),
                        format!("No features loaded ({} failed)", result.failed),
                    ));
                    None
                } else {
                    report
                        .steps
                        .push(StepOutcome::succeeded(StepName::Ingest, metrics));
                    Some(result.created_ids)
                }
            }
            Err(e) => {
                report
                    .steps
                    .push(StepOutcome::failed(StepName::Ingest, None, e.to_string()));
                None
            }
        };

        let Some(created_ids) = created_ids else {
            log::warn!("Ingest failed for {}; aborting run", report.input);
            advance(&mut report, RunState::Aborted);
            return self.finish(report);
        };
        advance(&mut report, RunState::Ingested);

        if let Some(enricher) = self.enricher.clone().filter(|_| self.config.make_predictions) {
            advance(&mut report, RunState::Enriching);
            let outcome = self.enrich(enricher, created_ids).await;
            let failed = !outcome.success;
            report.steps.push(outcome);
            advance(
                &mut report,
                if failed {
                    RunState::EnrichFailed
                } else {
                    RunState::Enriched
                },
            );
        }

        advance(&mut report, RunState::CollectingStats);
        match self.store().statistics() {
            Ok(statistics) => {
                report.statistics = Some(statistics.clone());
                report.steps.push(StepOutcome::succeeded(
                    StepName::CollectStatistics,
                    StepMetrics::CollectStatistics(statistics),
                ));
            }
            Err(e) => {
                log::warn!("Failed to collect statistics: {e}");
                report.steps.push(StepOutcome::failed(
                    StepName::CollectStatistics,
                    None,
                    e.to_string(),
                ));
            }
        }

        advance(&mut report, RunState::Completed);
        self.finish(report)
    }

    /// Predicts and stores a risk score for each id on a blocking worker
    /// with its own store session.
    #[allow(clippy::future_not_send)]
    async fn enrich(&self, enricher: Arc<dyn Enricher>, ids: Vec<i64>) -> StepOutcome {
        let store = match self.store().try_clone() {
            Ok(store) => store,
            Err(e) => return StepOutcome::failed(StepName::Enrich, None, e.to_string()),
        };

        let joined = tokio::task::spawn_blocking(move || {
            let mut counts = EnrichCounts::default();
            for id in ids {
                counts.attempted += 1;
                let result = store
                    .get_by_id(id)
                    .map_err(|e| e.to_string())
                    .and_then(|feature| {
                        enricher
                            .predict(&feature.attributes)
                            .map_err(|e| e.to_string())
                    })
                    .and_then(|prediction| {
                        store
                            .annotate_prediction(id, &prediction)
                            .map_err(|e| e.to_string())
                    });

                match result {
                    Ok(_) => counts.annotated += 1,
                    Err(e) => {
                        log::warn!("Enrichment failed for feature {id}: {e}");
                        counts.failed += 1;
                        counts
                            .first_error
                            .get_or_insert_with(|| format!("Feature {id}: {e}"));
                    }
                }
            }
            counts
        })
        .await;

        let counts = match joined {
            Ok(counts) => counts,
            Err(e) => return StepOutcome::failed(StepName::Enrich, None, e.to_string()),
        };

        log::info!(
            "Enriched {}/{} features",
            counts.annotated,
            counts.attempted
        );

        let metrics = StepMetrics::Enrich {
            attempted: counts.attempted,
            annotated: counts.annotated,
            failed: counts.failed,
        };

        match counts.first_error {
            None => StepOutcome::succeeded(StepName::Enrich, metrics),
            Some(first) => StepOutcome::failed(
                StepName::Enrich,
                Some(metrics),
                format!("{} prediction(s) failed; first: {first}", counts.failed),
            ),
        }
    }

    fn finish(&mut self, mut report: PipelineRunReport) -> PipelineRunReport {
        report.finish();
        log::info!(
            "Pipeline run for {} finished as {} in {:.2}s",
            report.input,
            report.state,
            report.elapsed_seconds
        );
        self.history.push(report.clone());
        report
    }

    /// Runs the pipeline for every matching file under `dir`, in sorted
    /// path order. Cancellation is checked between files.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the directory cannot be scanned.
    #[allow(clippy::future_not_send)]
    pub async fn batch_process_directory(&mut self, dir: &Path) -> Result<BatchReport, PipelineError> {
        let files = hazard_map_ingest::discover::discover_files(dir, &self.config.ingest.file_suffix)?;
        log::info!("Batch processing {} file(s) under {}", files.len(), dir.display());

        let mut batch = BatchReport::default();

        for file in files {
            if self.ingestor.cancellation().is_cancelled() {
                batch.summary.cancelled = true;
                break;
            }

            let report = self.run(&file).await;
            batch.summary.attempted += 1;
            if report.success {
                batch.summary.succeeded += 1;
            } else {
                batch.summary.failed += 1;
            }
            batch.reports.push(report);
        }

        let BatchSummary {
            attempted,
            succeeded,
            failed,
            ..
        } = batch.summary;
        log::info!("Batch complete: {succeeded}/{attempted} succeeded, {failed} failed");

        Ok(batch)
    }

    /// Adds only the features whose name is not already stored.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Ingest`] if the file cannot be read or
    /// decoded.
    #[allow(clippy::future_not_send)]
    pub async fn incremental_update(
        &self,
        path: &Path,
    ) -> Result<IncrementalUpdateResult, PipelineError> {
        Ok(self
            .ingestor
            .incremental_update(path, self.config.year)
            .await?)
    }

    /// Builds a report of every run so far with a fresh statistics
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if statistics cannot be collected.
    pub fn history_report(&self) -> Result<PipelineHistoryReport, PipelineError> {
        Ok(PipelineHistoryReport {
            generated_at: Utc::now(),
            database_statistics: self.store().statistics()?,
            pipeline_runs: self.history.clone(),
        })
    }

    /// Writes [`Self::history_report`] as pretty JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if statistics cannot be collected or the
    /// file cannot be written.
    #[allow(clippy::future_not_send)]
    pub async fn write_history_report(&self, path: &Path) -> Result<PipelineHistoryReport, PipelineError> {
        let report = self.history_report()?;
        tokio::fs::write(path, serde_json::to_string_pretty(&report)?).await?;
        log::info!("Pipeline report written to {}", path.display());
        Ok(report)
    }
}

fn advance(report: &mut PipelineRunReport, next: RunState) {
    debug_assert!(
        report.state.can_transition_to(next),
        "illegal transition {} -> {next}",
        report.state
    );
    log::debug!("{}: {} -> {next}", report.input, report.state);
    report.state = next;
}
