#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `GeoJSON` ingestion into the feature store.
//!
//! The [`Ingestor`] reads and decodes a file, then creates one feature per
//! document element. Elements are processed in batches; within a batch they
//! are spread across several independent store sessions running on
//! blocking tasks. Every element gets its own result, so a malformed
//! feature or a rejected geometry is recorded and the rest of the file
//! still loads.

pub mod discover;
pub mod progress;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use hazard_map_database::{FeatureStore, RetryPolicy, StoreError};
use hazard_map_database_models::{FeatureInput, Provenance};
use hazard_map_decoder::{DecodeError, DecodedDocument};
use hazard_map_ingest_models::{
    DirectoryImportSummary, FileImportOutcome, ImportResult, IncrementalUpdateResult,
    IngestConfig, ItemError, ItemErrorKind,
};

pub use progress::{LogProgress, NullProgress, ProgressCallback, null_progress};
pub use tokio_util::sync::CancellationToken;

/// Errors that fail a whole file or directory import.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The file or directory could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not a usable `GeoJSON` document.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The store could not be reached.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A blocking worker task failed.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of one element handled by a worker.
type ItemOutcome = (usize, Result<i64, ItemError>);

/// Imports `GeoJSON` files into a [`FeatureStore`].
pub struct Ingestor {
    store: FeatureStore,
    config: IngestConfig,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressCallback>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Creates an ingestor writing through `store`. Worker sessions are
    /// cloned from it.
    #[must_use]
    pub fn new(store: FeatureStore, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
            progress: null_progress(),
        }
    }

    /// Stops work once `cancel` is cancelled. Items in flight finish;
    /// nothing further starts.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reports progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The root store session.
    #[must_use]
    pub const fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// The cancellation token checked by this ingestor.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Releases the ingestor and returns its store session.
    #[must_use]
    pub fn into_store(self) -> FeatureStore {
        self.store
    }

    /// Imports one file.
    ///
    /// The provenance year is `year_override` if given, else the first
    /// four-digit path component. Element failures are collected in the
    /// result; they never fail the import.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the file cannot be read or decoded, or a
    /// worker session cannot be opened.
    #[allow(clippy::future_not_send)]
    pub async fn import_file(
        &self,
        path: &Path,
        year_override: Option<i32>,
    ) -> Result<ImportResult, IngestError> {
        let started = Instant::now();
        let source_info = hazard_map_decoder::source_info(path);
        let year = year_override.or(source_info.year);

        let text = tokio::fs::read_to_string(path).await?;
        let document = hazard_map_decoder::decode_document(&text)?;
        let total = document.len();

        log::info!("Importing {} ({total} features)", path.display());
        self.progress.set_total(total as u64);
        self.progress
            .set_message(format!("Importing {}", source_info.filename));

        let provenance = Provenance {
            source_file: Some(source_info.filename.clone()),
            year,
        };

        let (mut outcomes, cancelled) = self.process_batches(document, &provenance).await?;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut created_ids = Vec::new();
        let mut errors = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                Ok(id) => created_ids.push(id),
                Err(e) => errors.push(e),
            }
        }

        let spatial_index_error = self.ensure_spatial_index().await;

        let loaded = created_ids.len();
        let failed = errors.len();

        if failed > 0 {
            log::warn!(
                "{}: {failed} of {total} features failed",
                source_info.filename
            );
            for e in errors.iter().take(self.config.error_sample_size) {
                log::warn!("  {e}");
            }
        }
        errors.truncate(self.config.error_sample_size);

        let elapsed = started.elapsed();
        let summary = format!(
            "{}: loaded {loaded}/{total} features in {:.2}s{}",
            source_info.filename,
            elapsed.as_secs_f64(),
            if cancelled { " (cancelled)" } else { "" }
        );
        log::info!("{summary}");
        self.progress.finish(summary);

        Ok(ImportResult {
            file: path.to_path_buf(),
            source_info,
            year,
            total,
            loaded,
            failed,
            errors,
            created_ids,
            elapsed,
            cancelled,
            spatial_index_error,
        })
    }

    /// Records the spatial index on a blocking task, retrying transient
    /// errors. Features are already committed when this runs, so a failure
    /// is logged and returned as a message rather than failing the import.
    #[allow(clippy::future_not_send)]
    async fn ensure_spatial_index(&self) -> Option<String> {
        let outcome = match self.store.try_clone() {
            Ok(store) => {
                let retry = self.config.retry;
                tokio::task::spawn_blocking(move || retry.run(|| store.ensure_spatial_index()))
                    .await
                    .map_err(IngestError::from)
                    .and_then(|r| r.map_err(IngestError::from))
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to record spatial index: {e}");
                Some(e.to_string())
            }
        }
    }

    /// Runs every batch of a document. Returns the outcomes of every
    /// element that was attempted and whether cancellation stopped the run.
    #[allow(clippy::future_not_send)]
    async fn process_batches(
        &self,
        document: DecodedDocument,
        provenance: &Provenance,
    ) -> Result<(Vec<ItemOutcome>, bool), IngestError> {
        let batch_size = self.config.batch_size.max(1);
        let total = document.len();
        let mut outcomes: Vec<ItemOutcome> = Vec::with_capacity(document.len());
        let mut items = document.items.into_iter().enumerate().peekable();
        let mut batch_number = 0usize;

        while items.peek().is_some() {
            if self.cancel.is_cancelled() {
                log::info!("Import cancelled after {} features", outcomes.len());
                return Ok((outcomes, true));
            }

            batch_number += 1;
            let mut pending: Vec<(usize, FeatureInput)> = Vec::new();

            for (index, item) in items.by_ref().take(batch_size) {
                match item {
                    Ok(input) => pending.push((index, input)),
                    Err(e) => {
                        self.progress.inc(1);
                        outcomes.push((
                            index,
                            Err(ItemError {
                                index,
                                feature_id: None,
                                kind: ItemErrorKind::Structural,
                                message: e.to_string(),
                            }),
                        ));
                    }
                }
            }

            log::debug!(
                "Batch {batch_number}: dispatching {} features",
                pending.len()
            );
            outcomes.extend(self.create_batch(pending, provenance).await?);
        }

        // A cancel that lands after the last item skipped nothing.
        let cancelled = outcomes.len() < total;
        Ok((outcomes, cancelled))
    }

    /// Creates one batch of features across the configured number of
    /// worker sessions.
    #[allow(clippy::future_not_send)]
    async fn create_batch(
        &self,
        pending: Vec<(usize, FeatureInput)>,
        provenance: &Provenance,
    ) -> Result<Vec<ItemOutcome>, IngestError> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.config.workers.clamp(1, pending.len());
        let mut chunks: Vec<Vec<(usize, FeatureInput)>> = (0..workers).map(|_| Vec::new()).collect();
        for (i, item) in pending.into_iter().enumerate() {
            chunks[i % workers].push(item);
        }

        let mut handles = Vec::with_capacity(workers);
        for chunk in chunks {
            let labels: Vec<(usize, Option<String>)> = chunk
                .iter()
                .map(|(index, input)| (*index, Some(input.label())))
                .collect();
            let worker = Worker {
                store: self.store.try_clone()?,
                provenance: provenance.clone(),
                retry: self.config.retry,
                cancel: self.cancel.clone(),
                progress: Arc::clone(&self.progress),
            };
            handles.push((
                labels,
                tokio::task::spawn_blocking(move || worker.create_all(chunk)),
            ));
        }

        let (labels, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut outcomes = Vec::new();
        for (labels, result) in labels.into_iter().zip(results) {
            match result {
                Ok(chunk_outcomes) => outcomes.extend(chunk_outcomes),
                Err(e) => {
                    // A worker that died takes its whole chunk with it.
                    log::warn!("Ingest worker failed: {e}");
                    outcomes.extend(labels.into_iter().map(|(index, feature_id)| {
                        (
                            index,
                            Err(ItemError {
                                index,
                                feature_id,
                                kind: ItemErrorKind::Persistence,
                                message: format!("worker task failed: {e}"),
                            }),
                        )
                    }));
                }
            }
        }

        Ok(outcomes)
    }

    /// Imports every file under `dir` whose name ends with the configured
    /// suffix, in sorted path order. A file that cannot be imported is
    /// recorded and the run continues.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the directory cannot be scanned.
    #[allow(clippy::future_not_send)]
    pub async fn import_directory(&self, dir: &Path) -> Result<DirectoryImportSummary, IngestError> {
        let started = Instant::now();
        let files = discover::discover_files(dir, &self.config.file_suffix)?;

        log::info!(
            "Found {} {} file(s) under {}",
            files.len(),
            self.config.file_suffix,
            dir.display()
        );

        let mut summary = DirectoryImportSummary {
            directory: dir.to_path_buf(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            total_loaded: 0,
            files: Vec::with_capacity(files.len()),
            elapsed: std::time::Duration::ZERO,
            cancelled: false,
        };

        for file in files {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            summary.attempted += 1;
            match self.import_file(&file, None).await {
                Ok(result) => {
                    summary.succeeded += 1;
                    summary.total_loaded += result.loaded;
                    summary.cancelled = result.cancelled;
                    summary.files.push(FileImportOutcome::Imported(result));
                }
                Err(e) => {
                    log::warn!("Failed to import {}: {e}", file.display());
                    summary.failed += 1;
                    summary.files.push(FileImportOutcome::Failed {
                        file,
                        error: e.to_string(),
                    });
                }
            }

            if summary.cancelled {
                break;
            }
        }

        summary.elapsed = started.elapsed();
        log::info!(
            "Directory import: {}/{} files succeeded, {} features loaded",
            summary.succeeded,
            summary.attempted,
            summary.total_loaded
        );

        Ok(summary)
    }

    /// Creates only the elements whose name (`Name`, else `clean_name`) is
    /// not already stored. A name counts as stored when
    /// [`FeatureStore::find_id_by_name`] finds it, which is the same
    /// case-insensitive substring match as [`FeatureStore::get_by_name`].
    /// Existing records are counted, never rewritten; unnamed elements are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the file cannot be read or decoded, or
    /// the worker session cannot be opened.
    #[allow(clippy::future_not_send)]
    pub async fn incremental_update(
        &self,
        path: &Path,
        year_override: Option<i32>,
    ) -> Result<IncrementalUpdateResult, IngestError> {
        let source_info = hazard_map_decoder::source_info(path);
        let text = tokio::fs::read_to_string(path).await?;
        let document = hazard_map_decoder::decode_document(&text)?;

        log::info!(
            "Incremental update from {} ({} features)",
            path.display(),
            document.len()
        );
        self.progress.set_total(document.len() as u64);

        let worker = Worker {
            store: self.store.try_clone()?,
            provenance: Provenance {
                source_file: Some(source_info.filename),
                year: year_override.or(source_info.year),
            },
            retry: self.config.retry,
            cancel: self.cancel.clone(),
            progress: Arc::clone(&self.progress),
        };

        let mut result =
            tokio::task::spawn_blocking(move || worker.update_by_name(document)).await?;
        result.file = path.to_path_buf();

        if result.new_count > 0 {
            result.spatial_index_error = self.ensure_spatial_index().await;
        }
        result.errors.truncate(self.config.error_sample_size);

        let summary = format!(
            "Incremental update: {} new, {} existing, {} skipped, {} failed",
            result.new_count, result.existing_count, result.skipped_count, result.failed_count
        );
        log::info!("{summary}");
        self.progress.finish(summary);

        Ok(result)
    }
}

/// State owned by one blocking worker.
struct Worker {
    store: FeatureStore,
    provenance: Provenance,
    retry: RetryPolicy,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressCallback>,
}

impl Worker {
    fn create_all(self, chunk: Vec<(usize, FeatureInput)>) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(chunk.len());

        for (index, input) in chunk {
            if self.cancel.is_cancelled() {
                break;
            }
            outcomes.push((index, self.create_one(index, &input)));
            self.progress.inc(1);
        }

        outcomes
    }

    fn create_one(&self, index: usize, input: &FeatureInput) -> Result<i64, ItemError> {
        self.retry
            .run(|| self.store.create(input, &self.provenance))
            .map(|feature| feature.id)
            .map_err(|e| item_error(index, input, &e))
    }

    fn update_by_name(self, document: DecodedDocument) -> IncrementalUpdateResult {
        let mut result = IncrementalUpdateResult::default();

        for (index, item) in document.items.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            result.total_processed += 1;
            self.progress.inc(1);

            let input = match item {
                Ok(input) => input,
                Err(e) => {
                    result.failed_count += 1;
                    result.errors.push(ItemError {
                        index,
                        feature_id: None,
                        kind: ItemErrorKind::Structural,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(name) = input.lookup_name() else {
                log::debug!("Skipping unnamed feature #{index}");
                result.skipped_count += 1;
                continue;
            };

            match self.retry.run(|| self.store.find_id_by_name(name)) {
                Ok(Some(_)) => result.existing_count += 1,
                Ok(None) => match self.create_one(index, &input) {
                    Ok(id) => {
                        result.new_count += 1;
                        result.created_ids.push(id);
                    }
                    Err(e) => {
                        result.failed_count += 1;
                        result.errors.push(e);
                    }
                },
                Err(e) => {
                    result.failed_count += 1;
                    result.errors.push(item_error(index, &input, &e));
                }
            }
        }

        result
    }
}

fn item_error(index: usize, input: &FeatureInput, error: &StoreError) -> ItemError {
    let kind = match error {
        StoreError::Geometry(_) => ItemErrorKind::Geometry,
        _ => ItemErrorKind::Persistence,
    };

    ItemError {
        index,
        feature_id: Some(input.label()),
        kind,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("hazard_map_ingest_{name}"));
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    fn point_feature(name: &str, lon: f64, lat: f64) -> serde_json::Value {
        serde_json::json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [lon, lat]},
            "properties": {"Name": name, "ilce_adi": "Kadikoy", "bilesik_risk_skoru": 0.3}
        })
    }

    fn collection(features: Vec<serde_json::Value>) -> String {
        serde_json::json!({"type": "FeatureCollection", "features": features}).to_string()
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            batch_size: 3,
            workers: 2,
            retry: RetryPolicy::none(),
            ..IngestConfig::default()
        }
    }

    fn ingestor() -> Ingestor {
        Ingestor::new(FeatureStore::open_in_memory().unwrap(), fast_config())
    }

    /// Ten valid features with a broken one at index 4.
    fn mixed_file(dir: &Path) -> PathBuf {
        let mut features: Vec<serde_json::Value> = (0..10)
            .map(|i| point_feature(&format!("N{i}"), 29.0 + f64::from(i) * 0.01, 41.0))
            .collect();
        features[4] = serde_json::json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [999.0, 41.0]},
            "properties": {"Name": "Broken"}
        });

        let path = dir.join("istanbul_2023.geojson");
        std::fs::write(&path, collection(features)).unwrap();
        path
    }

    #[tokio::test]
    async fn import_isolates_item_failures() {
        let dir = scratch("isolation");
        let path = mixed_file(&dir);
        let ingestor = ingestor();

        let result = ingestor.import_file(&path, Some(2023)).await.unwrap();

        assert_eq!(result.total, 10);
        assert_eq!(result.loaded, 9);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].index, 4);
        assert_eq!(result.errors[0].kind, ItemErrorKind::Geometry);
        assert_eq!(result.errors[0].feature_id.as_deref(), Some("Broken"));
        assert_eq!(result.year, Some(2023));
        assert!(!result.cancelled);

        let store = ingestor.store();
        assert_eq!(store.count().unwrap(), 9);
        assert!(store.get_by_name("Broken").unwrap().is_empty());
        assert_eq!(store.spatial_indexes().unwrap().len(), 1);

        for id in &result.created_ids {
            let feature = store.get_by_id(*id).unwrap();
            assert_eq!(feature.provenance.year, Some(2023));
            assert_eq!(
                feature.provenance.source_file.as_deref(),
                Some("istanbul_2023.geojson")
            );
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn created_ids_follow_element_order() {
        let dir = scratch("order");
        let path = mixed_file(&dir);
        let ingestor = ingestor();

        let result = ingestor.import_file(&path, None).await.unwrap();
        let names: Vec<String> = result
            .created_ids
            .iter()
            .map(|id| ingestor.store().get_by_id(*id).unwrap().names.name.unwrap())
            .collect();

        let expected: Vec<String> = (0..10)
            .filter(|i| *i != 4)
            .map(|i| format!("N{i}"))
            .collect();
        assert_eq!(names, expected);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn error_sample_is_capped_and_sorted() {
        let dir = scratch("sample");
        let features: Vec<serde_json::Value> = (0..8)
            .map(|i| {
                serde_json::json!({
                    "type": "Feature",
                    "geometry": null,
                    "properties": {"Name": format!("Bad{i}")}
                })
            })
            .collect();
        let path = dir.join("bad.geojson");
        std::fs::write(&path, collection(features)).unwrap();

        let ingestor = ingestor();
        let result = ingestor.import_file(&path, None).await.unwrap();

        assert_eq!(result.loaded, 0);
        assert_eq!(result.failed, 8);
        assert_eq!(result.errors.len(), 5);
        let indices: Vec<usize> = result.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(
            result
                .errors
                .iter()
                .all(|e| e.kind == ItemErrorKind::Structural)
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unreadable_documents_fail_the_file() {
        let dir = scratch("unreadable");
        let path = dir.join("garbage.geojson");
        std::fs::write(&path, "{ not json").unwrap();
        let ingestor = ingestor();

        assert!(matches!(
            ingestor.import_file(&path, None).await,
            Err(IngestError::Decode(_))
        ));
        assert!(matches!(
            ingestor.import_file(&dir.join("missing.geojson"), None).await,
            Err(IngestError::Io(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn directory_import_survives_broken_file() {
        let dir = scratch("directory");
        std::fs::create_dir_all(dir.join("2022")).unwrap();
        std::fs::write(
            dir.join("a.geojson"),
            collection(vec![point_feature("A1", 29.0, 41.0)]),
        )
        .unwrap();
        std::fs::write(dir.join("b.geojson"), "not json at all").unwrap();
        std::fs::write(
            dir.join("2022").join("c.geojson"),
            collection(vec![
                point_feature("C1", 29.1, 41.0),
                point_feature("C2", 29.2, 41.0),
            ]),
        )
        .unwrap();
        std::fs::write(dir.join("readme.txt"), "ignored").unwrap();

        let ingestor = ingestor();
        let summary = ingestor.import_directory(&dir).await.unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_loaded, 3);
        assert!(!summary.cancelled);
        assert!(matches!(
            &summary.files[2],
            FileImportOutcome::Failed { file, .. } if file.ends_with("b.geojson")
        ));

        let from_2022 = ingestor.store().get_by_name("C1").unwrap();
        assert_eq!(from_2022[0].provenance.year, Some(2022));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn incremental_update_splits_new_and_existing() {
        let dir = scratch("incremental");
        let first = dir.join("first.geojson");
        std::fs::write(
            &first,
            collection(vec![
                point_feature("Modabagi", 29.0, 41.0),
                point_feature("Levent", 29.1, 41.0),
            ]),
        )
        .unwrap();

        let ingestor = ingestor();
        ingestor.import_file(&first, None).await.unwrap();

        let second = dir.join("second.geojson");
        std::fs::write(
            &second,
            collection(vec![
                // Partial, differently cased hit on "Modabagi".
                point_feature("moda", 29.5, 41.5),
                point_feature("Bebek", 29.2, 41.0),
                serde_json::json!({
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [29.3, 41.0]},
                    "properties": {"clean_name": "LEVENT"}
                }),
                point_feature("Cengelkoy", 29.4, 41.0),
                serde_json::json!({
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [29.3, 41.0]},
                    "properties": {"ilce_adi": "Unnamed"}
                }),
                serde_json::json!({"type": "Feature", "properties": {"Name": "NoGeometry"}}),
            ]),
        )
        .unwrap();

        let result = ingestor.incremental_update(&second, None).await.unwrap();

        assert_eq!(result.new_count, 2);
        assert_eq!(result.existing_count, 2);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.total_processed, 6);
        assert_eq!(result.created_ids.len(), 2);
        assert!(!result.cancelled);
        assert!(result.spatial_index_error.is_none());

        // The existing record keeps its original geometry.
        let moda = ingestor.store().get_by_name("moda").unwrap();
        assert_eq!(moda.len(), 1);
        assert_eq!(moda[0].names.name.as_deref(), Some("Modabagi"));
        assert!((moda[0].centroid.longitude - 29.0).abs() < 1e-9);
        assert_eq!(ingestor.store().count().unwrap(), 4);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn spatial_index_failure_keeps_committed_features() {
        let dir = scratch("index_failure");
        let db = dir.join("hazard.duckdb");
        {
            // An incompatible pre-existing table survives schema creation
            // and makes the index insert fail.
            let conn = duckdb::Connection::open(&db).unwrap();
            conn.execute_batch("CREATE TABLE spatial_indices (index_name VARCHAR PRIMARY KEY);")
                .unwrap();
        }

        let path = dir.join("two.geojson");
        std::fs::write(
            &path,
            collection(vec![
                point_feature("A", 29.0, 41.0),
                point_feature("B", 29.1, 41.0),
            ]),
        )
        .unwrap();

        let ingestor = Ingestor::new(FeatureStore::open(&db).unwrap(), fast_config());
        let result = ingestor.import_file(&path, None).await.unwrap();

        assert_eq!(result.loaded, 2);
        assert_eq!(result.created_ids.len(), 2);
        assert!(result.spatial_index_error.is_some());
        assert_eq!(ingestor.store().count().unwrap(), 2);

        ingestor.into_store().close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn repeated_imports_record_one_spatial_index() {
        let dir = scratch("index_repeat");
        let path = dir.join("one.geojson");
        std::fs::write(&path, collection(vec![point_feature("A", 29.0, 41.0)])).unwrap();

        let ingestor = Ingestor::new(
            FeatureStore::open_in_memory().unwrap(),
            IngestConfig {
                retry: RetryPolicy {
                    max_retries: 2,
                    base_delay_ms: 1,
                },
                ..fast_config()
            },
        );
        for _ in 0..2 {
            let result = ingestor.import_file(&path, None).await.unwrap();
            assert!(result.spatial_index_error.is_none());
        }

        assert_eq!(ingestor.store().spatial_indexes().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    struct CancelAfter {
        limit: u64,
        seen: AtomicU64,
        cancel: CancellationToken,
    }

    impl ProgressCallback for CancelAfter {
        fn set_total(&self, _total: u64) {}

        fn inc(&self, delta: u64) {
            if self.seen.fetch_add(delta, Ordering::SeqCst) + delta >= self.limit {
                self.cancel.cancel();
            }
        }

        fn set_message(&self, _msg: String) {}
        fn finish(&self, _msg: String) {}
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_item() {
        let dir = scratch("cancel");
        let features: Vec<serde_json::Value> = (0..20)
            .map(|i| point_feature(&format!("N{i}"), 29.0 + f64::from(i) * 0.01, 41.0))
            .collect();
        let path = dir.join("many.geojson");
        std::fs::write(&path, collection(features)).unwrap();

        let cancel = CancellationToken::new();
        let ingestor = Ingestor::new(
            FeatureStore::open_in_memory().unwrap(),
            IngestConfig {
                batch_size: 5,
                workers: 1,
                retry: RetryPolicy::none(),
                ..IngestConfig::default()
            },
        )
        .with_cancellation(cancel.clone())
        .with_progress(Arc::new(CancelAfter {
            limit: 3,
            seen: AtomicU64::new(0),
            cancel: cancel.clone(),
        }));

        let result = ingestor.import_file(&path, None).await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.loaded, 3);
        assert_eq!(ingestor.store().count().unwrap(), 3);

        let summary = ingestor.import_directory(&dir).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cancel_after_last_item_is_not_reported() {
        let dir = scratch("cancel_late");
        let features: Vec<serde_json::Value> = (0..4)
            .map(|i| point_feature(&format!("N{i}"), 29.0 + f64::from(i) * 0.01, 41.0))
            .collect();
        let path = dir.join("four.geojson");
        std::fs::write(&path, collection(features)).unwrap();

        let cancel = CancellationToken::new();
        let ingestor = Ingestor::new(FeatureStore::open_in_memory().unwrap(), fast_config())
            .with_cancellation(cancel.clone())
            .with_progress(Arc::new(CancelAfter {
                limit: 4,
                seen: AtomicU64::new(0),
                cancel: cancel.clone(),
            }));

        let result = ingestor.import_file(&path, None).await.unwrap();

        assert!(cancel.is_cancelled());
        assert!(!result.cancelled);
        assert_eq!(result.loaded, 4);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bare_geometry_document_loads_one_feature() {
        let dir = scratch("bare");
        let path = dir.join("shape.geojson");
        std::fs::write(
            &path,
            r#"{"type": "Polygon", "coordinates": [[[29.0, 41.0], [29.1, 41.0], [29.1, 41.1], [29.0, 41.0]]]}"#,
        )
        .unwrap();

        let result = ingestor().import_file(&path, None).await.unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.loaded, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
