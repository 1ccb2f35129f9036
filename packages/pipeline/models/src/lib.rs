#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline run reports.
//!
//! A run moves through [`RunState`] as its steps complete. Each step leaves
//! a [`StepOutcome`] in the [`PipelineRunReport`]; only fatal steps decide
//! the run's overall success.

use chrono::{DateTime, Utc};
use hazard_map_database_models::StoreStatistics;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A pipeline step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepName {
    /// Load the input file into the store.
    Ingest,
    /// Predict risk for newly created features.
    Enrich,
    /// Snapshot store statistics.
    CollectStatistics,
}

impl StepName {
    /// Whether a failure of this step aborts the run.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Ingest)
    }
}

/// Step-specific counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepMetrics {
    /// Element counts from the import.
    Ingest {
        /// Elements in the document.
        total: usize,
        /// Features created.
        loaded: usize,
        /// Elements that failed.
        failed: usize,
    },
    /// Prediction counts over the newly created features.
    Enrich {
        /// Features a prediction was requested for.
        attempted: usize,
        /// Features annotated with a prediction.
        annotated: usize,
        /// Predictions or annotations that failed.
        failed: usize,
    },
    /// The statistics snapshot taken at the end of the run.
    CollectStatistics(StoreStatistics),
}

/// What happened in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// The step this outcome belongs to.
    pub name: StepName,
    /// Whether the step completed without error.
    pub success: bool,
    /// Counters, when the step produced any.
    pub metrics: Option<StepMetrics>,
    /// The failure message, if the step failed.
    pub error: Option<String>,
    /// Whether a failure of this step aborts the run.
    pub fatal: bool,
}

impl StepOutcome {
    /// A successful outcome.
    #[must_use]
    pub const fn succeeded(name: StepName, metrics: StepMetrics) -> Self {
        Self {
            name,
            success: true,
            metrics: Some(metrics),
            error: None,
            fatal: name.is_fatal(),
        }
    }

    /// A failed outcome. Metrics are kept when the step got far enough to
    /// produce them.
    #[must_use]
    pub fn failed(name: StepName, metrics: Option<StepMetrics>, error: impl Into<String>) -> Self {
        Self {
            name,
            success: false,
            metrics,
            error: Some(error.into()),
            fatal: name.is_fatal(),
        }
    }
}

/// Lifecycle of a pipeline run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Created, nothing run yet.
    Pending,
    /// The ingest step is running.
    Ingesting,
    /// Ingestion failed; no later step ran.
    Aborted,
    /// Ingestion loaded at least one feature or had nothing to load.
    Ingested,
    /// The enrich step is running.
    Enriching,
    /// Enrichment failed; the run continued.
    EnrichFailed,
    /// Every new feature was annotated.
    Enriched,
    /// The statistics step is running.
    CollectingStats,
    /// Every step ran.
    Completed,
}

impl RunState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Completed)
    }

    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ingesting)
                | (Self::Ingesting, Self::Aborted | Self::Ingested)
                | (Self::Ingested, Self::Enriching | Self::CollectingStats)
                | (Self::Enriching, Self::EnrichFailed | Self::Enriched)
                | (Self::EnrichFailed | Self::Enriched, Self::CollectingStats)
                | (Self::CollectingStats, Self::Completed)
        )
    }
}

/// Structured report of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunReport {
    /// The processed input, usually a file path.
    pub input: String,
    /// Outcomes in execution order.
    pub steps: Vec<StepOutcome>,
    /// Store statistics taken at the end of the run.
    pub statistics: Option<StoreStatistics>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, once it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the run.
    pub elapsed_seconds: f64,
    /// Where the run ended up.
    pub state: RunState,
    /// True iff every fatal step succeeded.
    pub success: bool,
}

impl PipelineRunReport {
    /// Starts a report for `input` in [`RunState::Pending`].
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            steps: Vec::new(),
            statistics: None,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_seconds: 0.0,
            state: RunState::Pending,
            success: false,
        }
    }

    /// Returns the outcome of `name`, if that step ran.
    #[must_use]
    pub fn step(&self, name: StepName) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Stamps the end time and derives overall success from the fatal
    /// steps.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        #[allow(clippy::cast_precision_loss)]
        let elapsed = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.elapsed_seconds = elapsed.max(0.0);
        self.success = self.steps.iter().filter(|s| s.fatal).all(|s| s.success);
    }
}

/// Totals for a directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Files a run was started for.
    pub attempted: usize,
    /// Runs whose fatal steps all succeeded.
    pub succeeded: usize,
    /// Runs that aborted.
    pub failed: usize,
    /// Whether cancellation stopped the batch before every file ran.
    pub cancelled: bool,
}

/// One report per processed file plus totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One report per file, in processing order.
    pub reports: Vec<PipelineRunReport>,
    /// Totals across the reports.
    pub summary: BatchSummary,
}

/// Every run a coordinator has performed, with a final statistics
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHistoryReport {
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// Store statistics at that time.
    pub database_statistics: StoreStatistics,
    /// Every run, oldest first.
    pub pipeline_runs: Vec<PipelineRunReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_steps_decide_success() {
        let mut report = PipelineRunReport::new("input.geojson");
        report.steps.push(StepOutcome::succeeded(
            StepName::Ingest,
            StepMetrics::Ingest {
                total: 2,
                loaded: 2,
                failed: 0,
            },
        ));
        report
            .steps
            .push(StepOutcome::failed(StepName::Enrich, None, "model offline"));
        report.finish();

        assert!(report.success);
        assert!(report.finished_at.is_some());
        assert!(!report.step(StepName::Enrich).unwrap().fatal);

        report
            .steps
            .push(StepOutcome::failed(StepName::Ingest, None, "unreadable"));
        report.finish();
        assert!(!report.success);
    }

    #[test]
    fn state_machine_transitions() {
        use RunState::{
            Aborted, Completed, EnrichFailed, Enriching, Ingested, Ingesting, CollectingStats, Pending,
        };

        assert!(Pending.can_transition_to(Ingesting));
        assert!(Ingesting.can_transition_to(Aborted));
        assert!(Ingested.can_transition_to(CollectingStats));
        assert!(EnrichFailed.can_transition_to(CollectingStats));
        assert!(!Aborted.can_transition_to(Enriching));
        assert!(!Pending.can_transition_to(Completed));

        assert!(Aborted.is_terminal());
        assert!(Completed.is_terminal());
        assert!(!EnrichFailed.is_terminal());
    }

    #[test]
    fn names_serialize_screaming() {
        assert_eq!(StepName::CollectStatistics.to_string(), "COLLECT_STATISTICS");
        assert_eq!(
            "ENRICH_FAILED".parse::<RunState>().unwrap(),
            RunState::EnrichFailed
        );
        assert_eq!(
            serde_json::to_string(&RunState::CollectingStats).unwrap(),
            "\"COLLECTING_STATS\""
        );
    }
}
