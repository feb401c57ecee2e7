use crate::aggregate::{aggregate_centroids, LabelPolicy};
use crate::error::{MatchError, RunStage};
use crate::hooks::RunHooks;
use crate::matrix::{build_score_matrix, CellFailure, ScoreMatrix};
use crate::metric::{DependenceMetric, DistanceCorrelation};
use crate::partition::{partition_centroids, GroupPredicate};
use crate::select::{select_best_match, BestMatch};
use crate::table::EmbeddingRow;
use serde::Serialize;
use tracing::{debug, info};

/// What to match and how: field names, the Left predicate, and run knobs.
#[derive(Clone, Debug)]
pub struct MatchRequest<P> {
    pub sample_field: String,
    pub label_field: String,
    pub left_predicate: P,
    pub label_policy: LabelPolicy,
    /// Worker threads for scoring; `None` uses the pool default.
    pub threads: Option<usize>,
}

impl<P: GroupPredicate> MatchRequest<P> {
    pub fn new(
        sample_field: impl Into<String>,
        label_field: impl Into<String>,
        left_predicate: P,
    ) -> Self {
        Self {
            sample_field: sample_field.into(),
            label_field: label_field.into(),
            left_predicate,
            label_policy: LabelPolicy::default(),
            threads: None,
        }
    }

    pub fn with_label_policy(mut self, policy: LabelPolicy) -> Self {
        self.label_policy = policy;
        self
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub metric_id: String,
    pub rows_used: usize,
    pub samples: usize,
    pub dim: usize,
    pub label_conflicts: usize,
    pub left_n: usize,
    pub right_n: usize,
    pub cells: usize,
    pub missing_cells: usize,
    pub cleaned_rows: usize,
    pub cleaned_cols: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchOutcome {
    /// Every Left x Right cell, missing ones included.
    pub matrix: ScoreMatrix,
    /// `matrix` without fully-missing rows and columns.
    pub cleaned: ScoreMatrix,
    pub best_match: BestMatch,
    pub failures: Vec<CellFailure>,
    pub summary: RunSummary,
}

/// Runs aggregate, partition, score and select with caller-supplied metric
/// and hooks.
///
/// Each stage produces a fresh value; nothing from a failed or cancelled run
/// is returned.
pub fn run_match<P, M>(
    rows: &[EmbeddingRow],
    request: &MatchRequest<P>,
    metric: &M,
    hooks: &mut RunHooks<'_>,
) -> Result<MatchOutcome, MatchError>
where
    P: GroupPredicate,
    M: DependenceMetric + ?Sized,
{
    info!(rows = rows.len(), metric = metric.metric_id(), "match run started");

    hooks.checkpoint(RunStage::Aggregate)?;
    let aggregation = aggregate_centroids(
        rows,
        &request.sample_field,
        &request.label_field,
        request.label_policy,
    )?;
    debug!(
        samples = aggregation.centroids.len(),
        dim = aggregation.dim,
        label_conflicts = aggregation.label_conflicts,
        "centroids aggregated"
    );
    hooks.report(RunStage::Aggregate, 1, 1);

    hooks.checkpoint(RunStage::Partition)?;
    let pair = partition_centroids(&aggregation.centroids, &request.left_predicate)?;
    debug!(
        left = pair.left.len(),
        right = pair.right.len(),
        "centroids partitioned"
    );
    hooks.report(RunStage::Partition, 1, 1);

    hooks.checkpoint(RunStage::Score)?;
    let build = build_score_matrix(&pair, metric, request.threads, hooks)?;

    hooks.checkpoint(RunStage::Select)?;
    let selection = select_best_match(&build.matrix)?;
    hooks.report(RunStage::Select, 1, 1);

    let summary = RunSummary {
        metric_id: metric.metric_id().to_string(),
        rows_used: aggregation.rows_used,
        samples: aggregation.centroids.len(),
        dim: aggregation.dim,
        label_conflicts: aggregation.label_conflicts,
        left_n: pair.left.len(),
        right_n: pair.right.len(),
        cells: build.matrix.n_cells(),
        missing_cells: build.matrix.missing_count(),
        cleaned_rows: selection.cleaned.n_rows(),
        cleaned_cols: selection.cleaned.n_cols(),
    };
    info!(
        left = %selection.best.left_id,
        right = %selection.best.right_id,
        score = selection.best.score,
        missing = summary.missing_cells,
        "match run finished"
    );

    Ok(MatchOutcome {
        matrix: build.matrix,
        cleaned: selection.cleaned,
        best_match: selection.best,
        failures: build.failures,
        summary,
    })
}

/// Distance-correlation matching with default knobs and no hooks.
///
/// Returns the full score matrix and the best match.
pub fn build_match_matrix<P: GroupPredicate>(
    rows: &[EmbeddingRow],
    sample_field: &str,
    label_field: &str,
    left_predicate: P,
) -> Result<(ScoreMatrix, BestMatch), MatchError> {
    let request = MatchRequest::new(sample_field, label_field, left_predicate);
    let outcome = run_match(rows, &request, &DistanceCorrelation, &mut RunHooks::new())?;
    Ok((outcome.matrix, outcome.best_match))
}
