use crate::aggregate::Centroid;
use crate::error::{InvalidInput, MatchError, RunStage};
use crate::hooks::RunHooks;
use crate::metric::DependenceMetric;
use crate::partition::GroupPair;
use crossbeam_channel::unbounded;
use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, warn};

/// Left ids index rows, Right ids index columns; cells are stored row-major
/// and `None` marks a pair the metric could not score.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScoreMatrix {
    left_ids: Vec<String>,
    right_ids: Vec<String>,
    cells: Vec<Option<f64>>,
}

impl ScoreMatrix {
    /// Non-finite values are stored as missing.
    pub fn new(
        left_ids: Vec<String>,
        right_ids: Vec<String>,
        cells: Vec<Option<f64>>,
    ) -> Result<Self, InvalidInput> {
        let expected = left_ids.len() * right_ids.len();
        if cells.len() != expected {
            return Err(InvalidInput::MatrixShape {
                rows: left_ids.len(),
                cols: right_ids.len(),
                expected,
                actual: cells.len(),
            });
        }
        let cells = cells
            .into_iter()
            .map(|cell| cell.filter(|v| v.is_finite()))
            .collect();
        Ok(Self {
            left_ids,
            right_ids,
            cells,
        })
    }

    pub fn from_rows(
        left_ids: Vec<String>,
        right_ids: Vec<String>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, InvalidInput> {
        let cols = right_ids.len();
        if let Some(bad) = rows.iter().find(|row| row.len() != cols) {
            return Err(InvalidInput::MatrixShape {
                rows: left_ids.len(),
                cols,
                expected: left_ids.len() * cols,
                actual: rows.len() * bad.len(),
            });
        }
        if rows.len() != left_ids.len() {
            return Err(InvalidInput::MatrixShape {
                rows: left_ids.len(),
                cols,
                expected: left_ids.len() * cols,
                actual: rows.len() * cols,
            });
        }
        Self::new(left_ids, right_ids, rows.into_iter().flatten().collect())
    }

    pub fn left_ids(&self) -> &[String] {
        &self.left_ids
    }

    pub fn right_ids(&self) -> &[String] {
        &self.right_ids
    }

    pub fn n_rows(&self) -> usize {
        self.left_ids.len()
    }

    pub fn n_cols(&self) -> usize {
        self.right_ids.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.n_rows() || col >= self.n_cols() {
            return None;
        }
        self.cells[row * self.n_cols() + col]
    }

    pub fn row(&self, row: usize) -> Option<&[Option<f64>]> {
        if row >= self.n_rows() {
            return None;
        }
        let cols = self.n_cols();
        Some(&self.cells[row * cols..(row + 1) * cols])
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_none()).count()
    }

    /// The submatrix over the given row and column indices, in the order given.
    pub(crate) fn subset(&self, rows: &[usize], cols: &[usize]) -> ScoreMatrix {
        ScoreMatrix {
            left_ids: rows.iter().map(|&r| self.left_ids[r].clone()).collect(),
            right_ids: cols.iter().map(|&c| self.right_ids[c].clone()).collect(),
            cells: rows
                .iter()
                .flat_map(|&r| cols.iter().map(move |&c| self.cells[r * self.n_cols() + c]))
                .collect(),
        }
    }

    /// `(row, col, cell)` in row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (usize, usize, Option<f64>)> + '_ {
        let cols = self.n_cols().max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(idx, cell)| (idx / cols, idx % cols, *cell))
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CellFailure {
    pub left_id: String,
    pub right_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatrixBuild {
    pub matrix: ScoreMatrix,
    pub failures: Vec<CellFailure>,
}

enum CellOutcome {
    Score(f64),
    Missing(String),
}

fn score_cell<M: DependenceMetric + ?Sized>(
    left: &Centroid,
    right: &Centroid,
    metric: &M,
) -> CellOutcome {
    let scored = panic::catch_unwind(AssertUnwindSafe(|| metric.score(&left.mean, &right.mean)));
    match scored {
        Ok(Ok(value)) if value.is_finite() => CellOutcome::Score(value),
        Ok(Ok(value)) => {
            CellOutcome::Missing(format!("metric returned non-finite score {}", value))
        }
        Ok(Err(reason)) => CellOutcome::Missing(reason),
        Err(payload) => CellOutcome::Missing(format!("metric panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

fn score_row<M: DependenceMetric + ?Sized>(
    left: &Centroid,
    right: &[Centroid],
    metric: &M,
) -> Vec<CellOutcome> {
    right
        .iter()
        .map(|candidate| score_cell(left, candidate, metric))
        .collect()
}

pub(crate) fn build_thread_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, MatchError> {
    let builder = rayon::ThreadPoolBuilder::new();
    let builder = if let Some(n) = threads {
        builder.num_threads(n)
    } else {
        builder
    };
    builder
        .build()
        .map_err(|err| MatchError::WorkerPool(err.to_string()))
}

/// Scores every Left x Right pair.
///
/// Left rows are scored in parallel, one task per row; each task owns its
/// row of outcomes and rows are reassembled in Left order, so the result is
/// identical for any thread count. A cell whose metric fails or panics becomes
/// missing and is reported in `failures`. Cancellation
/// is checked before each row and discards everything scored so far.
pub fn build_score_matrix<M: DependenceMetric + ?Sized>(
    pair: &GroupPair,
    metric: &M,
    threads: Option<usize>,
    hooks: &mut RunHooks<'_>,
) -> Result<MatrixBuild, MatchError> {
    let pool = build_thread_pool(threads)?;
    let total_rows = pair.left.len();
    let cancel = hooks.cancel_token();
    debug!(
        rows = total_rows,
        cols = pair.right.len(),
        threads = pool.current_num_threads(),
        "scoring pairs"
    );

    let (row_done_tx, row_done_rx) = unbounded::<usize>();
    let joined = thread::scope(|scope| {
        let worker = scope.spawn(move || {
            pool.install(|| {
                pair.left
                    .par_iter()
                    .enumerate()
                    .map(|(row_idx, left)| {
                        if cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
                            return None;
                        }
                        let row = score_row(left, &pair.right, metric);
                        let _ = row_done_tx.send(row_idx);
                        Some(row)
                    })
                    .collect::<Option<Vec<_>>>()
            })
        });

        let mut completed = 0usize;
        for _row_idx in row_done_rx.iter() {
            completed += 1;
            hooks.report(RunStage::Score, completed, total_rows);
        }
        worker.join()
    });

    let rows = joined
        .map_err(|_| MatchError::WorkerPool("scoring worker panicked".to_string()))?
        .ok_or(MatchError::Cancelled {
            stage: RunStage::Score,
        })?;

    let mut cells = Vec::with_capacity(total_rows * pair.right.len());
    let mut failures = Vec::new();
    for (left, row) in pair.left.iter().zip(rows) {
        for (right, outcome) in pair.right.iter().zip(row) {
            match outcome {
                CellOutcome::Score(value) => cells.push(Some(value)),
                CellOutcome::Missing(reason) => {
                    debug!(left = %left.sample_id, right = %right.sample_id, %reason, "pair not scored");
                    failures.push(CellFailure {
                        left_id: left.sample_id.clone(),
                        right_id: right.sample_id.clone(),
                        reason,
                    });
                    cells.push(None);
                }
            }
        }
    }
    if !failures.is_empty() {
        warn!(
            missing = failures.len(),
            total = cells.len(),
            "some pairs could not be scored and are marked missing"
        );
    }

    let matrix = ScoreMatrix::new(
        pair.left.iter().map(|c| c.sample_id.clone()).collect(),
        pair.right.iter().map(|c| c.sample_id.clone()).collect(),
        cells,
    )?;
    Ok(MatrixBuild { matrix, failures })
}
