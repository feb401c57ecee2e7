use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupSide {
    Left,
    Right,
}

impl fmt::Display for GroupSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Pipeline checkpoints, in execution order.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Aggregate,
    Partition,
    Score,
    Select,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregate => write!(f, "aggregate"),
            Self::Partition => write!(f, "partition"),
            Self::Score => write!(f, "score"),
            Self::Select => write!(f, "select"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum InvalidInput {
    #[error("no embedding rows were supplied")]
    EmptyRows,
    #[error("row {row} is missing required field '{field}'")]
    MissingField { row: usize, field: String },
    #[error("row {row} has {actual} coordinates, expected {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("rows carry no embedding coordinates")]
    NoCoordinates,
    #[error("row {row} column '{column}' is not a finite number: {value:?}")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },
    #[error("sample '{sample_id}' has conflicting labels '{first}' and '{conflicting}'")]
    LabelConflict {
        sample_id: String,
        first: String,
        conflicting: String,
    },
    #[error("no column starts with coordinate prefix '{prefix}'")]
    NoCoordinateColumns { prefix: String },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("matrix of {rows}x{cols} needs {expected} cells, got {actual}")]
    MatrixShape {
        rows: usize,
        cols: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),
    #[error("insufficient data: {side} group is empty (left={left_n}, right={right_n})")]
    InsufficientData {
        side: GroupSide,
        left_n: usize,
        right_n: usize,
    },
    #[error(
        "no valid comparisons: {missing_cells} of {total_cells} cells missing in a {rows}x{cols} matrix"
    )]
    NoValidComparisons {
        rows: usize,
        cols: usize,
        missing_cells: usize,
        total_cells: usize,
    },
    #[error("run cancelled during {stage} stage")]
    Cancelled { stage: RunStage },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

impl MatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::NoValidComparisons { .. } => "NO_VALID_COMPARISONS",
            Self::Cancelled { .. } => "CANCELLED",
            Self::WorkerPool(_) => "WORKER_POOL",
        }
    }
}
