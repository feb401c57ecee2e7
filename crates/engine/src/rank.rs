use crate::matrix::ScoreMatrix;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RankedPair {
    pub left_id: String,
    pub right_id: String,
    pub score: f64,
}

/// Same ordering as best-match selection: `0.0` and `-0.0` tie.
fn compare_ranked(left: &RankedPair, right: &RankedPair) -> Ordering {
    right
        .score
        .partial_cmp(&left.score)
        .unwrap_or(Ordering::Equal)
}

/// One record per non-missing cell, best score first.
///
/// The sort is stable, so equal scores keep their row-major order.
pub fn to_ranked_list(matrix: &ScoreMatrix) -> Vec<RankedPair> {
    let mut ranked: Vec<RankedPair> = matrix
        .iter_cells()
        .filter_map(|(row, col, cell)| {
            cell.map(|score| RankedPair {
                left_id: matrix.left_ids()[row].clone(),
                right_id: matrix.right_ids()[col].clone(),
                score,
            })
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}
