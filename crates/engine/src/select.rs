use crate::error::MatchError;
use crate::matrix::ScoreMatrix;
use serde::Serialize;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BestMatch {
    pub left_id: String,
    pub right_id: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub best: BestMatch,
    pub cleaned: ScoreMatrix,
}

/// Drops every row and every column whose cells are all missing.
///
/// A row or column that is fully missing stays fully missing after the other
/// axis is cleaned, so both are decided against the input matrix.
pub fn clean_matrix(matrix: &ScoreMatrix) -> ScoreMatrix {
    let keep_rows: Vec<usize> = (0..matrix.n_rows())
        .filter(|&row| {
            matrix
                .row(row)
                .is_some_and(|cells| cells.iter().any(Option::is_some))
        })
        .collect();
    let keep_cols: Vec<usize> = (0..matrix.n_cols())
        .filter(|&col| (0..matrix.n_rows()).any(|row| matrix.get(row, col).is_some()))
        .collect();

    matrix.subset(&keep_rows, &keep_cols)
}

/// Cleans the matrix and picks its highest-scoring cell.
///
/// Ties go to the first maximum in row-major order. Left and Right ids are
/// sorted when the matrix comes out of the pipeline, so this is the
/// lexicographically smallest `(left_id, right_id)` among the tied cells.
pub fn select_best_match(matrix: &ScoreMatrix) -> Result<Selection, MatchError> {
    let cleaned = clean_matrix(matrix);

    let mut best: Option<(usize, usize, f64)> = None;
    for (row, col, cell) in cleaned.iter_cells() {
        let Some(score) = cell else {
            continue;
        };
        if best.map_or(true, |(_, _, top)| score > top) {
            best = Some((row, col, score));
        }
    }

    let Some((row, col, score)) = best else {
        return Err(MatchError::NoValidComparisons {
            rows: matrix.n_rows(),
            cols: matrix.n_cols(),
            missing_cells: matrix.missing_count(),
            total_cells: matrix.n_cells(),
        });
    };

    Ok(Selection {
        best: BestMatch {
            left_id: cleaned.left_ids()[row].clone(),
            right_id: cleaned.right_ids()[col].clone(),
            score,
        },
        cleaned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fully_missing_rows_and_columns_are_dropped() {
        let matrix = ScoreMatrix::from_rows(
            ids(&["L1", "L2", "L3"]),
            ids(&["R1", "R2"]),
            vec![
                vec![Some(0.4), None],
                vec![None, None],
                vec![Some(0.7), None],
            ],
        )
        .expect("matrix");
        let cleaned = clean_matrix(&matrix);
        assert_eq!(cleaned.left_ids(), &ids(&["L1", "L3"])[..]);
        assert_eq!(cleaned.right_ids(), &ids(&["R1"])[..]);
        assert_eq!(cleaned.get(1, 0), Some(0.7));
    }

    #[test]
    fn partially_missing_cells_survive_cleaning() {
        let matrix = ScoreMatrix::from_rows(
            ids(&["L1", "L2"]),
            ids(&["R1", "R2"]),
            vec![vec![Some(0.4), None], vec![None, Some(0.2)]],
        )
        .expect("matrix");
        let cleaned = clean_matrix(&matrix);
        assert_eq!(cleaned, matrix);
    }

    #[test]
    fn best_match_is_the_global_maximum() {
        let matrix = ScoreMatrix::from_rows(
            ids(&["L1", "L2"]),
            ids(&["R1", "R2"]),
            vec![vec![Some(0.4), None], vec![Some(0.9), Some(0.2)]],
        )
        .expect("matrix");
        let selection = select_best_match(&matrix).expect("select");
        assert_eq!(
            selection.best,
            BestMatch {
                left_id: "L2".to_string(),
                right_id: "R1".to_string(),
                score: 0.9,
            }
        );
    }

    #[test]
    fn ties_resolve_to_first_in_row_major_order() {
        let matrix = ScoreMatrix::from_rows(
            ids(&["A", "B"]),
            ids(&["X", "Y"]),
            vec![vec![Some(0.9), Some(0.9)], vec![Some(0.5), None]],
        )
        .expect("matrix");
        let selection = select_best_match(&matrix).expect("select");
        assert_eq!(selection.best.left_id, "A");
        assert_eq!(selection.best.right_id, "X");
    }

    #[test]
    fn all_missing_is_no_valid_comparisons() {
        let matrix = ScoreMatrix::from_rows(
            ids(&["L1", "L2"]),
            ids(&["R1"]),
            vec![vec![None], vec![None]],
        )
        .expect("matrix");
        let err = select_best_match(&matrix).unwrap_err();
        assert_eq!(
            err,
            MatchError::NoValidComparisons {
                rows: 2,
                cols: 1,
                missing_cells: 2,
                total_cells: 2,
            }
        );
        assert_eq!(err.code(), "NO_VALID_COMPARISONS");
    }
}
