use crate::error::InvalidInput;
use crate::table::EmbeddingRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// The label of the first row seen for a sample is kept; later
    /// disagreeing rows are counted and logged.
    #[default]
    FirstWins,
    /// Any disagreeing label for a sample is an input error.
    Strict,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Centroid {
    pub sample_id: String,
    pub label: String,
    pub mean: Vec<f64>,
    pub n_rows: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Aggregation {
    /// Sorted by sample identifier.
    pub centroids: Vec<Centroid>,
    pub dim: usize,
    pub rows_used: usize,
    pub label_conflicts: usize,
}

struct Accumulator {
    label: String,
    sum: Vec<f64>,
    n_rows: usize,
}

/// Collapses observation rows into one mean vector per sample identifier.
///
/// Every row is validated before anything is accumulated, so an error never
/// leaves a partial aggregation behind.
pub fn aggregate_centroids(
    rows: &[EmbeddingRow],
    sample_field: &str,
    label_field: &str,
    policy: LabelPolicy,
) -> Result<Aggregation, InvalidInput> {
    let Some(first) = rows.first() else {
        return Err(InvalidInput::EmptyRows);
    };
    let dim = first.coordinates.len();
    if dim == 0 {
        return Err(InvalidInput::NoCoordinates);
    }

    for (row_idx, row) in rows.iter().enumerate() {
        if row.coordinates.len() != dim {
            return Err(InvalidInput::DimensionMismatch {
                row: row_idx,
                expected: dim,
                actual: row.coordinates.len(),
            });
        }
        if let Some((col, value)) = row
            .coordinates
            .iter()
            .enumerate()
            .find(|(_, value)| !value.is_finite())
        {
            return Err(InvalidInput::NonNumeric {
                row: row_idx,
                column: format!("coordinate {}", col),
                value: value.to_string(),
            });
        }
        for field in [sample_field, label_field] {
            if row.field(field).is_none() {
                return Err(InvalidInput::MissingField {
                    row: row_idx,
                    field: field.to_string(),
                });
            }
        }
    }

    let mut groups: BTreeMap<&str, Accumulator> = BTreeMap::new();
    let mut label_conflicts = 0usize;
    for row in rows {
        let sample_id = row.field(sample_field).unwrap_or_default();
        let label = row.field(label_field).unwrap_or_default();

        let acc = groups.entry(sample_id).or_insert_with(|| Accumulator {
            label: label.to_string(),
            sum: vec![0.0; dim],
            n_rows: 0,
        });

        if acc.label != label {
            if policy == LabelPolicy::Strict {
                return Err(InvalidInput::LabelConflict {
                    sample_id: sample_id.to_string(),
                    first: acc.label.clone(),
                    conflicting: label.to_string(),
                });
            }
            label_conflicts += 1;
            warn!(
                sample_id,
                kept = %acc.label,
                ignored = label,
                "conflicting group label for sample; keeping the first"
            );
        }

        for (slot, value) in acc.sum.iter_mut().zip(row.coordinates.iter()) {
            *slot += value;
        }
        acc.n_rows += 1;
    }

    let centroids = groups
        .into_iter()
        .map(|(sample_id, acc)| {
            let n = acc.n_rows as f64;
            Centroid {
                sample_id: sample_id.to_string(),
                label: acc.label,
                mean: acc.sum.into_iter().map(|s| s / n).collect(),
                n_rows: acc.n_rows,
            }
        })
        .collect();

    Ok(Aggregation {
        centroids,
        dim,
        rows_used: rows.len(),
        label_conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sample: &str, label: &str, coords: &[f64]) -> EmbeddingRow {
        EmbeddingRow::new(coords.to_vec())
            .with_field("sample", sample)
            .with_field("dataset", label)
    }

    #[test]
    fn one_centroid_per_sample_with_mean() {
        let rows = vec![
            row("A1", "X", &[1.0, 0.0]),
            row("B1", "Y", &[0.0, 1.0]),
            row("A1", "X", &[3.0, 0.0]),
        ];
        let agg = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::FirstWins)
            .expect("aggregate");
        assert_eq!(agg.dim, 2);
        assert_eq!(agg.centroids.len(), 2);
        assert_eq!(agg.centroids[0].sample_id, "A1");
        assert_eq!(agg.centroids[0].mean, vec![2.0, 0.0]);
        assert_eq!(agg.centroids[0].n_rows, 2);
        assert_eq!(agg.centroids[1].mean, vec![0.0, 1.0]);
    }

    #[test]
    fn single_row_mean_is_the_row() {
        let rows = vec![row("S", "X", &[0.25, -7.5, 3.0])];
        let agg = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::Strict)
            .expect("aggregate");
        assert_eq!(agg.centroids[0].mean, vec![0.25, -7.5, 3.0]);
    }

    #[test]
    fn empty_rows_are_invalid() {
        let err = aggregate_centroids(&[], "sample", "dataset", LabelPolicy::FirstWins)
            .unwrap_err();
        assert_eq!(err, InvalidInput::EmptyRows);
    }

    #[test]
    fn missing_label_field_is_invalid() {
        let rows = vec![
            row("A1", "X", &[1.0, 0.0]),
            EmbeddingRow::new(vec![1.0, 1.0]).with_field("sample", "A2"),
        ];
        let err = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::FirstWins)
            .unwrap_err();
        assert_eq!(
            err,
            InvalidInput::MissingField {
                row: 1,
                field: "dataset".to_string(),
            }
        );
    }

    #[test]
    fn non_finite_coordinates_are_invalid() {
        let rows = vec![
            row("A1", "X", &[1.0, 0.0]),
            row("A2", "X", &[1.0, f64::NAN]),
            row("A3", "X", &[f64::INFINITY, 0.0]),
        ];
        let err = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::FirstWins)
            .unwrap_err();
        assert_eq!(
            err,
            InvalidInput::NonNumeric {
                row: 1,
                column: "coordinate 1".to_string(),
                value: "NaN".to_string(),
            }
        );
    }

    #[test]
    fn dimension_mismatch_is_invalid() {
        let rows = vec![row("A1", "X", &[1.0, 0.0]), row("A2", "X", &[1.0])];
        let err = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::FirstWins)
            .unwrap_err();
        assert_eq!(
            err,
            InvalidInput::DimensionMismatch {
                row: 1,
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn first_label_wins_and_conflicts_are_counted() {
        let rows = vec![row("A1", "X", &[1.0, 0.0]), row("A1", "Y", &[3.0, 0.0])];
        let agg = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::FirstWins)
            .expect("aggregate");
        assert_eq!(agg.centroids[0].label, "X");
        assert_eq!(agg.label_conflicts, 1);
    }

    #[test]
    fn strict_policy_rejects_conflicts() {
        let rows = vec![row("A1", "X", &[1.0, 0.0]), row("A1", "Y", &[3.0, 0.0])];
        let err = aggregate_centroids(&rows, "sample", "dataset", LabelPolicy::Strict)
            .unwrap_err();
        assert_eq!(
            err,
            InvalidInput::LabelConflict {
                sample_id: "A1".to_string(),
                first: "X".to_string(),
                conflicting: "Y".to_string(),
            }
        );
    }
}
