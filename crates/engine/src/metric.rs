use cellmatch_core::{distance_correlation, METRIC_ID};

/// Scores the dependence between two equal-length coordinate vectors.
///
/// `Err` means the pair could not be scored; the matrix builder records the
/// cell as missing and carries on.
pub trait DependenceMetric: Sync {
    fn score(&self, left: &[f64], right: &[f64]) -> Result<f64, String>;

    fn metric_id(&self) -> &str {
        "custom"
    }
}

impl<F> DependenceMetric for F
where
    F: Fn(&[f64], &[f64]) -> Result<f64, String> + Sync,
{
    fn score(&self, left: &[f64], right: &[f64]) -> Result<f64, String> {
        self(left, right)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistanceCorrelation;

impl DependenceMetric for DistanceCorrelation {
    fn score(&self, left: &[f64], right: &[f64]) -> Result<f64, String> {
        distance_correlation(left, right).map_err(|err| err.to_string())
    }

    fn metric_id(&self) -> &str {
        METRIC_ID
    }
}
