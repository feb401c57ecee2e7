mod python;

use thiserror::Error;

pub const METRIC_ID: &str = "distance_correlation_v_stat_v1";
pub const MIN_LEN: usize = 2;
const EPS_VARIANCE: f64 = 1e-20;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DcorError {
    #[error("vector length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("vectors need at least 2 coordinates, got {len}")]
    TooShort { len: usize },
    #[error("non-finite coordinate at index {index}")]
    NonFinite { index: usize },
    #[error("zero distance variance in {side} vector")]
    ZeroVariance { side: &'static str },
    #[error("distance correlation is not finite")]
    NonFiniteResult,
}

/// Raw V-statistics behind one distance correlation value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DcorComponents {
    pub dcov2_xy: f64,
    pub dvar2_x: f64,
    pub dvar2_y: f64,
    pub dcor: f64,
}

#[inline]
fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

fn validate(x: &[f64], y: &[f64]) -> Result<(), DcorError> {
    if x.len() != y.len() {
        return Err(DcorError::LengthMismatch {
            left: x.len(),
            right: y.len(),
        });
    }
    if x.len() < MIN_LEN {
        return Err(DcorError::TooShort { len: x.len() });
    }
    for (index, (a, b)) in x.iter().zip(y.iter()).enumerate() {
        if !a.is_finite() || !b.is_finite() {
            return Err(DcorError::NonFinite { index });
        }
    }
    Ok(())
}

/// Row means of the pairwise absolute-difference matrix, plus its grand mean.
///
/// The distance matrix is symmetric, so row means double as column means.
fn distance_means(v: &[f64]) -> (Vec<f64>, f64) {
    let n = v.len() as f64;
    let mut row_means = Vec::with_capacity(v.len());
    for a in v {
        let sum: f64 = v.iter().map(|b| (a - b).abs()).sum();
        row_means.push(sum / n);
    }
    let grand = row_means.iter().sum::<f64>() / n;
    (row_means, grand)
}

/// Rescales `v` so its mean pairwise distance is 1, returning the rescaled
/// vector and the factor that was divided out. `None` for a constant vector.
///
/// Dividing by the largest magnitude first keeps every pairwise difference
/// finite, whatever the input scale.
fn normalize(v: &[f64]) -> Option<(Vec<f64>, f64)> {
    let peak = v.iter().fold(0.0_f64, |acc, a| acc.max(a.abs()));
    if peak == 0.0 {
        return None;
    }
    let unit: Vec<f64> = v.iter().map(|a| a / peak).collect();
    let (_, grand) = distance_means(&unit);
    if grand == 0.0 {
        return None;
    }
    Some((unit.into_iter().map(|a| a / grand).collect(), peak * grand))
}

/// Biased (V-statistic) distance covariance and variances of `x` and `y`.
///
/// The correlation is computed on copies normalised to unit mean distance, so
/// it does not depend on the scale of either input. The reported dCov² and
/// dVar² are rescaled back to input units and may saturate to `0` or `inf`
/// at extreme scales even though `dcor` stays exact.
///
/// Double-centred entries are formed on the fly, so memory stays linear in the
/// vector length while time is quadratic.
pub fn distance_correlation_components(x: &[f64], y: &[f64]) -> Result<DcorComponents, DcorError> {
    validate(x, y)?;

    let (x, x_scale) = normalize(x).ok_or(DcorError::ZeroVariance { side: "left" })?;
    let (y, y_scale) = normalize(y).ok_or(DcorError::ZeroVariance { side: "right" })?;

    let n = x.len();
    let (x_rows, x_grand) = distance_means(&x);
    let (y_rows, y_grand) = distance_means(&y);

    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_yy = 0.0;
    for i in 0..n {
        for j in 0..n {
            let a = (x[i] - x[j]).abs() - x_rows[i] - x_rows[j] + x_grand;
            let b = (y[i] - y[j]).abs() - y_rows[i] - y_rows[j] + y_grand;
            sum_xy += a * b;
            sum_xx += a * a;
            sum_yy += b * b;
        }
    }

    let n2 = (n * n) as f64;
    let dcov2_xy = sum_xy / n2;
    let dvar2_x = sum_xx / n2;
    let dvar2_y = sum_yy / n2;

    // Both inputs have unit mean distance here, so this bound is relative.
    if dvar2_x <= EPS_VARIANCE {
        return Err(DcorError::ZeroVariance { side: "left" });
    }
    if dvar2_y <= EPS_VARIANCE {
        return Err(DcorError::ZeroVariance { side: "right" });
    }

    let denom = dvar2_x.sqrt() * dvar2_y.sqrt();
    let dcor2 = dcov2_xy.max(0.0) / denom;
    let dcor = clamp(dcor2.sqrt(), 0.0, 1.0);
    if !dcor.is_finite() {
        return Err(DcorError::NonFiniteResult);
    }

    Ok(DcorComponents {
        dcov2_xy: dcov2_xy * x_scale * y_scale,
        dvar2_x: dvar2_x * x_scale * x_scale,
        dvar2_y: dvar2_y * y_scale * y_scale,
        dcor,
    })
}

/// Distance correlation between two equal-length vectors, in `[0, 1]`.
///
/// Fails on degenerate input: mismatched or too-short vectors, non-finite
/// coordinates, or a constant vector (zero distance variance).
pub fn distance_correlation(x: &[f64], y: &[f64]) -> Result<f64, DcorError> {
    distance_correlation_components(x, y).map(|c| c.dcor)
}
