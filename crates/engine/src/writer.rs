use crate::matrix::ScoreMatrix;
use crate::rank::RankedPair;
use crate::ExportConfig;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

pub const MAX_ROUND_DIGITS: u32 = 15;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("non-finite score for {left_id}/{right_id}: {value}")]
    InvalidFloat {
        left_id: String,
        right_id: String,
        value: f64,
    },
    #[error("rounding to {0} digits is not supported (max 15)")]
    RoundDigits(u32),
}

/// Shortest decimal that reads back to the same value, optionally rounded
/// half away from zero to `round` digits first.
pub fn format_score(value: f64, round: Option<u32>) -> String {
    match round {
        Some(digits) => {
            let scale = 10f64.powi(digits as i32);
            let rounded = (value * scale).round() / scale;
            // keeps "-0" out of the output
            format!("{}", rounded + 0.0)
        }
        None => format!("{}", value),
    }
}

fn check_round(round: Option<u32>) -> Result<(), ExportError> {
    match round {
        Some(digits) if digits > MAX_ROUND_DIGITS => Err(ExportError::RoundDigits(digits)),
        _ => Ok(()),
    }
}

/// Three columns: Left id, Right id, score, in list order.
pub fn write_ranked_csv<W: Write>(
    out: W,
    ranked: &[RankedPair],
    headers: &ExportConfig,
    round: Option<u32>,
) -> Result<(), ExportError> {
    check_round(round)?;
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        headers.left_header.as_str(),
        headers.right_header.as_str(),
        headers.score_header.as_str(),
    ])?;
    for pair in ranked {
        if !pair.score.is_finite() {
            return Err(ExportError::InvalidFloat {
                left_id: pair.left_id.clone(),
                right_id: pair.right_id.clone(),
                value: pair.score,
            });
        }
        writer.write_record([
            pair.left_id.as_str(),
            pair.right_id.as_str(),
            format_score(pair.score, round).as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Wide layout for heatmaps: one row per Left id, one column per Right id,
/// missing cells left empty.
pub fn write_matrix_csv<W: Write>(
    out: W,
    matrix: &ScoreMatrix,
    headers: &ExportConfig,
    round: Option<u32>,
) -> Result<(), ExportError> {
    check_round(round)?;
    let mut writer = csv::Writer::from_writer(out);
    let mut header = Vec::with_capacity(matrix.n_cols() + 1);
    header.push(headers.left_header.clone());
    header.extend(matrix.right_ids().iter().cloned());
    writer.write_record(&header)?;

    for (row, left_id) in matrix.left_ids().iter().enumerate() {
        let mut record = Vec::with_capacity(matrix.n_cols() + 1);
        record.push(left_id.clone());
        record.extend(
            matrix
                .row(row)
                .unwrap_or(&[])
                .iter()
                .map(|cell| cell.map(|v| format_score(v, round)).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn create_parent(path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn write_ranked_csv_file<P: AsRef<Path>>(
    path: P,
    ranked: &[RankedPair],
    headers: &ExportConfig,
    round: Option<u32>,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    create_parent(path)?;
    write_ranked_csv(fs::File::create(path)?, ranked, headers, round)
}

pub fn write_matrix_csv_file<P: AsRef<Path>>(
    path: P,
    matrix: &ScoreMatrix,
    headers: &ExportConfig,
    round: Option<u32>,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    create_parent(path)?;
    write_matrix_csv(fs::File::create(path)?, matrix, headers, round)
}

/// `similarity_analysis_<dataset>.csv`; path separators in the dataset name
/// are replaced so the result is always a bare file name.
pub fn default_export_name(dataset: &str) -> String {
    let dataset = dataset.trim();
    let dataset = if dataset.is_empty() { "data" } else { dataset };
    let safe: String = dataset
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
        .collect();
    format!("similarity_analysis_{}.csv", safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked() -> Vec<RankedPair> {
        vec![
            RankedPair {
                left_id: "L1".to_string(),
                right_id: "T, 1".to_string(),
                score: 0.123456,
            },
            RankedPair {
                left_id: "L2".to_string(),
                right_id: "T2".to_string(),
                score: 0.5,
            },
        ]
    }

    #[test]
    fn ranked_csv_has_three_columns_and_quotes_commas() {
        let mut buf = Vec::new();
        write_ranked_csv(&mut buf, &ranked(), &ExportConfig::default(), None).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            text,
            "CCLE,Primary Tumor,Distance Correlation\nL1,\"T, 1\",0.123456\nL2,T2,0.5\n"
        );
    }

    #[test]
    fn rounding_applies_to_scores() {
        let mut buf = Vec::new();
        write_ranked_csv(&mut buf, &ranked(), &ExportConfig::default(), Some(3)).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains(",0.123\n"));
        assert!(text.contains(",0.5\n"));
    }

    #[test]
    fn excessive_rounding_is_rejected() {
        let err = write_ranked_csv(Vec::<u8>::new(), &ranked(), &ExportConfig::default(), Some(40))
            .unwrap_err();
        assert!(matches!(err, ExportError::RoundDigits(40)));
    }

    #[test]
    fn matrix_csv_leaves_missing_cells_empty() {
        let matrix = ScoreMatrix::from_rows(
            vec!["L1".to_string(), "L2".to_string()],
            vec!["R1".to_string(), "R2".to_string()],
            vec![vec![Some(0.25), None], vec![Some(1.0), Some(0.75)]],
        )
        .expect("matrix");
        let mut buf = Vec::new();
        write_matrix_csv(&mut buf, &matrix, &ExportConfig::default(), None).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, "CCLE,R1,R2\nL1,0.25,\nL2,1,0.75\n");
    }

    #[test]
    fn file_writer_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.csv");
        write_ranked_csv_file(&path, &ranked(), &ExportConfig::default(), None).expect("write");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("CCLE,Primary Tumor,Distance Correlation\n"));
    }

    #[test]
    fn export_name_follows_dataset() {
        assert_eq!(default_export_name("breast"), "similarity_analysis_breast.csv");
        assert_eq!(default_export_name(""), "similarity_analysis_data.csv");
        assert_eq!(default_export_name("a/b"), "similarity_analysis_a_b.csv");
    }
}
